//! Builder pattern for unlocking documents.
//!
//! Provides a fluent API over [`UnlockOptions`].
//!
//! # Example
//! ```no_run
//! use deadbolt_core::api::Unlocker;
//!
//! # fn main() -> deadbolt_core::Result<()> {
//! let unlocked = Unlocker::new()
//!     .password("secret")
//!     .rasterize_fallback(true)
//!     .threads(4)
//!     .unlock_file("locked.pdf")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::raster::{CancelToken, PageRenderer};

use super::unlock::{Inspection, Strategy, UnlockOptions, Unlocked, inspect, unlock};

/// A builder for configuring and running [`unlock`].
#[derive(Debug, Clone, Default)]
pub struct Unlocker {
    options: UnlockOptions,
}

impl Unlocker {
    /// Creates an Unlocker with default options: structural rebuild with
    /// raster fallback, catalog and `/Info` carried, 2x raster scale.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the open password for encrypted PDFs.
    ///
    /// # Example
    /// ```
    /// # use deadbolt_core::api::Unlocker;
    /// let unlocker = Unlocker::new().password("secret");
    /// ```
    pub fn password(mut self, pwd: &str) -> Self {
        self.options.password = Some(pwd.to_string());
        self
    }

    /// Sets the strategy used to produce the output.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.options.strategy = strategy;
        self
    }

    /// Whether a failed structural rebuild may fall back to rasterizing.
    ///
    /// Has no effect once [`Strategy::Rasterize`] was chosen.
    pub fn rasterize_fallback(mut self, enabled: bool) -> Self {
        if self.options.strategy != Strategy::Rasterize {
            self.options.strategy = if enabled {
                Strategy::StructuralThenRaster
            } else {
                Strategy::Structural
            };
        }
        self
    }

    /// Sets whether document-level catalog entries (outlines, names, forms)
    /// are carried into the output.
    pub fn carry_catalog(mut self, enabled: bool) -> Self {
        self.options.rebuild.carry_catalog = enabled;
        self
    }

    /// Sets whether the `/Info` dictionary is carried into the output.
    pub fn carry_info(mut self, enabled: bool) -> Self {
        self.options.rebuild.carry_info = enabled;
        self
    }

    /// Sets the raster scale in pixels per point.
    ///
    /// # Example
    /// ```
    /// # use deadbolt_core::api::Unlocker;
    /// let unlocker = Unlocker::new().scale(3.0); // 216 dpi
    /// ```
    pub fn scale(mut self, scale: f64) -> Self {
        self.options.raster.scale = scale;
        self
    }

    /// Sets the rasterizer thread count. 0 uses every available core.
    pub fn threads(mut self, thread_count: usize) -> Self {
        self.options.raster.threads = thread_count;
        self
    }

    /// Sets the canvas colour for rasterized pages.
    pub fn background(mut self, rgb: [u8; 3]) -> Self {
        self.options.raster.background = rgb;
        self
    }

    /// Replaces the built-in page renderer.
    pub fn renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.options.raster.renderer = renderer;
        self
    }

    /// Uses `token` to cancel rasterization from another thread.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.options.raster.cancel = token;
        self
    }

    /// The options this builder has collected.
    pub fn options(&self) -> &UnlockOptions {
        &self.options
    }

    /// Unlocks PDF bytes.
    pub fn unlock(&self, data: impl Into<Bytes>) -> Result<Unlocked> {
        unlock(data, &self.options)
    }

    /// Reads and unlocks a file. The output is returned, not written.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the PDF cannot be
    /// unlocked.
    pub fn unlock_file(&self, path: impl AsRef<Path>) -> Result<Unlocked> {
        let data = std::fs::read(path)?;
        self.unlock(data)
    }

    /// Inspects PDF bytes with the configured password.
    pub fn inspect(&self, data: impl Into<Bytes>) -> Result<Inspection> {
        inspect(data, self.options.password.as_deref())
    }
}
