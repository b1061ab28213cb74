//! Public API for unlocking PDF documents.
//!
//! # Example
//!
//! ```no_run
//! use deadbolt_core::api::{unlock, UnlockOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pdf_bytes = std::fs::read("document.pdf")?;
//! let unlocked = unlock(pdf_bytes, &UnlockOptions::default())?;
//! println!("{} pages, {:?}", unlocked.report.page_count, unlocked.status);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod unlock;

// Re-export for convenience
pub use builder::Unlocker;
pub use unlock::{
    Inspection, Strategy, UnlockOptions, UnlockReport, UnlockStatus, Unlocked, inspect, unlock,
};
