//! deadbolt - strips permission restrictions and encryption from PDF files.
//!
//! The engine parses a document's object graph, classifies its protection,
//! and writes an equivalent unencrypted copy. Documents whose structure
//! cannot be rebuilt can be rasterized page by page instead.

pub mod api;
pub mod codec;
pub mod document;
pub mod error;
pub mod model;
pub mod parser;
pub mod raster;
pub mod rebuild;
pub mod serialize;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the entry points
pub use api::{
    Inspection, Strategy, UnlockOptions, UnlockReport, UnlockStatus, Unlocked, Unlocker, inspect,
    unlock,
};
pub use error::{ErrorKind, PdfError, Result};

// Re-export document modules for convenience
pub use document::{EncryptionState, Permissions, RawDocument};
pub use raster::{CancelToken, FillRenderer, PageRenderer, RasterContext, RenderPage, rasterize};
pub use rebuild::{NewDocument, RebuildOptions, rebuild};
pub use serialize::serialize;
