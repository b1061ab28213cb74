//! Unlocking entry points.
//!
//! - `unlock()` - remove encryption and permission restrictions
//! - `inspect()` - classify a document's protection without rebuilding it

use bytes::Bytes;
use tracing::{info, warn};

use crate::document::page::walk_page_tree;
use crate::document::raw::RawDocument;
use crate::document::security::{EncryptionState, PasswordKind, Permissions};
use crate::document::source::SourceReader;
use crate::error::{ErrorKind, PdfError, Result};
use crate::raster::{RasterContext, rasterize};
use crate::rebuild::{NewDocument, RebuildOptions, Rebuilder};
use crate::serialize::serialize;

/// How the unlocked copy is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Copy the object graph without encryption
    Structural,
    /// Render every page to an image
    Rasterize,
    /// Structural, falling back to rasterizing when the object graph
    /// cannot be rebuilt
    #[default]
    StructuralThenRaster,
}

/// Options for [`unlock`].
#[derive(Debug, Clone, Default)]
pub struct UnlockOptions {
    /// Open password. Not needed for restriction-only documents.
    pub password: Option<String>,
    pub strategy: Strategy,
    pub rebuild: RebuildOptions,
    pub raster: RasterContext,
}

/// Which path produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockStatus {
    Structural,
    Rasterized,
}

impl UnlockStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Rasterized => "rasterized",
        }
    }
}

/// What was removed from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockReport {
    /// `not_encrypted`, `restrictions_only` or `requires_key`
    pub encryption: &'static str,
    pub page_count: usize,
    /// Labels of the permissions the input withheld
    pub permissions_removed: Vec<&'static str>,
    /// Standard security handler revision
    pub revision: Option<i64>,
    pub authenticated_as: Option<PasswordKind>,
    /// The cross-reference data was unusable and objects were found by scanning
    pub repaired: bool,
}

/// Result of a successful [`unlock`].
#[derive(Debug, Clone)]
pub struct Unlocked {
    /// The serialized, unencrypted document
    pub bytes: Vec<u8>,
    pub status: UnlockStatus,
    pub report: UnlockReport,
}

/// Produce an unencrypted, unrestricted copy of a PDF.
///
/// # Errors
/// [`PdfError::PasswordRequired`] when the document needs an open password
/// and none was given, [`PdfError::IncorrectPassword`] when the given one
/// does not open it. No password is ever guessed.
///
/// # Example
/// ```no_run
/// use deadbolt_core::api::{UnlockOptions, unlock};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pdf_bytes = std::fs::read("restricted.pdf")?;
///     let unlocked = unlock(pdf_bytes, &UnlockOptions::default())?;
///     std::fs::write("restricted_unlocked.pdf", &unlocked.bytes)?;
///     Ok(())
/// }
/// ```
pub fn unlock(data: impl Into<Bytes>, options: &UnlockOptions) -> Result<Unlocked> {
    let raw = RawDocument::parse(data)?;
    let state = EncryptionState::resolve(&raw, options.password.as_deref())?;
    if !state.is_open() {
        return Err(PdfError::PasswordRequired);
    }

    let (doc, status) = match options.strategy {
        Strategy::Structural => (structural(&raw, &state, options)?, UnlockStatus::Structural),
        Strategy::Rasterize => (
            rasterize(&raw, &state, &options.raster)?,
            UnlockStatus::Rasterized,
        ),
        Strategy::StructuralThenRaster => match structural(&raw, &state, options) {
            Ok(doc) => (doc, UnlockStatus::Structural),
            Err(e) if falls_back(&e) => {
                warn!(error = %e, "structural rebuild failed, rasterizing instead");
                (
                    rasterize(&raw, &state, &options.raster)?,
                    UnlockStatus::Rasterized,
                )
            }
            Err(e) => return Err(e),
        },
    };

    let report = UnlockReport {
        encryption: state.as_str(),
        page_count: doc.page_count(),
        permissions_removed: state
            .descriptor()
            .map(|d| d.restrictions().labels())
            .unwrap_or_default(),
        revision: state.descriptor().map(|d| d.revision),
        authenticated_as: state.security().map(|s| s.authenticated_as()),
        repaired: raw.is_fallback(),
    };
    let bytes = serialize(&doc);
    info!(
        status = status.as_str(),
        encryption = report.encryption,
        pages = report.page_count,
        size = bytes.len(),
        "document unlocked"
    );
    Ok(Unlocked {
        bytes,
        status,
        report,
    })
}

fn structural(
    raw: &RawDocument,
    state: &EncryptionState,
    options: &UnlockOptions,
) -> Result<NewDocument> {
    Rebuilder::new(raw, state, options.rebuild)?.run()
}

/// Errors that send [`Strategy::StructuralThenRaster`] to the rasterizer.
fn falls_back(err: &PdfError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::UnreadableContainer | ErrorKind::MalformedToken
    )
}

/// Protection summary returned by [`inspect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// Header version, e.g. `1.7`
    pub version: String,
    /// `not_encrypted`, `restrictions_only` or `requires_key`
    pub encryption: &'static str,
    pub revision: Option<i64>,
    pub key_length_bits: Option<usize>,
    /// Labels of the permissions the document withholds
    pub restrictions: Vec<&'static str>,
    /// Whether an open password is still needed to read the content
    pub password_required: bool,
    /// Known once the document can be read
    pub page_count: Option<usize>,
    pub object_count: usize,
    pub repaired: bool,
}

/// Classify a document's protection without producing output.
///
/// A document that needs a password is reported, not rejected; a wrong
/// `password` is still [`PdfError::IncorrectPassword`].
pub fn inspect(data: impl Into<Bytes>, password: Option<&str>) -> Result<Inspection> {
    let raw = RawDocument::parse(data)?;
    let state = EncryptionState::resolve(&raw, password)?;
    let descriptor = state.descriptor();
    let page_count = if state.is_open() {
        let reader = SourceReader::new(&raw, &state)?;
        Some(walk_page_tree(&reader)?.pages.len())
    } else {
        None
    };
    Ok(Inspection {
        version: raw.version().to_string(),
        encryption: state.as_str(),
        revision: descriptor.map(|d| d.revision),
        key_length_bits: descriptor.map(|d| d.key_length_bits),
        restrictions: descriptor
            .map(|d| d.restrictions())
            .unwrap_or_else(Permissions::empty)
            .labels(),
        password_required: !state.is_open(),
        page_count,
        object_count: raw.len(),
        repaired: raw.is_fallback(),
    })
}
