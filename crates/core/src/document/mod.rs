//! PDF Document module - object index, security, and pages.
//!
//! This module contains:
//! - `xref` - cross-reference tables, xref streams and the fallback scan
//! - `raw` - RawDocument: lazy object loading and object streams
//! - `security` - standard security handler and encryption classification
//! - `source` - decrypting reader over a RawDocument
//! - `page` - page tree walk with attribute inheritance

pub mod page;
pub mod raw;
pub mod security;
pub mod source;
pub mod xref;

// Re-export main types for convenience
pub use page::{PageLeaf, PageTree, walk_page_tree};
pub use raw::RawDocument;
pub use security::{
    EncryptionDescriptor, EncryptionState, PASSWORD_PADDING, PasswordKind, Permissions, Security,
};
pub use source::SourceReader;
pub use xref::{XRefEntry, XRefTable};
