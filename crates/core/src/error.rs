//! Error types for the deadbolt unlocking engine.

use thiserror::Error;

/// Primary error type for parsing, decrypting and rebuilding documents.
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("malformed token at position {pos}: {msg}")]
    MalformedToken { pos: usize, msg: String },

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("type error: expected {expected}, got {got}")]
    TypeError {
        expected: &'static str,
        got: &'static str,
    },

    #[error("PDF syntax error: {0}")]
    SyntaxError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("unreadable container: {0}")]
    UnreadableContainer(String),

    #[error("a password is required to open this document")]
    PasswordRequired,

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("page tree contains a cycle at object {0}")]
    CyclicPageTree(u32),

    #[error("failed to decrypt object {objid} {genno}: {msg}")]
    DecryptionFailure {
        objid: u32,
        genno: u16,
        msg: String,
    },

    #[error("document has no pages")]
    EmptyDocument,

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias for PdfError.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Coarse error categories surfaced to callers of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedToken,
    UnreadableContainer,
    PasswordRequired,
    IncorrectPassword,
    UnsupportedEncryption,
    CyclicPageTree,
    DecryptionFailure,
    EmptyDocument,
    Cancelled,
    Io,
}

impl ErrorKind {
    /// Stable identifier, suitable for machine-readable reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedToken => "malformed_token",
            Self::UnreadableContainer => "unreadable_container",
            Self::PasswordRequired => "password_required",
            Self::IncorrectPassword => "incorrect_password",
            Self::UnsupportedEncryption => "unsupported_encryption",
            Self::CyclicPageTree => "cyclic_page_tree",
            Self::DecryptionFailure => "decryption_failure",
            Self::EmptyDocument => "empty_document",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PdfError {
    /// Category of this error.
    ///
    /// Internal syntax and decode errors collapse into `UnreadableContainer`;
    /// a type mismatch in the object graph is a structural problem as well.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedToken { .. } | Self::UnexpectedEof => ErrorKind::MalformedToken,
            Self::TypeError { .. }
            | Self::SyntaxError(_)
            | Self::DecodeError(_)
            | Self::UnreadableContainer(_) => ErrorKind::UnreadableContainer,
            Self::PasswordRequired => ErrorKind::PasswordRequired,
            Self::IncorrectPassword => ErrorKind::IncorrectPassword,
            Self::UnsupportedEncryption(_) => ErrorKind::UnsupportedEncryption,
            Self::CyclicPageTree(_) => ErrorKind::CyclicPageTree,
            Self::DecryptionFailure { .. } => ErrorKind::DecryptionFailure,
            Self::EmptyDocument => ErrorKind::EmptyDocument,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Human-readable explanation with a suggested remedy.
    ///
    /// Never includes byte offsets or object numbers.
    pub const fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::MalformedToken | ErrorKind::UnreadableContainer => {
                "The file could not be read as a PDF document. It may be damaged or not a PDF at all."
            }
            ErrorKind::PasswordRequired => {
                "This PDF is protected with an open password. Enter the password to unlock it."
            }
            ErrorKind::IncorrectPassword => {
                "The password is incorrect. Check it and try again."
            }
            ErrorKind::UnsupportedEncryption => {
                "This PDF uses an encryption scheme that is not supported. Try a different tool."
            }
            ErrorKind::CyclicPageTree => {
                "The page structure of this PDF is corrupt (it loops back on itself)."
            }
            ErrorKind::DecryptionFailure => {
                "Some content of this PDF could not be decrypted, so no output was produced."
            }
            ErrorKind::EmptyDocument => "This PDF does not contain any pages.",
            ErrorKind::Cancelled => "The operation was cancelled.",
            ErrorKind::Io => "The file could not be read or written.",
        }
    }

    /// Whether retrying with a (different) password can succeed.
    pub const fn is_password_related(&self) -> bool {
        matches!(self, Self::PasswordRequired | Self::IncorrectPassword)
    }
}
