//! PDF parsing modules.
//!
//! - `lexer`: byte-level tokenizer
//! - `pdf_parser`: object and content stream parsers

pub mod lexer;
pub mod pdf_parser;

// Re-export main types for convenience
pub use lexer::{Keyword, Lexer, Token, resync, stream_range, tokenize};
pub use pdf_parser::{ContentParser, Operation, PDFParser};
