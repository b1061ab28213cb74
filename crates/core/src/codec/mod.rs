//! Codecs for stream decoding and the standard security handler ciphers.
//!
//! - `aes`: AES-128-CBC with PKCS#7 padding
//! - `arcfour`: RC4
//! - `filters`: stream filter pipeline (Flate, ASCIIHex, ASCII85, PNG predictors)

pub mod aes;
pub mod arcfour;
pub mod filters;

pub use aes::{aes_cbc_decrypt, aes_cbc_encrypt, strip_pkcs7};
pub use arcfour::Arcfour;
pub use filters::{decode_stream, flate_decode, flate_encode};
