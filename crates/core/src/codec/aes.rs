//! AES-128-CBC for the `AESV2` crypt filter method.
//!
//! Encrypted strings and streams carry a 16-byte IV prefix followed by
//! ciphertext padded with PKCS#7.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};

use crate::error::{PdfError, Result};

type Aes128CbcDec = Decryptor<aes::Aes128>;
type Aes128CbcEnc = Encryptor<aes::Aes128>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Decrypt AES-128-CBC data without removing padding.
///
/// The key and IV must be 16 bytes and the data a non-empty multiple of 16.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if key.len() != BLOCK_SIZE || iv.len() != BLOCK_SIZE {
        return Err(PdfError::DecodeError("AES key and IV must be 16 bytes".into()));
    }
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(PdfError::DecodeError(format!(
            "AES ciphertext length {} is not a multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }
    let mut buf = data.to_vec();
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| PdfError::DecodeError("AES block decryption failed".into()))?;
    Ok(buf)
}

/// Encrypt with AES-128-CBC, appending PKCS#7 padding.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if key.len() != BLOCK_SIZE || iv.len() != BLOCK_SIZE {
        return Err(PdfError::DecodeError("AES key and IV must be 16 bytes".into()));
    }
    let padded_len = (data.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
    let mut buf = vec![0u8; padded_len];
    buf[..data.len()].copy_from_slice(data);
    let written = Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
        .map_err(|_| PdfError::DecodeError("AES padding buffer too small".into()))?
        .len();
    buf.truncate(written);
    Ok(buf)
}

/// Strip PKCS#7 padding, returning `None` when the padding is invalid.
pub fn strip_pkcs7(data: &[u8]) -> Option<&[u8]> {
    let pad_len = *data.last()? as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > data.len() {
        return None;
    }
    let start = data.len() - pad_len;
    data[start..]
        .iter()
        .all(|&b| b as usize == pad_len)
        .then_some(&data[..start])
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = *b"0123456789abcdef";
    const IV: [u8; 16] = *b"fedcba9876543210";

    #[test]
    fn encrypt_then_decrypt_strips_padding() {
        let ciphertext = aes_cbc_encrypt(&KEY, &IV, b"BT /F1 12 Tf ET").unwrap();
        assert_eq!(ciphertext.len(), 16);
        let plain = aes_cbc_decrypt(&KEY, &IV, &ciphertext).unwrap();
        assert_eq!(strip_pkcs7(&plain), Some(&b"BT /F1 12 Tf ET"[..]));
    }

    #[test]
    fn block_aligned_input_gets_full_padding_block() {
        let ciphertext = aes_cbc_encrypt(&KEY, &IV, &[7u8; 16]).unwrap();
        assert_eq!(ciphertext.len(), 32);
    }

    #[test]
    fn rejects_truncated_ciphertext() {
        let err = aes_cbc_decrypt(&KEY, &IV, &[0u8; 15]).unwrap_err();
        assert!(matches!(err, PdfError::DecodeError(_)));
    }

    #[test]
    fn invalid_padding_is_detected() {
        assert_eq!(strip_pkcs7(&[1, 2, 3, 0]), None);
        assert_eq!(strip_pkcs7(&[1, 2, 3, 2]), None);
        assert_eq!(strip_pkcs7(&[]), None);
        assert_eq!(strip_pkcs7(&[9, 2, 2]), Some(&[9u8][..]));
    }
}
