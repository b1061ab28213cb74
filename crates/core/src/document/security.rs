//! Standard security handler, revisions 2 to 4.
//!
//! Classifies a document's protection and derives the file key needed to
//! decrypt strings and streams. Keys are only ever held inside [`Security`].

use std::sync::Arc;

use bitflags::bitflags;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::codec::aes::{BLOCK_SIZE, aes_cbc_decrypt, aes_cbc_encrypt, strip_pkcs7};
use crate::codec::arcfour::Arcfour;
use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObject};

use super::raw::RawDocument;

/// Password padding constant from the PDF standard.
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

bitflags! {
    /// User access permissions from the `/P` entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        const PRINT = 1 << 2;
        const MODIFY = 1 << 3;
        const COPY = 1 << 4;
        const ANNOTATE = 1 << 5;
        const FILL_FORMS = 1 << 8;
        const EXTRACT_ACCESSIBILITY = 1 << 9;
        const ASSEMBLE = 1 << 10;
        const PRINT_HIGH_QUALITY = 1 << 11;
    }
}

impl Permissions {
    /// Permissions granted by a raw `/P` value.
    pub const fn from_p(p: u32) -> Self {
        Self::from_bits_truncate(p)
    }

    /// Permissions that `/P` withholds.
    pub fn restricted(p: u32) -> Self {
        Self::all().difference(Self::from_p(p))
    }

    /// Stable lowercase labels, one per set flag.
    pub fn labels(self) -> Vec<&'static str> {
        const LABELS: [(Permissions, &str); 8] = [
            (Permissions::PRINT, "print"),
            (Permissions::MODIFY, "modify"),
            (Permissions::COPY, "copy"),
            (Permissions::ANNOTATE, "annotate"),
            (Permissions::FILL_FORMS, "fill_forms"),
            (Permissions::EXTRACT_ACCESSIBILITY, "extract_accessibility"),
            (Permissions::ASSEMBLE, "assemble"),
            (Permissions::PRINT_HIGH_QUALITY, "print_high_quality"),
        ];
        LABELS
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|&(_, label)| label)
            .collect()
    }
}

/// Crypt filter method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    Identity,
    /// RC4
    V2,
    /// AES-128-CBC
    AesV2,
}

impl CryptMethod {
    fn from_crypt_filter(cf: Option<&PDFDict>, name: &str) -> Result<Self> {
        if name == "Identity" {
            return Ok(Self::Identity);
        }
        let filter = cf
            .and_then(|cf| cf.get(name))
            .and_then(|v| v.as_dict().ok())
            .ok_or_else(|| {
                PdfError::UnsupportedEncryption(format!("crypt filter /{name} not defined"))
            })?;
        match filter.get("CFM").and_then(|v| v.as_name().ok()).unwrap_or("None") {
            "None" => Ok(Self::Identity),
            "V2" => Ok(Self::V2),
            "AESV2" => Ok(Self::AesV2),
            "AESV3" => Err(PdfError::UnsupportedEncryption("AES-256 (AESV3)".into())),
            other => Err(PdfError::UnsupportedEncryption(format!(
                "crypt filter method /{other}"
            ))),
        }
    }
}

/// Parameters of the `/Encrypt` dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionDescriptor {
    pub filter: String,
    pub sub_filter: Option<String>,
    pub v: i64,
    pub revision: i64,
    pub key_length_bits: usize,
    pub owner_hash: Vec<u8>,
    pub user_hash: Vec<u8>,
    /// Raw `/P` value
    pub permissions: u32,
    /// First element of the trailer `/ID`
    pub document_id: Vec<u8>,
    pub encrypt_metadata: bool,
    pub string_method: CryptMethod,
    pub stream_method: CryptMethod,
}

impl EncryptionDescriptor {
    /// Read and validate an encryption dictionary.
    ///
    /// Anything outside the standard handler with V 1, 2 or 4 and R 2 to 4
    /// is [`PdfError::UnsupportedEncryption`].
    pub fn from_dict(dict: &PDFDict, document_id: Vec<u8>) -> Result<Self> {
        let name = |key: &str| dict.get(key).and_then(|v| v.as_name().ok()).map(str::to_string);
        let int = |key: &str| dict.get(key).and_then(|v| v.as_int().ok());

        let filter = name("Filter").unwrap_or_default();
        if filter != "Standard" {
            return Err(PdfError::UnsupportedEncryption(format!(
                "security handler /{filter}"
            )));
        }
        let v = int("V").unwrap_or(0);
        let revision = int("R")
            .ok_or_else(|| PdfError::SyntaxError("missing R in /Encrypt".into()))?;
        if !matches!(v, 1 | 2 | 4) || !(2..=4).contains(&revision) {
            return Err(PdfError::UnsupportedEncryption(format!("V={v}, R={revision}")));
        }

        let hash = |key: &str| -> Result<Vec<u8>> {
            let bytes = dict
                .get(key)
                .ok_or_else(|| PdfError::SyntaxError(format!("missing {key} in /Encrypt")))?
                .as_string()?;
            if bytes.len() < 32 {
                return Err(PdfError::SyntaxError(format!("/{key} shorter than 32 bytes")));
            }
            Ok(bytes[..32].to_vec())
        };
        let owner_hash = hash("O")?;
        let user_hash = hash("U")?;
        // P is signed in the file; only its bit pattern matters.
        let permissions = int("P")
            .ok_or_else(|| PdfError::SyntaxError("missing P in /Encrypt".into()))?
            as u32;

        let (key_length_bits, string_method, stream_method) = match v {
            1 => (40, CryptMethod::V2, CryptMethod::V2),
            2 => (normalize_key_length(int("Length")), CryptMethod::V2, CryptMethod::V2),
            _ => {
                let cf = dict.get("CF").and_then(|v| v.as_dict().ok());
                let strf = name("StrF").unwrap_or_else(|| "Identity".into());
                let stmf = name("StmF").unwrap_or_else(|| "Identity".into());
                (
                    128,
                    CryptMethod::from_crypt_filter(cf, &strf)?,
                    CryptMethod::from_crypt_filter(cf, &stmf)?,
                )
            }
        };

        Ok(Self {
            filter,
            sub_filter: name("SubFilter"),
            v,
            revision,
            key_length_bits,
            owner_hash,
            user_hash,
            permissions,
            document_id,
            encrypt_metadata: dict
                .get("EncryptMetadata")
                .and_then(|v| v.as_bool().ok())
                .unwrap_or(true),
            string_method,
            stream_method,
        })
    }

    /// File key length in bytes.
    pub const fn key_len(&self) -> usize {
        if self.revision == 2 {
            5
        } else {
            self.key_length_bits / 8
        }
    }

    /// Permissions this document withholds.
    pub fn restrictions(&self) -> Permissions {
        Permissions::restricted(self.permissions)
    }
}

/// `/Length` for V2 handlers: 40 to 128 bits in steps of 8.
fn normalize_key_length(length: Option<i64>) -> usize {
    let bits = match length {
        // Some writers give the length in bytes.
        Some(n @ 5..=16) => n * 8,
        Some(n) => n,
        None => 40,
    };
    (bits.clamp(40, 128) as usize) / 8 * 8
}

/// Password bytes: Latin-1 when every char fits, otherwise UTF-8.
/// Truncated to 32 bytes.
pub fn password_bytes(password: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = if password.chars().all(|c| (c as u32) <= 0xFF) {
        password.chars().map(|c| c as u8).collect()
    } else {
        password.as_bytes().to_vec()
    };
    bytes.truncate(32);
    bytes
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PASSWORD_PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// Compute the file key from a user password (Algorithm 2).
pub fn compute_file_key(desc: &EncryptionDescriptor, password: &[u8]) -> Vec<u8> {
    let n = desc.key_len();
    let mut context = md5::Context::new();
    context.consume(pad_password(password));
    context.consume(&desc.owner_hash);
    context.consume(desc.permissions.to_le_bytes());
    context.consume(&desc.document_id);
    if desc.revision >= 4 && !desc.encrypt_metadata {
        context.consume([0xFF, 0xFF, 0xFF, 0xFF]);
    }
    let mut hash = context.finalize().0;

    if desc.revision >= 3 {
        for _ in 0..50 {
            hash = md5::compute(&hash[..n]).0;
        }
    }
    hash[..n].to_vec()
}

/// Compute the `/U` value for a file key (Algorithms 4 and 5).
pub fn compute_user_hash(key: &[u8], revision: i64, document_id: &[u8]) -> Vec<u8> {
    if revision == 2 {
        return Arcfour::crypt(key, &PASSWORD_PADDING);
    }
    let mut context = md5::Context::new();
    context.consume(PASSWORD_PADDING);
    context.consume(document_id);
    let mut result = Arcfour::crypt(key, &context.finalize().0);
    for i in 1..20u8 {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        result = Arcfour::crypt(&round_key, &result);
    }
    // Only the first 16 bytes are significant.
    result.extend_from_slice(&PASSWORD_PADDING[..16]);
    result
}

/// RC4 key derived from the owner password (Algorithm 3, steps a to d).
fn owner_key(owner_password: &[u8], revision: i64, key_len: usize) -> Vec<u8> {
    let mut hash = md5::compute(pad_password(owner_password)).0;
    if revision >= 3 {
        for _ in 0..50 {
            hash = md5::compute(hash).0;
        }
    }
    let n = if revision == 2 { 5 } else { key_len };
    hash[..n].to_vec()
}

/// Compute the `/O` value (Algorithm 3).
///
/// An empty owner password falls back to the user password.
pub fn compute_owner_hash(
    owner_password: &[u8],
    user_password: &[u8],
    revision: i64,
    key_len: usize,
) -> Vec<u8> {
    let source = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };
    let key = owner_key(source, revision, key_len);
    let mut result = Arcfour::crypt(&key, &pad_password(user_password));
    if revision >= 3 {
        for i in 1..20u8 {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            result = Arcfour::crypt(&round_key, &result);
        }
    }
    result
}

/// Derived key material. Never printed, zeroed on drop.
pub struct SecretKey(Zeroizing<Vec<u8>>);

impl SecretKey {
    fn new(key: Vec<u8>) -> Self {
        Self(Zeroizing::new(key))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([redacted])")
    }
}

/// Which password opened the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordKind {
    User,
    Owner,
}

/// Authenticated security handler holding the file key.
#[derive(Debug)]
pub struct Security {
    descriptor: EncryptionDescriptor,
    key: SecretKey,
    authenticated_as: PasswordKind,
}

impl Security {
    /// Try `password` as user password, then as owner password.
    pub fn authenticate(descriptor: &EncryptionDescriptor, password: &[u8]) -> Option<Self> {
        let (key, kind) = if let Some(key) = Self::authenticate_user(descriptor, password) {
            (key, PasswordKind::User)
        } else {
            (Self::authenticate_owner(descriptor, password)?, PasswordKind::Owner)
        };
        Some(Self {
            descriptor: descriptor.clone(),
            key: SecretKey::new(key),
            authenticated_as: kind,
        })
    }

    fn authenticate_user(desc: &EncryptionDescriptor, password: &[u8]) -> Option<Vec<u8>> {
        let key = compute_file_key(desc, password);
        let computed = compute_user_hash(&key, desc.revision, &desc.document_id);
        let significant = if desc.revision == 2 { 32 } else { 16 };
        (computed[..significant] == desc.user_hash[..significant]).then_some(key)
    }

    /// Algorithm 7: recover the user password from `/O`.
    fn authenticate_owner(desc: &EncryptionDescriptor, password: &[u8]) -> Option<Vec<u8>> {
        let key = owner_key(password, desc.revision, desc.key_len());
        let user_password = if desc.revision == 2 {
            Arcfour::crypt(&key, &desc.owner_hash)
        } else {
            let mut result = desc.owner_hash.clone();
            for i in (0..20u8).rev() {
                let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
                result = Arcfour::crypt(&round_key, &result);
            }
            result
        };
        Self::authenticate_user(desc, &user_password)
    }

    pub const fn descriptor(&self) -> &EncryptionDescriptor {
        &self.descriptor
    }

    pub const fn authenticated_as(&self) -> PasswordKind {
        self.authenticated_as
    }

    /// Per-object key (Algorithm 1).
    fn object_key(&self, objid: u32, genno: u16, method: CryptMethod) -> SecretKey {
        let key = self.key.as_bytes();
        let mut material = Zeroizing::new(Vec::with_capacity(key.len() + 9));
        material.extend_from_slice(key);
        material.extend_from_slice(&objid.to_le_bytes()[..3]);
        material.extend_from_slice(&genno.to_le_bytes());
        if method == CryptMethod::AesV2 {
            material.extend_from_slice(b"sAlT");
        }
        let hash = md5::compute(material.as_slice());
        SecretKey::new(hash.0[..(key.len() + 5).min(16)].to_vec())
    }

    /// Decrypt a string belonging to object `objid genno`.
    pub fn decrypt_string(&self, objid: u32, genno: u16, data: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with(self.descriptor.string_method, objid, genno, data)
    }

    /// Decrypt the data of stream `objid genno`.
    ///
    /// Metadata streams stay as they are when `EncryptMetadata` is false,
    /// as do streams that select the Identity crypt filter themselves.
    pub fn decrypt_stream(
        &self,
        objid: u32,
        genno: u16,
        data: &[u8],
        attrs: &PDFDict,
    ) -> Result<Vec<u8>> {
        let method = if self.skips_stream(attrs) {
            CryptMethod::Identity
        } else {
            self.descriptor.stream_method
        };
        self.decrypt_with(method, objid, genno, data)
    }

    fn skips_stream(&self, attrs: &PDFDict) -> bool {
        let is_type = |name: &str| attrs.get("Type").is_some_and(|t| t.is_name(name));
        if is_type("XRef") || (!self.descriptor.encrypt_metadata && is_type("Metadata")) {
            return true;
        }
        // A leading /Crypt filter with no /Name selects Identity.
        let first_filter = match attrs.get("Filter") {
            Some(PDFObject::Name(n)) => Some(n.as_str()),
            Some(PDFObject::Array(arr)) => arr.first().and_then(|f| f.as_name().ok()),
            _ => None,
        };
        if first_filter == Some("Crypt") {
            let parms = match attrs.get("DecodeParms") {
                Some(PDFObject::Array(arr)) => arr.first(),
                other => other,
            };
            let name = parms
                .and_then(|p| p.as_dict().ok())
                .and_then(|d| d.get("Name"))
                .and_then(|n| n.as_name().ok())
                .unwrap_or("Identity");
            return name == "Identity";
        }
        false
    }

    fn decrypt_with(
        &self,
        method: CryptMethod,
        objid: u32,
        genno: u16,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let failure = |msg: &str| PdfError::DecryptionFailure {
            objid,
            genno,
            msg: msg.to_string(),
        };
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::V2 => Ok(Arcfour::crypt(
                self.object_key(objid, genno, method).as_bytes(),
                data,
            )),
            CryptMethod::AesV2 => {
                if data.is_empty() {
                    return Ok(Vec::new());
                }
                if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
                    return Err(failure("AES data is not IV plus whole blocks"));
                }
                let key = self.object_key(objid, genno, method);
                let (iv, ciphertext) = data.split_at(BLOCK_SIZE);
                let plain = aes_cbc_decrypt(key.as_bytes(), iv, ciphertext)
                    .map_err(|e| failure(&e.to_string()))?;
                strip_pkcs7(&plain)
                    .map(<[u8]>::to_vec)
                    .ok_or_else(|| failure("invalid PKCS#7 padding"))
            }
        }
    }

    /// Encrypt a string for object `objid genno`, the inverse of
    /// [`Security::decrypt_string`]. `iv` is only used by AES.
    pub fn encrypt_string(
        &self,
        objid: u32,
        genno: u16,
        data: &[u8],
        iv: [u8; BLOCK_SIZE],
    ) -> Result<Vec<u8>> {
        self.encrypt_with(self.descriptor.string_method, objid, genno, data, iv)
    }

    /// Encrypt stream data for object `objid genno`.
    pub fn encrypt_stream(
        &self,
        objid: u32,
        genno: u16,
        data: &[u8],
        iv: [u8; BLOCK_SIZE],
    ) -> Result<Vec<u8>> {
        self.encrypt_with(self.descriptor.stream_method, objid, genno, data, iv)
    }

    fn encrypt_with(
        &self,
        method: CryptMethod,
        objid: u32,
        genno: u16,
        data: &[u8],
        iv: [u8; BLOCK_SIZE],
    ) -> Result<Vec<u8>> {
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::V2 => Ok(Arcfour::crypt(
                self.object_key(objid, genno, method).as_bytes(),
                data,
            )),
            CryptMethod::AesV2 => {
                let key = self.object_key(objid, genno, method);
                let mut out = iv.to_vec();
                out.extend(aes_cbc_encrypt(key.as_bytes(), &iv, data)?);
                Ok(out)
            }
        }
    }
}

/// Protection classification of a document.
#[derive(Debug, Clone)]
pub enum EncryptionState {
    /// No `/Encrypt` dictionary
    NotEncrypted,
    /// Encrypted, but the empty user password opens it
    RestrictionsOnly(Arc<Security>),
    /// An open password is needed; `security` is set once it was supplied
    /// and accepted.
    RequiresKey {
        descriptor: EncryptionDescriptor,
        security: Option<Arc<Security>>,
    },
}

impl EncryptionState {
    /// Classify `doc` and authenticate `password` if one is needed.
    ///
    /// Successful authentication is also registered with `doc` so that
    /// object streams can be decrypted.
    pub fn resolve(doc: &RawDocument, password: Option<&str>) -> Result<Self> {
        let Some(encrypt_ref) = doc.trailer().get("Encrypt") else {
            info!("document is not encrypted");
            return Ok(Self::NotEncrypted);
        };
        let encrypt = match doc.resolve(encrypt_ref)? {
            PDFObject::Dict(dict) => dict,
            PDFObject::Null => {
                warn!("/Encrypt does not resolve, treating document as unencrypted");
                return Ok(Self::NotEncrypted);
            }
            other => {
                return Err(PdfError::TypeError {
                    expected: "dict",
                    got: other.type_name(),
                });
            }
        };

        let document_id = match doc.trailer().get("ID").map(|id| doc.resolve(id)).transpose()? {
            Some(PDFObject::Array(ids)) => ids
                .first()
                .and_then(|first| first.as_string().ok())
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let descriptor = EncryptionDescriptor::from_dict(&encrypt, document_id)?;

        if let Some(security) = Security::authenticate(&descriptor, b"") {
            info!(
                v = descriptor.v,
                revision = descriptor.revision,
                key_bits = descriptor.key_length_bits,
                "encrypted with restrictions only"
            );
            let security = Arc::new(security);
            doc.attach_security(Arc::clone(&security));
            return Ok(Self::RestrictionsOnly(security));
        }

        let Some(password) = password else {
            info!(revision = descriptor.revision, "open password required");
            return Ok(Self::RequiresKey {
                descriptor,
                security: None,
            });
        };
        match Security::authenticate(&descriptor, &password_bytes(password)) {
            Some(security) => {
                info!(
                    revision = descriptor.revision,
                    authenticated_as = ?security.authenticated_as(),
                    "open password accepted"
                );
                let security = Arc::new(security);
                doc.attach_security(Arc::clone(&security));
                Ok(Self::RequiresKey {
                    descriptor,
                    security: Some(security),
                })
            }
            None => Err(PdfError::IncorrectPassword),
        }
    }

    /// Handler to decrypt with, if the document is encrypted and open.
    pub fn security(&self) -> Option<&Arc<Security>> {
        match self {
            Self::NotEncrypted => None,
            Self::RestrictionsOnly(security) => Some(security),
            Self::RequiresKey { security, .. } => security.as_ref(),
        }
    }

    pub fn descriptor(&self) -> Option<&EncryptionDescriptor> {
        match self {
            Self::NotEncrypted => None,
            Self::RestrictionsOnly(security) => Some(security.descriptor()),
            Self::RequiresKey { descriptor, .. } => Some(descriptor),
        }
    }

    pub const fn is_encrypted(&self) -> bool {
        !matches!(self, Self::NotEncrypted)
    }

    /// Whether objects can be read: not encrypted, or a key is available.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::RequiresKey { security: None, .. })
    }

    /// Stable name of the classification.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotEncrypted => "not_encrypted",
            Self::RestrictionsOnly(_) => "restrictions_only",
            Self::RequiresKey { .. } => "requires_key",
        }
    }

    /// Decrypt a string of object `objid genno`; identity when unencrypted.
    pub fn decrypt_string(&self, objid: u32, genno: u16, bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::NotEncrypted => Ok(bytes.to_vec()),
            _ => self
                .security()
                .ok_or(PdfError::PasswordRequired)?
                .decrypt_string(objid, genno, bytes),
        }
    }

    /// Decrypt stream data of object `objid genno`; identity when unencrypted.
    pub fn decrypt_stream(
        &self,
        objid: u32,
        genno: u16,
        bytes: &[u8],
        attrs: &PDFDict,
    ) -> Result<Vec<u8>> {
        match self {
            Self::NotEncrypted => Ok(bytes.to_vec()),
            _ => self
                .security()
                .ok_or(PdfError::PasswordRequired)?
                .decrypt_stream(objid, genno, bytes, attrs),
        }
    }
}
