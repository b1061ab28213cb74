//! Decrypting read access to a [`RawDocument`].

use tracing::debug;

use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObject, PDFStream};

use super::raw::RawDocument;
use super::security::{EncryptionState, Security};
use super::xref::XRefEntry;

/// Reads objects from a raw document, decrypting strings and stream data
/// with the resolved encryption state.
pub struct SourceReader<'a> {
    raw: &'a RawDocument,
    security: Option<&'a Security>,
    /// The encryption dictionary itself is never encrypted.
    encrypt_objid: Option<u32>,
}

impl<'a> SourceReader<'a> {
    /// Fails with [`PdfError::PasswordRequired`] when the document needs a
    /// key that was not supplied.
    pub fn new(raw: &'a RawDocument, state: &'a EncryptionState) -> Result<Self> {
        if !state.is_open() {
            return Err(PdfError::PasswordRequired);
        }
        let encrypt_objid = match raw.trailer().get("Encrypt") {
            Some(PDFObject::Ref(r)) => Some(r.objid),
            _ => None,
        };
        Ok(Self {
            raw,
            security: state.security().map(|s| s.as_ref()),
            encrypt_objid,
        })
    }

    pub const fn raw(&self) -> &'a RawDocument {
        self.raw
    }

    /// Whether `objid` names an object in the document.
    pub fn exists(&self, objid: u32) -> bool {
        self.raw.locate(objid).is_some()
    }

    /// Fetch and decrypt object `objid`. `Ok(None)` when it does not exist.
    pub fn fetch(&self, objid: u32) -> Result<Option<PDFObject>> {
        let Some(obj) = self.raw.get_raw(objid)? else {
            return Ok(None);
        };
        let security = match (self.security, self.raw.locate(objid)) {
            // Compressed objects were decrypted with their object stream.
            (Some(security), Some(XRefEntry::Direct { genno, .. }))
                if self.encrypt_objid != Some(objid) =>
            {
                Some((security, genno))
            }
            _ => None,
        };
        match security {
            Some((security, genno)) => decrypt_object(security, &obj, objid, genno).map(Some),
            None => Ok(Some((*obj).clone())),
        }
    }

    /// Follow references until a direct value; dangling ones give `Null`.
    pub fn resolve(&self, obj: &PDFObject) -> Result<PDFObject> {
        let mut current = obj.clone();
        for _ in 0..32 {
            let PDFObject::Ref(r) = current else {
                return Ok(current);
            };
            current = match self.fetch(r.objid)? {
                Some(obj) => obj,
                None => {
                    debug!(objid = r.objid, "dangling reference");
                    return Ok(PDFObject::Null);
                }
            };
        }
        Ok(PDFObject::Null)
    }

    /// Resolve `obj` to a dictionary, or `None` for anything else.
    pub fn resolve_dict(&self, obj: &PDFObject) -> Result<Option<PDFDict>> {
        Ok(match self.resolve(obj)? {
            PDFObject::Dict(d) => Some(d),
            PDFObject::Stream(s) => Some(s.attrs),
            _ => None,
        })
    }
}

/// Decrypt every string and stream inside a direct object.
fn decrypt_object(
    security: &Security,
    obj: &PDFObject,
    objid: u32,
    genno: u16,
) -> Result<PDFObject> {
    Ok(match obj {
        PDFObject::String(s) => PDFObject::String(security.decrypt_string(objid, genno, s)?),
        PDFObject::Array(arr) => PDFObject::Array(
            arr.iter()
                .map(|o| decrypt_object(security, o, objid, genno))
                .collect::<Result<_>>()?,
        ),
        PDFObject::Dict(dict) => PDFObject::Dict(decrypt_dict(security, dict, objid, genno)?),
        PDFObject::Stream(stream) => {
            let attrs = decrypt_dict(security, &stream.attrs, objid, genno)?;
            let data =
                security.decrypt_stream(objid, genno, stream.get_rawdata(), &stream.attrs)?;
            PDFObject::Stream(Box::new(PDFStream::new(attrs, data)))
        }
        other => other.clone(),
    })
}

fn decrypt_dict(security: &Security, dict: &PDFDict, objid: u32, genno: u16) -> Result<PDFDict> {
    dict.iter()
        .map(|(k, v)| Ok((k.clone(), decrypt_object(security, v, objid, genno)?)))
        .collect()
}
