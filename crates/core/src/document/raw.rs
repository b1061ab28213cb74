//! Raw document: the parsed container before any decryption.
//!
//! Holds the input bytes, the merged cross-reference index and the trailer.
//! Objects are parsed lazily on first access and cached, so a
//! `RawDocument` can be shared read-only between threads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::decode_stream;
use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObjRef, PDFObject, PDFStream};
use crate::parser::lexer::{Keyword, Token, find_subslice, resync, stream_range, tokenize};
use crate::parser::pdf_parser::PDFParser;

use super::security::Security;
use super::xref::{XRefEntry, XRefTable, find_startxref, load_chain, scan_objects};

/// Header version used when `%PDF-x.y` is missing.
pub const DEFAULT_VERSION: &str = "1.7";

/// Decoded object stream: objects are parsed out of `data` on demand.
struct ObjectStream {
    data: Vec<u8>,
    first: usize,
    /// `(objid, relative offset)` pairs from the stream header
    offsets: Vec<(u32, usize)>,
}

impl ObjectStream {
    fn parse(data: Vec<u8>, n: usize, first: usize) -> Result<Self> {
        if first > data.len() {
            return Err(PdfError::SyntaxError(format!(
                "ObjStm First {first} beyond data length {}",
                data.len()
            )));
        }
        let mut header = PDFParser::new(&data[..first]);
        // Each header pair takes at least two bytes; /N is untrusted.
        let mut offsets = Vec::with_capacity(n.min(first / 2));
        for _ in 0..n {
            let objid = header.parse_object()?.as_int()?;
            let offset = header.parse_object()?.as_int()?;
            let (Ok(objid), Ok(offset)) = (u32::try_from(objid), usize::try_from(offset)) else {
                return Err(PdfError::SyntaxError("negative ObjStm header entry".into()));
            };
            offsets.push((objid, offset));
        }
        Ok(Self {
            data,
            first,
            offsets,
        })
    }

    fn get(&self, objid: u32, index: usize) -> Result<PDFObject> {
        // The xref index is authoritative unless it points at another object.
        let offset = match self.offsets.get(index) {
            Some(&(id, off)) if id == objid => off,
            _ => self
                .offsets
                .iter()
                .find(|(id, _)| *id == objid)
                .map(|&(_, off)| off)
                .ok_or_else(|| {
                    PdfError::SyntaxError(format!("object {objid} not in object stream"))
                })?,
        };
        let pos = self
            .first
            .checked_add(offset)
            .filter(|&pos| pos < self.data.len())
            .ok_or_else(|| {
                PdfError::SyntaxError(format!("object {objid} offset {offset} outside object stream"))
            })?;
        PDFParser::at(&self.data, pos).parse_object()
    }
}

/// Parse the indirect object `N G obj ...` at `offset`.
///
/// `resolve_len` turns a `/Length` value (possibly a reference) into an
/// integer; when it cannot, the stream extent is found by scanning for
/// `endstream`.
pub fn parse_indirect_at(
    data: &Bytes,
    offset: usize,
    resolve_len: &dyn Fn(&PDFObject) -> Option<i64>,
) -> Result<(PDFObjRef, PDFObject)> {
    if offset >= data.len() {
        return Err(PdfError::SyntaxError(format!(
            "object offset {offset} exceeds file size {}",
            data.len()
        )));
    }
    let mut parser = PDFParser::at(data, offset);
    let objref = parser.parse_indirect_header()?;
    let obj = parser.parse_object()?;

    let dict = match obj {
        PDFObject::Dict(dict) => dict,
        other => return Ok((objref, other)),
    };
    match tokenize(data, parser.tell()) {
        Ok(Some((Token::Keyword(Keyword::Stream), after))) => {
            let declared = dict
                .get("Length")
                .and_then(resolve_len)
                .and_then(|n| usize::try_from(n).ok());
            let range = stream_range(data, after, declared);
            let stream = PDFStream::new(dict, data.slice(range));
            Ok((objref, PDFObject::Stream(Box::new(stream))))
        }
        _ => Ok((objref, PDFObject::Dict(dict))),
    }
}

/// Parsed container with lazy object access.
pub struct RawDocument {
    data: Bytes,
    version: String,
    xref: XRefTable,
    cache: Mutex<HashMap<u32, Arc<PDFObject>>>,
    objstms: Mutex<HashMap<u32, Arc<ObjectStream>>>,
    scan_index: OnceLock<HashMap<u32, usize>>,
    security: OnceLock<Arc<Security>>,
}

impl std::fmt::Debug for RawDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawDocument")
            .field("len", &self.data.len())
            .field("version", &self.version)
            .field("objects", &self.xref.len())
            .field("is_fallback", &self.xref.is_fallback())
            .finish()
    }
}

impl RawDocument {
    /// Parse a container: header version, cross-reference index, trailer.
    ///
    /// Falls back to scanning object headers when the xref chain is
    /// unreadable or does not name a `/Root`.
    pub fn parse(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.is_empty() {
            return Err(PdfError::UnreadableContainer("empty input".into()));
        }
        let version = read_version(&data);

        let primary = find_startxref(&data)
            .and_then(|pos| load_chain(&data, pos))
            .map(XRefTable::merge);
        let xref = match primary {
            Ok(table) if !table.is_empty() && table.trailer().contains_key("Root") => table,
            primary => {
                match &primary {
                    Ok(_) => warn!("xref chain has no usable /Root, scanning objects"),
                    Err(e) => warn!(error = %e, "xref chain unreadable, scanning objects"),
                }
                let scanned = scan_objects(&data)?;
                match primary {
                    _ if !scanned.is_empty() => scanned,
                    Ok(table) if !table.is_empty() => table,
                    _ => {
                        return Err(PdfError::UnreadableContainer(
                            "no objects found in container".into(),
                        ));
                    }
                }
            }
        };

        let mut doc = Self {
            data,
            version,
            xref,
            cache: Mutex::new(HashMap::new()),
            objstms: Mutex::new(HashMap::new()),
            scan_index: OnceLock::new(),
            security: OnceLock::new(),
        };
        if doc.xref.is_fallback() {
            doc.complete_fallback();
        }
        debug!(
            version = %doc.version,
            objects = doc.xref.len(),
            fallback = doc.xref.is_fallback(),
            "parsed container"
        );
        Ok(doc)
    }

    /// Finish a scanned index: register objects living in object streams
    /// and find a root when no trailer names one.
    fn complete_fallback(&mut self) {
        let objids: Vec<u32> = self.xref.objids().collect();

        // Compressed objects are only reachable when the streams are
        // readable without a key.
        if !self.xref.trailer().contains_key("Encrypt") {
            for &objid in &objids {
                let Ok(Some(obj)) = self.get_raw(objid) else {
                    continue;
                };
                if !matches!(&*obj, PDFObject::Stream(s) if s.is_type("ObjStm")) {
                    continue;
                }
                let Ok(objstm) = self.object_stream(objid) else {
                    continue;
                };
                for (index, &(member, _)) in objstm.offsets.iter().enumerate() {
                    if self.xref.get(member).is_none() {
                        self.xref.insert(
                            member,
                            XRefEntry::Compressed {
                                stream_objid: objid,
                                index,
                            },
                        );
                    }
                }
            }
        }

        if self.xref.trailer().contains_key("Root") {
            return;
        }

        // Prefer the newest xref stream dictionary, then a catalog object.
        let mut xref_stream: Option<(usize, PDFDict)> = None;
        let mut catalog: Option<u32> = None;
        for objid in self.xref.objids().collect::<Vec<_>>() {
            let Ok(Some(obj)) = self.get_raw(objid) else {
                continue;
            };
            match &*obj {
                PDFObject::Stream(s) if s.is_type("XRef") && s.get("Root").is_some() => {
                    let offset = match self.xref.get(objid) {
                        Some(XRefEntry::Direct { offset, .. }) => offset,
                        _ => 0,
                    };
                    if xref_stream.as_ref().is_none_or(|(best, _)| offset > *best) {
                        xref_stream = Some((offset, s.attrs.clone()));
                    }
                }
                PDFObject::Dict(d) if d.get("Type").is_some_and(|t| t.is_name("Catalog")) => {
                    catalog = Some(objid);
                }
                _ => {}
            }
        }

        let mut trailer = self.xref.trailer().clone();
        if let Some((_, attrs)) = xref_stream {
            for (key, value) in attrs {
                if !matches!(
                    key.as_str(),
                    "Length" | "Filter" | "DecodeParms" | "W" | "Index" | "Type" | "Prev"
                ) {
                    trailer.entry(key).or_insert(value);
                }
            }
        } else if let Some(objid) = catalog {
            let genno = self.genno(objid);
            trailer.insert("Root".into(), PDFObject::Ref(PDFObjRef::new(objid, genno)));
        }
        if trailer.contains_key("Root") {
            debug!("recovered /Root from scanned objects");
        }
        self.xref.set_trailer(trailer);
    }

    /// Input bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Header version, e.g. `1.7`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Merged trailer dictionary.
    pub const fn trailer(&self) -> &PDFDict {
        self.xref.trailer()
    }

    /// Whether the index was rebuilt by scanning object headers.
    pub const fn is_fallback(&self) -> bool {
        self.xref.is_fallback()
    }

    /// Where an object lives, if the index knows it.
    pub fn locate(&self, objid: u32) -> Option<XRefEntry> {
        self.xref.get(objid)
    }

    /// Generation number for an object (0 when unknown or compressed).
    pub fn genno(&self, objid: u32) -> u16 {
        self.locate(objid).map_or(0, |e| e.genno())
    }

    /// In-use object numbers, ascending.
    pub fn objids(&self) -> Vec<u32> {
        self.xref.objids().collect()
    }

    /// Number of indexed objects.
    pub fn len(&self) -> usize {
        self.xref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xref.is_empty()
    }

    /// Make the security handler available for object stream decryption.
    ///
    /// Objects already loaded from object streams are dropped so they are
    /// re-read through the handler.
    pub fn attach_security(&self, security: Arc<Security>) {
        if self.security.set(security).is_ok() {
            if let Ok(mut objstms) = self.objstms.lock() {
                objstms.clear();
            }
            if let Ok(mut cache) = self.cache.lock() {
                cache.retain(|objid, _| {
                    !matches!(self.xref.get(*objid), Some(XRefEntry::Compressed { .. }))
                });
            }
        }
    }

    /// Get an object by number as stored in the file.
    ///
    /// Uncompressed objects come back undecrypted. Objects from object
    /// streams are plain already, since the containing stream is decrypted
    /// as a whole. Returns `Ok(None)` for objects the index does not know.
    pub fn get_raw(&self, objid: u32) -> Result<Option<Arc<PDFObject>>> {
        if let Ok(cache) = self.cache.lock()
            && let Some(obj) = cache.get(&objid)
        {
            return Ok(Some(Arc::clone(obj)));
        }

        let Some(entry) = self.xref.get(objid) else {
            return Ok(None);
        };
        let obj = match entry {
            XRefEntry::Direct { offset, .. } => self.load_direct(objid, offset)?,
            XRefEntry::Compressed {
                stream_objid,
                index,
            } => self.object_stream(stream_objid)?.get(objid, index)?,
        };

        let obj = Arc::new(obj);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(objid, Arc::clone(&obj));
        }
        Ok(Some(obj))
    }

    /// Follow references (raw, undecrypted) until a direct value.
    ///
    /// Unresolvable references yield `Null`.
    pub fn resolve(&self, obj: &PDFObject) -> Result<PDFObject> {
        let mut current = obj.clone();
        // Bounded so that `1 0 obj 1 0 R endobj` cannot loop forever.
        for _ in 0..32 {
            let PDFObject::Ref(r) = current else {
                return Ok(current);
            };
            current = match self.get_raw(r.objid)? {
                Some(obj) => (*obj).clone(),
                None => return Ok(PDFObject::Null),
            };
        }
        Ok(PDFObject::Null)
    }

    fn load_direct(&self, objid: u32, offset: usize) -> Result<PDFObject> {
        let resolve_len = |len: &PDFObject| self.resolve_length(len);
        let first_error = match parse_indirect_at(&self.data, offset, &resolve_len) {
            Ok((objref, obj)) if objref.objid == objid => return Ok(obj),
            Ok((objref, _)) => PdfError::SyntaxError(format!(
                "expected object {objid} at offset {offset}, found {}",
                objref.objid
            )),
            Err(e) => e,
        };

        // Stale offsets are common in edited files; look the header up,
        // first just ahead of the offset, then anywhere in the file.
        if let Some((pos, found, _)) = resync(&self.data, offset)
            && found == objid
            && pos != offset
            && let Ok((_, obj)) = parse_indirect_at(&self.data, pos, &resolve_len)
        {
            debug!(objid, offset, pos, "object header found after its xref offset");
            return Ok(obj);
        }
        let index = self.scan_index.get_or_init(|| build_scan_index(&self.data));
        match index.get(&objid) {
            Some(&pos) if pos != offset => {
                warn!(objid, "object not at its xref offset, using scanned location");
                parse_indirect_at(&self.data, pos, &resolve_len).map(|(_, obj)| obj)
            }
            _ => Err(first_error),
        }
    }

    /// Resolve a `/Length` value without parsing stream data.
    fn resolve_length(&self, len: &PDFObject) -> Option<i64> {
        match len {
            PDFObject::Int(n) => Some(*n),
            PDFObject::Ref(r) => {
                if let Ok(cache) = self.cache.lock()
                    && let Some(obj) = cache.get(&r.objid)
                {
                    return obj.as_int().ok();
                }
                let Some(XRefEntry::Direct { offset, .. }) = self.xref.get(r.objid) else {
                    return None;
                };
                let mut parser = PDFParser::at(&self.data, offset);
                parser.parse_indirect_header().ok()?;
                parser.parse_object().ok()?.as_int().ok()
            }
            _ => None,
        }
    }

    fn object_stream(&self, stream_objid: u32) -> Result<Arc<ObjectStream>> {
        if let Ok(objstms) = self.objstms.lock()
            && let Some(objstm) = objstms.get(&stream_objid)
        {
            return Ok(Arc::clone(objstm));
        }

        let Some(XRefEntry::Direct { genno, .. }) = self.xref.get(stream_objid) else {
            return Err(PdfError::SyntaxError(format!(
                "object stream {stream_objid} is not an uncompressed object"
            )));
        };
        let obj = self.get_raw(stream_objid)?.ok_or_else(|| {
            PdfError::SyntaxError(format!("object stream {stream_objid} not found"))
        })?;
        let stream = obj.as_stream()?;

        let data = match self.security.get() {
            Some(security) => {
                let plain = security.decrypt_stream(
                    stream_objid,
                    genno,
                    stream.get_rawdata(),
                    &stream.attrs,
                )?;
                decode_stream(&PDFStream::new(stream.attrs.clone(), plain))?
            }
            None => decode_stream(stream)?,
        };

        let int = |key: &str| -> Result<usize> {
            let value = stream
                .get(key)
                .ok_or_else(|| PdfError::SyntaxError(format!("missing {key} in ObjStm")))?
                .as_int()?;
            usize::try_from(value).map_err(|_| PdfError::SyntaxError(format!("negative {key}")))
        };
        let objstm = Arc::new(ObjectStream::parse(data, int("N")?, int("First")?)?);
        if let Ok(mut objstms) = self.objstms.lock() {
            objstms.insert(stream_objid, Arc::clone(&objstm));
        }
        Ok(objstm)
    }
}

fn read_version(data: &[u8]) -> String {
    let head = &data[..data.len().min(1024)];
    let Some(pos) = find_subslice(head, b"%PDF-") else {
        return DEFAULT_VERSION.to_string();
    };
    let version: String = head[pos + 5..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| b as char)
        .collect();
    let valid = version
        .split_once('.')
        .is_some_and(|(major, minor)| !major.is_empty() && !minor.is_empty());
    if valid {
        version
    } else {
        DEFAULT_VERSION.to_string()
    }
}

fn build_scan_index(data: &[u8]) -> HashMap<u32, usize> {
    let Ok(table) = scan_objects(data) else {
        return HashMap::new();
    };
    table
        .objids()
        .filter_map(|objid| match table.get(objid) {
            Some(XRefEntry::Direct { offset, .. }) => Some((objid, offset)),
            _ => None,
        })
        .collect()
}
