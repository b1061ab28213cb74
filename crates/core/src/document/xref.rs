//! Cross-reference tables.
//!
//! Loads classic `xref` tables, cross-reference streams and hybrid-reference
//! sections, follows the `/Prev` chain and merges everything into one index.
//! When the chain cannot be read the object headers in the file are scanned
//! instead.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use regex::bytes::Regex;
use tracing::debug;

use crate::codec::decode_stream;
use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObject};
use crate::parser::lexer::{Keyword, Lexer, Token, rfind_subslice};
use crate::parser::pdf_parser::PDFParser;

use super::raw::parse_indirect_at;

/// Location of an object in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Uncompressed object at a byte offset
    Direct { offset: usize, genno: u16 },
    /// Object stored inside an object stream
    Compressed { stream_objid: u32, index: usize },
}

impl XRefEntry {
    /// Generation number used for per-object keys.
    pub const fn genno(&self) -> u16 {
        match self {
            Self::Direct { genno, .. } => *genno,
            Self::Compressed { .. } => 0,
        }
    }
}

/// One xref section as found in the file. `None` marks a free entry.
#[derive(Debug, Default)]
pub struct XRefSection {
    pub entries: HashMap<u32, Option<XRefEntry>>,
    pub trailer: PDFDict,
}

/// Merged cross-reference index.
#[derive(Debug, Default)]
pub struct XRefTable {
    entries: BTreeMap<u32, XRefEntry>,
    trailer: PDFDict,
    is_fallback: bool,
}

impl XRefTable {
    pub fn get(&self, objid: u32) -> Option<XRefEntry> {
        self.entries.get(&objid).copied()
    }

    pub fn insert(&mut self, objid: u32, entry: XRefEntry) {
        self.entries.insert(objid, entry);
    }

    /// In-use object numbers, ascending
    pub fn objids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn trailer(&self) -> &PDFDict {
        &self.trailer
    }

    pub fn set_trailer(&mut self, trailer: PDFDict) {
        self.trailer = trailer;
    }

    pub const fn is_fallback(&self) -> bool {
        self.is_fallback
    }

    /// Merge sections given newest first.
    ///
    /// The newest section that mentions an object decides where it lives (or
    /// that it is free); each trailer key comes from the newest section that
    /// defines it.
    pub fn merge(sections: Vec<XRefSection>) -> Self {
        let mut slots: HashMap<u32, Option<XRefEntry>> = HashMap::new();
        let mut trailer = PDFDict::new();
        for section in sections {
            for (objid, entry) in section.entries {
                slots.entry(objid).or_insert(entry);
            }
            for (key, value) in section.trailer {
                trailer.entry(key).or_insert(value);
            }
        }
        trailer.shift_remove("Prev");
        trailer.shift_remove("XRefStm");

        let entries = slots
            .into_iter()
            .filter_map(|(objid, entry)| entry.map(|e| (objid, e)))
            .filter(|(objid, _)| *objid != 0)
            .collect();
        Self {
            entries,
            trailer,
            is_fallback: false,
        }
    }
}

/// Find the offset stored after the last `startxref`.
///
/// The last 1024 bytes are searched first, then the whole file.
pub fn find_startxref(data: &[u8]) -> Result<usize> {
    let needle = b"startxref";
    let tail_start = data.len().saturating_sub(1024);
    let keyword = rfind_subslice(&data[tail_start..], needle)
        .map(|i| tail_start + i)
        .or_else(|| rfind_subslice(data, needle))
        .ok_or_else(|| PdfError::SyntaxError("startxref not found".into()))?;

    let mut lexer = Lexer::new(data);
    lexer.set_pos(keyword + needle.len());
    match lexer.next_token() {
        Some(Ok((_, Token::Int(n)))) if n >= 0 && (n as usize) < data.len() => Ok(n as usize),
        _ => Err(PdfError::SyntaxError("invalid startxref offset".into())),
    }
}

/// Load every section reachable from `startxref`, newest first.
pub fn load_chain(data: &Bytes, startxref: usize) -> Result<Vec<XRefSection>> {
    let mut sections = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(startxref);

    while let Some(pos) = next {
        if !visited.insert(pos) {
            debug!(offset = pos, "xref chain loops back, stopping");
            break;
        }
        let section = load_section(data, pos)?;
        let int_key = |key: &str| {
            section
                .trailer
                .get(key)
                .and_then(|v| v.as_int().ok())
                .and_then(|n| usize::try_from(n).ok())
        };
        let xref_stm = int_key("XRefStm");
        next = int_key("Prev");
        debug!(
            offset = pos,
            entries = section.entries.len(),
            prev = ?next,
            "loaded xref section"
        );
        sections.push(section);

        // Hybrid-reference file: the stream supplements this section.
        if let Some(stm_pos) = xref_stm
            && visited.insert(stm_pos)
        {
            match load_stream(data, stm_pos) {
                Ok(mut stm) => {
                    stm.trailer.clear();
                    sections.push(stm);
                }
                Err(e) => debug!(offset = stm_pos, error = %e, "ignoring unreadable XRefStm"),
            }
        }
    }

    Ok(sections)
}

/// Load the section at `pos`, classic or stream.
pub fn load_section(data: &Bytes, pos: usize) -> Result<XRefSection> {
    let mut lexer = Lexer::new(data);
    lexer.set_pos(pos);
    match lexer.next_token() {
        Some(Ok((_, Token::Keyword(Keyword::Xref)))) => load_classic(data, pos),
        Some(Ok((_, Token::Int(_)))) => load_stream(data, pos),
        _ => Err(PdfError::SyntaxError(format!("no xref section at offset {pos}"))),
    }
}

/// Load a classic `xref` table and its trailer.
pub fn load_classic(data: &[u8], pos: usize) -> Result<XRefSection> {
    let mut section = XRefSection::default();
    let mut lexer = Lexer::new(data);
    lexer.set_pos(pos);

    let mut next = || -> Result<Token> {
        match lexer.next_token() {
            Some(Ok((_, tok))) => Ok(tok),
            Some(Err(e)) => Err(e),
            None => Err(PdfError::UnexpectedEof),
        }
    };

    if next()? != Token::Keyword(Keyword::Xref) {
        return Err(PdfError::SyntaxError("expected 'xref'".into()));
    }

    loop {
        let start = match next()? {
            Token::Keyword(Keyword::Trailer) => break,
            Token::Int(n) if n >= 0 => n as u64,
            other => {
                return Err(PdfError::SyntaxError(format!(
                    "unexpected token in xref table: {other:?}"
                )));
            }
        };
        let Token::Int(count) = next()? else {
            return Err(PdfError::SyntaxError("missing xref subsection count".into()));
        };

        let mut base = start;
        for i in 0..count.max(0) as u64 {
            let (Token::Int(offset), Token::Int(genno), Token::Keyword(Keyword::Other(marker))) =
                (next()?, next()?, next()?)
            else {
                return Err(PdfError::SyntaxError("malformed xref entry".into()));
            };

            // Some writers start a subsection at 1 but still emit the object 0
            // free entry; realign so it maps to object 0.
            if i == 0 && base > 0 && marker == b"f" && offset == 0 && genno == 65535 {
                base -= 1;
            }
            let Ok(objid) = u32::try_from(base + i) else {
                continue;
            };

            let entry = match marker.as_slice() {
                b"n" if offset > 0 => Some(XRefEntry::Direct {
                    offset: offset as usize,
                    genno: u16::try_from(genno).unwrap_or(0),
                }),
                b"n" | b"f" => None,
                _ => return Err(PdfError::SyntaxError("invalid xref entry marker".into())),
            };
            section.entries.insert(objid, entry);
        }
    }

    let mut parser = PDFParser::at(data, lexer.tell());
    section.trailer = parser.parse_object()?.as_dict()?.clone();
    Ok(section)
}

/// Load a cross-reference stream object at `pos`.
pub fn load_stream(data: &Bytes, pos: usize) -> Result<XRefSection> {
    let (_, obj) = parse_indirect_at(data, pos, &|len: &PDFObject| len.as_int().ok())?;
    let stream = obj.as_stream()?;
    if !stream.is_type("XRef") {
        return Err(PdfError::SyntaxError(format!(
            "object at offset {pos} is not an xref stream"
        )));
    }

    let widths: Vec<usize> = stream
        .get("W")
        .ok_or_else(|| PdfError::SyntaxError("missing W in xref stream".into()))?
        .as_array()?
        .iter()
        .map(|w| w.as_int().map(|n| n.max(0) as usize))
        .collect::<Result<_>>()?;
    let [w0, w1, w2] = widths[..] else {
        return Err(PdfError::SyntaxError("W must have 3 elements".into()));
    };
    let entry_size = w0 + w1 + w2;
    if entry_size == 0 {
        return Err(PdfError::SyntaxError("xref stream entries have zero width".into()));
    }

    let size = stream
        .get("Size")
        .ok_or_else(|| PdfError::SyntaxError("missing Size in xref stream".into()))?
        .as_int()?
        .max(0) as u64;

    // Index defaults to [0 Size]
    let index: Vec<(u64, u64)> = match stream.get("Index") {
        Some(idx) => idx
            .as_array()?
            .chunks_exact(2)
            .map(|pair| Ok((pair[0].as_int()?.max(0) as u64, pair[1].as_int()?.max(0) as u64)))
            .collect::<Result<_>>()?,
        None => vec![(0, size)],
    };

    let decoded = decode_stream(stream)?;
    let mut rows = decoded.chunks_exact(entry_size);
    let mut section = XRefSection::default();

    'outer: for (start, count) in index {
        for i in 0..count {
            let Some(row) = rows.next() else {
                break 'outer;
            };
            let Ok(objid) = u32::try_from(start + i) else {
                continue;
            };
            // Type defaults to 1 when its width is zero.
            let kind = if w0 > 0 { read_be(&row[..w0]) } else { 1 };
            let field1 = read_be(&row[w0..w0 + w1]);
            let field2 = read_be(&row[w0 + w1..]);

            let entry = match kind {
                0 => None,
                1 => Some(XRefEntry::Direct {
                    offset: field1 as usize,
                    genno: u16::try_from(field2).unwrap_or(0),
                }),
                2 => match u32::try_from(field1) {
                    Ok(stream_objid) => Some(XRefEntry::Compressed {
                        stream_objid,
                        index: field2 as usize,
                    }),
                    Err(_) => continue,
                },
                // Unknown types are references to the null object.
                _ => continue,
            };
            section.entries.insert(objid, entry);
        }
    }

    for (key, value) in &stream.attrs {
        if !matches!(
            key.as_str(),
            "Length" | "Filter" | "DecodeParms" | "W" | "Index" | "Type"
        ) {
            section.trailer.insert(key.clone(), value.clone());
        }
    }

    Ok(section)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Scan the whole file for `N G obj` headers.
///
/// Later occurrences of an object number win, matching how incremental
/// updates append new versions.
pub fn scan_objects(data: &[u8]) -> Result<XRefTable> {
    let re = Regex::new(r"(\d+)\s+(\d+)\s+obj\b")
        .map_err(|e| PdfError::SyntaxError(e.to_string()))?;

    let mut table = XRefTable {
        is_fallback: true,
        ..XRefTable::default()
    };
    for cap in re.captures_iter(data) {
        let (Some(whole), Some(id), Some(gen_)) = (cap.get(0), cap.get(1), cap.get(2)) else {
            continue;
        };
        // Skip matches glued to a preceding word, e.g. `a12 0 obj`.
        if whole.start() > 0 && data[whole.start() - 1].is_ascii_alphanumeric() {
            continue;
        }
        let parse = |b: &[u8]| std::str::from_utf8(b).ok().and_then(|s| s.parse::<u64>().ok());
        let (Some(objid), Some(genno)) = (parse(id.as_bytes()), parse(gen_.as_bytes())) else {
            continue;
        };
        let (Ok(objid), Ok(genno)) = (u32::try_from(objid), u16::try_from(genno)) else {
            continue;
        };
        table.entries.insert(
            objid,
            XRefEntry::Direct {
                offset: whole.start(),
                genno,
            },
        );
    }

    table.trailer = find_last_trailer(data).unwrap_or_default();
    Ok(table)
}

/// Parse the dictionary after the last readable `trailer` keyword.
pub fn find_last_trailer(data: &[u8]) -> Option<PDFDict> {
    let mut end = data.len();
    while let Some(pos) = rfind_subslice(&data[..end], b"trailer") {
        let mut parser = PDFParser::at(data, pos + b"trailer".len());
        if let Ok(PDFObject::Dict(dict)) = parser.parse_object() {
            return Some(dict);
        }
        end = pos;
    }
    None
}
