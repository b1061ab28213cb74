//! PDF writer for [`NewDocument`].
//!
//! Output is deterministic: objects in ascending order, one classic xref
//! table covering `0..=max`, and a trailer without `/Encrypt`.

use crate::model::objects::{PDFDict, PDFObject, PDFStream};
use crate::rebuild::NewDocument;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Serialize `doc` into a complete PDF file.
pub fn serialize(doc: &NewDocument) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("%PDF-{}\n", doc.version).as_bytes());
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let size = doc.objects.keys().next_back().map_or(1, |max| max + 1);
    let mut offsets: Vec<Option<usize>> = vec![None; size as usize];
    for (&objid, obj) in &doc.objects {
        offsets[objid as usize] = Some(out.len());
        out.extend_from_slice(format!("{objid} 0 obj\n").as_bytes());
        match obj {
            PDFObject::Stream(stream) => write_stream(&mut out, stream),
            other => write_object(&mut out, other),
        }
        out.extend_from_slice(b"\nendobj\n");
    }

    let startxref = out.len();
    out.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
    for (objid, offset) in offsets.iter().enumerate() {
        let entry = match offset {
            Some(offset) => format!("{offset:010} 00000 n \n"),
            None if objid == 0 => "0000000000 65535 f \n".to_string(),
            None => "0000000000 00000 f \n".to_string(),
        };
        out.extend_from_slice(entry.as_bytes());
    }

    out.extend_from_slice(format!("trailer\n<< /Size {size} /Root {} 0 R", doc.root.objid).as_bytes());
    if let Some(info) = doc.info {
        out.extend_from_slice(format!(" /Info {} 0 R", info.objid).as_bytes());
    }
    if let Some(id) = &doc.id {
        out.extend_from_slice(b" /ID [");
        write_hex_string(&mut out, id);
        out.push(b' ');
        write_hex_string(&mut out, id);
        out.push(b']');
    }
    out.extend_from_slice(format!(" >>\nstartxref\n{startxref}\n%%EOF\n").as_bytes());
    out
}

fn write_stream(out: &mut Vec<u8>, stream: &PDFStream) {
    let data = stream.get_rawdata();
    let mut attrs = stream.attrs.clone();
    attrs.insert("Length".into(), PDFObject::Int(data.len() as i64));
    write_dict(out, &attrs);
    out.extend_from_slice(b"\nstream\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream");
}

/// Write a direct object. Streams cannot be nested and become `null`.
pub fn write_object(out: &mut Vec<u8>, obj: &PDFObject) {
    match obj {
        PDFObject::Null | PDFObject::Stream(_) => out.extend_from_slice(b"null"),
        PDFObject::Bool(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        PDFObject::Int(n) => out.extend_from_slice(n.to_string().as_bytes()),
        PDFObject::Real(n) => out.extend_from_slice(format_real(*n).as_bytes()),
        PDFObject::Name(name) => write_name(out, name),
        PDFObject::String(s) => {
            if is_printable(s) {
                write_literal_string(out, s);
            } else {
                write_hex_string(out, s);
            }
        }
        PDFObject::Array(arr) => {
            out.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item);
            }
            out.push(b']');
        }
        PDFObject::Dict(dict) => write_dict(out, dict),
        PDFObject::Ref(r) => out.extend_from_slice(format!("{} {} R", r.objid, r.genno).as_bytes()),
    }
}

fn write_dict(out: &mut Vec<u8>, dict: &PDFDict) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict {
        out.push(b' ');
        write_name(out, key);
        out.push(b' ');
        write_object(out, value);
    }
    out.extend_from_slice(b" >>");
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for c in name.chars() {
        // Names hold one char per source byte.
        let b = u32::from(c).min(0xFF) as u8;
        let escape = !(0x21..=0x7E).contains(&b) || b"#()<>[]{}/%".contains(&b);
        if escape {
            out.push(b'#');
            out.push(HEX_DIGITS[usize::from(b >> 4)]);
            out.push(HEX_DIGITS[usize::from(b & 0x0F)]);
        } else {
            out.push(b);
        }
    }
}

fn is_printable(s: &[u8]) -> bool {
    s.iter()
        .all(|&b| (0x20..=0x7E).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t'))
}

fn write_literal_string(out: &mut Vec<u8>, s: &[u8]) {
    out.push(b'(');
    for &b in s {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            _ => out.push(b),
        }
    }
    out.push(b')');
}

fn write_hex_string(out: &mut Vec<u8>, s: &[u8]) {
    out.push(b'<');
    for &b in s {
        out.push(HEX_DIGITS[usize::from(b >> 4)]);
        out.push(HEX_DIGITS[usize::from(b & 0x0F)]);
    }
    out.push(b'>');
}

/// Shortest plain decimal that reads back as the same value.
pub fn format_real(n: f64) -> String {
    if !n.is_finite() || n == 0.0 {
        return "0".to_string();
    }
    // f64's Display never uses an exponent.
    format!("{n}")
}
