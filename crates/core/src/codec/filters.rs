//! Stream filter pipeline.
//!
//! Only the filters needed to read structural streams (xref streams, object
//! streams) and page content are decoded here: Flate and LZW (with
//! predictors), RunLength and the two ASCII encodings. Image codecs such as
//! `DCTDecode` never need decoding because stream data is copied verbatim.

use std::io::{Read, Write};

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use tracing::debug;
use weezl::{BitOrder, decode::Decoder};

use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObject, PDFStream};

/// Decode a stream's data through every filter in its `/Filter` entry.
///
/// The stream data must already be decrypted.
pub fn decode_stream(stream: &PDFStream) -> Result<Vec<u8>> {
    let filters = filter_names(stream.get("Filter"));
    let parms = decode_parms(stream.get("DecodeParms"), filters.len());
    let mut data = stream.get_rawdata().to_vec();

    for (idx, filter) in filters.iter().enumerate() {
        data = match filter.as_str() {
            "FlateDecode" | "Fl" => {
                let inflated = flate_decode(&data)?;
                match parms.get(idx).and_then(Option::as_ref) {
                    Some(p) => apply_predictor(inflated, p)?,
                    None => inflated,
                }
            }
            "LZWDecode" | "LZW" => {
                let p = parms.get(idx).and_then(Option::as_ref);
                let early_change = p
                    .and_then(|p| p.get("EarlyChange"))
                    .and_then(|v| v.as_int().ok())
                    .unwrap_or(1);
                let expanded = lzw_decode(&data, early_change != 0);
                match p {
                    Some(p) => apply_predictor(expanded, p)?,
                    None => expanded,
                }
            }
            "RunLengthDecode" | "RL" => run_length_decode(&data),
            "ASCIIHexDecode" | "AHx" => ascii_hex_decode(&data),
            "ASCII85Decode" | "A85" => ascii85_decode(&data)?,
            // Decryption already happened in the reader.
            "Crypt" => data,
            other => {
                return Err(PdfError::DecodeError(format!("unsupported filter: {other}")));
            }
        };
    }

    Ok(data)
}

fn filter_names(filter: Option<&PDFObject>) -> Vec<String> {
    match filter {
        Some(PDFObject::Name(name)) => vec![name.clone()],
        Some(PDFObject::Array(arr)) => arr
            .iter()
            .filter_map(|f| f.as_name().ok().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_parms(parms: Option<&PDFObject>, count: usize) -> Vec<Option<PDFDict>> {
    match parms {
        Some(PDFObject::Dict(d)) => {
            let mut out = vec![None; count.max(1)];
            out[0] = Some(d.clone());
            out
        }
        Some(PDFObject::Array(arr)) => arr.iter().map(|p| p.as_dict().ok().cloned()).collect(),
        _ => Vec::new(),
    }
}

/// Inflate zlib data.
///
/// Corrupted streams (bad checksum, truncated tail) yield the output produced
/// up to the point the decoder failed, as long as that output is non-empty.
pub fn flate_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    if decoder.read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    let partial = flate_decode_partial(data);
    if partial.is_empty() && !data.is_empty() {
        return Err(PdfError::DecodeError("invalid zlib data".into()));
    }
    Ok(partial)
}

fn flate_decode_partial(data: &[u8]) -> Vec<u8> {
    let mut decoder = Decompress::new(true);
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut buf = [0u8; 4096];
    let mut i = 0usize;
    while i < data.len() {
        let before_out = decoder.total_out();
        let before_in = decoder.total_in();
        let res = decoder.decompress(&data[i..i + 1], &mut buf, FlushDecompress::None);
        let produced = (decoder.total_out() - before_out) as usize;
        out.extend_from_slice(&buf[..produced]);
        let consumed = (decoder.total_in() - before_in) as usize;
        i += consumed.max(1);
        match res {
            Ok(Status::StreamEnd) | Err(_) => break,
            Ok(_) => {}
        }
    }
    out
}

/// Deflate data with zlib framing.
pub fn flate_encode(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn apply_predictor(data: Vec<u8>, parms: &PDFDict) -> Result<Vec<u8>> {
    let int = |key: &str, default: i64| {
        parms
            .get(key)
            .and_then(|v| v.as_int().ok())
            .unwrap_or(default)
    };
    let predictor = int("Predictor", 1);
    if predictor < 10 {
        // TIFF predictor 2 never appears on structural streams.
        return Ok(data);
    }
    let columns = int("Columns", 1).max(1) as usize;
    let colors = int("Colors", 1).max(1) as usize;
    let bits = int("BitsPerComponent", 8).max(1) as usize;
    png_unpredict(&data, columns, colors, bits)
}

/// Reverse PNG row prediction (predictor values 10 to 15).
pub fn png_unpredict(
    data: &[u8],
    columns: usize,
    colors: usize,
    bits_per_component: usize,
) -> Result<Vec<u8>> {
    let row_bytes = (colors * columns * bits_per_component).div_ceil(8);
    if row_bytes == 0 {
        return Err(PdfError::DecodeError("PNG predictor with empty rows".into()));
    }
    let bpp = (colors * bits_per_component / 8).max(1);
    let row_size = row_bytes + 1;

    let mut result = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_bytes];
    let mut current_row = vec![0u8; row_bytes];

    for row in data.chunks_exact(row_size) {
        let filter_type = row[0];
        let row_data = &row[1..];

        for i in 0..row_bytes {
            let left = if i >= bpp { current_row[i - bpp] } else { 0 };
            let above = prev_row[i];
            let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            let predicted = match filter_type {
                0 => 0,
                1 => left,
                2 => above,
                3 => ((left as u16 + above as u16) / 2) as u8,
                4 => paeth_predictor(left, above, upper_left),
                _ => 0,
            };
            current_row[i] = row_data[i].wrapping_add(predicted);
        }

        result.extend_from_slice(&current_row);
        std::mem::swap(&mut prev_row, &mut current_row);
    }

    Ok(result)
}

const fn paeth_predictor(left: u8, above: u8, upper_left: u8) -> u8 {
    let a = left as i32;
    let b = above as i32;
    let c = upper_left as i32;
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}

fn ascii_hex_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;
    for &c in data {
        if c == b'>' {
            break;
        }
        let Some(nibble) = (c as char).to_digit(16) else {
            continue;
        };
        match pending.take() {
            Some(high) => out.push((high << 4) | nibble as u8),
            None => pending = Some(nibble as u8),
        }
    }
    if let Some(high) = pending {
        out.push(high << 4);
    }
    out
}

/// Expand LZW data (MSB first, 8-bit). `early_change` is the PDF default
/// and matches TIFF's code size switching.
///
/// Corrupt input yields whatever was decoded before the error.
pub fn lzw_decode(data: &[u8], early_change: bool) -> Vec<u8> {
    let mut decoder = if early_change {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    } else {
        Decoder::new(BitOrder::Msb, 8)
    };
    let mut out = Vec::new();
    if let Err(e) = decoder.into_vec(&mut out).decode(data).status {
        debug!(error = %e, decoded = out.len(), "LZW data ends early");
    }
    out
}

/// Expand `RunLengthDecode` data; a truncated run ends the output.
pub fn run_length_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut rest = data;
    while let Some((&length, tail)) = rest.split_first() {
        match length {
            128 => break,
            0..=127 => {
                let count = usize::from(length) + 1;
                let take = count.min(tail.len());
                out.extend_from_slice(&tail[..take]);
                if take < count {
                    break;
                }
                rest = &tail[count..];
            }
            _ => {
                let Some((&byte, tail)) = tail.split_first() else {
                    break;
                };
                out.extend(std::iter::repeat_n(byte, 257 - usize::from(length)));
                rest = tail;
            }
        }
    }
    out
}

fn ascii85_decode(data: &[u8]) -> Result<Vec<u8>> {
    let data = data.strip_prefix(b"<~").unwrap_or(data);
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut n = 0;

    for &c in data {
        match c {
            b'~' => break,
            b'z' if n == 0 => out.extend_from_slice(&[0; 4]),
            b'!'..=b'u' => {
                group[n] = c - b'!';
                n += 1;
                if n == 5 {
                    let value = group.iter().fold(0u64, |acc, &d| acc * 85 + d as u64);
                    if value > u32::MAX as u64 {
                        return Err(PdfError::DecodeError("ASCII85 group overflow".into()));
                    }
                    out.extend_from_slice(&(value as u32).to_be_bytes());
                    n = 0;
                }
            }
            c if c.is_ascii_whitespace() || c == 0 => {}
            other => {
                return Err(PdfError::DecodeError(format!(
                    "invalid ASCII85 byte {other:#04x}"
                )));
            }
        }
    }

    if n > 1 {
        for slot in group.iter_mut().skip(n) {
            *slot = 84;
        }
        let value = group.iter().fold(0u64, |acc, &d| acc * 85 + d as u64);
        out.extend_from_slice(&(value as u32).to_be_bytes()[..n - 1]);
    }
    Ok(out)
}
