//! PDF tokenizer.
//!
//! Turns raw container bytes into atomic tokens. The lexer is stateless
//! beyond its cursor: `tokenize(data, pos)` always yields the same token and
//! next offset for the same input.

use std::ops::Range;

use crate::error::{PdfError, Result};
use crate::model::objects::name_from_bytes;

/// Structural keywords of the container syntax.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Keyword {
    Obj,
    EndObj,
    Stream,
    EndStream,
    Xref,
    Trailer,
    StartXref,
    R,
    True,
    False,
    Null,
    /// Any other bare word (content stream operators, `f`/`n` xref markers).
    Other(Vec<u8>),
}

impl Keyword {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"obj" => Self::Obj,
            b"endobj" => Self::EndObj,
            b"stream" => Self::Stream,
            b"endstream" => Self::EndStream,
            b"xref" => Self::Xref,
            b"trailer" => Self::Trailer,
            b"startxref" => Self::StartXref,
            b"R" => Self::R,
            b"true" => Self::True,
            b"false" => Self::False,
            b"null" => Self::Null,
            _ => Self::Other(b.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Obj => b"obj",
            Self::EndObj => b"endobj",
            Self::Stream => b"stream",
            Self::EndStream => b"endstream",
            Self::Xref => b"xref",
            Self::Trailer => b"trailer",
            Self::StartXref => b"startxref",
            Self::R => b"R",
            Self::True => b"true",
            Self::False => b"false",
            Self::Null => b"null",
            Self::Other(bytes) => bytes,
        }
    }
}

/// Lexical token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Real(f64),
    /// Literal string `( ... )`, escapes resolved
    String(Vec<u8>),
    /// Hex string `< ... >`, decoded
    HexString(Vec<u8>),
    /// Name `/Name`, `#xx` escapes resolved
    Name(String),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    Keyword(Keyword),
}

/// Check if byte is PDF whitespace
pub const fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x00' | b'\x0c')
}

/// Check if byte is a PDF delimiter
pub const fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Lex one token starting at `start`.
///
/// Returns `Ok(None)` at end of input, otherwise the token and the offset
/// just past it.
pub fn tokenize(data: &[u8], start: usize) -> Result<Option<(Token, usize)>> {
    let mut lexer = Lexer::new(data);
    lexer.set_pos(start);
    match lexer.next_token() {
        Some(Ok((_, token))) => Ok(Some((token, lexer.tell()))),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

/// Cursor-based tokenizer over a byte slice.
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position in the input
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Move the cursor.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Underlying input.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Get remaining unparsed data
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn malformed(&self, pos: usize, msg: impl Into<String>) -> PdfError {
        PdfError::MalformedToken {
            pos,
            msg: msg.into(),
        }
    }

    /// Skip whitespace and comments
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'%' {
                while let Some(c) = self.peek() {
                    if c == b'\r' || c == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            if !is_whitespace(b) {
                return;
            }
            self.pos += 1;
        }
    }

    /// Get next token with its start position.
    pub fn next_token(&mut self) -> Option<Result<(usize, Token)>> {
        self.skip_whitespace();
        let start = self.pos;
        let b = self.peek()?;

        let result = match b {
            b'/' => Ok(self.lex_name()),
            b'(' => self.lex_string(),
            b'<' if self.peek_at(1) == Some(b'<') => {
                self.pos += 2;
                Ok(Token::DictStart)
            }
            b'<' => self.lex_hex_string(),
            b'>' if self.peek_at(1) == Some(b'>') => {
                self.pos += 2;
                Ok(Token::DictEnd)
            }
            b'>' | b')' => {
                self.pos += 1;
                Err(self.malformed(start, format!("unexpected '{}'", b as char)))
            }
            b'[' => {
                self.pos += 1;
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.pos += 1;
                Ok(Token::ArrayEnd)
            }
            b'{' | b'}' => {
                self.pos += 1;
                Ok(Token::Keyword(Keyword::Other(vec![b])))
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.lex_number_or_keyword(),
            _ => Ok(self.lex_keyword()),
        };

        Some(result.map(|token| (start, token)))
    }

    fn lex_name(&mut self) -> Token {
        self.pos += 1; // '/'
        let mut name = Vec::new();
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.pos += 1;
            if b == b'#'
                && let (Some(h), Some(l)) = (self.peek(), self.peek_at(1))
                && let (Some(h), Some(l)) = (hex_value(h), hex_value(l))
            {
                self.pos += 2;
                name.push((h << 4) | l);
                continue;
            }
            name.push(b);
        }
        Token::Name(name_from_bytes(&name))
    }

    fn lex_number_or_keyword(&mut self) -> Result<Token> {
        let start = self.pos;
        let mut end = self.pos;
        while end < self.data.len() && !is_whitespace(self.data[end]) && !is_delimiter(self.data[end])
        {
            end += 1;
        }
        let word = &self.data[start..end];
        let numeric = word
            .iter()
            .enumerate()
            .all(|(i, &c)| c.is_ascii_digit() || c == b'.' || (i == 0 && (c == b'+' || c == b'-')));
        if !numeric {
            return Ok(self.lex_keyword());
        }
        self.pos = end;

        // `std::str::from_utf8` cannot fail: the word is ASCII.
        let text = std::str::from_utf8(word).unwrap_or_default();
        let digits = text.trim_start_matches(['+', '-']);
        if digits.matches('.').count() > 1 {
            return Err(self.malformed(start, format!("invalid number: {text}")));
        }
        if digits.is_empty() || digits == "." {
            // Lone sign or dot: readers treat these as zero.
            return Ok(Token::Int(0));
        }
        if text.contains('.') {
            let normalized = if digits.starts_with('.') {
                text.replacen('.', "0.", 1)
            } else {
                text.to_string()
            };
            normalized
                .parse::<f64>()
                .map(Token::Real)
                .map_err(|_| self.malformed(start, format!("invalid real: {text}")))
        } else {
            match text.parse::<i64>() {
                Ok(v) => Ok(Token::Int(v)),
                // Overlong integers are legal syntax; readers keep them as reals.
                Err(_) => text
                    .parse::<f64>()
                    .map(Token::Real)
                    .map_err(|_| self.malformed(start, format!("invalid int: {text}"))),
            }
        }
    }

    fn lex_string(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1; // '('
        let mut result = Vec::new();
        let mut depth = 1usize;

        loop {
            let Some(c) = self.advance() else {
                return Err(self.malformed(start, "unterminated literal string"));
            };
            match c {
                b'(' => {
                    depth += 1;
                    result.push(c);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    result.push(c);
                }
                b'\\' => {
                    let Some(e) = self.advance() else {
                        return Err(self.malformed(start, "unterminated escape"));
                    };
                    match e {
                        b'n' => result.push(b'\n'),
                        b'r' => result.push(b'\r'),
                        b't' => result.push(b'\t'),
                        b'b' => result.push(0x08),
                        b'f' => result.push(0x0c),
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut octal = (e - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        self.pos += 1;
                                        octal = octal * 8 + (d - b'0') as u32;
                                    }
                                    _ => break,
                                }
                            }
                            result.push((octal & 0xFF) as u8);
                        }
                        other => result.push(other),
                    }
                }
                other => result.push(other),
            }
        }

        Ok(Token::String(result))
    }

    fn lex_hex_string(&mut self) -> Result<Token> {
        let start = self.pos;
        self.pos += 1; // '<'
        let mut result = Vec::new();
        let mut pending: Option<u8> = None;

        loop {
            let Some(c) = self.advance() else {
                return Err(self.malformed(start, "unterminated hex string"));
            };
            if c == b'>' {
                break;
            }
            if is_whitespace(c) {
                continue;
            }
            let Some(nibble) = hex_value(c) else {
                return Err(self.malformed(self.pos - 1, "invalid character in hex string"));
            };
            match pending.take() {
                Some(high) => result.push((high << 4) | nibble),
                None => pending = Some(nibble),
            }
        }

        if let Some(high) = pending {
            result.push(high << 4);
        }
        Ok(Token::HexString(result))
    }

    fn lex_keyword(&mut self) -> Token {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        Token::Keyword(Keyword::from_bytes(&self.data[start..self.pos]))
    }
}

const fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Compute the byte range of raw stream data.
///
/// `after_keyword` is the offset just past the `stream` keyword. The declared
/// `/Length` is trusted when the data it spans is followed by `endstream`;
/// otherwise the range ends at the next `endstream` (minus its EOL).
pub fn stream_range(data: &[u8], after_keyword: usize, declared_len: Option<usize>) -> Range<usize> {
    let mut start = after_keyword.min(data.len());
    if data.get(start) == Some(&b'\r') {
        start += 1;
    }
    if data.get(start) == Some(&b'\n') {
        start += 1;
    }

    if let Some(len) = declared_len
        && let Some(end) = start.checked_add(len)
        && end <= data.len()
    {
        let mut probe = end;
        while probe < data.len() && is_whitespace(data[probe]) {
            probe += 1;
        }
        if data[probe..].starts_with(b"endstream") {
            return start..end;
        }
    }

    match find_subslice(&data[start..], b"endstream") {
        Some(rel) => {
            let mut end = start + rel;
            if end > start && data[end - 1] == b'\n' {
                end -= 1;
            }
            if end > start && data[end - 1] == b'\r' {
                end -= 1;
            }
            start..end
        }
        None => start..data.len(),
    }
}

/// Scan forward from `from` for the next `N G obj` header.
///
/// Returns the header offset with its object and generation numbers.
pub fn resync(data: &[u8], from: usize) -> Option<(usize, u32, u16)> {
    let mut search = from.min(data.len());
    while let Some(rel) = find_subslice(&data[search..], b"obj") {
        let kw = search + rel;
        search = kw + 3;
        if data.get(kw + 3).is_some_and(|&b| !is_whitespace(b) && !is_delimiter(b)) {
            continue;
        }
        if let Some(header) = parse_header_before(data, kw)
            && header.0 >= from
        {
            return Some(header);
        }
    }
    None
}

/// Read `N G` backwards from an `obj` keyword at `kw`.
fn parse_header_before(data: &[u8], kw: usize) -> Option<(usize, u32, u16)> {
    let skip_ws = |mut i: usize| {
        while i > 0 && is_whitespace(data[i - 1]) {
            i -= 1;
        }
        i
    };
    let skip_digits = |mut i: usize| {
        while i > 0 && data[i - 1].is_ascii_digit() {
            i -= 1;
        }
        i
    };

    let gen_end = skip_ws(kw);
    if gen_end == kw {
        return None;
    }
    let gen_start = skip_digits(gen_end);
    let id_end = skip_ws(gen_start);
    if gen_start == gen_end || id_end == gen_start {
        return None;
    }
    let id_start = skip_digits(id_end);
    if id_start == id_end {
        return None;
    }
    if id_start > 0 && !is_whitespace(data[id_start - 1]) && !is_delimiter(data[id_start - 1]) {
        return None;
    }

    let objid = std::str::from_utf8(&data[id_start..id_end]).ok()?.parse().ok()?;
    let genno = std::str::from_utf8(&data[gen_start..gen_end]).ok()?.parse().ok()?;
    Some((id_start, objid, genno))
}

/// Find the first occurrence of `needle` in `hay`.
pub fn find_subslice(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Find the last occurrence of `needle` in `hay`.
pub fn rfind_subslice(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).rposition(|w| w == needle)
}
