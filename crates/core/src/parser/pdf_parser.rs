//! PDF parser - converts lexer tokens to PDF objects.

use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObjRef, PDFObject};
use crate::parser::lexer::{Keyword, Lexer, Token, is_whitespace};

/// PDF Parser - parses PDF object syntax
///
/// Uses [`Lexer`] for tokenization and builds PDF objects,
/// handling indirect references (num num R) appropriately.
pub struct PDFParser<'a> {
    lexer: Lexer<'a>,
    /// Lookahead buffer for tokens, with their start offsets
    lookahead: Vec<(usize, Token)>,
}

impl<'a> PDFParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            lexer: Lexer::new(data),
            lookahead: Vec::new(),
        }
    }

    /// Create a parser positioned at `pos`.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        let mut parser = Self::new(data);
        parser.set_pos(pos);
        parser
    }

    /// Offset of the next unread token.
    pub fn tell(&self) -> usize {
        match self.lookahead.last() {
            Some((pos, _)) => *pos,
            None => self.lexer.tell(),
        }
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.lookahead.clear();
        self.lexer.set_pos(pos);
    }

    /// Get next token (from lookahead or lexer)
    pub fn next_token(&mut self) -> Result<Option<(usize, Token)>> {
        if let Some(tok) = self.lookahead.pop() {
            return Ok(Some(tok));
        }
        self.lexer.next_token().transpose()
    }

    /// Push token back to lookahead
    fn push_back(&mut self, pos: usize, tok: Token) {
        self.lookahead.push((pos, tok));
    }

    /// Consume the next token, which must be `expected`.
    pub fn expect_keyword(&mut self, expected: Keyword) -> Result<()> {
        match self.next_token()? {
            Some((_, Token::Keyword(kw))) if kw == expected => Ok(()),
            Some((pos, tok)) => Err(PdfError::SyntaxError(format!(
                "expected '{}' at offset {pos}, found {tok:?}",
                String::from_utf8_lossy(expected.as_bytes())
            ))),
            None => Err(PdfError::UnexpectedEof),
        }
    }

    /// Parse `N G obj` and return the reference it declares.
    pub fn parse_indirect_header(&mut self) -> Result<PDFObjRef> {
        let objid = self.expect_int()?;
        let genno = self.expect_int()?;
        self.expect_keyword(Keyword::Obj)?;
        let objid = u32::try_from(objid)
            .map_err(|_| PdfError::SyntaxError(format!("invalid object number {objid}")))?;
        let genno = u16::try_from(genno)
            .map_err(|_| PdfError::SyntaxError(format!("invalid generation number {genno}")))?;
        Ok(PDFObjRef::new(objid, genno))
    }

    fn expect_int(&mut self) -> Result<i64> {
        match self.next_token()? {
            Some((_, Token::Int(n))) => Ok(n),
            Some((pos, tok)) => Err(PdfError::SyntaxError(format!(
                "expected integer at offset {pos}, found {tok:?}"
            ))),
            None => Err(PdfError::UnexpectedEof),
        }
    }

    /// Parse next PDF object
    pub fn parse_object(&mut self) -> Result<PDFObject> {
        let (pos, token) = self.next_token()?.ok_or(PdfError::UnexpectedEof)?;
        self.token_to_object(pos, token)
    }

    /// Convert a token to a PDF object
    fn token_to_object(&mut self, pos: usize, token: Token) -> Result<PDFObject> {
        match token {
            Token::Int(n) => {
                // Could be start of indirect reference: objid genno R
                if let Some((pos2, tok2)) = self.next_token()? {
                    if let Token::Int(m) = tok2 {
                        if let Some((pos3, tok3)) = self.next_token()? {
                            if tok3 == Token::Keyword(Keyword::R)
                                && let (Ok(objid), Ok(genno)) = (u32::try_from(n), u16::try_from(m))
                            {
                                return Ok(PDFObject::Ref(PDFObjRef::new(objid, genno)));
                            }
                            // Not R, push back both
                            self.push_back(pos3, tok3);
                        }
                        self.push_back(pos2, Token::Int(m));
                    } else {
                        self.push_back(pos2, tok2);
                    }
                }
                Ok(PDFObject::Int(n))
            }
            Token::Real(n) => Ok(PDFObject::Real(n)),
            Token::String(s) | Token::HexString(s) => Ok(PDFObject::String(s)),
            Token::Name(s) => Ok(PDFObject::Name(s)),
            Token::ArrayStart => self.parse_array(),
            Token::DictStart => self.parse_dict(),
            Token::Keyword(Keyword::Null) => Ok(PDFObject::Null),
            Token::Keyword(Keyword::True) => Ok(PDFObject::Bool(true)),
            Token::Keyword(Keyword::False) => Ok(PDFObject::Bool(false)),
            Token::Keyword(kw) => Err(PdfError::SyntaxError(format!(
                "unexpected keyword '{}' at offset {pos}",
                String::from_utf8_lossy(kw.as_bytes())
            ))),
            Token::ArrayEnd | Token::DictEnd => Err(PdfError::SyntaxError(format!(
                "unbalanced delimiter at offset {pos}"
            ))),
        }
    }

    /// Parse array contents until ]
    fn parse_array(&mut self) -> Result<PDFObject> {
        let mut arr = Vec::new();
        loop {
            let (pos, token) = self.next_token()?.ok_or(PdfError::UnexpectedEof)?;
            if token == Token::ArrayEnd {
                break;
            }
            arr.push(self.token_to_object(pos, token)?);
        }
        Ok(PDFObject::Array(arr))
    }

    /// Parse dict contents until >>
    fn parse_dict(&mut self) -> Result<PDFObject> {
        Ok(PDFObject::Dict(self.parse_dict_body()?))
    }

    /// Parse dict entries after `<<` has been consumed.
    pub fn parse_dict_body(&mut self) -> Result<PDFDict> {
        let mut dict = PDFDict::new();
        loop {
            let (pos, token) = self.next_token()?.ok_or(PdfError::UnexpectedEof)?;
            let key = match token {
                Token::DictEnd => break,
                Token::Name(name) => name,
                other => {
                    return Err(PdfError::SyntaxError(format!(
                        "expected name as dict key at offset {pos}, found {other:?}"
                    )));
                }
            };
            let value = self.parse_object()?;
            // A null value is equivalent to an absent key.
            if !value.is_null() {
                dict.insert(key, value);
            }
        }
        Ok(dict)
    }
}

/// Content stream operation
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// The operator (e.g., "re", "f", "cm")
    pub operator: Vec<u8>,
    /// Operands for this operation
    pub operands: Vec<PDFObject>,
}

/// Content stream parser.
///
/// Yields operator/operand groups. Inline images (`BI ... ID ... EI`) are
/// skipped as a whole, and malformed tokens end the stream quietly since
/// content errors never abort a page.
pub struct ContentParser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> ContentParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            lexer: Lexer::new(data),
        }
    }

    /// Skip raw inline image data up to and including `EI`.
    fn skip_inline_image(&mut self) {
        let data = self.lexer.data();
        // Skip the single whitespace after ID.
        let mut i = self.lexer.tell() + 1;
        while i + 1 < data.len() {
            if data[i] == b'E'
                && data[i + 1] == b'I'
                && i > 0
                && is_whitespace(data[i - 1])
                && data.get(i + 2).is_none_or(|&b| is_whitespace(b))
            {
                self.lexer.set_pos(i + 2);
                return;
            }
            i += 1;
        }
        self.lexer.set_pos(data.len());
    }
}

impl Iterator for ContentParser<'_> {
    type Item = Operation;

    fn next(&mut self) -> Option<Operation> {
        let mut operands: Vec<PDFObject> = Vec::new();
        let mut context_stack: Vec<Vec<PDFObject>> = Vec::new();
        // Dictionaries are collected as flat key/value runs.
        let mut dict_marks: Vec<bool> = Vec::new();

        loop {
            let (_, token) = match self.lexer.next_token()? {
                Ok(tok) => tok,
                Err(_) => return None,
            };
            match token {
                Token::ArrayStart | Token::DictStart => {
                    dict_marks.push(token == Token::DictStart);
                    context_stack.push(std::mem::take(&mut operands));
                }
                Token::ArrayEnd | Token::DictEnd => {
                    let contents = std::mem::take(&mut operands);
                    operands = context_stack.pop().unwrap_or_default();
                    if dict_marks.pop().unwrap_or(false) {
                        let mut dict = PDFDict::new();
                        let mut iter = contents.into_iter();
                        while let Some(key) = iter.next() {
                            if let (PDFObject::Name(name), Some(value)) = (key, iter.next()) {
                                dict.insert(name, value);
                            }
                        }
                        operands.push(PDFObject::Dict(dict));
                    } else {
                        operands.push(PDFObject::Array(contents));
                    }
                }
                Token::Int(n) => operands.push(PDFObject::Int(n)),
                Token::Real(n) => operands.push(PDFObject::Real(n)),
                Token::String(s) | Token::HexString(s) => operands.push(PDFObject::String(s)),
                Token::Name(s) => operands.push(PDFObject::Name(s)),
                Token::Keyword(Keyword::True) => operands.push(PDFObject::Bool(true)),
                Token::Keyword(Keyword::False) => operands.push(PDFObject::Bool(false)),
                Token::Keyword(Keyword::Null) => operands.push(PDFObject::Null),
                // Stray operator inside an array
                Token::Keyword(_) if !context_stack.is_empty() => {}
                Token::Keyword(Keyword::Other(op)) if op == b"BI" => {
                    while let Some(Ok((_, tok))) = self.lexer.next_token() {
                        if tok == Token::Keyword(Keyword::Other(b"ID".to_vec())) {
                            break;
                        }
                    }
                    self.skip_inline_image();
                    operands.clear();
                }
                Token::Keyword(kw) => {
                    return Some(Operation {
                        operator: kw.as_bytes().to_vec(),
                        operands,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_references_and_nested_containers() {
        let mut parser = PDFParser::new(b"<< /Kids [3 0 R 4 0 R] /Count 2 /Box [0 0 612.5 792] >>");
        let obj = parser.parse_object().unwrap();
        let dict = obj.as_dict().unwrap();
        let kids = dict["Kids"].as_array().unwrap();
        assert_eq!(kids[0], PDFObject::Ref(PDFObjRef::new(3, 0)));
        assert_eq!(kids[1], PDFObject::Ref(PDFObjRef::new(4, 0)));
        assert_eq!(dict["Count"], PDFObject::Int(2));
        assert_eq!(dict["Box"].as_array().unwrap()[2], PDFObject::Real(612.5));
    }

    #[test]
    fn integers_not_followed_by_r_stay_integers() {
        let mut parser = PDFParser::new(b"[1 2 3 R 4 5]");
        let obj = parser.parse_object().unwrap();
        assert_eq!(
            obj,
            PDFObject::Array(vec![
                PDFObject::Int(1),
                PDFObject::Ref(PDFObjRef::new(2, 3)),
                PDFObject::Int(4),
                PDFObject::Int(5),
            ])
        );
    }

    #[test]
    fn tell_accounts_for_lookahead() {
        let data = b"7 endobj";
        let mut parser = PDFParser::new(data);
        assert_eq!(parser.parse_object().unwrap(), PDFObject::Int(7));
        assert_eq!(parser.tell(), 2);
        parser.expect_keyword(Keyword::EndObj).unwrap();
    }

    #[test]
    fn indirect_header() {
        let mut parser = PDFParser::new(b"12 0 obj (x) endobj");
        assert_eq!(parser.parse_indirect_header().unwrap(), PDFObjRef::new(12, 0));
        assert_eq!(parser.parse_object().unwrap(), PDFObject::String(b"x".to_vec()));
    }

    #[test]
    fn dict_keys_must_be_names() {
        let mut parser = PDFParser::new(b"<< 1 2 >>");
        assert!(matches!(parser.parse_object(), Err(PdfError::SyntaxError(_))));
        let mut parser = PDFParser::new(b"<< /A [1 2");
        assert!(matches!(parser.parse_object(), Err(PdfError::UnexpectedEof)));
    }

    #[test]
    fn content_parser_groups_operands() {
        let ops: Vec<_> = ContentParser::new(b"q 1 0 0 1 10 20 cm 0 0 5 5 re f Q").collect();
        let names: Vec<_> = ops.iter().map(|op| op.operator.as_slice()).collect();
        assert_eq!(names, [&b"q"[..], b"cm", b"re", b"f", b"Q"]);
        assert_eq!(ops[1].operands.len(), 6);
        assert_eq!(ops[2].operands[2], PDFObject::Int(5));
    }

    #[test]
    fn content_parser_skips_inline_images() {
        let data = b"BI /W 2 /H 1 /BPC 8 /CS /G ID \x00)\xff EI 0 g";
        let ops: Vec<_> = ContentParser::new(data).collect();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operator, b"g");
        assert_eq!(ops[0].operands, vec![PDFObject::Int(0)]);
    }
}
