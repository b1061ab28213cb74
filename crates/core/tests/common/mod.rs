//! In-memory PDF fixtures for the integration tests.
//!
//! Documents are assembled from object bodies and, when requested,
//! encrypted with the standard security handler so the engine sees the
//! same bytes a real writer would produce.

#![allow(dead_code)]

use std::collections::BTreeMap;

use deadbolt_core::codec::decode_stream;
use deadbolt_core::document::security::{
    CryptMethod, EncryptionDescriptor, Security, compute_file_key, compute_owner_hash,
    compute_user_hash,
};
use deadbolt_core::document::{SourceReader, walk_page_tree};
use deadbolt_core::model::PDFObject;
use deadbolt_core::{EncryptionState, RawDocument};

/// First (and second) element of every fixture's `/ID`.
pub const DOC_ID: &[u8; 16] = b"deadbolt-fixture";

/// `/P` with print, modify, copy and annotate withheld.
pub const P_LOCKED: i32 = -64;

/// Object body as written between `obj` and `endobj`.
pub enum Obj {
    Text(String),
    /// `template` with `$S` replaced by `payload` as a hex string,
    /// encrypted when the document is.
    WithString { template: String, payload: Vec<u8> },
    /// Stream with a computed `/Length`; `dict` holds the other entries.
    Stream { dict: String, data: Vec<u8> },
}

impl Obj {
    pub fn text(body: &str) -> Self {
        Self::Text(body.to_string())
    }

    pub fn with_string(template: &str, payload: &[u8]) -> Self {
        Self::WithString {
            template: template.to_string(),
            payload: payload.to_vec(),
        }
    }

    pub fn stream(dict: &str, data: &[u8]) -> Self {
        Self::Stream {
            dict: dict.to_string(),
            data: data.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Rc4_40,
    Rc4_128,
    Aes128,
}

impl Cipher {
    /// `(V, R, key bits, method)`
    fn params(self) -> (i64, i64, usize, CryptMethod) {
        match self {
            Self::Rc4_40 => (1, 2, 40, CryptMethod::V2),
            Self::Rc4_128 => (2, 3, 128, CryptMethod::V2),
            Self::Aes128 => (4, 4, 128, CryptMethod::AesV2),
        }
    }
}

pub struct Encryption {
    pub cipher: Cipher,
    pub user: String,
    pub owner: String,
    pub permissions: i32,
}

impl Encryption {
    pub fn new(cipher: Cipher, user: &str, owner: &str) -> Self {
        Self {
            cipher,
            user: user.to_string(),
            owner: owner.to_string(),
            permissions: P_LOCKED,
        }
    }

    /// Restrictions only: the empty user password opens the document.
    pub fn restrictions(cipher: Cipher, permissions: i32) -> Self {
        Self {
            permissions,
            ..Self::new(cipher, "", "owner")
        }
    }

    /// Authenticated handler plus the `/Encrypt` dictionary text.
    fn setup(&self) -> (Security, String) {
        let (v, revision, bits, method) = self.cipher.params();
        let mut desc = EncryptionDescriptor {
            filter: "Standard".into(),
            sub_filter: None,
            v,
            revision,
            key_length_bits: bits,
            owner_hash: Vec::new(),
            user_hash: Vec::new(),
            permissions: self.permissions as u32,
            document_id: DOC_ID.to_vec(),
            encrypt_metadata: true,
            string_method: method,
            stream_method: method,
        };
        desc.owner_hash = compute_owner_hash(
            self.owner.as_bytes(),
            self.user.as_bytes(),
            revision,
            desc.key_len(),
        );
        let key = compute_file_key(&desc, self.user.as_bytes());
        desc.user_hash = compute_user_hash(&key, revision, DOC_ID);
        let security =
            Security::authenticate(&desc, self.user.as_bytes()).expect("fixture key derivation");

        let crypt_filters = if self.cipher == Cipher::Aes128 {
            " /CF << /StdCF << /CFM /AESV2 /Length 16 /AuthEvent /DocOpen >> >> /StmF /StdCF /StrF /StdCF"
        } else {
            ""
        };
        let dict = format!(
            "<< /Filter /Standard /V {v} /R {revision} /Length {bits} /P {} /O <{}> /U <{}>{crypt_filters} >>",
            self.permissions,
            hex::encode(&desc.owner_hash),
            hex::encode(&desc.user_hash),
        );
        (security, dict)
    }
}

enum Slot {
    Direct(usize),
    Compressed(u32, usize),
}

/// Assembles a PDF file from numbered objects. Object 1 is the catalog.
#[derive(Default)]
pub struct PdfBuilder {
    objects: BTreeMap<u32, Obj>,
    encryption: Option<Encryption>,
    xref_stream: bool,
    packed: Vec<u32>,
    info: Option<u32>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(mut self, objid: u32, obj: Obj) -> Self {
        self.objects.insert(objid, obj);
        self
    }

    pub fn text(self, objid: u32, body: &str) -> Self {
        self.object(objid, Obj::text(body))
    }

    pub fn encrypt(mut self, encryption: Encryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Use a cross-reference stream instead of a classic table.
    pub fn xref_stream(mut self) -> Self {
        self.xref_stream = true;
        self
    }

    /// Store `objids` in an object stream. Implies an xref stream.
    pub fn pack(mut self, objids: &[u32]) -> Self {
        self.packed = objids.to_vec();
        self.xref_stream = true;
        self
    }

    pub fn info(mut self, objid: u32) -> Self {
        self.info = Some(objid);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let security = self.encryption.as_ref().map(Encryption::setup);
        let mut next = self.objects.keys().max().copied().unwrap_or(0) + 1;
        let mut alloc = |wanted: bool| {
            wanted.then(|| {
                next += 1;
                next - 1
            })
        };
        let encrypt_id = alloc(security.is_some());
        let objstm_id = alloc(!self.packed.is_empty());
        let xref_id = alloc(self.xref_stream);
        let size = next;
        let sec = security.as_ref().map(|(s, _)| s);

        let mut out = b"%PDF-1.6\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut slots: BTreeMap<u32, Slot> = BTreeMap::new();

        for (&objid, obj) in &self.objects {
            if self.packed.contains(&objid) {
                continue;
            }
            slots.insert(objid, Slot::Direct(out.len()));
            out.extend_from_slice(format!("{objid} 0 obj\n").as_bytes());
            out.extend_from_slice(&render(objid, obj, sec));
            out.extend_from_slice(b"\nendobj\n");
        }

        if let (Some(objid), Some((_, dict))) = (encrypt_id, &security) {
            slots.insert(objid, Slot::Direct(out.len()));
            out.extend_from_slice(format!("{objid} 0 obj\n{dict}\nendobj\n").as_bytes());
        }

        if let Some(stm_id) = objstm_id {
            let mut header = String::new();
            let mut body = Vec::new();
            for (index, &objid) in self.packed.iter().enumerate() {
                let obj = &self.objects[&objid];
                assert!(!matches!(obj, Obj::Stream { .. }), "streams cannot be packed");
                header.push_str(&format!("{objid} {} ", body.len()));
                body.extend_from_slice(&render(objid, obj, None));
                body.push(b'\n');
                slots.insert(objid, Slot::Compressed(stm_id, index));
            }
            let first = header.len();
            let mut data = header.into_bytes();
            data.extend_from_slice(&body);
            let data = match sec {
                Some(sec) => sec.encrypt_stream(stm_id, 0, &data, iv(stm_id)).unwrap(),
                None => data,
            };
            slots.insert(stm_id, Slot::Direct(out.len()));
            out.extend_from_slice(
                format!(
                    "{stm_id} 0 obj\n<< /Type /ObjStm /N {} /First {first} /Length {} >>\nstream\n",
                    self.packed.len(),
                    data.len()
                )
                .as_bytes(),
            );
            out.extend_from_slice(&data);
            out.extend_from_slice(b"\nendstream\nendobj\n");
        }

        let id = hex::encode(DOC_ID);
        let mut trailer = format!("/Size {size} /Root 1 0 R /ID [<{id}> <{id}>]");
        if let Some(objid) = encrypt_id {
            trailer.push_str(&format!(" /Encrypt {objid} 0 R"));
        }
        if let Some(objid) = self.info {
            trailer.push_str(&format!(" /Info {objid} 0 R"));
        }

        let xref_offset = out.len();
        match xref_id {
            Some(xref_id) => {
                slots.insert(xref_id, Slot::Direct(xref_offset));
                let mut rows = Vec::new();
                for objid in 0..size {
                    match slots.get(&objid) {
                        Some(Slot::Direct(offset)) => {
                            rows.push(1);
                            rows.extend_from_slice(&(*offset as u32).to_be_bytes());
                            rows.extend_from_slice(&[0, 0]);
                        }
                        Some(Slot::Compressed(stream, index)) => {
                            rows.push(2);
                            rows.extend_from_slice(&stream.to_be_bytes());
                            rows.extend_from_slice(&(*index as u16).to_be_bytes());
                        }
                        None if objid == 0 => rows.extend_from_slice(&[0, 0, 0, 0, 0, 0xFF, 0xFF]),
                        None => rows.extend_from_slice(&[0; 7]),
                    }
                }
                out.extend_from_slice(
                    format!(
                        "{xref_id} 0 obj\n<< /Type /XRef /W [1 4 2] {trailer} /Length {} >>\nstream\n",
                        rows.len()
                    )
                    .as_bytes(),
                );
                out.extend_from_slice(&rows);
                out.extend_from_slice(b"\nendstream\nendobj\n");
            }
            None => {
                out.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
                for objid in 0..size {
                    let line = match slots.get(&objid) {
                        Some(Slot::Direct(offset)) => format!("{offset:010} 00000 n \n"),
                        _ if objid == 0 => "0000000000 65535 f \n".to_string(),
                        _ => "0000000000 00000 f \n".to_string(),
                    };
                    out.extend_from_slice(line.as_bytes());
                }
                out.extend_from_slice(format!("trailer\n<< {trailer} >>\n").as_bytes());
            }
        }
        out.extend_from_slice(format!("startxref\n{xref_offset}\n%%EOF\n").as_bytes());
        out
    }
}

fn iv(objid: u32) -> [u8; 16] {
    [objid as u8; 16]
}

fn render(objid: u32, obj: &Obj, security: Option<&Security>) -> Vec<u8> {
    match obj {
        Obj::Text(body) => body.clone().into_bytes(),
        Obj::WithString { template, payload } => {
            let bytes = match security {
                Some(sec) => sec.encrypt_string(objid, 0, payload, iv(objid)).unwrap(),
                None => payload.clone(),
            };
            template
                .replace("$S", &format!("<{}>", hex::encode(bytes)))
                .into_bytes()
        }
        Obj::Stream { dict, data } => {
            let data = match security {
                Some(sec) => sec.encrypt_stream(objid, 0, data, iv(objid)).unwrap(),
                None => data.clone(),
            };
            let mut out = format!("<< /Length {} {dict} >>\nstream\n", data.len()).into_bytes();
            out.extend_from_slice(&data);
            out.extend_from_slice(b"\nendstream");
            out
        }
    }
}

/// Content stream drawn on page `i`.
pub fn page_content(i: usize) -> String {
    format!("0 0 1 rg {} 10 20 20 re f", 10 + 30 * i)
}

/// `n` pages, each with its own content stream, plus an `/Info` title.
///
/// Objects: 1 catalog, 2 page tree, `3..3+n` pages, then the content
/// streams, then the info dictionary.
pub fn pages_doc(n: usize) -> PdfBuilder {
    let n = n as u32;
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", 3 + i)).collect();
    let info_id = 3 + 2 * n;
    let mut builder = PdfBuilder::new()
        .text(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .text(
            2,
            &format!(
                "<< /Type /Pages /Kids [{}] /Count {n} /MediaBox [0 0 200 100] >>",
                kids.join(" ")
            ),
        )
        .object(info_id, Obj::with_string("<< /Title $S >>", b"Quarterly report"))
        .info(info_id);
    for i in 0..n {
        builder = builder
            .text(
                3 + i,
                &format!("<< /Type /Page /Parent 2 0 R /Contents {} 0 R >>", 3 + n + i),
            )
            .object(3 + n + i, Obj::stream("", page_content(i as usize).as_bytes()));
    }
    builder
}

/// Page tree whose interior nodes form the loop 2 -> 3 -> 4 -> 2.
pub fn cyclic_doc() -> Vec<u8> {
    PdfBuilder::new()
        .text(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .text(2, "<< /Type /Pages /Kids [3 0 R] /Count 1 >>")
        .text(3, "<< /Type /Pages /Parent 2 0 R /Kids [4 0 R] /Count 1 >>")
        .text(4, "<< /Type /Pages /Parent 3 0 R /Kids [2 0 R] /Count 1 >>")
        .build()
}

/// Append an incremental update replacing or adding `updates`.
pub fn incremental_update(base: &[u8], updates: &[(u32, &str)]) -> Vec<u8> {
    let prev = last_startxref(base);
    let mut out = base.to_vec();
    let mut size = 0;
    let mut entries = Vec::new();
    for &(objid, body) in updates {
        entries.push((objid, out.len()));
        out.extend_from_slice(format!("{objid} 0 obj\n{body}\nendobj\n").as_bytes());
        size = size.max(objid + 1);
    }
    let xref = out.len();
    out.extend_from_slice(b"xref\n");
    for (objid, offset) in entries {
        out.extend_from_slice(format!("{objid} 1\n{offset:010} 00000 n \n").as_bytes());
    }
    let id = hex::encode(DOC_ID);
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {size} /Root 1 0 R /ID [<{id}> <{id}>] /Prev {prev} >>\nstartxref\n{xref}\n%%EOF\n"
        )
        .as_bytes(),
    );
    out
}

/// Point `startxref` past the end of the file so the index has to be
/// rebuilt by scanning.
pub fn break_xref(data: &[u8]) -> Vec<u8> {
    let pos = rfind(data, b"startxref").expect("startxref");
    let mut out = data[..pos].to_vec();
    out.extend_from_slice(b"startxref\n99999999\n%%EOF\n");
    out
}

fn last_startxref(data: &[u8]) -> usize {
    let pos = rfind(data, b"startxref").expect("startxref") + b"startxref".len();
    let digits: String = data[pos..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    digits.parse().expect("startxref offset")
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Parse an unlocked output the way a reader would.
pub struct Reopened {
    pub raw: RawDocument,
    pub state: EncryptionState,
}

impl Reopened {
    pub fn new(bytes: &[u8]) -> Self {
        let raw = RawDocument::parse(bytes.to_vec()).expect("output parses");
        let state = EncryptionState::resolve(&raw, None).expect("output classifies");
        Self { raw, state }
    }

    pub fn page_count(&self) -> usize {
        let reader = SourceReader::new(&self.raw, &self.state).unwrap();
        walk_page_tree(&reader).unwrap().pages.len()
    }

    /// Decoded content of every page, in order.
    pub fn page_contents(&self) -> Vec<Vec<u8>> {
        let reader = SourceReader::new(&self.raw, &self.state).unwrap();
        let tree = walk_page_tree(&reader).unwrap();
        tree.pages
            .iter()
            .map(|leaf| match leaf.attrs.get("Contents") {
                Some(contents) => match reader.resolve(contents).unwrap() {
                    PDFObject::Stream(stream) => decode_stream(&stream).unwrap(),
                    _ => Vec::new(),
                },
                None => Vec::new(),
            })
            .collect()
    }
}
