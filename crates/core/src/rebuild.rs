//! Document rebuilder.
//!
//! Copies everything reachable from the page tree (and selected catalog
//! entries) out of a [`RawDocument`] into a fresh, unencrypted
//! [`NewDocument`]. Objects are renumbered densely in discovery order:
//! 1 is the catalog, 2 the page tree root, then the pages, then every
//! other reachable object.

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::{debug, info};

use crate::document::page::walk_page_tree;
use crate::document::raw::RawDocument;
use crate::document::security::EncryptionState;
use crate::document::source::SourceReader;
use crate::error::Result;
use crate::model::objects::{PDFDict, PDFObjRef, PDFObject, PDFStream};

/// Catalog entries copied into the rebuilt catalog.
///
/// `Perms` and `Encrypt` are never carried.
pub const CARRIED_CATALOG_KEYS: [&str; 19] = [
    "Version",
    "Extensions",
    "Names",
    "Outlines",
    "PageLabels",
    "Dests",
    "AcroForm",
    "ViewerPreferences",
    "PageLayout",
    "PageMode",
    "Lang",
    "MarkInfo",
    "StructTreeRoot",
    "Metadata",
    "OpenAction",
    "OCProperties",
    "AF",
    "URI",
    "Threads",
];

/// What besides the pages ends up in the rebuilt document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildOptions {
    /// Copy [`CARRIED_CATALOG_KEYS`] from the source catalog
    pub carry_catalog: bool,
    /// Copy the trailer's `/Info` dictionary
    pub carry_info: bool,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        Self {
            carry_catalog: true,
            carry_info: true,
        }
    }
}

/// An unencrypted document ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Objects by number; every generation is 0
    pub objects: BTreeMap<u32, PDFObject>,
    pub root: PDFObjRef,
    pub info: Option<PDFObjRef>,
    /// Used for both `/ID` elements
    pub id: Option<Vec<u8>>,
    /// Header version, e.g. `1.7`
    pub version: String,
}

impl NewDocument {
    pub fn get(&self, objid: u32) -> Option<&PDFObject> {
        self.objects.get(&objid)
    }

    /// The page objects, in order.
    pub fn page_refs(&self) -> Vec<PDFObjRef> {
        let kids = self
            .dict(self.root.objid)
            .and_then(|catalog| catalog.get("Pages"))
            .and_then(|pages| pages.as_ref().ok())
            .and_then(|pages| self.dict(pages.objid))
            .and_then(|pages| pages.get("Kids"))
            .and_then(|kids| kids.as_array().ok());
        kids.map(|kids| kids.iter().filter_map(|k| k.as_ref().ok().copied()).collect())
            .unwrap_or_default()
    }

    pub fn page_count(&self) -> usize {
        self.page_refs().len()
    }

    fn dict(&self, objid: u32) -> Option<&PDFDict> {
        self.get(objid).and_then(|obj| obj.as_dict().ok())
    }
}

/// Rebuild `raw` without its encryption.
pub fn rebuild(raw: &RawDocument, state: &EncryptionState) -> Result<NewDocument> {
    Rebuilder::new(raw, state, RebuildOptions::default())?.run()
}

/// Copies reachable objects from a source document into a [`NewDocument`].
pub struct Rebuilder<'a> {
    reader: SourceReader<'a>,
    options: RebuildOptions,
    objects: BTreeMap<u32, PDFObject>,
    next_id: u32,
    /// Source object number -> new reference
    remap: HashMap<u32, PDFObjRef>,
    /// Objects allocated but not yet copied: (source objid, new objid)
    worklist: VecDeque<(u32, u32)>,
    encrypt_objid: Option<u32>,
}

impl<'a> Rebuilder<'a> {
    pub fn new(
        raw: &'a RawDocument,
        state: &'a EncryptionState,
        options: RebuildOptions,
    ) -> Result<Self> {
        let encrypt_objid = raw
            .trailer()
            .get("Encrypt")
            .and_then(|e| e.as_ref().ok())
            .map(|r| r.objid);
        Ok(Self {
            reader: SourceReader::new(raw, state)?,
            options,
            objects: BTreeMap::new(),
            next_id: 1,
            remap: HashMap::new(),
            worklist: VecDeque::new(),
            encrypt_objid,
        })
    }

    fn alloc(&mut self) -> PDFObjRef {
        let objref = PDFObjRef::new(self.next_id, 0);
        self.next_id += 1;
        objref
    }

    pub fn run(mut self) -> Result<NewDocument> {
        let tree = walk_page_tree(&self.reader)?;

        let catalog_ref = self.alloc();
        let pages_ref = self.alloc();
        let page_refs: Vec<PDFObjRef> = tree.pages.iter().map(|_| self.alloc()).collect();

        if let Some(old) = tree.catalog_ref {
            self.remap.insert(old.objid, catalog_ref);
        }
        for &objid in &tree.interior {
            self.remap.insert(objid, pages_ref);
        }
        for (leaf, new) in tree.pages.iter().zip(&page_refs) {
            if let Some(old) = leaf.objref {
                self.remap.insert(old.objid, *new);
            }
        }

        for (leaf, new) in tree.pages.iter().zip(&page_refs) {
            let mut page = self.copy_dict(&leaf.attrs)?;
            page.insert("Parent".into(), PDFObject::Ref(pages_ref));
            self.objects.insert(new.objid, PDFObject::Dict(page));
        }

        let mut pages = PDFDict::new();
        pages.insert("Type".into(), PDFObject::Name("Pages".into()));
        pages.insert(
            "Kids".into(),
            PDFObject::Array(page_refs.iter().map(|r| PDFObject::Ref(*r)).collect()),
        );
        pages.insert("Count".into(), PDFObject::Int(page_refs.len() as i64));
        self.objects.insert(pages_ref.objid, PDFObject::Dict(pages));

        let mut catalog = PDFDict::new();
        catalog.insert("Type".into(), PDFObject::Name("Catalog".into()));
        catalog.insert("Pages".into(), PDFObject::Ref(pages_ref));
        if self.options.carry_catalog {
            for key in CARRIED_CATALOG_KEYS {
                if let Some(value) = tree.catalog.get(key) {
                    let value = self.copy_value(value)?;
                    if !value.is_null() {
                        catalog.insert(key.into(), value);
                    }
                }
            }
        }
        self.objects.insert(catalog_ref.objid, PDFObject::Dict(catalog));

        let raw = self.reader.raw();
        let info = match raw.trailer().get("Info") {
            Some(info) if self.options.carry_info => match info {
                PDFObject::Ref(_) => self.copy_value(info)?.as_ref().ok().copied(),
                PDFObject::Dict(dict) => {
                    let dict = self.copy_dict(dict)?;
                    let objref = self.alloc();
                    self.objects.insert(objref.objid, PDFObject::Dict(dict));
                    Some(objref)
                }
                _ => None,
            },
            _ => None,
        };

        self.drain()?;

        let id = first_document_id(raw)?;

        info!(
            pages = page_refs.len(),
            objects = self.objects.len(),
            "document rebuilt"
        );
        Ok(NewDocument {
            objects: self.objects,
            root: catalog_ref,
            info,
            id,
            version: output_version(raw.version(), tree.catalog.get("Version")),
        })
    }

    /// Copy every allocated object until nothing new is discovered.
    fn drain(&mut self) -> Result<()> {
        while let Some((old, new)) = self.worklist.pop_front() {
            let copied = match self.reader.fetch(old)? {
                Some(obj) => self.copy_value(&obj)?,
                None => PDFObject::Null,
            };
            self.objects.insert(new, copied);
        }
        Ok(())
    }

    /// Deep-copy a direct value, renumbering the references inside it.
    fn copy_value(&mut self, obj: &PDFObject) -> Result<PDFObject> {
        Ok(match obj {
            PDFObject::Ref(r) => self.map_ref(*r),
            PDFObject::Array(arr) => PDFObject::Array(
                arr.iter()
                    .map(|o| self.copy_value(o))
                    .collect::<Result<_>>()?,
            ),
            PDFObject::Dict(dict) => PDFObject::Dict(self.copy_dict(dict)?),
            PDFObject::Stream(stream) => {
                // Trim the source entries first so nothing they reference
                // is allocated.
                let mut attrs = stream.attrs.clone();
                attrs.shift_remove("Length");
                strip_crypt_filter(&mut attrs);
                let attrs = self.copy_dict(&attrs)?;
                PDFObject::Stream(Box::new(PDFStream::new(attrs, stream.rawdata_bytes())))
            }
            other => other.clone(),
        })
    }

    fn copy_dict(&mut self, dict: &PDFDict) -> Result<PDFDict> {
        dict.iter()
            .map(|(k, v)| Ok((k.clone(), self.copy_value(v)?)))
            .collect()
    }

    fn map_ref(&mut self, r: PDFObjRef) -> PDFObject {
        if let Some(new) = self.remap.get(&r.objid) {
            return PDFObject::Ref(*new);
        }
        if self.encrypt_objid == Some(r.objid) || !self.reader.exists(r.objid) {
            debug!(objid = r.objid, "dropping reference");
            return PDFObject::Null;
        }
        let new = self.alloc();
        self.remap.insert(r.objid, new);
        self.worklist.push_back((r.objid, new.objid));
        PDFObject::Ref(new)
    }
}

/// First element of the trailer's `/ID`, reused for both output elements.
pub(crate) fn first_document_id(raw: &RawDocument) -> Result<Option<Vec<u8>>> {
    Ok(
        match raw.trailer().get("ID").map(|id| raw.resolve(id)).transpose()? {
            Some(PDFObject::Array(ids)) => ids
                .first()
                .and_then(|first| first.as_string().ok())
                .map(<[u8]>::to_vec),
            _ => None,
        },
    )
}

/// Remove a `/Crypt` entry from the filter chain, with its parameters.
fn parse_version(version: &str) -> Option<(u32, u32)> {
    let (major, minor) = version.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// The header version, raised to the catalog's `/Version` when that is
/// newer.
fn output_version(header: &str, declared: Option<&PDFObject>) -> String {
    let declared = declared.and_then(|v| v.as_name().ok());
    match (parse_version(header), declared.and_then(parse_version)) {
        (Some(current), Some(newer)) if newer > current => {
            debug!(header, declared = ?declared, "catalog declares a newer version");
            format!("{}.{}", newer.0, newer.1)
        }
        _ => header.to_string(),
    }
}

fn strip_crypt_filter(attrs: &mut PDFDict) {
    let Some(PDFObject::Array(filters)) = attrs.get("Filter") else {
        if attrs.get("Filter").is_some_and(|f| f.is_name("Crypt")) {
            attrs.shift_remove("Filter");
            attrs.shift_remove("DecodeParms");
        }
        return;
    };
    let Some(pos) = filters.iter().position(|f| f.is_name("Crypt")) else {
        return;
    };
    let mut filters = filters.clone();
    filters.remove(pos);
    if let Some(PDFObject::Array(parms)) = attrs.get_mut("DecodeParms")
        && pos < parms.len()
    {
        parms.remove(pos);
    }
    if filters.is_empty() {
        attrs.shift_remove("Filter");
        attrs.shift_remove("DecodeParms");
    } else {
        attrs.insert("Filter".into(), PDFObject::Array(filters));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_pdf, build_pdf_with_trailer, stream_body};

    fn rebuild_bodies(bodies: &[&str], options: RebuildOptions) -> NewDocument {
        let raw = RawDocument::parse(build_pdf(bodies)).unwrap();
        let state = EncryptionState::NotEncrypted;
        Rebuilder::new(&raw, &state, options).unwrap().run().unwrap()
    }

    #[test]
    fn numbering_puts_catalog_tree_and_pages_first() {
        let content = stream_body("", "0 0 10 10 re f");
        let doc = rebuild_bodies(
            &[
                "<< /Type /Catalog /Pages 3 0 R >>",
                &content,
                "<< /Type /Pages /Kids [4 0 R 5 0 R] /Count 2 >>",
                "<< /Type /Page /Parent 3 0 R /Contents 2 0 R >>",
                "<< /Type /Page /Parent 3 0 R /Contents 2 0 R >>",
            ],
            RebuildOptions::default(),
        );
        assert_eq!(doc.root, PDFObjRef::new(1, 0));
        assert_eq!(doc.page_refs(), vec![PDFObjRef::new(3, 0), PDFObjRef::new(4, 0)]);
        let page = doc.get(3).unwrap().as_dict().unwrap();
        assert_eq!(page["Parent"], PDFObject::Ref(PDFObjRef::new(2, 0)));
        assert_eq!(page["Contents"], PDFObject::Ref(PDFObjRef::new(5, 0)));
        // Shared content is copied once.
        assert_eq!(doc.get(4).unwrap().as_dict().unwrap()["Contents"], page["Contents"]);
        assert_eq!(doc.objects.len(), 5);
        let stream = doc.get(5).unwrap().as_stream().unwrap();
        assert_eq!(stream.get_rawdata(), b"0 0 10 10 re f");
        assert!(stream.get("Length").is_none());
    }

    #[test]
    fn links_between_pages_follow_the_renumbering() {
        let doc = rebuild_bodies(
            &[
                "<< /Type /Catalog /Pages 2 0 R /OpenAction [4 0 R /Fit] >>",
                "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >>",
                "<< /Type /Page /Parent 2 0 R /Annots [5 0 R] >>",
                "<< /Type /Page /Parent 2 0 R >>",
                "<< /Type /Annot /Subtype /Link /P 3 0 R /Dest [4 0 R /XYZ null null null] /Extra 42 0 R >>",
            ],
            RebuildOptions::default(),
        );
        let catalog = doc.get(1).unwrap().as_dict().unwrap();
        let open = catalog["OpenAction"].as_array().unwrap();
        assert_eq!(open[0], PDFObject::Ref(PDFObjRef::new(4, 0)));

        let annot = doc.get(5).unwrap().as_dict().unwrap();
        assert_eq!(annot["P"], PDFObject::Ref(PDFObjRef::new(3, 0)));
        assert_eq!(annot["Dest"].as_array().unwrap()[0], PDFObject::Ref(PDFObjRef::new(4, 0)));
        assert_eq!(annot["Extra"], PDFObject::Null);
    }

    #[test]
    fn catalog_entries_and_info_are_optional() {
        let bodies = [
            "<< /Type /Catalog /Pages 2 0 R /PageMode /UseOutlines /Perms << /DocMDP 9 0 R >> >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
            "<< /Title (Report) >>",
        ];
        let raw =
            RawDocument::parse(build_pdf_with_trailer(&bodies, "/Info 4 0 R /ID [<0102> <0304>] "))
                .unwrap();
        let state = EncryptionState::NotEncrypted;

        let full = rebuild(&raw, &state).unwrap();
        let catalog = full.get(1).unwrap().as_dict().unwrap();
        assert!(catalog.get("PageMode").unwrap().is_name("UseOutlines"));
        assert!(!catalog.contains_key("Perms"));
        let info = full.info.unwrap();
        assert_eq!(
            full.get(info.objid).unwrap().as_dict().unwrap()["Title"],
            PDFObject::String(b"Report".to_vec())
        );
        assert_eq!(full.id.as_deref(), Some(&[1u8, 2][..]));
        assert_eq!(full.version, "1.4");

        let options = RebuildOptions {
            carry_catalog: false,
            carry_info: false,
        };
        let bare = Rebuilder::new(&raw, &state, options).unwrap().run().unwrap();
        assert!(!bare.get(1).unwrap().as_dict().unwrap().contains_key("PageMode"));
        assert!(bare.info.is_none());
        assert_eq!(bare.objects.len(), 3);
    }

    #[test]
    fn catalog_version_is_kept_and_raises_the_header() {
        let bodies = [
            "<< /Type /Catalog /Pages 2 0 R /Version /1.7 /Extensions << /ADBE << /BaseVersion /1.7 /ExtensionLevel 3 >> >> >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R >>",
        ];
        let doc = rebuild_bodies(&bodies, RebuildOptions::default());
        assert_eq!(doc.version, "1.7");
        let catalog = doc.get(1).unwrap().as_dict().unwrap();
        assert!(catalog["Version"].is_name("1.7"));
        assert!(catalog.contains_key("Extensions"));

        // The header still moves when catalog entries are not carried.
        let bare = rebuild_bodies(
            &bodies,
            RebuildOptions {
                carry_catalog: false,
                carry_info: true,
            },
        );
        assert_eq!(bare.version, "1.7");
        assert_eq!(output_version("1.7", Some(&PDFObject::Name("1.4".into()))), "1.7");
    }

    #[test]
    fn indirect_stream_length_is_not_copied() {
        let doc = rebuild_bodies(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
                "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>",
                "<< /Length 5 0 R >>\nstream\n0 0 m\nendstream",
                "5",
            ],
            RebuildOptions::default(),
        );
        assert_eq!(doc.objects.len(), 4);
        let stream = doc.get(4).unwrap().as_stream().unwrap();
        assert_eq!(stream.get_rawdata(), b"0 0 m");
        assert!(stream.get("Length").is_none());
    }

    #[test]
    fn crypt_filter_is_removed_from_chain() {
        let mut attrs = PDFDict::new();
        attrs.insert(
            "Filter".into(),
            PDFObject::Array(vec![
                PDFObject::Name("Crypt".into()),
                PDFObject::Name("FlateDecode".into()),
            ]),
        );
        attrs.insert(
            "DecodeParms".into(),
            PDFObject::Array(vec![PDFObject::Dict(PDFDict::new()), PDFObject::Null]),
        );
        strip_crypt_filter(&mut attrs);
        assert_eq!(
            attrs["Filter"],
            PDFObject::Array(vec![PDFObject::Name("FlateDecode".into())])
        );
        assert_eq!(attrs["DecodeParms"], PDFObject::Array(vec![PDFObject::Null]));

        let mut single = PDFDict::new();
        single.insert("Filter".into(), PDFObject::Name("Crypt".into()));
        strip_crypt_filter(&mut single);
        assert!(single.is_empty());
    }
}
