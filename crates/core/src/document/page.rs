//! Page tree walk.
//!
//! Flattens `/Root /Pages` into its leaf pages in document order, pushing
//! inheritable attributes down to every leaf.

use std::collections::HashSet;

use tracing::warn;

use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObjRef, PDFObject};

use super::source::SourceReader;

/// Attributes a page inherits from its ancestors.
pub const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// US Letter, used when no MediaBox is found anywhere in the tree.
pub const DEFAULT_MEDIABOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Inherited page attributes collected on the way down the tree.
#[derive(Debug, Clone, Default)]
struct InheritedNode {
    attrs: PDFDict,
}

impl InheritedNode {
    /// Child inheritance: this node's values, overridden by `node`'s own.
    fn with(&self, node: &PDFDict) -> Self {
        let mut attrs = self.attrs.clone();
        for key in INHERITABLE {
            if let Some(value) = node.get(key) {
                attrs.insert(key.to_string(), value.clone());
            }
        }
        Self { attrs }
    }

    /// Fill in inherited attributes the page does not define itself.
    fn apply_to(&self, page: &mut PDFDict) {
        for (key, value) in &self.attrs {
            if !page.contains_key(key) {
                page.insert(key.clone(), value.clone());
            }
        }
    }
}

/// A leaf page with inherited attributes materialized.
#[derive(Debug, Clone)]
pub struct PageLeaf {
    /// The page object, or `None` for a page given as a direct dictionary
    pub objref: Option<PDFObjRef>,
    /// Page dictionary without `/Parent`
    pub attrs: PDFDict,
}

impl PageLeaf {
    /// Page size from the MediaBox, falling back to US Letter.
    pub fn mediabox(&self, reader: &SourceReader<'_>) -> [f64; 4] {
        let Some(value) = self.attrs.get("MediaBox") else {
            return DEFAULT_MEDIABOX;
        };
        let Ok(PDFObject::Array(arr)) = reader.resolve(value) else {
            return DEFAULT_MEDIABOX;
        };
        let nums: Vec<f64> = arr
            .iter()
            .filter_map(|v| reader.resolve(v).ok().and_then(|v| v.as_num().ok()))
            .collect();
        match nums[..] {
            [x0, y0, x1, y1] if x1 != x0 && y1 != y0 => {
                [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]
            }
            _ => DEFAULT_MEDIABOX,
        }
    }
}

/// Flattened page tree.
#[derive(Debug, Clone)]
pub struct PageTree {
    /// Decrypted document catalog
    pub catalog: PDFDict,
    /// Reference of the catalog object, when indirect
    pub catalog_ref: Option<PDFObjRef>,
    /// Leaves in document order
    pub pages: Vec<PageLeaf>,
    /// Object numbers of interior `/Pages` nodes
    pub interior: Vec<u32>,
}

/// Walk the page tree with an explicit stack.
///
/// Any object met twice is [`PdfError::CyclicPageTree`]; a tree without
/// leaves is [`PdfError::EmptyDocument`].
pub fn walk_page_tree(reader: &SourceReader<'_>) -> Result<PageTree> {
    let root = reader
        .raw()
        .trailer()
        .get("Root")
        .cloned()
        .ok_or_else(|| PdfError::UnreadableContainer("trailer has no /Root".into()))?;
    let catalog_ref = root.as_ref().ok().copied();
    let catalog = reader
        .resolve_dict(&root)?
        .ok_or_else(|| PdfError::UnreadableContainer("document catalog is missing".into()))?;
    let pages_root = catalog
        .get("Pages")
        .cloned()
        .ok_or(PdfError::EmptyDocument)?;

    let mut visited: HashSet<u32> = HashSet::new();
    if let Some(r) = catalog_ref {
        visited.insert(r.objid);
    }
    let mut pages = Vec::new();
    let mut interior = Vec::new();
    let mut stack: Vec<(PDFObject, InheritedNode)> = vec![(pages_root, InheritedNode::default())];

    while let Some((node, inherited)) = stack.pop() {
        let objref = match &node {
            PDFObject::Ref(r) => {
                if !visited.insert(r.objid) {
                    return Err(PdfError::CyclicPageTree(r.objid));
                }
                Some(*r)
            }
            _ => None,
        };
        let dict = match reader.resolve(&node)? {
            PDFObject::Dict(d) => d,
            PDFObject::Null => {
                warn!(objid = ?objref.map(|r| r.objid), "page tree node is missing, skipping");
                continue;
            }
            other => {
                warn!(got = other.type_name(), "page tree node is not a dictionary, skipping");
                continue;
            }
        };

        let is_interior = dict.get("Type").is_some_and(|t| t.is_name("Pages"))
            || (dict.contains_key("Kids") && !dict.get("Type").is_some_and(|t| t.is_name("Page")));
        if is_interior {
            if let Some(r) = objref {
                interior.push(r.objid);
            }
            let child_inherited = inherited.with(&dict);
            let kids = match dict.get("Kids") {
                Some(kids) => reader.resolve(kids)?,
                None => PDFObject::Null,
            };
            if let PDFObject::Array(kids) = kids {
                // Reverse so the first kid is processed first.
                for kid in kids.into_iter().rev() {
                    stack.push((kid, child_inherited.clone()));
                }
            }
        } else {
            let mut attrs = dict;
            attrs.shift_remove("Parent");
            inherited.apply_to(&mut attrs);
            pages.push(PageLeaf { objref, attrs });
        }
    }

    if pages.is_empty() {
        return Err(PdfError::EmptyDocument);
    }
    Ok(PageTree {
        catalog,
        catalog_ref,
        pages,
        interior,
    })
}
