//! Fallback rasterizer.
//!
//! When a document cannot be rebuilt structurally, every page is rendered to
//! an RGB image and placed on an otherwise empty page of the same size. The
//! output loses text and vector fidelity but keeps page order and geometry.
//!
//! Pages are rendered in parallel on a rayon pool sized by the
//! [`RasterContext`]; results are put back in page order before assembly.

pub mod render;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::codec::filters::{decode_stream, flate_encode};
use crate::document::page::{PageLeaf, walk_page_tree};
use crate::document::raw::RawDocument;
use crate::document::security::EncryptionState;
use crate::document::source::SourceReader;
use crate::error::{PdfError, Result};
use crate::model::objects::{PDFDict, PDFObjRef, PDFObject, PDFStream};
use crate::rebuild::{NewDocument, first_document_id};
use crate::serialize::format_real;

pub use render::{FillRenderer, PageRenderer, RenderPage};

pub(crate) fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Cooperative cancellation flag shared between a caller and the workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything the rasterizer needs, passed explicitly.
#[derive(Clone)]
pub struct RasterContext {
    /// Pixels per point
    pub scale: f64,
    /// Worker threads; 0 means one per available core
    pub threads: usize,
    /// Canvas colour before painting
    pub background: [u8; 3],
    pub renderer: Arc<dyn PageRenderer>,
    pub cancel: CancelToken,
}

impl Default for RasterContext {
    fn default() -> Self {
        Self {
            scale: 2.0,
            threads: 0,
            background: [255, 255, 255],
            renderer: Arc::new(FillRenderer),
            cancel: CancelToken::new(),
        }
    }
}

impl std::fmt::Debug for RasterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterContext")
            .field("scale", &self.scale)
            .field("threads", &self.threads)
            .field("background", &self.background)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RasterContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the page renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    fn thread_count(&self) -> usize {
        if self.threads == 0 {
            default_thread_count()
        } else {
            self.threads
        }
    }
}

struct RenderedPage {
    mediabox: [f64; 4],
    rotate: i64,
    image: RgbImage,
}

/// Render every page of `raw` and assemble an image-only document.
pub fn rasterize(
    raw: &RawDocument,
    state: &EncryptionState,
    ctx: &RasterContext,
) -> Result<NewDocument> {
    let reader = SourceReader::new(raw, state)?;
    let tree = walk_page_tree(&reader)?;
    let thread_count = ctx.thread_count();
    debug!(pages = tree.pages.len(), threads = thread_count, scale = ctx.scale, "rasterizing");

    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .map_err(|e| PdfError::DecodeError(e.to_string()))?;

    let mut results: Vec<(usize, Result<RenderedPage>)> = pool.install(|| {
        tree.pages
            .par_iter()
            .enumerate()
            .map(|(index, leaf)| (index, render_leaf(&reader, leaf, index, ctx)))
            .collect()
    });
    results.sort_by_key(|(index, _)| *index);
    let pages = results
        .into_iter()
        .map(|(_, page)| page)
        .collect::<Result<Vec<_>>>()?;

    let doc = assemble(raw, pages)?;
    info!(pages = doc.page_count(), "document rasterized");
    Ok(doc)
}

fn render_leaf(
    reader: &SourceReader<'_>,
    leaf: &PageLeaf,
    index: usize,
    ctx: &RasterContext,
) -> Result<RenderedPage> {
    if ctx.cancel.is_cancelled() {
        return Err(PdfError::Cancelled);
    }
    let page = RenderPage {
        index,
        mediabox: leaf.mediabox(reader),
        content: page_content(reader, leaf, index)?,
    };
    let image = ctx.renderer.render(&page, ctx.scale, ctx.background)?;
    let rotate = match leaf.attrs.get("Rotate").map(|r| reader.resolve(r)).transpose()? {
        Some(PDFObject::Int(r)) if r % 90 == 0 => r.rem_euclid(360),
        _ => 0,
    };
    Ok(RenderedPage {
        mediabox: page.mediabox,
        rotate,
        image,
    })
}

/// Decoded `/Contents` of a page, streams joined by newlines.
fn page_content(reader: &SourceReader<'_>, leaf: &PageLeaf, index: usize) -> Result<Vec<u8>> {
    let Some(contents) = leaf.attrs.get("Contents") else {
        return Ok(Vec::new());
    };
    let parts = match reader.resolve(contents)? {
        PDFObject::Array(parts) => parts,
        other => vec![other],
    };
    let mut out = Vec::new();
    for part in &parts {
        if let PDFObject::Stream(stream) = reader.resolve(part)? {
            match decode_stream(&stream) {
                Ok(data) => {
                    out.extend_from_slice(&data);
                    out.push(b'\n');
                }
                Err(e) => warn!(page = index, error = %e, "content stream skipped"),
            }
        }
    }
    Ok(out)
}

fn name(n: &str) -> PDFObject {
    PDFObject::Name(n.into())
}

fn real(n: f64) -> PDFObject {
    if n.fract() == 0.0 {
        PDFObject::Int(n as i64)
    } else {
        PDFObject::Real(n)
    }
}

/// Numbering: 1 catalog, 2 page tree, then the pages, then a content
/// stream and an image for each page.
fn assemble(raw: &RawDocument, pages: Vec<RenderedPage>) -> Result<NewDocument> {
    let count = pages.len() as u32;
    let catalog_ref = PDFObjRef::new(1, 0);
    let pages_ref = PDFObjRef::new(2, 0);
    let page_ref = |i: u32| PDFObjRef::new(3 + i, 0);
    let content_ref = |i: u32| PDFObjRef::new(3 + count + 2 * i, 0);
    let image_ref = |i: u32| PDFObjRef::new(4 + count + 2 * i, 0);

    let mut objects = BTreeMap::new();

    let mut catalog = PDFDict::new();
    catalog.insert("Type".into(), name("Catalog"));
    catalog.insert("Pages".into(), PDFObject::Ref(pages_ref));
    objects.insert(catalog_ref.objid, PDFObject::Dict(catalog));

    let mut tree = PDFDict::new();
    tree.insert("Type".into(), name("Pages"));
    tree.insert(
        "Kids".into(),
        PDFObject::Array((0..count).map(|i| PDFObject::Ref(page_ref(i))).collect()),
    );
    tree.insert("Count".into(), PDFObject::Int(i64::from(count)));
    objects.insert(pages_ref.objid, PDFObject::Dict(tree));

    for (i, page) in (0u32..).zip(pages) {
        let [x0, y0, x1, y1] = page.mediabox;
        let (width, height) = page.image.dimensions();

        let mut image = PDFDict::new();
        image.insert("Type".into(), name("XObject"));
        image.insert("Subtype".into(), name("Image"));
        image.insert("Width".into(), PDFObject::Int(i64::from(width)));
        image.insert("Height".into(), PDFObject::Int(i64::from(height)));
        image.insert("ColorSpace".into(), name("DeviceRGB"));
        image.insert("BitsPerComponent".into(), PDFObject::Int(8));
        image.insert("Filter".into(), name("FlateDecode"));
        let pixels = flate_encode(page.image.as_raw())?;
        objects.insert(
            image_ref(i).objid,
            PDFObject::Stream(Box::new(PDFStream::new(image, pixels))),
        );

        let content = format!(
            "q {} 0 0 {} {} {} cm /Im0 Do Q",
            format_real(x1 - x0),
            format_real(y1 - y0),
            format_real(x0),
            format_real(y0)
        );
        objects.insert(
            content_ref(i).objid,
            PDFObject::Stream(Box::new(PDFStream::new(PDFDict::new(), content.into_bytes()))),
        );

        let mut xobjects = PDFDict::new();
        xobjects.insert("Im0".into(), PDFObject::Ref(image_ref(i)));
        let mut resources = PDFDict::new();
        resources.insert("XObject".into(), PDFObject::Dict(xobjects));

        let mut dict = PDFDict::new();
        dict.insert("Type".into(), name("Page"));
        dict.insert("Parent".into(), PDFObject::Ref(pages_ref));
        dict.insert(
            "MediaBox".into(),
            PDFObject::Array(vec![real(x0), real(y0), real(x1), real(y1)]),
        );
        dict.insert("Resources".into(), PDFObject::Dict(resources));
        dict.insert("Contents".into(), PDFObject::Ref(content_ref(i)));
        if page.rotate != 0 {
            dict.insert("Rotate".into(), PDFObject::Int(page.rotate));
        }
        objects.insert(page_ref(i).objid, PDFObject::Dict(dict));
    }

    Ok(NewDocument {
        objects,
        root: catalog_ref,
        info: None,
        id: first_document_id(raw)?,
        version: raw.version().to_string(),
    })
}
