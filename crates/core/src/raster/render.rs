//! Page renderers for the fallback path.
//!
//! [`FillRenderer`] paints the vector path subset of a content stream:
//! construction (`m l c v y h re`), painting (`f F f* B B* b b* S s n`),
//! the graphics state stack (`q Q cm`) and device colours (`g rg k G RG K`).
//! Text, images, shadings and clipping are not drawn.

use image::RgbImage;
use tiny_skia::{Color, FillRule, Paint, Path, PathBuilder, Pixmap, Stroke, Transform};

use crate::error::{PdfError, Result};
use crate::model::objects::PDFObject;
use crate::parser::pdf_parser::{ContentParser, Operation};

/// Largest raster edge in pixels.
pub const MAX_DIMENSION: u32 = 10_000;

/// One page handed to a renderer.
#[derive(Debug, Clone)]
pub struct RenderPage {
    /// Zero-based position in the document
    pub index: usize,
    /// `[x0, y0, x1, y1]` in points
    pub mediabox: [f64; 4],
    /// Decoded content streams, concatenated
    pub content: Vec<u8>,
}

impl RenderPage {
    /// Raster size for `scale` pixels per point.
    pub fn pixel_size(&self, scale: f64) -> (u32, u32) {
        let [x0, y0, x1, y1] = self.mediabox;
        let edge = |len: f64| ((len * scale).ceil() as u32).clamp(1, MAX_DIMENSION);
        (edge(x1 - x0), edge(y1 - y0))
    }
}

/// Turns a page into pixels. Implementations must be usable from several
/// worker threads at once.
pub trait PageRenderer: Send + Sync {
    fn render(&self, page: &RenderPage, scale: f64, background: [u8; 3]) -> Result<RgbImage>;
}

/// Built-in renderer for filled and stroked vector paths, drawn with
/// tiny-skia.
#[derive(Debug, Clone, Copy, Default)]
pub struct FillRenderer;

impl PageRenderer for FillRenderer {
    fn render(&self, page: &RenderPage, scale: f64, background: [u8; 3]) -> Result<RgbImage> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(PdfError::DecodeError(format!("invalid raster scale {scale}")));
        }
        let (width, height) = page.pixel_size(scale);
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            PdfError::DecodeError(format!("cannot allocate a {width}x{height} canvas"))
        })?;
        let [r, g, b] = background;
        pixmap.fill(Color::from_rgba8(r, g, b, 255));

        let [x0, _, _, y1] = page.mediabox;
        // PDF space (y up) to pixel space (y down).
        let base = Transform::from_row(
            scale as f32,
            0.0,
            0.0,
            -scale as f32,
            (-x0 * scale) as f32,
            (y1 * scale) as f32,
        );
        let mut canvas = Canvas {
            pixmap,
            state: GraphicState {
                ctm: base,
                ..GraphicState::default()
            },
            stack: Vec::new(),
            path: PathBuilder::new(),
            path_ctm: base,
            start: None,
            current: None,
        };
        for op in ContentParser::new(&page.content) {
            canvas.execute(&op);
        }
        to_rgb(&canvas.pixmap)
    }
}

/// Copy an opaque pixmap into an RGB buffer.
fn to_rgb(pixmap: &Pixmap) -> Result<RgbImage> {
    let rgb = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    RgbImage::from_raw(pixmap.width(), pixmap.height(), rgb)
        .ok_or_else(|| PdfError::DecodeError("pixmap size mismatch".into()))
}

#[derive(Debug, Clone, Copy)]
struct GraphicState {
    ctm: Transform,
    fill: [u8; 3],
    stroke: [u8; 3],
    line_width: f32,
}

impl Default for GraphicState {
    fn default() -> Self {
        Self {
            ctm: Transform::identity(),
            fill: [0, 0, 0],
            stroke: [0, 0, 0],
            line_width: 1.0,
        }
    }
}

type Point = (f32, f32);

struct Canvas {
    pixmap: Pixmap,
    state: GraphicState,
    stack: Vec<GraphicState>,
    /// Current path in user space
    path: PathBuilder,
    /// CTM in force when the current path was begun
    path_ctm: Transform,
    /// First point of the current subpath
    start: Option<Point>,
    current: Option<Point>,
}

fn nums(operands: &[PDFObject]) -> Vec<f32> {
    operands
        .iter()
        .filter_map(|o| o.as_num().ok())
        .map(|v| v as f32)
        .collect()
}

fn channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn gray(v: f32) -> [u8; 3] {
    [channel(v); 3]
}

fn cmyk(c: f32, m: f32, y: f32, k: f32) -> [u8; 3] {
    [
        channel((1.0 - c) * (1.0 - k)),
        channel((1.0 - m) * (1.0 - k)),
        channel((1.0 - y) * (1.0 - k)),
    ]
}

fn paint_for(color: [u8; 3]) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], 255);
    paint
}

impl Canvas {
    fn execute(&mut self, op: &Operation) {
        let args = nums(&op.operands);
        match (op.operator.as_slice(), args.as_slice()) {
            (b"q", _) => self.stack.push(self.state),
            (b"Q", _) => {
                if let Some(state) = self.stack.pop() {
                    self.state = state;
                }
            }
            (b"cm", &[a, b, c, d, e, f]) => {
                self.state.ctm = self.state.ctm.pre_concat(Transform::from_row(a, b, c, d, e, f));
            }
            (b"w", &[w]) => self.state.line_width = w.max(0.0),

            (b"g", &[v]) => self.state.fill = gray(v),
            (b"G", &[v]) => self.state.stroke = gray(v),
            (b"rg", &[r, g, b]) => self.state.fill = [channel(r), channel(g), channel(b)],
            (b"RG", &[r, g, b]) => self.state.stroke = [channel(r), channel(g), channel(b)],
            (b"k", &[c, m, y, k]) => self.state.fill = cmyk(c, m, y, k),
            (b"K", &[c, m, y, k]) => self.state.stroke = cmyk(c, m, y, k),

            (b"m", &[x, y]) => self.move_to((x, y)),
            (b"l", &[x, y]) => self.line_to((x, y)),
            (b"c", &[x1, y1, x2, y2, x3, y3]) => self.curve_to((x1, y1), (x2, y2), (x3, y3)),
            (b"v", &[x2, y2, x3, y3]) => {
                let start = self.current.unwrap_or((x2, y2));
                self.curve_to(start, (x2, y2), (x3, y3));
            }
            (b"y", &[x1, y1, x3, y3]) => self.curve_to((x1, y1), (x3, y3), (x3, y3)),
            (b"h", _) => self.close(),
            (b"re", &[x, y, w, h]) => {
                self.move_to((x, y));
                self.line_to((x + w, y));
                self.line_to((x + w, y + h));
                self.line_to((x, y + h));
                self.close();
            }

            (b"f" | b"F", _) => self.paint(Some(FillRule::Winding), false),
            (b"f*", _) => self.paint(Some(FillRule::EvenOdd), false),
            (b"B", _) => self.paint(Some(FillRule::Winding), true),
            (b"B*", _) => self.paint(Some(FillRule::EvenOdd), true),
            (b"b", _) => {
                self.close();
                self.paint(Some(FillRule::Winding), true);
            }
            (b"b*", _) => {
                self.close();
                self.paint(Some(FillRule::EvenOdd), true);
            }
            (b"S", _) => self.paint(None, true),
            (b"s", _) => {
                self.close();
                self.paint(None, true);
            }
            (b"n", _) => self.paint(None, false),
            // Clipping, text, images and shadings are not drawn.
            _ => {}
        }
    }

    fn begin_if_empty(&mut self) {
        if self.path.is_empty() {
            self.path_ctm = self.state.ctm;
        }
    }

    fn move_to(&mut self, p: Point) {
        self.begin_if_empty();
        self.path.move_to(p.0, p.1);
        self.start = Some(p);
        self.current = Some(p);
    }

    fn line_to(&mut self, p: Point) {
        if self.current.is_none() {
            self.move_to(p);
            return;
        }
        self.path.line_to(p.0, p.1);
        self.current = Some(p);
    }

    fn curve_to(&mut self, p1: Point, p2: Point, p3: Point) {
        if self.current.is_none() {
            self.move_to(p3);
            return;
        }
        self.path.cubic_to(p1.0, p1.1, p2.0, p2.1, p3.0, p3.1);
        self.current = Some(p3);
    }

    fn close(&mut self) {
        if self.current.is_some() {
            self.path.close();
            self.current = self.start;
        }
    }

    /// Paint and clear the current path.
    fn paint(&mut self, fill: Option<FillRule>, stroke: bool) {
        let builder = std::mem::replace(&mut self.path, PathBuilder::new());
        self.start = None;
        self.current = None;
        let Some(path) = builder.finish() else {
            return;
        };
        if let Some(rule) = fill {
            self.fill(&path, rule);
        }
        if stroke {
            self.stroke(&path);
        }
    }

    fn fill(&mut self, path: &Path, rule: FillRule) {
        let paint = paint_for(self.state.fill);
        self.pixmap.fill_path(path, &paint, rule, self.path_ctm, None);
    }

    fn stroke(&mut self, path: &Path) {
        let paint = paint_for(self.state.stroke);
        // Width 0 is a hairline.
        let stroke = Stroke {
            width: self.state.line_width,
            ..Stroke::default()
        };
        self.pixmap.stroke_path(path, &paint, &stroke, self.path_ctm, None);
    }
}
