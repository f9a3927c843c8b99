//! Content stream interpreter.
//!
//! Walks the operators of a page (and the Form XObjects it draws) with a
//! graphics state stack, producing one vector [`Span`] per text-show
//! operator and one [`ImagePlacement`] per drawn image. Glyph boxes are
//! built in text space and mapped through `Tm x CTM`, so spans come out in
//! document space directly.

use std::collections::HashMap;
use std::sync::Arc;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, Stream};
use unicode_normalization::UnicodeNormalization;

use super::{ImageData, ImagePlacement};
use crate::error::{Error, Result};
use crate::geometry::{BBox, CoordinateSpace, Matrix};
use crate::model::{is_spaceless_script_char, Span};

/// Deepest Form XObject nesting that is followed.
pub const MAX_FORM_DEPTH: usize = 8;

/// Width used when a font carries no metrics (thousandths of an em).
const FALLBACK_GLYPH_WIDTH: f64 = 500.0;

/// `TJ` adjustments larger than this (thousandths of an em) read as a word gap.
const TJ_SPACE_THRESHOLD: f64 = 200.0;

/// Glyph box extent relative to the baseline, in ems.
const DESCENT: f64 = 0.2;
const ASCENT: f64 = 0.8;

/// Interprets content streams of one document.
pub struct ContentInterpreter<'a> {
    doc: &'a Document,
    spans: Vec<Span>,
    images: Vec<ImagePlacement>,
}

/// Extract spans and image placements from a content stream.
///
/// `base` maps the content's user space into page document space, e.g. a
/// translation removing the MediaBox origin.
pub fn interpret_content(
    doc: &Document,
    content: &[u8],
    resources: Option<&Dictionary>,
    base: Matrix,
) -> Result<(Vec<Span>, Vec<ImagePlacement>)> {
    let mut interpreter = ContentInterpreter::new(doc);
    interpreter.run(content, resources, base)?;
    Ok(interpreter.finish())
}

#[derive(Clone)]
struct FontRef<'a> {
    dict: &'a Dictionary,
    metrics: Arc<FontMetrics>,
}

#[derive(Clone)]
struct TextState<'a> {
    char_spacing: f64,
    word_spacing: f64,
    horiz_scale: f64,
    leading: f64,
    rise: f64,
    font: Option<FontRef<'a>>,
    font_size: f64,
}

impl Default for TextState<'_> {
    fn default() -> Self {
        Self {
            char_spacing: 0.0,
            word_spacing: 0.0,
            horiz_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            font: None,
            font_size: 12.0,
        }
    }
}

#[derive(Clone)]
struct GraphicsState<'a> {
    ctm: Matrix,
    text: TextState<'a>,
}

/// Piece of a text-show operand.
enum ShowItem<'o> {
    Bytes(&'o [u8]),
    Adjust(f64),
}

impl<'a> ContentInterpreter<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            spans: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Interpret `content` with the given resources and initial CTM.
    pub fn run(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        ctm: Matrix,
    ) -> Result<()> {
        let state = GraphicsState {
            ctm,
            text: TextState::default(),
        };
        self.run_with_state(content, resources, state, 0)
    }

    /// Spans and images collected so far.
    pub fn finish(self) -> (Vec<Span>, Vec<ImagePlacement>) {
        (self.spans, self.images)
    }

    fn run_with_state(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        mut gs: GraphicsState<'a>,
        depth: usize,
    ) -> Result<()> {
        let content = Content::decode(content).map_err(|e| Error::PdfParse(e.to_string()))?;

        let mut stack: Vec<GraphicsState<'a>> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;

        for op in &content.operations {
            let operands = &op.operands;
            match op.operator.as_str() {
                "q" => stack.push(gs.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        gs = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_operands(operands) {
                        gs.ctm = gs.ctm.multiply(&m);
                    }
                }
                "BT" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                }
                "Tc" => set_number(operands, 0, &mut gs.text.char_spacing),
                "Tw" => set_number(operands, 0, &mut gs.text.word_spacing),
                "TL" => set_number(operands, 0, &mut gs.text.leading),
                "Ts" => set_number(operands, 0, &mut gs.text.rise),
                "Tz" => {
                    if let Some(scale) = operands.first().and_then(number) {
                        gs.text.horiz_scale = scale / 100.0;
                    }
                }
                "Tf" => {
                    if let (Some(Object::Name(name)), Some(size)) =
                        (operands.first(), operands.get(1).and_then(number))
                    {
                        gs.text.font = self.load_font(resources, name);
                        gs.text.font_size = size;
                    }
                }
                "Td" | "TD" => {
                    if let (Some(tx), Some(ty)) = (
                        operands.first().and_then(number),
                        operands.get(1).and_then(number),
                    ) {
                        if op.operator == "TD" {
                            gs.text.leading = -ty;
                        }
                        tlm = tlm.multiply(&Matrix::translate(tx, ty));
                        tm = tlm;
                    }
                }
                "Tm" => {
                    if let Some(m) = matrix_operands(operands) {
                        tlm = m;
                        tm = m;
                    }
                }
                "T*" => {
                    tlm = tlm.multiply(&Matrix::translate(0.0, -gs.text.leading));
                    tm = tlm;
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show(&gs, &mut tm, &[ShowItem::Bytes(bytes)]);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        let items: Vec<ShowItem> = items
                            .iter()
                            .filter_map(|item| match item {
                                Object::String(bytes, _) => Some(ShowItem::Bytes(bytes)),
                                other => number(other).map(ShowItem::Adjust),
                            })
                            .collect();
                        self.show(&gs, &mut tm, &items);
                    }
                }
                "'" | "\"" => {
                    let text_idx = if op.operator == "\"" {
                        set_number(operands, 0, &mut gs.text.word_spacing);
                        set_number(operands, 1, &mut gs.text.char_spacing);
                        2
                    } else {
                        0
                    };
                    tlm = tlm.multiply(&Matrix::translate(0.0, -gs.text.leading));
                    tm = tlm;
                    if let Some(Object::String(bytes, _)) = operands.get(text_idx) {
                        self.show(&gs, &mut tm, &[ShowItem::Bytes(bytes)]);
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        self.draw_xobject(resources, name, &gs, depth);
                    }
                }
                "BI" => self.inline_image(operands, &gs),
                _ => {}
            }
        }
        Ok(())
    }

    /// Emit a span for one text-show operator and advance the text matrix.
    fn show(&mut self, gs: &GraphicsState<'a>, tm: &mut Matrix, items: &[ShowItem]) {
        let ts = &gs.text;
        let fs = ts.font_size;
        let th = ts.horiz_scale;
        let encoding = ts
            .font
            .as_ref()
            .and_then(|f| f.dict.get_font_encoding(self.doc).ok());
        let two_byte = ts.font.as_ref().map(|f| f.metrics.two_byte).unwrap_or(false);

        let mut text = String::new();
        let mut width = 0.0;
        for item in items {
            match item {
                ShowItem::Bytes(bytes) => {
                    let decoded = match &encoding {
                        Some(enc) => Document::decode_text(enc, bytes)
                            .unwrap_or_else(|_| decode_text_simple(bytes)),
                        None => decode_text_simple(bytes),
                    };
                    text.push_str(&decoded);
                    for code in char_codes(bytes, two_byte) {
                        let w0 = ts
                            .font
                            .as_ref()
                            .map(|f| f.metrics.width(code))
                            .unwrap_or(FALLBACK_GLYPH_WIDTH)
                            / 1000.0;
                        let word = if !two_byte && code == 32 {
                            ts.word_spacing
                        } else {
                            0.0
                        };
                        width += (w0 * fs + ts.char_spacing + word) * th;
                    }
                }
                ShowItem::Adjust(n) => {
                    width -= n / 1000.0 * fs * th;
                    if -n > TJ_SPACE_THRESHOLD
                        && !text.is_empty()
                        && !text.ends_with([' ', '\u{00A0}'])
                        && !text.chars().last().map(is_spaceless_script_char).unwrap_or(false)
                    {
                        text.push(' ');
                    }
                }
            }
        }

        let trm = tm.then(&gs.ctm);
        let text: String = text.nfc().collect();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            let (x0, y0, x1, y1) = trm.map_rect(
                0.0,
                ts.rise - DESCENT * fs,
                width.max(0.0),
                ts.rise + ASCENT * fs,
            );
            let bbox = BBox::new(x0, y0, x1, y1, CoordinateSpace::Document);
            if bbox.is_finite() {
                let size = fs * trm.c.hypot(trm.d);
                let font_name = ts
                    .font
                    .as_ref()
                    .map(|f| f.metrics.base_font.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                self.spans
                    .push(Span::vector(trimmed, bbox).with_font(font_name, size));
            }
        }
        *tm = tm.multiply(&Matrix::translate(width, 0.0));
    }

    fn load_font(&self, resources: Option<&'a Dictionary>, name: &[u8]) -> Option<FontRef<'a>> {
        let fonts = resources.and_then(|r| sub_dict(self.doc, r, b"Font"))?;
        let dict = fonts
            .get(name)
            .ok()
            .and_then(|o| resolve(self.doc, o).as_dict().ok())?;
        Some(FontRef {
            dict,
            metrics: Arc::new(FontMetrics::from_dict(self.doc, dict)),
        })
    }

    fn draw_xobject(
        &mut self,
        resources: Option<&'a Dictionary>,
        name: &[u8],
        gs: &GraphicsState<'a>,
        depth: usize,
    ) {
        let Some(xobjects) = resources.and_then(|r| sub_dict(self.doc, r, b"XObject")) else {
            return;
        };
        let Ok(entry) = xobjects.get(name) else {
            log::debug!("XObject /{} not found", String::from_utf8_lossy(name));
            return;
        };
        let id = match entry {
            Object::Reference(id) => Some(*id),
            _ => None,
        };
        let Ok(stream) = resolve(self.doc, entry).as_stream() else {
            return;
        };

        match name_value(&stream.dict, b"Subtype") {
            Some(b"Image") => {
                let data = id.map(ImageData::XObject).unwrap_or(ImageData::Missing);
                self.place_image(gs, data);
            }
            Some(b"Form") => {
                if depth >= MAX_FORM_DEPTH {
                    log::debug!("Form XObject nesting deeper than {}, skipped", MAX_FORM_DEPTH);
                    return;
                }
                let form_matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|o| resolve(self.doc, o).as_array().ok())
                    .and_then(|a| matrix_operands(a))
                    .unwrap_or(Matrix::IDENTITY);
                let form_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|o| resolve(self.doc, o).as_dict().ok())
                    .or(resources);
                let mut child = gs.clone();
                child.ctm = gs.ctm.multiply(&form_matrix);
                let content = stream_bytes(stream);
                if let Err(e) = self.run_with_state(&content, form_resources, child, depth + 1) {
                    log::warn!("Form XObject /{}: {}", String::from_utf8_lossy(name), e);
                }
            }
            _ => {}
        }
    }

    fn inline_image(&mut self, operands: &[Object], gs: &GraphicsState<'a>) {
        let data = operands
            .iter()
            .find_map(|o| match o {
                Object::Stream(s) => Some(ImageData::Inline(Arc::new(s.clone()))),
                _ => None,
            })
            .unwrap_or(ImageData::Missing);
        self.place_image(gs, data);
    }

    fn place_image(&mut self, gs: &GraphicsState<'a>, data: ImageData) {
        let (x0, y0, x1, y1) = gs.ctm.map_rect(0.0, 0.0, 1.0, 1.0);
        let bbox = BBox::new(x0, y0, x1, y1, CoordinateSpace::Document);
        if !bbox.is_finite() || bbox.is_empty() {
            return;
        }
        self.images.push(ImagePlacement {
            bbox,
            matrix: gs.ctm,
            data,
        });
    }
}

/// Glyph widths of one font, in thousandths of an em.
#[derive(Debug, Default)]
struct FontMetrics {
    base_font: String,
    first_char: u32,
    widths: Vec<f64>,
    cid_widths: HashMap<u32, f64>,
    default_width: f64,
    two_byte: bool,
}

impl FontMetrics {
    fn from_dict(doc: &Document, dict: &Dictionary) -> Self {
        let base_font = name_value(dict, b"BaseFont")
            .map(|n| String::from_utf8_lossy(n).to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        if matches!(name_value(dict, b"Subtype"), Some(b"Type0")) {
            let descendant = dict
                .get(b"DescendantFonts")
                .ok()
                .and_then(|o| resolve(doc, o).as_array().ok())
                .and_then(|a| a.first())
                .and_then(|o| resolve(doc, o).as_dict().ok());
            let default_width = descendant
                .and_then(|d| d.get(b"DW").ok())
                .and_then(|o| number(resolve(doc, o)))
                .unwrap_or(1000.0);
            let cid_widths = descendant
                .and_then(|d| d.get(b"W").ok())
                .and_then(|o| resolve(doc, o).as_array().ok())
                .map(|w| parse_cid_widths(doc, w))
                .unwrap_or_default();
            return Self {
                base_font,
                cid_widths,
                default_width,
                two_byte: true,
                ..Default::default()
            };
        }

        let first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(|o| number(resolve(doc, o)))
            .unwrap_or(0.0) as u32;
        let widths: Vec<f64> = dict
            .get(b"Widths")
            .ok()
            .and_then(|o| resolve(doc, o).as_array().ok())
            .map(|a| {
                a.iter()
                    .map(|o| number(resolve(doc, o)).unwrap_or(0.0))
                    .collect()
            })
            .unwrap_or_default();
        let default_width = dict
            .get(b"FontDescriptor")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .and_then(|d| d.get(b"MissingWidth").ok())
            .and_then(|o| number(resolve(doc, o)))
            .filter(|w| *w > 0.0)
            .unwrap_or(FALLBACK_GLYPH_WIDTH);

        Self {
            base_font,
            first_char,
            widths,
            default_width,
            ..Default::default()
        }
    }

    fn width(&self, code: u32) -> f64 {
        if self.two_byte {
            return self
                .cid_widths
                .get(&code)
                .copied()
                .unwrap_or(self.default_width);
        }
        code.checked_sub(self.first_char)
            .and_then(|i| self.widths.get(i as usize))
            .copied()
            .unwrap_or(self.default_width)
    }
}

/// Parse a CIDFont `W` array: `c [w1 w2 ...]` or `c_first c_last w`.
fn parse_cid_widths(doc: &Document, w: &[Object]) -> HashMap<u32, f64> {
    let mut widths = HashMap::new();
    let mut i = 0;
    while i < w.len() {
        let Some(first) = number(resolve(doc, &w[i])) else {
            break;
        };
        let first = first as u32;
        match w.get(i + 1).map(|o| resolve(doc, o)) {
            Some(Object::Array(list)) => {
                for (k, o) in list.iter().enumerate() {
                    if let Some(v) = number(resolve(doc, o)) {
                        widths.insert(first + k as u32, v);
                    }
                }
                i += 2;
            }
            Some(other) => {
                let last = number(other).unwrap_or(first as f64) as u32;
                let v = w.get(i + 2).and_then(|o| number(resolve(doc, o)));
                if let Some(v) = v {
                    for c in first..=last.max(first) {
                        widths.insert(c, v);
                    }
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

fn char_codes(bytes: &[u8], two_byte: bool) -> Vec<u32> {
    if two_byte {
        bytes
            .chunks(2)
            .map(|c| match c {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
                [b] => *b as u32,
                _ => 0,
            })
            .collect()
    } else {
        bytes.iter().map(|&b| b as u32).collect()
    }
}

/// Follow references until a direct object is reached.
pub(crate) fn resolve<'d>(doc: &'d Document, obj: &'d Object) -> &'d Object {
    let mut current = obj;
    for _ in 0..8 {
        match current {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(target) => current = target,
                Err(_) => return current,
            },
            _ => return current,
        }
    }
    current
}

fn sub_dict<'d>(doc: &'d Document, dict: &'d Dictionary, key: &[u8]) -> Option<&'d Dictionary> {
    dict.get(key)
        .ok()
        .and_then(|o| resolve(doc, o).as_dict().ok())
}

fn name_value<'d>(dict: &'d Dictionary, key: &[u8]) -> Option<&'d [u8]> {
    match dict.get(key) {
        Ok(Object::Name(n)) => Some(n.as_slice()),
        _ => None,
    }
}

/// Bytes of a stream, decompressed when it carries a filter.
pub(crate) fn stream_bytes(stream: &Stream) -> Vec<u8> {
    if stream.dict.get(b"Filter").is_ok() {
        match stream.decompressed_content() {
            Ok(data) => return data,
            Err(e) => log::debug!("stream decompression failed: {}", e),
        }
    }
    stream.content.clone()
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn set_number(operands: &[Object], idx: usize, target: &mut f64) {
    if let Some(v) = operands.get(idx).and_then(number) {
        *target = v;
    }
}

fn matrix_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let v: Vec<f64> = operands[..6].iter().filter_map(number).collect();
    match v.as_slice() {
        [a, b, c, d, e, f] => Some(Matrix::from_pdf(*a, *b, *c, *d, *e, *f)),
        _ => None,
    }
}

/// Decoding fallback when a font has no usable encoding: UTF-16BE with
/// BOM, then UTF-8, then Latin-1.
fn decode_text_simple(bytes: &[u8]) -> String {
    if let [0xFE, 0xFF, rest @ ..] = bytes {
        let utf16: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&utf16);
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
