//! Page rasterization.
//!
//! Only image content is painted: vector text already has exact geometry, so
//! the raster exists to give OCR the pixels of scanned regions. The canvas
//! starts white and every image placement is sampled into it through the
//! page's document-to-raster chain.

use image::{GrayImage, ImageFormat, Luma};
use lopdf::{Dictionary, Document, Object, Stream};

use super::interpreter::{number, resolve, stream_bytes};
use super::{ImagePlacement, PageContent};
use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::geometry::{AffineTransform, CoordinateSpace, Matrix, TransformChain, DOCUMENT_DPI};

/// A rendered page together with the chain that produced it.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// Grayscale pixels, row 0 at the top
    pub image: GrayImage,
    /// Document -> Raster
    pub chain: TransformChain,
    /// Resolution actually used
    pub dpi: u32,
}

impl RasterPage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Resolution for a page of the given displayed size in points.
///
/// The configured dpi is lowered until the pixel count fits `max_pixels`.
pub fn effective_dpi(width_pt: f64, height_pt: f64, config: &RenderConfig) -> u32 {
    let dpi = config.dpi.max(1);
    let w_in = width_pt / DOCUMENT_DPI;
    let h_in = height_pt / DOCUMENT_DPI;
    if !(w_in > 0.0 && h_in > 0.0) || config.max_pixels == 0 {
        return dpi;
    }
    let cap = (config.max_pixels as f64 / (w_in * h_in)).sqrt().floor();
    if cap < dpi as f64 {
        (cap as u32).max(1)
    } else {
        dpi
    }
}

/// Displayed size of a page after applying its `/Rotate`.
pub(crate) fn rotated_size(width: f64, height: f64, rotation: u16) -> (f64, f64) {
    match rotation % 360 {
        90 | 270 => (height, width),
        _ => (width, height),
    }
}

/// Document -> Raster chain for a page: optional rotation, y flip, dpi scale.
pub fn page_chain(width: f64, height: f64, rotation: u16, dpi: u32) -> Result<TransformChain> {
    let doc = CoordinateSpace::Document;
    let mut links = Vec::with_capacity(3);
    let rotate = match rotation % 360 {
        0 => None,
        90 => Some(Matrix::from_pdf(0.0, -1.0, 1.0, 0.0, 0.0, width)),
        180 => Some(Matrix::from_pdf(-1.0, 0.0, 0.0, -1.0, width, height)),
        270 => Some(Matrix::from_pdf(0.0, 1.0, -1.0, 0.0, height, 0.0)),
        other => {
            log::warn!("ignoring non-orthogonal page rotation {}", other);
            None
        }
    };
    if let Some(m) = rotate {
        links.push(AffineTransform::new(m, doc, doc)?);
    }
    let (_, displayed_height) = rotated_size(width, height, rotation);
    links.push(AffineTransform::flip_y(displayed_height, doc)?);
    links.push(AffineTransform::document_to_raster(dpi as f64)?);
    TransformChain::from_links(links)
}

/// Render the images of a page onto a white canvas.
///
/// `load` supplies decoded samples per placement; placements it cannot
/// decode are left white.
pub fn render_page<F>(content: &PageContent, config: &RenderConfig, mut load: F) -> Result<RasterPage>
where
    F: FnMut(&ImagePlacement) -> Result<Option<GrayImage>>,
{
    let (w, h) = rotated_size(content.width, content.height, content.rotation);
    let dpi = effective_dpi(w, h, config);
    let chain = page_chain(content.width, content.height, content.rotation, dpi)?;

    let scale = dpi as f64 / DOCUMENT_DPI;
    let px_w = (w * scale).ceil().max(1.0) as u32;
    let px_h = (h * scale).ceil().max(1.0) as u32;
    let mut canvas = GrayImage::from_pixel(px_w, px_h, Luma([255]));

    for placement in &content.images {
        match load(placement) {
            Ok(Some(image)) => composite(&mut canvas, &image, placement, &chain)?,
            Ok(None) => log::debug!(
                "page {}: image at {:?} has no decodable samples",
                content.number,
                placement.bbox.to_array()
            ),
            Err(e) => log::warn!("page {}: image decode failed: {}", content.number, e),
        }
    }

    Ok(RasterPage {
        image: canvas,
        chain,
        dpi,
    })
}

/// Paint `image` into `canvas` where `placement` puts it.
///
/// Each canvas pixel center inside the placement is mapped back into the
/// image unit square and takes the nearest sample.
pub fn composite(
    canvas: &mut GrayImage,
    image: &GrayImage,
    placement: &ImagePlacement,
    chain: &TransformChain,
) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Ok(());
    }
    let full = placement.matrix.then(chain.matrix());
    let inv = full.inverse().ok_or_else(|| {
        Error::DegenerateTransform("image placement matrix is singular".to_string())
    })?;

    let (x0, y0, x1, y1) = full.map_rect(0.0, 0.0, 1.0, 1.0);
    let clamp = |v: f64, max: u32| v.max(0.0).min(max as f64) as u32;
    let (cx0, cx1) = (clamp(x0.floor(), canvas.width()), clamp(x1.ceil(), canvas.width()));
    let (cy0, cy1) = (clamp(y0.floor(), canvas.height()), clamp(y1.ceil(), canvas.height()));

    let (iw, ih) = (image.width(), image.height());
    for py in cy0..cy1 {
        for px in cx0..cx1 {
            let (u, v) = inv.apply(px as f64 + 0.5, py as f64 + 0.5);
            if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                continue;
            }
            let i = ((u * iw as f64) as u32).min(iw - 1);
            let j = (((1.0 - v) * ih as f64) as u32).min(ih - 1);
            canvas.put_pixel(px, py, *image.get_pixel(i, j));
        }
    }
    Ok(())
}

/// Decode an image XObject or inline image into grayscale.
///
/// Returns `Ok(None)` for encodings that are not supported (JBIG2, CCITT,
/// JPEG 2000). `doc` resolves indirect entries of the image dictionary.
pub fn decode_image_stream(stream: &Stream, doc: Option<&Document>) -> Result<Option<GrayImage>> {
    let dict = &stream.dict;
    let width = entry(doc, dict, b"Width", b"W").and_then(number).unwrap_or(0.0) as u32;
    let height = entry(doc, dict, b"Height", b"H").and_then(number).unwrap_or(0.0) as u32;
    if width == 0 || height == 0 {
        return Ok(None);
    }

    let filters = filter_names(doc, dict);
    let last = filters.last().map(Vec::as_slice);
    match last {
        Some(b"DCTDecode") | Some(b"DCT") => {
            let data = if filters.len() > 1 {
                match stream.decompressed_content() {
                    Ok(data) => data,
                    Err(_) => return Ok(None),
                }
            } else {
                stream.content.clone()
            };
            let decoded = image::load_from_memory_with_format(&data, ImageFormat::Jpeg)?;
            return Ok(Some(decoded.to_luma8()));
        }
        Some(b"JPXDecode") | Some(b"JBIG2Decode") | Some(b"CCITTFaxDecode") | Some(b"CCF") => {
            return Ok(None);
        }
        _ => {}
    }

    let data = if filters.is_empty() {
        stream.content.clone()
    } else {
        match stream.decompressed_content() {
            Ok(data) => data,
            Err(e) => {
                log::debug!("unsupported image filter chain: {}", e);
                return Ok(None);
            }
        }
    };

    let is_mask = matches!(entry(doc, dict, b"ImageMask", b"IM"), Some(Object::Boolean(true)));
    let (color, bpc) = if is_mask {
        (ColorModel::Gray, 1)
    } else {
        let bpc = entry(doc, dict, b"BitsPerComponent", b"BPC")
            .and_then(number)
            .unwrap_or(8.0) as u32;
        let color = entry(doc, dict, b"ColorSpace", b"CS")
            .map(|cs| ColorModel::from_object(doc, cs))
            .unwrap_or(ColorModel::Gray);
        (color, bpc)
    };
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Ok(None);
    }

    let invert = entry(doc, dict, b"Decode", b"D")
        .and_then(|o| o.as_array().ok())
        .and_then(|a| match (a.first().and_then(number), a.get(1).and_then(number)) {
            (Some(lo), Some(hi)) => Some(lo > hi),
            _ => None,
        })
        .unwrap_or(false);

    Ok(Some(unpack_samples(&data, width, height, bpc, &color, invert)))
}

/// Look up `key`, falling back to the inline-image abbreviation.
fn entry<'d>(doc: Option<&'d Document>, dict: &'d Dictionary, key: &[u8], abbr: &[u8]) -> Option<&'d Object> {
    let obj = dict.get(key).or_else(|_| dict.get(abbr)).ok()?;
    Some(match doc {
        Some(doc) => resolve(doc, obj),
        None => obj,
    })
}

fn filter_names(doc: Option<&Document>, dict: &Dictionary) -> Vec<Vec<u8>> {
    match entry(doc, dict, b"Filter", b"F") {
        Some(Object::Name(n)) => vec![n.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|o| match o {
                Object::Name(n) => Some(n.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
    /// Single tint component where 0 is no ink.
    Tint,
    Indexed { base: Box<ColorModel>, palette: Vec<u8> },
}

impl ColorModel {
    fn from_object(doc: Option<&Document>, obj: &Object) -> Self {
        let deref = |o: &Object| -> Object {
            match (doc, o) {
                (Some(doc), Object::Reference(_)) => resolve(doc, o).clone(),
                _ => o.clone(),
            }
        };
        match deref(obj) {
            Object::Name(n) => Self::from_name(&n),
            Object::Array(items) => {
                let family = match items.first() {
                    Some(Object::Name(n)) => n.clone(),
                    _ => return ColorModel::Gray,
                };
                match family.as_slice() {
                    b"ICCBased" => {
                        let n = items
                            .get(1)
                            .map(&deref)
                            .and_then(|o| match o {
                                Object::Stream(s) => s.dict.get(b"N").ok().and_then(number),
                                _ => None,
                            })
                            .unwrap_or(3.0) as u32;
                        match n {
                            1 => ColorModel::Gray,
                            4 => ColorModel::Cmyk,
                            _ => ColorModel::Rgb,
                        }
                    }
                    b"CalGray" => ColorModel::Gray,
                    b"CalRGB" | b"Lab" => ColorModel::Rgb,
                    b"Separation" | b"DeviceN" => ColorModel::Tint,
                    b"Indexed" | b"I" => {
                        let base = items
                            .get(1)
                            .map(|o| ColorModel::from_object(doc, o))
                            .unwrap_or(ColorModel::Rgb);
                        let palette = match items.get(3).map(&deref) {
                            Some(Object::String(bytes, _)) => bytes,
                            Some(Object::Stream(s)) => stream_bytes(&s),
                            _ => Vec::new(),
                        };
                        ColorModel::Indexed {
                            base: Box::new(base),
                            palette,
                        }
                    }
                    _ => ColorModel::Gray,
                }
            }
            _ => ColorModel::Gray,
        }
    }

    fn from_name(name: &[u8]) -> Self {
        match name {
            b"DeviceRGB" | b"RGB" | b"CalRGB" => ColorModel::Rgb,
            b"DeviceCMYK" | b"CMYK" => ColorModel::Cmyk,
            _ => ColorModel::Gray,
        }
    }

    fn components(&self) -> usize {
        match self {
            ColorModel::Gray | ColorModel::Tint | ColorModel::Indexed { .. } => 1,
            ColorModel::Rgb => 3,
            ColorModel::Cmyk => 4,
        }
    }

    /// Luma of one pixel from 8-bit component values.
    fn luma(&self, c: &[u8]) -> u8 {
        match self {
            ColorModel::Gray => c[0],
            ColorModel::Tint => 255 - c[0],
            ColorModel::Rgb => rgb_luma(c[0], c[1], c[2]),
            ColorModel::Cmyk => {
                let k = c[3] as u32;
                let r = 255u32.saturating_sub((c[0] as u32 + k).min(255));
                let g = 255u32.saturating_sub((c[1] as u32 + k).min(255));
                let b = 255u32.saturating_sub((c[2] as u32 + k).min(255));
                rgb_luma(r as u8, g as u8, b as u8)
            }
            ColorModel::Indexed { base, palette } => {
                let n = base.components();
                let start = c[0] as usize * n;
                match palette.get(start..start + n) {
                    Some(entry) => base.luma(entry),
                    None => 255,
                }
            }
        }
    }
}

fn rgb_luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// Unpack packed samples row by row into 8-bit grayscale.
fn unpack_samples(data: &[u8], width: u32, height: u32, bpc: u32, color: &ColorModel, invert: bool) -> GrayImage {
    let comps = color.components();
    let row_bits = width as usize * comps * bpc as usize;
    let row_bytes = row_bits.div_ceil(8);
    let max = ((1u32 << bpc.min(8)) - 1) as f64;
    let indexed = matches!(color, ColorModel::Indexed { .. });

    let mut out = GrayImage::from_pixel(width, height, Luma([255]));
    let mut pixel = vec![0u8; comps];
    for y in 0..height {
        let row_start = y as usize * row_bytes;
        let Some(row) = data.get(row_start..row_start + row_bytes) else {
            break;
        };
        let mut bit = 0usize;
        for x in 0..width {
            for c in pixel.iter_mut() {
                let raw = read_sample(row, bit, bpc);
                bit += bpc as usize;
                *c = if indexed {
                    raw as u8
                } else if bpc == 16 {
                    (raw >> 8) as u8
                } else {
                    (raw as f64 * 255.0 / max).round() as u8
                };
            }
            let mut value = color.luma(&pixel);
            if invert {
                value = 255 - value;
            }
            out.put_pixel(x, y, Luma([value]));
        }
    }
    out
}

fn read_sample(row: &[u8], bit: usize, bpc: u32) -> u32 {
    match bpc {
        8 => row[bit / 8] as u32,
        16 => u16::from_be_bytes([row[bit / 8], row[bit / 8 + 1]]) as u32,
        _ => {
            let byte = row[bit / 8] as u32;
            let shift = 8 - (bit % 8) as u32 - bpc;
            (byte >> shift) & ((1 << bpc) - 1)
        }
    }
}
