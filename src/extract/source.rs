//! Page sources.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use image::GrayImage;
use lopdf::{Dictionary, Document as LopdfDocument, Object, ObjectId};

use super::interpreter::{interpret_content, number, resolve, stream_bytes};
use super::{decode_image_stream, ImageData, ImagePlacement, PageContent, SourcePage};
use crate::config::PageSelection;
use crate::detect::{detect_format_from_bytes, detect_format_from_path};
use crate::error::{Error, Result};
use crate::geometry::{BBox, Matrix};
use crate::model::{Metadata, Span};

/// US Letter, used when a page has no usable MediaBox.
const DEFAULT_PAGE_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Attribute inheritance depth through the page tree.
const MAX_TREE_DEPTH: usize = 32;

/// A PDF document read with lopdf.
///
/// The parsed document is shared with the pages it yields, so pages can
/// move to worker threads while iteration continues.
pub struct LopdfSource {
    doc: Arc<LopdfDocument>,
    pages: BTreeMap<u32, ObjectId>,
    selection: PageSelection,
}

impl LopdfSource {
    /// Open a PDF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        detect_format_from_path(path)?;
        let doc = LopdfDocument::load(path)?;
        Ok(Self::from_document(doc))
    }

    /// Parse a PDF from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        detect_format_from_bytes(data)?;
        let doc = LopdfDocument::load_mem(data)?;
        Ok(Self::from_document(doc))
    }

    /// Parse a PDF from a reader.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Wrap an already loaded document.
    pub fn from_document(doc: LopdfDocument) -> Self {
        let pages = doc.get_pages();
        Self {
            doc: Arc::new(doc),
            pages,
            selection: PageSelection::All,
        }
    }

    /// Restrict iteration to the selected pages.
    pub fn with_pages(mut self, selection: PageSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Total number of pages in the document.
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Page numbers that iteration will yield, ascending.
    pub fn selected_pages(&self) -> Vec<u32> {
        self.pages
            .keys()
            .copied()
            .filter(|n| self.selection.includes(*n))
            .collect()
    }

    /// Document information dictionary.
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::with_version(self.doc.version.to_string());
        metadata.page_count = self.page_count();
        metadata.encrypted = self.doc.is_encrypted();

        let info = self
            .doc
            .trailer
            .get(b"Info")
            .ok()
            .and_then(|o| resolve(&self.doc, o).as_dict().ok());
        if let Some(info) = info {
            metadata.title = info_string(info, b"Title");
            metadata.author = info_string(info, b"Author");
            metadata.subject = info_string(info, b"Subject");
            metadata.keywords = info_string(info, b"Keywords");
            metadata.creator = info_string(info, b"Creator");
            metadata.producer = info_string(info, b"Producer");
            metadata.created = info_string(info, b"CreationDate").and_then(|d| parse_pdf_date(&d));
            metadata.modified = info_string(info, b"ModDate").and_then(|d| parse_pdf_date(&d));
        }
        metadata
    }

    /// A single page by number (1-indexed).
    pub fn page(&self, number: u32) -> Result<LopdfPage> {
        let id = self
            .pages
            .get(&number)
            .ok_or(Error::PageOutOfRange(number, self.page_count()))?;
        LopdfPage::new(Arc::clone(&self.doc), number, *id)
    }

    /// Iterate over the selected pages.
    pub fn pages(&self) -> LopdfPages {
        let ids: Vec<(u32, ObjectId)> = self
            .pages
            .iter()
            .filter(|(n, _)| self.selection.includes(**n))
            .map(|(n, id)| (*n, *id))
            .collect();
        LopdfPages {
            doc: Arc::clone(&self.doc),
            ids: ids.into_iter(),
        }
    }
}

impl IntoIterator for LopdfSource {
    type Item = Result<LopdfPage>;
    type IntoIter = LopdfPages;

    fn into_iter(self) -> Self::IntoIter {
        self.pages()
    }
}

impl IntoIterator for &LopdfSource {
    type Item = Result<LopdfPage>;
    type IntoIter = LopdfPages;

    fn into_iter(self) -> Self::IntoIter {
        self.pages()
    }
}

/// Lazy iterator over the pages of a [`LopdfSource`].
pub struct LopdfPages {
    doc: Arc<LopdfDocument>,
    ids: std::vec::IntoIter<(u32, ObjectId)>,
}

impl Iterator for LopdfPages {
    type Item = Result<LopdfPage>;

    fn next(&mut self) -> Option<Self::Item> {
        let (number, id) = self.ids.next()?;
        Some(LopdfPage::new(Arc::clone(&self.doc), number, id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

/// One page of a lopdf document.
pub struct LopdfPage {
    doc: Arc<LopdfDocument>,
    number: u32,
    id: ObjectId,
    origin: (f64, f64),
    width: f64,
    height: f64,
    rotation: u16,
}

impl LopdfPage {
    fn new(doc: Arc<LopdfDocument>, page_number: u32, id: ObjectId) -> Result<Self> {
        let dict = doc
            .get_dictionary(id)
            .map_err(|e| Error::page(page_number, e.to_string()))?;

        let page_box = inherited(&doc, dict, b"CropBox")
            .or_else(|| inherited(&doc, dict, b"MediaBox"))
            .and_then(rect_from_object)
            .unwrap_or(DEFAULT_PAGE_BOX);
        let rotation = inherited(&doc, dict, b"Rotate")
            .and_then(number)
            .map(|r| normalize_rotation(r as i64))
            .unwrap_or(0);

        Ok(Self {
            number: page_number,
            id,
            origin: (page_box[0], page_box[1]),
            width: page_box[2] - page_box[0],
            height: page_box[3] - page_box[1],
            rotation,
            doc,
        })
    }

    /// Page size in points, before rotation.
    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn rotation(&self) -> u16 {
        self.rotation
    }

    fn content_bytes(&self, dict: &Dictionary) -> Result<Vec<u8>> {
        let Ok(contents) = dict.get(b"Contents") else {
            return Ok(Vec::new());
        };
        match resolve(&self.doc, contents) {
            Object::Stream(stream) => Ok(stream_bytes(stream)),
            Object::Array(parts) => {
                let mut content = Vec::new();
                for part in parts {
                    if let Object::Stream(stream) = resolve(&self.doc, part) {
                        content.extend_from_slice(&stream_bytes(stream));
                        content.push(b' ');
                    }
                }
                Ok(content)
            }
            _ => Err(Error::page(self.number, "invalid content stream")),
        }
    }
}

impl SourcePage for LopdfPage {
    fn number(&self) -> u32 {
        self.number
    }

    fn extract(&self) -> Result<PageContent> {
        let dict = self
            .doc
            .get_dictionary(self.id)
            .map_err(|e| Error::page(self.number, e.to_string()))?;
        let resources = inherited(&self.doc, dict, b"Resources").and_then(|o| o.as_dict().ok());
        let content = self.content_bytes(dict)?;

        let base = Matrix::translate(-self.origin.0, -self.origin.1);
        let (spans, images) = interpret_content(&self.doc, &content, resources, base)
            .map_err(|e| Error::page(self.number, e.to_string()))?;

        log::debug!(
            "page {}: {} spans, {} images",
            self.number,
            spans.len(),
            images.len()
        );

        Ok(PageContent {
            number: self.number,
            width: self.width,
            height: self.height,
            rotation: self.rotation,
            spans,
            images,
        })
    }

    fn load_image(&self, placement: &ImagePlacement) -> Result<Option<GrayImage>> {
        match &placement.data {
            ImageData::XObject(id) => {
                let stream = self.doc.get_object(*id)?.as_stream()?;
                decode_image_stream(stream, Some(&self.doc))
            }
            ImageData::Inline(stream) => decode_image_stream(stream, Some(&self.doc)),
            ImageData::Decoded(image) => Ok(Some(image.as_ref().clone())),
            ImageData::Missing => Ok(None),
        }
    }
}

/// A page whose content is already in memory.
///
/// Useful for callers with their own PDF reader and for tests.
#[derive(Debug, Clone)]
pub struct MemoryPage {
    content: PageContent,
}

impl MemoryPage {
    pub fn new(number: u32, width: f64, height: f64) -> Self {
        Self {
            content: PageContent::new(number, width, height),
        }
    }

    pub fn from_content(content: PageContent) -> Self {
        Self { content }
    }

    pub fn with_rotation(mut self, rotation: u16) -> Self {
        self.content.rotation = normalize_rotation(rotation as i64);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.content.spans.push(span);
        self
    }

    /// Add an image stretched over `bbox` (document space).
    pub fn with_image(mut self, bbox: BBox, image: GrayImage) -> Self {
        self.content
            .images
            .push(ImagePlacement::filling(bbox, ImageData::Decoded(Arc::new(image))));
        self
    }

    pub fn content(&self) -> &PageContent {
        &self.content
    }
}

impl SourcePage for MemoryPage {
    fn number(&self) -> u32 {
        self.content.number
    }

    fn extract(&self) -> Result<PageContent> {
        Ok(self.content.clone())
    }
}

/// Look up a page attribute, following `/Parent` for inheritable keys.
fn inherited<'d>(doc: &'d LopdfDocument, page: &'d Dictionary, key: &[u8]) -> Option<&'d Object> {
    let mut dict = page;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = dict.get(key) {
            return Some(resolve(doc, value));
        }
        dict = dict
            .get(b"Parent")
            .ok()
            .and_then(|p| resolve(doc, p).as_dict().ok())?;
    }
    None
}

fn rect_from_object(obj: &Object) -> Option<[f64; 4]> {
    let values: Vec<f64> = obj.as_array().ok()?.iter().filter_map(number).collect();
    match values.as_slice() {
        [x0, y0, x1, y1] if x0 != x1 && y0 != y1 => {
            Some([x0.min(*x1), y0.min(*y1), x0.max(*x1), y0.max(*y1)])
        }
        _ => None,
    }
}

fn normalize_rotation(rotation: i64) -> u16 {
    let r = rotation.rem_euclid(360);
    if r % 90 == 0 {
        r as u16
    } else {
        log::warn!("ignoring /Rotate {} (not a multiple of 90)", rotation);
        0
    }
}

fn info_string(dict: &Dictionary, key: &[u8]) -> Option<String> {
    let value = match dict.get(key).ok()? {
        Object::String(bytes, _) => match bytes.as_slice() {
            [0xFE, 0xFF, rest @ ..] => {
                let utf16: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&utf16).ok()?
            }
            _ => String::from_utf8(bytes.clone())
                .unwrap_or_else(|_| bytes.iter().map(|&b| b as char).collect()),
        },
        Object::Name(bytes) => String::from_utf8(bytes.clone()).ok()?,
        _ => return None,
    };
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Parse a PDF date string (`D:YYYYMMDDHHmmSSOHH'mm'`).
fn parse_pdf_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);
    if s.len() < 4 {
        return None;
    }

    let field = |range: std::ops::Range<usize>, default: u32| {
        s.get(range)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(default)
    };
    let year: i32 = s.get(0..4)?.parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(4..6, 1), field(6..8, 1))?
        .and_hms_opt(field(8..10, 0), field(10..12, 0), field(12..14, 0))?;

    let offset_secs = match s.get(14..15) {
        Some(sign @ ("+" | "-")) => {
            let hours = field(15..17, 0) as i32;
            let minutes = s
                .get(17..)
                .map(|rest| rest.trim_start_matches('\''))
                .and_then(|rest| rest.get(0..2))
                .and_then(|m| m.parse::<i32>().ok())
                .unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == "-" {
                -secs
            } else {
                secs
            }
        }
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream};

    /// Two pages; the first carries text, the second an image and /Rotate 90.
    /// Resources and MediaBox live on the page tree node.
    fn sample_pdf() -> Vec<u8> {
        let mut doc = LopdfDocument::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 2,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0, 0, 0, 0],
        ));
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Im1" => image_id },
        });

        let text = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![110.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal("Hello World")]),
                Operation::new("ET", vec![]),
            ],
        };
        let image = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![200.into(), 0.into(), 0.into(), 100.into(), 100.into(), 100.into()]),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let text_id = doc.add_object(Stream::new(dictionary! {}, text.encode().unwrap()));
        let image_content_id = doc.add_object(Stream::new(dictionary! {}, image.encode().unwrap()));

        let page1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => text_id,
        });
        let page2 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => image_content_id,
            "Rotate" => 90,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page1.into(), page2.into()],
            "Count" => 2,
            "Resources" => resources_id,
            "MediaBox" => vec![10.into(), 10.into(), 622.into(), 802.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        let info_id = doc.add_object(dictionary! {
            "Title" => Object::string_literal("Quarterly Report"),
            "CreationDate" => Object::string_literal("D:20240115103045+02'00'"),
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_metadata() {
        let source = LopdfSource::from_bytes(&sample_pdf()).unwrap();
        let metadata = source.metadata();
        assert_eq!(metadata.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(metadata.page_count, 2);
        assert_eq!(metadata.pdf_version, "1.5");
        let created = metadata.created.unwrap();
        assert_eq!(created.year(), 2024);
        assert_eq!(created.hour(), 8);
    }

    #[test]
    fn test_page_iteration_and_selection() {
        let source = LopdfSource::from_bytes(&sample_pdf()).unwrap();
        let numbers: Vec<u32> = source
            .pages()
            .map(|p| p.unwrap().number())
            .collect();
        assert_eq!(numbers, vec![1, 2]);

        let source = source.with_pages(PageSelection::Pages(vec![2]));
        assert_eq!(source.selected_pages(), vec![2]);
        let pages: Vec<_> = source.into_iter().collect();
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn test_extract_with_inherited_resources() {
        let source = LopdfSource::from_bytes(&sample_pdf()).unwrap();
        let page = source.page(1).unwrap();
        assert_eq!(page.size(), (612.0, 792.0));
        let content = page.extract().unwrap();
        assert_eq!(content.spans.len(), 1);
        assert_eq!(content.spans[0].text(), "Hello World");
        // MediaBox origin (10, 10) is removed.
        assert!((content.spans[0].bbox().min_x - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotated_page_image() {
        let source = LopdfSource::from_bytes(&sample_pdf()).unwrap();
        let page = source.page(2).unwrap();
        assert_eq!(page.rotation(), 90);
        let content = page.extract().unwrap();
        assert_eq!(content.images.len(), 1);
        assert_eq!(content.images[0].bbox.to_array(), [90.0, 90.0, 290.0, 190.0]);
        let image = page.load_image(&content.images[0]).unwrap().unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_page_out_of_range() {
        let source = LopdfSource::from_bytes(&sample_pdf()).unwrap();
        assert!(matches!(source.page(5), Err(Error::PageOutOfRange(5, 2))));
    }

    #[test]
    fn test_rejects_non_pdf() {
        assert!(matches!(
            LopdfSource::from_bytes(b"GIF89a not a pdf"),
            Err(Error::UnknownFormat)
        ));
    }

    #[test]
    fn test_memory_page() {
        let page = MemoryPage::new(3, 612.0, 792.0)
            .with_rotation(270)
            .with_image(
                BBox::new(0.0, 0.0, 10.0, 10.0, crate::geometry::CoordinateSpace::Document),
                GrayImage::new(1, 1),
            );
        assert_eq!(page.number(), 3);
        let content = page.extract().unwrap();
        assert_eq!(content.images.len(), 1);
        assert!(page.load_image(&content.images[0]).unwrap().is_some());
    }

    #[test]
    fn test_parse_pdf_date() {
        let date = parse_pdf_date("D:20240115103045").unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2024, 1, 15));
        assert_eq!(date.hour(), 10);

        let date = parse_pdf_date("D:2024").unwrap();
        assert_eq!((date.month(), date.day()), (1, 1));

        let date = parse_pdf_date("D:20240115103045-05'30'").unwrap();
        assert_eq!((date.hour(), date.minute()), (16, 0));

        assert!(parse_pdf_date("garbage").is_none());
    }

    #[test]
    fn test_normalize_rotation() {
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(45), 0);
    }
}
