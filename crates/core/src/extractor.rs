use crate::error::IngestError;
use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_HEADER_FOOTER_MARGIN: f32 = 50.0;

/// US Letter height, used when a page carries no MediaBox anywhere in its tree.
const FALLBACK_PAGE_HEIGHT: f32 = 792.0;
const MAX_PARENT_DEPTH: usize = 32;

/// Font resource name to the `/Encoding` it declares, for one page.
pub type FontEncodings<'a> = BTreeMap<Vec<u8>, &'a str>;

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// A run of vertically adjacent lines, positioned in top-down page coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub top: f32,
    pub bottom: f32,
    pub lines: Vec<String>,
}

pub trait PdfExtractor {
    /// Returns one entry per page, numbered from 1 and in document order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Clone, Copy)]
pub struct LopdfExtractor {
    pub margin: f32,
}

impl Default for LopdfExtractor {
    fn default() -> Self {
        Self {
            margin: DEFAULT_HEADER_FOOTER_MARGIN,
        }
    }
}

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let unreadable = |reason: String| IngestError::DocumentUnreadable {
            path: path.display().to_string(),
            reason,
        };

        let document = Document::load(path).map_err(|error| unreadable(error.to_string()))?;
        if document.trailer.get(b"Encrypt").is_ok() {
            return Err(unreadable("document is encrypted".to_string()));
        }

        let mut pages = Vec::new();
        for (page_no, page_id) in document.get_pages() {
            let content = document
                .get_and_decode_page_content(page_id)
                .map_err(|error| unreadable(format!("page {page_no}: {error}")))?;
            let (bottom_edge, top_edge) = page_bounds(&document, page_id);
            let fonts = font_encodings(&document, page_id);
            let blocks = collect_text_blocks(&content.operations, top_edge, &fonts);
            let text = visible_text(&blocks, top_edge - bottom_edge, self.margin);

            debug!(page = page_no, blocks = blocks.len(), chars = text.len(), "extracted page");
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.is_empty() {
            return Err(unreadable("document has no pages".to_string()));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor::default().extract_pages(path)
}

/// Encodings of every font reachable from the page's (inherited) resources.
pub fn font_encodings(document: &Document, page_id: ObjectId) -> FontEncodings<'_> {
    document
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, font.get_font_encoding()))
        .collect()
}

/// Joins the lines of every block outside the header/footer bands.
pub fn visible_text(blocks: &[TextBlock], page_height: f32, margin: f32) -> String {
    blocks
        .iter()
        .filter(|block| !(block.top < margin || block.bottom > page_height - margin))
        .flat_map(|block| block.lines.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Walks a page's content operations and groups shown text into blocks.
///
/// A text object is split wherever the gap to the next line exceeds a line
/// height, so a footer drawn in the same `BT ... ET` as the body gets its own
/// block. Tracks the text matrix only; the current transformation matrix
/// (`cm`) is ignored, which is accurate for the common unscaled page layout.
pub fn collect_text_blocks(
    operations: &[Operation],
    page_top: f32,
    fonts: &FontEncodings<'_>,
) -> Vec<TextBlock> {
    let mut state = TextState::default();
    let mut blocks = Vec::new();
    let mut encoding: Option<&str> = None;

    for operation in operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "BT" => state.begin(),
            "ET" => blocks.extend(state.end(page_top)),
            "Tf" => {
                encoding = operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| fonts.get(name))
                    .copied();
                if let Some(size) = operands.get(1).and_then(number) {
                    state.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    state.leading = leading;
                }
            }
            "Td" | "TD" => {
                let ty = operands.get(1).and_then(number).unwrap_or(0.0);
                if operation.operator == "TD" {
                    state.leading = -ty;
                }
                state.translate(ty);
            }
            "Tm" => {
                let scale = operands.get(3).and_then(number).unwrap_or(1.0);
                let y = operands.get(5).and_then(number).unwrap_or(0.0);
                state.set_matrix(scale, y);
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(text) = operands.first().and_then(|o| string_operand(o, encoding)) {
                    state.show(&text);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let text = adjusted_text(items, encoding);
                    state.show(&text);
                }
            }
            "'" => {
                state.next_line();
                if let Some(text) = operands.first().and_then(|o| string_operand(o, encoding)) {
                    state.show(&text);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(text) = operands.get(2).and_then(|o| string_operand(o, encoding)) {
                    state.show(&text);
                }
            }
            _ => {}
        }
    }

    blocks.extend(state.end(page_top));
    blocks
}

#[derive(Debug)]
struct ShownLine {
    text: String,
    low: f32,
    high: f32,
}

#[derive(Debug)]
struct TextState {
    in_block: bool,
    font_size: f32,
    leading: f32,
    scale: f32,
    line_y: f32,
    line_low: f32,
    line_high: f32,
    lines: Vec<ShownLine>,
    current: String,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            in_block: false,
            font_size: 12.0,
            leading: 0.0,
            scale: 1.0,
            line_y: 0.0,
            line_low: f32::MAX,
            line_high: f32::MIN,
            lines: Vec::new(),
            current: String::new(),
        }
    }
}

impl TextState {
    fn begin(&mut self) {
        self.in_block = true;
        self.scale = 1.0;
        self.line_y = 0.0;
        self.line_low = f32::MAX;
        self.line_high = f32::MIN;
        self.lines.clear();
        self.current.clear();
    }

    /// Closes the text object, splitting its lines at vertical gaps.
    fn end(&mut self, page_top: f32) -> Vec<TextBlock> {
        if !self.in_block {
            return Vec::new();
        }
        self.in_block = false;
        self.break_line();

        let mut blocks: Vec<TextBlock> = Vec::new();
        let mut previous: Option<(f32, f32)> = None;
        for line in self.lines.drain(..) {
            let top = page_top - line.high;
            let bottom = page_top - line.low;
            let adjacent = previous.is_some_and(|(above_top, above_bottom)| {
                let height = (bottom - top).max(above_bottom - above_top);
                bottom > above_top && top - above_bottom <= height
            });
            previous = Some((top, bottom));

            match blocks.last_mut() {
                Some(block) if adjacent => {
                    block.top = block.top.min(top);
                    block.bottom = block.bottom.max(bottom);
                    block.lines.push(line.text);
                }
                _ => blocks.push(TextBlock {
                    top,
                    bottom,
                    lines: vec![line.text],
                }),
            }
        }
        blocks
    }

    fn translate(&mut self, ty: f32) {
        if ty.abs() > f32::EPSILON {
            self.break_line();
            self.line_y += ty * self.scale;
        } else if !self.current.is_empty() && !self.current.ends_with(' ') {
            self.current.push(' ');
        }
    }

    fn set_matrix(&mut self, scale: f32, y: f32) {
        if (y - self.line_y).abs() > f32::EPSILON {
            self.break_line();
        }
        self.scale = if scale.abs() > f32::EPSILON { scale.abs() } else { 1.0 };
        self.line_y = y;
    }

    fn next_line(&mut self) {
        self.break_line();
        self.line_y -= self.leading * self.scale;
    }

    fn show(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.in_block {
            self.begin();
        }
        let height = self.font_size.abs() * self.scale;
        self.line_low = self.line_low.min(self.line_y);
        self.line_high = self.line_high.max(self.line_y + height);
        self.current.push_str(text);
    }

    fn break_line(&mut self) {
        let line = self.current.trim_end();
        if !line.trim().is_empty() {
            self.lines.push(ShownLine {
                text: line.to_string(),
                low: self.line_low,
                high: self.line_high,
            });
        }
        self.current.clear();
        self.line_low = f32::MAX;
        self.line_high = f32::MIN;
    }
}

fn adjusted_text(items: &[Object], encoding: Option<&str>) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes, encoding)),
            other => {
                if number(other).is_some_and(|offset| offset < -200.0) && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
        }
    }
    text
}

fn string_operand(object: &Object, encoding: Option<&str>) -> Option<String> {
    match object {
        Object::String(bytes, _) => Some(decode_pdf_string(bytes, encoding)),
        _ => None,
    }
}

/// UTF-16BE when BOM-prefixed, otherwise through the font's simple encoding
/// (`StandardEncoding` when none is known).
///
/// `Identity-*` fonts show glyph ids that only a ToUnicode CMap can map; they
/// decode to nothing rather than to mojibake.
pub fn decode_pdf_string(bytes: &[u8], encoding: Option<&str>) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units = rest
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect::<Vec<_>>();
        return String::from_utf16_lossy(&units);
    }

    match encoding {
        Some(name) if name.starts_with("Identity-") => String::new(),
        _ => Document::decode_text(encoding, bytes),
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value as f32),
        _ => None,
    }
}

/// Returns the (bottom, top) edges of the page's MediaBox, following `Parent`.
fn page_bounds(document: &Document, page_id: ObjectId) -> (f32, f32) {
    let mut current = document.get_dictionary(page_id).ok();

    for _ in 0..MAX_PARENT_DEPTH {
        let Some(dictionary) = current else {
            break;
        };
        if let Some(bounds) = media_box(document, dictionary) {
            return bounds;
        }
        current = match dictionary.get(b"Parent") {
            Ok(Object::Reference(parent)) => document.get_dictionary(*parent).ok(),
            _ => None,
        };
    }

    (0.0, FALLBACK_PAGE_HEIGHT)
}

fn media_box(document: &Document, dictionary: &Dictionary) -> Option<(f32, f32)> {
    let object = dictionary.get(b"MediaBox").ok()?;
    let object = match object {
        Object::Reference(id) => document.get_object(*id).ok()?,
        other => other,
    };
    let Object::Array(values) = object else {
        return None;
    };
    let lower = values.get(1).and_then(number)?;
    let upper = values.get(3).and_then(number)?;
    Some((lower.min(upper), lower.max(upper)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Content;
    use lopdf::{dictionary, Stream, StringFormat};
    use tempfile::tempdir;

    fn text_at(y: i64, text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
            ),
            Operation::new("Td", vec![Object::Integer(72), Object::Integer(y)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    fn write_pdf(path: &Path, pages: &[Vec<Operation>]) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for operations in pages {
            let content = Content {
                operations: operations.clone(),
            };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().expect("content should encode"),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).expect("pdf should save");
    }

    #[test]
    fn header_and_footer_blocks_are_dropped() {
        let blocks = vec![
            TextBlock {
                top: 20.0,
                bottom: 32.0,
                lines: vec!["Running header".to_string()],
            },
            TextBlock {
                top: 300.0,
                bottom: 340.0,
                lines: vec!["Body line one".to_string(), "Body line two".to_string()],
            },
            TextBlock {
                top: 770.0,
                bottom: 782.0,
                lines: vec!["Page 4".to_string()],
            },
        ];

        assert_eq!(
            visible_text(&blocks, 792.0, 50.0),
            "Body line one\nBody line two"
        );
    }

    #[test]
    fn blocks_track_vertical_extent_from_text_matrix() {
        let mut operations = text_at(700, "Hello");
        operations.insert(4, Operation::new("T*", vec![]));
        operations.insert(1, Operation::new("TL", vec![Object::Integer(14)]));
        operations.insert(6, Operation::new("Tj", vec![Object::string_literal("World")]));

        let blocks = collect_text_blocks(&operations, 842.0, &FontEncodings::new());

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].lines, vec!["Hello", "World"]);
        assert_eq!(blocks[0].top, 842.0 - 712.0);
        assert_eq!(blocks[0].bottom, 842.0 - 686.0);
    }

    #[test]
    fn kerned_arrays_insert_spaces_for_wide_gaps() {
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Grounded"),
                    Object::Integer(-250),
                    Object::string_literal("answers"),
                    Object::Integer(-20),
                    Object::string_literal("!"),
                ])],
            ),
            Operation::new("ET", vec![]),
        ];

        let blocks = collect_text_blocks(&operations, 792.0, &FontEncodings::new());
        assert_eq!(blocks[0].lines, vec!["Grounded answers!"]);
    }

    #[test]
    fn footer_in_the_body_text_object_gets_its_own_block() {
        let operations = vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
            ),
            Operation::new("Td", vec![Object::Integer(72), Object::Integer(400)]),
            Operation::new("Tj", vec![Object::string_literal("Revenue grew twelve percent.")]),
            Operation::new("Td", vec![Object::Integer(0), Object::Integer(-380)]),
            Operation::new("Tj", vec![Object::string_literal("Page 1")]),
            Operation::new("ET", vec![]),
        ];

        let blocks = collect_text_blocks(&operations, 792.0, &FontEncodings::new());

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].lines, vec!["Page 1"]);
        assert_eq!(
            visible_text(&blocks, 792.0, 50.0),
            "Revenue grew twelve percent."
        );
    }

    #[test]
    fn utf16_strings_are_decoded() {
        let bytes = [0xFE, 0xFF, 0x00, 0x48, 0x00, 0x69];
        assert_eq!(decode_pdf_string(&bytes, None), "Hi");
        assert_eq!(decode_pdf_string(&bytes, Some("WinAnsiEncoding")), "Hi");
        assert_eq!(decode_pdf_string(b"plain", None), "plain");
    }

    #[test]
    fn simple_font_encodings_are_honoured() {
        let bytes = b"2019\x962020 well\x97known";
        assert_eq!(
            decode_pdf_string(bytes, Some("WinAnsiEncoding")),
            "2019\u{2013}2020 well\u{2014}known"
        );
        assert_eq!(decode_pdf_string(&[0x00, 0x24], Some("Identity-H")), "");
    }

    #[test]
    fn page_fonts_select_the_decoding() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("fiscal.pdf");
        let mut page = text_at(400, "");
        page[3] = Operation::new(
            "Tj",
            vec![Object::String(
                b"fiscal 2019\x962020 was a well\x97known year".to_vec(),
                StringFormat::Literal,
            )],
        );
        write_pdf(&path, &[page]);

        let pages = extract_page_texts(&path)?;

        assert_eq!(
            pages[0].text,
            "fiscal 2019\u{2013}2020 was a well\u{2014}known year"
        );
        Ok(())
    }

    #[test]
    fn single_text_object_page_keeps_body_between_header_and_footer(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("single.pdf");
        let page = vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
            ),
            Operation::new("Td", vec![Object::Integer(72), Object::Integer(800)]),
            Operation::new("Tj", vec![Object::string_literal("ACME Annual Report")]),
            Operation::new("Td", vec![Object::Integer(0), Object::Integer(-400)]),
            Operation::new("Tj", vec![Object::string_literal("Revenue grew twelve percent.")]),
            Operation::new("Td", vec![Object::Integer(0), Object::Integer(-380)]),
            Operation::new("Tj", vec![Object::string_literal("Page 1")]),
            Operation::new("ET", vec![]),
        ];
        write_pdf(&path, &[page]);

        let pages = extract_page_texts(&path)?;

        assert_eq!(pages[0].text, "Revenue grew twelve percent.");
        Ok(())
    }

    #[test]
    fn every_page_is_returned_even_when_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("report.pdf");
        let mut first = text_at(800, "ACME Annual Report");
        first.extend(text_at(400, "Revenue grew twelve percent."));
        first.extend(text_at(20, "Page 1"));
        let only_footer = text_at(20, "Page 2");
        let third = text_at(500, "Costs fell three percent.");
        write_pdf(&path, &[first, only_footer, third]);

        let pages = extract_page_texts(&path)?;

        let numbers = pages.iter().map(|page| page.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(pages[0].text, "Revenue grew twelve percent.");
        assert_eq!(pages[1].text, "");
        assert_eq!(pages[2].text, "Costs fell three percent.");
        Ok(())
    }

    #[test]
    fn corrupt_files_are_unreadable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = extract_page_texts(&path);
        assert!(matches!(
            result,
            Err(IngestError::DocumentUnreadable { .. })
        ));
        Ok(())
    }

    #[test]
    fn encrypted_files_are_unreadable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("locked.pdf");
        write_pdf(&path, &[text_at(400, "Confidential figures.")]);

        let mut doc = Document::load(&path)?;
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1,
            "R" => 2,
            "O" => Object::string_literal("owner"),
            "U" => Object::string_literal("user"),
            "P" => -4,
        });
        doc.trailer.set("Encrypt", encrypt_id);
        doc.save(&path)?;

        let result = extract_page_texts(&path);
        assert!(matches!(
            result,
            Err(IngestError::DocumentUnreadable { ref reason, .. }) if reason.contains("encrypted")
        ));
        Ok(())
    }
}
