use encoding_rs::WINDOWS_1252;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::DocumentError;

/// A4 portrait in points
const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
/// Baseline origin of the rendered line
const TEXT_X: i64 = 50;
const TEXT_Y: i64 = 800;
const FONT_SIZE: i64 = 12;

/// Single-page PDF with `text` drawn on one line at a fixed position.
pub fn render_text_pdf(text: &str) -> Result<Vec<u8>, DocumentError> {
    build_pdf(&[text])
}

/// One page per entry, each holding one line of Helvetica text.
pub(crate) fn build_pdf(pages: &[&str]) -> Result<Vec<u8>, DocumentError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]),
                Operation::new("Td", vec![TEXT_X.into(), TEXT_Y.into()]),
                Operation::new("Tj", vec![Object::string_literal(encode_win_ansi(text))]),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| DocumentError::PdfWrite(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| DocumentError::PdfWrite(e.to_string()))?;
    Ok(buffer)
}

/// WinAnsiEncoding is Windows-1252: typographic quotes, dashes and the euro
/// sign live in 0x80-0x9F. Line breaks become spaces, anything else
/// unmappable becomes `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    let mut buf = [0u8; 4];
    for c in text.chars() {
        match c {
            '\t' | '\n' | '\r' => out.push(b' '),
            c if c.is_control() => out.push(b'?'),
            c => {
                let (bytes, _, unmappable) = WINDOWS_1252.encode(c.encode_utf8(&mut buf));
                match bytes.as_ref() {
                    [byte] if !unmappable => out.push(*byte),
                    _ => out.push(b'?'),
                }
            }
        }
    }
    out
}
