//! Document builders shared by unit tests and the API's integration tests

use lopdf::{content::Content, content::Operation, dictionary, Dictionary, Document, Object, Stream};

const TAG_KEY: &[u8] = b"PdfDeskTag";

/// Build a PDF whose pages are tagged `"{prefix}-{n}"` (1-based).
pub fn labeled_pdf(num_pages: u32, prefix: &str) -> Vec<u8> {
    let mut doc = build_document(num_pages, prefix);
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Build a PDF with `num_pages` letter-size pages tagged `Page-n`.
pub fn sample_pdf(num_pages: u32) -> Vec<u8> {
    labeled_pdf(num_pages, "Page")
}

/// Build a PDF carrying a standard security handler entry in its trailer.
pub fn encrypted_pdf(num_pages: u32) -> Vec<u8> {
    let mut doc = build_document(num_pages, "Locked");
    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "Length" => 40,
        "P" => -4,
        "O" => Object::string_literal(vec![0x11u8; 32]),
        "U" => Object::string_literal(vec![0x22u8; 32]),
    });
    doc.trailer.set("Encrypt", Object::Reference(encrypt_id));
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::string_literal(vec![0x33u8; 16]),
            Object::string_literal(vec![0x33u8; 16]),
        ]),
    );
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Build a one-page PDF with a document information dictionary.
pub fn pdf_with_info(title: &str, author: &str) -> Vec<u8> {
    let mut doc = build_document(1, "Info");
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(title),
        "Author" => Object::string_literal(author),
    });
    doc.trailer.set("Info", Object::Reference(info_id));
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

/// Tags of every page in document order.
pub fn page_labels(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|id| match doc.get_dictionary(*id).unwrap().get(TAG_KEY) {
            Ok(Object::String(raw, _)) => String::from_utf8_lossy(raw).into_owned(),
            _ => String::new(),
        })
        .collect()
}

/// Page count of a PDF produced by any operation.
pub fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes).unwrap().get_pages().len()
}

/// Encode a solid-colour RGBA image in the given format.
pub fn sample_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buffer, format)
        .unwrap();
    buffer.into_inner()
}

fn build_document(num_pages: u32, prefix: &str) -> Document {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut page_ids = Vec::new();
    for i in 0..num_pages {
        let label = format!("{}-{}", prefix, i + 1);
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
                Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
                Operation::new("Tj", vec![Object::string_literal(label.as_str())]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "PdfDeskTag" => Object::string_literal(label.as_str()),
        });
        page_ids.push(page_id);
    }

    // MediaBox lives on the page tree root so pages exercise inheritance.
    let pages = dictionary! {
        "Type" => "Pages",
        "Count" => Object::Integer(num_pages as i64),
        "Kids" => Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc
}

/// Rasteriser that paints each page as a flat bitmap sized from the DPI,
/// so conversions can run without the pdfium library.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubRasterizer;

impl crate::raster::PageRasterizer for StubRasterizer {
    fn render_pages(
        &self,
        _pdf: &[u8],
        pages: &[u32],
        dpi: u32,
    ) -> Result<Vec<image::DynamicImage>, crate::error::PdfDeskError> {
        let (width, height) = (dpi * 85 / 100, dpi * 11 / 10);
        Ok(pages
            .iter()
            .map(|page| {
                let shade = (page * 40 % 256) as u8;
                image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
                    width,
                    height,
                    image::Rgba([shade, 90, 160, 200]),
                ))
            })
            .collect())
    }
}
