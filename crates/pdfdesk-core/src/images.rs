//! Images → PDF
//!
//! Each image becomes one page of a fixed paper size. Images are scaled down
//! (never up) to fit inside a margin on every side, centred, and embedded as
//! Flate-compressed DeviceRGB XObjects.

use crate::error::PdfDeskError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

/// Margin kept clear on each side of the page, in points
pub const PAGE_MARGIN: f32 = 20.0;

/// Maximum number of images in a single conversion
pub const MAX_IMAGES_PER_PDF: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSize {
    A4,
    A3,
    A5,
    Letter,
    Legal,
}

impl PageSize {
    /// Portrait width and height in points
    pub fn dimensions(&self) -> (f32, f32) {
        match self {
            PageSize::A4 => (595.2756, 841.8898),
            PageSize::A3 => (841.8898, 1190.5512),
            PageSize::A5 => (419.5276, 595.2756),
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
        }
    }
}

impl FromStr for PageSize {
    type Err = PdfDeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A4" => Ok(PageSize::A4),
            "A3" => Ok(PageSize::A3),
            "A5" => Ok(PageSize::A5),
            "LETTER" => Ok(PageSize::Letter),
            "LEGAL" => Ok(PageSize::Legal),
            other => Err(PdfDeskError::InvalidInput(format!(
                "Invalid page size '{}'. Must be one of A4, A3, A5, Letter, Legal",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl FromStr for Orientation {
    type Err = PdfDeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(PdfDeskError::InvalidInput(format!(
                "Invalid orientation '{}'. Must be 'portrait' or 'landscape'",
                other
            ))),
        }
    }
}

/// Page width and height for a size/orientation pair
pub fn page_dimensions(size: PageSize, orientation: Orientation) -> (f32, f32) {
    let (w, h) = size.dimensions();
    match orientation {
        Orientation::Portrait => (w, h),
        Orientation::Landscape => (h, w),
    }
}

/// Where an image lands on its page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Always `<= 1.0`
    pub scale: f32,
}

/// Fit an image of `img_w` x `img_h` pixels (1px = 1pt) inside the page
/// margins, preserving aspect ratio and centring it.
pub fn fit_image(img_w: u32, img_h: u32, page_w: f32, page_h: f32) -> Placement {
    let avail_w = (page_w - 2.0 * PAGE_MARGIN).max(1.0);
    let avail_h = (page_h - 2.0 * PAGE_MARGIN).max(1.0);
    let (img_w, img_h) = (img_w.max(1) as f32, img_h.max(1) as f32);

    let scale = (avail_w / img_w).min(avail_h / img_h).min(1.0);
    let width = img_w * scale;
    let height = img_h * scale;

    Placement {
        x: (page_w - width) / 2.0,
        y: (page_h - height) / 2.0,
        width,
        height,
        scale,
    }
}

/// An image held in memory; the name is only used in error messages
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ImageInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Build one PDF page per image, in input order.
pub fn images_to_pdf(
    images: &[ImageInput],
    size: PageSize,
    orientation: Orientation,
) -> Result<Vec<u8>, PdfDeskError> {
    if images.is_empty() {
        return Err(PdfDeskError::InvalidInput(
            "At least one image is required".into(),
        ));
    }
    if images.len() > MAX_IMAGES_PER_PDF {
        return Err(PdfDeskError::InvalidInput(format!(
            "Maximum {} images can be converted at once",
            MAX_IMAGES_PER_PDF
        )));
    }

    let (page_w, page_h) = page_dimensions(size, orientation);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(images.len());

    for input in images {
        let decoded = image::load_from_memory(&input.bytes).map_err(|e| {
            PdfDeskError::InvalidInput(format!("{} is not a valid image: {}", input.name, e))
        })?;
        // Non-RGB sources (grayscale, palette, RGBA, CMYK-decoded) become RGB
        let rgb = decoded.to_rgb8();
        let (img_w, img_h) = rgb.dimensions();

        let image_id = doc.add_object(image_xobject(img_w, img_h, rgb.as_raw())?);
        let placement = fit_image(img_w, img_h, page_w, page_h);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(placement.width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(placement.height),
                        Object::Real(placement.x),
                        Object::Real(placement.y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| PdfDeskError::OperationError(format!("Failed to encode page: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_w),
                Object::Real(page_h),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => Object::Reference(image_id),
                },
            },
            "Contents" => Object::Reference(content_id),
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
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfDeskError::OperationError(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}

fn image_xobject(width: u32, height: u32, rgb: &[u8]) -> Result<Stream, PdfDeskError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(rgb)
        .and_then(|_| encoder.finish())
        .map(|compressed| {
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "FlateDecode",
                },
                compressed,
            )
        })
        .map_err(|e| PdfDeskError::OperationError(format!("Failed to compress image: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page_count, sample_image};
    use image::ImageFormat;
    use proptest::prelude::*;

    #[test]
    fn test_one_page_per_image() {
        let images = vec![
            ImageInput::new("a.png", sample_image(40, 30, ImageFormat::Png)),
            ImageInput::new("b.jpg", sample_image(800, 1200, ImageFormat::Jpeg)),
            ImageInput::new("c.bmp", sample_image(10, 10, ImageFormat::Bmp)),
        ];
        let pdf = images_to_pdf(&images, PageSize::A4, Orientation::Portrait).unwrap();
        assert_eq!(page_count(&pdf), 3);
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = images_to_pdf(&[], PageSize::A4, Orientation::Portrait).unwrap_err();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_too_many_images_rejected() {
        let png = sample_image(2, 2, ImageFormat::Png);
        let images: Vec<_> = (0..51)
            .map(|i| ImageInput::new(format!("{}.png", i), png.clone()))
            .collect();
        assert!(images_to_pdf(&images, PageSize::A4, Orientation::Portrait).is_err());
    }

    #[test]
    fn test_undecodable_image_is_caller_error() {
        let images = vec![ImageInput::new("broken.png", b"nope".to_vec())];
        let err = images_to_pdf(&images, PageSize::Letter, Orientation::Portrait).unwrap_err();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("broken.png"));
    }

    #[test]
    fn test_landscape_swaps_dimensions() {
        assert_eq!(page_dimensions(PageSize::Letter, Orientation::Landscape), (792.0, 612.0));
        assert_eq!(page_dimensions(PageSize::Legal, Orientation::Portrait), (612.0, 1008.0));
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let placement = fit_image(100, 50, 612.0, 792.0);
        assert_eq!(placement.scale, 1.0);
        assert_eq!(placement.width, 100.0);
        assert_eq!(placement.x, 256.0);
    }

    #[test]
    fn test_large_image_fits_inside_margins() {
        let placement = fit_image(2000, 1000, 612.0, 792.0);
        assert!(placement.width <= 612.0 - 2.0 * PAGE_MARGIN + 0.01);
        assert!(placement.x >= PAGE_MARGIN - 0.01);
    }

    #[test]
    fn test_parse_page_options() {
        assert_eq!("letter".parse::<PageSize>().unwrap(), PageSize::Letter);
        assert_eq!("LANDSCAPE".parse::<Orientation>().unwrap(), Orientation::Landscape);
        assert!("B5".parse::<PageSize>().is_err());
    }

    proptest! {
        #[test]
        fn fit_never_upscales_and_keeps_aspect(w in 1u32..5000, h in 1u32..5000) {
            let (pw, ph) = page_dimensions(PageSize::A4, Orientation::Portrait);
            let p = fit_image(w, h, pw, ph);
            prop_assert!(p.scale <= 1.0);
            prop_assert!(p.width <= pw - 2.0 * PAGE_MARGIN + 0.01);
            prop_assert!(p.height <= ph - 2.0 * PAGE_MARGIN + 0.01);
            let expected = w as f32 / h as f32;
            let actual = p.width / p.height;
            prop_assert!((expected - actual).abs() / expected < 0.001);
        }
    }
}
