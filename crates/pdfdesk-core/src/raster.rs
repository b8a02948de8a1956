//! PDF → images
//!
//! Pages are rasterised through a [`PageRasterizer`], encoded in the
//! requested format and always delivered as a ZIP archive of
//! `page_NNN.<ext>` entries, even for a single page.

use crate::archive::{build_zip, ArchiveEntry};
use crate::document::{load_document, PdfInput};
use crate::error::PdfDeskError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 300;
pub const MAX_RENDER_PAGES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
    Tiff,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = PdfDeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PNG" => Ok(OutputFormat::Png),
            "JPEG" | "JPG" => Ok(OutputFormat::Jpeg),
            "WEBP" => Ok(OutputFormat::Webp),
            "TIFF" | "TIF" => Ok(OutputFormat::Tiff),
            other => Err(PdfDeskError::InvalidInput(format!(
                "Invalid output format '{}'. Must be PNG, JPEG, WEBP or TIFF",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub format: OutputFormat,
    /// 1-100; only JPEG output uses it
    pub quality: u8,
    pub dpi: u32,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 95,
            dpi: 150,
            start_page: None,
            end_page: None,
        }
    }
}

impl RenderOptions {
    pub fn validate(&self) -> Result<(), PdfDeskError> {
        if !(MIN_DPI..=MAX_DPI).contains(&self.dpi) {
            return Err(PdfDeskError::InvalidInput(format!(
                "DPI must be between {} and {}",
                MIN_DPI, MAX_DPI
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(PdfDeskError::InvalidInput(
                "Quality must be between 1 and 100".into(),
            ));
        }
        Ok(())
    }
}

/// Renders PDF pages to bitmaps.
///
/// Page numbers are 1-based. Implementations run synchronously; callers on
/// an async runtime should wrap them in `spawn_blocking`.
pub trait PageRasterizer: Send + Sync {
    fn render_pages(
        &self,
        pdf: &[u8],
        pages: &[u32],
        dpi: u32,
    ) -> Result<Vec<DynamicImage>, PdfDeskError>;
}

/// Result of a PDF → images conversion
#[derive(Debug, Clone)]
pub struct RenderedArchive {
    pub archive: Vec<u8>,
    pub pages: Vec<u32>,
}

/// Pages to render. The range applies only when both ends are given.
pub fn resolve_page_span(
    total_pages: u32,
    start_page: Option<u32>,
    end_page: Option<u32>,
) -> Result<Vec<u32>, PdfDeskError> {
    let pages: Vec<u32> = match (start_page, end_page) {
        (Some(start), Some(end)) => {
            if start < 1 || start > end || end > total_pages {
                return Err(PdfDeskError::InvalidRange(format!(
                    "Invalid page range {}-{} for a document with {} pages",
                    start, end, total_pages
                )));
            }
            (start..=end).collect()
        }
        _ => (1..=total_pages).collect(),
    };

    if pages.is_empty() {
        return Err(PdfDeskError::InvalidInput("PDF has no pages".into()));
    }
    if pages.len() > MAX_RENDER_PAGES {
        return Err(PdfDeskError::InvalidInput(format!(
            "Too many pages to convert ({}). Maximum is {}",
            pages.len(),
            MAX_RENDER_PAGES
        )));
    }
    Ok(pages)
}

/// Convert a PDF into a ZIP of page images.
pub fn pdf_to_images(
    input: &PdfInput,
    options: &RenderOptions,
    rasterizer: &dyn PageRasterizer,
) -> Result<RenderedArchive, PdfDeskError> {
    options.validate()?;

    let doc = load_document(&input.name, &input.bytes)?;
    let total_pages = doc.get_pages().len() as u32;
    let pages = resolve_page_span(total_pages, options.start_page, options.end_page)?;

    let bitmaps = rasterizer.render_pages(&input.bytes, &pages, options.dpi)?;
    if bitmaps.len() != pages.len() {
        return Err(PdfDeskError::RenderError(format!(
            "Expected {} rendered pages, got {}",
            pages.len(),
            bitmaps.len()
        )));
    }

    let entries = pages
        .iter()
        .zip(bitmaps.iter())
        .map(|(page, bitmap)| {
            Ok(ArchiveEntry {
                name: format!("page_{:03}.{}", page, options.format.extension()),
                bytes: encode_image(bitmap, options.format, options.quality)?,
            })
        })
        .collect::<Result<Vec<_>, PdfDeskError>>()?;

    Ok(RenderedArchive {
        archive: build_zip(&entries)?,
        pages,
    })
}

/// Encode a bitmap. JPEG drops alpha by compositing onto white; WEBP is
/// written lossless.
pub fn encode_image(
    image: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, PdfDeskError> {
    let mut buffer = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            let rgb = flatten_onto_white(image);
            JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(&rgb)?;
        }
        OutputFormat::Png => image.write_to(&mut buffer, ImageFormat::Png)?,
        OutputFormat::Webp => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buffer, ImageFormat::WebP)?
        }
        OutputFormat::Tiff => image.write_to(&mut buffer, ImageFormat::Tiff)?,
    }
    Ok(buffer.into_inner())
}

/// Composite any alpha channel over a white background.
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumRasterizer;

#[cfg(feature = "pdfium")]
mod pdfium {
    use super::PageRasterizer;
    use crate::error::PdfDeskError;
    use image::DynamicImage;
    use pdfium_render::prelude::*;
    use std::fmt;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::{debug, info};

    /// Rasteriser backed by the pdfium shared library.
    ///
    /// The library is bound on first use, from `library_path` when set (a file
    /// or a directory containing the platform library) or from the system
    /// path, and the binding is shared by every later render. A failed bind is
    /// not cached.
    #[derive(Default)]
    pub struct PdfiumRasterizer {
        library_path: Option<PathBuf>,
        pdfium: OnceLock<Pdfium>,
    }

    impl fmt::Debug for PdfiumRasterizer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("PdfiumRasterizer")
                .field("library_path", &self.library_path)
                .field("bound", &self.pdfium.get().is_some())
                .finish()
        }
    }

    impl PdfiumRasterizer {
        pub fn new(library_path: Option<PathBuf>) -> Self {
            Self {
                library_path,
                pdfium: OnceLock::new(),
            }
        }

        fn pdfium(&self) -> Result<&Pdfium, PdfDeskError> {
            if let Some(pdfium) = self.pdfium.get() {
                return Ok(pdfium);
            }
            let bindings = match &self.library_path {
                Some(path) if path.is_dir() => Pdfium::bind_to_library(
                    Pdfium::pdfium_platform_library_name_at_path(path),
                ),
                Some(path) => Pdfium::bind_to_library(path),
                None => Pdfium::bind_to_system_library(),
            }
            .map_err(|e| PdfDeskError::RenderError(format!("pdfium unavailable: {:?}", e)))?;

            // Concurrent first calls may both bind; the loser's binding is dropped.
            if self.pdfium.set(Pdfium::new(bindings)).is_ok() {
                info!("Bound pdfium library");
            }
            self.pdfium
                .get()
                .ok_or_else(|| PdfDeskError::RenderError("pdfium unavailable".into()))
        }
    }

    impl PageRasterizer for PdfiumRasterizer {
        fn render_pages(
            &self,
            pdf: &[u8],
            pages: &[u32],
            dpi: u32,
        ) -> Result<Vec<DynamicImage>, PdfDeskError> {
            let pdfium = self.pdfium()?;
            let document = pdfium
                .load_pdf_from_byte_slice(pdf, None)
                .map_err(|e| PdfDeskError::RenderError(format!("{:?}", e)))?;

            let config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);
            let doc_pages = document.pages();

            pages
                .iter()
                .map(|&number| {
                    let index = number
                        .checked_sub(1)
                        .and_then(|i| u16::try_from(i).ok())
                        .ok_or_else(|| {
                            PdfDeskError::RenderError(format!("Invalid page {}", number))
                        })?;
                    let page = doc_pages.get(index).map_err(|e| {
                        PdfDeskError::RenderError(format!("page {}: {:?}", number, e))
                    })?;
                    let bitmap = page.render_with_config(&config).map_err(|e| {
                        PdfDeskError::RenderError(format!("page {}: {:?}", number, e))
                    })?;
                    let image = bitmap.as_image();
                    debug!(
                        "Rendered page {} at {} dpi: {}x{} px",
                        number,
                        dpi,
                        image.width(),
                        image.height()
                    );
                    Ok(image)
                })
                .collect()
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encrypted_pdf, sample_pdf, StubRasterizer};
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
        (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_single_page_is_still_zipped() {
        let input = PdfInput::new("one.pdf", sample_pdf(1));
        let out = pdf_to_images(&input, &RenderOptions::default(), &StubRasterizer).unwrap();
        assert_eq!(entry_names(&out.archive), vec!["page_001.png"]);
    }

    #[test]
    fn test_page_span_applies_only_with_both_ends() {
        assert_eq!(resolve_page_span(5, Some(2), Some(3)).unwrap(), vec![2, 3]);
        assert_eq!(resolve_page_span(3, Some(2), None).unwrap(), vec![1, 2, 3]);
        assert!(resolve_page_span(3, Some(2), Some(4)).is_err());
        assert!(resolve_page_span(3, Some(3), Some(2)).is_err());
    }

    #[test]
    fn test_page_cap() {
        assert!(resolve_page_span(101, None, None).is_err());
        assert_eq!(resolve_page_span(150, Some(1), Some(100)).unwrap().len(), 100);
    }

    #[test]
    fn test_jpeg_entries_use_jpg_extension() {
        let input = PdfInput::new("three.pdf", sample_pdf(3));
        let options = RenderOptions {
            format: OutputFormat::Jpeg,
            quality: 80,
            start_page: Some(2),
            end_page: Some(3),
            ..RenderOptions::default()
        };
        let out = pdf_to_images(&input, &options, &StubRasterizer).unwrap();
        assert_eq!(entry_names(&out.archive), vec!["page_002.jpg", "page_003.jpg"]);

        let mut zip = zip::ZipArchive::new(Cursor::new(out.archive)).unwrap();
        let mut bytes = Vec::new();
        zip.by_index(0).unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_dpi_and_quality_bounds() {
        let low = RenderOptions {
            dpi: 71,
            ..RenderOptions::default()
        };
        assert!(low.validate().is_err());
        let bad_quality = RenderOptions {
            quality: 0,
            ..RenderOptions::default()
        };
        assert!(bad_quality.validate().is_err());
        assert!(RenderOptions::default().validate().is_ok());
    }

    #[test]
    fn test_encrypted_rejected_before_rendering() {
        let input = PdfInput::new("locked.pdf", encrypted_pdf(2));
        let err = pdf_to_images(&input, &RenderOptions::default(), &StubRasterizer).unwrap_err();
        assert!(matches!(err, PdfDeskError::Encrypted(_)));
    }

    #[test]
    fn test_flatten_transparent_pixel_becomes_white() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            1,
            1,
            image::Rgba([0, 0, 0, 0]),
        ));
        assert_eq!(flatten_onto_white(&img).get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_every_format_encodes() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            4,
            4,
            image::Rgba([10, 20, 30, 128]),
        ));
        for (format, expected) in [
            (OutputFormat::Png, ImageFormat::Png),
            (OutputFormat::Jpeg, ImageFormat::Jpeg),
            (OutputFormat::Webp, ImageFormat::WebP),
            (OutputFormat::Tiff, ImageFormat::Tiff),
        ] {
            let bytes = encode_image(&img, format, 90).unwrap();
            assert_eq!(image::guess_format(&bytes).unwrap(), expected);
        }
    }

    #[test]
    fn test_parse_output_format() {
        assert_eq!("jpg".parse::<OutputFormat>().unwrap(), OutputFormat::Jpeg);
        assert_eq!("WEBP".parse::<OutputFormat>().unwrap(), OutputFormat::Webp);
        assert!("GIF".parse::<OutputFormat>().is_err());
    }
}
