//! Document transformations for the pdfdesk service
//!
//! Everything here works on in-memory bytes and has no I/O of its own:
//! - [`merge_documents`], [`split_by_mode`] and [`rotate_document`] use lopdf
//! - [`images_to_pdf`] embeds decoded images as page XObjects
//! - [`pdf_to_images`] rasterises through a [`PageRasterizer`] and zips the pages
//!
//! Errors are [`PdfDeskError`]; [`PdfDeskError::is_caller_error`] separates
//! bad requests from library failures.

pub mod archive;
pub mod document;
pub mod error;
pub mod images;
pub mod merge;
pub mod raster;
pub mod rotate;
pub mod split;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use archive::{build_zip, ArchiveEntry};
pub use document::{inspect, load_document, PdfInfo, PdfInput};
pub use error::PdfDeskError;
pub use image::DynamicImage;
pub use images::{images_to_pdf, ImageInput, Orientation, PageSize, MAX_IMAGES_PER_PDF};
pub use merge::merge_documents;
pub use raster::{
    pdf_to_images, resolve_page_span, OutputFormat, PageRasterizer, RenderOptions, RenderedArchive,
    MAX_DPI, MAX_RENDER_PAGES, MIN_DPI,
};
#[cfg(feature = "pdfium")]
pub use raster::PdfiumRasterizer;
pub use rotate::{rotate_document, validate_angle, PageSelection, VALID_ANGLES};
pub use split::{
    plan_split, split_by_mode, split_document, PageRange, SplitMode, SplitPart, MAX_SPLIT_RANGES,
};

/// Parse page range string like "1-3, 5, 8-10" into inclusive `(start, end)` spans
///
/// Spans are kept as written; nothing is expanded until the page count is known.
pub fn parse_spans(input: &str) -> Result<Vec<(u32, u32)>, PdfDeskError> {
    let mut spans = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            // Range like "1-3"
            let start: u32 = start
                .trim()
                .parse()
                .map_err(|_| PdfDeskError::InvalidRange(format!("Invalid start: {}", start)))?;
            let end: u32 = end
                .trim()
                .parse()
                .map_err(|_| PdfDeskError::InvalidRange(format!("Invalid end: {}", end)))?;

            if start > end {
                return Err(PdfDeskError::InvalidRange(format!(
                    "Start {} > end {}",
                    start, end
                )));
            }
            spans.push((start, end));
        } else {
            // Single page like "5"
            let page: u32 = part
                .parse()
                .map_err(|_| PdfDeskError::InvalidRange(format!("Invalid page: {}", part)))?;
            spans.push((page, page));
        }
    }

    Ok(spans)
}

/// Expand spans into sorted unique page numbers, all within `1..=total_pages`
///
/// Bounds are checked before expanding, so the result never exceeds `total_pages` entries.
pub fn expand_spans(spans: &[(u32, u32)], total_pages: u32) -> Result<Vec<u32>, PdfDeskError> {
    use std::collections::BTreeSet;

    for &(start, end) in spans {
        let outside = if start == 0 { 0 } else { end };
        if start == 0 || end > total_pages {
            return Err(PdfDeskError::InvalidRange(format!(
                "Page {} is out of range (document has {} pages)",
                outside, total_pages
            )));
        }
    }

    let pages: BTreeSet<u32> = spans.iter().flat_map(|&(start, end)| start..=end).collect();
    Ok(pages.into_iter().collect())
}

/// Parse page range string like "1-3, 5, 8-10" into sorted unique page numbers
pub fn parse_ranges(input: &str, total_pages: u32) -> Result<Vec<u32>, PdfDeskError> {
    expand_spans(&parse_spans(input)?, total_pages)
}
