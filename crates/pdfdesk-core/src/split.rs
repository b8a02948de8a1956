//! PDF Split algorithm
//!
//! Extracts pages from a PDF using "Construction by Whitelist", and plans the
//! page groups for each split mode.

use crate::document::{load_document, save_document, PdfInput};
use crate::error::PdfDeskError;
use lopdf::Document;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maximum number of caller-specified ranges in one split request
pub const MAX_SPLIT_RANGES: usize = 20;

/// Inclusive, 1-based page range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    fn validate(&self, total_pages: u32) -> Result<(), PdfDeskError> {
        if self.start < 1 {
            return Err(PdfDeskError::InvalidRange(
                "Page numbers must be >= 1".into(),
            ));
        }
        if self.start > self.end {
            return Err(PdfDeskError::InvalidRange(format!(
                "Start page {} is greater than end page {}",
                self.start, self.end
            )));
        }
        if self.end > total_pages {
            return Err(PdfDeskError::InvalidRange(format!(
                "Page {} does not exist (document has {} pages)",
                self.end, total_pages
            )));
        }
        Ok(())
    }
}

/// How a document is divided into output files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitMode {
    /// One output per page
    AllPages,
    /// One output per inclusive range
    PageRanges(Vec<PageRange>),
    /// Sequential chunks of this many pages; the last may be shorter
    EveryNPages(u32),
}

/// One output document of a split
#[derive(Debug, Clone)]
pub struct SplitPart {
    pub filename: String,
    pub pages: Vec<u32>,
    pub bytes: Vec<u8>,
}

/// Compute the page groups a split will produce, without touching the PDF.
pub fn plan_split(total_pages: u32, mode: &SplitMode) -> Result<Vec<Vec<u32>>, PdfDeskError> {
    if total_pages == 0 {
        return Err(PdfDeskError::InvalidInput("PDF has no pages".into()));
    }
    if total_pages == 1 {
        return Err(PdfDeskError::InvalidInput(
            "PDF has only 1 page, cannot split".into(),
        ));
    }

    match mode {
        SplitMode::AllPages => Ok((1..=total_pages).map(|p| vec![p]).collect()),
        SplitMode::PageRanges(ranges) => {
            if ranges.is_empty() {
                return Err(PdfDeskError::InvalidInput(
                    "At least one page range is required".into(),
                ));
            }
            if ranges.len() > MAX_SPLIT_RANGES {
                return Err(PdfDeskError::InvalidInput(format!(
                    "Maximum {} page ranges allowed",
                    MAX_SPLIT_RANGES
                )));
            }
            ranges
                .iter()
                .map(|range| {
                    range.validate(total_pages)?;
                    Ok((range.start..=range.end).collect())
                })
                .collect()
        }
        SplitMode::EveryNPages(n) => {
            if *n == 0 {
                return Err(PdfDeskError::InvalidInput(
                    "pages_per_split must be at least 1".into(),
                ));
            }
            let pages: Vec<u32> = (1..=total_pages).collect();
            Ok(pages.chunks(*n as usize).map(|c| c.to_vec()).collect())
        }
    }
}

/// Split a document according to `mode`, naming each part after `prefix`.
pub fn split_by_mode(
    input: &PdfInput,
    mode: &SplitMode,
    prefix: &str,
) -> Result<Vec<SplitPart>, PdfDeskError> {
    let doc = load_document(&input.name, &input.bytes)?;
    let total_pages = doc.get_pages().len() as u32;
    let groups = plan_split(total_pages, mode)?;

    groups
        .into_iter()
        .map(|pages| {
            let bytes = extract_pages(&doc, &pages)?;
            Ok(SplitPart {
                filename: part_filename(prefix, &pages),
                pages,
                bytes,
            })
        })
        .collect()
}

/// `prefix_3.pdf` for a single page, `prefix_3-5.pdf` for a run of pages
pub fn part_filename(prefix: &str, pages: &[u32]) -> String {
    match (pages.first(), pages.last()) {
        (Some(first), Some(last)) if first == last => format!("{}_{}.pdf", prefix, first),
        (Some(first), Some(last)) => format!("{}_{}-{}.pdf", prefix, first, last),
        _ => format!("{}.pdf", prefix),
    }
}

/// Split a PDF, extracting only the specified pages (1-indexed)
///
/// Uses "Construction by Whitelist" algorithm:
/// 1. Identify target page objects
/// 2. Delete every other page from a copy of the document
/// 3. Prune objects no longer reachable from the trailer
pub fn split_document(bytes: &[u8], pages: Vec<u32>) -> Result<Vec<u8>, PdfDeskError> {
    let doc = load_document("document", bytes)?;
    extract_pages(&doc, &pages)
}

fn extract_pages(doc: &Document, pages: &[u32]) -> Result<Vec<u8>, PdfDeskError> {
    if pages.is_empty() {
        return Err(PdfDeskError::InvalidRange("No pages specified".into()));
    }

    // Validate page numbers are > 0
    if pages.contains(&0) {
        return Err(PdfDeskError::InvalidRange(
            "Page numbers must be >= 1".into(),
        ));
    }

    let page_count = doc.get_pages().len() as u32;

    // Validate all page numbers exist
    for &page in pages {
        if page > page_count {
            return Err(PdfDeskError::InvalidRange(format!(
                "Page {} does not exist (document has {} pages)",
                page, page_count
            )));
        }
    }

    // Clone the document for modification
    let mut new_doc = doc.clone();

    // Calculate pages to keep and delete
    let pages_to_keep: HashSet<u32> = pages.iter().copied().collect();
    let mut pages_to_delete: Vec<u32> = (1..=page_count)
        .filter(|p| !pages_to_keep.contains(p))
        .collect();

    // Delete unwanted pages (must delete in reverse order to maintain indices)
    pages_to_delete.reverse();
    for page_num in pages_to_delete {
        new_doc.delete_pages(&[page_num]);
    }

    save_document(new_doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_documents;
    use crate::testing::{encrypted_pdf, labeled_pdf, page_count, page_labels, sample_pdf};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_split_empty_pages_fails() {
        let pdf = sample_pdf(5);
        let result = split_document(&pdf, vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_split_extracts_single_page() {
        let pdf = sample_pdf(5);
        let result = split_document(&pdf, vec![1]).unwrap();
        assert_eq!(page_count(&result), 1);
    }

    #[test]
    fn test_split_extracts_multiple_pages() {
        let pdf = labeled_pdf(5, "P");
        let result = split_document(&pdf, vec![1, 3, 5]).unwrap();
        assert_eq!(page_labels(&result), vec!["P-1", "P-3", "P-5"]);
    }

    #[test]
    fn test_split_invalid_page_number_fails() {
        let pdf = sample_pdf(5);
        let result = split_document(&pdf, vec![10]); // Page 10 doesn't exist
        assert!(result.is_err());
    }

    #[test]
    fn test_split_page_zero_fails() {
        let pdf = sample_pdf(5);
        let result = split_document(&pdf, vec![0]); // Pages are 1-indexed
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_single_page_document_cannot_split() {
        let err = plan_split(1, &SplitMode::AllPages).unwrap_err();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("only 1 page"));
    }

    #[test]
    fn test_plan_all_pages() {
        assert_eq!(
            plan_split(3, &SplitMode::AllPages).unwrap(),
            vec![vec![1], vec![2], vec![3]]
        );
    }

    #[test]
    fn test_plan_every_n_pages_last_chunk_shorter() {
        assert_eq!(
            plan_split(7, &SplitMode::EveryNPages(3)).unwrap(),
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
        );
    }

    #[test]
    fn test_plan_every_zero_pages_fails() {
        assert!(plan_split(4, &SplitMode::EveryNPages(0)).is_err());
    }

    #[test]
    fn test_plan_page_ranges() {
        let mode = SplitMode::PageRanges(vec![PageRange::new(1, 2), PageRange::new(4, 4)]);
        assert_eq!(plan_split(5, &mode).unwrap(), vec![vec![1, 2], vec![4]]);
    }

    #[test]
    fn test_plan_rejects_out_of_bounds_range() {
        let mode = SplitMode::PageRanges(vec![PageRange::new(2, 9)]);
        let err = plan_split(5, &mode).unwrap_err();
        assert!(matches!(err, PdfDeskError::InvalidRange(_)));
    }

    #[test]
    fn test_plan_rejects_inverted_range() {
        let mode = SplitMode::PageRanges(vec![PageRange::new(4, 2)]);
        assert!(plan_split(5, &mode).is_err());
    }

    #[test]
    fn test_plan_rejects_too_many_ranges() {
        let ranges = (0..21).map(|_| PageRange::new(1, 1)).collect();
        assert!(plan_split(5, &SplitMode::PageRanges(ranges)).is_err());
    }

    #[test]
    fn test_part_filenames() {
        assert_eq!(part_filename("page", &[2]), "page_2.pdf");
        assert_eq!(part_filename("chunk", &[4, 5, 6]), "chunk_4-6.pdf");
    }

    #[test]
    fn test_split_by_mode_names_parts() {
        let input = PdfInput::new("a.pdf", sample_pdf(2));
        let parts = split_by_mode(&input, &SplitMode::AllPages, "page").unwrap();
        let names: Vec<_> = parts.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["page_1.pdf", "page_2.pdf"]);
    }

    #[test]
    fn test_split_by_mode_rejects_encrypted() {
        let input = PdfInput::new("locked.pdf", encrypted_pdf(3));
        let err = split_by_mode(&input, &SplitMode::AllPages, "page").unwrap_err();
        assert!(matches!(err, PdfDeskError::Encrypted(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn split_then_merge_reconstructs_document(pages in 2u32..8) {
            let original = labeled_pdf(pages, "Doc");
            let input = PdfInput::new("doc.pdf", original.clone());
            let parts = split_by_mode(&input, &SplitMode::AllPages, "page").unwrap();
            prop_assert_eq!(parts.len() as u32, pages);

            let rejoined = merge_documents(
                parts
                    .into_iter()
                    .map(|p| PdfInput::new(p.filename, p.bytes))
                    .collect(),
            )
            .unwrap();
            prop_assert_eq!(page_labels(&rejoined), page_labels(&original));
        }

        #[test]
        fn every_n_covers_all_pages_in_order(total in 2u32..60, n in 1u32..10) {
            let groups = plan_split(total, &SplitMode::EveryNPages(n)).unwrap();
            let flattened: Vec<u32> = groups.iter().flatten().copied().collect();
            prop_assert_eq!(flattened, (1..=total).collect::<Vec<_>>());
            prop_assert!(groups.iter().all(|g| g.len() as u32 <= n));
        }
    }
}
