//! Page rotation

use crate::document::{inherited_attribute, load_document, save_document, PdfInput};
use crate::error::PdfDeskError;
use crate::{expand_spans, parse_spans};
use lopdf::Object;
use std::collections::BTreeSet;

/// Rotation angles accepted by [`rotate_document`]
pub const VALID_ANGLES: [i32; 6] = [90, 180, 270, -90, -180, -270];

/// Which pages an operation applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSelection {
    All,
    /// Inclusive page spans as written, e.g. `"2-4, 7"` is `[(2, 4), (7, 7)]`
    Pages(Vec<(u32, u32)>),
}

impl PageSelection {
    /// Parse `"all"` or a page list such as `"1,3,5"` / `"2-4, 7"`.
    pub fn parse(input: &str) -> Result<Self, PdfDeskError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(PageSelection::All);
        }
        let spans = parse_spans(trimmed)?;
        if spans.is_empty() {
            return Err(PdfDeskError::InvalidRange("No pages specified".into()));
        }
        Ok(PageSelection::Pages(spans))
    }

    /// Concrete page numbers for a document of `total_pages`.
    pub fn resolve(&self, total_pages: u32) -> Result<Vec<u32>, PdfDeskError> {
        match self {
            PageSelection::All => Ok((1..=total_pages).collect()),
            PageSelection::Pages(spans) => expand_spans(spans, total_pages),
        }
    }
}

pub fn validate_angle(angle: i32) -> Result<(), PdfDeskError> {
    if VALID_ANGLES.contains(&angle) {
        Ok(())
    } else {
        Err(PdfDeskError::InvalidInput(format!(
            "Invalid rotation angle {}. Allowed: 90, 180, 270, -90, -180, -270",
            angle
        )))
    }
}

/// Rotate the selected pages by `angle` degrees; other pages are untouched.
pub fn rotate_document(
    input: &PdfInput,
    angle: i32,
    selection: &PageSelection,
) -> Result<Vec<u8>, PdfDeskError> {
    validate_angle(angle)?;

    let mut doc = load_document(&input.name, &input.bytes)?;
    let pages = doc.get_pages();
    let targets: BTreeSet<u32> = selection
        .resolve(pages.len() as u32)?
        .into_iter()
        .collect();

    for (page_num, page_id) in pages {
        if !targets.contains(&page_num) {
            continue;
        }

        let current = inherited_attribute(&doc, page_id, b"Rotate")
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0);
        let rotated = (current + angle as i64).rem_euclid(360);

        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(|e| PdfDeskError::OperationError(format!("Invalid page {}: {}", page_num, e)))?;
        page.set("Rotate", Object::Integer(rotated));
    }

    save_document(doc)
}

/// Effective `/Rotate` of every page, normalised to `0..360`.
pub fn page_rotations(bytes: &[u8]) -> Result<Vec<i64>, PdfDeskError> {
    let doc = load_document("document", bytes)?;
    Ok(doc
        .get_pages()
        .values()
        .map(|id| {
            inherited_attribute(&doc, *id, b"Rotate")
                .and_then(|o| o.as_i64().ok())
                .unwrap_or(0)
                .rem_euclid(360)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encrypted_pdf, sample_pdf};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn input(pages: u32) -> PdfInput {
        PdfInput::new("doc.pdf", sample_pdf(pages))
    }

    #[test]
    fn test_rotate_all_pages() {
        let out = rotate_document(&input(3), 90, &PageSelection::All).unwrap();
        assert_eq!(page_rotations(&out).unwrap(), vec![90, 90, 90]);
    }

    #[test]
    fn test_rotate_subset_leaves_others() {
        let selection = PageSelection::parse("1,3").unwrap();
        let out = rotate_document(&input(3), -90, &selection).unwrap();
        assert_eq!(page_rotations(&out).unwrap(), vec![270, 0, 270]);
    }

    #[test]
    fn test_invalid_angle_rejected() {
        let err = rotate_document(&input(1), 45, &PageSelection::All).unwrap_err();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("45"));
    }

    #[test]
    fn test_out_of_range_page_rejected() {
        let selection = PageSelection::parse("4").unwrap();
        assert!(rotate_document(&input(3), 90, &selection).is_err());
    }

    #[test]
    fn test_huge_selection_resolves_without_expanding() {
        let selection = PageSelection::parse("1-4294967295").unwrap();
        let err = selection.resolve(2).unwrap_err();
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("document has 2 pages"));
        assert_eq!(PageSelection::parse("2-3, 3").unwrap().resolve(3).unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_encrypted_rejected() {
        let locked = PdfInput::new("locked.pdf", encrypted_pdf(2));
        let err = rotate_document(&locked, 180, &PageSelection::All).unwrap_err();
        assert!(matches!(err, PdfDeskError::Encrypted(_)));
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!(PageSelection::parse("all").unwrap(), PageSelection::All);
        assert_eq!(PageSelection::parse(" ALL ").unwrap(), PageSelection::All);
        assert_eq!(
            PageSelection::parse("2-4, 7").unwrap(),
            PageSelection::Pages(vec![(2, 4), (7, 7)])
        );
        assert!(PageSelection::parse("x").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn rotating_back_restores_orientation(
            angle in prop::sample::select(VALID_ANGLES.to_vec()),
            pages in 1u32..5
        ) {
            let original = input(pages);
            let before = page_rotations(&original.bytes).unwrap();
            let once = rotate_document(&original, angle, &PageSelection::All).unwrap();
            let back = rotate_document(&PdfInput::new("doc.pdf", once), -angle, &PageSelection::All).unwrap();
            prop_assert_eq!(page_rotations(&back).unwrap(), before);
        }
    }
}
