//! PDF Merge algorithm
//!
//! Combines multiple PDFs into a single document.

use crate::document::{load_document, materialize_inherited, save_document, PdfInput};
use crate::error::PdfDeskError;
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;

/// Merge multiple PDFs into one, appending every page of every input in
/// input order.
///
/// The algorithm:
/// 1. If empty, return error
/// 2. Load every input, refusing encrypted ones
/// 3. Start from the first document as the destination
/// 4. For each remaining source document:
///    a. Calculate ID offset to avoid conflicts
///    b. Import all objects with remapped IDs
///    c. Append pages to the destination
/// 5. Re-parent every page under the destination page tree root
/// 6. Prune, compress and return the merged result
pub fn merge_documents(documents: Vec<PdfInput>) -> Result<Vec<u8>, PdfDeskError> {
    if documents.is_empty() {
        return Err(PdfDeskError::InvalidInput("No documents to merge".into()));
    }

    // Load all documents first so an encrypted input fails before any work
    let mut loaded_docs = Vec::with_capacity(documents.len());
    for input in &documents {
        loaded_docs.push(load_document(&input.name, &input.bytes)?);
    }

    // Single document - return as-is
    if loaded_docs.len() == 1 {
        if let Some(input) = documents.into_iter().next() {
            return Ok(input.bytes);
        }
    }

    // Start with the first document as the base
    let mut dest = loaded_docs.remove(0);
    let mut dest_max_id = dest.max_id;

    let mut dest_page_refs = get_page_references(&dest);
    for &page_id in &dest_page_refs {
        materialize_inherited(&mut dest, page_id)?;
    }

    // Merge each remaining document
    for mut source in loaded_docs.into_iter() {
        let source_pages = get_page_references(&source);
        for &page_id in &source_pages {
            materialize_inherited(&mut source, page_id)?;
        }

        // Calculate offset for object IDs to avoid conflicts
        let id_offset = dest_max_id;

        // Remap all object IDs in the source document
        let mut remapped_objects = BTreeMap::new();
        for (old_id, object) in source.objects.into_iter() {
            let new_id = (old_id.0 + id_offset, old_id.1);
            let remapped_object = remap_object_refs(object, id_offset);
            remapped_objects.insert(new_id, remapped_object);
        }

        // Add all remapped objects to destination
        for (id, object) in remapped_objects {
            dest.objects.insert(id, object);
        }

        // Remap and add source pages to destination page list
        for old_page_ref in source_pages {
            let new_page_ref = (old_page_ref.0 + id_offset, old_page_ref.1);
            dest_page_refs.push(new_page_ref);
        }

        // Update destination max_id
        dest_max_id = (source.max_id + id_offset).max(dest_max_id);
    }

    // Update the pages array in the destination document
    update_page_tree(&mut dest, &dest_page_refs)?;

    // Update max_id
    dest.max_id = dest_max_id;

    save_document(dest)
}

/// Get all page object references from a document, in page order
fn get_page_references(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().values().copied().collect()
}

/// Recursively remap object references in an object
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(arr) => Object::Array(
            arr.into_iter()
                .map(|o| remap_object_refs(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Point the destination page tree root at `page_refs` and make it the
/// parent of each of them
fn update_page_tree(doc: &mut Document, page_refs: &[ObjectId]) -> Result<(), PdfDeskError> {
    let pages_id = page_tree_root(doc)?;

    // Update the pages dictionary
    if let Some(Object::Dictionary(ref mut pages_dict)) = doc.objects.get_mut(&pages_id) {
        let kids = page_refs
            .iter()
            .map(|&id| Object::Reference(id))
            .collect::<Vec<_>>();
        pages_dict.set("Kids", Object::Array(kids));
        pages_dict.set("Count", Object::Integer(page_refs.len() as i64));
    } else {
        return Err(PdfDeskError::OperationError(
            "Invalid pages dictionary".into(),
        ));
    }

    for &page_id in page_refs {
        if let Some(Object::Dictionary(ref mut page_dict)) = doc.objects.get_mut(&page_id) {
            page_dict.set("Parent", Object::Reference(pages_id));
        }
    }

    Ok(())
}

/// Resolve the catalog's `/Pages` reference
pub(crate) fn page_tree_root(doc: &Document) -> Result<ObjectId, PdfDeskError> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| PdfDeskError::OperationError("No Root in trailer".into()))?;

    doc.get_dictionary(catalog_id)
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(Object::as_reference)
        .map_err(|_| PdfDeskError::OperationError("No Pages in catalog".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encrypted_pdf, labeled_pdf, page_count, page_labels};
    use pretty_assertions::assert_eq;

    fn input(name: &str, bytes: Vec<u8>) -> PdfInput {
        PdfInput::new(name, bytes)
    }

    #[test]
    fn test_merge_empty_fails() {
        let result = merge_documents(vec![]);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("No documents to merge"));
    }

    #[test]
    fn test_merge_single_document_returns_same() {
        let pdf = labeled_pdf(2, "Single");
        let result = merge_documents(vec![input("single.pdf", pdf.clone())]).unwrap();
        assert_eq!(result, pdf);
    }

    #[test]
    fn test_merge_two_documents_combines_pages() {
        let doc_a = labeled_pdf(2, "DocA");
        let doc_b = labeled_pdf(3, "DocB");

        let merged = merge_documents(vec![input("a.pdf", doc_a), input("b.pdf", doc_b)]).unwrap();

        assert_eq!(page_count(&merged), 5, "Merged document should have 5 pages");
    }

    #[test]
    fn test_merge_preserves_page_order() {
        let doc1 = labeled_pdf(2, "First");
        let doc2 = labeled_pdf(1, "Second");
        let doc3 = labeled_pdf(2, "Third");

        let merged = merge_documents(vec![
            input("1.pdf", doc1),
            input("2.pdf", doc2),
            input("3.pdf", doc3),
        ])
        .unwrap();

        assert_eq!(
            page_labels(&merged),
            vec!["First-1", "First-2", "Second-1", "Third-1", "Third-2"]
        );
    }

    #[test]
    fn test_merge_handles_different_sizes() {
        let merged = merge_documents(vec![
            input("large.pdf", labeled_pdf(10, "Large")),
            input("small.pdf", labeled_pdf(1, "Small")),
            input("medium.pdf", labeled_pdf(5, "Medium")),
        ])
        .unwrap();

        assert_eq!(page_count(&merged), 16, "Merged document should have 16 pages");
    }

    #[test]
    fn test_merged_pages_keep_inherited_media_box() {
        let merged = merge_documents(vec![
            input("a.pdf", labeled_pdf(1, "A")),
            input("b.pdf", labeled_pdf(1, "B")),
        ])
        .unwrap();

        let doc = Document::load_mem(&merged).unwrap();
        for page_id in doc.get_pages().values() {
            let page = doc.get_dictionary(*page_id).unwrap();
            assert!(page.has(b"MediaBox"));
        }
    }

    #[test]
    fn test_merge_rejects_encrypted_input() {
        let err = merge_documents(vec![
            input("open.pdf", labeled_pdf(1, "Open")),
            input("locked.pdf", encrypted_pdf(1)),
        ])
        .unwrap_err();

        assert!(err.is_caller_error());
        assert!(err.to_string().contains("locked.pdf"));
        assert!(err.to_string().contains("encrypted"));
    }
}
