//! ZIP packaging for multi-file results

use crate::error::PdfDeskError;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// A file to place in an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Deflate every entry into a single in-memory ZIP archive.
pub fn build_zip(entries: &[ArchiveEntry]) -> Result<Vec<u8>, PdfDeskError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        zip.start_file(entry.name.as_str(), options)?;
        zip.write_all(&entry.bytes).map_err(|e| {
            PdfDeskError::ArchiveError(format!("Failed to write {}: {}", entry.name, e))
        })?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_zip_preserves_entry_order_and_content() {
        let entries = vec![
            ArchiveEntry::new("page_1.pdf", b"first".to_vec()),
            ArchiveEntry::new("page_2.pdf", b"second".to_vec()),
        ];
        let bytes = build_zip(&entries).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut file = archive.by_index(1).unwrap();
        assert_eq!(file.name(), "page_2.pdf");
        assert_eq!(file.compression(), CompressionMethod::Deflated);
        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let bytes = build_zip(&[]).unwrap();
        let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }
}
