//! Local filesystem storage for file bytes
//!
//! Keys are relative paths such as `uploads/2024/05/01/<uuid>.pdf`. Only the
//! temporary file store calls into this module.

use chrono::{DateTime, Datelike, Utc};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Top-level directory for a stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Uploads,
    Processed,
}

impl Area {
    fn as_str(&self) -> &'static str {
        match self {
            Area::Uploads => "uploads",
            Area::Processed => "processed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// `<area>/YYYY/MM/DD/<id><ext>`, with the extension taken from the
    /// original filename.
    pub fn generate_key(area: Area, date: DateTime<Utc>, id: Uuid, filename: &str) -> String {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        format!(
            "{}/{:04}/{:02}/{:02}/{}{}",
            area.as_str(),
            date.year(),
            date.month(),
            date.day(),
            id,
            ext
        )
    }

    /// Convert storage key to filesystem path, refusing keys that could
    /// escape the base directory.
    fn key_to_path(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = key.is_empty()
            || key.contains("..")
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage key {:?}", key),
            ));
        }
        Ok(self.base_path.join(relative))
    }

    pub async fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        tracing::debug!(key, size_bytes = data.len(), "Wrote file to storage");
        Ok(())
    }

    pub async fn read(&self, key: &str) -> io::Result<Vec<u8>> {
        fs::read(self.key_to_path(key)?).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.key_to_path(key) {
            Ok(path) => fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn delete(&self, key: &str) -> io::Result<()> {
        fs::remove_file(self.key_to_path(key)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_is_date_partitioned() {
        let date = Utc.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            LocalStorage::generate_key(Area::Uploads, date, id, "Report.PDF"),
            format!("uploads/2024/03/07/{}.pdf", id)
        );
        assert_eq!(
            LocalStorage::generate_key(Area::Processed, date, id, "noext"),
            format!("processed/2024/03/07/{}", id)
        );
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        storage.write("uploads/a/b.txt", b"hello").await.unwrap();
        assert!(storage.exists("uploads/a/b.txt").await);
        assert_eq!(storage.read("uploads/a/b.txt").await.unwrap(), b"hello");

        storage.delete("uploads/a/b.txt").await.unwrap();
        assert!(!storage.exists("uploads/a/b.txt").await);
        assert!(storage.delete("uploads/a/b.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        for key in ["../escape.txt", "/etc/passwd", "uploads/../../x", ""] {
            assert!(storage.write(key, b"x").await.is_err(), "{}", key);
            assert!(!storage.exists(key).await);
        }
    }
}
