//! Temporary File Store
//!
//! Owns both the `temporary_files` rows and the bytes under the storage
//! root. Records expire one hour after creation; expiry is evaluated lazily
//! against the injected clock whenever a record is read, and nothing is
//! removed until a delete or sweep runs.

use crate::clock::{self, Clock};
use crate::error::ApiError;
use crate::storage::{Area, LocalStorage};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifetime of a temporary file
pub const FILE_TTL_HOURS: i64 = 1;

pub const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;

pub const OCTET_STREAM: &str = "application/octet-stream";

pub const ALLOWED_MIME_TYPES: [&str; 13] = [
    "application/pdf",
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

pub const ALLOWED_EXTENSIONS: [&str; 13] = [
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".jpg", ".jpeg", ".png", ".gif",
    ".bmp", ".tiff",
];

/// Metadata for one stored file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporaryFile {
    pub id: Uuid,
    pub original_filename: String,
    /// Storage key relative to the storage root
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TemporaryFile {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbTemporaryFile {
    id: String,
    original_filename: String,
    file_path: String,
    file_size: i64,
    mime_type: String,
    uploaded_at: String,
    expires_at: String,
}

impl TryFrom<DbTemporaryFile> for TemporaryFile {
    type Error = ApiError;

    fn try_from(row: DbTemporaryFile) -> Result<Self, Self::Error> {
        Ok(TemporaryFile {
            id: Uuid::parse_str(&row.id).map_err(|e| ApiError::Internal(e.into()))?,
            original_filename: row.original_filename,
            file_path: row.file_path,
            file_size: row.file_size,
            mime_type: row.mime_type,
            uploaded_at: clock::from_db(&row.uploaded_at)?,
            expires_at: clock::from_db(&row.expires_at)?,
        })
    }
}

/// Aggregate counts for the stats endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStats {
    pub total_files: i64,
    pub active_files: i64,
    pub expired_files: i64,
    /// Bytes held by non-expired files
    pub total_storage_bytes: i64,
    pub total_storage_mb: f64,
}

const SELECT_FILE: &str = r#"
    SELECT id, original_filename, file_path, file_size, mime_type, uploaded_at, expires_at
    FROM temporary_files
"#;

#[derive(Clone)]
pub struct TemporaryFileStore {
    db: SqlitePool,
    storage: LocalStorage,
    clock: Arc<dyn Clock>,
}

impl TemporaryFileStore {
    pub fn new(db: SqlitePool, storage: LocalStorage, clock: Arc<dyn Clock>) -> Self {
        Self { db, storage, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Store an upload. The MIME type is inferred from the filename when the
    /// declared one is missing or `application/octet-stream`.
    pub async fn create(
        &self,
        original_filename: &str,
        bytes: &[u8],
        declared_mime: Option<&str>,
    ) -> Result<TemporaryFile, ApiError> {
        let mime_type = resolve_mime_type(declared_mime, original_filename);
        self.insert(Area::Uploads, original_filename, bytes, mime_type)
            .await
    }

    /// Store the output of a transformation under `processed/`.
    pub async fn create_processed(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<TemporaryFile, ApiError> {
        let mime_type = infer_mime_type(filename).to_string();
        self.insert(Area::Processed, filename, bytes, mime_type).await
    }

    async fn insert(
        &self,
        area: Area,
        filename: &str,
        bytes: &[u8],
        mime_type: String,
    ) -> Result<TemporaryFile, ApiError> {
        let id = Uuid::new_v4();
        let now = self.clock.now();
        let key = LocalStorage::generate_key(area, now, id, filename);

        self.storage
            .write(&key, bytes)
            .await
            .map_err(|e| ApiError::StorageWrite(format!("{}: {}", key, e)))?;

        let file = TemporaryFile {
            id,
            original_filename: filename.to_string(),
            file_path: key,
            file_size: bytes.len() as i64,
            mime_type,
            uploaded_at: now,
            expires_at: now + Duration::hours(FILE_TTL_HOURS),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO temporary_files (id, original_filename, file_path, file_size, mime_type, uploaded_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.id.to_string())
        .bind(&file.original_filename)
        .bind(&file.file_path)
        .bind(file.file_size)
        .bind(&file.mime_type)
        .bind(clock::to_db(file.uploaded_at))
        .bind(clock::to_db(file.expires_at))
        .execute(&self.db)
        .await;

        if let Err(e) = inserted {
            // Without a row nothing would ever sweep these bytes
            if let Err(cleanup) = self.storage.delete(&file.file_path).await {
                warn!(key = %file.file_path, "Failed to remove orphaned bytes: {}", cleanup);
            }
            return Err(e.into());
        }

        info!(
            file_id = %file.id,
            size_bytes = file.file_size,
            mime_type = %file.mime_type,
            "Stored temporary file {}",
            file.original_filename
        );
        Ok(file)
    }

    pub async fn get(&self, id: Uuid) -> Result<TemporaryFile, ApiError> {
        let row: Option<DbTemporaryFile> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_FILE))
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?;

        row.ok_or_else(|| ApiError::NotFound(format!("File {} not found", id)))?
            .try_into()
    }

    /// Bytes of a file by id. Expiry is not checked here.
    pub async fn open(&self, id: Uuid) -> Result<Vec<u8>, ApiError> {
        let file = self.get(id).await?;
        self.read(&file).await
    }

    pub async fn read(&self, file: &TemporaryFile) -> Result<Vec<u8>, ApiError> {
        self.storage.read(&file.file_path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ApiError::NotFound(format!("File {} not found in storage", file.id))
            } else {
                ApiError::Internal(e.into())
            }
        })
    }

    pub fn is_expired(&self, file: &TemporaryFile) -> bool {
        file.is_expired_at(self.clock.now())
    }

    /// Whether the bytes are present, independent of expiry
    pub async fn file_exists(&self, file: &TemporaryFile) -> bool {
        self.storage.exists(&file.file_path).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let file = self.get(id).await?;
        self.remove(&file).await
    }

    /// Physical bytes first (failures are logged and ignored), then the row.
    pub async fn remove(&self, file: &TemporaryFile) -> Result<(), ApiError> {
        match self.storage.delete(&file.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file_id = %file.id, "Bytes already gone for {}", file.file_path);
            }
            Err(e) => {
                warn!(file_id = %file.id, "Failed to delete {}: {}", file.file_path, e);
            }
        }

        sqlx::query("DELETE FROM temporary_files WHERE id = ?")
            .bind(file.id.to_string())
            .execute(&self.db)
            .await?;

        info!(file_id = %file.id, "Deleted temporary file {}", file.original_filename);
        Ok(())
    }

    /// Files whose expiry has passed, oldest first
    pub async fn expired(&self) -> Result<Vec<TemporaryFile>, ApiError> {
        let rows: Vec<DbTemporaryFile> =
            sqlx::query_as(&format!("{} WHERE expires_at < ? ORDER BY expires_at", SELECT_FILE))
                .bind(clock::to_db(self.clock.now()))
                .fetch_all(&self.db)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn all(&self) -> Result<Vec<TemporaryFile>, ApiError> {
        let rows: Vec<DbTemporaryFile> =
            sqlx::query_as(&format!("{} ORDER BY uploaded_at", SELECT_FILE))
                .fetch_all(&self.db)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Non-expired files, newest first
    pub async fn list_active(&self) -> Result<Vec<TemporaryFile>, ApiError> {
        let rows: Vec<DbTemporaryFile> = sqlx::query_as(&format!(
            "{} WHERE expires_at >= ? ORDER BY uploaded_at DESC",
            SELECT_FILE
        ))
        .bind(clock::to_db(self.clock.now()))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Delete every expired file, returning how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize, ApiError> {
        let expired = self.expired().await?;
        Ok(self.remove_each(&expired).await)
    }

    /// Delete every file regardless of expiry.
    pub async fn sweep_all(&self) -> Result<usize, ApiError> {
        let files = self.all().await?;
        Ok(self.remove_each(&files).await)
    }

    async fn remove_each(&self, files: &[TemporaryFile]) -> usize {
        let mut deleted = 0;
        for file in files {
            match self.remove(file).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(file_id = %file.id, "Skipping file during sweep: {}", e),
            }
        }
        deleted
    }

    pub async fn stats(&self) -> Result<FileStats, ApiError> {
        let now = clock::to_db(self.clock.now());
        let (total_files,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM temporary_files")
            .fetch_one(&self.db)
            .await?;
        let (active_files, active_bytes): (i64, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), SUM(file_size) FROM temporary_files WHERE expires_at >= ?",
        )
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        let total_storage_bytes = active_bytes.unwrap_or(0);
        Ok(FileStats {
            total_files,
            active_files,
            expired_files: total_files - active_files,
            total_storage_bytes,
            total_storage_mb: bytes_to_mb(total_storage_bytes),
        })
    }
}

/// Megabytes rounded to two decimals
pub fn bytes_to_mb(bytes: i64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// MIME type for a filename, by extension
pub fn infer_mime_type(filename: &str) -> &'static str {
    match extension(filename).as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("webp") => "image/webp",
        Some("zip") => "application/zip",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        _ => OCTET_STREAM,
    }
}

pub fn resolve_mime_type(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim) {
        Some(mime) if !mime.is_empty() && mime != OCTET_STREAM => mime.to_ascii_lowercase(),
        _ => infer_mime_type(filename).to_string(),
    }
}

/// Check an upload against the size limit and the type allow-list.
///
/// The declared type must be allowed, or be generic (`application/octet-stream`
/// or absent) with an allowed extension.
pub fn validate_upload(
    filename: &str,
    declared_mime: Option<&str>,
    size: usize,
) -> Result<(), ApiError> {
    if size == 0 {
        return Err(ApiError::Validation("The submitted file is empty".into()));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ApiError::Validation(format!(
            "File size exceeds {}MB limit",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }

    let declared = declared_mime
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty());

    match declared.as_deref() {
        Some(mime) if ALLOWED_MIME_TYPES.contains(&mime) => Ok(()),
        None | Some(OCTET_STREAM) => {
            let allowed = extension(filename)
                .map(|ext| ALLOWED_EXTENSIONS.contains(&format!(".{}", ext).as_str()))
                .unwrap_or(false);
            if allowed {
                Ok(())
            } else {
                Err(ApiError::Validation(format!(
                    "File extension not allowed. Allowed extensions: {}",
                    ALLOWED_EXTENSIONS.join(", ")
                )))
            }
        }
        Some(mime) => Err(ApiError::Validation(format!(
            "File type {} not allowed. Allowed types: {}",
            mime,
            ALLOWED_MIME_TYPES.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::run_migrations;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use sqlx::sqlite::SqlitePoolOptions;

    struct Fixture {
        store: TemporaryFileStore,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let storage = LocalStorage::new(dir.path().join("media")).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ));
        Fixture {
            store: TemporaryFileStore::new(pool, storage, clock.clone()),
            clock,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_create_sets_one_hour_expiry_and_dated_path() {
        let fx = fixture().await;
        let file = fx.store.create("a.pdf", b"%PDF-1.7", None).await.unwrap();

        assert_eq!(file.expires_at - file.uploaded_at, Duration::hours(1));
        assert!(file.file_path.starts_with("uploads/2024/06/01/"));
        assert!(file.file_path.ends_with(".pdf"));
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(fx.store.get(file.id).await.unwrap(), file);
    }

    #[tokio::test]
    async fn test_processed_outputs_live_under_processed() {
        let fx = fixture().await;
        let file = fx.store.create_processed("out.zip", b"PK").await.unwrap();
        assert!(file.file_path.starts_with("processed/"));
        assert_eq!(file.mime_type, "application/zip");
    }

    #[tokio::test]
    async fn test_expiry_is_lazy_and_independent_of_bytes() {
        let fx = fixture().await;
        let file = fx.store.create("a.pdf", b"%PDF", None).await.unwrap();

        fx.clock.advance(Duration::minutes(60));
        assert!(!fx.store.is_expired(&file));

        fx.clock.advance(Duration::seconds(1));
        assert!(fx.store.is_expired(&file));
        assert!(fx.store.file_exists(&file).await);
        assert_eq!(fx.store.open(file.id).await.unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_bytes() {
        let fx = fixture().await;
        let file = fx.store.create("a.pdf", b"%PDF", None).await.unwrap();
        fx.store.storage.delete(&file.file_path).await.unwrap();

        assert!(!fx.store.file_exists(&file).await);
        fx.store.delete(file.id).await.unwrap();
        assert!(matches!(
            fx.store.get(file.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_unknown_id_is_not_found() {
        let fx = fixture().await;
        assert!(matches!(
            fx.store.open(Uuid::new_v4()).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let fx = fixture().await;
        let old = fx.store.create("old.pdf", b"old", None).await.unwrap();
        fx.clock.advance(Duration::minutes(90));
        let fresh = fx.store.create("fresh.png", b"new", None).await.unwrap();

        assert_eq!(fx.store.sweep_expired().await.unwrap(), 1);
        assert!(fx.store.get(old.id).await.is_err());
        assert!(!fx.store.file_exists(&old).await);
        assert!(fx.store.get(fresh.id).await.is_ok());
        assert_eq!(fx.store.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_all_ignores_expiry() {
        let fx = fixture().await;
        fx.store.create("a.pdf", b"a", None).await.unwrap();
        fx.store.create("b.pdf", b"b", None).await.unwrap();
        assert_eq!(fx.store.sweep_all().await.unwrap(), 2);
        assert!(fx.store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_active_and_stats() {
        let fx = fixture().await;
        fx.store.create("old.pdf", &[0u8; 10], None).await.unwrap();
        fx.clock.advance(Duration::hours(2));
        let newer = fx.store.create("new.pdf", &[0u8; 30], None).await.unwrap();
        let newest = fx.store.create("newest.pdf", &[0u8; 5], None).await.unwrap();

        let active: Vec<Uuid> = fx.store.list_active().await.unwrap().iter().map(|f| f.id).collect();
        assert_eq!(active.len(), 2);
        assert!(active.contains(&newer.id) && active.contains(&newest.id));

        let stats = fx.store.stats().await.unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.active_files, 2);
        assert_eq!(stats.expired_files, 1);
        assert_eq!(stats.total_storage_bytes, 35);
    }

    #[test]
    fn test_mime_inference() {
        assert_eq!(infer_mime_type("scan.JPG"), "image/jpeg");
        assert_eq!(infer_mime_type("deck.pptx"), ALLOWED_MIME_TYPES[12]);
        assert_eq!(infer_mime_type("README"), OCTET_STREAM);
        assert_eq!(resolve_mime_type(Some(OCTET_STREAM), "x.png"), "image/png");
        assert_eq!(resolve_mime_type(Some("image/gif"), "x.png"), "image/gif");
    }

    #[test]
    fn test_upload_validation() {
        assert!(validate_upload("a.pdf", Some("application/pdf"), 10).is_ok());
        assert!(validate_upload("a.docx", Some(OCTET_STREAM), 10).is_ok());
        assert!(validate_upload("a.exe", Some(OCTET_STREAM), 10).is_err());
        assert!(validate_upload("a.pdf", Some("text/html"), 10).is_err());
        assert!(validate_upload("a.pdf", None, 0).is_err());
        assert!(validate_upload("a.pdf", None, MAX_UPLOAD_BYTES + 1).is_err());
    }

    #[test]
    fn test_bytes_to_mb_rounds() {
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
        assert_eq!(bytes_to_mb(1_500_000), 1.43);
    }
}
