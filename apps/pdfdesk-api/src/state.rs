//! Application state for the pdfdesk API

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::files::TemporaryFileStore;
use crate::operations::OperationTracker;
use crate::storage::LocalStorage;
use anyhow::{Context, Result};
use pdfdesk_core::PageRasterizer;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

pub struct AppState {
    pub db: SqlitePool,
    pub files: TemporaryFileStore,
    pub operations: OperationTracker,
    pub rasterizer: Arc<dyn PageRasterizer>,
    /// Base for absolute download links, without a trailing slash
    pub public_url: String,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self> {
        if let Some(dir) = config.database_dir() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating database directory {}", dir.display()))?;
        }

        tracing::info!("Connecting to database: {}", config.database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&config.database_url)
            .await?;

        // Run migrations
        run_migrations(&pool).await?;

        let storage = LocalStorage::new(&config.storage_root)
            .await
            .with_context(|| {
                format!("creating storage root {}", config.storage_root.display())
            })?;
        tracing::info!("Storing files under {}", storage.base_path().display());

        Ok(Self::from_parts(
            pool,
            storage,
            Arc::new(SystemClock),
            default_rasterizer(config),
            config.public_url.clone(),
        ))
    }

    /// Assemble state from already-built components.
    pub fn from_parts(
        db: SqlitePool,
        storage: LocalStorage,
        clock: Arc<dyn Clock>,
        rasterizer: Arc<dyn PageRasterizer>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            files: TemporaryFileStore::new(db.clone(), storage, clock.clone()),
            operations: OperationTracker::new(db.clone(), clock),
            db,
            rasterizer,
            public_url: public_url.into(),
        }
    }

    pub fn download_url(&self, file_id: impl std::fmt::Display) -> String {
        format!("{}/api/files/download/{}/", self.public_url, file_id)
    }
}

#[cfg(feature = "pdfium")]
fn default_rasterizer(config: &Config) -> Arc<dyn PageRasterizer> {
    Arc::new(pdfdesk_core::PdfiumRasterizer::new(
        config.pdfium_lib_path.clone(),
    ))
}

#[cfg(not(feature = "pdfium"))]
fn default_rasterizer(_config: &Config) -> Arc<dyn PageRasterizer> {
    Arc::new(Unavailable)
}

/// Stand-in when the server is built without pdfium
#[cfg(not(feature = "pdfium"))]
struct Unavailable;

#[cfg(not(feature = "pdfium"))]
impl PageRasterizer for Unavailable {
    fn render_pages(
        &self,
        _pdf: &[u8],
        _pages: &[u32],
        _dpi: u32,
    ) -> Result<Vec<pdfdesk_core::DynamicImage>, pdfdesk_core::PdfDeskError> {
        Err(pdfdesk_core::PdfDeskError::RenderError(
            "this server was built without pdfium support".into(),
        ))
    }
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS temporary_files (
            id TEXT PRIMARY KEY,
            original_filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_temporary_files_expires_at ON temporary_files(expires_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pdf_operations (
            id TEXT PRIMARY KEY,
            operation_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            input_files TEXT NOT NULL DEFAULT '[]',
            output_file TEXT,
            parameters TEXT NOT NULL DEFAULT '{}',
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for status lookups and expiry sweeps
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_pdf_operations_status ON pdf_operations(status)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_pdf_operations_expires_at ON pdf_operations(expires_at)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Migrations complete");
    Ok(())
}
