//! Expiry sweeps shared by the cleanup endpoint and the `cleanup` command

use crate::error::ApiError;
use crate::state::AppState;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOptions {
    /// Report what would be removed without removing anything
    pub dry_run: bool,
    /// Remove every file regardless of expiry
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub files_matched: usize,
    pub files_deleted: usize,
    pub operations_matched: u64,
    pub operations_deleted: u64,
    /// Filenames that were (or would be) removed
    pub files: Vec<String>,
}

pub async fn run_cleanup(
    state: &AppState,
    options: CleanupOptions,
) -> Result<CleanupReport, ApiError> {
    let candidates = if options.force {
        state.files.all().await?
    } else {
        state.files.expired().await?
    };
    let expired_operations = u64::try_from(state.operations.count_expired().await?).unwrap_or(0);

    let mut report = CleanupReport {
        dry_run: options.dry_run,
        files_matched: candidates.len(),
        operations_matched: expired_operations,
        files: candidates
            .iter()
            .map(|f| f.original_filename.clone())
            .collect(),
        ..Default::default()
    };

    if options.dry_run {
        info!(
            files = report.files_matched,
            operations = report.operations_matched,
            "Dry run: nothing deleted"
        );
        return Ok(report);
    }

    report.files_deleted = if options.force {
        state.files.sweep_all().await?
    } else {
        state.files.sweep_expired().await?
    };
    report.operations_deleted = state.operations.sweep_expired().await?;

    info!(
        files = report.files_deleted,
        operations = report.operations_deleted,
        force = options.force,
        "Cleanup finished"
    );
    Ok(report)
}
