//! Operation Tracker
//!
//! An operation records one transformation request and its outcome. Its
//! lifecycle is the [`OperationState`] machine:
//!
//! ```text
//! Pending -> Processing -> Completed { output_file }
//!                       -> Failed { error_message }
//! ```
//!
//! Transitions return the next state instead of mutating in place, and the
//! tracker persists the result. Records expire two hours after creation.

use crate::clock::{self, Clock};
use crate::error::ApiError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifetime of an operation record
pub const OPERATION_TTL_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Merge,
    Split,
    Compress,
    ConvertToImage,
    ConvertFromImage,
    Rotate,
    Protect,
    Unlock,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Merge => "merge",
            OperationType::Split => "split",
            OperationType::Compress => "compress",
            OperationType::ConvertToImage => "convert_to_image",
            OperationType::ConvertFromImage => "convert_from_image",
            OperationType::Rotate => "rotate",
            OperationType::Protect => "protect",
            OperationType::Unlock => "unlock",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "merge" => OperationType::Merge,
            "split" => OperationType::Split,
            "compress" => OperationType::Compress,
            "convert_to_image" => OperationType::ConvertToImage,
            "convert_from_image" => OperationType::ConvertFromImage,
            "rotate" => OperationType::Rotate,
            "protect" => OperationType::Protect,
            "unlock" => OperationType::Unlock,
            other => anyhow::bail!("unknown operation type {:?}", other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {action} an operation that is {from}")]
pub struct TransitionError {
    pub from: OperationStatus,
    pub action: &'static str,
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::Internal(err.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Pending,
    Processing {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        output_file: Uuid,
    },
    Failed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error_message: String,
    },
}

impl OperationState {
    pub fn status(&self) -> OperationStatus {
        match self {
            OperationState::Pending => OperationStatus::Pending,
            OperationState::Processing { .. } => OperationStatus::Processing,
            OperationState::Completed { .. } => OperationStatus::Completed,
            OperationState::Failed { .. } => OperationStatus::Failed,
        }
    }

    /// Pending or processing → processing, stamping the start time.
    pub fn start(self, now: DateTime<Utc>) -> Result<Self, TransitionError> {
        match self {
            OperationState::Pending | OperationState::Processing { .. } => {
                Ok(OperationState::Processing { started_at: now })
            }
            other => Err(TransitionError {
                from: other.status(),
                action: "start",
            }),
        }
    }

    pub fn complete(self, now: DateTime<Utc>, output_file: Uuid) -> Result<Self, TransitionError> {
        match self {
            OperationState::Processing { started_at } => Ok(OperationState::Completed {
                started_at,
                completed_at: now,
                output_file,
            }),
            other => Err(TransitionError {
                from: other.status(),
                action: "complete",
            }),
        }
    }

    pub fn fail(
        self,
        now: DateTime<Utc>,
        error_message: impl Into<String>,
    ) -> Result<Self, TransitionError> {
        match self {
            OperationState::Processing { started_at } => Ok(OperationState::Failed {
                started_at,
                completed_at: now,
                error_message: error_message.into(),
            }),
            other => Err(TransitionError {
                from: other.status(),
                action: "fail",
            }),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            OperationState::Pending => None,
            OperationState::Processing { started_at }
            | OperationState::Completed { started_at, .. }
            | OperationState::Failed { started_at, .. } => Some(*started_at),
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            OperationState::Completed { completed_at, .. }
            | OperationState::Failed { completed_at, .. } => Some(*completed_at),
            _ => None,
        }
    }

    pub fn output_file(&self) -> Option<Uuid> {
        match self {
            OperationState::Completed { output_file, .. } => Some(*output_file),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            OperationState::Failed { error_message, .. } => Some(error_message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: Uuid,
    pub operation_type: OperationType,
    pub input_files: Vec<Uuid>,
    pub parameters: Value,
    pub state: OperationState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Operation {
    pub fn status(&self) -> OperationStatus {
        self.state.status()
    }

    /// Seconds between start and completion, once both are known
    pub fn duration_seconds(&self) -> Option<f64> {
        let started = self.state.started_at()?;
        let completed = self.state.completed_at()?;
        Some((completed - started).num_microseconds()? as f64 / 1_000_000.0)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, FromRow)]
struct DbOperation {
    id: String,
    operation_type: String,
    status: String,
    input_files: String,
    output_file: Option<String>,
    parameters: String,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    expires_at: String,
}

impl TryFrom<DbOperation> for Operation {
    type Error = anyhow::Error;

    fn try_from(row: DbOperation) -> Result<Self, Self::Error> {
        let started_at = row.started_at.as_deref().map(clock::from_db).transpose()?;
        let completed_at = row.completed_at.as_deref().map(clock::from_db).transpose()?;
        let missing = |what: &str| anyhow::anyhow!("operation {} is {} without {}", row.id, row.status, what);

        let state = match row.status.as_str() {
            "pending" => OperationState::Pending,
            "processing" => OperationState::Processing {
                started_at: started_at.ok_or_else(|| missing("started_at"))?,
            },
            "completed" => OperationState::Completed {
                started_at: started_at.ok_or_else(|| missing("started_at"))?,
                completed_at: completed_at.ok_or_else(|| missing("completed_at"))?,
                output_file: Uuid::parse_str(
                    row.output_file.as_deref().ok_or_else(|| missing("output_file"))?,
                )?,
            },
            "failed" => OperationState::Failed {
                started_at: started_at.ok_or_else(|| missing("started_at"))?,
                completed_at: completed_at.ok_or_else(|| missing("completed_at"))?,
                error_message: row.error_message.clone().unwrap_or_default(),
            },
            other => anyhow::bail!("unknown operation status {:?}", other),
        };

        Ok(Operation {
            id: Uuid::parse_str(&row.id)?,
            operation_type: row.operation_type.parse()?,
            input_files: serde_json::from_str(&row.input_files)?,
            parameters: serde_json::from_str(&row.parameters)?,
            state,
            created_at: clock::from_db(&row.created_at)?,
            expires_at: clock::from_db(&row.expires_at)?,
        })
    }
}

const SELECT_OPERATION: &str = r#"
    SELECT id, operation_type, status, input_files, output_file, parameters, error_message,
           created_at, started_at, completed_at, expires_at
    FROM pdf_operations
"#;

#[derive(Clone)]
pub struct OperationTracker {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl OperationTracker {
    pub fn new(db: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn create(
        &self,
        operation_type: OperationType,
        input_files: &[Uuid],
        parameters: Value,
    ) -> Result<Operation, ApiError> {
        let now = self.clock.now();
        let operation = Operation {
            id: Uuid::new_v4(),
            operation_type,
            input_files: input_files.to_vec(),
            parameters,
            state: OperationState::Pending,
            created_at: now,
            expires_at: now + Duration::hours(OPERATION_TTL_HOURS),
        };

        let input_json = serde_json::to_string(&operation.input_files)
            .map_err(|e| ApiError::Internal(e.into()))?;
        let params_json = serde_json::to_string(&operation.parameters)
            .map_err(|e| ApiError::Internal(e.into()))?;

        sqlx::query(
            r#"
            INSERT INTO pdf_operations (id, operation_type, status, input_files, parameters, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(operation.id.to_string())
        .bind(operation_type.as_str())
        .bind(OperationStatus::Pending.as_str())
        .bind(input_json)
        .bind(params_json)
        .bind(clock::to_db(operation.created_at))
        .bind(clock::to_db(operation.expires_at))
        .execute(&self.db)
        .await?;

        info!(
            operation_id = %operation.id,
            operation_type = %operation_type,
            inputs = operation.input_files.len(),
            "Created operation"
        );
        Ok(operation)
    }

    pub async fn mark_processing(&self, operation: &mut Operation) -> Result<(), ApiError> {
        let next = operation.state.clone().start(self.clock.now())?;
        self.persist(operation, next).await
    }

    pub async fn mark_completed(
        &self,
        operation: &mut Operation,
        output_file: Uuid,
    ) -> Result<(), ApiError> {
        let next = operation
            .state
            .clone()
            .complete(self.clock.now(), output_file)?;
        self.persist(operation, next).await?;
        info!(operation_id = %operation.id, output_file = %output_file, "Operation completed");
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        operation: &mut Operation,
        error_message: &str,
    ) -> Result<(), ApiError> {
        let next = operation
            .state
            .clone()
            .fail(self.clock.now(), error_message)?;
        self.persist(operation, next).await?;
        warn!(operation_id = %operation.id, "Operation failed: {}", error_message);
        Ok(())
    }

    async fn persist(&self, operation: &mut Operation, next: OperationState) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE pdf_operations
            SET status = ?, output_file = ?, error_message = ?, started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(next.status().as_str())
        .bind(next.output_file().map(|id| id.to_string()))
        .bind(next.error_message().map(str::to_string))
        .bind(next.started_at().map(clock::to_db))
        .bind(next.completed_at().map(clock::to_db))
        .bind(operation.id.to_string())
        .execute(&self.db)
        .await?;

        operation.state = next;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Operation, ApiError> {
        let row: Option<DbOperation> =
            sqlx::query_as(&format!("{} WHERE id = ?", SELECT_OPERATION))
                .bind(id.to_string())
                .fetch_optional(&self.db)
                .await?;

        let row = row.ok_or_else(|| ApiError::NotFound(format!("Operation {} not found", id)))?;
        Ok(Operation::try_from(row)?)
    }

    pub fn is_expired(&self, operation: &Operation) -> bool {
        operation.is_expired_at(self.clock.now())
    }

    /// Delete operation records whose expiry has passed.
    pub async fn sweep_expired(&self) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM pdf_operations WHERE expires_at < ?")
            .bind(clock::to_db(self.clock.now()))
            .execute(&self.db)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "Swept expired operations");
        }
        Ok(deleted)
    }

    /// Number of operation records past their expiry
    pub async fn count_expired(&self) -> Result<i64, ApiError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pdf_operations WHERE expires_at < ?")
                .bind(clock::to_db(self.clock.now()))
                .fetch_one(&self.db)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::run_migrations;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    async fn tracker() -> (OperationTracker, Arc<ManualClock>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        (OperationTracker::new(pool, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_create_is_pending_with_two_hour_expiry() {
        let (tracker, _) = tracker().await;
        let inputs = vec![Uuid::new_v4(), Uuid::new_v4()];
        let op = tracker
            .create(OperationType::Merge, &inputs, json!({"output_filename": "m.pdf"}))
            .await
            .unwrap();

        assert_eq!(op.status(), OperationStatus::Pending);
        assert_eq!(op.expires_at - op.created_at, Duration::hours(2));
        assert_eq!(tracker.get(op.id).await.unwrap(), op);
    }

    #[tokio::test]
    async fn test_complete_lifecycle_is_persisted() {
        let (tracker, clock) = tracker().await;
        let mut op = tracker
            .create(OperationType::Rotate, &[Uuid::new_v4()], json!({}))
            .await
            .unwrap();

        tracker.mark_processing(&mut op).await.unwrap();
        clock.advance(Duration::milliseconds(1500));
        let output = Uuid::new_v4();
        tracker.mark_completed(&mut op, output).await.unwrap();

        let stored = tracker.get(op.id).await.unwrap();
        assert_eq!(stored.status(), OperationStatus::Completed);
        assert_eq!(stored.state.output_file(), Some(output));
        assert_eq!(stored.state.error_message(), None);
        assert_eq!(stored.duration_seconds(), Some(1.5));
    }

    #[tokio::test]
    async fn test_failed_lifecycle_keeps_message() {
        let (tracker, _) = tracker().await;
        let mut op = tracker
            .create(OperationType::Split, &[Uuid::new_v4()], json!({}))
            .await
            .unwrap();
        tracker.mark_processing(&mut op).await.unwrap();
        tracker.mark_failed(&mut op, "PDF a.pdf is encrypted").await.unwrap();

        let stored = tracker.get(op.id).await.unwrap();
        assert_eq!(stored.status(), OperationStatus::Failed);
        assert_eq!(stored.state.error_message(), Some("PDF a.pdf is encrypted"));
        assert_eq!(stored.state.output_file(), None);
        assert!(stored.state.completed_at().is_some());
    }

    #[tokio::test]
    async fn test_terminal_states_reject_transitions() {
        let (tracker, _) = tracker().await;
        let mut op = tracker
            .create(OperationType::Merge, &[], json!({}))
            .await
            .unwrap();

        assert!(tracker.mark_completed(&mut op, Uuid::new_v4()).await.is_err());
        tracker.mark_processing(&mut op).await.unwrap();
        tracker.mark_failed(&mut op, "boom").await.unwrap();
        assert!(tracker.mark_processing(&mut op).await.is_err());
        assert_eq!(tracker.get(op.id).await.unwrap().status(), OperationStatus::Failed);
    }

    #[tokio::test]
    async fn test_sweep_expired_operations() {
        let (tracker, clock) = tracker().await;
        let old = tracker.create(OperationType::Merge, &[], json!({})).await.unwrap();
        clock.advance(Duration::hours(3));
        let fresh = tracker.create(OperationType::Merge, &[], json!({})).await.unwrap();

        assert!(tracker.is_expired(&old));
        assert_eq!(tracker.count_expired().await.unwrap(), 1);
        assert_eq!(tracker.sweep_expired().await.unwrap(), 1);
        assert!(matches!(tracker.get(old.id).await, Err(ApiError::NotFound(_))));
        assert!(tracker.get(fresh.id).await.is_ok());
    }

    #[test]
    fn test_operation_type_names_round_trip() {
        for kind in [
            OperationType::Merge,
            OperationType::ConvertToImage,
            OperationType::ConvertFromImage,
            OperationType::Unlock,
        ] {
            assert_eq!(kind.as_str().parse::<OperationType>().unwrap(), kind);
        }
        assert!("shred".parse::<OperationType>().is_err());
    }

    fn transition() -> impl Strategy<Value = u8> {
        0u8..3
    }

    proptest! {
        #[test]
        fn status_only_moves_forward(steps in prop::collection::vec(transition(), 0..8)) {
            let rank = |s: OperationStatus| match s {
                OperationStatus::Pending => 0,
                OperationStatus::Processing => 1,
                OperationStatus::Completed | OperationStatus::Failed => 2,
            };
            let mut state = OperationState::Pending;
            for step in steps {
                let before = state.status();
                let next = match step {
                    0 => state.clone().start(t0()),
                    1 => state.clone().complete(t0(), Uuid::nil()),
                    _ => state.clone().fail(t0(), "x"),
                };
                if let Ok(next) = next {
                    prop_assert!(rank(next.status()) >= rank(before));
                    prop_assert!(rank(before) < 2);
                    if next.status() != OperationStatus::Completed {
                        prop_assert!(next.output_file().is_none());
                    }
                    if next.status() != OperationStatus::Failed {
                        prop_assert!(next.error_message().is_none());
                    }
                    state = next;
                }
            }
        }
    }
}
