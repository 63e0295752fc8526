//! Data models for sync bookkeeping
//!
//! Rows of the `sync_runs` and `sync_state` tables plus the structured
//! result every sync invocation returns. Run records form an audit trail:
//! they are created when a run starts, mutated on every checkpoint and
//! status transition, and never deleted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::EntityKind;

/// Fixed lower bound used by full syncs, far enough back to cover any
/// plausible source history.
pub const FULL_SYNC_EPOCH: &str = "2000-01-01T00:00:00Z";

/// Floor applied to incremental syncs that have no watermark yet, to bound
/// backlog growth on first run.
pub const INCREMENTAL_FLOOR_DAYS: i64 = 30;

/// How a run bounds the records it pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// From the last successful watermark (floored at 30 days)
    Incremental,
    /// Everything since the fixed epoch start
    Full,
    /// Everything newer than `now - N days`
    Window { days: u32 },
}

impl SyncMode {
    /// Whether this mode restarts pagination at offset 0, abandoning any
    /// in-progress run for the entity type.
    pub fn is_exclusive(&self) -> bool {
        !matches!(self, SyncMode::Incremental)
    }

    /// Effective lower-bound timestamp for this mode
    pub fn lower_bound(&self, watermark: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            SyncMode::Full => FULL_SYNC_EPOCH
                .parse()
                .unwrap_or_else(|_| now - Duration::days(365 * 20)),
            SyncMode::Window { days } => now - Duration::days(i64::from(*days)),
            SyncMode::Incremental => {
                let floor = now - Duration::days(INCREMENTAL_FLOOR_DAYS);
                match watermark {
                    Some(mark) if mark > floor => mark,
                    _ => floor,
                }
            },
        }
    }

    /// Whether the runner must stop paginating once a page reaches records
    /// older than the lower bound. Incremental and full runs trust the
    /// server-side `updated_since` filter instead.
    pub fn halts_at_cutoff(&self) -> bool {
        matches!(self, SyncMode::Window { .. })
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Incremental => write!(f, "incremental"),
            SyncMode::Full => write!(f, "full"),
            SyncMode::Window { days } => write!(f, "window:{}", days),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = stockmirror_common::MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(SyncMode::Incremental),
            "full" => Ok(SyncMode::Full),
            other => {
                if let Some(days) = other.strip_prefix("window:") {
                    let days = days.parse::<u32>().map_err(|_| {
                        stockmirror_common::MirrorError::Parse(format!(
                            "Invalid sync mode: {}",
                            other
                        ))
                    })?;
                    Ok(SyncMode::Window { days })
                } else {
                    Err(stockmirror_common::MirrorError::Parse(format!(
                        "Invalid sync mode: {}",
                        other
                    )))
                }
            },
        }
    }
}

/// Run status state machine: `in_progress` is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
    Abandoned,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = stockmirror_common::MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "abandoned" => Ok(RunStatus::Abandoned),
            other => Err(stockmirror_common::MirrorError::Parse(format!(
                "Invalid run status: {}",
                other
            ))),
        }
    }
}

/// One row of `sync_runs`: the persisted checkpoint for a run
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncRun {
    pub id: Uuid,
    pub entity_type: String,
    pub mode: String,
    pub current_offset: i64,
    pub batch_number: i32,
    pub items_processed: i64,
    pub total_items: Option<i64>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl SyncRun {
    pub fn run_status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }

    pub fn sync_mode(&self) -> Option<SyncMode> {
        self.mode.parse().ok()
    }

    pub fn entity_kind(&self) -> Option<EntityKind> {
        self.entity_type.parse().ok()
    }
}

/// One row of `sync_state`: the durable per-entity watermark
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EntitySyncState {
    pub entity_type: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_count: i64,
    pub total_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Per-entity status summary exposed to the dashboard layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityStatus {
    pub entity_type: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_count: i64,
    pub total_count: i64,
    pub active_run: Option<ActiveRunInfo>,
}

/// Snapshot of an in-progress run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRunInfo {
    pub run_id: Uuid,
    pub mode: String,
    pub current_offset: i64,
    pub items_processed: i64,
    pub started_at: DateTime<Utc>,
}

/// Structured result of one sync invocation.
///
/// A sync never throws past the orchestrator boundary; success and failure
/// both land here, with every fetched record accounted for in exactly one
/// of saved / skipped / failed (less in-run duplicates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub entity_type: String,
    pub run_id: Option<Uuid>,
    pub items_fetched: u64,
    pub items_saved: u64,
    pub items_skipped: u64,
    pub items_failed: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            run_id: None,
            items_fetched: 0,
            items_saved: 0,
            items_skipped: 0,
            items_failed: 0,
            success: false,
            error: None,
        }
    }

    pub fn failed(entity_type: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(entity_type)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_display_roundtrip() {
        for mode in [
            SyncMode::Incremental,
            SyncMode::Full,
            SyncMode::Window { days: 7 },
        ] {
            let parsed: SyncMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!("window:".parse::<SyncMode>().is_err());
        assert!("window:x".parse::<SyncMode>().is_err());
        assert!("hourly".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_sync_mode_exclusivity() {
        assert!(!SyncMode::Incremental.is_exclusive());
        assert!(SyncMode::Full.is_exclusive());
        assert!(SyncMode::Window { days: 3 }.is_exclusive());
    }

    #[test]
    fn test_lower_bound_full_is_epoch() {
        let now = Utc::now();
        let bound = SyncMode::Full.lower_bound(Some(now), now);
        assert_eq!(bound, FULL_SYNC_EPOCH.parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_lower_bound_window() {
        let now = Utc::now();
        let bound = SyncMode::Window { days: 7 }.lower_bound(None, now);
        assert_eq!(bound, now - Duration::days(7));
    }

    #[test]
    fn test_lower_bound_incremental_uses_watermark() {
        let now = Utc::now();
        let mark = now - Duration::days(2);
        let bound = SyncMode::Incremental.lower_bound(Some(mark), now);
        assert_eq!(bound, mark);
    }

    #[test]
    fn test_lower_bound_incremental_floors_old_watermark() {
        let now = Utc::now();
        let ancient = now - Duration::days(400);
        let bound = SyncMode::Incremental.lower_bound(Some(ancient), now);
        assert_eq!(bound, now - Duration::days(INCREMENTAL_FLOOR_DAYS));
    }

    #[test]
    fn test_lower_bound_incremental_without_watermark() {
        let now = Utc::now();
        let bound = SyncMode::Incremental.lower_bound(None, now);
        assert_eq!(bound, now - Duration::days(INCREMENTAL_FLOOR_DAYS));
    }

    #[test]
    fn test_run_status_terminality() {
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Abandoned.is_terminal());
    }

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            RunStatus::InProgress,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Abandoned,
        ] {
            let parsed: RunStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_sync_result_failed() {
        let result = SyncResult::failed("products", "connection refused");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert_eq!(result.items_fetched, 0);
    }
}
