//! Top-level sync coordination
//!
//! Runs one or many entity syncs over one shared connection pool, keeps
//! failure domains isolated per entity type, and exposes the status and
//! retry surface consumed by the operator tooling and the (out of scope)
//! dashboard layer.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{ApiClient, RestEntitySource};
use crate::config::SyncConfig;
use crate::entities::EntityKind;
use crate::error::{Result, SyncError};
use crate::models::{ActiveRunInfo, EntityStatus, SyncMode, SyncResult};
use crate::progress::ProgressTracker;
use crate::runner::EntityRunner;
use crate::schema::SchemaReconciler;
use crate::upsert::UpsertEngine;

/// Coordinator over every configured entity type
pub struct SyncOrchestrator {
    client: Arc<ApiClient>,
    progress: Arc<ProgressTracker>,
    runner: EntityRunner,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    /// Wire up the component family over one shared pool
    pub fn new(pool: PgPool, config: &SyncConfig) -> Result<Self> {
        let client = Arc::new(
            ApiClient::new(&config.api).map_err(SyncError::Fetch)?,
        );
        let progress = Arc::new(ProgressTracker::new(pool.clone()));
        let schema = Arc::new(SchemaReconciler::new(pool.clone()));
        let engine = Arc::new(UpsertEngine::new(pool, schema));
        let runner = EntityRunner::new(progress.clone(), engine);

        Ok(Self {
            client,
            progress,
            runner,
            cancel: CancellationToken::new(),
        })
    }

    /// Token that cancels in-flight runs at their next page boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sync one entity type. Never propagates an error: the outcome, good
    /// or bad, is in the returned result.
    pub async fn sync_one(&self, kind: EntityKind, mode: SyncMode) -> SyncResult {
        let source = RestEntitySource::new(self.client.clone(), kind.config());
        self.runner.run(&source, mode, &self.cancel).await
    }

    /// Sync every configured entity type concurrently.
    ///
    /// Failure domains are isolated: one entity failing does not stop the
    /// others, and every entity reports its own result.
    pub async fn sync_all(&self, mode: SyncMode) -> Vec<SyncResult> {
        info!(%mode, entities = EntityKind::all().len(), "Starting sync of all entities");

        let results = join_all(
            EntityKind::all()
                .iter()
                .map(|kind| self.sync_one(*kind, mode)),
        )
        .await;

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "Sync finished with failures");
        } else {
            info!(total = results.len(), "Sync of all entities completed");
        }

        results
    }

    /// Re-run the entity and mode of a dead run.
    ///
    /// The dead record is terminal and stays untouched; the retry is a new
    /// logical run starting from the current watermark, not from the dead
    /// run's offset.
    pub async fn retry(&self, run_id: Uuid) -> Result<SyncResult> {
        let dead = self
            .progress
            .find_run(run_id)
            .await?
            .ok_or(SyncError::RunNotFound(run_id))?;

        if !dead.run_status().map(|s| s.is_terminal()).unwrap_or(true) {
            return Err(SyncError::RunStillActive(run_id));
        }

        let kind = dead.entity_kind().ok_or_else(|| {
            SyncError::Run(format!(
                "Run {} references unknown entity type {}",
                run_id, dead.entity_type
            ))
        })?;
        let mode = dead.sync_mode().ok_or_else(|| {
            SyncError::Run(format!(
                "Run {} has unparseable mode {}",
                run_id, dead.mode
            ))
        })?;

        info!(%run_id, entity = dead.entity_type.as_str(), %mode, "Retrying dead run");
        Ok(self.sync_one(kind, mode).await)
    }

    /// Rows currently mirrored for an entity type
    pub async fn count(&self, kind: EntityKind) -> Result<i64> {
        self.progress.destination_count(kind.config()).await
    }

    /// Timestamp of the last successful sync for an entity type
    pub async fn last_sync_date(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>> {
        self.progress.watermark(kind.config()).await
    }

    /// Per-entity status summary: watermark state plus any active run
    pub async fn status(&self) -> Result<Vec<EntityStatus>> {
        let mut statuses = Vec::with_capacity(EntityKind::all().len());

        for kind in EntityKind::all() {
            let entity = kind.config();
            let state = self.progress.sync_state(entity).await?;
            let active = self.progress.active_run(entity).await?;

            statuses.push(EntityStatus {
                entity_type: entity.name.to_string(),
                last_synced_at: state.as_ref().and_then(|s| s.last_synced_at),
                last_count: state.as_ref().map(|s| s.last_count).unwrap_or(0),
                total_count: state.as_ref().map(|s| s.total_count).unwrap_or(0),
                active_run: active.map(|run| ActiveRunInfo {
                    run_id: run.id,
                    mode: run.mode,
                    current_offset: run.current_offset,
                    items_processed: run.items_processed,
                    started_at: run.started_at,
                }),
            });
        }

        Ok(statuses)
    }
}
