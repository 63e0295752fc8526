//! Persisted run progress and watermarks
//!
//! `sync_runs` holds one row per run: the restartable checkpoint while the
//! run is in flight and an immutable audit record once it reaches a terminal
//! state. `sync_state` holds the per-entity high-water mark consulted when
//! computing the window of the next incremental run; it only moves on
//! successful completion.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::EntityConfig;
use crate::error::Result;
use crate::models::{EntitySyncState, RunStatus, SyncMode, SyncRun};

const RUN_COLUMNS: &str = "id, entity_type, mode, current_offset, batch_number, \
                           items_processed, total_items, status, started_at, \
                           last_updated, completed_at, error_message";

/// Partial checkpoint update; unset fields keep their stored value
#[derive(Debug, Default, Clone)]
pub struct Checkpoint {
    pub current_offset: Option<i64>,
    pub batch_number: Option<i32>,
    pub items_processed: Option<i64>,
    pub total_items: Option<i64>,
}

/// Store for run checkpoints and entity watermarks
pub struct ProgressTracker {
    pool: PgPool,
}

impl ProgressTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Obtain the run record to drive.
    ///
    /// Exclusive modes (full, windowed) abandon any in-progress run for the
    /// entity and start fresh at offset 0. Incremental mode resumes an
    /// existing in-progress run unchanged, creating one only when none
    /// exists.
    pub async fn start_or_resume(
        &self,
        entity: &EntityConfig,
        mode: SyncMode,
    ) -> Result<SyncRun> {
        if mode.is_exclusive() {
            let abandoned = self.abandon_active(entity).await?;
            if abandoned > 0 {
                warn!(
                    entity = entity.name,
                    abandoned,
                    "Abandoned in-progress runs before exclusive sync"
                );
            }
            return self.create_run(entity, mode).await;
        }

        if let Some(run) = self.active_run(entity).await? {
            info!(
                entity = entity.name,
                run_id = %run.id,
                offset = run.current_offset,
                "Resuming in-progress run"
            );
            return Ok(run);
        }

        self.create_run(entity, mode).await
    }

    /// Mark every in-progress run for the entity as abandoned
    pub async fn abandon_active(&self, entity: &EntityConfig) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE sync_runs \
             SET status = $2, completed_at = now(), last_updated = now() \
             WHERE entity_type = $1 AND status = $3",
        )
        .bind(entity.name)
        .bind(RunStatus::Abandoned.as_str())
        .bind(RunStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// The in-progress run for an entity, if any
    pub async fn active_run(&self, entity: &EntityConfig) -> Result<Option<SyncRun>> {
        let sql = format!(
            "SELECT {} FROM sync_runs \
             WHERE entity_type = $1 AND status = $2 \
             ORDER BY started_at DESC LIMIT 1",
            RUN_COLUMNS
        );
        let run = sqlx::query_as::<_, SyncRun>(&sql)
            .bind(entity.name)
            .bind(RunStatus::InProgress.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(run)
    }

    /// Look up any run by id, terminal or not
    pub async fn find_run(&self, run_id: Uuid) -> Result<Option<SyncRun>> {
        let sql = format!("SELECT {} FROM sync_runs WHERE id = $1", RUN_COLUMNS);
        let run = sqlx::query_as::<_, SyncRun>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(run)
    }

    async fn create_run(&self, entity: &EntityConfig, mode: SyncMode) -> Result<SyncRun> {
        let sql = format!(
            "INSERT INTO sync_runs \
             (id, entity_type, mode, current_offset, batch_number, items_processed, \
              status, started_at, last_updated) \
             VALUES ($1, $2, $3, 0, 0, 0, $4, now(), now()) \
             RETURNING {}",
            RUN_COLUMNS
        );
        let run = sqlx::query_as::<_, SyncRun>(&sql)
            .bind(Uuid::new_v4())
            .bind(entity.name)
            .bind(mode.to_string())
            .bind(RunStatus::InProgress.as_str())
            .fetch_one(&self.pool)
            .await?;

        info!(entity = entity.name, run_id = %run.id, %mode, "Started sync run");
        Ok(run)
    }

    /// Persist a partial checkpoint; always stamps `last_updated`.
    ///
    /// Callers invoke this strictly after the page the checkpoint describes
    /// has been durably upserted, so a crash in between replays the page
    /// into idempotent upserts rather than skipping it.
    pub async fn checkpoint(&self, run: &mut SyncRun, fields: Checkpoint) -> Result<()> {
        let updated: (DateTime<Utc>,) = sqlx::query_as(
            "UPDATE sync_runs SET \
                 current_offset = COALESCE($2, current_offset), \
                 batch_number = COALESCE($3, batch_number), \
                 items_processed = COALESCE($4, items_processed), \
                 total_items = COALESCE($5, total_items), \
                 last_updated = now() \
             WHERE id = $1 \
             RETURNING last_updated",
        )
        .bind(run.id)
        .bind(fields.current_offset)
        .bind(fields.batch_number)
        .bind(fields.items_processed)
        .bind(fields.total_items)
        .fetch_one(&self.pool)
        .await?;

        if let Some(offset) = fields.current_offset {
            run.current_offset = offset;
        }
        if let Some(batch) = fields.batch_number {
            run.batch_number = batch;
        }
        if let Some(items) = fields.items_processed {
            run.items_processed = items;
        }
        if fields.total_items.is_some() {
            run.total_items = fields.total_items;
        }
        run.last_updated = updated.0;

        Ok(())
    }

    /// Transition a run to its terminal state.
    ///
    /// Terminal records are never resumed; a retry is a new logical run
    /// driven by the watermark, not by the dead record's offset.
    pub async fn complete(
        &self,
        run: &mut SyncRun,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        let status = if success {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };

        sqlx::query(
            "UPDATE sync_runs \
             SET status = $2, error_message = $3, completed_at = now(), last_updated = now() \
             WHERE id = $1",
        )
        .bind(run.id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        run.status = status.as_str().to_string();
        run.error_message = error.map(str::to_string);
        run.completed_at = Some(Utc::now());

        info!(
            entity = run.entity_type.as_str(),
            run_id = %run.id,
            status = status.as_str(),
            items = run.items_processed,
            "Sync run finished"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Watermarks
    // ------------------------------------------------------------------

    /// Timestamp of the last successful run for an entity
    pub async fn watermark(&self, entity: &EntityConfig) -> Result<Option<DateTime<Utc>>> {
        let mark: Option<(Option<DateTime<Utc>>,)> = sqlx::query_as(
            "SELECT last_synced_at FROM sync_state WHERE entity_type = $1",
        )
        .bind(entity.name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(mark.and_then(|(m,)| m))
    }

    /// Advance the watermark to now. Called only after successful completion.
    pub async fn update_watermark(
        &self,
        entity: &EntityConfig,
        last_count: i64,
        total_count: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_state (entity_type, last_synced_at, last_count, total_count, updated_at) \
             VALUES ($1, now(), $2, $3, now()) \
             ON CONFLICT (entity_type) DO UPDATE SET \
                 last_synced_at = now(), \
                 last_count = EXCLUDED.last_count, \
                 total_count = EXCLUDED.total_count, \
                 updated_at = now()",
        )
        .bind(entity.name)
        .bind(last_count)
        .bind(total_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Watermark row for one entity
    pub async fn sync_state(&self, entity: &EntityConfig) -> Result<Option<EntitySyncState>> {
        let state = sqlx::query_as::<_, EntitySyncState>(
            "SELECT entity_type, last_synced_at, last_count, total_count, updated_at \
             FROM sync_state WHERE entity_type = $1",
        )
        .bind(entity.name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    /// Watermark rows for every entity that has completed at least one run
    pub async fn all_sync_state(&self) -> Result<Vec<EntitySyncState>> {
        let states = sqlx::query_as::<_, EntitySyncState>(
            "SELECT entity_type, last_synced_at, last_count, total_count, updated_at \
             FROM sync_state ORDER BY entity_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(states)
    }

    /// Rows currently in the destination table for an entity
    pub async fn destination_count(&self, entity: &EntityConfig) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            crate::schema::quote_ident(entity.table)
        );
        let count: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await.or_else(
            |err| match &err {
                // A table that has never received a record does not exist yet.
                sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01") => Ok((0,)),
                _ => Err(err),
            },
        )?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_default_is_empty() {
        let fields = Checkpoint::default();
        assert!(fields.current_offset.is_none());
        assert!(fields.batch_number.is_none());
        assert!(fields.items_processed.is_none());
        assert!(fields.total_items.is_none());
    }

    #[test]
    fn test_run_columns_cover_model() {
        // The column list drives every SELECT/RETURNING; keep it aligned
        // with the SyncRun field set.
        let names: Vec<&str> = RUN_COLUMNS
            .split(',')
            .map(|c| c.trim())
            .collect();
        assert_eq!(names.len(), 12);
        assert_eq!(names.first(), Some(&"id"));
        assert_eq!(names.last(), Some(&"error_message"));
    }
}
