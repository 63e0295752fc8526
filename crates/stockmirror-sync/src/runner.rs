//! Per-entity sync runner
//!
//! Drives one entity type through the fetch → transform → upsert →
//! checkpoint loop until the source reports end-of-data or, for windowed
//! runs, until a page reaches records older than the cutoff. Pages are
//! processed strictly in order on one task; resumability depends on the
//! checkpoint being written only after the page it describes has been
//! durably upserted.
//!
//! Per-record failures are counted and the loop continues. Anything
//! run-scoped (fetch failure, checkpoint failure, cancellation) terminates
//! the run with a `failed` record; the runner never retries itself — that
//! is the orchestrator's job.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::EntitySyncSource;
use crate::entities::EntityConfig;
use crate::error::SyncError;
use crate::models::{SyncMode, SyncResult, SyncRun};
use crate::progress::{Checkpoint, ProgressTracker};
use crate::transform::parse_source_timestamp;
use crate::upsert::{UpsertEngine, UpsertOutcome};

/// Orchestrates the page loop for one entity type
pub struct EntityRunner {
    progress: Arc<ProgressTracker>,
    engine: Arc<UpsertEngine>,
}

impl EntityRunner {
    pub fn new(progress: Arc<ProgressTracker>, engine: Arc<UpsertEngine>) -> Self {
        Self { progress, engine }
    }

    /// Run one sync for the entity behind `source`.
    ///
    /// Always returns a structured result; errors terminal to the run are
    /// captured in it rather than propagated.
    pub async fn run(
        &self,
        source: &dyn EntitySyncSource,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> SyncResult {
        let entity = source.entity();
        let mut result = SyncResult::new(entity.name);

        let watermark = match self.progress.watermark(entity).await {
            Ok(mark) => mark,
            Err(err) => return SyncResult::failed(entity.name, err.to_string()),
        };
        let cutoff = mode.lower_bound(watermark, Utc::now());

        let mut run = match self.progress.start_or_resume(entity, mode).await {
            Ok(run) => run,
            Err(err) => return SyncResult::failed(entity.name, err.to_string()),
        };
        result.run_id = Some(run.id);

        info!(
            entity = entity.name,
            run_id = %run.id,
            %mode,
            cutoff = %cutoff,
            offset = run.current_offset,
            "Starting sync"
        );

        match self
            .drive(source, mode, cutoff, cancel, &mut run, &mut result)
            .await
        {
            Ok(()) => {
                if let Err(err) = self.finalize_success(entity, &mut run, &result).await {
                    result.error = Some(err.to_string());
                    return result;
                }
                result.success = true;
            },
            Err(err) => {
                let message = err.to_string();
                // Best effort: the run may have failed because the database
                // itself is gone.
                if let Err(complete_err) = self
                    .progress
                    .complete(&mut run, false, Some(&message))
                    .await
                {
                    warn!(
                        entity = entity.name,
                        run_id = %run.id,
                        error = %complete_err,
                        "Could not record run failure"
                    );
                }
                result.error = Some(message);
            },
        }

        result
    }

    async fn drive(
        &self,
        source: &dyn EntitySyncSource,
        mode: SyncMode,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
        run: &mut SyncRun,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let entity = source.entity();
        // The source repeats records across adjacent pages; dedup within
        // the run by canonical identifier.
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let page = source.fetch_page(run.current_offset, Some(cutoff)).await?;
            let fetched = page.records.len() as i64;
            result.items_fetched += page.records.len() as u64;

            let (records, halt) = if mode.halts_at_cutoff() {
                filter_to_window(entity, page.records, cutoff)
            } else {
                (page.records, false)
            };

            for raw in &records {
                let row = match source.transform(raw) {
                    Ok(row) => row,
                    Err(reason) => {
                        warn!(entity = entity.name, %reason, "Skipping record");
                        result.items_skipped += 1;
                        continue;
                    },
                };

                if !seen.insert(row.source_id.clone()) {
                    debug!(
                        entity = entity.name,
                        source_id = row.source_id.as_str(),
                        "Duplicate record within run, skipping"
                    );
                    continue;
                }

                match self.engine.upsert_row(entity, &row).await {
                    Ok(UpsertOutcome::Inserted) | Ok(UpsertOutcome::Updated) => {
                        result.items_saved += 1;
                    },
                    Ok(UpsertOutcome::Skipped) => {
                        result.items_skipped += 1;
                    },
                    Err(err) => {
                        warn!(
                            entity = entity.name,
                            source_id = row.source_id.as_str(),
                            error = %err,
                            "Record upsert failed, continuing"
                        );
                        result.items_failed += 1;
                    },
                }
            }

            // Checkpoint strictly after the page's records are durably
            // written: a crash before this line replays the page into
            // idempotent upserts.
            self.progress
                .checkpoint(
                    run,
                    Checkpoint {
                        current_offset: Some(run.current_offset + fetched),
                        batch_number: Some(run.batch_number + 1),
                        items_processed: Some(run.items_processed + records.len() as i64),
                        total_items: None,
                    },
                )
                .await?;

            if !page.has_more || halt {
                break;
            }
        }

        Ok(())
    }

    async fn finalize_success(
        &self,
        entity: &EntityConfig,
        run: &mut SyncRun,
        result: &SyncResult,
    ) -> Result<(), SyncError> {
        self.progress.complete(run, true, None).await?;

        let total = self.progress.destination_count(entity).await?;
        self.progress
            .update_watermark(entity, result.items_saved as i64, total)
            .await?;

        info!(
            entity = entity.name,
            run_id = %run.id,
            fetched = result.items_fetched,
            saved = result.items_saved,
            skipped = result.items_skipped,
            failed = result.items_failed,
            total,
            "Sync completed"
        );
        Ok(())
    }
}

/// Keep only records at or after the cutoff; report whether the page
/// reached past it.
///
/// Records without a parseable timestamp are kept: the window bound is a
/// stop condition, not a validity filter. Once any record in the page is
/// older than the cutoff, pagination halts after this page — the source
/// returns records newest-first within the window filter, so everything
/// beyond is older still.
fn filter_to_window(
    entity: &EntityConfig,
    records: Vec<Value>,
    cutoff: DateTime<Utc>,
) -> (Vec<Value>, bool) {
    let mut reached_cutoff = false;
    let kept: Vec<Value> = records
        .into_iter()
        .filter(|record| {
            match record
                .get(entity.updated_field)
                .and_then(Value::as_str)
                .and_then(parse_source_timestamp)
            {
                Some(updated) if updated < cutoff => {
                    reached_cutoff = true;
                    false
                },
                _ => true,
            }
        })
        .collect();

    (kept, reached_cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityKind;
    use chrono::Duration;
    use serde_json::json;

    fn entity() -> &'static EntityConfig {
        EntityKind::Warehouses.config()
    }

    fn record(id: i64, updated: &str) -> Value {
        json!({"idwarehouse": id, "updated": updated})
    }

    #[test]
    fn test_filter_keeps_records_inside_window() {
        let cutoff = Utc::now() - Duration::days(7);
        let fresh = (Utc::now() - Duration::days(1))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let (kept, halt) = filter_to_window(entity(), vec![record(1, &fresh)], cutoff);
        assert_eq!(kept.len(), 1);
        assert!(!halt);
    }

    #[test]
    fn test_filter_drops_and_halts_past_cutoff() {
        let cutoff = Utc::now() - Duration::days(7);
        let fresh = (Utc::now() - Duration::days(1))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let stale = (Utc::now() - Duration::days(30))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let (kept, halt) = filter_to_window(
            entity(),
            vec![record(1, &fresh), record(2, &stale)],
            cutoff,
        );
        assert_eq!(kept.len(), 1);
        assert!(halt);
    }

    #[test]
    fn test_filter_keeps_records_without_timestamp() {
        let cutoff = Utc::now() - Duration::days(7);
        let (kept, halt) = filter_to_window(
            entity(),
            vec![json!({"idwarehouse": 3}), json!({"idwarehouse": 4, "updated": "soon"})],
            cutoff,
        );
        assert_eq!(kept.len(), 2);
        assert!(!halt);
    }
}
