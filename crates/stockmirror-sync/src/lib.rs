//! Stockmirror sync engine
//!
//! Replicates entities from a remote paginated REST source into PostgreSQL,
//! keeping the mirror eventually consistent across process restarts,
//! transient network failures, and schema drift in the source payloads.
//!
//! The component family, leaf first: [`client::ApiClient`] fetches pages,
//! [`schema::SchemaReconciler`] grows destination tables to match incoming
//! fields, [`progress::ProgressTracker`] persists restartable checkpoints
//! and watermarks, [`upsert::UpsertEngine`] writes records idempotently,
//! [`runner::EntityRunner`] drives the per-entity loop, and
//! [`orchestrator::SyncOrchestrator`] coordinates runs across entity types.

pub mod client;
pub mod config;
pub mod entities;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod schema;
pub mod transform;
pub mod upsert;

pub use config::SyncConfig;
pub use entities::EntityKind;
pub use error::{FetchError, SchemaError, SyncError, UpsertError};
pub use models::{SyncMode, SyncResult};
pub use orchestrator::SyncOrchestrator;

/// Embedded migrations for the sync bookkeeping tables
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations on the shared pool
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
