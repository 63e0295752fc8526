//! Schema reconciliation
//!
//! Keeps each destination table's column set a superset of the fields seen
//! in incoming records. Reconciliation is additive only: columns are created
//! nullable and are never dropped, narrowed, or retyped, so the destination
//! schema grows monotonically as the source payloads drift.
//!
//! The reconciler owns two per-process caches, keyed by table name: the
//! known column set and the identity-key flag. Both live on the struct (not
//! in ambient module state) so their lifetime is explicit and resettable in
//! tests. All schema mutations are serialized through one async mutex,
//! separate from the data-write pool; concurrent first-writers from other
//! processes can still race on a brand-new column, which `ADD COLUMN IF NOT
//! EXISTS` absorbs.

use sqlx::PgPool;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::entities::EntityConfig;
use crate::error::SchemaError;
use crate::transform::{is_id_like, ColumnValue, DestinationRow, SOURCE_ID_COLUMN};

/// Ceiling above which inferred text columns fall back to unbounded TEXT
const VARCHAR_CEILING: usize = 4000;

/// Floor for inferred text column widths
const VARCHAR_FLOOR: usize = 255;

/// Width of identifier columns, fixed to preserve cross-system id fidelity
const ID_COLUMN_WIDTH: usize = 64;

/// Inferred destination column type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    VarChar(usize),
    BigInt,
    DoublePrecision,
    Boolean,
    TimestampTz,
    Text,
}

impl SqlType {
    /// DDL fragment for this type
    pub fn ddl(&self) -> String {
        match self {
            SqlType::VarChar(width) => format!("VARCHAR({})", width),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::DoublePrecision => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::TimestampTz => "TIMESTAMPTZ".to_string(),
            SqlType::Text => "TEXT".to_string(),
        }
    }
}

/// One known destination column
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_identity: bool,
}

/// Infer a column type from a field name and its first observed value.
///
/// Identifier-shaped names always get fixed-width text, whatever the value,
/// so numeric and alphanumeric source ids from different systems coexist.
pub fn infer_sql_type(column: &str, value: &ColumnValue) -> SqlType {
    if is_id_like(column) {
        return SqlType::VarChar(ID_COLUMN_WIDTH);
    }
    match value {
        ColumnValue::Text(s) => {
            let width = s.len().saturating_mul(2).max(VARCHAR_FLOOR);
            if width > VARCHAR_CEILING {
                SqlType::Text
            } else {
                SqlType::VarChar(width)
            }
        },
        ColumnValue::Integer(_) => SqlType::BigInt,
        ColumnValue::Float(_) => SqlType::DoublePrecision,
        ColumnValue::Bool(_) => SqlType::Boolean,
        ColumnValue::Timestamp(_) => SqlType::TimestampTz,
        ColumnValue::Json(_) => SqlType::Text,
        ColumnValue::Null => SqlType::VarChar(VARCHAR_FLOOR),
    }
}

/// Double-quote an identifier for embedding in generated SQL. Column names
/// have already been sanitized; this is belt and braces.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Default)]
struct TableState {
    columns: HashSet<String>,
    has_identity: bool,
}

/// Per-process schema reconciler over one destination database
pub struct SchemaReconciler {
    pool: PgPool,
    // Single-writer lock for schema mutations; doubles as the cache guard.
    tables: Mutex<HashMap<String, TableState>>,
}

impl SchemaReconciler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Drop all cached table state, forcing re-inspection on next use
    pub async fn reset(&self) {
        self.tables.lock().await.clear();
    }

    /// Whether the destination table carries a database-generated key.
    ///
    /// Tables with an identity key store the source identifier in a unique
    /// `source_id` column instead of the primary key; the upsert engine
    /// branches on this. Catalog inspection happens once per table per
    /// process.
    pub async fn has_identity_column(&self, entity: &EntityConfig) -> Result<bool, SchemaError> {
        let mut tables = self.tables.lock().await;
        let state = self.load_or_init(&mut tables, entity).await?;
        Ok(state.has_identity)
    }

    /// Ensure every column of `row` exists on the entity's table.
    ///
    /// Cheap after the first call: the known-column cache short-circuits
    /// unless the row carries a previously-unseen field. Missing columns are
    /// added nullable, typed from the observed value.
    pub async fn ensure_columns(
        &self,
        entity: &EntityConfig,
        row: &DestinationRow,
    ) -> Result<(), SchemaError> {
        let mut tables = self.tables.lock().await;
        let known = {
            let state = self.load_or_init(&mut tables, entity).await?;
            // Full containment check against the cache before touching DDL.
            if row.columns.iter().all(|(name, _)| state.columns.contains(name)) {
                return Ok(());
            }
            state.columns.clone()
        };

        let table = entity.table;
        for (name, value) in &row.columns {
            if known.contains(name) {
                continue;
            }
            let sql_type = infer_sql_type(name, value);
            let ddl = format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                quote_ident(table),
                quote_ident(name),
                sql_type.ddl()
            );
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(|source| SchemaError::AddColumn {
                    table: table.to_string(),
                    column: name.clone(),
                    source,
                })?;

            info!(
                table,
                column = name.as_str(),
                sql_type = sql_type.ddl().as_str(),
                "Added destination column"
            );

            if let Some(state) = tables.get_mut(table) {
                state.columns.insert(name.clone());
            }
        }

        Ok(())
    }

    /// Known columns for a table, loading catalog metadata on first use
    pub async fn known_columns(&self, entity: &EntityConfig) -> Result<HashSet<String>, SchemaError> {
        let mut tables = self.tables.lock().await;
        let state = self.load_or_init(&mut tables, entity).await?;
        Ok(state.columns.clone())
    }

    /// Load cached state for a table, inspecting (and if needed creating)
    /// the table on first touch.
    async fn load_or_init<'a>(
        &self,
        tables: &'a mut HashMap<String, TableState>,
        entity: &EntityConfig,
    ) -> Result<&'a mut TableState, SchemaError> {
        let table = entity.table;
        match tables.entry(table.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let descriptors = self.inspect_table(table).await?;
                let state = if descriptors.is_empty() {
                    self.create_table(table).await?;
                    let mut columns = HashSet::new();
                    columns.insert(SOURCE_ID_COLUMN.to_string());
                    TableState {
                        columns,
                        has_identity: false,
                    }
                } else {
                    TableState {
                        columns: descriptors.iter().map(|d| d.name.clone()).collect(),
                        has_identity: descriptors.iter().any(|d| d.is_identity),
                    }
                };
                debug!(
                    table,
                    columns = state.columns.len(),
                    has_identity = state.has_identity,
                    "Loaded destination table state"
                );
                Ok(entry.insert(state))
            },
        }
    }

    /// Read column metadata from the catalog; empty when the table is absent
    async fn inspect_table(&self, table: &str) -> Result<Vec<ColumnDescriptor>, SchemaError> {
        let rows: Vec<(String, String, String, Option<String>, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT column_name, data_type, is_nullable, is_identity, column_default
                FROM information_schema.columns
                WHERE table_schema = current_schema() AND table_name = $1
                ORDER BY ordinal_position
                "#,
            )
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| SchemaError::Inspect {
                table: table.to_string(),
                source,
            })?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, nullable, identity, default)| ColumnDescriptor {
                name,
                data_type,
                nullable: nullable == "YES",
                is_identity: identity.as_deref() == Some("YES")
                    || default.as_deref().is_some_and(|d| d.starts_with("nextval(")),
            })
            .collect())
    }

    /// Create a natural-key destination table: the canonical source
    /// identifier is the primary key, everything else arrives later through
    /// `ensure_columns`. Identity-key tables are provisioned by migration
    /// and never pass through here.
    async fn create_table(&self, table: &str) -> Result<(), SchemaError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} VARCHAR({}) PRIMARY KEY)",
            quote_ident(table),
            quote_ident(SOURCE_ID_COLUMN),
            ID_COLUMN_WIDTH
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|source| SchemaError::CreateTable {
                table: table.to_string(),
                source,
            })?;

        info!(table, "Created destination table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_id_like_is_fixed_width() {
        assert_eq!(
            infer_sql_type("idwarehouse", &ColumnValue::Integer(42)),
            SqlType::VarChar(ID_COLUMN_WIDTH)
        );
        assert_eq!(
            infer_sql_type("source_id", &ColumnValue::Text("W-1".to_string())),
            SqlType::VarChar(ID_COLUMN_WIDTH)
        );
    }

    #[test]
    fn test_infer_text_width_has_floor() {
        assert_eq!(
            infer_sql_type("name", &ColumnValue::Text("Main".to_string())),
            SqlType::VarChar(VARCHAR_FLOOR)
        );
    }

    #[test]
    fn test_infer_text_width_scales_with_value() {
        let long = "x".repeat(300);
        assert_eq!(
            infer_sql_type("description", &ColumnValue::Text(long)),
            SqlType::VarChar(600)
        );
    }

    #[test]
    fn test_infer_huge_text_falls_back_to_text() {
        let huge = "x".repeat(3000);
        assert_eq!(
            infer_sql_type("body", &ColumnValue::Text(huge)),
            SqlType::Text
        );
    }

    #[test]
    fn test_infer_scalar_types() {
        assert_eq!(infer_sql_type("qty", &ColumnValue::Integer(5)), SqlType::BigInt);
        assert_eq!(
            infer_sql_type("weight", &ColumnValue::Float(1.5)),
            SqlType::DoublePrecision
        );
        assert_eq!(infer_sql_type("active", &ColumnValue::Bool(true)), SqlType::Boolean);
        assert_eq!(
            infer_sql_type("updated", &ColumnValue::Timestamp(chrono::Utc::now())),
            SqlType::TimestampTz
        );
        assert_eq!(
            infer_sql_type("tags", &ColumnValue::Json("[]".to_string())),
            SqlType::Text
        );
        assert_eq!(
            infer_sql_type("notes", &ColumnValue::Null),
            SqlType::VarChar(VARCHAR_FLOOR)
        );
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("products"), "\"products\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_sql_type_ddl() {
        assert_eq!(SqlType::VarChar(64).ddl(), "VARCHAR(64)");
        assert_eq!(SqlType::BigInt.ddl(), "BIGINT");
        assert_eq!(SqlType::TimestampTz.ddl(), "TIMESTAMPTZ");
    }
}
