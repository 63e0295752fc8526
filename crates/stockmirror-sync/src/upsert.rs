//! Idempotent record upsert
//!
//! Writes one transformed source record into its destination table as
//! exactly one INSERT or one UPDATE, deduplicated by the canonical source
//! identifier. Two key strategies exist:
//!
//! - natural-key tables: `source_id` is the primary key; look up by key,
//!   update if present, insert otherwise.
//! - identity-key tables: the table owns a database-generated key and keeps
//!   the source identifier in a unique `source_id` column; look up the
//!   generated key by `source_id`, update by that key if found, insert
//!   without it otherwise so the database assigns one. The generated key is
//!   stable across repeated upserts of the same source identifier.
//!
//! Applying the same record twice converges: the second application is a
//! plain update carrying identical values.

use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use tracing::warn;

use crate::entities::EntityConfig;
use crate::error::UpsertError;
use crate::schema::{quote_ident, SchemaReconciler};
use crate::transform::{self, ColumnValue, DestinationRow, SOURCE_ID_COLUMN};

/// What a single upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Record had no usable identifier; logged and counted, never fatal
    Skipped,
}

/// Idempotent writer for destination tables
pub struct UpsertEngine {
    pool: PgPool,
    schema: Arc<SchemaReconciler>,
}

impl UpsertEngine {
    pub fn new(pool: PgPool, schema: Arc<SchemaReconciler>) -> Self {
        Self { pool, schema }
    }

    /// Transform and write one raw source record
    pub async fn upsert(
        &self,
        entity: &EntityConfig,
        raw: &serde_json::Value,
    ) -> Result<UpsertOutcome, UpsertError> {
        let row = match transform::transform_record(entity, raw) {
            Ok(row) => row,
            Err(reason) => {
                warn!(
                    entity = entity.name,
                    %reason,
                    "Skipping record that cannot be transformed"
                );
                return Ok(UpsertOutcome::Skipped);
            },
        };
        self.upsert_row(entity, &row).await
    }

    /// Write one already-transformed destination row
    pub async fn upsert_row(
        &self,
        entity: &EntityConfig,
        row: &DestinationRow,
    ) -> Result<UpsertOutcome, UpsertError> {
        self.schema.ensure_columns(entity, row).await?;

        if self.schema.has_identity_column(entity).await? {
            self.upsert_identity_key(entity, row).await
        } else {
            self.upsert_natural_key(entity, row).await
        }
    }

    /// Natural-key branch: `source_id` is the primary key
    async fn upsert_natural_key(
        &self,
        entity: &EntityConfig,
        row: &DestinationRow,
    ) -> Result<UpsertOutcome, UpsertError> {
        let table = entity.table;
        let lookup = format!(
            "SELECT 1 FROM {} WHERE {} = $1",
            quote_ident(table),
            quote_ident(SOURCE_ID_COLUMN)
        );
        let exists = sqlx::query(&lookup)
            .bind(&row.source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| self.write_error(table, row, source))?
            .is_some();

        if exists {
            let (sql, values) = build_update_by_key(table, row, SOURCE_ID_COLUMN);
            if let Some(sql) = sql {
                let mut query = sqlx::query(&sql);
                for value in values {
                    query = bind_value(query, value);
                }
                query = query.bind(&row.source_id);
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|source| self.write_error(table, row, source))?;
            }
            Ok(UpsertOutcome::Updated)
        } else {
            let (sql, values) = build_insert(table, row, true);
            let mut query = sqlx::query(&sql).bind(&row.source_id);
            for value in values {
                query = bind_value(query, value);
            }
            query
                .execute(&self.pool)
                .await
                .map_err(|source| self.write_error(table, row, source))?;
            Ok(UpsertOutcome::Inserted)
        }
    }

    /// Identity-key branch: look up the generated key, update by it, or
    /// insert without it and let the database assign one
    async fn upsert_identity_key(
        &self,
        entity: &EntityConfig,
        row: &DestinationRow,
    ) -> Result<UpsertOutcome, UpsertError> {
        let table = entity.table;
        let lookup = format!(
            "SELECT id FROM {} WHERE {} = $1",
            quote_ident(table),
            quote_ident(SOURCE_ID_COLUMN)
        );
        let generated_key: Option<i64> = sqlx::query(&lookup)
            .bind(&row.source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|source| self.write_error(table, row, source))?
            .map(|r| r.get::<i64, _>(0));

        match generated_key {
            Some(key) => {
                let (sql, values) = build_update_by_key(table, row, "id");
                if let Some(sql) = sql {
                    let mut query = sqlx::query(&sql);
                    for value in values {
                        query = bind_value(query, value);
                    }
                    query = query.bind(key);
                    query
                        .execute(&self.pool)
                        .await
                        .map_err(|source| self.write_error(table, row, source))?;
                }
                Ok(UpsertOutcome::Updated)
            },
            None => {
                let (sql, values) = build_insert(table, row, true);
                let mut query = sqlx::query(&sql).bind(&row.source_id);
                for value in values {
                    query = bind_value(query, value);
                }
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|source| self.write_error(table, row, source))?;
                Ok(UpsertOutcome::Inserted)
            },
        }
    }

    fn write_error(&self, table: &str, row: &DestinationRow, source: sqlx::Error) -> UpsertError {
        UpsertError::Write {
            table: table.to_string(),
            source_id: row.source_id.clone(),
            source,
        }
    }
}

/// Build an INSERT for a destination row.
///
/// Null fields are omitted; absent columns default to NULL. When
/// `with_source_id` is set, `source_id` is the first column and binds as
/// `$1`, with the remaining placeholders following in column order.
fn build_insert<'r>(
    table: &str,
    row: &'r DestinationRow,
    with_source_id: bool,
) -> (String, Vec<&'r ColumnValue>) {
    let mut columns = Vec::new();
    let mut values = Vec::new();

    if with_source_id {
        columns.push(quote_ident(SOURCE_ID_COLUMN));
    }
    for (name, value) in &row.columns {
        if value.is_null() {
            continue;
        }
        columns.push(quote_ident(name));
        values.push(value);
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    );

    (sql, values)
}

/// Build an UPDATE of all non-key columns, keyed by `key_column`.
///
/// Null fields are set to literal NULL so stale values are cleared. The key
/// binds as the final placeholder. Returns `None` when the row carries no
/// non-key columns at all (nothing to update).
fn build_update_by_key<'r>(
    table: &str,
    row: &'r DestinationRow,
    key_column: &str,
) -> (Option<String>, Vec<&'r ColumnValue>) {
    if row.columns.is_empty() {
        return (None, Vec::new());
    }

    let mut assignments = Vec::with_capacity(row.columns.len());
    let mut values = Vec::new();
    let mut placeholder = 1;

    for (name, value) in &row.columns {
        if value.is_null() {
            assignments.push(format!("{} = NULL", quote_ident(name)));
        } else {
            assignments.push(format!("{} = ${}", quote_ident(name), placeholder));
            values.push(value);
            placeholder += 1;
        }
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        quote_ident(table),
        assignments.join(", "),
        quote_ident(key_column),
        placeholder
    );

    (Some(sql), values)
}

/// Bind one typed value onto a query
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q ColumnValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ColumnValue::Text(s) => query.bind(s.as_str()),
        ColumnValue::Integer(i) => query.bind(*i),
        ColumnValue::Float(f) => query.bind(*f),
        ColumnValue::Bool(b) => query.bind(*b),
        ColumnValue::Timestamp(ts) => query.bind(*ts),
        ColumnValue::Json(s) => query.bind(s.as_str()),
        // Null values never reach the bind list; they are inlined as SQL NULL.
        ColumnValue::Null => query.bind(Option::<String>::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> DestinationRow {
        DestinationRow {
            source_id: "42".to_string(),
            columns: vec![
                ("name".to_string(), ColumnValue::Text("Main".to_string())),
                ("priority".to_string(), ColumnValue::Integer(3)),
                ("notes".to_string(), ColumnValue::Null),
            ],
        }
    }

    #[test]
    fn test_build_insert_omits_nulls() {
        let row = sample_row();
        let (sql, values) = build_insert("warehouses", &row, true);
        assert_eq!(
            sql,
            "INSERT INTO \"warehouses\" (\"source_id\", \"name\", \"priority\") VALUES ($1, $2, $3)"
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_build_insert_id_only_row() {
        let row = DestinationRow {
            source_id: "7".to_string(),
            columns: vec![],
        };
        let (sql, values) = build_insert("warehouses", &row, true);
        assert_eq!(sql, "INSERT INTO \"warehouses\" (\"source_id\") VALUES ($1)");
        assert!(values.is_empty());
    }

    #[test]
    fn test_build_update_inlines_nulls() {
        let row = sample_row();
        let (sql, values) = build_update_by_key("warehouses", &row, SOURCE_ID_COLUMN);
        assert_eq!(
            sql.as_deref(),
            Some(
                "UPDATE \"warehouses\" SET \"name\" = $1, \"priority\" = $2, \
                 \"notes\" = NULL WHERE \"source_id\" = $3"
            )
        );
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_build_update_by_generated_key() {
        let row = sample_row();
        let (sql, _) = build_update_by_key("purchase_orders", &row, "id");
        assert!(sql.unwrap().ends_with("WHERE \"id\" = $3"));
    }

    #[test]
    fn test_build_update_empty_row_is_none() {
        let row = DestinationRow {
            source_id: "7".to_string(),
            columns: vec![],
        };
        let (sql, values) = build_update_by_key("warehouses", &row, SOURCE_ID_COLUMN);
        assert!(sql.is_none());
        assert!(values.is_empty());
    }

    #[test]
    fn test_build_update_all_null_row_still_updates() {
        let row = DestinationRow {
            source_id: "7".to_string(),
            columns: vec![("notes".to_string(), ColumnValue::Null)],
        };
        let (sql, values) = build_update_by_key("warehouses", &row, SOURCE_ID_COLUMN);
        assert_eq!(
            sql.as_deref(),
            Some("UPDATE \"warehouses\" SET \"notes\" = NULL WHERE \"source_id\" = $1")
        );
        assert!(values.is_empty());
    }
}
