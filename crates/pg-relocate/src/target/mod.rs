//! PostgreSQL target: DDL session, load session and housekeeping.
//!
//! Schema application and data loading each run on one dedicated
//! [`PgTargetSession`]. `session_replication_role` and `search_path` are
//! session settings, so a session must never be swapped for another pooled
//! connection halfway through a phase.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::connection::{build_pool, checkout, target_error, ConnectionSettings};
use crate::encoder::ColumnType;
use crate::error::{describe_pg_error, RelocateError, Result};
use crate::executor::StatementTarget;
use crate::identifier::{qualify, quote_ident, quote_literal};
use crate::transfer::{InsertBatch, TargetColumn, TargetSession};

/// One DDL session and one load session.
const TARGET_POOL_SIZE: usize = 2;

const TABLE_EXISTS_QUERY: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM information_schema.tables
        WHERE table_schema = $1 AND table_name = $2
    )
"#;

const TARGET_COLUMNS_QUERY: &str = r#"
    SELECT
        column_name::text,
        data_type::text,
        udt_name::text,
        is_generated = 'ALWAYS',
        COALESCE(identity_generation = 'ALWAYS', false)
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

/// `setval` on whatever sequence backs an identity or serial column.
const IDENTITY_SETVAL_QUERY: &str = r#"
    SELECT pg_catalog.setval(pg_catalog.pg_get_serial_sequence($1, $2)::regclass, $3, true)
"#;

/// PostgreSQL target pool.
pub struct PgTargetPool {
    pool: Pool,
    settings: ConnectionSettings,
}

/// What [`PgTargetPool::clean_schema`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub dropped: Vec<String>,
    pub failed: Vec<String>,
}

impl PgTargetPool {
    /// Connect using the `target` section of the configuration.
    pub async fn new(config: &TargetConfig) -> Result<Self> {
        let settings = ConnectionSettings::from(config);
        let pool = build_pool(&settings, TARGET_POOL_SIZE, "target").await?;
        Ok(Self { pool, settings })
    }

    pub fn describe(&self) -> String {
        self.settings.describe()
    }

    /// Check out a dedicated session with `search_path` pointed at `schema`.
    ///
    /// Bare type names in column definitions (enums, domains) resolve against
    /// the target schema first.
    pub async fn session(&self, schema: &str) -> Result<PgTargetSession> {
        let client = checkout(&self.pool, "opening target session").await?;
        client
            .batch_execute(&format!("SET search_path TO {}, public", quote_ident(schema)))
            .await
            .map_err(target_error)?;
        Ok(PgTargetSession { client })
    }

    pub async fn test_connection(&self) -> Result<()> {
        let client = checkout(&self.pool, "testing target connection").await?;
        client.simple_query("SELECT 1").await.map_err(target_error)?;
        Ok(())
    }

    pub async fn server_version(&self) -> Result<String> {
        let client = checkout(&self.pool, "reading target version").await?;
        let row = client
            .query_one("SELECT version()", &[])
            .await
            .map_err(target_error)?;
        Ok(row.get(0))
    }

    /// Extension names installed on the target.
    pub async fn installed_extensions(&self) -> Result<Vec<String>> {
        let client = checkout(&self.pool, "listing target extensions").await?;
        let rows = client
            .query("SELECT extname::text FROM pg_catalog.pg_extension ORDER BY extname", &[])
            .await
            .map_err(target_error)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    /// `COUNT(*)`, or `None` when the table does not exist.
    pub async fn row_count(&self, schema: &str, table: &str) -> Result<Option<i64>> {
        let client = checkout(&self.pool, "counting target rows").await?;
        let exists: bool = client
            .query_one(TABLE_EXISTS_QUERY, &[&schema, &table])
            .await
            .map_err(target_error)?
            .get(0);
        if !exists {
            return Ok(None);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", qualify(schema, table));
        let row = client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(target_error)?;
        Ok(Some(row.get(0)))
    }

    /// Drop every table, view, sequence and custom type in `schema`.
    ///
    /// Each drop runs on its own; one failure does not stop the rest.
    pub async fn clean_schema(&self, schema: &str) -> Result<CleanReport> {
        let client = checkout(&self.pool, "cleaning target schema").await?;
        let mut report = CleanReport::default();

        let classes: [(&str, &str); 4] = [
            (
                "TABLE",
                "SELECT tablename::text FROM pg_catalog.pg_tables WHERE schemaname = $1",
            ),
            (
                "VIEW",
                "SELECT viewname::text FROM pg_catalog.pg_views WHERE schemaname = $1",
            ),
            (
                "SEQUENCE",
                "SELECT sequencename::text FROM pg_catalog.pg_sequences WHERE schemaname = $1",
            ),
            (
                "TYPE",
                "SELECT t.typname::text FROM pg_catalog.pg_type t \
                 JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace \
                 WHERE n.nspname = $1 AND t.typtype IN ('e', 'c', 'd') \
                 AND (t.typtype <> 'c' OR EXISTS (SELECT 1 FROM pg_catalog.pg_class c \
                      WHERE c.oid = t.typrelid AND c.relkind = 'c'))",
            ),
        ];

        for (class, listing) in classes {
            let names: Vec<String> = client
                .query(listing, &[&schema])
                .await
                .map_err(target_error)?
                .iter()
                .map(|row| row.get(0))
                .collect();

            for name in names {
                let sql = format!("DROP {} IF EXISTS {} CASCADE", class, qualify(schema, &name));
                let object = format!("{} {}.{}", class.to_lowercase(), schema, name);
                match client.batch_execute(&sql).await {
                    Ok(()) => {
                        debug!("Dropped {}", object);
                        report.dropped.push(object);
                    }
                    Err(e) if e.is_closed() => return Err(target_error(e)),
                    Err(e) => {
                        warn!("Could not drop {}: {}", object, describe_pg_error(&e));
                        report.failed.push(object);
                    }
                }
            }
        }

        info!(
            "Cleaned target schema {}: {} dropped, {} failed",
            schema,
            report.dropped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

/// A single target connection holding its session state.
pub struct PgTargetSession {
    client: Object,
}

#[async_trait]
impl StatementTarget for PgTargetSession {
    async fn execute_statement(&self, sql: &str) -> Result<()> {
        self.client.batch_execute(sql).await.map_err(target_error)
    }
}

#[async_trait]
impl TargetSession for PgTargetSession {
    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one(TABLE_EXISTS_QUERY, &[&schema, &table])
            .await
            .map_err(target_error)?;
        Ok(row.get(0))
    }

    async fn target_columns(&self, schema: &str, table: &str) -> Result<Vec<TargetColumn>> {
        let rows = self
            .client
            .query(TARGET_COLUMNS_QUERY, &[&schema, &table])
            .await
            .map_err(target_error)?;
        Ok(rows
            .iter()
            .map(|row| TargetColumn {
                name: row.get(0),
                column_type: ColumnType::new(row.get::<_, String>(1), row.get::<_, String>(2)),
                is_generated: row.get(3),
                identity_always: row.get(4),
            })
            .collect())
    }

    async fn set_constraints_suspended(&self, suspended: bool) -> Result<()> {
        let sql = if suspended {
            "SET session_replication_role = replica"
        } else {
            "SET session_replication_role = DEFAULT"
        };
        self.client.batch_execute(sql).await.map_err(target_error)
    }

    async fn insert_batch(&self, batch: &InsertBatch) -> Result<u64> {
        self.client
            .execute(batch.to_sql().as_str(), &[])
            .await
            .map_err(target_error)
    }

    async fn set_sequence_value(&self, schema: &str, sequence: &str, value: i64) -> Result<()> {
        let regclass = quote_literal(&qualify(schema, sequence));
        let sql = format!("SELECT pg_catalog.setval({}, {}, true)", regclass, value);
        self.client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| sequence_error(format!("{}.{}", schema, sequence), e))?;
        Ok(())
    }

    async fn set_identity_value(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        value: i64,
    ) -> Result<()> {
        let relation = qualify(schema, table);
        let row = self
            .client
            .query_one(IDENTITY_SETVAL_QUERY, &[&relation, &column, &value])
            .await
            .map_err(|e| sequence_error(format!("{}.{}.{}", schema, table, column), e))?;
        let applied: Option<i64> = row.get(0);
        if applied.is_none() {
            return Err(RelocateError::ddl(
                format!("{}.{}.{}", schema, table, column),
                "column has no identity sequence on the target",
            ));
        }
        Ok(())
    }
}

fn sequence_error(object: String, e: tokio_postgres::Error) -> RelocateError {
    if e.is_closed() {
        target_error(e)
    } else {
        RelocateError::ddl(object, describe_pg_error(&e))
    }
}
