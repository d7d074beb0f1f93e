//! Migration orchestrator - main workflow coordinator.
//!
//! A run goes through four phases: optional target cleanup, catalog
//! introspection, schema application and data transfer. Each phase reports
//! per-object outcomes; only connection loss stops the run early.

use crate::catalog::{CatalogReader, CatalogSource, IntrospectionFailure, SchemaModel};
use crate::config::{Config, MigrationConfig};
use crate::ddl::{render_script, synthesize, Statement};
use crate::dependency::{resolve_order, TableOrder};
use crate::error::Result;
use crate::executor::{execute_statements, ExecutionReport, StatementTarget};
use crate::identifier::validate_identifier;
use crate::source::PgSourcePool;
use crate::target::PgTargetPool;
use crate::transfer::{
    RowSource, SequenceSync, TableStatus, TableTransfer, TargetSession, TransferEngine,
    TransferSettings,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: PgSourcePool,
    target: PgTargetPool,
}

/// Per-invocation overrides layered on top of the configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub source_schema: Option<String>,
    pub target_schema: Option<String>,
    /// Do not synthesize or apply DDL.
    pub skip_schema: bool,
    /// Copy rows even if `migration.migrate_data` is off.
    pub include_data: bool,
    /// Drop target objects first even if `migration.clean_target` is off.
    pub clean: bool,
}

/// Effective settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunSettings {
    source_schema: String,
    target_schema: String,
    migrate_schema: bool,
    migrate_data: bool,
    clean: bool,
}

impl RunSettings {
    fn resolve(config: &Config, options: &RunOptions) -> Result<Self> {
        let source_schema = options
            .source_schema
            .clone()
            .unwrap_or_else(|| config.source.schema.clone());
        let target_schema = options
            .target_schema
            .clone()
            .unwrap_or_else(|| config.target.schema.clone());
        validate_identifier(&source_schema)?;
        validate_identifier(&target_schema)?;

        Ok(Self {
            source_schema,
            target_schema,
            migrate_schema: config.migration.migrate_schema && !options.skip_schema,
            migrate_data: config.migration.migrate_data || options.include_data,
            clean: config.migration.clean_target || options.clean,
        })
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// `completed` or `completed_with_errors`.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    pub source_schema: String,
    pub target_schema: String,

    /// Objects dropped by target cleanup, when it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_objects: Option<usize>,

    /// Catalog queries that failed.
    pub introspection_failures: Vec<IntrospectionFailure>,

    /// DDL outcome, absent when the schema phase was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<ExecutionReport>,

    /// Total tables in the source schema.
    pub tables_total: usize,

    /// Load order used by the data phase.
    pub table_order: Vec<String>,

    /// Tables on a foreign-key cycle.
    pub cyclic_tables: Vec<String>,

    /// Per-table transfer outcomes.
    pub tables: Vec<TableTransfer>,

    /// Sequence positions pushed to the target.
    pub sequences: Vec<SequenceSync>,

    /// Total rows written.
    pub rows_transferred: u64,

    /// Items an operator should look at.
    pub review: Vec<String>,
}

impl MigrationResult {
    /// Whether any phase recorded a failure or gap.
    pub fn has_errors(&self) -> bool {
        !self.introspection_failures.is_empty()
            || self.schema.as_ref().map_or(false, |s| !s.is_clean())
            || self.tables.iter().any(|t| {
                matches!(
                    t.status,
                    TableStatus::Failed | TableStatus::MissingInTarget | TableStatus::Skipped
                )
                    || t.restore_error.is_some()
            })
            || self.sequences.iter().any(|s| s.error.is_some())
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Ordered DDL for a schema, without executing anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub source_schema: String,
    pub target_schema: String,
    pub statements: Vec<Statement>,
    pub table_order: TableOrder,
    pub introspection_failures: Vec<IntrospectionFailure>,
}

impl MigrationPlan {
    /// Executable SQL script.
    pub fn script(&self) -> String {
        render_script(&self.statements)
    }
}

/// Row counts on both sides for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableValidation {
    pub table: String,
    pub source_rows: i64,
    /// `None` when the table is missing from the target.
    pub target_rows: Option<i64>,
    pub matches: bool,
}

/// Connectivity report for both instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_version: Option<String>,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_version: Option<String>,
    pub target_error: Option<String>,
    /// Extensions installed on the target.
    pub target_extensions: Vec<String>,
    /// Non-baseline source extensions the target does not have yet.
    pub missing_extensions: Vec<String>,
}

impl Orchestrator {
    /// Connect to both sides.
    pub async fn new(config: Config) -> Result<Self> {
        let source =
            PgSourcePool::new(&config.source, config.migration.max_source_connections).await?;
        let target = PgTargetPool::new(&config.target).await?;
        Ok(Self {
            config,
            source,
            target,
        })
    }

    /// Run the migration.
    pub async fn run(&self, options: &RunOptions) -> Result<MigrationResult> {
        let settings = RunSettings::resolve(&self.config, options)?;

        let cleaned = if settings.clean {
            info!("Phase 0: Cleaning target schema {}", settings.target_schema);
            Some(self.target.clean_schema(&settings.target_schema).await?.dropped.len())
        } else {
            None
        };

        let ddl_session = if settings.migrate_schema {
            Some(self.target.session(&settings.target_schema).await?)
        } else {
            None
        };
        let load_session = if settings.migrate_data {
            Some(self.target.session(&settings.target_schema).await?)
        } else {
            None
        };

        let mut result = migrate(
            &self.source,
            ddl_session.as_ref().map(|s| s as &dyn StatementTarget),
            load_session.as_ref().map(|s| s as &dyn TargetSession),
            &self.config.migration,
            &settings,
        )
        .await?;
        result.cleaned_objects = cleaned;
        Ok(result)
    }

    /// Read the source and produce the DDL that `run` would apply.
    pub async fn plan(&self, options: &RunOptions) -> Result<MigrationPlan> {
        let settings = RunSettings::resolve(&self.config, options)?;
        build_plan(&self.source, &self.config.migration, &settings).await
    }

    /// Validate row counts between source and target.
    pub async fn validate(&self) -> Result<Vec<TableValidation>> {
        let source_schema = &self.config.source.schema;
        let target_schema = &self.config.target.schema;

        let mut results = Vec::new();
        for table in self.source.list_tables(source_schema).await? {
            let source_rows = self.source.count_rows(source_schema, &table).await?;
            let target_rows = self.target.row_count(target_schema, &table).await?;
            let matches = target_rows == Some(source_rows);

            if matches {
                info!("{}.{}: {} rows (match)", source_schema, table, source_rows);
            } else {
                warn!(
                    "{}.{}: source={} target={} (MISMATCH)",
                    source_schema,
                    table,
                    source_rows,
                    target_rows.map_or_else(|| "missing".to_string(), |n| n.to_string())
                );
            }

            results.push(TableValidation {
                table,
                source_rows,
                target_rows,
                matches,
            });
        }

        Ok(results)
    }

    /// Connect to each side independently and report what worked.
    pub async fn health_check(config: &Config) -> HealthCheckResult {
        let mut result = HealthCheckResult::default();

        let started = Instant::now();
        let source = match PgSourcePool::new(&config.source, 1).await {
            Ok(pool) => match pool.server_version().await {
                Ok(version) => {
                    result.source_connected = true;
                    result.source_version = Some(version);
                    Some(pool)
                }
                Err(e) => {
                    result.source_error = Some(e.to_string());
                    None
                }
            },
            Err(e) => {
                result.source_error = Some(e.to_string());
                None
            }
        };
        result.source_latency_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let target = match PgTargetPool::new(&config.target).await {
            Ok(pool) => match pool.server_version().await {
                Ok(version) => {
                    result.target_connected = true;
                    result.target_version = Some(version);
                    Some(pool)
                }
                Err(e) => {
                    result.target_error = Some(e.to_string());
                    None
                }
            },
            Err(e) => {
                result.target_error = Some(e.to_string());
                None
            }
        };
        result.target_latency_ms = started.elapsed().as_millis() as u64;

        if let Some(target) = &target {
            match target.installed_extensions().await {
                Ok(extensions) => result.target_extensions = extensions,
                Err(e) => warn!("Could not list target extensions: {}", e),
            }
        }

        if let (Some(source), Some(_)) = (&source, &target) {
            match source.list_extensions().await {
                Ok(extensions) => {
                    result.missing_extensions = extensions
                        .into_iter()
                        .map(|e| e.name)
                        .filter(|name| !config.migration.baseline_extensions.contains(name))
                        .filter(|name| !result.target_extensions.contains(name))
                        .collect();
                }
                Err(e) => warn!("Could not list source extensions: {}", e),
            }
        }

        result.healthy = result.source_connected && result.target_connected;
        result
    }
}

async fn read_model<S>(source: &S, config: &MigrationConfig, schema: &str) -> Result<SchemaModel>
where
    S: CatalogSource,
{
    let model = CatalogReader::from_config(config).read(source, schema).await?;
    let inferred = model.inferred_sequences().count();
    if inferred > 0 {
        warn!(
            "{} sequences were inferred from column defaults; their bounds are placeholders",
            inferred
        );
    }
    Ok(model)
}

async fn build_plan<S>(
    source: &S,
    config: &MigrationConfig,
    settings: &RunSettings,
) -> Result<MigrationPlan>
where
    S: CatalogSource,
{
    let model = read_model(source, config, &settings.source_schema).await?;
    Ok(MigrationPlan {
        source_schema: settings.source_schema.clone(),
        target_schema: settings.target_schema.clone(),
        statements: synthesize(&model, &settings.target_schema),
        table_order: resolve_order(&model.table_names(), &model.dependency_graph()),
        introspection_failures: model.failures,
    })
}

/// Introspect, apply DDL, then copy rows.
///
/// `ddl` and `load` are separate sessions; either is `None` when its phase is off.
async fn migrate<S>(
    source: &S,
    ddl: Option<&dyn StatementTarget>,
    load: Option<&dyn TargetSession>,
    config: &MigrationConfig,
    settings: &RunSettings,
) -> Result<MigrationResult>
where
    S: CatalogSource + RowSource,
{
    let started_at = Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();
    info!("Starting migration run: {}", run_id);

    info!("Phase 1: Reading schema {} from source", settings.source_schema);
    let model = read_model(source, config, &settings.source_schema).await?;
    info!(
        "Found {} tables, {} sequences, {} types, {} views",
        model.tables.len(),
        model.sequences.len(),
        model.types.len(),
        model.views.len()
    );

    let mut review = Vec::new();
    let schema = match ddl {
        Some(target) => {
            info!("Phase 2: Applying schema to {}", settings.target_schema);
            let statements = synthesize(&model, &settings.target_schema);
            let report = execute_statements(target, &statements).await?;
            review.extend(report.review.iter().cloned());
            Some(report)
        }
        None => {
            info!("Phase 2: Skipped (schema migration disabled)");
            None
        }
    };

    let order = resolve_order(&model.table_names(), &model.dependency_graph());
    let mut tables = Vec::new();
    let mut sequences = Vec::new();
    match load {
        Some(target) => {
            info!("Phase 3: Transferring data");
            let engine = TransferEngine::new(
                source,
                target,
                TransferSettings::from_config(config, &settings.target_schema),
            );
            tables = engine.transfer_tables(&model, &order).await?.tables;
            if config.sync_sequences {
                sequences = engine.sync_sequences(&model).await?;
            }
        }
        None => info!("Phase 3: Skipped (data migration disabled)"),
    }

    let completed_at = Utc::now();
    let mut result = MigrationResult {
        run_id,
        status: String::new(),
        duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
        started_at,
        completed_at,
        source_schema: settings.source_schema.clone(),
        target_schema: settings.target_schema.clone(),
        cleaned_objects: None,
        introspection_failures: model.failures.clone(),
        schema,
        tables_total: model.tables.len(),
        table_order: order.order,
        cyclic_tables: order.cyclic,
        rows_transferred: tables.iter().map(|t| t.rows_inserted).sum(),
        tables,
        sequences,
        review,
    };
    result.status = if result.has_errors() {
        "completed_with_errors".to_string()
    } else {
        "completed".to_string()
    };

    info!(
        "Migration {}: {} rows in {:.2}s ({})",
        result.run_id, result.rows_transferred, result.duration_seconds, result.status
    );
    Ok(result)
}
