//! Row transfer in foreign-key order.
//!
//! Tables are copied one at a time, in the order produced by the dependency
//! resolver, through a single target session. Each table is loaded with
//! `INSERT ... ON CONFLICT DO NOTHING` batches so a rerun only adds the rows
//! that are still missing.

use crate::catalog::{SchemaModel, SequenceOrigin, TableDescriptor};
use crate::config::{MigrationConfig, RemapConfig};
use crate::dependency::TableOrder;
use crate::encoder::{encode, ColumnType};
use crate::error::{RelocateError, Result};
use crate::identifier::{qualify, quote_ident};
use crate::typemap::is_integer_type;
use crate::value::SourceValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Reads row data from the source.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64>;

    /// All rows of `table`, values in the order of `columns`.
    async fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[String],
    ) -> Result<Vec<Vec<SourceValue>>>;
}

/// The single target connection used for loading.
///
/// Constraint suspension is a session setting, so every call must run on the
/// same underlying connection.
#[async_trait]
pub trait TargetSession: Send + Sync {
    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    async fn target_columns(&self, schema: &str, table: &str) -> Result<Vec<TargetColumn>>;

    /// Toggle trigger and foreign-key enforcement for this session.
    async fn set_constraints_suspended(&self, suspended: bool) -> Result<()>;

    /// Insert one batch, returning the number of rows actually written.
    async fn insert_batch(&self, batch: &InsertBatch) -> Result<u64>;

    async fn set_sequence_value(&self, schema: &str, sequence: &str, value: i64) -> Result<()>;

    /// Move the sequence behind an identity column, whatever the target named it.
    async fn set_identity_value(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        value: i64,
    ) -> Result<()>;
}

/// A column as it exists in the target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub name: String,
    pub column_type: ColumnType,
    /// Stored generated column; never written.
    pub is_generated: bool,
    /// `GENERATED ALWAYS AS IDENTITY`; needs `OVERRIDING SYSTEM VALUE`.
    pub identity_always: bool,
}

/// One multi-row insert with pre-encoded literals.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub overriding_system_value: bool,
}

impl InsertBatch {
    /// `INSERT ... VALUES ... ON CONFLICT DO NOTHING`
    pub fn to_sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| format!("({})", row.join(", ")))
            .collect();

        format!(
            "INSERT INTO {} ({}){} VALUES {} ON CONFLICT DO NOTHING",
            qualify(&self.schema, &self.table),
            columns.join(", "),
            if self.overriding_system_value {
                " OVERRIDING SYSTEM VALUE"
            } else {
                ""
            },
            rows.join(", ")
        )
    }
}

/// When the remap replaces a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemapRule {
    /// Every value, NULL included.
    Always,
    /// Only values whose text form equals this.
    WhenEquals(String),
}

/// Substitute one identifier value across every matching column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierRemap {
    columns: HashSet<String>,
    replacement: String,
    rule: RemapRule,
}

impl IdentifierRemap {
    pub fn new(columns: &[String], replacement: impl Into<String>, rule: RemapRule) -> Self {
        Self {
            columns: columns.iter().cloned().collect(),
            replacement: replacement.into(),
            rule,
        }
    }

    pub fn from_config(config: &RemapConfig) -> Self {
        let rule = match &config.match_value {
            Some(value) => RemapRule::WhenEquals(value.clone()),
            None => RemapRule::Always,
        };
        Self::new(&config.columns, config.replacement.clone(), rule)
    }

    pub fn applies_to(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    /// Replace `value` in place if the rule matches. Returns whether it changed.
    pub fn apply(&self, value: &mut SourceValue, column_type: &ColumnType) -> bool {
        let matches = match &self.rule {
            RemapRule::Always => true,
            RemapRule::WhenEquals(expected) => value.as_text().as_deref() == Some(expected.as_str()),
        };
        if !matches {
            return false;
        }

        *value = match self.replacement.parse::<i64>() {
            Ok(n) if is_integer_type(&column_type.data_type) => SourceValue::Int(n),
            _ => SourceValue::Text(self.replacement.clone()),
        };
        true
    }
}

/// Outcome category for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Migrated,
    /// No source rows; nothing attempted.
    Empty,
    /// Absent from the target; reported as a gap.
    MissingInTarget,
    /// Keys unknown, so a conflict-skipping insert could duplicate rows.
    Skipped,
    Failed,
}

/// Per-table transfer result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableTransfer {
    pub table: String,
    pub status: TableStatus,
    pub source_rows: i64,
    pub rows_inserted: u64,
    /// Rows the target already had (conflicts skipped).
    pub rows_skipped: u64,
    pub batches: usize,
    pub values_remapped: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when enforcement could not be turned back on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_error: Option<String>,
}

impl TableTransfer {
    fn new(table: &str, status: TableStatus) -> Self {
        Self {
            table: table.to_string(),
            status,
            source_rows: 0,
            rows_inserted: 0,
            rows_skipped: 0,
            batches: 0,
            values_remapped: 0,
            duration_ms: 0,
            error: None,
            restore_error: None,
        }
    }

    fn failed(table: &str, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(table, TableStatus::Failed)
        }
    }
}

/// Result of pushing one sequence's position to the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSync {
    pub sequence: String,
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the transfer phase did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferReport {
    pub tables: Vec<TableTransfer>,
    pub sequences: Vec<SequenceSync>,
}

impl TransferReport {
    pub fn rows_inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_inserted).sum()
    }

    pub fn tables_with(&self, status: TableStatus) -> impl Iterator<Item = &TableTransfer> {
        self.tables.iter().filter(move |t| t.status == status)
    }
}

/// Knobs for [`TransferEngine`].
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub target_schema: String,
    pub batch_size: usize,
    pub suspend_constraints: bool,
    pub remap: Option<IdentifierRemap>,
}

impl TransferSettings {
    pub fn from_config(config: &MigrationConfig, target_schema: &str) -> Self {
        Self {
            target_schema: target_schema.to_string(),
            batch_size: config.batch_size.max(1),
            suspend_constraints: config.suspend_constraints,
            remap: config.remap.as_ref().map(IdentifierRemap::from_config),
        }
    }
}

/// Copies rows for every table of a [`SchemaModel`].
pub struct TransferEngine<'a> {
    source: &'a dyn RowSource,
    target: &'a dyn TargetSession,
    settings: TransferSettings,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        source: &'a dyn RowSource,
        target: &'a dyn TargetSession,
        settings: TransferSettings,
    ) -> Self {
        Self {
            source,
            target,
            settings,
        }
    }

    /// Copy every table in `order`. Per-table failures are recorded and the
    /// run moves on; connection failures abort.
    pub async fn transfer_tables(
        &self,
        model: &SchemaModel,
        order: &TableOrder,
    ) -> Result<TransferReport> {
        let mut report = TransferReport::default();

        if order.has_cycle() && !self.settings.suspend_constraints {
            warn!(
                "Foreign key cycle detected; suspending constraint checks for {} despite configuration",
                order.cyclic.join(", ")
            );
        }

        for name in &order.order {
            let Some(table) = model.table(name) else {
                warn!("Table {} is in the load order but not in the schema model", name);
                continue;
            };

            let suspend = self.settings.suspend_constraints || order.cyclic.contains(name);
            let started = Instant::now();
            let mut result = match self.transfer_table(table, suspend).await {
                Ok(result) => result,
                Err(e @ RelocateError::Connection { .. }) => return Err(e),
                Err(e) => {
                    warn!("Transfer of {} failed: {}", table.full_name(), e);
                    TableTransfer::failed(&table.name, e)
                }
            };
            result.duration_ms = started.elapsed().as_millis() as u64;
            report.tables.push(result);
        }

        info!(
            "Data transfer finished: {} rows into {} tables ({} empty, {} missing, {} skipped, {} failed)",
            report.rows_inserted(),
            report.tables_with(TableStatus::Migrated).count(),
            report.tables_with(TableStatus::Empty).count(),
            report.tables_with(TableStatus::MissingInTarget).count(),
            report.tables_with(TableStatus::Skipped).count(),
            report.tables_with(TableStatus::Failed).count()
        );

        Ok(report)
    }

    async fn transfer_table(&self, table: &TableDescriptor, suspend: bool) -> Result<TableTransfer> {
        let target_schema = &self.settings.target_schema;

        let source_rows = self.source.count_rows(&table.schema, &table.name).await?;
        if source_rows == 0 {
            debug!("Skipping {}: no rows", table.full_name());
            return Ok(TableTransfer::new(&table.name, TableStatus::Empty));
        }

        if table.constraints_unread {
            warn!(
                "Skipping {}: its constraints could not be read, so reruns could duplicate rows",
                table.full_name()
            );
            return Ok(TableTransfer {
                source_rows,
                error: Some(format!(
                    "constraints of {} could not be read; rows not copied",
                    table.full_name()
                )),
                ..TableTransfer::new(&table.name, TableStatus::Skipped)
            });
        }

        if !self.target.table_exists(target_schema, &table.name).await? {
            warn!(
                "Skipping {}: table does not exist in target schema {}",
                table.full_name(),
                target_schema
            );
            return Ok(TableTransfer {
                source_rows,
                error: Some(RelocateError::TargetTableMissing(table.full_name()).to_string()),
                ..TableTransfer::new(&table.name, TableStatus::MissingInTarget)
            });
        }

        let target_columns = self.target.target_columns(target_schema, &table.name).await?;
        let columns: Vec<&TargetColumn> = table
            .columns
            .iter()
            .filter_map(|c| target_columns.iter().find(|t| t.name == c.name))
            .filter(|t| !t.is_generated)
            .collect();
        if columns.is_empty() {
            return Err(RelocateError::row_encoding(
                table.full_name(),
                "no writable columns shared between source and target",
            ));
        }

        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let mut rows = self.source.read_rows(table, &names).await?;

        let mut result = TableTransfer {
            source_rows,
            ..TableTransfer::new(&table.name, TableStatus::Migrated)
        };

        if let Some(remap) = &self.settings.remap {
            for (idx, column) in columns.iter().enumerate() {
                if !remap.applies_to(&column.name) {
                    continue;
                }
                for row in rows.iter_mut() {
                    if let Some(value) = row.get_mut(idx) {
                        if remap.apply(value, &column.column_type) {
                            result.values_remapped += 1;
                        }
                    }
                }
            }
        }

        if suspend {
            self.target.set_constraints_suspended(true).await?;
        }

        let load = self.load_rows(table, &columns, &names, &rows, &mut result).await;

        if suspend {
            if let Err(e) = self.target.set_constraints_suspended(false).await {
                error!(
                    "Failed to restore constraint enforcement after {}: {}",
                    table.full_name(),
                    e
                );
                result.restore_error = Some(e.to_string());
            }
        }

        match load {
            Ok(()) => {
                info!(
                    "Transferred {} rows into {} ({} already present)",
                    result.rows_inserted,
                    table.full_name(),
                    result.rows_skipped
                );
            }
            Err(e @ RelocateError::Connection { .. }) => return Err(e),
            Err(e) => {
                warn!("Batch insert into {} failed: {}", table.full_name(), e);
                result.status = TableStatus::Failed;
                result.error = Some(e.to_string());
            }
        }

        Ok(result)
    }

    async fn load_rows(
        &self,
        table: &TableDescriptor,
        columns: &[&TargetColumn],
        names: &[String],
        rows: &[Vec<SourceValue>],
        result: &mut TableTransfer,
    ) -> Result<()> {
        let overriding_system_value = columns.iter().any(|c| c.identity_always);

        for chunk in rows.chunks(self.settings.batch_size) {
            let encoded: Vec<Vec<String>> = chunk
                .iter()
                .map(|row| {
                    if row.len() != columns.len() {
                        return Err(RelocateError::row_encoding(
                            table.full_name(),
                            format!("expected {} values, got {}", columns.len(), row.len()),
                        ));
                    }
                    Ok(row
                        .iter()
                        .zip(columns)
                        .map(|(value, column)| encode(value, &column.column_type))
                        .collect())
                })
                .collect::<Result<_>>()?;

            let batch = InsertBatch {
                schema: self.settings.target_schema.clone(),
                table: table.name.clone(),
                columns: names.to_vec(),
                rows: encoded,
                overriding_system_value,
            };

            let inserted = self.target.insert_batch(&batch).await.map_err(|e| match e {
                e @ RelocateError::Connection { .. } => e,
                e => RelocateError::row_encoding(
                    table.full_name(),
                    format!("batch {} rejected: {}", result.batches + 1, e),
                ),
            })?;

            result.batches += 1;
            result.rows_inserted += inserted;
            result.rows_skipped += chunk.len() as u64 - inserted.min(chunk.len() as u64);
        }

        Ok(())
    }

    /// Move target sequences to the source's last value.
    pub async fn sync_sequences(&self, model: &SchemaModel) -> Result<Vec<SequenceSync>> {
        let mut synced = Vec::new();
        let schema = &self.settings.target_schema;

        for sequence in &model.sequences {
            let Some(value) = sequence.last_value else {
                continue;
            };

            let outcome = match (sequence.origin, &sequence.owner) {
                (SequenceOrigin::Catalog, _) => {
                    self.target
                        .set_sequence_value(schema, &sequence.name, value)
                        .await
                }
                (SequenceOrigin::Identity, Some(owner)) => {
                    self.target
                        .set_identity_value(schema, &owner.table, &owner.column, value)
                        .await
                }
                _ => continue,
            };

            let error = match outcome {
                Ok(()) => {
                    debug!("Set {} to {}", sequence.full_name(), value);
                    None
                }
                Err(e @ RelocateError::Connection { .. }) => return Err(e),
                Err(e) => {
                    warn!("Failed to set sequence {}: {}", sequence.full_name(), e);
                    Some(e.to_string())
                }
            };

            synced.push(SequenceSync {
                sequence: sequence.name.clone(),
                value,
                error,
            });
        }

        info!("Synchronised {} sequences", synced.len());
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        ColumnDescriptor, ConstraintDescriptor, ConstraintKind, SequenceDescriptor, SequenceOwner,
    };
    use crate::dependency::resolve_order;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    /// Source rows per table, keyed by name.
    #[derive(Default)]
    struct MemorySource {
        rows: HashMap<String, Vec<Vec<SourceValue>>>,
    }

    #[async_trait]
    impl RowSource for MemorySource {
        async fn count_rows(&self, _schema: &str, table: &str) -> Result<i64> {
            Ok(self.rows.get(table).map_or(0, |r| r.len() as i64))
        }

        async fn read_rows(
            &self,
            table: &TableDescriptor,
            _columns: &[String],
        ) -> Result<Vec<Vec<SourceValue>>> {
            Ok(self.rows.get(&table.name).cloned().unwrap_or_default())
        }
    }

    /// Target that keys rows by their first literal and ignores conflicts.
    #[derive(Default)]
    struct MemoryTarget {
        columns: HashMap<String, Vec<TargetColumn>>,
        stored: Mutex<HashMap<String, BTreeMap<String, Vec<String>>>>,
        statements: Mutex<Vec<String>>,
        suspension_log: Mutex<Vec<bool>>,
        reject_table: Option<&'static str>,
        sequences: Mutex<Vec<(String, i64)>>,
    }

    impl MemoryTarget {
        fn with_table(mut self, name: &str, columns: &[(&str, &str, &str)]) -> Self {
            let columns = columns
                .iter()
                .map(|(name, data_type, udt)| TargetColumn {
                    name: name.to_string(),
                    column_type: ColumnType::new(*data_type, *udt),
                    is_generated: false,
                    identity_always: false,
                })
                .collect();
            self.columns.insert(name.to_string(), columns);
            self
        }

        fn row_count(&self, table: &str) -> usize {
            self.stored.lock().unwrap().get(table).map_or(0, |t| t.len())
        }

        fn stored_rows(&self, table: &str) -> Vec<Vec<String>> {
            self.stored.lock().unwrap()[table].values().cloned().collect()
        }
    }

    #[async_trait]
    impl TargetSession for MemoryTarget {
        async fn table_exists(&self, _schema: &str, table: &str) -> Result<bool> {
            Ok(self.columns.contains_key(table))
        }

        async fn target_columns(&self, _schema: &str, table: &str) -> Result<Vec<TargetColumn>> {
            Ok(self.columns[table].clone())
        }

        async fn set_constraints_suspended(&self, suspended: bool) -> Result<()> {
            self.suspension_log.lock().unwrap().push(suspended);
            Ok(())
        }

        async fn insert_batch(&self, batch: &InsertBatch) -> Result<u64> {
            self.statements.lock().unwrap().push(batch.to_sql());
            if self.reject_table == Some(batch.table.as_str()) {
                return Err(RelocateError::ddl(&batch.table, "violates check constraint"));
            }
            let mut stored = self.stored.lock().unwrap();
            let table = stored.entry(batch.table.clone()).or_default();
            let mut inserted = 0;
            for row in &batch.rows {
                if !table.contains_key(&row[0]) {
                    table.insert(row[0].clone(), row.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }

        async fn set_sequence_value(&self, _schema: &str, sequence: &str, value: i64) -> Result<()> {
            self.sequences.lock().unwrap().push((sequence.to_string(), value));
            Ok(())
        }

        async fn set_identity_value(
            &self,
            _schema: &str,
            table: &str,
            column: &str,
            value: i64,
        ) -> Result<()> {
            self.sequences
                .lock()
                .unwrap()
                .push((format!("{}.{}", table, column), value));
            Ok(())
        }
    }

    fn table(name: &str, columns: &[(&str, &str, &str)]) -> TableDescriptor {
        let mut t = TableDescriptor::new("public", name);
        t.columns = columns
            .iter()
            .map(|(n, d, u)| ColumnDescriptor::new(*n, *d, *u))
            .collect();
        t
    }

    fn model(tables: Vec<TableDescriptor>) -> SchemaModel {
        SchemaModel {
            schema: "public".into(),
            tables,
            ..Default::default()
        }
    }

    fn order_for(model: &SchemaModel) -> TableOrder {
        resolve_order(&model.table_names(), &model.dependency_graph())
    }

    fn settings(batch_size: usize) -> TransferSettings {
        TransferSettings {
            target_schema: "public".into(),
            batch_size,
            suspend_constraints: true,
            remap: None,
        }
    }

    const USER_COLUMNS: &[(&str, &str, &str)] = &[
        ("id", "bigint", "int8"),
        ("name", "text", "text"),
        ("user_telegram_id", "bigint", "int8"),
    ];

    fn user_rows(n: i64) -> Vec<Vec<SourceValue>> {
        (1..=n)
            .map(|i| {
                vec![
                    SourceValue::Int(i),
                    SourceValue::Text(format!("user {}", i)),
                    if i % 2 == 0 { SourceValue::Null } else { SourceValue::Int(555) },
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_table_performs_no_inserts() {
        let source = MemorySource::default();
        let target = MemoryTarget::default().with_table("users", USER_COLUMNS);
        let model = model(vec![table("users", USER_COLUMNS)]);

        let engine = TransferEngine::new(&source, &target, settings(100));
        let report = engine.transfer_tables(&model, &order_for(&model)).await.unwrap();

        assert_eq!(report.tables[0].status, TableStatus::Empty);
        assert_eq!(report.tables[0].rows_inserted, 0);
        assert!(report.tables[0].error.is_none());
        assert!(target.statements.lock().unwrap().is_empty());
        assert!(target.suspension_log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batches_and_suspension() {
        let mut source = MemorySource::default();
        source.rows.insert("users".into(), user_rows(250));
        let target = MemoryTarget::default().with_table("users", USER_COLUMNS);
        let model = model(vec![table("users", USER_COLUMNS)]);

        let engine = TransferEngine::new(&source, &target, settings(100));
        let report = engine.transfer_tables(&model, &order_for(&model)).await.unwrap();

        let users = &report.tables[0];
        assert_eq!(users.status, TableStatus::Migrated);
        assert_eq!(users.batches, 3);
        assert_eq!(users.rows_inserted, 250);
        assert_eq!(*target.suspension_log.lock().unwrap(), vec![true, false]);
        assert!(target.statements.lock().unwrap()[0]
            .starts_with("INSERT INTO \"public\".\"users\" (\"id\", \"name\", \"user_telegram_id\") VALUES ('1', 'user 1', '555')"));
        assert!(target.statements.lock().unwrap()[0].ends_with("ON CONFLICT DO NOTHING"));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let mut source = MemorySource::default();
        source.rows.insert("users".into(), user_rows(120));
        let target = MemoryTarget::default().with_table("users", USER_COLUMNS);
        let model = model(vec![table("users", USER_COLUMNS)]);
        let order = order_for(&model);

        let engine = TransferEngine::new(&source, &target, settings(50));
        engine.transfer_tables(&model, &order).await.unwrap();
        let first = target.row_count("users");
        let second = engine.transfer_tables(&model, &order).await.unwrap();

        assert_eq!(first, 120);
        assert_eq!(target.row_count("users"), first);
        assert_eq!(second.tables[0].rows_inserted, 0);
        assert_eq!(second.tables[0].rows_skipped, 120);
    }

    #[tokio::test]
    async fn test_missing_target_table_is_reported_gap() {
        let mut source = MemorySource::default();
        source.rows.insert("legacy".into(), user_rows(3));
        source.rows.insert("users".into(), user_rows(3));
        let target = MemoryTarget::default().with_table("users", USER_COLUMNS);
        let model = model(vec![table("legacy", USER_COLUMNS), table("users", USER_COLUMNS)]);

        let engine = TransferEngine::new(&source, &target, settings(100));
        let report = engine.transfer_tables(&model, &order_for(&model)).await.unwrap();

        assert_eq!(report.tables[0].table, "legacy");
        assert_eq!(report.tables[0].status, TableStatus::MissingInTarget);
        assert_eq!(report.tables[1].status, TableStatus::Migrated);
        assert_eq!(target.row_count("users"), 3);
    }

    #[tokio::test]
    async fn test_rejected_batch_restores_enforcement_and_continues() {
        let mut source = MemorySource::default();
        source.rows.insert("audit".into(), user_rows(2));
        source.rows.insert("users".into(), user_rows(2));
        let target = MemoryTarget {
            reject_table: Some("audit"),
            ..MemoryTarget::default()
        }
        .with_table("audit", USER_COLUMNS)
        .with_table("users", USER_COLUMNS);
        let model = model(vec![table("audit", USER_COLUMNS), table("users", USER_COLUMNS)]);

        let engine = TransferEngine::new(&source, &target, settings(100));
        let report = engine.transfer_tables(&model, &order_for(&model)).await.unwrap();

        assert_eq!(report.tables[0].status, TableStatus::Failed);
        assert!(report.tables[0].error.as_ref().unwrap().contains("batch 1 rejected"));
        assert_eq!(report.tables[1].status, TableStatus::Migrated);
        assert_eq!(
            *target.suspension_log.lock().unwrap(),
            vec![true, false, true, false]
        );
    }

    #[tokio::test]
    async fn test_unconditional_remap_replaces_nulls_too() {
        let mut source = MemorySource::default();
        source.rows.insert("users".into(), user_rows(4));
        let target = MemoryTarget::default().with_table("users", USER_COLUMNS);
        let model = model(vec![table("users", USER_COLUMNS)]);

        let mut settings = settings(100);
        settings.remap = Some(IdentifierRemap::new(
            &["user_telegram_id".to_string()],
            "999",
            RemapRule::Always,
        ));
        let engine = TransferEngine::new(&source, &target, settings);
        let report = engine.transfer_tables(&model, &order_for(&model)).await.unwrap();

        assert_eq!(report.tables[0].values_remapped, 4);
        for row in target.stored_rows("users") {
            assert_eq!(row[2], "'999'");
        }
    }

    #[tokio::test]
    async fn test_matching_remap_only_replaces_equal_values() {
        let mut source = MemorySource::default();
        source.rows.insert("users".into(), user_rows(4));
        let target = MemoryTarget::default().with_table("users", USER_COLUMNS);
        let model = model(vec![table("users", USER_COLUMNS)]);

        let mut settings = settings(100);
        settings.remap = Some(IdentifierRemap::new(
            &["user_telegram_id".to_string()],
            "999",
            RemapRule::WhenEquals("555".into()),
        ));
        let engine = TransferEngine::new(&source, &target, settings);
        let report = engine.transfer_tables(&model, &order_for(&model)).await.unwrap();

        assert_eq!(report.tables[0].values_remapped, 2);
        let values: Vec<String> = target
            .stored_rows("users")
            .into_iter()
            .map(|row| row[2].clone())
            .collect();
        assert_eq!(values, vec!["'999'", "NULL", "'999'", "NULL"]);
    }

    #[test]
    fn test_remap_value_typed_by_column() {
        let remap = IdentifierRemap::new(&["chat_telegram_id".to_string()], "42", RemapRule::Always);
        let mut value = SourceValue::Null;
        remap.apply(&mut value, &ColumnType::new("bigint", "int8"));
        assert_eq!(value, SourceValue::Int(42));

        let mut value = SourceValue::Text("x".into());
        remap.apply(&mut value, &ColumnType::new("text", "text"));
        assert_eq!(value, SourceValue::Text("42".into()));
    }

    #[test]
    fn test_insert_sql_with_identity_override() {
        let batch = InsertBatch {
            schema: "public".into(),
            table: "events".into(),
            columns: vec!["id".into(), "kind".into()],
            rows: vec![vec!["'1'".into(), "'signup'".into()]],
            overriding_system_value: true,
        };
        assert_eq!(
            batch.to_sql(),
            "INSERT INTO \"public\".\"events\" (\"id\", \"kind\") OVERRIDING SYSTEM VALUE VALUES ('1', 'signup') ON CONFLICT DO NOTHING"
        );
    }

    #[tokio::test]
    async fn test_sequence_sync_skips_inferred_and_unused() {
        let source = MemorySource::default();
        let target = MemoryTarget::default();
        let mut used = SequenceDescriptor::inferred("public", "users_id_seq");
        used.origin = SequenceOrigin::Catalog;
        used.last_value = Some(812);
        let mut unused = used.clone();
        unused.name = "fresh_seq".into();
        unused.last_value = None;
        let mut inferred = SequenceDescriptor::inferred("public", "guess_seq");
        inferred.last_value = Some(5);

        let model = SchemaModel {
            sequences: vec![used, unused, inferred],
            ..model(Vec::new())
        };
        let engine = TransferEngine::new(&source, &target, settings(100));
        let synced = engine.sync_sequences(&model).await.unwrap();

        assert_eq!(synced.len(), 1);
        assert_eq!(
            *target.sequences.lock().unwrap(),
            vec![("users_id_seq".to_string(), 812)]
        );
    }

    #[tokio::test]
    async fn test_identity_sequence_synced_through_owner_column() {
        let source = MemorySource::default();
        let target = MemoryTarget::default();
        let mut identity = SequenceDescriptor::inferred("public", "events_id_seq");
        identity.origin = SequenceOrigin::Identity;
        identity.owner = Some(SequenceOwner {
            table: "events".into(),
            column: "id".into(),
        });
        identity.last_value = Some(77);

        let model = SchemaModel {
            sequences: vec![identity],
            ..model(Vec::new())
        };
        let engine = TransferEngine::new(&source, &target, settings(100));
        let synced = engine.sync_sequences(&model).await.unwrap();

        assert_eq!(synced.len(), 1);
        assert!(synced[0].error.is_none());
        assert_eq!(
            *target.sequences.lock().unwrap(),
            vec![("events.id".to_string(), 77)]
        );
    }

    fn references(mut t: TableDescriptor, other: &str) -> TableDescriptor {
        t.constraints.push(ConstraintDescriptor {
            name: format!("{}_{}_fkey", t.name, other),
            kind: ConstraintKind::ForeignKey,
            definition: format!("FOREIGN KEY (id) REFERENCES {}(id)", other),
            referenced_table: Some(other.to_string()),
            referenced_schema: Some("public".into()),
        });
        t
    }

    #[tokio::test]
    async fn test_cycle_forces_suspension_only_for_cyclic_tables() {
        let mut source = MemorySource::default();
        for name in ["a", "b", "c"] {
            source.rows.insert(name.into(), user_rows(2));
        }
        let target = MemoryTarget::default()
            .with_table("a", USER_COLUMNS)
            .with_table("b", USER_COLUMNS)
            .with_table("c", USER_COLUMNS);
        let model = model(vec![
            references(table("a", USER_COLUMNS), "b"),
            references(table("b", USER_COLUMNS), "a"),
            table("c", USER_COLUMNS),
        ]);
        let order = order_for(&model);
        assert_eq!(order.cyclic, vec!["a", "b"]);

        let mut settings = settings(100);
        settings.suspend_constraints = false;
        let engine = TransferEngine::new(&source, &target, settings);
        let report = engine.transfer_tables(&model, &order).await.unwrap();

        let loaded: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(loaded, vec!["c", "a", "b"]);
        assert!(report.tables.iter().all(|t| t.status == TableStatus::Migrated));
        assert_eq!(
            *target.suspension_log.lock().unwrap(),
            vec![true, false, true, false]
        );
    }

    #[tokio::test]
    async fn test_table_with_unread_constraints_is_not_loaded() {
        let mut source = MemorySource::default();
        source.rows.insert("audit".into(), user_rows(3));
        source.rows.insert("users".into(), user_rows(3));
        let target = MemoryTarget::default()
            .with_table("audit", USER_COLUMNS)
            .with_table("users", USER_COLUMNS);
        let mut audit = table("audit", USER_COLUMNS);
        audit.constraints_unread = true;
        let model = model(vec![audit, table("users", USER_COLUMNS)]);

        let engine = TransferEngine::new(&source, &target, settings(100));
        let report = engine.transfer_tables(&model, &order_for(&model)).await.unwrap();

        let audit = &report.tables[0];
        assert_eq!(audit.status, TableStatus::Skipped);
        assert_eq!(audit.source_rows, 3);
        assert_eq!(audit.rows_inserted, 0);
        assert!(audit.error.as_ref().unwrap().contains("could not be read"));
        assert_eq!(target.row_count("audit"), 0);
        assert_eq!(report.tables[1].status, TableStatus::Migrated);
        assert_eq!(target.row_count("users"), 3);
    }
}
