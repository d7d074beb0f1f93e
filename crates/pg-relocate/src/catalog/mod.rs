//! Catalog introspection.
//!
//! [`CatalogReader`] walks a [`CatalogSource`] and assembles a [`SchemaModel`]
//! for one application schema. A failing query for one object is recorded on
//! the model and the walk moves on; only connection failures abort.

mod model;

pub use model::*;

use crate::config::MigrationConfig;
use crate::error::{RelocateError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Catalog queries against a source instance.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// All installed extensions.
    async fn list_extensions(&self) -> Result<Vec<ExtensionDescriptor>>;

    /// Sequences visible in `schema`.
    async fn list_sequences(&self, schema: &str) -> Result<Vec<SequenceDescriptor>>;

    /// Enum, composite and domain types in `schema`.
    async fn list_types(&self, schema: &str) -> Result<Vec<CustomTypeDescriptor>>;

    /// Base table names in `schema`, sorted.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Columns of one table in ordinal order.
    async fn load_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Constraints of one table.
    async fn load_constraints(&self, schema: &str, table: &str)
        -> Result<Vec<ConstraintDescriptor>>;

    /// Indexes of one table that do not back a constraint.
    async fn load_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>>;

    /// Views in `schema`.
    async fn list_views(&self, schema: &str) -> Result<Vec<ViewDescriptor>>;
}

/// Builds a [`SchemaModel`] from a [`CatalogSource`].
#[derive(Debug, Clone)]
pub struct CatalogReader {
    excluded_schemas: Vec<String>,
    baseline_extensions: Vec<String>,
}

impl CatalogReader {
    pub fn new(excluded_schemas: Vec<String>, baseline_extensions: Vec<String>) -> Self {
        Self {
            excluded_schemas,
            baseline_extensions,
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(
            config.excluded_schemas.clone(),
            config.baseline_extensions.clone(),
        )
    }

    /// Read the structural model of `schema`.
    pub async fn read(&self, source: &dyn CatalogSource, schema: &str) -> Result<SchemaModel> {
        if self.excluded_schemas.iter().any(|s| s == schema) {
            return Err(RelocateError::Config(format!(
                "schema '{}' is excluded from introspection",
                schema
            )));
        }

        let mut model = SchemaModel {
            schema: schema.to_string(),
            ..Default::default()
        };

        if let Some(extensions) = recover(&mut model, "extensions", source.list_extensions().await)? {
            model.extensions = extensions
                .into_iter()
                .filter(|e| !self.baseline_extensions.contains(&e.name))
                .collect();
        }

        if let Some(sequences) = recover(&mut model, "sequences", source.list_sequences(schema).await)? {
            model.sequences = sequences;
        }

        if let Some(types) = recover(&mut model, "types", source.list_types(schema).await)? {
            model.types = types;
        }

        let table_names = recover(&mut model, "tables", source.list_tables(schema).await)?
            .unwrap_or_default();
        for name in table_names {
            if let Some(table) = self.read_table(source, &mut model, schema, &name).await? {
                model.tables.push(table);
            }
        }

        if let Some(views) = recover(&mut model, "views", source.list_views(schema).await)? {
            model.views = views;
        }

        infer_missing_sequences(&mut model)?;

        info!(
            "Read schema {}: {} tables, {} sequences, {} types, {} views, {} extensions ({} failures)",
            schema,
            model.tables.len(),
            model.sequences.len(),
            model.types.len(),
            model.views.len(),
            model.extensions.len(),
            model.failures.len()
        );

        Ok(model)
    }

    async fn read_table(
        &self,
        source: &dyn CatalogSource,
        model: &mut SchemaModel,
        schema: &str,
        name: &str,
    ) -> Result<Option<TableDescriptor>> {
        let object = format!("{}.{}", schema, name);
        let mut table = TableDescriptor::new(schema, name);

        // A table without columns cannot be recreated.
        match recover(model, &object, source.load_columns(schema, name).await)? {
            Some(columns) => table.columns = columns,
            None => return Ok(None),
        }

        match recover(model, &object, source.load_constraints(schema, name).await)? {
            Some(constraints) => {
                for other in constraints.iter().filter(|c| c.kind == ConstraintKind::Other) {
                    warn!(
                        "Constraint {} on {} has an unsupported kind and will not be recreated",
                        other.name, object
                    );
                }
                table.constraints = constraints;
            }
            None => table.constraints_unread = true,
        }

        if let Some(indexes) = recover(model, &object, source.load_indexes(schema, name).await)? {
            table.indexes = indexes;
        }

        debug!(
            "Loaded {} columns, {} constraints, {} indexes for {}",
            table.columns.len(),
            table.constraints.len(),
            table.indexes.len(),
            object
        );

        Ok(Some(table))
    }
}

/// Turn a query failure into a recorded [`IntrospectionFailure`].
/// Connection failures are returned as errors.
fn recover<T>(model: &mut SchemaModel, object: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ RelocateError::Connection { .. }) => Err(e),
        Err(e) => {
            warn!("Failed to read {}: {}", object, e);
            model.failures.push(IntrospectionFailure {
                object: object.to_string(),
                message: e.to_string(),
            });
            Ok(None)
        }
    }
}

/// Add placeholders for sequences referenced by `nextval('...')` defaults
/// that the sequence listing did not return.
fn infer_missing_sequences(model: &mut SchemaModel) -> Result<()> {
    let pattern = Regex::new(r"nextval\('([^']+)'")
        .map_err(|e| RelocateError::Config(format!("invalid nextval pattern: {}", e)))?;

    let mut known: HashSet<String> = model.sequences.iter().map(|s| s.name.clone()).collect();
    let mut inferred = Vec::new();

    let defaults = model
        .tables
        .iter()
        .flat_map(|t| t.columns.iter())
        .filter_map(|c| c.default.as_deref());

    for default in defaults {
        let Some(captures) = pattern.captures(default) else {
            continue;
        };
        let Some((schema, name)) = parse_sequence_reference(&captures[1]) else {
            continue;
        };
        if schema.as_deref().is_some_and(|s| s != model.schema) {
            debug!("Ignoring sequence {} outside schema {}", &captures[1], model.schema);
            continue;
        }
        if known.insert(name.clone()) {
            warn!(
                "Sequence {} is referenced by a column default but not listed in the catalog; \
                 creating a placeholder with default bounds",
                name
            );
            inferred.push(SequenceDescriptor::inferred(&model.schema, name));
        }
    }

    model.sequences.extend(inferred);
    Ok(())
}

/// Split `schema.name`, `"Name"` or `name::cast` into (schema, name).
fn parse_sequence_reference(raw: &str) -> Option<(Option<String>, String)> {
    let raw = raw.split("::").next().unwrap_or(raw).trim();
    if raw.is_empty() {
        return None;
    }

    let unquote = |s: &str| s.trim_matches('"').replace("\"\"", "\"");
    match split_unquoted_dot(raw) {
        Some((schema, name)) => Some((Some(unquote(schema)), unquote(name))),
        None => Some((None, unquote(raw))),
    }
}

fn split_unquoted_dot(raw: &str) -> Option<(&str, &str)> {
    let mut in_quotes = false;
    for (i, ch) in raw.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => return Some((&raw[..i], &raw[i + 1..])),
            _ => {}
        }
    }
    None
}
