//! DDL generation from a [`SchemaModel`].
//!
//! Statements come out in phase order and every executable statement is
//! safe to run against a target that already holds some of the objects.

use crate::catalog::{
    ConstraintKind, CustomTypeDescriptor, CustomTypeKind, IdentityKind, IndexDescriptor,
    SchemaModel, SequenceDescriptor, SequenceOrigin, TableDescriptor, ViewDescriptor,
};
use crate::identifier::{qualify, quote_ident, quote_literal};
use crate::typemap::{integer_bounds, render_column_type};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Creation phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Schema,
    Extensions,
    Sequences,
    Types,
    Tables,
    Constraints,
    Indexes,
    Views,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Schema => "schema",
            Phase::Extensions => "extensions",
            Phase::Sequences => "sequences",
            Phase::Types => "types",
            Phase::Tables => "tables",
            Phase::Constraints => "constraints",
            Phase::Indexes => "indexes",
            Phase::Views => "views",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Sent to the target.
    Execute,
    /// Needs an operator; never executed.
    Manual,
}

/// One generated statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub phase: Phase,
    /// Qualified name of the object the statement creates.
    pub object: String,
    pub sql: String,
    pub kind: StatementKind,
    /// Shown next to the statement in plans and reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Statement {
    fn execute(phase: Phase, object: impl Into<String>, sql: String) -> Self {
        Self {
            phase,
            object: object.into(),
            sql,
            kind: StatementKind::Execute,
            note: None,
        }
    }

    fn manual(phase: Phase, object: impl Into<String>, note: impl Into<String>) -> Self {
        let note = note.into();
        Self {
            phase,
            object: object.into(),
            sql: format!("-- MANUAL: {}", note),
            kind: StatementKind::Manual,
            note: Some(note),
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_manual(&self) -> bool {
        self.kind == StatementKind::Manual
    }
}

/// Generate the full ordered statement list for `model`, creating objects
/// in `target_schema`.
pub fn synthesize(model: &SchemaModel, target_schema: &str) -> Vec<Statement> {
    let mut statements = vec![Statement::execute(
        Phase::Schema,
        target_schema,
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(target_schema)),
    )];

    for extension in &model.extensions {
        statements.push(Statement::execute(
            Phase::Extensions,
            extension.name.clone(),
            format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(&extension.name)),
        ));
    }

    // Identity sequences come back with their table.
    for sequence in model
        .sequences
        .iter()
        .filter(|s| s.origin != SequenceOrigin::Identity)
    {
        statements.push(sequence_ddl(sequence, target_schema));
    }

    for custom_type in &model.types {
        statements.push(type_ddl(custom_type, target_schema));
    }

    for table in &model.tables {
        statements.push(table_ddl(table, target_schema));
    }

    // Foreign keys first so check constraints never wait on a missing table.
    for kind in [ConstraintKind::ForeignKey, ConstraintKind::Check, ConstraintKind::Exclusion] {
        for table in &model.tables {
            for constraint in table.constraints_of(kind) {
                let target = qualify(target_schema, &table.name);
                statements.push(Statement::execute(
                    Phase::Constraints,
                    format!("{}.{}", table.full_name(), constraint.name),
                    guard_duplicate(&format!(
                        "ALTER TABLE {} ADD CONSTRAINT {} {}",
                        target,
                        quote_ident(&constraint.name),
                        retarget(&constraint.definition, &table.schema, target_schema)
                    )),
                ));
            }
        }
    }

    for table in &model.tables {
        for constraint in table.constraints_of(ConstraintKind::Other) {
            let object = format!("{}.{}", table.full_name(), constraint.name);
            statements.push(Statement::manual(
                Phase::Constraints,
                object.clone(),
                format!(
                    "constraint {} ({}) has an unsupported kind and must be recreated by hand",
                    object, constraint.definition
                ),
            ));
        }
    }

    for table in &model.tables {
        for index in &table.indexes {
            statements.push(index_ddl(index, &model.schema, target_schema));
        }
    }

    for view in &model.views {
        statements.push(view_ddl(view, target_schema));
    }

    statements
}

/// Wrap a statement so re-running it after the object exists is a no-op.
fn guard_duplicate(sql: &str) -> String {
    format!(
        "DO $$ BEGIN {}; EXCEPTION WHEN duplicate_object THEN null; END $$",
        sql
    )
}

/// Point schema-qualified references to `source_schema` at `target_schema`.
///
/// Catalog text (constraint definitions, view queries, defaults) names the
/// source schema whenever it was not on the reader's `search_path`.
pub fn retarget(text: &str, source_schema: &str, target_schema: &str) -> String {
    if source_schema == target_schema {
        return text.to_string();
    }
    let pattern = format!(
        r#"(^|[^\w."$])(?:{}|{})\."#,
        regex::escape(&quote_ident(source_schema)),
        regex::escape(source_schema)
    );
    let Ok(qualifier) = Regex::new(&pattern) else {
        return text.to_string();
    };
    let target = quote_ident(target_schema);
    qualifier
        .replace_all(text, |caps: &Captures| format!("{}{}.", &caps[1], target))
        .into_owned()
}

/// `CREATE SEQUENCE IF NOT EXISTS` with every bound spelled out.
pub fn sequence_ddl(sequence: &SequenceDescriptor, target_schema: &str) -> Statement {
    let (type_min, type_max) = integer_bounds(&sequence.data_type).unwrap_or((i64::MIN, i64::MAX));
    let increment = sequence.increment.filter(|i| *i != 0).unwrap_or(1);
    let (default_min, default_max) = if increment > 0 {
        (1, type_max)
    } else {
        (type_min, -1)
    };
    let min_value = sequence.min_value.unwrap_or(default_min);
    let max_value = sequence.max_value.unwrap_or(default_max);
    let start = sequence
        .start
        .unwrap_or(if increment > 0 { min_value } else { max_value });
    let cache = sequence.cache.filter(|c| *c > 0).unwrap_or(1);

    let sql = format!(
        "CREATE SEQUENCE IF NOT EXISTS {} AS {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} CACHE {} {}",
        qualify(target_schema, &sequence.name),
        sequence.data_type,
        increment,
        min_value,
        max_value,
        start,
        cache,
        if sequence.cycle { "CYCLE" } else { "NO CYCLE" }
    );

    let statement = Statement::execute(Phase::Sequences, sequence.full_name(), sql);
    match sequence.origin {
        SequenceOrigin::Catalog | SequenceOrigin::Identity => statement,
        SequenceOrigin::Inferred => statement.with_note(
            "inferred from a nextval() default; bounds are placeholders and need review",
        ),
    }
}

/// Enum types are created inside a duplicate guard; composite and domain
/// types become manual markers.
pub fn type_ddl(custom_type: &CustomTypeDescriptor, target_schema: &str) -> Statement {
    let object = custom_type.full_name();
    match custom_type.kind {
        CustomTypeKind::Enum => {
            let labels: Vec<String> = custom_type.labels.iter().map(|l| quote_literal(l)).collect();
            Statement::execute(
                Phase::Types,
                object,
                guard_duplicate(&format!(
                    "CREATE TYPE {} AS ENUM ({})",
                    qualify(target_schema, &custom_type.name),
                    labels.join(",")
                )),
            )
        }
        CustomTypeKind::Composite => Statement::manual(
            Phase::Types,
            object.clone(),
            format!("composite type {} must be recreated by hand", object),
        ),
        CustomTypeKind::Domain => Statement::manual(
            Phase::Types,
            object.clone(),
            format!("domain {} must be recreated by hand", object),
        ),
    }
}

/// `CREATE TABLE IF NOT EXISTS` with primary key and unique constraints inline.
pub fn table_ddl(table: &TableDescriptor, target_schema: &str) -> Statement {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut line = format!("{} {}", quote_ident(&column.name), render_column_type(column));
            if let Some(expr) = &column.generation_expression {
                line.push_str(&format!(
                    " GENERATED ALWAYS AS ({}) STORED",
                    retarget(expr, &table.schema, target_schema)
                ));
            } else if let Some(identity) = column.identity {
                line.push_str(match identity {
                    IdentityKind::Always => " GENERATED ALWAYS AS IDENTITY",
                    IdentityKind::ByDefault => " GENERATED BY DEFAULT AS IDENTITY",
                });
            }
            if !column.is_nullable {
                line.push_str(" NOT NULL");
            }
            if column.identity.is_none() && !column.is_generated() {
                if let Some(default) = &column.default {
                    line.push_str(&format!(
                        " DEFAULT {}",
                        retarget(default, &table.schema, target_schema)
                    ));
                }
            }
            line
        })
        .collect();

    for kind in [ConstraintKind::PrimaryKey, ConstraintKind::Unique] {
        for constraint in table.constraints_of(kind) {
            lines.push(format!(
                "CONSTRAINT {} {}",
                quote_ident(&constraint.name),
                constraint.definition
            ));
        }
    }

    Statement::execute(
        Phase::Tables,
        table.full_name(),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            qualify(target_schema, &table.name),
            lines.join(",\n    ")
        ),
    )
}

/// Catalog index definition with `IF NOT EXISTS` added and the owning
/// table moved to `target_schema`.
pub fn index_ddl(index: &IndexDescriptor, source_schema: &str, target_schema: &str) -> Statement {
    let mut sql = index.definition.trim().trim_end_matches(';').to_string();

    if !sql.to_uppercase().contains(" IF NOT EXISTS ") {
        if let Some(pos) = sql.find(" INDEX ") {
            let at = pos + " INDEX ".len();
            sql.insert_str(at, "IF NOT EXISTS ");
        }
    }

    Statement::execute(
        Phase::Indexes,
        index.name.clone(),
        retarget(&sql, source_schema, target_schema),
    )
}

/// `CREATE OR REPLACE VIEW` with the catalog query text.
pub fn view_ddl(view: &ViewDescriptor, target_schema: &str) -> Statement {
    let query = view.definition.trim().trim_end_matches(';');
    Statement::execute(
        Phase::Views,
        format!("{}.{}", view.schema, view.name),
        format!(
            "CREATE OR REPLACE VIEW {} AS {}",
            qualify(target_schema, &view.name),
            retarget(query.trim(), &view.schema, target_schema)
        ),
    )
}

/// Render statements as a SQL script, manual markers kept as comments.
pub fn render_script(statements: &[Statement]) -> String {
    let mut script = String::new();
    let mut current: Option<Phase> = None;
    for statement in statements {
        if current != Some(statement.phase) {
            script.push_str(&format!("\n-- {}\n", statement.phase));
            current = Some(statement.phase);
        }
        if let (StatementKind::Execute, Some(note)) = (statement.kind, &statement.note) {
            script.push_str(&format!("-- NOTE: {}\n", note));
        }
        script.push_str(&statement.sql);
        if statement.kind == StatementKind::Execute {
            script.push(';');
        }
        script.push('\n');
    }
    script
}
