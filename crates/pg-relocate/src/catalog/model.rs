//! Structural snapshot of one schema as read from the source catalog.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Column metadata from `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Declared data type as reported by information_schema
    /// (`integer`, `character varying`, `ARRAY`, `USER-DEFINED`, ...).
    pub data_type: String,

    /// Underlying type name (`int4`, `_text`, `mood`, ...).
    pub udt_name: String,

    /// Maximum character length for sized character types.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<i32>,

    /// Numeric scale.
    pub scale: Option<i32>,

    /// Fractional seconds precision of time, timestamp and interval columns,
    /// only when declared.
    #[serde(default)]
    pub datetime_precision: Option<i32>,

    /// Field restriction of an interval column (`DAY TO SECOND`, ...).
    #[serde(default)]
    pub interval_fields: Option<String>,

    /// Whether NULL is allowed.
    pub is_nullable: bool,

    /// Default expression text, verbatim.
    pub default: Option<String>,

    /// Identity generation, if the column is an identity column.
    pub identity: Option<IdentityKind>,

    /// Expression of a stored generated column.
    pub generation_expression: Option<String>,
}

impl ColumnDescriptor {
    /// Minimal column used when only name and type are known.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, udt_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            udt_name: udt_name.into(),
            max_length: None,
            precision: None,
            scale: None,
            datetime_precision: None,
            interval_fields: None,
            is_nullable: true,
            default: None,
            identity: None,
            generation_expression: None,
        }
    }

    pub fn is_generated(&self) -> bool {
        self.generation_expression.is_some()
    }
}

/// `GENERATED ALWAYS` vs `GENERATED BY DEFAULT` identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Always,
    ByDefault,
}

/// Constraint kinds, from `pg_constraint.contype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
    Exclusion,
    Other,
}

impl ConstraintKind {
    /// Map a `contype` character.
    pub fn from_contype(contype: &str) -> Self {
        match contype {
            "p" => ConstraintKind::PrimaryKey,
            "u" => ConstraintKind::Unique,
            "f" => ConstraintKind::ForeignKey,
            "c" => ConstraintKind::Check,
            "x" => ConstraintKind::Exclusion,
            _ => ConstraintKind::Other,
        }
    }

    /// Created inside `CREATE TABLE`.
    pub fn is_inline(&self) -> bool {
        matches!(self, ConstraintKind::PrimaryKey | ConstraintKind::Unique)
    }
}

/// A table constraint with its catalog-reconstructed definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    /// Constraint name.
    pub name: String,

    /// Constraint kind.
    pub kind: ConstraintKind,

    /// Definition from `pg_get_constraintdef`, e.g. `PRIMARY KEY (id)`.
    pub definition: String,

    /// Referenced table (foreign keys only).
    pub referenced_table: Option<String>,

    /// Schema of the referenced table (foreign keys only).
    pub referenced_schema: Option<String>,
}

/// A non-constraint index and its full creation statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,

    /// `CREATE [UNIQUE] INDEX ...` as reported by `pg_indexes.indexdef`.
    pub definition: String,
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Columns in ordinal order.
    pub columns: Vec<ColumnDescriptor>,

    /// All constraints.
    pub constraints: Vec<ConstraintDescriptor>,

    /// Indexes not backing a constraint.
    pub indexes: Vec<IndexDescriptor>,

    /// The constraint query failed, so keys are unknown and the table was
    /// recreated without them.
    #[serde(default)]
    pub constraints_unread: bool,
}

impl TableDescriptor {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
            constraints_unread: false,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Constraints of the given kind, in catalog order.
    pub fn constraints_of(&self, kind: ConstraintKind) -> impl Iterator<Item = &ConstraintDescriptor> {
        self.constraints.iter().filter(move |c| c.kind == kind)
    }

    /// Tables in the same schema this table references through foreign keys.
    pub fn referenced_tables(&self) -> BTreeSet<String> {
        self.constraints_of(ConstraintKind::ForeignKey)
            .filter(|c| {
                c.referenced_schema
                    .as_deref()
                    .map_or(true, |schema| schema == self.schema)
            })
            .filter_map(|c| c.referenced_table.clone())
            .collect()
    }
}

/// Where a sequence descriptor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOrigin {
    /// Listed in `pg_sequences`.
    Catalog,
    /// Only seen inside a `nextval(...)` default; bounds are guesses.
    Inferred,
    /// Backs an identity column; created by `CREATE TABLE`.
    Identity,
}

/// Identity column an implicit sequence belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceOwner {
    pub table: String,
    pub column: String,
}

/// Sequence metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    pub schema: String,
    pub name: String,
    /// `smallint`, `integer` or `bigint`.
    pub data_type: String,
    pub start: Option<i64>,
    pub increment: Option<i64>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub cache: Option<i64>,
    pub cycle: bool,
    /// Last value handed out on the source, if the sequence has been used.
    pub last_value: Option<i64>,
    pub origin: SequenceOrigin,
    /// Set for [`SequenceOrigin::Identity`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<SequenceOwner>,
}

impl SequenceDescriptor {
    /// Placeholder for a sequence seen only in a column default.
    pub fn inferred(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            data_type: "bigint".to_string(),
            start: Some(1),
            increment: Some(1),
            min_value: None,
            max_value: None,
            cache: None,
            cycle: false,
            last_value: None,
            origin: SequenceOrigin::Inferred,
            owner: None,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Custom type kinds, from `pg_type.typtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomTypeKind {
    Enum,
    Composite,
    Domain,
}

impl CustomTypeKind {
    pub fn from_typtype(typtype: &str) -> Option<Self> {
        match typtype {
            "e" => Some(CustomTypeKind::Enum),
            "c" => Some(CustomTypeKind::Composite),
            "d" => Some(CustomTypeKind::Domain),
            _ => None,
        }
    }
}

/// User-defined type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTypeDescriptor {
    pub schema: String,
    pub name: String,
    pub kind: CustomTypeKind,
    /// Enum labels in `enumsortorder`.
    pub labels: Vec<String>,
}

impl CustomTypeDescriptor {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// View with its query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    pub schema: String,
    pub name: String,
    /// `pg_views.definition`.
    pub definition: String,
}

/// Installed extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub name: String,
}

/// A catalog query that failed for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionFailure {
    /// Object (or object class) being read.
    pub object: String,
    /// Error text.
    pub message: String,
}

/// Everything read from the source for one schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    pub schema: String,
    pub extensions: Vec<ExtensionDescriptor>,
    pub sequences: Vec<SequenceDescriptor>,
    pub types: Vec<CustomTypeDescriptor>,
    pub tables: Vec<TableDescriptor>,
    pub views: Vec<ViewDescriptor>,
    pub failures: Vec<IntrospectionFailure>,
}

impl SchemaModel {
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Table -> referenced tables, for the dependency resolver.
    pub fn dependency_graph(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.tables
            .iter()
            .map(|t| (t.name.clone(), t.referenced_tables()))
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn inferred_sequences(&self) -> impl Iterator<Item = &SequenceDescriptor> {
        self.sequences
            .iter()
            .filter(|s| s.origin == SequenceOrigin::Inferred)
    }
}
