//! PostgreSQL source: catalog introspection and row reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::types::{FromSql, Timestamp, ToSql};
use tokio_postgres::{Error as PgError, Row};
use tracing::debug;

use crate::catalog::{
    CatalogSource, ColumnDescriptor, ConstraintDescriptor, ConstraintKind, CustomTypeDescriptor,
    CustomTypeKind, ExtensionDescriptor, IdentityKind, IndexDescriptor, SequenceDescriptor,
    SequenceOrigin, SequenceOwner, TableDescriptor, ViewDescriptor,
};
use crate::config::SourceConfig;
use crate::connection::{build_pool, checkout, source_error, ConnectionSettings};
use crate::error::{RelocateError, Result};
use crate::identifier::{qualify, quote_ident};
use crate::transfer::RowSource;
use crate::typemap::{is_array_type, is_json_type, is_timestamptz_type};
use crate::value::SourceValue;

const EXTENSIONS_QUERY: &str = r#"
    SELECT extname::text FROM pg_catalog.pg_extension ORDER BY extname
"#;

// Identity sequences carry an internal (`deptype = 'i'`) dependency on
// their column.
const SEQUENCES_QUERY: &str = r#"
    SELECT
        s.sequencename::text,
        s.data_type::text,
        s.start_value,
        s.increment_by,
        s.min_value,
        s.max_value,
        s.cache_size,
        s.cycle,
        s.last_value,
        tbl.relname::text,
        attr.attname::text
    FROM pg_catalog.pg_sequences s
    JOIN pg_catalog.pg_namespace n ON n.nspname = s.schemaname
    JOIN pg_catalog.pg_class seq ON seq.relnamespace = n.oid AND seq.relname = s.sequencename
    LEFT JOIN pg_catalog.pg_depend d
        ON d.classid = 'pg_catalog.pg_class'::regclass
       AND d.objid = seq.oid
       AND d.refclassid = 'pg_catalog.pg_class'::regclass
       AND d.deptype = 'i'
    LEFT JOIN pg_catalog.pg_class tbl ON tbl.oid = d.refobjid
    LEFT JOIN pg_catalog.pg_attribute attr
        ON attr.attrelid = d.refobjid AND attr.attnum = d.refobjsubid
    WHERE s.schemaname = $1
    ORDER BY s.sequencename
"#;

const TYPES_QUERY: &str = r#"
    SELECT
        t.typname::text,
        t.typtype::text,
        COALESCE(
            array_agg(e.enumlabel::text ORDER BY e.enumsortorder)
                FILTER (WHERE e.enumlabel IS NOT NULL),
            '{}'
        )::text[]
    FROM pg_catalog.pg_type t
    JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
    LEFT JOIN pg_catalog.pg_enum e ON e.enumtypid = t.oid
    WHERE n.nspname = $1
      AND t.typtype IN ('e', 'c', 'd')
      AND (t.typtype <> 'c' OR EXISTS (
            SELECT 1 FROM pg_catalog.pg_class c
            WHERE c.oid = t.typrelid AND c.relkind = 'c'))
    GROUP BY t.typname, t.typtype
    ORDER BY t.typname
"#;

const TABLES_QUERY: &str = r#"
    SELECT tablename::text FROM pg_catalog.pg_tables
    WHERE schemaname = $1
    ORDER BY tablename
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text,
        c.data_type::text,
        c.udt_name::text,
        c.character_maximum_length::int4,
        c.numeric_precision::int4,
        c.numeric_scale::int4,
        c.is_nullable = 'YES',
        c.column_default::text,
        a.attidentity::text,
        c.generation_expression::text,
        CASE
            WHEN a.atttypmod < 0 THEN NULL
            WHEN c.data_type IN ('timestamp without time zone', 'timestamp with time zone',
                                 'time without time zone', 'time with time zone')
                THEN c.datetime_precision::int4
            WHEN c.data_type = 'interval' AND (a.atttypmod & 65535) <> 65535
                THEN a.atttypmod & 65535
        END::int4,
        c.interval_type::text
    FROM information_schema.columns c
    JOIN pg_catalog.pg_namespace n ON n.nspname = c.table_schema
    JOIN pg_catalog.pg_class t ON t.relnamespace = n.oid AND t.relname = c.table_name
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

const CONSTRAINTS_QUERY: &str = r#"
    SELECT
        con.conname::text,
        con.contype::text,
        pg_catalog.pg_get_constraintdef(con.oid),
        ref.relname::text,
        refns.nspname::text
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class t ON t.oid = con.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    LEFT JOIN pg_catalog.pg_class ref ON ref.oid = con.confrelid
    LEFT JOIN pg_catalog.pg_namespace refns ON refns.oid = ref.relnamespace
    WHERE n.nspname = $1
      AND t.relname = $2
      AND con.contype <> 'n'
    ORDER BY con.conname
"#;

const INDEXES_QUERY: &str = r#"
    SELECT i.indexname::text, i.indexdef
    FROM pg_catalog.pg_indexes i
    WHERE i.schemaname = $1
      AND i.tablename = $2
      AND NOT EXISTS (
          SELECT 1
          FROM pg_catalog.pg_constraint con
          JOIN pg_catalog.pg_class ic ON ic.oid = con.conindid
          JOIN pg_catalog.pg_namespace ns ON ns.oid = ic.relnamespace
          WHERE ic.relname = i.indexname AND ns.nspname = i.schemaname)
    ORDER BY i.indexname
"#;

const VIEWS_QUERY: &str = r#"
    SELECT viewname::text, definition
    FROM pg_catalog.pg_views
    WHERE schemaname = $1
    ORDER BY viewname
"#;

/// PostgreSQL source pool.
pub struct PgSourcePool {
    pool: Pool,
    settings: ConnectionSettings,
}

impl PgSourcePool {
    /// Connect using the `source` section of the configuration.
    pub async fn new(config: &SourceConfig, max_conns: usize) -> Result<Self> {
        let settings = ConnectionSettings::from(config);
        let pool = build_pool(&settings, max_conns, "source").await?;
        Ok(Self { pool, settings })
    }

    pub fn describe(&self) -> String {
        self.settings.describe()
    }

    /// Run `SELECT 1` on a fresh checkout.
    pub async fn test_connection(&self) -> Result<()> {
        let client = checkout(&self.pool, "testing source connection").await?;
        client.simple_query("SELECT 1").await.map_err(source_error)?;
        Ok(())
    }

    /// `SELECT version()`
    pub async fn server_version(&self) -> Result<String> {
        let client = checkout(&self.pool, "reading source version").await?;
        let row = client
            .query_one("SELECT version()", &[])
            .await
            .map_err(source_error)?;
        Ok(row.get(0))
    }

    async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        context: &str,
    ) -> Result<Vec<Row>> {
        let client = checkout(&self.pool, context).await?;
        client.query(sql, params).await.map_err(source_error)
    }

    /// Run a catalog query with `schema` on the search path, so definitions
    /// name that schema's objects unqualified.
    async fn catalog_query(
        &self,
        schema: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        context: &str,
    ) -> Result<Vec<Row>> {
        let mut client = checkout(&self.pool, context).await?;
        let tx = client.transaction().await.map_err(source_error)?;
        tx.batch_execute(&search_path_sql(schema))
            .await
            .map_err(source_error)?;
        let rows = tx.query(sql, params).await.map_err(source_error)?;
        tx.commit().await.map_err(source_error)?;
        Ok(rows)
    }
}

fn search_path_sql(schema: &str) -> String {
    format!("SET LOCAL search_path TO {}", quote_ident(schema))
}

/// Identity sequences are tied to their column; everything else is synced by name.
fn sequence_origin(
    table: Option<String>,
    column: Option<String>,
) -> (SequenceOrigin, Option<SequenceOwner>) {
    match (table, column) {
        (Some(table), Some(column)) => (
            SequenceOrigin::Identity,
            Some(SequenceOwner { table, column }),
        ),
        _ => (SequenceOrigin::Catalog, None),
    }
}

#[async_trait]
impl CatalogSource for PgSourcePool {
    async fn list_extensions(&self) -> Result<Vec<ExtensionDescriptor>> {
        let rows = self.query(EXTENSIONS_QUERY, &[], "listing extensions").await?;
        Ok(rows
            .iter()
            .map(|row| ExtensionDescriptor { name: row.get(0) })
            .collect())
    }

    async fn list_sequences(&self, schema: &str) -> Result<Vec<SequenceDescriptor>> {
        let rows = self.query(SEQUENCES_QUERY, &[&schema], "listing sequences").await?;
        Ok(rows
            .iter()
            .map(|row| {
                let (origin, owner) = sequence_origin(row.get(9), row.get(10));
                SequenceDescriptor {
                    schema: schema.to_string(),
                    name: row.get(0),
                    data_type: row.get(1),
                    start: row.get(2),
                    increment: row.get(3),
                    min_value: row.get(4),
                    max_value: row.get(5),
                    cache: row.get(6),
                    cycle: row.get(7),
                    last_value: row.get(8),
                    origin,
                    owner,
                }
            })
            .collect())
    }

    async fn list_types(&self, schema: &str) -> Result<Vec<CustomTypeDescriptor>> {
        let rows = self.query(TYPES_QUERY, &[&schema], "listing types").await?;
        let mut types = Vec::with_capacity(rows.len());
        for row in rows {
            let typtype: String = row.get(1);
            let Some(kind) = CustomTypeKind::from_typtype(&typtype) else {
                continue;
            };
            types.push(CustomTypeDescriptor {
                schema: schema.to_string(),
                name: row.get(0),
                kind,
                labels: row.get(2),
            });
        }
        Ok(types)
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let rows = self.query(TABLES_QUERY, &[&schema], "listing tables").await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn load_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows = self
            .catalog_query(schema, COLUMNS_QUERY, &[&schema, &table], "loading columns")
            .await?;

        let columns: Vec<ColumnDescriptor> = rows
            .iter()
            .map(|row| {
                let identity: Option<String> = row.get(8);
                ColumnDescriptor {
                    name: row.get(0),
                    data_type: row.get(1),
                    udt_name: row.get(2),
                    max_length: row.get(3),
                    precision: row.get(4),
                    scale: row.get(5),
                    is_nullable: row.get(6),
                    default: row.get(7),
                    identity: match identity.as_deref() {
                        Some("a") => Some(IdentityKind::Always),
                        Some("d") => Some(IdentityKind::ByDefault),
                        _ => None,
                    },
                    generation_expression: row.get(9),
                    datetime_precision: row.get(10),
                    interval_fields: row.get(11),
                }
            })
            .collect();

        debug!("Loaded {} columns for {}.{}", columns.len(), schema, table);
        Ok(columns)
    }

    async fn load_constraints(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ConstraintDescriptor>> {
        let rows = self
            .catalog_query(schema, CONSTRAINTS_QUERY, &[&schema, &table], "loading constraints")
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let contype: String = row.get(1);
                let kind = ConstraintKind::from_contype(&contype);
                let is_fk = kind == ConstraintKind::ForeignKey;
                ConstraintDescriptor {
                    name: row.get(0),
                    kind,
                    definition: row.get(2),
                    referenced_table: if is_fk { row.get(3) } else { None },
                    referenced_schema: if is_fk { row.get(4) } else { None },
                }
            })
            .collect())
    }

    async fn load_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
        let rows = self
            .catalog_query(schema, INDEXES_QUERY, &[&schema, &table], "loading indexes")
            .await?;
        Ok(rows
            .iter()
            .map(|row| IndexDescriptor {
                name: row.get(0),
                definition: row.get(1),
            })
            .collect())
    }

    async fn list_views(&self, schema: &str) -> Result<Vec<ViewDescriptor>> {
        let rows = self
            .catalog_query(schema, VIEWS_QUERY, &[&schema], "listing views")
            .await?;
        Ok(rows
            .iter()
            .map(|row| ViewDescriptor {
                schema: schema.to_string(),
                name: row.get(0),
                definition: row.get(1),
            })
            .collect())
    }
}

#[async_trait]
impl RowSource for PgSourcePool {
    async fn count_rows(&self, schema: &str, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", qualify(schema, table));
        let rows = self.query(&sql, &[], "counting rows").await?;
        Ok(rows.first().map_or(0, |row| row.get(0)))
    }

    async fn read_rows(
        &self,
        table: &TableDescriptor,
        columns: &[String],
    ) -> Result<Vec<Vec<SourceValue>>> {
        let plan: Vec<(String, ReadAs)> = columns
            .iter()
            .map(|name| {
                let read_as = table
                    .columns
                    .iter()
                    .find(|c| &c.name == name)
                    .map(ReadAs::for_column)
                    .unwrap_or(ReadAs::Text);
                (name.clone(), read_as)
            })
            .collect();

        let select_list: Vec<String> = plan
            .iter()
            .flat_map(|(name, read_as)| read_as.select_exprs(name))
            .collect();
        let sql = format!(
            "SELECT {} FROM {}",
            select_list.join(", "),
            qualify(&table.schema, &table.name)
        );

        let rows = self.query(&sql, &[], "reading rows").await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(plan.len());
            let mut idx = 0;
            for (name, read_as) in &plan {
                let value = read_as.decode(row, idx).map_err(|e| {
                    RelocateError::row_encoding(
                        table.full_name(),
                        format!("column {}: {}", name, e),
                    )
                })?;
                values.push(value);
                idx += read_as.width();
            }
            result.push(values);
        }

        debug!("Read {} rows from {}", result.len(), table.full_name());
        Ok(result)
    }
}

/// How a column is selected and decoded.
///
/// Everything without a native mapping is read as text and left for the
/// target to parse. Arrays take two result columns: the typed array when it
/// has one dimension, otherwise its JSON form, which keeps the nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadAs {
    Int,
    Float,
    Bool,
    Timestamp,
    Json,
    Bytes,
    IntArray,
    FloatArray,
    BoolArray,
    TextArray,
    Text,
}

impl ReadAs {
    fn for_column(column: &ColumnDescriptor) -> Self {
        let udt = column.udt_name.as_str();
        if is_array_type(&column.data_type, udt) {
            return match udt {
                "_int2" | "_int4" | "_int8" => ReadAs::IntArray,
                "_float4" | "_float8" => ReadAs::FloatArray,
                "_bool" => ReadAs::BoolArray,
                _ => ReadAs::TextArray,
            };
        }
        if is_timestamptz_type(&column.data_type, udt) {
            return ReadAs::Timestamp;
        }
        if is_json_type(udt) {
            return ReadAs::Json;
        }
        match udt {
            "int2" | "int4" | "int8" => ReadAs::Int,
            "float4" | "float8" => ReadAs::Float,
            "bool" => ReadAs::Bool,
            "bytea" => ReadAs::Bytes,
            _ => ReadAs::Text,
        }
    }

    /// Result columns this read occupies.
    fn width(&self) -> usize {
        if self.array_cast().is_some() {
            2
        } else {
            1
        }
    }

    fn array_cast(&self) -> Option<&'static str> {
        match self {
            ReadAs::IntArray => Some("int8[]"),
            ReadAs::FloatArray => Some("float8[]"),
            ReadAs::BoolArray => Some("bool[]"),
            ReadAs::TextArray => Some("text[]"),
            _ => None,
        }
    }

    fn select_exprs(&self, column: &str) -> Vec<String> {
        let quoted = quote_ident(column);
        if let Some(cast) = self.array_cast() {
            return vec![
                format!(
                    "CASE WHEN array_ndims({q}) > 1 THEN NULL ELSE {q}::{c} END",
                    q = quoted,
                    c = cast
                ),
                format!(
                    "CASE WHEN array_ndims({q}) > 1 THEN to_jsonb({q}::{c}) END",
                    q = quoted,
                    c = cast
                ),
            ];
        }
        let expr = match self {
            ReadAs::Int => format!("{}::int8", quoted),
            ReadAs::Float => format!("{}::float8", quoted),
            ReadAs::Text => format!("{}::text", quoted),
            _ => quoted,
        };
        vec![expr]
    }

    fn decode(&self, row: &Row, idx: usize) -> std::result::Result<SourceValue, PgError> {
        let value = match self {
            ReadAs::Int => row.try_get::<_, Option<i64>>(idx)?.map(SourceValue::Int),
            ReadAs::Float => row.try_get::<_, Option<f64>>(idx)?.map(SourceValue::Float),
            ReadAs::Bool => row.try_get::<_, Option<bool>>(idx)?.map(SourceValue::Bool),
            ReadAs::Timestamp => row
                .try_get::<_, Option<Timestamp<DateTime<Utc>>>>(idx)?
                .map(instant),
            ReadAs::Json => row
                .try_get::<_, Option<serde_json::Value>>(idx)?
                .map(SourceValue::Structured),
            ReadAs::Bytes => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(SourceValue::Bytes),
            ReadAs::IntArray => array(row, idx, SourceValue::Int)?,
            ReadAs::FloatArray => array(row, idx, SourceValue::Float)?,
            ReadAs::BoolArray => array(row, idx, SourceValue::Bool)?,
            ReadAs::TextArray => array(row, idx, SourceValue::Text)?,
            ReadAs::Text => row.try_get::<_, Option<String>>(idx)?.map(SourceValue::Text),
        };
        Ok(value.into())
    }
}

/// `infinity` and `-infinity` have no `DateTime` form; they travel as text.
fn instant(ts: Timestamp<DateTime<Utc>>) -> SourceValue {
    match ts {
        Timestamp::Value(ts) => SourceValue::Timestamp(ts),
        Timestamp::PosInfinity => SourceValue::Text("infinity".to_string()),
        Timestamp::NegInfinity => SourceValue::Text("-infinity".to_string()),
    }
}

/// Typed array at `idx`, or the JSON form of a multi-dimensional one at `idx + 1`.
fn array<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    wrap: fn(T) -> SourceValue,
) -> std::result::Result<Option<SourceValue>, PgError> {
    if let Some(items) = row.try_get::<_, Option<Vec<Option<T>>>>(idx)? {
        return Ok(Some(sequence(items, wrap)));
    }
    Ok(row
        .try_get::<_, Option<serde_json::Value>>(idx + 1)?
        .map(SourceValue::from_json))
}

fn sequence<T>(items: Vec<Option<T>>, wrap: fn(T) -> SourceValue) -> SourceValue {
    SourceValue::Sequence(
        items
            .into_iter()
            .map(|item| item.map(wrap).into())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn column(data_type: &str, udt: &str) -> ColumnDescriptor {
        ColumnDescriptor::new("c", data_type, udt)
    }

    #[test]
    fn test_read_plan_by_type() {
        assert_eq!(ReadAs::for_column(&column("integer", "int4")), ReadAs::Int);
        assert_eq!(ReadAs::for_column(&column("real", "float4")), ReadAs::Float);
        assert_eq!(
            ReadAs::for_column(&column("timestamp with time zone", "timestamptz")),
            ReadAs::Timestamp
        );
        assert_eq!(ReadAs::for_column(&column("jsonb", "jsonb")), ReadAs::Json);
        assert_eq!(ReadAs::for_column(&column("ARRAY", "_int4")), ReadAs::IntArray);
        assert_eq!(ReadAs::for_column(&column("ARRAY", "_varchar")), ReadAs::TextArray);
        assert_eq!(ReadAs::for_column(&column("USER-DEFINED", "mood")), ReadAs::Text);
        assert_eq!(ReadAs::for_column(&column("numeric", "numeric")), ReadAs::Text);
        assert_eq!(ReadAs::for_column(&column("uuid", "uuid")), ReadAs::Text);
    }

    #[test]
    fn test_select_expressions_cast_to_decodable_types() {
        assert_eq!(ReadAs::Int.select_exprs("id"), vec!["\"id\"::int8"]);
        assert_eq!(ReadAs::Text.select_exprs("Mood"), vec!["\"Mood\"::text"]);
        assert_eq!(ReadAs::Json.select_exprs("doc"), vec!["\"doc\""]);
        assert_eq!(ReadAs::Json.width(), 1);
    }

    #[test]
    fn test_arrays_select_typed_and_nested_forms() {
        assert_eq!(ReadAs::TextArray.width(), 2);
        assert_eq!(
            ReadAs::TextArray.select_exprs("tags"),
            vec![
                "CASE WHEN array_ndims(\"tags\") > 1 THEN NULL ELSE \"tags\"::text[] END",
                "CASE WHEN array_ndims(\"tags\") > 1 THEN to_jsonb(\"tags\"::text[]) END",
            ]
        );
        assert!(ReadAs::IntArray.select_exprs("grid")[1].contains("to_jsonb(\"grid\"::int8[])"));
    }

    #[test]
    fn test_nested_array_json_becomes_nested_sequence() {
        let value = SourceValue::from_json(serde_json::json!([[1, 2], [3, null]]));
        assert_eq!(
            value,
            SourceValue::Sequence(vec![
                SourceValue::Sequence(vec![SourceValue::Int(1), SourceValue::Int(2)]),
                SourceValue::Sequence(vec![SourceValue::Int(3), SourceValue::Null]),
            ])
        );
    }

    #[test]
    fn test_infinite_timestamps_read_as_text() {
        assert_eq!(instant(Timestamp::PosInfinity), SourceValue::Text("infinity".into()));
        assert_eq!(instant(Timestamp::NegInfinity), SourceValue::Text("-infinity".into()));
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(instant(Timestamp::Value(ts)), SourceValue::Timestamp(ts));
    }

    #[test]
    fn test_catalog_queries_scope_search_path() {
        assert_eq!(search_path_sql("App"), "SET LOCAL search_path TO \"App\"");
    }

    #[test]
    fn test_identity_sequences_keep_owner() {
        let (origin, owner) = sequence_origin(Some("events".into()), Some("id".into()));
        assert_eq!(origin, SequenceOrigin::Identity);
        assert_eq!(
            owner,
            Some(SequenceOwner {
                table: "events".into(),
                column: "id".into()
            })
        );
        assert_eq!(sequence_origin(None, None), (SequenceOrigin::Catalog, None));
    }

    #[test]
    fn test_catalog_query_text() {
        assert!(SEQUENCES_QUERY.contains("d.deptype = 'i'"));
        assert!(CONSTRAINTS_QUERY.contains("con.contype <> 'n'"));
        assert!(COLUMNS_QUERY.contains("c.interval_type::text"));
    }

    #[test]
    fn test_sequence_keeps_null_elements() {
        let value = sequence(vec![Some(1), None], SourceValue::Int);
        assert_eq!(
            value,
            SourceValue::Sequence(vec![SourceValue::Int(1), SourceValue::Null])
        );
    }
}
