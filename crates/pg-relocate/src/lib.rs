//! # pg-relocate
//!
//! PostgreSQL schema and data relocation library.
//!
//! Reads the structure of one application schema from a source instance,
//! recreates it on a target instance with idempotent DDL, then copies rows
//! table by table in foreign-key order:
//!
//! - **Catalog introspection** of extensions, sequences, custom types,
//!   tables, constraints, indexes and views
//! - **Idempotent DDL** that can be re-applied over a partial target
//! - **Conflict-skipping inserts** so a rerun only adds missing rows
//! - **Identifier remap** to rewrite an external id across columns
//!
//! ## Example
//!
//! ```rust,no_run
//! use pg_relocate::{Config, Orchestrator, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> pg_relocate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(&RunOptions::default()).await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod connection;
pub mod ddl;
pub mod dependency;
pub mod encoder;
pub mod error;
pub mod executor;
pub mod identifier;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod tls;
pub mod transfer;
pub mod typemap;
pub mod value;

// Re-exports for convenient access
pub use catalog::{CatalogReader, CatalogSource, SchemaModel};
pub use config::{Config, MigrationConfig, RemapConfig, SourceConfig, TargetConfig};
pub use ddl::{synthesize, Phase, Statement};
pub use dependency::{resolve_order, TableOrder};
pub use encoder::{encode, ColumnType};
pub use error::{RelocateError, Result};
pub use executor::{execute_statements, ExecutionReport, StatementTarget};
pub use orchestrator::{
    HealthCheckResult, MigrationPlan, MigrationResult, Orchestrator, RunOptions, TableValidation,
};
pub use source::PgSourcePool;
pub use target::{PgTargetPool, PgTargetSession};
pub use transfer::{IdentifierRemap, RowSource, TargetSession, TransferEngine, TransferReport};
pub use value::SourceValue;
