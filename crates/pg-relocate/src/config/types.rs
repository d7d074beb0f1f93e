//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Schemas owned by the hosting platform rather than the application.
pub const DEFAULT_EXCLUDED_SCHEMAS: &[&str] = &[
    "pg_catalog",
    "information_schema",
    "pg_toast",
    "auth",
    "storage",
    "extensions",
    "supabase_functions",
    "supabase_migrations",
    "realtime",
    "vault",
    "net",
    "cron",
    "graphql",
    "graphql_public",
    "pgsodium",
];

/// Extensions assumed to be installed on any target.
pub const DEFAULT_BASELINE_EXTENSIONS: &[&str] = &[
    "plpgsql",
    "pgcrypto",
    "uuid-ossp",
    "pgjwt",
    "pg_stat_statements",
];

/// Column names treated as external identifiers by the remap.
pub const DEFAULT_REMAP_COLUMNS: &[&str] = &["user_telegram_id", "chat_telegram_id"];

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration.
    pub source: SourceConfig,

    /// Target database configuration.
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Schema to read (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

/// Target database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,

    /// Schema to write (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Recreate schema objects in the target (default: true).
    #[serde(default = "default_true")]
    pub migrate_schema: bool,

    /// Copy row data (default: false).
    #[serde(default)]
    pub migrate_data: bool,

    /// Drop existing target objects before recreating them (default: false).
    #[serde(default)]
    pub clean_target: bool,

    /// Rows per INSERT statement (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Disable trigger and FK enforcement while loading a table (default: true).
    #[serde(default = "default_true")]
    pub suspend_constraints: bool,

    /// Advance target sequences to the source's last value after loading (default: true).
    #[serde(default = "default_true")]
    pub sync_sequences: bool,

    /// Maximum source connections (default: 4).
    #[serde(default = "default_max_source_connections")]
    pub max_source_connections: usize,

    /// Schemas never introspected.
    #[serde(default = "default_excluded_schemas")]
    pub excluded_schemas: Vec<String>,

    /// Extensions assumed present on the target.
    #[serde(default = "default_baseline_extensions")]
    pub baseline_extensions: Vec<String>,

    /// Optional external identifier substitution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remap: Option<RemapConfig>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrate_schema: true,
            migrate_data: false,
            clean_target: false,
            batch_size: default_batch_size(),
            suspend_constraints: true,
            sync_sequences: true,
            max_source_connections: default_max_source_connections(),
            excluded_schemas: default_excluded_schemas(),
            baseline_extensions: default_baseline_extensions(),
            remap: None,
        }
    }
}

impl MigrationConfig {
    /// Check whether a schema is on the exclusion list.
    pub fn is_excluded_schema(&self, schema: &str) -> bool {
        self.excluded_schemas.iter().any(|s| s == schema)
    }
}

/// Replacement of an identifier-like value across every matching column.
///
/// Without `match_value` every value in the listed columns is replaced,
/// NULLs included. With it only values equal to `match_value` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemapConfig {
    /// Column names the remap applies to.
    #[serde(default = "default_remap_columns")]
    pub columns: Vec<String>,

    /// New value written to matching columns.
    pub replacement: String,

    /// Only replace values equal to this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_value: Option<String>,
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_max_source_connections() -> usize {
    4
}

fn default_excluded_schemas() -> Vec<String> {
    DEFAULT_EXCLUDED_SCHEMAS.iter().map(|s| s.to_string()).collect()
}

fn default_baseline_extensions() -> Vec<String> {
    DEFAULT_BASELINE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_remap_columns() -> Vec<String> {
    DEFAULT_REMAP_COLUMNS.iter().map(|s| s.to_string()).collect()
}
