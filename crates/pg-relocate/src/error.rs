//! Error types for the relocation library.

use thiserror::Error;

/// Exit code for configuration problems (bad YAML, missing fields).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection failures.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for source database errors.
pub const EXIT_SOURCE_ERROR: u8 = 3;
/// Exit code for target database errors.
pub const EXIT_TARGET_ERROR: u8 = 4;
/// Exit code for introspection, DDL and transfer failures.
pub const EXIT_MIGRATION_ERROR: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for relocation operations.
#[derive(Error, Debug)]
pub enum RelocateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not obtain or establish a database connection
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Source database query error
    #[error("Source database error: {}", describe_pg_error(.0))]
    Source(tokio_postgres::Error),

    /// Target database query error
    #[error("Target database error: {}", describe_pg_error(.0))]
    Target(#[from] tokio_postgres::Error),

    /// A catalog query failed for one object
    #[error("Introspection failed for {object}: {message}")]
    Introspection { object: String, message: String },

    /// A DDL statement was rejected by the target
    #[error("DDL failed for {object}: {message}")]
    DdlApplication { object: String, message: String },

    /// Table exists in the source but not in the target
    #[error("Table {0} does not exist in the target")]
    TargetTableMissing(String),

    /// A row could not be encoded or its batch was rejected
    #[error("Row encoding failed for table {table}: {message}")]
    RowEncoding { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelocateError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        RelocateError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create an Introspection error
    pub fn introspection(object: impl Into<String>, message: impl ToString) -> Self {
        RelocateError::Introspection {
            object: object.into(),
            message: message.to_string(),
        }
    }

    /// Create a DdlApplication error
    pub fn ddl(object: impl Into<String>, message: impl ToString) -> Self {
        RelocateError::DdlApplication {
            object: object.into(),
            message: message.to_string(),
        }
    }

    /// Create a RowEncoding error
    pub fn row_encoding(table: impl Into<String>, message: impl ToString) -> Self {
        RelocateError::RowEncoding {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RelocateError::Config(_) | RelocateError::Yaml(_) | RelocateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            RelocateError::Connection { .. } => EXIT_CONNECTION_ERROR,
            RelocateError::Source(_) => EXIT_SOURCE_ERROR,
            RelocateError::Target(_) => EXIT_TARGET_ERROR,
            RelocateError::Introspection { .. }
            | RelocateError::DdlApplication { .. }
            | RelocateError::TargetTableMissing(_)
            | RelocateError::RowEncoding { .. } => EXIT_MIGRATION_ERROR,
            RelocateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Server message, SQLSTATE, detail and hint of a database error.
///
/// The driver's own `Display` only says `db error` for server-side failures.
pub fn describe_pg_error(error: &tokio_postgres::Error) -> String {
    match error.as_db_error() {
        Some(db) => format_server_error(
            db.severity(),
            db.code().code(),
            db.message(),
            db.detail(),
            db.hint(),
        ),
        None => error.to_string(),
    }
}

fn format_server_error(
    severity: &str,
    code: &str,
    message: &str,
    detail: Option<&str>,
    hint: Option<&str>,
) -> String {
    let mut text = format!("{}: {} (SQLSTATE {})", severity, message, code);
    if let Some(detail) = detail {
        text.push_str(&format!("; detail: {}", detail));
    }
    if let Some(hint) = hint {
        text.push_str(&format!("; hint: {}", hint));
    }
    text
}

/// Result type alias for relocation operations.
pub type Result<T> = std::result::Result<T, RelocateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RelocateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            RelocateError::connection("refused", "source").exit_code(),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(
            RelocateError::TargetTableMissing("public.users".into()).exit_code(),
            EXIT_MIGRATION_ERROR
        );
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(RelocateError::from(io).exit_code(), EXIT_IO_ERROR);
    }

    #[test]
    fn test_server_error_keeps_message_and_detail() {
        let text = format_server_error(
            "ERROR",
            "23505",
            "duplicate key value violates unique constraint \"users_pkey\"",
            Some("Key (id)=(1) already exists."),
            None,
        );
        assert_eq!(
            text,
            "ERROR: duplicate key value violates unique constraint \"users_pkey\" \
             (SQLSTATE 23505); detail: Key (id)=(1) already exists."
        );

        let text = format_server_error(
            "ERROR",
            "42P01",
            "relation \"app.parent\" does not exist",
            None,
            Some("Check the search path."),
        );
        assert!(text.ends_with("(SQLSTATE 42P01); hint: Check the search path."));
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = RelocateError::ddl("public.orders", "relation already exists");
        let text = err.format_detailed();
        assert!(text.starts_with("Error: DDL failed for public.orders"));
    }
}
