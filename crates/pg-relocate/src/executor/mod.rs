//! Sequential DDL application with per-statement failure capture.

use crate::ddl::{Phase, Statement, StatementKind};
use crate::error::{RelocateError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Length of the statement excerpt kept in a failure record.
const STATEMENT_PREFIX_LEN: usize = 100;

/// Anything that can run one SQL statement.
#[async_trait]
pub trait StatementTarget: Send + Sync {
    async fn execute_statement(&self, sql: &str) -> Result<()>;
}

/// A statement the target rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementFailure {
    pub phase: Phase,
    pub object: String,
    /// First characters of the statement.
    pub statement_prefix: String,
    pub error: String,
}

/// Aggregate outcome of [`execute_statements`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Manual markers skipped.
    pub manual: usize,
    pub failures: Vec<StatementFailure>,
    /// Objects that need operator attention (manual markers and noted statements).
    pub review: Vec<String>,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Run `statements` one at a time, in order.
///
/// A rejected statement is recorded and the next one runs anyway. Nothing is
/// rolled back and nothing is retried. A lost connection aborts.
pub async fn execute_statements(
    target: &dyn StatementTarget,
    statements: &[Statement],
) -> Result<ExecutionReport> {
    let mut report = ExecutionReport::default();

    for statement in statements {
        if let Some(note) = &statement.note {
            report.review.push(format!("{}: {}", statement.object, note));
        }

        if statement.kind == StatementKind::Manual {
            warn!("Manual step required for {}", statement.object);
            report.manual += 1;
            continue;
        }

        match target.execute_statement(&statement.sql).await {
            Ok(()) => {
                debug!("Applied {} {}", statement.phase, statement.object);
                report.succeeded += 1;
            }
            Err(e @ RelocateError::Connection { .. }) => return Err(e),
            Err(e) => {
                let prefix = statement_prefix(&statement.sql);
                warn!(
                    "Failed to apply {} {}: {} ({})",
                    statement.phase, statement.object, e, prefix
                );
                report.failed += 1;
                report.failures.push(StatementFailure {
                    phase: statement.phase,
                    object: statement.object.clone(),
                    statement_prefix: prefix,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "DDL applied: {} succeeded, {} failed, {} manual",
        report.succeeded, report.failed, report.manual
    );

    Ok(report)
}

fn statement_prefix(sql: &str) -> String {
    sql.chars().take(STATEMENT_PREFIX_LEN).collect()
}
