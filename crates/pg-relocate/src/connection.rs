//! Connection pool construction shared by the source and target sides.

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::{info, warn};

use crate::config::{SourceConfig, TargetConfig};
use crate::error::{RelocateError, Result};
use crate::tls::TlsBuilder;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const APPLICATION_NAME: &str = "pg-relocate";

/// Everything needed to open connections to one instance.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: String,
}

impl ConnectionSettings {
    /// `host:port/database`, safe to log.
    pub fn describe(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    fn pg_config(&self) -> PgConfig {
        let mut pg_config = PgConfig::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        pg_config.password(&self.password);
        pg_config.application_name(APPLICATION_NAME);
        pg_config.connect_timeout(CONNECT_TIMEOUT);
        pg_config
    }
}

impl From<&SourceConfig> for ConnectionSettings {
    fn from(config: &SourceConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            ssl_mode: config.ssl_mode.clone(),
        }
    }
}

impl From<&TargetConfig> for ConnectionSettings {
    fn from(config: &TargetConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            ssl_mode: config.ssl_mode.clone(),
        }
    }
}

/// Build a pool and prove it with `SELECT 1`.
///
/// `role` names the side ("source" or "target") in log lines and errors.
pub async fn build_pool(settings: &ConnectionSettings, max_size: usize, role: &str) -> Result<Pool> {
    let pg_config = settings.pg_config();
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let tls = TlsBuilder::parse(&settings.ssl_mode)?;
    let pool = match tls.build()? {
        None => {
            warn!(
                "PostgreSQL {} TLS is disabled. Credentials will be transmitted in plaintext.",
                role
            );
            let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
            Pool::builder(mgr).max_size(max_size.max(1)).build()
        }
        Some(connector) => {
            let mgr = Manager::from_config(pg_config, connector, mgr_config);
            Pool::builder(mgr).max_size(max_size.max(1)).build()
        }
    }
    .map_err(|e| RelocateError::connection(e, format!("creating {} pool", role)))?;

    let client = checkout(&pool, &format!("testing {} connection", role)).await?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| RelocateError::connection(e, format!("testing {} connection", role)))?;

    info!("Connected to PostgreSQL {}: {}", role, settings.describe());
    Ok(pool)
}

/// Take a connection from `pool`, mapping exhaustion and refusal to a connection error.
pub async fn checkout(pool: &Pool, context: &str) -> Result<Object> {
    pool.get()
        .await
        .map_err(|e| RelocateError::connection(e, context))
}

/// Map a source query error. A closed connection aborts the run.
pub fn source_error(e: tokio_postgres::Error) -> RelocateError {
    if e.is_closed() {
        RelocateError::connection(e, "source connection closed")
    } else {
        RelocateError::Source(e)
    }
}

/// Map a target query error. A closed connection aborts the run.
pub fn target_error(e: tokio_postgres::Error) -> RelocateError {
    if e.is_closed() {
        RelocateError::connection(e, "target connection closed")
    } else {
        RelocateError::Target(e)
    }
}
