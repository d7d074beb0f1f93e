//! Configuration validation.

use super::Config;
use crate::error::{RelocateError, Result};
use crate::identifier::validate_identifier;
use crate::tls::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(RelocateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(RelocateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(RelocateError::Config("source.user is required".into()));
    }
    if config.source.schema.is_empty() {
        return Err(RelocateError::Config("source.schema is required".into()));
    }
    validate_identifier(&config.source.schema)?;
    SslMode::parse(&config.source.ssl_mode)?;

    // Target validation
    if config.target.host.is_empty() {
        return Err(RelocateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(RelocateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(RelocateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() {
        return Err(RelocateError::Config("target.schema is required".into()));
    }
    validate_identifier(&config.target.schema)?;
    SslMode::parse(&config.target.ssl_mode)?;

    // Cannot migrate to the same database
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(RelocateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if migration.is_excluded_schema(&config.source.schema) {
        return Err(RelocateError::Config(format!(
            "source.schema '{}' is an excluded system schema",
            config.source.schema
        )));
    }
    if migration.batch_size == 0 {
        return Err(RelocateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.max_source_connections == 0 {
        return Err(RelocateError::Config(
            "migration.max_source_connections must be at least 1".into(),
        ));
    }
    if let Some(remap) = &migration.remap {
        if remap.columns.is_empty() {
            return Err(RelocateError::Config(
                "migration.remap.columns must name at least one column".into(),
            ));
        }
        if remap.replacement.is_empty() {
            return Err(RelocateError::Config(
                "migration.remap.replacement is required".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, RemapConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                host: "db.example.supabase.co".to_string(),
                port: 5432,
                database: "postgres".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "require".to_string(),
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "app".to_string(),
                user: "app".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target.host = config.source.host.clone();
        config.target.database = config.source.database.clone();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_excluded_source_schema_rejected() {
        let mut config = valid_config();
        config.source.schema = "auth".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("excluded system schema"));
    }

    #[test]
    fn test_invalid_ssl_mode_rejected() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_remap_requires_replacement() {
        let mut config = valid_config();
        config.migration.remap = Some(RemapConfig {
            columns: vec!["user_telegram_id".to_string()],
            replacement: String::new(),
            match_value: None,
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_456"));
    }
}
