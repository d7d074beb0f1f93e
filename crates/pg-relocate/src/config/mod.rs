//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
source:
  host: db.example.supabase.co
  database: postgres
  user: postgres
  password: secret
target:
  host: localhost
  database: app
  user: app
  password: secret
  ssl_mode: disable
"#;

    #[test]
    fn test_minimal_yaml_applies_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 5432);
        assert_eq!(config.source.schema, "public");
        assert_eq!(config.source.ssl_mode, "require");
        assert_eq!(config.migration.batch_size, 100);
        assert!(config.migration.migrate_schema);
        assert!(!config.migration.migrate_data);
        assert!(config.migration.suspend_constraints);
        assert!(config.migration.is_excluded_schema("auth"));
        assert!(config.migration.remap.is_none());
    }

    #[test]
    fn test_remap_defaults_columns() {
        let yaml = format!(
            "{}migration:\n  migrate_data: true\n  remap:\n    replacement: \"42\"\n",
            MINIMAL
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let remap = config.migration.remap.unwrap();
        assert_eq!(remap.columns, vec!["user_telegram_id", "chat_telegram_id"]);
        assert_eq!(remap.replacement, "42");
        assert_eq!(remap.match_value, None);
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", MINIMAL).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.target.database, "app");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/pg-relocate.yaml").unwrap_err();
        assert!(matches!(err, crate::RelocateError::Io(_)));
    }
}
