//! Identifier and literal quoting for generated SQL.
//!
//! Identifiers cannot be bound as statement parameters, so every schema,
//! table, column and constraint name that ends up in generated SQL passes
//! through [`quote_ident`]. Names read back from the catalog are already
//! well formed; names coming from configuration are checked with
//! [`validate_identifier`] first.

use crate::error::{RelocateError, Result};

/// PostgreSQL truncates identifiers to NAMEDATALEN - 1 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Reject identifiers PostgreSQL would mangle or refuse.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RelocateError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(RelocateError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(RelocateError::Config(format!(
            "Identifier exceeds {} bytes (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."name"`
pub fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("public").is_ok());
        assert!(validate_identifier("user_profiles").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        assert!(validate_identifier("bad\0name").is_err());
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        assert!(validate_identifier(&"a".repeat(64)).is_err());
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_quote_ident_escapes_double_quote() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_quote_ident_injection_stays_inside_quotes() {
        let quoted = quote_ident("x\"; DROP TABLE users; --");
        assert_eq!(quoted, "\"x\"\"; DROP TABLE users; --\"");
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("public", "orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
