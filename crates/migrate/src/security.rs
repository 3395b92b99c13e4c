//! Identifier validation for SQL the driver builds itself
//!
//! The version table name is the only identifier interpolated into SQL text;
//! every value goes through bind parameters.

use crate::config::ConfigError;

/// Characters allowed in SQL identifiers (alphanumeric, underscore)
const ALLOWED_IDENTIFIER_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

/// PostgreSQL truncates identifiers beyond this length
const MAX_IDENTIFIER_LEN: usize = 63;

/// Keywords that cannot be used as an unquoted table name
static SQL_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "FROM", "WHERE", "JOIN", "UNION", "DROP", "CREATE",
    "ALTER", "GRANT", "REVOKE", "TRUNCATE", "TABLE", "USER", "CURRENT_USER", "SESSION_USER",
];

/// Validate that an identifier is safe to interpolate unquoted
pub fn validate_identifier(identifier: &str) -> Result<(), ConfigError> {
    if identifier.is_empty() {
        return Err(ConfigError::InvalidIdentifier(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ConfigError::InvalidIdentifier(format!(
            "Identifier '{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = identifier.chars().find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c)) {
        return Err(ConfigError::InvalidIdentifier(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if identifier.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidIdentifier(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    if SQL_KEYWORDS.contains(&identifier.to_uppercase().as_str()) {
        return Err(ConfigError::InvalidIdentifier(format!(
            "Identifier '{}' is a reserved SQL keyword",
            identifier
        )));
    }

    Ok(())
}

/// Validate a table name, allowing a single `schema.table` qualifier
pub fn validate_table_name(name: &str) -> Result<(), ConfigError> {
    let mut parts = name.split('.');
    let first = parts.next().unwrap_or_default();
    validate_identifier(first)?;

    match (parts.next(), parts.next()) {
        (None, _) => Ok(()),
        (Some(table), None) => validate_identifier(table),
        (Some(_), Some(_)) => Err(ConfigError::InvalidIdentifier(format!(
            "Table name '{}' has more than one schema qualifier",
            name
        ))),
    }
}
