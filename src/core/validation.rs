//! Naming rules and column invariants applied before every model mutation
//!
//! Identifier rules follow common MySQL/PostgreSQL conventions. Field rules
//! cover the `autoIncrement => primaryKey && integral type` invariant.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::core::error::ModelError;
use crate::core::schema::{Field, Index, IndexKind, Table};

/// Maximum length for identifiers (MySQL standard)
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

static RESERVED_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN",
        "CONSTRAINT", "CREATE", "CROSS", "DATABASE", "DEFAULT", "DELETE", "DESC", "DISTINCT",
        "DROP", "ELSE", "EXISTS", "FALSE", "FOREIGN", "FROM", "FULL", "GRANT", "GROUP",
        "HAVING", "IN", "INDEX", "INNER", "INSERT", "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE",
        "LIMIT", "NOT", "NULL", "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES", "RIGHT",
        "SELECT", "SET", "TABLE", "THEN", "TO", "TRUE", "UNION", "UNIQUE", "UPDATE", "USING",
        "VALUES", "WHEN", "WHERE", "WITH", "AUTO_INCREMENT", "CHANGE", "COLLATE", "EXPLAIN",
        "FORCE", "IGNORE", "INTERVAL", "MODIFY", "PROCEDURE", "RENAME", "REPLACE", "SCHEMA",
        "SHOW", "TRIGGER", "TRUNCATE", "ANALYZE", "ARRAY", "CAST", "EXCEPT", "INTERSECT",
        "LATERAL", "RETURNING", "WINDOW",
    ]
    .into_iter()
    .collect()
});

/// Base types that can carry `AUTO_INCREMENT`
const INTEGRAL_TYPES: &[&str] = &[
    "TINYINT",
    "SMALLINT",
    "MEDIUMINT",
    "INT",
    "INTEGER",
    "BIGINT",
    "SERIAL",
    "BIGSERIAL",
    "SMALLSERIAL",
];

/// How strictly identifiers are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationLevel {
    /// Empty, length, characters and leading digit only
    Minimal,
    /// Minimal plus reserved keywords
    #[default]
    Standard,
    /// Standard plus underscore style rules
    Strict,
}

impl std::str::FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ValidationLevel::Minimal),
            "standard" => Ok(ValidationLevel::Standard),
            "strict" => Ok(ValidationLevel::Strict),
            other => Err(format!("unknown validation level '{}'", other)),
        }
    }
}

/// Checks a table, column or index name
pub fn validate_identifier(
    what: &str,
    name: &str,
    level: ValidationLevel,
) -> Result<(), ModelError> {
    if name.trim().is_empty() {
        return Err(ModelError::validation(format!("{} name cannot be empty", what)));
    }

    if name.trim() != name {
        return Err(ModelError::validation(format!(
            "{} name '{}' has leading or trailing whitespace",
            what, name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ModelError::validation(format!(
            "{} name '{}' is too long ({} chars, max {})",
            what,
            name,
            name.len(),
            MAX_IDENTIFIER_LENGTH
        )));
    }

    let invalid: String = name
        .chars()
        .filter(|c| !c.is_ascii_alphanumeric() && *c != '_')
        .collect();
    if !invalid.is_empty() {
        return Err(ModelError::validation(format!(
            "{} name '{}' contains invalid characters '{}'",
            what, name, invalid
        )));
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ModelError::validation(format!(
            "{} name '{}' cannot start with a digit",
            what, name
        )));
    }

    if level != ValidationLevel::Minimal && is_reserved_keyword(name) {
        return Err(ModelError::validation(format!(
            "'{}' is a reserved SQL keyword",
            name
        )));
    }

    if level == ValidationLevel::Strict
        && (name.starts_with('_') || name.ends_with('_') || name.contains("__"))
    {
        return Err(ModelError::validation(format!(
            "{} name '{}' has leading, trailing or repeated underscores",
            what, name
        )));
    }

    Ok(())
}

pub fn is_reserved_keyword(name: &str) -> bool {
    RESERVED_KEYWORDS.contains(name.to_uppercase().as_str())
}

/// Upper-cased type name without length/precision arguments, e.g. `VARCHAR(255)` -> `VARCHAR`
pub fn base_type(data_type: &str) -> String {
    data_type
        .split(['(', ' '])
        .next()
        .unwrap_or_default()
        .trim()
        .to_uppercase()
}

pub fn is_integral_type(data_type: &str) -> bool {
    INTEGRAL_TYPES.contains(&base_type(data_type).as_str())
}

/// Validates a single field in isolation
pub fn validate_field(field: &Field, level: ValidationLevel) -> Result<(), ModelError> {
    validate_identifier("field", &field.name, level)?;

    if field.data_type.trim().is_empty() {
        return Err(ModelError::validation(format!(
            "field '{}' has no data type",
            field.name
        )));
    }

    if field.auto_increment && !field.primary_key {
        return Err(ModelError::validation(format!(
            "auto-increment field '{}' must be a primary key",
            field.name
        )));
    }

    if field.auto_increment && !is_integral_type(&field.data_type) {
        return Err(ModelError::validation(format!(
            "auto-increment field '{}' must have an integral type, got '{}'",
            field.name, field.data_type
        )));
    }

    Ok(())
}

/// Validates an index against the table that will own it
pub fn validate_index(table: &Table, index: &Index, level: ValidationLevel) -> Result<(), ModelError> {
    validate_identifier("index", &index.name, level)?;

    if index.columns.is_empty() {
        return Err(ModelError::validation(format!(
            "index '{}' must cover at least one column",
            index.name
        )));
    }

    if let Some(missing) = index.columns.iter().find(|c| !table.has_column(c)) {
        return Err(ModelError::validation(format!(
            "index '{}' references unknown column '{}'",
            index.name, missing
        )));
    }

    let others_primary = table
        .indexes
        .iter()
        .any(|i| i.kind == IndexKind::Primary && i.id != index.id);
    if index.kind == IndexKind::Primary && others_primary {
        return Err(ModelError::validation(format!(
            "table '{}' already has a primary index",
            table.code
        )));
    }

    Ok(())
}
