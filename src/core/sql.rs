//! SQL literal and condition helpers shared by the fragment builders.

use crate::core::error::MigrationError;
use regex::Regex;
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Always-false condition used when a predicate can match nothing.
pub const FALSE_COND: &str = "1=0";

/// Plain or dotted SQL identifier (`rev_actor`, `temp_rev_user.revactor_actor`).
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

impl SqlValue {
    /// Render as an inline SQL literal. Text is single-quoted with embedded
    /// quotes doubled.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(s.as_str().into()),
        })
    }
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

pub fn check_identifier(name: &str, what: &str) -> Result<(), MigrationError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(MigrationError::ConfigurationError(format!(
            "{what} '{name}' is not a valid SQL identifier"
        )))
    }
}

/// `col = v` for a single value, `col IN (a,b,...)` otherwise. Returns `None`
/// for an empty value list so callers can drop the condition.
pub fn in_list(column: &str, values: &[SqlValue]) -> Option<String> {
    match values {
        [] => None,
        [single] => Some(format!("{column} = {}", single.to_literal())),
        many => {
            let rendered: Vec<String> = many.iter().map(SqlValue::to_literal).collect();
            Some(format!("{column} IN ({})", rendered.join(",")))
        }
    }
}

/// OR together conditions, each wrapped in parentheses. An empty list yields
/// the always-false condition.
pub fn or_list<S: AsRef<str>>(conds: &[S]) -> String {
    if conds.is_empty() {
        return FALSE_COND.to_string();
    }
    conds
        .iter()
        .map(|c| format!("({})", c.as_ref()))
        .collect::<Vec<_>>()
        .join(" OR ")
}
