use std::{fmt, str::FromStr};

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::ValidatorKind;

/// A coerced cell value, ready to be written to the validated file or bound
/// to a prepared statement parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Strings are the only quoted fields in a validated file.
    pub fn is_quoted(&self) -> bool {
        matches!(self, Value::String(_))
    }

    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::String(s) => format!("'{}'", escape_sql_string(s)),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Boolean(true) => "TRUE".to_string(),
            Value::Boolean(false) => "FALSE".to_string(),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Lowercases a header cell and turns spaces, newlines and carriage returns
/// into underscores.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '\n' | '\r' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Reads back a field of a validated file. Every field in such a file was
/// produced by a validator, so only the canonical renderings are accepted.
pub fn parse_validated_field(raw: &str, kind: ValidatorKind) -> Result<Value> {
    if raw.is_empty() {
        return Ok(match kind {
            ValidatorKind::String | ValidatorKind::Text => Value::String(String::new()),
            _ => Value::Null,
        });
    }
    let value = match kind {
        ValidatorKind::String | ValidatorKind::Text => Value::String(raw.to_string()),
        ValidatorKind::Integer | ValidatorKind::Float => {
            if let Ok(parsed) = raw.parse::<i64>() {
                Value::Integer(parsed)
            } else {
                let parsed = Decimal::from_str(raw)
                    .with_context(|| format!("Failed to parse '{raw}' as decimal"))?;
                Value::Decimal(parsed)
            }
        }
        ValidatorKind::Boolean => match raw {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            other => return Err(anyhow!("Failed to parse '{other}' as boolean")),
        },
        ValidatorKind::Date => {
            let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("Failed to parse '{raw}' as date"))?;
            Value::Date(parsed)
        }
    };
    Ok(value)
}
