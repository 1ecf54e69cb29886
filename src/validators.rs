//! Value validators: one pure function per logical type.
//!
//! Every validator receives a raw, already trimmed cell, the column's
//! constraint and a column label for messages, and returns either the coerced
//! [`Value`] or a [`CellError`]. A malformed constraint is reported the same
//! way as bad data, on the row that exercised it.

use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use rust_decimal::{Decimal, prelude::ToPrimitive};

use crate::{
    data::Value,
    schema::{Constraint, TEXT_MAX_LENGTH},
};

pub const DATE_ADP: &str = "date_adp";
pub const DATE_SYMBOLS: [&str; 8] = ["/", "-", "_", ":", "D", "M", "Y", DATE_ADP];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellError {
    pub message: String,
}

impl CellError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CellError {}

pub type CellResult = Result<Value, CellError>;

pub fn validate_string(raw: &str, constraint: Option<&Constraint>, column: &str) -> CellResult {
    if raw.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let max_length = constraint
        .and_then(Constraint::as_integer)
        .filter(|length| *length >= 0)
        .ok_or_else(|| {
            CellError::new(format!(
                "the maximum string length must be an integer, for column {column}"
            ))
        })?;
    Ok(Value::String(clean_string(raw, max_length as usize)))
}

pub fn validate_text(raw: &str, _constraint: Option<&Constraint>, _column: &str) -> CellResult {
    if raw.is_empty() {
        return Ok(Value::String(String::new()));
    }
    Ok(Value::String(clean_string(raw, TEXT_MAX_LENGTH as usize)))
}

fn clean_string(raw: &str, max_length: usize) -> String {
    let cleaned = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '\n' | '\r' | '\t'))
        .take(max_length)
        .collect::<String>();
    if cleaned == "0.0" {
        "0".to_string()
    } else {
        cleaned
    }
}

/// Shared integer/decimal validator. A constraint of `0` truncates to an
/// integer, `1` keeps the decimal value.
pub fn validate_numeric(raw: &str, constraint: Option<&Constraint>, column: &str) -> CellResult {
    if raw.trim().is_empty() {
        return Ok(Value::Integer(0));
    }
    let cleaned = clean_numeric(raw);
    let integer_mode = match constraint.and_then(Constraint::as_integer) {
        Some(0) => true,
        Some(1) => false,
        _ => {
            return Err(CellError::new(format!(
                "a numeric column needs 0 (integer) or 1 (decimal) as its mode, for column {column}"
            )));
        }
    };
    // Input with no digit left after cleanup is not a number.
    let parsed = parse_decimal(&cleaned)
        .filter(|_| cleaned.chars().any(|c| c.is_ascii_digit()))
        .ok_or_else(|| {
            CellError::new(format!(
                "the value '{raw}' must be a number, for column {column}"
            ))
        })?;
    if parsed.is_zero() {
        return Ok(Value::Integer(0));
    }
    if integer_mode {
        parsed
            .trunc()
            .to_i64()
            .map(Value::Integer)
            .ok_or_else(|| {
                CellError::new(format!(
                    "the value '{cleaned}' does not fit an integer, for column {column}"
                ))
            })
    } else {
        Ok(Value::Decimal(parsed.normalize()))
    }
}

/// Accounting and locale cleanup. Scans right to left: digits are kept, the
/// first decimal point met is kept, every minus is kept, and an opening
/// parenthesis becomes a minus unless one was already collected.
pub fn clean_numeric(raw: &str) -> String {
    let normalized = raw.replace(',', ".").replace(' ', "");
    let mut kept: Vec<char> = Vec::with_capacity(normalized.len());
    for c in normalized.chars().rev() {
        if c.is_ascii_digit() {
            kept.push(c);
        } else if (c == '.' && !kept.contains(&'.')) || c == '-' {
            kept.push(c);
        } else if c == '(' && !kept.contains(&'-') {
            kept.push('-');
        }
    }
    kept.iter().rev().collect()
}

fn parse_decimal(cleaned: &str) -> Option<Decimal> {
    let (negative, unsigned) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned),
    };
    if unsigned.is_empty() || unsigned == "." {
        return None;
    }
    if !unsigned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let mut body = unsigned.to_string();
    if body.starts_with('.') {
        body.insert(0, '0');
    }
    if body.ends_with('.') {
        body.pop();
    }
    let parsed = Decimal::from_str(&body).ok()?;
    Some(if negative { -parsed } else { parsed })
}

pub fn validate_date(raw: &str, constraint: Option<&Constraint>, column: &str) -> CellResult {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let tokens = match constraint {
        Some(Constraint::Tokens(tokens))
            if !tokens.is_empty() && tokens.iter().all(|t| DATE_SYMBOLS.contains(&t.as_str())) =>
        {
            tokens
        }
        _ => {
            return Err(CellError::new(format!(
                "date formats only accept the symbols {}, for column {column}",
                DATE_SYMBOLS.join(", ")
            )));
        }
    };
    let separator = tokens[0].as_str();
    if separator != DATE_ADP && !raw.contains(separator) {
        return Err(CellError::new(format!(
            "the expected date separator is {separator}, the date in the file is: {raw}, for column {column}"
        )));
    }
    let not_a_date =
        || CellError::new(format!("the value '{raw}' is not a date, for column {column}"));

    let (parts, order): (Vec<String>, Vec<&str>) = if separator == DATE_ADP {
        (split_adp_date(raw).ok_or_else(not_a_date)?, vec!["D", "M", "Y"])
    } else {
        let day_part = raw.split(' ').next().unwrap_or_default();
        (
            day_part.split(separator).map(str::to_string).collect(),
            tokens[1..].iter().map(String::as_str).collect(),
        )
    };
    let component = |symbol: &str| -> Option<i32> {
        let index = order.iter().position(|t| *t == symbol)?;
        parts.get(index)?.trim().parse::<i32>().ok()
    };
    let (Some(day), Some(month), Some(mut year)) = (component("D"), component("M"), component("Y"))
    else {
        return Err(not_a_date());
    };
    // A year written as "05" parses to 5 and is kept as year 5.
    if (10..=99).contains(&year) {
        year += 2000;
    }
    let (Ok(month), Ok(day)) = (u32::try_from(month), u32::try_from(day)) else {
        return Err(not_a_date());
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .map(Value::Date)
        .ok_or_else(not_a_date)
}

/// Day, month, year from compact digits (`DDMMYYYY`, `DDMMYY`) or from three
/// numeric groups split on any other character.
fn split_adp_date(raw: &str) -> Option<Vec<String>> {
    let head = raw.split(' ').next().unwrap_or_default();
    if head.chars().all(|c| c.is_ascii_digit()) && matches!(head.len(), 6 | 8) {
        return Some(vec![
            head[0..2].to_string(),
            head[2..4].to_string(),
            head[4..].to_string(),
        ]);
    }
    let groups = head
        .split(|c: char| !c.is_ascii_digit())
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    (groups.len() == 3).then_some(groups)
}

/// Empty is null, `f` is false, anything else is true.
pub fn validate_bool(raw: &str, _constraint: Option<&Constraint>, _column: &str) -> CellResult {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::Boolean(raw != "f"))
}
