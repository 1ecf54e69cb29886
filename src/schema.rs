//! Table schema model: typed column specifications, the closed validator
//! registry, and the PostgreSQL type mapping used to derive column specs from
//! live table metadata.
//!
//! A [`TableSchema`] is the contract a file is validated against. Each
//! [`ColumnSpec`] names its validator through [`ValidatorKind`]; names outside
//! the registry fail when the schema is deserialized, never at first use.

use std::{collections::HashSet, fmt, str::FromStr};

use anyhow::{Result, anyhow, bail, ensure};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Cap applied by the text validator and by `text` columns without a length.
pub const TEXT_MAX_LENGTH: i64 = 2056;

pub const DEFAULT_DATE_FORMAT: [&str; 4] = ["-", "Y", "M", "D"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorKind {
    String,
    Text,
    Integer,
    Float,
    Date,
    Boolean,
}

impl ValidatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidatorKind::String => "validate_str",
            ValidatorKind::Text => "validate_text",
            ValidatorKind::Integer => "validate_int",
            ValidatorKind::Float => "validate_float",
            ValidatorKind::Date => "validate_date",
            ValidatorKind::Boolean => "validate_bool",
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ValidatorKind::String | ValidatorKind::Text)
    }
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidatorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let kind = match normalized.as_str() {
            "validate_str" | "str" | "string" => ValidatorKind::String,
            "validate_text" | "text" => ValidatorKind::Text,
            "validate_int" | "int" | "integer" => ValidatorKind::Integer,
            "validate_float" | "float" | "numeric" | "decimal" => ValidatorKind::Float,
            "validate_date" | "date" => ValidatorKind::Date,
            "validate_bool" | "bool" | "boolean" => ValidatorKind::Boolean,
            _ => bail!("Unknown validator '{value}'"),
        };
        Ok(kind)
    }
}

impl Serialize for ValidatorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ValidatorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ValidatorKind::from_str(&raw).map_err(de::Error::custom)
    }
}

/// Validator-specific constraint as declared by the schema source.
///
/// The shape is deliberately loose: a malformed constraint is reported as a
/// row error by the validator that receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constraint {
    Number(i64),
    Tokens(Vec<String>),
    Text(String),
}

impl Constraint {
    pub fn date_format(tokens: &[&str]) -> Self {
        Constraint::Tokens(tokens.iter().map(|t| t.to_string()).collect())
    }

    /// Integer view used for string lengths and numeric modes.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Constraint::Number(n) => Some(*n),
            Constraint::Text(raw) => raw.trim().parse().ok(),
            Constraint::Tokens(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Constraint::Number(n) => n.to_string(),
            Constraint::Text(raw) => raw.clone(),
            Constraint::Tokens(tokens) => tokens.join(" "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
    #[serde(default)]
    pub mandatory: bool,
    pub validator: ValidatorKind,
}

impl ColumnSpec {
    pub fn new(
        name: impl Into<String>,
        sql_type: impl Into<String>,
        constraint: Option<Constraint>,
        mandatory: bool,
        validator: ValidatorKind,
    ) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            constraint,
            mandatory,
            validator,
        }
    }

    /// Builds a column spec from `information_schema` metadata.
    pub fn from_sql_metadata(
        name: &str,
        sql_type: &str,
        max_length: Option<i64>,
        nullable: bool,
        date_format: &[String],
    ) -> Result<Self> {
        let (validator, constraint) = match sql_type.trim().to_ascii_lowercase().as_str() {
            "bigint" | "bigserial" | "integer" | "smallint" | "smallserial" | "serial" => {
                (ValidatorKind::Integer, Constraint::Number(0))
            }
            "double precision" | "money" | "numeric" | "real" => {
                (ValidatorKind::Float, Constraint::Number(1))
            }
            "character" | "character varying" => (
                ValidatorKind::String,
                Constraint::Number(max_length.unwrap_or(TEXT_MAX_LENGTH)),
            ),
            "text" => match max_length {
                Some(length) => (ValidatorKind::String, Constraint::Number(length)),
                None => (ValidatorKind::Text, Constraint::Number(TEXT_MAX_LENGTH)),
            },
            "boolean" => (ValidatorKind::Boolean, Constraint::Number(0)),
            "date" => (ValidatorKind::Date, Constraint::Tokens(date_format.to_vec())),
            other => bail!("Column '{name}' has unsupported SQL type '{other}'"),
        };
        Ok(Self::new(
            name,
            sql_type.trim(),
            Some(constraint),
            !nullable,
            validator,
        ))
    }

    /// Label used in validation messages.
    pub fn label(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnSpec>) -> Result<Self> {
        let schema = Self {
            table: table.into(),
            columns,
        };
        schema.ensure_valid()?;
        Ok(schema)
    }

    pub fn ensure_valid(&self) -> Result<()> {
        ensure!(!self.table.trim().is_empty(), "Table name cannot be empty");
        ensure!(
            !self.columns.is_empty(),
            "Table '{}' declares no columns",
            self.table
        );
        let mut seen = HashSet::new();
        for column in &self.columns {
            ensure!(
                !column.name.trim().is_empty(),
                "Table '{}' has a column without a name",
                self.table
            );
            if !seen.insert(column.name.as_str()) {
                bail!(
                    "Column '{}' is declared twice in table '{}'",
                    column.name,
                    self.table
                );
            }
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Applies `exclude` or `fields` from the model options, keeping the
    /// declared order.
    pub fn select(mut self, options: &ModelOptions) -> Result<Self> {
        if !options.exclude.is_empty() && !options.fields.is_empty() {
            bail!("Model options cannot combine 'exclude' and 'fields'");
        }
        if !options.exclude.is_empty() {
            self.columns
                .retain(|column| !options.exclude.contains(&column.name));
        } else if !options.fields.is_empty() {
            for field in &options.fields {
                if self.column(field).is_none() {
                    return Err(anyhow!(
                        "Field '{field}' is not a column of table '{}'",
                        self.table
                    ));
                }
            }
            self.columns
                .retain(|column| options.fields.contains(&column.name));
        }
        self.ensure_valid()?;
        Ok(self)
    }
}

/// Options applied when a model is resolved into a [`TableSchema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    #[serde(default = "default_date_format")]
    pub date_format: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            date_format: default_date_format(),
            exclude: Vec::new(),
            fields: Vec::new(),
        }
    }
}

fn default_date_format() -> Vec<String> {
    DEFAULT_DATE_FORMAT.iter().map(|t| t.to_string()).collect()
}
