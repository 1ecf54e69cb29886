//! Collaborators consumed by an integration run: schema provider, file
//! locator and notifier, each with the implementation the CLI uses.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::schema::{
    ColumnSpec, Constraint, ModelOptions, TEXT_MAX_LENGTH, TableSchema, ValidatorKind,
};

pub trait SchemaProvider {
    /// Returns the table and ordered, typed columns behind `model`.
    fn describe(&self, model: &str, options: &ModelOptions) -> Result<TableSchema>;
}

/// Column as recorded in a catalog: live table metadata, optionally with an
/// explicit validator and constraint overriding the SQL type mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub sql_type: String,
    #[serde(default)]
    pub max_length: Option<i64>,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub validator: Option<ValidatorKind>,
    #[serde(default)]
    pub constraint: Option<Constraint>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogModel {
    pub table: String,
    pub columns: Vec<CatalogColumn>,
}

/// YAML catalog of models:
///
/// ```yaml
/// models:
///   stock:
///     table: inventory_stock
///     columns:
///       - { name: sku, sql_type: character varying, max_length: 20, nullable: false }
///       - { name: qty, sql_type: integer }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSchemaProvider {
    pub models: BTreeMap<String, CatalogModel>,
}

impl CatalogSchemaProvider {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("Opening catalog file {path:?}"))?;
        Self::from_yaml(&raw).with_context(|| format!("Parsing catalog file {path:?}"))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

impl SchemaProvider for CatalogSchemaProvider {
    fn describe(&self, model: &str, options: &ModelOptions) -> Result<TableSchema> {
        let entry = self
            .models
            .get(model)
            .ok_or_else(|| anyhow!("Model '{model}' is not in the catalog"))?;
        let columns = entry
            .columns
            .iter()
            .map(|column| resolve_catalog_column(column, options))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Resolving columns of model '{model}'"))?;
        TableSchema::new(entry.table.clone(), columns)?.select(options)
    }
}

fn resolve_catalog_column(column: &CatalogColumn, options: &ModelOptions) -> Result<ColumnSpec> {
    let mut spec = match column.validator {
        Some(validator) => ColumnSpec::new(
            column.name.clone(),
            column.sql_type.clone(),
            None,
            !column.nullable,
            validator,
        ),
        None => ColumnSpec::from_sql_metadata(
            &column.name,
            &column.sql_type,
            column.max_length,
            column.nullable,
            &options.date_format,
        )?,
    };
    if column.constraint.is_some() {
        spec.constraint = column.constraint.clone();
    } else if spec.constraint.is_none() {
        spec.constraint = Some(match spec.validator {
            ValidatorKind::Date => Constraint::Tokens(options.date_format.clone()),
            ValidatorKind::Integer | ValidatorKind::Boolean => Constraint::Number(0),
            ValidatorKind::Float => Constraint::Number(1),
            ValidatorKind::String | ValidatorKind::Text => {
                Constraint::Number(column.max_length.unwrap_or(TEXT_MAX_LENGTH))
            }
        });
    }
    Ok(spec)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileQuery {
    pub directory: PathBuf,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub descending: bool,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub first_only: bool,
}

pub trait FileLocator {
    /// Ordered matches; a single entry when `first_only` is set. Empty when
    /// nothing matches.
    fn locate(&self, query: &FileQuery) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobFileLocator;

impl GlobFileLocator {
    pub fn pattern(query: &FileQuery) -> String {
        let prefix = query
            .name_prefix
            .as_deref()
            .map(glob::Pattern::escape)
            .unwrap_or_default();
        let extension = query
            .extension
            .as_deref()
            .map(|ext| glob::Pattern::escape(ext.trim_start_matches('.')))
            .unwrap_or_else(|| "*".to_string());
        let directory = glob::Pattern::escape(&query.directory.to_string_lossy());
        format!("{directory}/{prefix}*.{extension}")
    }
}

impl FileLocator for GlobFileLocator {
    fn locate(&self, query: &FileQuery) -> Result<Vec<PathBuf>> {
        let pattern = Self::pattern(query);
        let mut files = glob::glob(&pattern)
            .with_context(|| format!("Invalid file pattern '{pattern}'"))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        files.sort();
        if query.descending {
            files.reverse();
        }
        if query.first_only {
            files.truncate(1);
        }
        info!("Located {} file(s) matching '{pattern}'", files.len());
        Ok(files)
    }
}

/// Fire-and-forget alerting channel.
pub trait Notifier {
    fn send(&self, message: &str, subject: Option<&str>);
}

pub const DEFAULT_SUBJECT: &str = "Integration error";

/// Sends notifications to the log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: &str, subject: Option<&str>) {
        error!("[{}] {message}", subject.unwrap_or(DEFAULT_SUBJECT));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
models:
  stock:
    table: inventory_stock
    columns:
      - { name: sku, sql_type: character varying, max_length: 12, nullable: false }
      - { name: qty, sql_type: integer }
      - { name: received, sql_type: date }
      - { name: note, sql_type: text, validator: validate_str, constraint: 5 }
"#;

    #[test]
    fn catalog_columns_resolve_through_type_mapping() {
        let provider = CatalogSchemaProvider::from_yaml(CATALOG).unwrap();
        let options = ModelOptions {
            date_format: vec!["/".into(), "D".into(), "M".into(), "Y".into()],
            ..ModelOptions::default()
        };
        let schema = provider.describe("stock", &options).unwrap();
        assert_eq!(schema.table, "inventory_stock");
        assert_eq!(schema.column_names(), vec!["sku", "qty", "received", "note"]);

        let sku = schema.column("sku").unwrap();
        assert!(sku.mandatory);
        assert_eq!(sku.constraint, Some(Constraint::Number(12)));

        let received = schema.column("received").unwrap();
        assert_eq!(
            received.constraint,
            Some(Constraint::date_format(&["/", "D", "M", "Y"]))
        );

        let note = schema.column("note").unwrap();
        assert_eq!(note.validator, ValidatorKind::String);
        assert_eq!(note.constraint, Some(Constraint::Number(5)));
    }

    #[test]
    fn explicit_validator_without_constraint_gets_default_mode() {
        let raw = "models:\n  m:\n    table: t\n    columns:\n      - { name: amount, sql_type: money, validator: validate_float }\n";
        let schema = CatalogSchemaProvider::from_yaml(raw)
            .unwrap()
            .describe("m", &ModelOptions::default())
            .unwrap();
        assert_eq!(schema.columns[0].constraint, Some(Constraint::Number(1)));
        assert!(!schema.columns[0].mandatory);
    }

    #[test]
    fn unknown_model_and_validator_fail() {
        let provider = CatalogSchemaProvider::from_yaml(CATALOG).unwrap();
        assert!(provider.describe("orders", &ModelOptions::default()).is_err());

        let bad = "models:\n  m:\n    table: t\n    columns:\n      - { name: a, sql_type: point, validator: validate_point }\n";
        assert!(CatalogSchemaProvider::from_yaml(bad).is_err());
    }

    #[test]
    fn glob_pattern_escapes_directory() {
        let query = FileQuery {
            directory: PathBuf::from("/data/in[1]"),
            extension: Some(".csv".into()),
            name_prefix: Some("SALES".into()),
            ..FileQuery::default()
        };
        assert_eq!(GlobFileLocator::pattern(&query), "/data/in[[]1[]]/SALES*.csv");
    }
}
