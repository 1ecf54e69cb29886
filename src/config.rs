//! YAML job files describing one integration: where to find the input, which
//! model to validate against, how to read the file and how to write it.
//!
//! ```yaml
//! input:
//!   directory: /srv/drop/stock
//!   extension: csv
//!   name_prefix: STOCK_
//! model: stock
//! model_options:
//!   date_format: ["/", "D", "M", "Y"]
//! validation:
//!   error_dir: /srv/drop/stock/errors
//!   header_line: 1
//!   delete_lines: [2, "10:12"]
//!   subtotal_rows: [[1, "Total"]]
//!   delimiter: semicolon
//!   encoding: windows-1252
//! upsert:
//!   enabled: true
//!   unique_columns: [sku]
//! connection:
//!   url: postgres://loader@db.internal/stock
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{
    cli::parse_delimiter,
    integration::{DEFAULT_CONNECT_ATTEMPTS, IntegrationJob},
    io_utils::{self, DecodePolicy, InputFormat},
    pipeline::{DEFAULT_SETTLE_DELAY, MAX_ERROR_GROUPS, ValidationOptions},
    projection::{DeleteLine, DesiredColumns, SubtotalRule},
    provider::FileQuery,
    schema::ModelOptions,
    upsert::{ConflictPolicy, DEFAULT_BATCH_SIZE},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub input: FileQuery,
    pub model: String,
    #[serde(default)]
    pub model_options: ModelOptions,
    pub validation: ValidationConfig,
    #[serde(default)]
    pub upsert: UpsertConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub error_dir: PathBuf,
    #[serde(default)]
    pub desired_columns: Option<DesiredColumns>,
    #[serde(default)]
    pub delete_lines: Vec<DeleteLine>,
    #[serde(default)]
    pub subtotal_rows: Vec<(usize, String)>,
    #[serde(default)]
    pub header_line: Option<usize>,
    #[serde(default)]
    pub delimiter: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub decode_errors: DecodePolicy,
    #[serde(default)]
    pub settle_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_error_groups: Option<usize>,
}

impl ValidationConfig {
    pub fn new(error_dir: impl Into<PathBuf>) -> Self {
        Self {
            error_dir: error_dir.into(),
            desired_columns: None,
            delete_lines: Vec::new(),
            subtotal_rows: Vec::new(),
            header_line: None,
            delimiter: None,
            encoding: None,
            decode_errors: DecodePolicy::default(),
            settle_delay_ms: None,
            max_error_groups: None,
        }
    }

    pub fn input_format(&self) -> Result<InputFormat> {
        let mut format = InputFormat {
            encoding: io_utils::resolve_encoding(self.encoding.as_deref())?,
            decode_policy: self.decode_errors,
            ..InputFormat::default()
        };
        if let Some(raw) = &self.delimiter {
            format.delimiter = parse_delimiter(raw).map_err(|err| anyhow!(err))?;
        }
        Ok(format)
    }

    pub fn to_options(&self) -> Result<ValidationOptions> {
        Ok(ValidationOptions {
            error_dir: self.error_dir.clone(),
            desired_columns: self.desired_columns.clone().filter(|c| !c.is_empty()),
            delete_lines: self.delete_lines.clone(),
            subtotal_rules: self
                .subtotal_rows
                .iter()
                .map(|(position, label)| SubtotalRule {
                    position: *position,
                    label: label.clone(),
                })
                .collect(),
            header_line: self.header_line,
            format: self.input_format()?,
            settle_delay: self
                .settle_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SETTLE_DELAY),
            max_error_groups: self.max_error_groups.unwrap_or(MAX_ERROR_GROUPS).max(1),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub unique_columns: Option<Vec<String>>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for UpsertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            unique_columns: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl UpsertConfig {
    pub fn policy(&self) -> ConflictPolicy {
        ConflictPolicy::from_request(self.enabled, self.unique_columns.clone())
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `postgres://` URL used when no script output is requested.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_attempts")]
    pub attempts: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

fn default_attempts() -> usize {
    DEFAULT_CONNECT_ATTEMPTS
}

impl JobConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("Opening job file {path:?}"))?;
        Self::from_yaml(&raw).with_context(|| format!("Parsing job file {path:?}"))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: JobConfig = serde_yaml::from_str(raw)?;
        if config.model.trim().is_empty() {
            return Err(anyhow!("Job file does not name a model"));
        }
        Ok(config)
    }

    pub fn to_job(&self) -> Result<IntegrationJob> {
        let mut job = IntegrationJob::new(
            self.input.clone(),
            self.model.clone(),
            self.validation.to_options()?,
        );
        job.model_options = self.model_options.clone();
        job.policy = self.upsert.policy();
        job.batch_size = self.upsert.batch_size.max(1);
        job.connect_attempts = self.connection.attempts.max(1);
        Ok(job)
    }
}
