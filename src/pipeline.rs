//! File validation pipeline.
//!
//! One [`FileValidator`] run takes a single source file through
//! `NotStarted -> Projected -> TypeChecked -> Validated | Rejected`:
//!
//! 1. Preconditions: the file exists, has a whitelisted extension, the
//!    delete-line specification parses and the desired columns resolve.
//!    Failures here are configuration errors; the source is moved to the error
//!    directory (except when it does not exist).
//! 2. Projection writes `TO_VALIDATED_<name>` next to the source.
//! 3. Type checking validates each projected row and writes the coerced values
//!    to `VALIDATED_<name>` until the first failing row; from then on only error
//!    groups are collected, up to the configured bound.
//! 4. A rejected file is moved to `<error_dir>/ERRORS_<name>`; a validated file
//!    replaces the source, which is deleted.

use std::{
    fmt,
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    data::{Value, parse_validated_field},
    dispatch::validate_cell,
    io_utils::{self, InputFormat},
    projection::{
        DeleteLine, DesiredColumns, ProjectedFile, Projection, ProjectionError, SubtotalRule,
        delete_line_set, read_header_row, resolve_columns,
    },
    schema::TableSchema,
};

pub const MAX_ERROR_GROUPS: usize = 50;
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["csv", "txt"];
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

const ERROR_PREFIX: &str = "ERRORS_";
const PROJECTED_PREFIX: &str = "TO_VALIDATED_";
const VALIDATED_PREFIX: &str = "VALIDATED_";

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub error_dir: PathBuf,
    pub desired_columns: Option<DesiredColumns>,
    pub delete_lines: Vec<DeleteLine>,
    pub subtotal_rules: Vec<SubtotalRule>,
    pub header_line: Option<usize>,
    pub format: InputFormat,
    pub settle_delay: Duration,
    pub max_error_groups: usize,
}

impl ValidationOptions {
    pub fn new(error_dir: impl Into<PathBuf>) -> Self {
        Self {
            error_dir: error_dir.into(),
            desired_columns: None,
            delete_lines: Vec::new(),
            subtotal_rules: Vec::new(),
            header_line: None,
            format: InputFormat::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            max_error_groups: MAX_ERROR_GROUPS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    Projected,
    TypeChecked,
    Validated,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub line_number: usize,
    pub column_position: usize,
    pub column: String,
    pub message: String,
}

/// Every failing cell of one source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorGroup {
    pub line_number: usize,
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub file_name: String,
    pub groups: Vec<ErrorGroup>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.groups.iter().map(|g| g.errors.len()).sum()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Errors found in file {}", self.file_name)?;
        for group in &self.groups {
            writeln!(f, "    * line {}:", group.line_number)?;
            for error in &group.errors {
                writeln!(
                    f,
                    "            - {} -- at position {}",
                    error.message, error.column_position
                )?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{message}")]
    Configuration { message: String },
    #[error("{0}")]
    Rejected(ValidationReport),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

impl PipelineError {
    fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
        }
    }
}

impl From<ProjectionError> for PipelineError {
    fn from(err: ProjectionError) -> Self {
        PipelineError::configuration(err.to_string())
    }
}

/// A cleaned file holding coerced values in schema column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFile {
    pub columns: Vec<String>,
    pub path: PathBuf,
    pub delimiter: u8,
    pub rows: usize,
}

impl ValidatedFile {
    /// Streams the validated rows back as typed values.
    pub fn read_rows<'a>(&self, schema: &'a TableSchema) -> Result<ValidatedRows<'a>> {
        let reader = io_utils::open_csv_reader_from_path(&self.path, self.delimiter)?;
        Ok(ValidatedRows {
            records: reader.into_records(),
            schema,
            line: 0,
        })
    }
}

pub struct ValidatedRows<'a> {
    records: csv::StringRecordsIntoIter<BufReader<File>>,
    schema: &'a TableSchema,
    line: usize,
}

impl Iterator for ValidatedRows<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.line += 1;
        let line = self.line;
        let parsed = record
            .with_context(|| format!("Reading validated row {line}"))
            .and_then(|record| {
                self.schema
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| {
                        parse_validated_field(record.get(idx).unwrap_or(""), column.validator)
                            .with_context(|| {
                                format!("Validated row {line} column '{}'", column.name)
                            })
                    })
                    .collect::<Result<Vec<_>>>()
            });
        Some(parsed)
    }
}

/// Files deleted when dropped unless released.
struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn track(&mut self, path: &Path) {
        self.paths.push(path.to_path_buf());
    }

    fn release(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            io_utils::delete_file(path);
        }
    }
}

pub struct FileValidator<'a> {
    source: PathBuf,
    schema: &'a TableSchema,
    options: &'a ValidationOptions,
    stage: Stage,
}

impl<'a> FileValidator<'a> {
    pub fn new(source: impl Into<PathBuf>, schema: &'a TableSchema, options: &'a ValidationOptions) -> Self {
        Self {
            source: source.into(),
            schema,
            options,
            stage: Stage::NotStarted,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn file_name(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn error_path(&self) -> PathBuf {
        self.options
            .error_dir
            .join(format!("{ERROR_PREFIX}{}", self.file_name()))
    }

    fn sibling(&self, prefix: &str) -> PathBuf {
        let name = format!("{prefix}{}", self.file_name());
        match self.source.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    fn transition(&mut self, stage: Stage) {
        debug!("{:?}: {:?} -> {:?}", self.source, self.stage, stage);
        self.stage = stage;
    }

    /// Moves the source to the error area and reports a configuration error.
    fn reject_configuration(&mut self, err: impl Into<PipelineError>) -> PipelineError {
        let err = err.into();
        let target = self.error_path();
        if let Err(move_err) = io_utils::move_file(&self.source, &target) {
            warn!("Could not move {:?} to {target:?}: {move_err:#}", self.source);
        }
        self.transition(Stage::Rejected);
        err
    }

    pub fn validate(&mut self) -> Result<ValidatedFile, PipelineError> {
        if self.stage != Stage::NotStarted {
            return Err(PipelineError::Io(anyhow!(
                "{:?} was already validated",
                self.source
            )));
        }
        if !self.source.is_file() {
            return Err(PipelineError::configuration(format!(
                "The requested file {} does not exist",
                self.source.display()
            )));
        }
        io_utils::delete_file(&self.error_path());

        let extension = self
            .source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            let message = format!("The file must be a csv or a txt: {}", self.file_name());
            return Err(self.reject_configuration(PipelineError::configuration(message)));
        }

        let delete_lines =
            match delete_line_set(&self.options.delete_lines, self.options.header_line) {
                Ok(lines) => lines,
                Err(err) => return Err(self.reject_configuration(err)),
            };

        let format = self.options.format;
        let header = read_header_row(&self.source, self.options.header_line, &format)?;
        let columns = match resolve_columns(
            self.options.desired_columns.as_ref(),
            &header,
            self.schema.len(),
            &self.source,
        ) {
            Ok(columns) => columns,
            Err(err) => return Err(self.reject_configuration(err)),
        };

        let mut scratch = ScratchFiles::new();
        let projected_path = self.sibling(PROJECTED_PREFIX);
        scratch.track(&projected_path);
        let projection = Projection::new(columns, delete_lines)
            .with_subtotal_rules(self.options.subtotal_rules.clone());
        let projected = projection.apply(&self.source, &projected_path, &format)?;
        self.transition(Stage::Projected);
        io_utils::settle(self.options.settle_delay);

        let validated_path = self.sibling(VALIDATED_PREFIX);
        scratch.track(&validated_path);
        let (groups, rows) = self.type_check(&projected, &projection.columns, &validated_path)?;
        self.transition(Stage::TypeChecked);
        io_utils::settle(self.options.settle_delay);

        if !groups.is_empty() {
            let report = ValidationReport {
                file_name: self.file_name(),
                groups,
            };
            let target = self.error_path();
            if let Err(err) = io_utils::move_file(&self.source, &target) {
                warn!("Could not move rejected {:?} to {target:?}: {err:#}", self.source);
            }
            self.transition(Stage::Rejected);
            info!(
                "{} rejected with {} failing line(s)",
                report.file_name,
                report.groups.len()
            );
            return Err(PipelineError::Rejected(report));
        }

        scratch.release(&validated_path);
        drop(scratch);
        io_utils::delete_file(&self.source);
        self.transition(Stage::Validated);
        info!("{} validated: {rows} row(s) in {validated_path:?}", self.file_name());
        Ok(ValidatedFile {
            columns: self.schema.column_names(),
            path: validated_path,
            delimiter: format.delimiter,
            rows,
        })
    }

    fn type_check(
        &self,
        projected: &ProjectedFile,
        columns: &[usize],
        output: &Path,
    ) -> Result<(Vec<ErrorGroup>, usize)> {
        let mut reader =
            io_utils::open_csv_reader_from_path(&projected.path, self.options.format.delimiter)?;
        let mut writer = io_utils::create_buffered(output)?;
        let mut groups: Vec<ErrorGroup> = Vec::new();
        let mut written = 0usize;

        for (idx, record) in reader.records().enumerate() {
            let line_number = projected.source_lines.get(idx).copied().unwrap_or(idx + 1);
            let record =
                record.with_context(|| format!("Reading projected row for line {line_number}"))?;
            let mut values = Vec::with_capacity(self.schema.len());
            let mut errors = Vec::new();
            for (col_idx, column) in self.schema.columns.iter().enumerate() {
                match validate_cell(record.get(col_idx).unwrap_or(""), column) {
                    Ok(value) => values.push(value),
                    Err(err) => errors.push(ValidationError {
                        line_number,
                        column_position: columns.get(col_idx).map_or(col_idx + 1, |c| c + 1),
                        column: column.name.clone(),
                        message: err.message,
                    }),
                }
            }
            if !errors.is_empty() {
                debug!("Line {line_number}: {} failing cell(s)", errors.len());
                groups.push(ErrorGroup {
                    line_number,
                    errors,
                });
                if groups.len() >= self.options.max_error_groups {
                    break;
                }
                continue;
            }
            if groups.is_empty() {
                io_utils::write_validated_record(
                    &mut writer,
                    &values,
                    self.options.format.delimiter,
                )?;
                written += 1;
            }
        }
        writer.flush().context("Flushing validated file")?;
        Ok((groups, written))
    }
}
