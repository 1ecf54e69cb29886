//! Row and column projection.
//!
//! Resolves which physical lines of a file are discarded (header, explicit
//! lines, inclusive ranges, subtotal rows) and which physical columns feed the
//! schema's columns, then writes the projected intermediate file.

use std::{
    collections::BTreeSet,
    fmt,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use itertools::Itertools;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    data::normalize_column_name,
    io_utils::{self, InputFormat, LineIndex},
};

static RANGE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn range_pattern() -> Option<&'static Regex> {
    RANGE_PATTERN
        .get_or_init(|| Regex::new(r"^\s*(\d+)\s*:\s*(\d+)\s*$").ok())
        .as_ref()
}

/// One entry of a delete-line specification: a 1-based line number or an
/// inclusive `"start:end"` range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeleteLine {
    Line(i64),
    Range(String),
}

impl fmt::Display for DeleteLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteLine::Line(line) => write!(f, "{line}"),
            DeleteLine::Range(range) => write!(f, "'{range}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DesiredColumns {
    Positions(Vec<usize>),
    Names(Vec<String>),
}

impl DesiredColumns {
    pub fn is_empty(&self) -> bool {
        match self {
            DesiredColumns::Positions(positions) => positions.is_empty(),
            DesiredColumns::Names(names) => names.is_empty(),
        }
    }
}

/// Drops a row whose cell at the 1-based `position` equals `label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtotalRule {
    pub position: usize,
    pub label: String,
}

impl SubtotalRule {
    fn matches(&self, fields: &[String]) -> bool {
        self.position
            .checked_sub(1)
            .and_then(|idx| fields.get(idx))
            .is_some_and(|cell| cell.trim().eq_ignore_ascii_case(self.label.trim()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("invalid lines to delete: [{entries}]; expected entries such as 1, 2, '4:7'")]
    InvalidDeleteLines { entries: String },
    #[error("column positions start at 1, got {position}")]
    InvalidPosition { position: usize },
    #[error("the file must have at least {required} columns, it has {found}")]
    TooFewColumns { required: usize, found: usize },
    #[error(
        "the file {file} does not contain every requested column:\n\tfile columns:\n\t\t{file_columns}\n\trequested columns:\n\t\t{requested}"
    )]
    MissingColumns {
        file: String,
        file_columns: String,
        requested: String,
    },
    #[error("{desired} desired columns cannot feed the {table} columns of the table")]
    NotEnoughDesiredColumns { desired: usize, table: usize },
}

/// Zero-based physical line indices to discard. Ranges keep their bounds so
/// a wide range costs nothing until lines are tested against it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteLineSet {
    lines: BTreeSet<usize>,
    ranges: Vec<RangeInclusive<usize>>,
}

impl DeleteLineSet {
    pub fn insert(&mut self, index: usize) {
        self.lines.insert(index);
    }

    pub fn insert_range(&mut self, range: RangeInclusive<usize>) {
        if !range.is_empty() {
            self.ranges.push(range);
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.lines.contains(&index) || self.ranges.iter().any(|range| range.contains(&index))
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.ranges.is_empty()
    }

    /// Discarded indices below `limit`, ascending.
    pub fn indices_below(&self, limit: usize) -> Vec<usize> {
        (0..limit).filter(|index| self.contains(*index)).collect()
    }
}

impl FromIterator<usize> for DeleteLineSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
            ranges: Vec::new(),
        }
    }
}

/// Turns a delete-line specification into zero-based line indices, adding the
/// header line when one is declared.
pub fn delete_line_set(
    entries: &[DeleteLine],
    header_line: Option<usize>,
) -> Result<DeleteLineSet, ProjectionError> {
    let invalid = || ProjectionError::InvalidDeleteLines {
        entries: entries.iter().join(", "),
    };
    let mut lines = DeleteLineSet::default();
    for entry in entries {
        match entry {
            DeleteLine::Line(line) => {
                let index = usize::try_from(*line)
                    .ok()
                    .and_then(|line| line.checked_sub(1))
                    .ok_or_else(invalid)?;
                lines.insert(index);
            }
            DeleteLine::Range(range) => {
                let captures = range_pattern()
                    .and_then(|pattern| pattern.captures(range))
                    .ok_or_else(invalid)?;
                let start: usize = captures[1].parse().map_err(|_| invalid())?;
                let end: usize = captures[2].parse().map_err(|_| invalid())?;
                if start == 0 {
                    return Err(invalid());
                }
                if end >= start {
                    lines.insert_range(start - 1..=end - 1);
                }
            }
        }
    }
    if let Some(header) = header_line.filter(|line| *line > 0) {
        lines.insert(header - 1);
    }
    Ok(lines)
}

/// Resolves the zero-based physical column feeding each schema column.
///
/// `header` is the normalized row used to count the file's columns and to
/// match names.
pub fn resolve_columns(
    desired: Option<&DesiredColumns>,
    header: &[String],
    table_width: usize,
    file: &Path,
) -> Result<Vec<usize>, ProjectionError> {
    let found = header.len();
    let columns = match desired.filter(|d| !d.is_empty()) {
        None => {
            if table_width > found {
                return Err(ProjectionError::TooFewColumns {
                    required: table_width,
                    found,
                });
            }
            (0..table_width).collect::<Vec<_>>()
        }
        Some(DesiredColumns::Positions(positions)) => {
            if let Some(position) = positions.iter().find(|p| **p == 0) {
                return Err(ProjectionError::InvalidPosition {
                    position: *position,
                });
            }
            let required = positions.iter().copied().max().unwrap_or_default();
            if required > found {
                return Err(ProjectionError::TooFewColumns { required, found });
            }
            positions.iter().map(|p| p - 1).collect()
        }
        Some(DesiredColumns::Names(names)) => {
            let wanted = names
                .iter()
                .map(|name| normalize_column_name(name))
                .collect::<Vec<_>>();
            let missing = wanted.iter().any(|name| !header.contains(name));
            if missing {
                return Err(ProjectionError::MissingColumns {
                    file: file.display().to_string(),
                    file_columns: header.iter().sorted().join(", "),
                    requested: wanted.iter().sorted().join(", "),
                });
            }
            wanted
                .iter()
                .filter_map(|name| header.iter().position(|h| h == name))
                .collect()
        }
    };
    if columns.len() < table_width {
        return Err(ProjectionError::NotEnoughDesiredColumns {
            desired: columns.len(),
            table: table_width,
        });
    }
    Ok(columns)
}

/// Reads and normalizes the header row: the declared header line, or the
/// first record when none is declared.
pub fn read_header_row(
    path: &Path,
    header_line: Option<usize>,
    format: &InputFormat,
) -> Result<Vec<String>> {
    let header_line = header_line.filter(|line| *line > 0);
    let lines = LineIndex::from_path(path)?;
    let mut reader = io_utils::open_csv_reader_from_path(path, format.delimiter)?;
    for (idx, record) in reader.byte_records().enumerate() {
        let record = record.with_context(|| format!("Reading line {} of {path:?}", idx + 1))?;
        let line = lines.line_of(&record, idx);
        match header_line {
            Some(target) if line > target => break,
            Some(target) if line < target => continue,
            _ => {
                let decoded =
                    io_utils::decode_record(&record, format.encoding, format.decode_policy)?;
                return Ok(decoded.iter().map(|h| normalize_column_name(h)).collect());
            }
        }
    }
    Ok(Vec::new())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub columns: Vec<usize>,
    pub delete_lines: DeleteLineSet,
    pub subtotal_rules: Vec<SubtotalRule>,
}

/// The intermediate file and, for each row written to it, the 1-based
/// physical line it came from.
#[derive(Debug, Clone)]
pub struct ProjectedFile {
    pub path: PathBuf,
    pub source_lines: Vec<usize>,
}

impl Projection {
    pub fn new(columns: Vec<usize>, delete_lines: DeleteLineSet) -> Self {
        Self {
            columns,
            delete_lines,
            subtotal_rules: Vec::new(),
        }
    }

    pub fn with_subtotal_rules(mut self, rules: Vec<SubtotalRule>) -> Self {
        self.subtotal_rules = rules;
        self
    }

    pub fn project_row(&self, fields: &[String]) -> Vec<String> {
        self.columns
            .iter()
            .map(|idx| fields.get(*idx).cloned().unwrap_or_default())
            .collect()
    }

    /// Writes `output`, keeping only retained lines and reordering columns.
    /// Rows that are blank after projection are dropped.
    pub fn apply(&self, input: &Path, output: &Path, format: &InputFormat) -> Result<ProjectedFile> {
        let lines = LineIndex::from_path(input)?;
        let mut reader = io_utils::open_csv_reader_from_path(input, format.delimiter)?;
        let mut writer = io_utils::open_projection_writer(output, format.delimiter)?;
        let mut source_lines = Vec::new();
        for (idx, record) in reader.byte_records().enumerate() {
            let record =
                record.with_context(|| format!("Reading line {} of {input:?}", idx + 1))?;
            let line = lines.line_of(&record, idx);
            if self.delete_lines.contains(line - 1) {
                continue;
            }
            let fields = io_utils::decode_record(&record, format.encoding, format.decode_policy)
                .with_context(|| format!("Decoding line {line} of {input:?}"))?;
            if self.subtotal_rules.iter().any(|rule| rule.matches(&fields)) {
                debug!("Dropping subtotal line {line}");
                continue;
            }
            let projected = self.project_row(&fields);
            if projected.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            writer
                .write_record(&projected)
                .with_context(|| format!("Writing projected line {line}"))?;
            source_lines.push(line);
        }
        writer.flush().context("Flushing projected file")?;
        Ok(ProjectedFile {
            path: output.to_path_buf(),
            source_lines,
        })
    }
}
