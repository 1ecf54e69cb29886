//! I/O utilities for delimited files: reader/writer construction, input
//! decoding, and the filesystem moves and deletes the pipeline performs.
//!
//! - **Decoding**: input fields are decoded through `encoding_rs`. The
//!   [`DecodePolicy`] decides whether undecodable bytes are replaced (default)
//!   or fail the read.
//! - **Intermediate files**: projected files are always UTF-8 and every field
//!   is quoted.
//! - **Validated files**: strings are quoted, every other value is written
//!   bare, see [`write_validated_record`].

use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::data::Value;

pub const DEFAULT_DELIMITER: u8 = b';';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    #[default]
    Replace,
    Strict,
}

/// How the physical input file is read.
#[derive(Debug, Clone, Copy)]
pub struct InputFormat {
    pub delimiter: u8,
    pub encoding: &'static Encoding,
    pub decode_policy: DecodePolicy,
}

impl Default for InputFormat {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            encoding: UTF_8,
            decode_policy: DecodePolicy::Replace,
        }
    }
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Start offsets of the physical lines of a file.
///
/// The csv reader skips empty lines without yielding a record, and a record's
/// position points just past the previous record. Numbering records against
/// this index keeps empty lines and multi-line quoted fields counted the way
/// the file counts them.
#[derive(Debug, Clone, Default)]
pub struct LineIndex {
    starts: Vec<u64>,
    empty: Vec<bool>,
}

impl LineIndex {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        Self::from_reader(BufReader::new(file)).with_context(|| format!("Indexing lines of {path:?}"))
    }

    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut index = Self::default();
        let mut offset = 0u64;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            index.starts.push(offset);
            index.empty.push(line.iter().all(|b| matches!(b, b'\n' | b'\r')));
            offset += read as u64;
        }
        Ok(index)
    }

    /// 1-based physical line `record` starts on; `index` is its position in
    /// the record stream, used when the reader recorded no offset.
    pub fn line_of(&self, record: &csv::ByteRecord, index: usize) -> usize {
        let Some(byte) = record.position().map(|pos| pos.byte()) else {
            return index + 1;
        };
        let Some(mut line) = self
            .starts
            .partition_point(|start| *start <= byte)
            .checked_sub(1)
        else {
            return index + 1;
        };
        // Records start at a line start; an offset inside a line sits on an
        // unconsumed terminator.
        if self.starts[line] < byte {
            line += 1;
        }
        while self.empty.get(line).copied().unwrap_or(false) {
            line += 1;
        }
        line + 1
    }
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter))
}

pub fn open_projection_writer(path: &Path, delimiter: u8) -> Result<csv::Writer<BufWriter<File>>> {
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    Ok(builder.from_writer(BufWriter::new(file)))
}

pub fn create_buffered(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    Ok(BufWriter::new(file))
}

pub fn decode_bytes(
    bytes: &[u8],
    encoding: &'static Encoding,
    policy: DecodePolicy,
) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors && policy == DecodePolicy::Strict {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
    policy: DecodePolicy,
) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding, policy))
        .collect()
}

/// Writes one validated row. Strings are quoted with doubled inner quotes;
/// other values are written as-is.
pub fn write_validated_record<W: Write>(
    writer: &mut W,
    values: &[Value],
    delimiter: u8,
) -> Result<()> {
    let separator = delimiter as char;
    let mut line = String::new();
    for (idx, value) in values.iter().enumerate() {
        if idx > 0 {
            line.push(separator);
        }
        if value.is_quoted() {
            line.push('"');
            line.push_str(&value.as_display().replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(&value.as_display());
        }
    }
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .context("Writing validated row")
}

/// Moves `from` to `to`, replacing any existing target. Falls back to copy and
/// delete when a rename crosses filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Creating directory {parent:?}"))?;
        }
    }
    delete_file(to);
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).with_context(|| format!("Copying {from:?} to {to:?}"))?;
    fs::remove_file(from).with_context(|| format!("Removing {from:?}"))?;
    Ok(())
}

/// Deletes `path` if it is a file. Failures are logged, never raised.
pub fn delete_file(path: &Path) {
    if !path.is_file() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!("Deleted {path:?}"),
        Err(err) => warn!("Could not delete {path:?}: {err}"),
    }
}

/// Gives slow network storage time to flush a file that was just written.
pub fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
