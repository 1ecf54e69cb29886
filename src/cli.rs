use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about = "Validate delimited files and integrate them into SQL tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate a CSV/TXT file against a catalog model
    Validate(ValidateArgs),
    /// Print the prepared insert/upsert statements for a catalog model
    Plan(PlanArgs),
    /// List the columns, validators and constraints of a catalog model
    Columns(ColumnsArgs),
    /// Run a YAML job: locate, validate and write the input to a SQL script
    Integrate(IntegrateArgs),
}

#[derive(Debug, Args)]
pub struct ModelArgs {
    /// YAML catalog describing the available models
    #[arg(short = 'c', long = "catalog")]
    pub catalog: PathBuf,
    /// Model identifier inside the catalog
    #[arg(short = 'm', long = "model")]
    pub model: String,
    /// Date format tokens: separator then Y/M/D order, e.g. `/,D,M,Y`
    #[arg(long = "date-format", value_delimiter = ',')]
    pub date_format: Vec<String>,
    /// Columns of the model to leave out
    #[arg(long = "exclude", value_delimiter = ',', conflicts_with = "fields")]
    pub exclude: Vec<String>,
    /// Restrict the model to these columns
    #[arg(long = "fields", value_delimiter = ',')]
    pub fields: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// File to validate
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    #[command(flatten)]
    pub model: ModelArgs,
    /// Directory receiving rejected files
    #[arg(short = 'e', long = "error-dir")]
    pub error_dir: PathBuf,
    /// 1-based line holding the column names
    #[arg(long = "header-line")]
    pub header_line: Option<usize>,
    /// Columns to keep, as 1-based positions or header names (comma separated)
    #[arg(long = "desired-columns", value_delimiter = ',')]
    pub desired_columns: Vec<String>,
    /// Lines to drop, as numbers or `start:end` ranges (comma separated)
    #[arg(long = "delete-lines", value_delimiter = ',')]
    pub delete_lines: Vec<String>,
    /// Subtotal rows to drop, as `position:label` (repeatable)
    #[arg(long = "subtotal", action = clap::ArgAction::Append)]
    pub subtotals: Vec<String>,
    /// CSV delimiter character (supports ';', ',', 'tab', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Behavior on undecodable input bytes
    #[arg(long = "decode-errors", value_enum, default_value = "replace")]
    pub decode_errors: DecodeErrors,
    /// Pause after each filesystem stage, in milliseconds
    #[arg(long = "settle-delay-ms", default_value_t = 2000)]
    pub settle_delay_ms: u64,
    /// Stop collecting after this many failing lines
    #[arg(long = "max-error-groups", default_value_t = 50)]
    pub max_error_groups: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum DecodeErrors {
    Replace,
    Strict,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// Emit an ON CONFLICT clause
    #[arg(long)]
    pub upsert: bool,
    /// Unique columns targeted by ON CONFLICT ... DO UPDATE
    #[arg(long = "unique-columns", value_delimiter = ',', requires = "upsert")]
    pub unique_columns: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    #[command(flatten)]
    pub model: ModelArgs,
    /// Print the resolved schema as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct IntegrateArgs {
    /// YAML job file
    #[arg(short = 'j', long = "job")]
    pub job: PathBuf,
    /// YAML catalog describing the available models
    #[arg(short = 'c', long = "catalog")]
    pub catalog: PathBuf,
    /// SQL script receiving the statements (appended to) instead of a database
    #[arg(short = 'o', long = "output", conflicts_with = "database_url")]
    pub output: Option<PathBuf>,
    /// PostgreSQL URL; overrides `connection.url` of the job file
    #[arg(long = "database-url")]
    pub database_url: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
