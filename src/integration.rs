//! End-to-end integration of one input file into a table: connect, locate,
//! resolve the model, validate, upsert.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{error, info, warn};
use thiserror::Error;

use crate::{
    io_utils,
    pipeline::{FileValidator, PipelineError, ValidatedFile, ValidationOptions, ValidationReport},
    provider::{FileLocator, FileQuery, Notifier, SchemaProvider},
    schema::{ModelOptions, TableSchema},
    sql_script::ScriptSession,
    upsert::{
        ConflictPolicy, DEFAULT_BATCH_SIZE, PreparedUpsertPlan, SqlSession, UpsertSummary,
        execute_prepared_upsert,
    },
};

pub const DEFAULT_CONNECT_ATTEMPTS: usize = 5;

/// Opens sessions against the target store.
pub trait ConnectionFactory {
    type Session: SqlSession;

    fn connect(&self) -> Result<Self::Session>;
}

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Could not connect after {attempts} attempt(s): {message}")]
    Connection { attempts: usize, message: String },
    #[error("No input file matches {query:?}")]
    NoInputFile { query: FileQuery },
    #[error("{message}")]
    Configuration { message: String },
    #[error("{0}")]
    Rejected(ValidationReport),
    #[error("Reading {file:?} failed: {message}")]
    Input { file: PathBuf, message: String },
    #[error("Writing to '{table}' failed: {message}")]
    Write { table: String, message: String },
}

impl IntegrationError {
    fn subject(&self) -> &'static str {
        match self {
            IntegrationError::Connection { .. } => "Connection error",
            IntegrationError::NoInputFile { .. } => "Missing input file",
            IntegrationError::Configuration { .. } => "Configuration error",
            IntegrationError::Rejected(_) => "Rejected file",
            IntegrationError::Input { .. } => "Input error",
            IntegrationError::Write { .. } => "Write error",
        }
    }
}

/// Tries `connect` up to `attempts` times without backoff.
pub fn connect_with_retry<C>(factory: &C, attempts: usize) -> Result<C::Session, IntegrationError>
where
    C: ConnectionFactory + ?Sized,
{
    let attempts = attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match factory.connect() {
            Ok(session) => {
                if attempt > 1 {
                    info!("Connected on attempt {attempt}/{attempts}");
                }
                return Ok(session);
            }
            Err(err) => {
                warn!("Connection attempt {attempt}/{attempts} failed: {err:#}");
                last = format!("{err:#}");
            }
        }
    }
    Err(IntegrationError::Connection {
        attempts,
        message: last,
    })
}

#[derive(Debug, Clone)]
pub struct IntegrationJob {
    pub query: FileQuery,
    pub model: String,
    pub model_options: ModelOptions,
    pub validation: ValidationOptions,
    pub policy: ConflictPolicy,
    pub batch_size: usize,
    pub connect_attempts: usize,
}

impl IntegrationJob {
    pub fn new(query: FileQuery, model: impl Into<String>, validation: ValidationOptions) -> Self {
        Self {
            query,
            model: model.into(),
            model_options: ModelOptions::default(),
            validation,
            policy: ConflictPolicy::NoUpsert,
            batch_size: DEFAULT_BATCH_SIZE,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrationOutcome {
    pub source: PathBuf,
    pub table: String,
    pub summary: UpsertSummary,
}

pub struct Integrator<'a, C: ConnectionFactory> {
    connections: &'a C,
    schemas: &'a dyn SchemaProvider,
    locator: &'a dyn FileLocator,
    notifier: &'a dyn Notifier,
}

impl<'a, C: ConnectionFactory> Integrator<'a, C> {
    pub fn new(
        connections: &'a C,
        schemas: &'a dyn SchemaProvider,
        locator: &'a dyn FileLocator,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            connections,
            schemas,
            locator,
            notifier,
        }
    }

    /// Runs the job once. Failures are logged and sent to the notifier before
    /// being returned. The validated artifact never outlives the run.
    pub fn run(&self, job: &IntegrationJob) -> Result<IntegrationOutcome, IntegrationError> {
        let mut validated: Option<PathBuf> = None;
        let outcome = self.integrate(job, &mut validated);
        if let Err(err) = &outcome {
            error!("Integration of model '{}' failed: {err}", job.model);
            self.notifier.send(&err.to_string(), Some(err.subject()));
        }
        if let Some(path) = validated {
            io_utils::delete_file(&path);
        }
        io_utils::settle(job.validation.settle_delay);
        outcome
    }

    fn integrate(
        &self,
        job: &IntegrationJob,
        validated: &mut Option<PathBuf>,
    ) -> Result<IntegrationOutcome, IntegrationError> {
        let mut session = connect_with_retry(self.connections, job.connect_attempts)?;

        let source = self
            .locator
            .locate(&job.query)
            .map_err(|err| IntegrationError::Configuration {
                message: format!("{err:#}"),
            })?
            .into_iter()
            .next()
            .ok_or_else(|| IntegrationError::NoInputFile {
                query: job.query.clone(),
            })?;
        info!("Integrating {source:?} with model '{}'", job.model);

        let schema = self
            .schemas
            .describe(&job.model, &job.model_options)
            .map_err(|err| IntegrationError::Configuration {
                message: format!("{err:#}"),
            })?;

        let mut validator = FileValidator::new(&source, &schema, &job.validation);
        let file = validator.validate().map_err(|err| match err {
            PipelineError::Configuration { message } => IntegrationError::Configuration { message },
            PipelineError::Rejected(report) => IntegrationError::Rejected(report),
            PipelineError::Io(err) => IntegrationError::Input {
                file: source.clone(),
                message: format!("{err:#}"),
            },
        })?;
        *validated = Some(file.path.clone());

        let summary = write_rows(&mut session, &file, &schema, job)?;
        info!(
            "{} row(s) of {:?} integrated into '{}'",
            summary.rows, source, schema.table
        );
        Ok(IntegrationOutcome {
            source,
            table: schema.table,
            summary,
        })
    }
}

fn write_rows<S: SqlSession>(
    session: &mut S,
    file: &ValidatedFile,
    schema: &TableSchema,
    job: &IntegrationJob,
) -> Result<UpsertSummary, IntegrationError> {
    let write_error = |err: anyhow::Error| IntegrationError::Write {
        table: schema.table.clone(),
        message: format!("{err:#}"),
    };
    let plan = PreparedUpsertPlan::from_schema(schema, job.policy.clone()).map_err(write_error)?;
    let rows = file.read_rows(schema).map_err(write_error)?;
    execute_prepared_upsert(session, &plan, rows, job.batch_size).map_err(write_error)
}

/// Connection factory whose sessions append to a SQL script file.
#[derive(Debug, Clone)]
pub struct ScriptConnection {
    path: PathBuf,
}

impl ScriptConnection {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionFactory for ScriptConnection {
    type Session = ScriptSession<BufWriter<File>>;

    fn connect(&self) -> Result<Self::Session> {
        let file = File::options()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Opening SQL script {:?}", self.path))?;
        Ok(ScriptSession::new(BufWriter::new(file)))
    }
}
