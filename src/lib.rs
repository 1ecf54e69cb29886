pub mod cli;
pub mod config;
pub mod data;
pub mod dispatch;
pub mod integration;
pub mod io_utils;
pub mod pipeline;
pub mod postgres;
pub mod projection;
pub mod provider;
pub mod schema;
pub mod sql_script;
pub mod table;
pub mod upsert;
pub mod validators;

use std::{env, sync::OnceLock, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands, DecodeErrors, ModelArgs},
    config::JobConfig,
    integration::{
        ConnectionFactory, IntegrationJob, IntegrationOutcome, Integrator, ScriptConnection,
    },
    io_utils::{DecodePolicy, InputFormat},
    pipeline::{FileValidator, PipelineError, ValidationOptions},
    postgres::PostgresConnection,
    projection::{DeleteLine, DesiredColumns, SubtotalRule},
    provider::{CatalogSchemaProvider, GlobFileLocator, LogNotifier, SchemaProvider},
    schema::{ModelOptions, TableSchema},
    upsert::{ConflictPolicy, PreparedUpsertPlan},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_integrator", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => handle_validate(&args),
        Commands::Plan(args) => handle_plan(&args),
        Commands::Columns(args) => handle_columns(&args),
        Commands::Integrate(args) => handle_integrate(&args),
    }
}

fn resolve_model(args: &ModelArgs) -> Result<TableSchema> {
    let catalog = CatalogSchemaProvider::load(&args.catalog)?;
    let mut options = ModelOptions {
        exclude: args.exclude.clone(),
        fields: args.fields.clone(),
        ..ModelOptions::default()
    };
    if !args.date_format.is_empty() {
        options.date_format = args.date_format.clone();
    }
    debug!("Model options: {options:?}");
    catalog
        .describe(&args.model, &options)
        .with_context(|| format!("Resolving model '{}' from {:?}", args.model, args.catalog))
}

fn handle_validate(args: &cli::ValidateArgs) -> Result<()> {
    let schema = resolve_model(&args.model)?;
    let format = InputFormat {
        delimiter: args.delimiter.unwrap_or(io_utils::DEFAULT_DELIMITER),
        encoding: io_utils::resolve_encoding(args.input_encoding.as_deref())?,
        decode_policy: match args.decode_errors {
            DecodeErrors::Replace => DecodePolicy::Replace,
            DecodeErrors::Strict => DecodePolicy::Strict,
        },
    };
    info!(
        "Validating '{}' against '{}' with delimiter '{}'",
        args.input.display(),
        schema.table,
        printable_delimiter(format.delimiter)
    );
    let options = ValidationOptions {
        desired_columns: parse_desired_columns(&args.desired_columns),
        delete_lines: args.delete_lines.iter().map(|s| parse_delete_line(s)).collect(),
        subtotal_rules: args
            .subtotals
            .iter()
            .map(|s| parse_subtotal(s))
            .collect::<Result<Vec<_>>>()?,
        header_line: args.header_line,
        format,
        settle_delay: Duration::from_millis(args.settle_delay_ms),
        max_error_groups: args.max_error_groups.max(1),
        ..ValidationOptions::new(&args.error_dir)
    };

    let mut validator = FileValidator::new(&args.input, &schema, &options);
    match validator.validate() {
        Ok(file) => {
            println!("{}", file.path.display());
            info!("{} row(s) validated", file.rows);
            Ok(())
        }
        Err(PipelineError::Rejected(report)) => {
            print!("{report}");
            Err(anyhow!(
                "{} rejected with {} error(s); moved to {:?}",
                report.file_name,
                report.error_count(),
                validator.error_path()
            ))
        }
        Err(err) => Err(err.into()),
    }
}

fn handle_plan(args: &cli::PlanArgs) -> Result<()> {
    let schema = resolve_model(&args.model)?;
    let unique = (!args.unique_columns.is_empty()).then(|| args.unique_columns.clone());
    let plan = PreparedUpsertPlan::from_schema(
        &schema,
        ConflictPolicy::from_request(args.upsert, unique),
    )?;
    println!("{}", plan.define_sql());
    println!("{}", plan.execute_sql());
    println!("{}", plan.deallocate_sql());
    Ok(())
}

fn handle_columns(args: &cli::ColumnsArgs) -> Result<()> {
    let schema = resolve_model(&args.model)?;
    if args.json {
        let rendered =
            serde_json::to_string_pretty(&schema).context("Serializing schema to JSON")?;
        println!("{rendered}");
    } else {
        print!("{}", table::render_columns(&schema));
    }
    Ok(())
}

fn handle_integrate(args: &cli::IntegrateArgs) -> Result<()> {
    let config = JobConfig::load(&args.job)?;
    let job = config.to_job()?;
    let catalog = CatalogSchemaProvider::load(&args.catalog)?;
    if let Some(output) = &args.output {
        let connection = ScriptConnection::new(output);
        let outcome = run_integration(&connection, &catalog, &job)?;
        info!("Statements for '{}' written to {:?}", outcome.table, connection.path());
        return Ok(());
    }
    let url = args
        .database_url
        .clone()
        .or_else(|| config.connection.url.clone())
        .ok_or_else(|| anyhow!("Give --output or a database URL (--database-url or connection.url)"))?;
    let connection = PostgresConnection::new(&url)?;
    run_integration(&connection, &catalog, &job)?;
    Ok(())
}

fn run_integration<C: ConnectionFactory>(
    connection: &C,
    catalog: &CatalogSchemaProvider,
    job: &IntegrationJob,
) -> Result<IntegrationOutcome> {
    let integrator = Integrator::new(connection, catalog, &GlobFileLocator, &LogNotifier);
    let outcome = integrator.run(job)?;
    info!(
        "{} row(s) from {:?} integrated into '{}'",
        outcome.summary.rows, outcome.source, outcome.table
    );
    Ok(outcome)
}

/// Positions when every entry is a number, header names otherwise.
fn parse_desired_columns(raw: &[String]) -> Option<DesiredColumns> {
    let entries = raw
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if entries.is_empty() {
        return None;
    }
    let positions = entries
        .iter()
        .map(|s| s.parse::<usize>())
        .collect::<Result<Vec<_>, _>>();
    Some(match positions {
        Ok(positions) => DesiredColumns::Positions(positions),
        Err(_) => DesiredColumns::Names(entries.iter().map(|s| s.to_string()).collect()),
    })
}

fn parse_delete_line(raw: &str) -> DeleteLine {
    match raw.trim().parse::<i64>() {
        Ok(line) => DeleteLine::Line(line),
        Err(_) => DeleteLine::Range(raw.trim().to_string()),
    }
}

fn parse_subtotal(raw: &str) -> Result<SubtotalRule> {
    let (position, label) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Subtotal '{raw}' must look like 'position:label'"))?;
    let position = position
        .trim()
        .parse()
        .with_context(|| format!("Subtotal position in '{raw}'"))?;
    Ok(SubtotalRule {
        position,
        label: label.to_string(),
    })
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
