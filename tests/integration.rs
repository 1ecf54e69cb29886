mod common;

use std::{cell::RefCell, fs, rc::Rc};

use anyhow::{Result, bail};
use common::{STOCK_CATALOG, TestWorkspace};
use csv_integrator::{
    data::Value,
    integration::{ConnectionFactory, IntegrationError, IntegrationJob, Integrator, ScriptConnection},
    io_utils::DecodePolicy,
    provider::{CatalogSchemaProvider, FileQuery, GlobFileLocator, Notifier},
    upsert::{ConflictPolicy, SqlSession},
};

#[derive(Default)]
struct Recorded {
    statements: Vec<String>,
    rows: Vec<Vec<Value>>,
}

struct RecordingSession(Rc<RefCell<Recorded>>);

impl SqlSession for RecordingSession {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.0.borrow_mut().statements.push(sql.to_string());
        Ok(())
    }

    fn execute_prepared_batch(&mut self, _statement: &str, rows: &[Vec<Value>]) -> Result<()> {
        self.0.borrow_mut().rows.extend_from_slice(rows);
        Ok(())
    }
}

struct Database {
    recorded: Rc<RefCell<Recorded>>,
    reachable: bool,
    attempts: RefCell<usize>,
}

impl Database {
    fn new(reachable: bool) -> Self {
        Self {
            recorded: Rc::default(),
            reachable,
            attempts: RefCell::new(0),
        }
    }
}

impl ConnectionFactory for Database {
    type Session = RecordingSession;

    fn connect(&self) -> Result<RecordingSession> {
        *self.attempts.borrow_mut() += 1;
        if !self.reachable {
            bail!("server closed the connection unexpectedly");
        }
        Ok(RecordingSession(Rc::clone(&self.recorded)))
    }
}

#[derive(Default)]
struct Outbox(RefCell<Vec<(String, Option<String>)>>);

impl Notifier for Outbox {
    fn send(&self, message: &str, subject: Option<&str>) {
        self.0
            .borrow_mut()
            .push((message.to_string(), subject.map(str::to_string)));
    }
}

fn job(workspace: &TestWorkspace) -> IntegrationJob {
    let query = FileQuery {
        directory: workspace.input_dir(),
        extension: Some("csv".into()),
        first_only: true,
        ..FileQuery::default()
    };
    let mut job = IntegrationJob::new(query, "stock", workspace.options());
    job.policy = ConflictPolicy::DoUpdate(vec!["sku".into()]);
    job
}

fn catalog() -> CatalogSchemaProvider {
    CatalogSchemaProvider::from_yaml(STOCK_CATALOG).unwrap()
}

#[test]
fn first_matching_file_is_validated_and_written() {
    let workspace = TestWorkspace::new();
    workspace.drop_file("stock_02.csv", "B-2;1;1,00;2024-02-01;t\n");
    workspace.drop_file("stock_01.csv", "A-1;3;9,99;2024-01-31;f\nA-2;;;;\n");
    let database = Database::new(true);
    let outbox = Outbox::default();
    let catalog = catalog();

    let outcome = Integrator::new(&database, &catalog, &GlobFileLocator, &outbox)
        .run(&job(&workspace))
        .unwrap();
    assert!(outcome.source.ends_with("stock_01.csv"));
    assert_eq!(outcome.table, "inventory_stock");
    assert_eq!(outcome.summary.rows, 2);

    let recorded = database.recorded.borrow();
    assert!(recorded.statements[0].contains("ON CONFLICT (\"sku\") DO UPDATE SET"));
    assert_eq!(recorded.statements[1], "DEALLOCATE stmt;");
    assert_eq!(recorded.rows[0][0], Value::String("A-1".into()));
    assert_eq!(recorded.rows[0][4], Value::Boolean(false));
    assert_eq!(
        recorded.rows[1],
        vec![
            Value::String("A-2".into()),
            Value::Integer(0),
            Value::Integer(0),
            Value::Null,
            Value::Null,
        ]
    );
    assert!(outbox.0.borrow().is_empty());
    assert_eq!(workspace.input_files(), vec!["stock_02.csv"]);
}

#[test]
fn rejected_file_notifies_and_writes_nothing() {
    let workspace = TestWorkspace::new();
    workspace.drop_file("stock.csv", ";1;1;2024-01-01;t\n");
    let database = Database::new(true);
    let outbox = Outbox::default();
    let catalog = catalog();

    let err = Integrator::new(&database, &catalog, &GlobFileLocator, &outbox)
        .run(&job(&workspace))
        .unwrap_err();
    let IntegrationError::Rejected(report) = err else {
        panic!("expected rejection");
    };
    assert_eq!(report.groups[0].errors[0].column, "sku");
    assert!(database.recorded.borrow().statements.is_empty());

    let sent = outbox.0.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.as_deref(), Some("Rejected file"));
    assert!(sent[0].0.contains("* line 1:"));
    assert!(workspace.input_files().is_empty());
    assert_eq!(workspace.error_files(), vec!["ERRORS_stock.csv"]);
}

#[test]
fn missing_input_is_reported() {
    let workspace = TestWorkspace::new();
    let database = Database::new(true);
    let outbox = Outbox::default();
    let catalog = catalog();
    let err = Integrator::new(&database, &catalog, &GlobFileLocator, &outbox)
        .run(&job(&workspace))
        .unwrap_err();
    assert!(matches!(err, IntegrationError::NoInputFile { .. }));
    assert_eq!(outbox.0.borrow()[0].1.as_deref(), Some("Missing input file"));
}

#[test]
fn unreachable_database_leaves_input_in_place() {
    let workspace = TestWorkspace::new();
    workspace.drop_file("stock.csv", "A-1;3;9,99;2024-01-31;f\n");
    let database = Database::new(false);
    let outbox = Outbox::default();
    let catalog = catalog();
    let mut job = job(&workspace);
    job.connect_attempts = 3;

    let err = Integrator::new(&database, &catalog, &GlobFileLocator, &outbox)
        .run(&job)
        .unwrap_err();
    assert!(matches!(err, IntegrationError::Connection { attempts: 3, .. }));
    assert_eq!(*database.attempts.borrow(), 3);
    assert_eq!(workspace.input_files(), vec!["stock.csv"]);
}

#[test]
fn unknown_model_is_a_configuration_error() {
    let workspace = TestWorkspace::new();
    workspace.drop_file("stock.csv", "A-1;3;9,99;2024-01-31;f\n");
    let database = Database::new(true);
    let outbox = Outbox::default();
    let catalog = catalog();
    let mut job = job(&workspace);
    job.model = "orders".into();

    let err = Integrator::new(&database, &catalog, &GlobFileLocator, &outbox)
        .run(&job)
        .unwrap_err();
    assert!(matches!(err, IntegrationError::Configuration { .. }));
    assert!(err.to_string().contains("orders"));
}

#[test]
fn script_connection_renders_a_replayable_script() {
    let workspace = TestWorkspace::new();
    workspace.drop_file("stock.csv", "O'Neil;2;0,5;2024-03-01;t\n");
    let script = workspace.path().join("load.sql");
    let connection = ScriptConnection::new(&script);
    let outbox = Outbox::default();
    let catalog = catalog();

    Integrator::new(&connection, &catalog, &GlobFileLocator, &outbox)
        .run(&job(&workspace))
        .unwrap();
    let text = fs::read_to_string(&script).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with(
        "PREPARE stmt (character varying, integer, numeric, date, boolean) AS INSERT INTO \"inventory_stock\""
    ));
    assert_eq!(
        lines[1],
        "EXECUTE stmt ('O''Neil', 2, 0.5, '2024-03-01', TRUE);"
    );
    assert_eq!(lines[2], "DEALLOCATE stmt;");
}

#[test]
fn undecodable_input_is_an_input_error() {
    let workspace = TestWorkspace::new();
    workspace.drop_bytes("stock.csv", b"A-1;3;9,99;2024-01-31;\xff\n");
    let database = Database::new(true);
    let outbox = Outbox::default();
    let catalog = catalog();
    let mut job = job(&workspace);
    job.validation.format.decode_policy = DecodePolicy::Strict;

    let err = Integrator::new(&database, &catalog, &GlobFileLocator, &outbox)
        .run(&job)
        .unwrap_err();
    let IntegrationError::Input { file, .. } = &err else {
        panic!("expected an input error, got {err:?}");
    };
    assert!(file.ends_with("stock.csv"));
    assert!(database.recorded.borrow().statements.is_empty());
    assert_eq!(outbox.0.borrow()[0].1.as_deref(), Some("Input error"));
}
