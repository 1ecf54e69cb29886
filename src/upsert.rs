//! Prepared upsert synthesis and batched execution.
//!
//! A [`PreparedUpsertPlan`] renders the two-phase protocol used against
//! PostgreSQL:
//!
//! ```text
//! PREPARE stmt (integer, text) AS INSERT INTO "t" ("a", "b") VALUES ($1, $2)
//!     [ON CONFLICT DO NOTHING | ON CONFLICT ("a") DO UPDATE SET "b" = excluded."b"];
//! EXECUTE stmt (...);   -- once per row, in batches
//! DEALLOCATE stmt;
//! ```
//!
//! Execution is autocommit: every batch stands on its own, so a failure
//! partway through leaves earlier batches written.

use anyhow::{Result, bail, ensure};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    data::{Value, quote_identifier},
    schema::TableSchema,
};

pub const STATEMENT_NAME: &str = "stmt";
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    NoUpsert,
    DoNothing,
    DoUpdate(Vec<String>),
}

impl ConflictPolicy {
    /// Maps the three-way request: no upsert, upsert without unique columns,
    /// or upsert keyed on the given unique columns.
    pub fn from_request(upsert: bool, unique_columns: Option<Vec<String>>) -> Self {
        match (upsert, unique_columns) {
            (false, _) => ConflictPolicy::NoUpsert,
            (true, Some(columns)) if !columns.is_empty() => ConflictPolicy::DoUpdate(columns),
            (true, _) => ConflictPolicy::DoNothing,
        }
    }
}

/// Session against a SQL store that understands the prepared statement
/// protocol. Each call runs in its own autocommit context.
pub trait SqlSession {
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Runs `EXECUTE <statement>` once per row.
    fn execute_prepared_batch(&mut self, statement: &str, rows: &[Vec<Value>]) -> Result<()>;
}

/// One execution of `statement` with the row's values inlined as literals.
pub fn render_execute(statement: &str, row: &[Value]) -> String {
    let literals = row.iter().map(Value::to_sql_literal).join(", ");
    format!("EXECUTE {statement} ({literals});")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedUpsertPlan {
    table: String,
    columns: Vec<String>,
    sql_types: Vec<String>,
    policy: ConflictPolicy,
    statement: String,
}

impl PreparedUpsertPlan {
    pub fn new(
        table: impl Into<String>,
        columns: Vec<String>,
        sql_types: Vec<String>,
        policy: ConflictPolicy,
    ) -> Result<Self> {
        let table = table.into();
        ensure!(!columns.is_empty(), "Cannot prepare an insert without columns");
        ensure!(
            columns.len() == sql_types.len(),
            "{} columns but {} SQL types for table '{table}'",
            columns.len(),
            sql_types.len()
        );
        if let ConflictPolicy::DoUpdate(keys) = &policy {
            for key in keys {
                if !columns.contains(key) {
                    bail!("Unique column '{key}' is not part of the insert into '{table}'");
                }
            }
        }
        Ok(Self {
            table,
            columns,
            sql_types,
            policy,
            statement: STATEMENT_NAME.to_string(),
        })
    }

    pub fn from_schema(schema: &TableSchema, policy: ConflictPolicy) -> Result<Self> {
        Self::new(
            schema.table.clone(),
            schema.column_names(),
            schema.columns.iter().map(|c| c.sql_type.clone()).collect(),
            policy,
        )
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    pub fn statement_name(&self) -> &str {
        &self.statement
    }

    pub fn define_sql(&self) -> String {
        let types = self.sql_types.join(", ");
        let columns = self.columns.iter().map(|c| quote_identifier(c)).join(", ");
        let params = (1..=self.columns.len()).map(|i| format!("${i}")).join(", ");
        format!(
            "PREPARE {} ({types}) AS INSERT INTO {} ({columns}) VALUES ({params}){};",
            self.statement,
            quote_identifier(&self.table),
            self.conflict_clause()
        )
    }

    pub fn conflict_clause(&self) -> String {
        match &self.policy {
            ConflictPolicy::NoUpsert => String::new(),
            ConflictPolicy::DoNothing => " ON CONFLICT DO NOTHING".to_string(),
            ConflictPolicy::DoUpdate(keys) => {
                let target = keys.iter().map(|k| quote_identifier(k)).join(", ");
                let updates = self
                    .columns
                    .iter()
                    .filter(|column| !keys.contains(column))
                    .map(|column| {
                        let quoted = quote_identifier(column);
                        format!("{quoted} = excluded.{quoted}")
                    })
                    .join(", ");
                if updates.is_empty() {
                    format!(" ON CONFLICT ({target}) DO NOTHING")
                } else {
                    format!(" ON CONFLICT ({target}) DO UPDATE SET {updates}")
                }
            }
        }
    }

    /// Parameterized form of one execution, as a driver would send it.
    pub fn execute_sql(&self) -> String {
        let params = (1..=self.columns.len()).map(|_| "%s").join(", ");
        format!("EXECUTE {} ({params});", self.statement)
    }

    pub fn deallocate_sql(&self) -> String {
        format!("DEALLOCATE {};", self.statement)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub rows: usize,
    pub batches: usize,
}

/// Defines the statement, executes `rows` in batches of `batch_size`, then
/// deallocates. The statement is deallocated on failure as well; the original
/// error is returned.
pub fn execute_prepared_upsert<S, I>(
    session: &mut S,
    plan: &PreparedUpsertPlan,
    rows: I,
    batch_size: usize,
) -> Result<UpsertSummary>
where
    S: SqlSession + ?Sized,
    I: IntoIterator<Item = Result<Vec<Value>>>,
{
    let batch_size = batch_size.max(1);
    session.execute(&plan.define_sql())?;
    let outcome = run_batches(session, plan, rows, batch_size);
    match outcome {
        Ok(summary) => {
            session.execute(&plan.deallocate_sql())?;
            info!(
                "Wrote {} row(s) to '{}' in {} batch(es)",
                summary.rows, plan.table, summary.batches
            );
            Ok(summary)
        }
        Err(err) => {
            if let Err(release_err) = session.execute(&plan.deallocate_sql()) {
                warn!("Could not deallocate {}: {release_err:#}", plan.statement);
            }
            Err(err)
        }
    }
}

fn run_batches<S, I>(
    session: &mut S,
    plan: &PreparedUpsertPlan,
    rows: I,
    batch_size: usize,
) -> Result<UpsertSummary>
where
    S: SqlSession + ?Sized,
    I: IntoIterator<Item = Result<Vec<Value>>>,
{
    let width = plan.columns.len();
    let mut summary = UpsertSummary::default();
    let mut batch: Vec<Vec<Value>> = Vec::with_capacity(batch_size);
    for row in rows {
        let row = row?;
        ensure!(
            row.len() == width,
            "Row {} has {} values, expected {width}",
            summary.rows + batch.len() + 1,
            row.len()
        );
        batch.push(row);
        if batch.len() == batch_size {
            flush_batch(session, plan, &mut batch, &mut summary)?;
        }
    }
    if !batch.is_empty() {
        flush_batch(session, plan, &mut batch, &mut summary)?;
    }
    Ok(summary)
}

fn flush_batch<S>(
    session: &mut S,
    plan: &PreparedUpsertPlan,
    batch: &mut Vec<Vec<Value>>,
    summary: &mut UpsertSummary,
) -> Result<()>
where
    S: SqlSession + ?Sized,
{
    session.execute_prepared_batch(&plan.statement, batch)?;
    summary.rows += batch.len();
    summary.batches += 1;
    debug!("Batch {} of {} row(s) executed", summary.batches, batch.len());
    batch.clear();
    Ok(())
}
