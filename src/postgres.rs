//! PostgreSQL sessions over `sqlx`.
//!
//! Statements go through the simple query protocol, so the SQL-level
//! `PREPARE` / `EXECUTE` / `DEALLOCATE` sequence lives on the server session.
//! A batch is sent as one multi-statement round trip and commits on its own.

use anyhow::{Context, Result};
use itertools::Itertools;
use log::debug;
use sqlx::{Connection, PgConnection, postgres::PgConnectOptions};
use tokio::runtime::{Builder, Runtime};

use crate::{
    data::Value,
    integration::ConnectionFactory,
    upsert::{SqlSession, render_execute},
};

/// Connection factory for a `postgres://` URL.
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    options: PgConnectOptions,
}

impl PostgresConnection {
    pub fn new(url: &str) -> Result<Self> {
        let options = url
            .parse::<PgConnectOptions>()
            .context("Parsing database URL")?;
        Ok(Self { options })
    }
}

impl ConnectionFactory for PostgresConnection {
    type Session = PostgresSession;

    fn connect(&self) -> Result<PostgresSession> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Starting database runtime")?;
        let connection = runtime
            .block_on(PgConnection::connect_with(&self.options))
            .context("Connecting to PostgreSQL")?;
        Ok(PostgresSession {
            runtime,
            connection,
        })
    }
}

pub struct PostgresSession {
    runtime: Runtime,
    connection: PgConnection,
}

impl PostgresSession {
    fn run(&mut self, sql: &str) -> Result<()> {
        let result = self
            .runtime
            .block_on(sqlx::raw_sql(sql).execute(&mut self.connection))?;
        debug!("{} row(s) affected", result.rows_affected());
        Ok(())
    }
}

impl SqlSession for PostgresSession {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.run(sql)
    }

    fn execute_prepared_batch(&mut self, statement: &str, rows: &[Vec<Value>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let batch = batch_sql(statement, rows);
        self.run(&batch)
            .with_context(|| format!("Executing {} row(s) of {statement}", rows.len()))
    }
}

fn batch_sql(statement: &str, rows: &[Vec<Value>]) -> String {
    rows.iter()
        .map(|row| render_execute(statement, row))
        .join("\n")
}
