use std::io::Write;

use anyhow::{Context, Result};

use crate::{
    data::Value,
    upsert::{SqlSession, render_execute},
};

/// Session that renders the prepared statement protocol as a SQL script,
/// one statement per line, with row values inlined as literals.
pub struct ScriptSession<W: Write> {
    out: W,
    statements: usize,
}

impl<W: Write> ScriptSession<W> {
    pub fn new(out: W) -> Self {
        Self { out, statements: 0 }
    }

    pub fn statements(&self) -> usize {
        self.statements
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush().context("Flushing SQL script")?;
        Ok(self.out)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}").context("Writing SQL script")?;
        self.statements += 1;
        Ok(())
    }
}

impl<W: Write> SqlSession for ScriptSession<W> {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.write_line(sql)
    }

    fn execute_prepared_batch(&mut self, statement: &str, rows: &[Vec<Value>]) -> Result<()> {
        for row in rows {
            self.write_line(&render_execute(statement, row))?;
        }
        self.out.flush().context("Flushing SQL script")
    }
}
