#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_integrator::{
    pipeline::ValidationOptions,
    schema::{ColumnSpec, Constraint, TableSchema, ValidatorKind},
};
use tempfile::{TempDir, tempdir};

pub const STOCK_CATALOG: &str = r#"
models:
  stock:
    table: inventory_stock
    columns:
      - { name: sku, sql_type: character varying, max_length: 8, nullable: false }
      - { name: qty, sql_type: integer }
      - { name: price, sql_type: numeric }
      - { name: received, sql_type: date }
      - { name: active, sql_type: boolean }
"#;

/// Scratch directory with an `in/` drop folder and an `errors/` folder.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let workspace = Self {
            temp_dir: tempdir().expect("temp dir"),
        };
        fs::create_dir_all(workspace.input_dir()).expect("create input dir");
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn input_dir(&self) -> PathBuf {
        self.path().join("in")
    }

    pub fn error_dir(&self) -> PathBuf {
        self.path().join("errors")
    }

    /// Writes `contents` under the workspace root and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        write_file(&self.path().join(name), contents.as_bytes())
    }

    /// Writes `contents` into the drop folder and returns the path.
    pub fn drop_file(&self, name: &str, contents: &str) -> PathBuf {
        self.drop_bytes(name, contents.as_bytes())
    }

    pub fn drop_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        write_file(&self.input_dir().join(name), contents)
    }

    /// Validation options with the error folder set and no settle delay.
    pub fn options(&self) -> ValidationOptions {
        let mut options = ValidationOptions::new(self.error_dir());
        options.settle_delay = std::time::Duration::ZERO;
        options
    }

    pub fn input_files(&self) -> Vec<String> {
        list_names(&self.input_dir())
    }

    pub fn error_files(&self) -> Vec<String> {
        list_names(&self.error_dir())
    }
}

fn write_file(path: &Path, contents: &[u8]) -> PathBuf {
    let mut file = File::create(path).expect("create temp file");
    file.write_all(contents).expect("write temp file contents");
    path.to_path_buf()
}

fn list_names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// `(a: int mandatory, b: text(10))`
pub fn int_text_schema() -> TableSchema {
    TableSchema::new(
        "t",
        vec![
            ColumnSpec::new(
                "a",
                "integer",
                Some(Constraint::Number(0)),
                true,
                ValidatorKind::Integer,
            ),
            ColumnSpec::new(
                "b",
                "character varying",
                Some(Constraint::Number(10)),
                false,
                ValidatorKind::String,
            ),
        ],
    )
    .expect("valid schema")
}
