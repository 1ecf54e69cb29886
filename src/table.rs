//! Plain-text rendering of a resolved model for the `columns` command.

use std::fmt::Write as _;

use crate::schema::TableSchema;

const HEADERS: [&str; 6] = ["#", "column", "sql type", "validator", "constraint", "mandatory"];

pub fn render_columns(schema: &TableSchema) -> String {
    let rows = schema
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            vec![
                (idx + 1).to_string(),
                column.name.clone(),
                column.sql_type.clone(),
                column.validator.to_string(),
                column
                    .constraint
                    .as_ref()
                    .map(|c| c.describe())
                    .unwrap_or_else(|| "-".to_string()),
                if column.mandatory { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = HEADERS.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell_width(cell));
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "table: {}", schema.table);
    let headers = HEADERS.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&headers, &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in &rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    let mut line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let cell = cell.replace(['\n', '\r', '\t'], " ");
            let padding = width.saturating_sub(cell_width(&cell));
            format!("{cell}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.truncate(line.trim_end().len());
    line
}

fn cell_width(value: &str) -> usize {
    value.chars().count()
}
