use crate::{
    schema::{ColumnSpec, ValidatorKind},
    validators::{self, CellError, CellResult},
};

/// Runs one raw cell through the validator declared by `column`.
///
/// The cell is trimmed first; an empty mandatory cell never reaches the
/// validator.
pub fn validate_cell(raw: &str, column: &ColumnSpec) -> CellResult {
    let value = raw.trim();
    if value.is_empty() && column.mandatory {
        return Err(CellError::new(format!(
            "a value is required for column {}, the field is empty",
            column.label()
        )));
    }
    let constraint = column.constraint.as_ref();
    let label = column.label();
    match column.validator {
        ValidatorKind::String => validators::validate_string(value, constraint, label),
        ValidatorKind::Text => validators::validate_text(value, constraint, label),
        ValidatorKind::Integer | ValidatorKind::Float => {
            validators::validate_numeric(value, constraint, label)
        }
        ValidatorKind::Date => validators::validate_date(value, constraint, label),
        ValidatorKind::Boolean => validators::validate_bool(value, constraint, label),
    }
}
