use chrono::NaiveDate;
use csv_integrator::{
    data::Value,
    dispatch::validate_cell,
    schema::{ColumnSpec, Constraint, ValidatorKind},
    validators::{CellResult, clean_numeric, validate_bool, validate_date, validate_numeric},
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn decimal_mode() -> Constraint {
    Constraint::Number(1)
}

#[test]
fn accounting_and_locale_amounts() {
    let cases = [
        ("(1 234,50)", Decimal::new(-12345, 1)),
        ("1.234,56", Decimal::new(123456, 2)),
        ("€ 99,90", Decimal::new(999, 1)),
        ("-7,25", Decimal::new(-725, 2)),
    ];
    for (raw, expected) in cases {
        assert_eq!(
            validate_numeric(raw, Some(&decimal_mode()), "amount"),
            Ok(Value::Decimal(expected)),
            "{raw}"
        );
    }
}

#[test]
fn multiple_points_and_parentheses_are_pinned() {
    assert_eq!(clean_numeric("1.2.3"), "12.3");
    assert_eq!(clean_numeric("((4))"), "-4");
    assert_eq!(clean_numeric("-(4)"), "--4");
    assert!(validate_numeric("-(4)", Some(&decimal_mode()), "n").is_err());
}

#[test]
fn dates_follow_declared_order_and_separator() {
    let dmy = Constraint::date_format(&["/", "D", "M", "Y"]);
    assert_eq!(
        validate_date("31/12/23 08:15", Some(&dmy), "sold_on"),
        Ok(Value::Date(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()))
    );
    let err = validate_date("2023-12-31", Some(&dmy), "sold_on").unwrap_err();
    assert!(err.message.contains("expected date separator is /"));
    assert!(validate_date("31/02/2023", Some(&dmy), "sold_on").is_err());

    let adp = Constraint::date_format(&["date_adp", "D", "M", "Y"]);
    assert_eq!(
        validate_date("05032024", Some(&adp), "sold_on"),
        Ok(Value::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()))
    );

    let bad = Constraint::date_format(&["%", "D", "M", "Y"]);
    assert!(validate_date("05%03%2024", Some(&bad), "sold_on").is_err());
}

#[test]
fn only_two_digit_years_from_ten_are_widened() {
    let dmy = Constraint::date_format(&["/", "D", "M", "Y"]);
    let date = |y: i32, m: u32, d: u32| -> CellResult {
        Ok(Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap()))
    };
    assert_eq!(validate_date("09/03/10", Some(&dmy), "sold_on"), date(2010, 3, 9));
    assert_eq!(validate_date("09/03/99", Some(&dmy), "sold_on"), date(2099, 3, 9));
    assert_eq!(validate_date("09/03/05", Some(&dmy), "sold_on"), date(5, 3, 9));
    assert_eq!(validate_date("09/03/2005", Some(&dmy), "sold_on"), date(2005, 3, 9));
}

#[test]
fn boolean_accepts_anything_but_f() {
    assert_eq!(validate_bool("f", None, "b"), Ok(Value::Boolean(false)));
    assert_eq!(validate_bool("no", None, "b"), Ok(Value::Boolean(true)));
    assert_eq!(validate_bool("", None, "b"), Ok(Value::Null));
}

#[test]
fn dispatcher_trims_and_enforces_mandatory() {
    let sku = ColumnSpec::new(
        "sku",
        "character varying",
        Some(Constraint::Number(4)),
        true,
        ValidatorKind::String,
    );
    assert_eq!(
        validate_cell("  \"AB\"CDEF ", &sku),
        Ok(Value::String("ABCD".into()))
    );
    let err = validate_cell("   ", &sku).unwrap_err();
    assert_eq!(
        err.message,
        "a value is required for column sku, the field is empty"
    );
}

proptest! {
    #[test]
    fn parenthesis_notation_is_additive_inverse(units in 1u32..10_000_000, cents in 0u32..100) {
        let plain = format!("{units}.{cents:02}");
        let wrapped = format!("({plain})");
        let positive = validate_numeric(&plain, Some(&decimal_mode()), "n").unwrap();
        let negative = validate_numeric(&wrapped, Some(&decimal_mode()), "n").unwrap();
        match (positive, negative) {
            (Value::Decimal(p), Value::Decimal(n)) => prop_assert_eq!(p, -n),
            other => prop_assert!(false, "unexpected values {:?}", other),
        }
    }

    #[test]
    fn integer_mode_truncates_toward_zero(value in -1_000_000i64..1_000_000, frac in 1u32..100) {
        prop_assume!(value != 0);
        let raw = format!("{value}.{frac:02}");
        prop_assert_eq!(
            validate_numeric(&raw, Some(&Constraint::Number(0)), "n"),
            Ok(Value::Integer(value))
        );
    }
}
