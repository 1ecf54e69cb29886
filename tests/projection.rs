mod common;

use std::fs;

use common::TestWorkspace;
use csv_integrator::{
    io_utils::InputFormat,
    projection::{
        DeleteLine, DesiredColumns, Projection, SubtotalRule, delete_line_set, read_header_row,
        resolve_columns,
    },
};
use proptest::prelude::*;

fn project(
    workspace: &TestWorkspace,
    input: &str,
    desired: &DesiredColumns,
    header_line: Option<usize>,
    output: &str,
) -> String {
    let format = InputFormat::default();
    let source = workspace.write(&format!("{output}.src.csv"), input);
    let header = read_header_row(&source, header_line, &format).expect("header");
    let columns = resolve_columns(Some(desired), &header, 2, &source).expect("columns");
    let lines = delete_line_set(&[], header_line).expect("delete lines");
    let target = workspace.path().join(output);
    Projection::new(columns, lines)
        .apply(&source, &target, &format)
        .expect("projection");
    fs::read_to_string(target).expect("read projection")
}

#[test]
fn header_line_and_ranges_are_dropped() {
    let workspace = TestWorkspace::new();
    let source = workspace.write(
        "export.csv",
        "Report;\nSku;Qty\nA;1\nB;2\nC;3\nD;4\n",
    );
    let format = InputFormat::default();
    let lines = delete_line_set(
        &[DeleteLine::Line(1), DeleteLine::Range("4:5".into())],
        Some(2),
    )
    .unwrap();
    let header = read_header_row(&source, Some(2), &format).unwrap();
    assert_eq!(header, vec!["sku", "qty"]);

    let target = workspace.path().join("projected.csv");
    let projected = Projection::new(vec![1, 0], lines)
        .apply(&source, &target, &format)
        .unwrap();
    assert_eq!(projected.source_lines, vec![3, 6]);
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "\"1\";\"A\"\n\"4\";\"D\"\n"
    );
}

#[test]
fn blank_rows_and_subtotals_disappear() {
    let workspace = TestWorkspace::new();
    let source = workspace.write("sales.csv", "A;1;x\n;;ignored\nTOTAL ;9;\nB;2;y\n");
    let target = workspace.path().join("out.csv");
    let projected = Projection::new(vec![0, 1], Default::default())
        .with_subtotal_rules(vec![SubtotalRule {
            position: 1,
            label: "Total".into(),
        }])
        .apply(&source, &target, &InputFormat::default())
        .unwrap();
    assert_eq!(projected.source_lines, vec![1, 4]);
}

#[test]
fn short_rows_are_padded_with_empty_cells() {
    let workspace = TestWorkspace::new();
    let source = workspace.write("short.csv", "A;1\nB\n");
    let target = workspace.path().join("out.csv");
    Projection::new(vec![0, 1], Default::default())
        .apply(&source, &target, &InputFormat::default())
        .unwrap();
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        "\"A\";\"1\"\n\"B\";\"\"\n"
    );
}

#[test]
fn latin1_input_is_decoded() {
    let workspace = TestWorkspace::new();
    let source = workspace.path().join("latin1.csv");
    fs::write(&source, b"caf\xe9;1\n").unwrap();
    let format = InputFormat {
        encoding: encoding_rs::WINDOWS_1252,
        ..InputFormat::default()
    };
    let target = workspace.path().join("out.csv");
    Projection::new(vec![0, 1], Default::default())
        .apply(&source, &target, &format)
        .unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "\"café\";\"1\"\n");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn names_and_positions_project_identically(
        order in Just(vec!["id", "label", "amount", "note"]).prop_shuffle(),
        pick in (0usize..4, 0usize..4).prop_filter("distinct", |(a, b)| a != b),
    ) {
        let workspace = TestWorkspace::new();
        let header = order.join(";");
        let body = format!("{header}\n1;2;3;4\n5;6;7;8\n");
        let wanted = ["id", "label", "amount", "note"];
        let names = vec![wanted[pick.0].to_string(), wanted[pick.1].to_string()];
        let positions = names
            .iter()
            .map(|name| order.iter().position(|o| o == name).unwrap() + 1)
            .collect::<Vec<_>>();

        let by_name = project(&workspace, &body, &DesiredColumns::Names(names), Some(1), "names.csv");
        let by_position = project(
            &workspace,
            &body,
            &DesiredColumns::Positions(positions),
            Some(1),
            "positions.csv",
        );
        prop_assert_eq!(by_name, by_position);
    }
}
