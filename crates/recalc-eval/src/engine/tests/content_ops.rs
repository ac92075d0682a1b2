//! Cell content classification at the engine surface, lookup strategies,
//! and serialization.

use recalc_common::{CellValue, ErrorKind};

use super::common::{build, build_with, num, sheet, value};
use crate::config::Config;
use crate::engine::Engine;
use crate::export::ExportedValue;

#[test]
fn raw_content_classifies_into_cell_kinds() {
    let mut engine = build(&[&["1.5", "yes", "TRUE", "#N/A", "'=not a formula", "=1+1"]]);
    assert_eq!(value(&mut engine, (0, 0)), CellValue::Number(1.5));
    assert_eq!(value(&mut engine, (0, 1)), CellValue::Text("yes".into()));
    assert_eq!(value(&mut engine, (0, 2)), CellValue::Boolean(true));
    match value(&mut engine, (0, 3)) {
        CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::Na),
        other => panic!("expected #N/A, got {other:?}"),
    }
    assert_eq!(
        value(&mut engine, (0, 4)),
        CellValue::Text("=not a formula".into())
    );
    assert_eq!(value(&mut engine, (0, 5)), CellValue::Number(2.0));
}

#[test]
fn malformed_formula_becomes_an_error_value() {
    let mut engine = build(&[&["=1+", "=A1"]]);
    match value(&mut engine, (0, 0)) {
        CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::Error),
        other => panic!("expected #ERROR!, got {other:?}"),
    }
    // and it propagates like any other value error
    assert!(value(&mut engine, (0, 1)).is_error());
}

#[test]
fn clearing_a_referenced_cell_leaves_a_placeholder() {
    let mut engine = build(&[&["9", "=A1"]]);
    assert_eq!(num(&mut engine, (0, 1)), 9.0);
    engine.set_cell_contents("Sheet1", 0, 0, "").unwrap();
    assert_eq!(value(&mut engine, (0, 0)), CellValue::Empty);
    assert_eq!(value(&mut engine, (0, 1)), CellValue::Empty);
    // the placeholder still feeds the formula when refilled
    engine.set_cell_contents("Sheet1", 0, 0, "4").unwrap();
    assert_eq!(num(&mut engine, (0, 1)), 4.0);
}

#[test]
fn clearing_an_unreferenced_cell_removes_its_vertex() {
    let mut engine = build(&[&["9"]]);
    let before = engine.graph.vertex_count();
    engine.set_cell_contents("Sheet1", 0, 0, "").unwrap();
    assert_eq!(engine.graph.vertex_count(), before - 1);
}

#[test]
fn match_finds_positions_with_both_search_strategies() {
    let rows: &[&[&str]] = &[
        &["=MATCH(30,B1:B3,0)", "10"],
        &["", "30"],
        &["", "30"],
    ];
    for use_column_index in [false, true] {
        let config = Config {
            use_column_index,
            ..Config::default()
        };
        let mut engine = build_with(rows, config);
        // 30 first appears at B2 -> position 2
        assert_eq!(num(&mut engine, (0, 0)), 2.0);
    }
}

#[test]
fn match_tracks_edits_through_the_index() {
    let config = Config {
        use_column_index: true,
        ..Config::default()
    };
    let mut engine = build_with(&[&["10"], &["20"], &["=MATCH(20,A1:A2,0)"]], config);
    assert_eq!(num(&mut engine, (2, 0)), 2.0);
    engine.set_cell_contents("Sheet1", 0, 0, "20").unwrap();
    assert_eq!(num(&mut engine, (2, 0)), 1.0);
}

#[test]
fn exported_values_flatten_errors_to_codes() {
    let mut engine = build(&[&["=1/0"]]);
    match engine.get_exported_value("Sheet1", 0, 0).unwrap() {
        ExportedValue::Error { code, .. } => assert_eq!(code, "#DIV/0!"),
        other => panic!("expected an exported error, got {other:?}"),
    }
}

#[test]
fn serialized_sheet_reproduces_raw_content() {
    let mut engine = build(&[&["1.5", "text", "=A1+1"], &["'=quoted", "TRUE", ""]]);
    let rows = engine.serialized_sheet("Sheet1").unwrap();
    assert_eq!(rows[0], vec!["1.5", "text", "=A1+1"]);
    // leading apostrophe survives for text that would reclassify
    assert_eq!(rows[1][0], "'=quoted");
    assert_eq!(rows[1][1], "TRUE");
    assert_eq!(rows[1][2], "");
}

#[test]
fn serialization_round_trips_through_a_rebuild() {
    let mut engine = build(&[&["2", "=A1*3", "=SUM(A1:B1)"]]);
    assert_eq!(num(&mut engine, (0, 2)), 8.0);
    let serialized = engine.serialized_sheet("Sheet1").unwrap();
    let mut again =
        Engine::build_from_sheets(vec![("Sheet1".to_string(), serialized)], Config::default())
            .unwrap();
    assert_eq!(num(&mut again, (0, 2)), 8.0);
}

#[test]
fn get_range_values_reads_a_rectangle() {
    let mut engine = build(&[&["1", "2"], &["3", "=A1+A2"]]);
    let grid = engine.get_range_values("Sheet1", (0, 0), (1, 1)).unwrap();
    assert_eq!(
        grid,
        vec![
            vec![CellValue::Number(1.0), CellValue::Number(2.0)],
            vec![CellValue::Number(3.0), CellValue::Number(4.0)],
        ]
    );
}

#[test]
fn text_comparison_respects_case_configuration() {
    let mut engine = build(&[&["abc", "ABC", "=A1=B1"]]);
    assert_eq!(value(&mut engine, (0, 2)), CellValue::Boolean(true));

    let config = Config {
        case_sensitive_comparison: true,
        ..Config::default()
    };
    let mut engine = build_with(&[&["abc", "ABC", "=A1=B1"]], config);
    assert_eq!(value(&mut engine, (0, 2)), CellValue::Boolean(false));
}

#[test]
fn out_of_bounds_writes_are_size_limit_errors() {
    let config = Config {
        max_rows: 10,
        max_columns: 10,
        ..Config::default()
    };
    let mut engine = Engine::build_from_sheets(
        vec![("Sheet1".to_string(), sheet(&[&["1"]]))],
        config,
    )
    .unwrap();
    assert!(matches!(
        engine.set_cell_contents("Sheet1", 10, 0, "x"),
        Err(crate::engine::EngineError::SheetSizeLimit { .. })
    ));
    assert!(engine.set_cell_contents("Sheet1", 9, 9, "x").is_ok());
}
