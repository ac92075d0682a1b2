//! Row/column edits, lazy AST rewriting, and sheet CRUD.

use recalc_common::{CellValue, ErrorKind};

use super::common::{build, num, value};
use crate::engine::{Engine, EngineError, InverseCommand};

#[test]
fn inserted_row_shifts_formulas_and_references() {
    let mut engine = build(&[&["1", "2", "=A1+B1"]]);
    assert_eq!(num(&mut engine, (0, 2)), 3.0);

    engine.add_rows("Sheet1", 0, 1).unwrap();

    // the formula moved to C2 and its references follow lazily
    assert_eq!(
        engine.get_formula("Sheet1", 1, 2).unwrap().as_deref(),
        Some("=A2+B2")
    );
    assert_eq!(num(&mut engine, (1, 2)), 3.0);
    assert_eq!(value(&mut engine, (0, 2)), CellValue::Empty);
}

#[test]
fn rewrite_happens_without_reparsing_on_every_edit() {
    let mut engine = build(&[&["1", "2", "=A1+B1"]]);
    engine.add_rows("Sheet1", 0, 1).unwrap();
    engine.add_rows("Sheet1", 0, 1).unwrap();
    engine.add_columns("Sheet1", 0, 1).unwrap();
    // three transforms applied in order on materialization
    assert_eq!(
        engine.get_formula("Sheet1", 2, 3).unwrap().as_deref(),
        Some("=B3+C3")
    );
    assert_eq!(num(&mut engine, (2, 3)), 3.0);
}

#[test]
fn removing_a_referenced_row_dangles_to_ref_error() {
    let mut engine = build(&[&["1"], &["2"], &["=A1+A2"]]);
    assert_eq!(num(&mut engine, (2, 0)), 3.0);

    engine.remove_rows("Sheet1", 1, 1).unwrap();

    assert_eq!(
        engine.get_formula("Sheet1", 1, 0).unwrap().as_deref(),
        Some("=A1+#REF!")
    );
    match value(&mut engine, (1, 0)) {
        CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::Ref),
        other => panic!("expected #REF!, got {other:?}"),
    }
}

#[test]
fn removing_rows_shifts_survivors_up() {
    let mut engine = build(&[&["10"], &["20"], &["30"], &["=A3"]]);
    assert_eq!(num(&mut engine, (3, 0)), 30.0);
    engine.remove_rows("Sheet1", 0, 2).unwrap();
    assert_eq!(value(&mut engine, (0, 0)), CellValue::Number(30.0));
    assert_eq!(
        engine.get_formula("Sheet1", 1, 0).unwrap().as_deref(),
        Some("=A1")
    );
    assert_eq!(num(&mut engine, (1, 0)), 30.0);
}

#[test]
fn column_edits_mirror_row_edits() {
    let mut engine = build(&[&["1", "2", "=A1*B1"]]);
    assert_eq!(num(&mut engine, (0, 2)), 2.0);
    engine.add_columns("Sheet1", 1, 2).unwrap();
    assert_eq!(
        engine.get_formula("Sheet1", 0, 4).unwrap().as_deref(),
        Some("=A1*D1")
    );
    engine.remove_columns("Sheet1", 3, 1).unwrap();
    match value(&mut engine, (0, 3)) {
        CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::Ref),
        other => panic!("expected #REF!, got {other:?}"),
    }
}

#[test]
fn ranges_stretch_over_an_inserted_row() {
    let mut engine = build(&[&["1"], &["2"], &["=SUM(A1:A2)"]]);
    assert_eq!(num(&mut engine, (2, 0)), 3.0);

    engine.add_rows("Sheet1", 1, 1).unwrap();
    assert_eq!(
        engine.get_formula("Sheet1", 3, 0).unwrap().as_deref(),
        Some("=SUM(A1:A3)")
    );
    // the inserted row is empty; filling it feeds the stretched range
    engine.set_cell_contents("Sheet1", 1, 0, "5").unwrap();
    assert_eq!(num(&mut engine, (3, 0)), 8.0);
}

#[test]
fn ranges_shrink_at_a_removed_row() {
    let mut engine = build(&[&["1"], &["2"], &["4"], &["=SUM(A1:A3)"]]);
    assert_eq!(num(&mut engine, (3, 0)), 7.0);
    engine.remove_rows("Sheet1", 1, 1).unwrap();
    assert_eq!(
        engine.get_formula("Sheet1", 2, 0).unwrap().as_deref(),
        Some("=SUM(A1:A2)")
    );
    assert_eq!(num(&mut engine, (2, 0)), 5.0);
}

#[test]
fn insertion_beyond_the_row_limit_is_rejected() {
    let config = crate::config::Config {
        max_rows: 5,
        ..crate::config::Config::default()
    };
    let mut engine = super::common::build_with(&[&["1"], &["2"], &["3"], &["4"], &["5"]], config);
    let err = engine.add_rows("Sheet1", 0, 3).unwrap_err();
    assert!(matches!(err, EngineError::SheetSizeLimit { .. }));
    // nothing moved
    assert_eq!(num(&mut engine, (4, 0)), 5.0);
}

#[test]
fn sheet_crud_round_trips() {
    let mut engine = Engine::build_empty(crate::config::Config::default()).unwrap();
    engine.add_sheet("Data").unwrap();
    assert!(matches!(
        engine.add_sheet("data"),
        Err(EngineError::DuplicateSheet(_))
    ));
    engine.rename_sheet("Data", "Numbers").unwrap();
    engine.set_cell_contents("Numbers", 0, 0, "7").unwrap();
    assert_eq!(
        engine.get_cell_value("Numbers", 0, 0).unwrap(),
        CellValue::Number(7.0)
    );
    engine.remove_sheet("Numbers").unwrap();
    assert!(matches!(
        engine.get_cell_value("Numbers", 0, 0),
        Err(EngineError::InvalidSheet(_))
    ));
}

#[test]
fn cross_sheet_reads_survive_renames_but_not_removal() {
    let mut engine = Engine::build_from_sheets(
        vec![
            ("One".to_string(), super::common::sheet(&[&["5"]])),
            ("Two".to_string(), super::common::sheet(&[&["=One!A1*2"]])),
        ],
        crate::config::Config::default(),
    )
    .unwrap();
    assert_eq!(
        engine.get_cell_value("Two", 0, 0).unwrap(),
        CellValue::Number(10.0)
    );
    engine.rename_sheet("One", "Uno").unwrap();
    assert_eq!(
        engine.get_formula("Two", 0, 0).unwrap().as_deref(),
        Some("=Uno!A1*2")
    );
    assert_eq!(
        engine.get_cell_value("Two", 0, 0).unwrap(),
        CellValue::Number(10.0)
    );
    engine.remove_sheet("Uno").unwrap();
    match engine.get_cell_value("Two", 0, 0).unwrap() {
        CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::Ref),
        other => panic!("expected #REF!, got {other:?}"),
    }
}

#[test]
fn operations_record_their_inverse() {
    let mut engine = build(&[&["1", "=A1"]]);
    engine.set_cell_contents("Sheet1", 0, 0, "2").unwrap();
    engine.add_rows("Sheet1", 0, 2).unwrap();
    engine.remove_columns("Sheet1", 5, 1).unwrap();
    let log = engine.undo_log();
    assert_eq!(
        log[0],
        InverseCommand::SetCellContents {
            sheet: "Sheet1".to_string(),
            row: 0,
            col: 0,
            previous: "1".to_string(),
        }
    );
    assert_eq!(
        log[1],
        InverseCommand::RemoveRows {
            sheet: "Sheet1".to_string(),
            at: 0,
            count: 2,
        }
    );
    assert_eq!(
        log[2],
        InverseCommand::AddColumns {
            sheet: "Sheet1".to_string(),
            at: 5,
            count: 1,
        }
    );
}

#[test]
fn failed_operations_leave_the_engine_untouched() {
    let mut engine = build(&[&["1", "=A1+1"]]);
    assert_eq!(num(&mut engine, (0, 1)), 2.0);
    let undo_len = engine.undo_log().len();
    assert!(engine.set_cell_contents("Ghost", 0, 0, "9").is_err());
    assert_eq!(engine.undo_log().len(), undo_len);
    assert_eq!(num(&mut engine, (0, 1)), 2.0);
}
