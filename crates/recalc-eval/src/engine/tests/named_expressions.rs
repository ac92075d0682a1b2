//! Named expression registry behavior at the engine surface.

use recalc_common::{CellValue, ErrorKind};

use super::common::{build, num, value};
use crate::engine::EngineError;

#[test]
fn named_expression_feeds_formulas() {
    let mut engine = build(&[&["=TaxRate*100"]]);
    engine
        .add_named_expression("TaxRate", "=0.2", None)
        .unwrap();
    assert_eq!(num(&mut engine, (0, 0)), 20.0);
}

#[test]
fn unknown_name_reads_as_name_error() {
    let mut engine = build(&[&["=Nothing+1"]]);
    match value(&mut engine, (0, 0)) {
        CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::Name),
        other => panic!("expected #NAME?, got {other:?}"),
    }
}

#[test]
fn defining_a_name_wakes_waiting_formulas() {
    let mut engine = build(&[&["=Rate*2"]]);
    assert!(value(&mut engine, (0, 0)).is_error());
    engine.add_named_expression("Rate", "=21", None).unwrap();
    assert_eq!(num(&mut engine, (0, 0)), 42.0);
}

#[test]
fn removal_returns_formulas_to_name_errors() {
    let mut engine = build(&[&["=Rate*2"]]);
    engine.add_named_expression("Rate", "=21", None).unwrap();
    assert_eq!(num(&mut engine, (0, 0)), 42.0);
    engine.remove_named_expression("Rate", None).unwrap();
    match value(&mut engine, (0, 0)) {
        CellValue::Error(e) => assert_eq!(e.kind, ErrorKind::Name),
        other => panic!("expected #NAME?, got {other:?}"),
    }
}

#[test]
fn sheet_scope_shadows_workbook_scope() {
    let mut engine = build(&[&["=Rate"]]);
    engine.add_named_expression("Rate", "=1", None).unwrap();
    engine
        .add_named_expression("Rate", "=2", Some("Sheet1"))
        .unwrap();
    assert_eq!(num(&mut engine, (0, 0)), 2.0);
}

#[test]
fn named_expressions_recompute_with_their_inputs() {
    let mut engine = build(&[&["5", "=Doubled"]]);
    engine
        .add_named_expression("Doubled", "=Sheet1!A1*2", None)
        .unwrap();
    assert_eq!(num(&mut engine, (0, 1)), 10.0);
    engine.set_cell_contents("Sheet1", 0, 0, "7").unwrap();
    assert_eq!(num(&mut engine, (0, 1)), 14.0);
}

#[test]
fn invalid_and_duplicate_names_are_rejected() {
    let mut engine = build(&[&["1"]]);
    assert!(matches!(
        engine.add_named_expression("A1", "=1", None),
        Err(EngineError::NamedExpressionNameInvalid(_))
    ));
    assert!(matches!(
        engine.add_named_expression("1st", "=1", None),
        Err(EngineError::NamedExpressionNameInvalid(_))
    ));
    engine.add_named_expression("total", "=1", None).unwrap();
    assert!(matches!(
        engine.add_named_expression("TOTAL", "=2", None),
        Err(EngineError::NamedExpressionDuplicate(_))
    ));
    // same name in a sheet scope is a different slot
    engine
        .add_named_expression("TOTAL", "=2", Some("Sheet1"))
        .unwrap();
}
