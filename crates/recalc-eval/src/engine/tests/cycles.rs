//! Cycle detection and the tolerant evaluation policy.

use recalc_common::{CellValue, ErrorKind};

use super::common::{build, build_with, num, tolerant_with_seeds, value};
use crate::config::Config;

fn assert_error(v: CellValue, kind: ErrorKind) {
    match v {
        CellValue::Error(e) => assert_eq!(e.kind, kind),
        other => panic!("expected {kind}, got {other:?}"),
    }
}

#[test]
fn simple_cycle_is_flagged_in_strict_mode() {
    let mut engine = build(&[&["=B1", "=A1"]]);
    assert_error(value(&mut engine, (0, 0)), ErrorKind::Cycle);
    assert_error(value(&mut engine, (0, 1)), ErrorKind::Cycle);
}

#[test]
fn every_member_of_a_larger_cycle_is_flagged() {
    let mut engine = build(&[&["=C1", "=A1", "=B1", "=C1+1"]]);
    for col in 0..3 {
        assert_error(value(&mut engine, (0, col)), ErrorKind::Cycle);
    }
    // downstream of the cycle the error propagates as data
    assert_error(value(&mut engine, (0, 3)), ErrorKind::Cycle);
}

#[test]
fn self_reference_is_a_cycle_in_strict_mode() {
    let mut engine = build(&[&["=A1"]]);
    assert_error(value(&mut engine, (0, 0)), ErrorKind::Cycle);
}

#[test]
fn two_cell_cycle_reads_back_its_seeds() {
    let mut engine = build_with(&[&["=B1+1", "=A1+1"]], tolerant_with_seeds(&[&[200.0, 199.0]]));
    assert_eq!(num(&mut engine, (0, 0)), 200.0);
    assert_eq!(num(&mut engine, (0, 1)), 199.0);
}

#[test]
fn three_cell_cycle_reads_back_its_seeds() {
    let mut engine = build_with(
        &[&["=B1+1", "=C1+1", "=A1+1"]],
        tolerant_with_seeds(&[&[300.0, 299.0, 298.0]]),
    );
    assert_eq!(num(&mut engine, (0, 0)), 300.0);
    assert_eq!(num(&mut engine, (0, 1)), 299.0);
    assert_eq!(num(&mut engine, (0, 2)), 298.0);
}

#[test]
fn edit_propagates_through_a_seeded_cycle() {
    let mut engine = build_with(
        &[&["=B1+C1", "=A1+1", "10"]],
        tolerant_with_seeds(&[&[1199.0, 1200.0, 10.0]]),
    );
    assert_eq!(num(&mut engine, (0, 0)), 1199.0);
    assert_eq!(num(&mut engine, (0, 1)), 1200.0);
    assert_eq!(num(&mut engine, (0, 2)), 10.0);

    engine.set_cell_contents("Sheet1", 0, 2, "20").unwrap();
    assert_eq!(num(&mut engine, (0, 2)), 20.0);
    // seeded recompute: in-place sweeps in insertion order from the cached
    // values, with the updated C1
    assert_eq!(num(&mut engine, (0, 0)), 3299.0);
    assert_eq!(num(&mut engine, (0, 1)), 3300.0);
}

#[test]
fn assigning_a_constant_breaks_the_cycle() {
    let mut engine = build_with(&[&["=B1+1", "=A1+1"]], tolerant_with_seeds(&[&[51.0, 50.0]]));
    assert_eq!(num(&mut engine, (0, 0)), 51.0);
    assert_eq!(num(&mut engine, (0, 1)), 50.0);

    engine.set_cell_contents("Sheet1", 0, 1, "75").unwrap();
    assert_eq!(num(&mut engine, (0, 0)), 76.0);
    assert_eq!(num(&mut engine, (0, 1)), 75.0);
}

#[test]
fn errors_flow_through_tolerant_evaluation() {
    let config = Config {
        allow_circular_references: true,
        ..Config::default()
    };
    let mut engine = build_with(&[&["=B1+1", "=1/0"]], config);
    assert_error(value(&mut engine, (0, 1)), ErrorKind::Div);
    assert_error(value(&mut engine, (0, 0)), ErrorKind::Div);
}

#[test]
fn error_inside_a_real_cycle_sticks() {
    let config = Config {
        allow_circular_references: true,
        ..Config::default()
    };
    let mut engine = build_with(&[&["=B1+1", "=A1/0"]], config);
    assert_error(value(&mut engine, (0, 0)), ErrorKind::Div);
    assert_error(value(&mut engine, (0, 1)), ErrorKind::Div);
}

#[test]
fn unseeded_self_cycle_defaults_to_zero() {
    let config = Config {
        allow_circular_references: true,
        ..Config::default()
    };
    let mut engine = build_with(&[&["=A1"]], config);
    assert_eq!(value(&mut engine, (0, 0)), CellValue::Number(0.0));
}

#[test]
fn empty_cells_in_cycles_stay_empty() {
    let config = Config {
        allow_circular_references: true,
        ..Config::default()
    };
    // a reference-only cycle has nothing numeric in it; it settles on empty
    let mut engine = build_with(&[&["=B1", "=A1"]], config);
    assert_eq!(value(&mut engine, (0, 0)), CellValue::Empty);
    assert_eq!(value(&mut engine, (0, 1)), CellValue::Empty);
}

#[test]
fn formula_inside_its_own_range_is_a_cycle() {
    // the cycle runs through the range vertex: A3 -> A1:A3 -> A3
    let mut engine = build(&[&["1"], &["2"], &["=SUM(A1:A3)"]]);
    assert_error(value(&mut engine, (2, 0)), ErrorKind::Cycle);
    // the plain cells stay readable
    assert_eq!(value(&mut engine, (0, 0)), CellValue::Number(1.0));
}

#[test]
fn strict_mode_is_the_default() {
    let config = Config::default();
    assert!(!config.allow_circular_references);
}

#[test]
fn dirty_set_drains_across_a_pass() {
    let mut engine = build(&[&["1", "=A1+1", "=B1+1"]]);
    assert!(engine.graph.has_dirty());
    assert_eq!(num(&mut engine, (0, 2)), 3.0);
    assert_eq!(engine.graph.dirty_count(), 0);
}

#[test]
fn cached_values_match_reevaluation() {
    // a non-dirty formula's cached value equals what a fresh evaluation of
    // its AST yields
    let mut engine = build(&[&["2", "3", "=A1*B1"]]);
    assert_eq!(num(&mut engine, (0, 2)), 6.0);
    engine.set_cell_contents("Sheet1", 0, 0, "5").unwrap();
    assert_eq!(num(&mut engine, (0, 2)), 15.0);
    assert_eq!(num(&mut engine, (0, 2)), 15.0);
}
