//! Bulk build, configuration, and the lazy evaluation boundary.

use recalc_common::CellValue;

use super::common::{build_with, num, sheet};
use crate::config::{Config, ConfigError};
use crate::engine::{Engine, EngineError};
use crate::stats::StatPhase;

#[test]
fn build_fails_when_a_sheet_exceeds_the_row_limit() {
    let config = Config {
        max_rows: 2,
        ..Config::default()
    };
    let content = sheet(&[&["1"], &["2"], &["3"]]);
    let err = Engine::build_from_sheets(vec![("Sheet1".to_string(), content)], config).unwrap_err();
    assert!(matches!(
        err,
        EngineError::SheetSizeLimit { rows: 3, .. }
    ));
}

#[test]
fn build_fails_on_duplicate_sheet_names() {
    let err = Engine::build_from_sheets(
        vec![
            ("Data".to_string(), sheet(&[&["1"]])),
            ("data".to_string(), sheet(&[&["2"]])),
        ],
        Config::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateSheet(_)));
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let config = Config {
        cycle_iteration_limit: 0,
        ..Config::default()
    };
    assert!(matches!(
        Engine::build_empty(config),
        Err(EngineError::Config(ConfigError::OutOfRange { .. }))
    ));
}

#[test]
fn dense_and_sparse_sheets_compute_identically() {
    let rows: &[&[&str]] = &[&["1", "2", "=A1+B1"], &["3", "4", "=A2*B2"]];
    // occupancy is 1.0: threshold 0.0 selects dense storage, 1.0 sparse
    for threshold in [0.0, 1.0] {
        let config = Config {
            dense_mapping_threshold: threshold,
            ..Config::default()
        };
        let mut engine = build_with(rows, config);
        assert_eq!(num(&mut engine, (0, 2)), 3.0);
        assert_eq!(num(&mut engine, (1, 2)), 12.0);
    }
}

#[test]
fn build_from_sheet_generates_the_prefixed_name() {
    let mut engine = Engine::build_from_sheet(sheet(&[&["=1+1"]]), Config::default()).unwrap();
    assert_eq!(engine.sheet_names(), vec!["Sheet1"]);
    assert_eq!(
        engine.get_cell_value("Sheet1", 0, 0).unwrap(),
        CellValue::Number(2.0)
    );

    let config = Config {
        new_sheet_prefix: "Arkusz".to_string(),
        ..Config::default()
    };
    let mut engine = Engine::build_from_sheet(sheet(&[&["5"]]), config).unwrap();
    assert_eq!(
        engine.get_cell_value("Arkusz1", 0, 0).unwrap(),
        CellValue::Number(5.0)
    );
}

#[test]
fn build_from_sheet_remaps_seed_keys_onto_the_generated_name() {
    let mut seeds = rustc_hash::FxHashMap::default();
    seeds.insert(
        "WhateverTheCallerCalledIt".to_string(),
        vec![vec![CellValue::Number(9.0), CellValue::Number(8.0)]],
    );
    let config = Config {
        allow_circular_references: true,
        initial_computed_values: seeds,
        ..Config::default()
    };
    let mut engine = Engine::build_from_sheet(sheet(&[&["=B1+1", "=A1+1"]]), config).unwrap();
    assert_eq!(
        engine.get_cell_value("Sheet1", 0, 0).unwrap(),
        CellValue::Number(9.0)
    );
    assert_eq!(
        engine.get_cell_value("Sheet1", 0, 1).unwrap(),
        CellValue::Number(8.0)
    );
}

#[test]
fn evaluation_is_lazy_until_a_read() {
    let mut engine = build_with(&[&["1", "=A1+1"]], Config::default());
    assert!(engine.graph.has_dirty());
    engine.set_cell_contents("Sheet1", 0, 0, "5").unwrap();
    assert!(engine.graph.has_dirty());
    // the read is the trigger
    assert_eq!(num(&mut engine, (0, 1)), 6.0);
    assert!(!engine.graph.has_dirty());
}

#[test]
fn volatile_formulas_reevaluate_on_every_pass() {
    let mut engine = build_with(&[&["=RAND()", "1"]], Config::default());
    assert_eq!(engine.graph.volatile_vertices().len(), 1);
    let first = num(&mut engine, (0, 0));
    assert!((0.0..1.0).contains(&first));
    // a pure re-read runs no pass and observes the same value
    assert_eq!(num(&mut engine, (0, 0)), first);
    // an explicit pass re-rolls
    engine.evaluate_now();
    assert!(!engine.graph.has_dirty());
}

#[test]
fn rebuild_with_config_carries_content_and_statistics() {
    let config = Config {
        use_stats: true,
        ..Config::default()
    };
    let mut engine = build_with(&[&["2", "=A1*10"]], config);
    assert_eq!(num(&mut engine, (0, 1)), 20.0);

    let mut rebuilt = engine
        .rebuild_with_config(Config {
            use_stats: true,
            max_rows: 100,
            ..Config::default()
        })
        .unwrap();
    assert_eq!(num(&mut rebuilt, (0, 1)), 20.0);
    assert_eq!(
        rebuilt.get_formula("Sheet1", 0, 1).unwrap().as_deref(),
        Some("=A1*10")
    );
    assert_eq!(rebuilt.config().max_rows, 100);
    // the statistics recorder carried over from the first engine
    assert!(rebuilt.stats().elapsed(StatPhase::GraphBuild).is_some());
}

#[test]
fn stats_recorder_tracks_evaluation_when_enabled() {
    let config = Config {
        use_stats: true,
        ..Config::default()
    };
    let mut engine = build_with(&[&["1", "=A1"]], config);
    num(&mut engine, (0, 1));
    assert!(engine.stats().elapsed(StatPhase::Evaluation).is_some());
    assert!(engine.stats().elapsed(StatPhase::Parser).is_some());
}
