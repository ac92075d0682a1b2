//! Shared helpers for the engine scenario tests.

use recalc_common::CellValue;
use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::engine::{Engine, SheetContent};

pub fn sheet(rows: &[&[&str]]) -> SheetContent {
    rows.iter()
        .map(|row| row.iter().map(|s| s.to_string()).collect())
        .collect()
}

pub fn build(rows: &[&[&str]]) -> Engine {
    build_with(rows, Config::default())
}

pub fn build_with(rows: &[&[&str]], config: Config) -> Engine {
    Engine::build_from_sheets(vec![("Sheet1".to_string(), sheet(rows))], config)
        .expect("engine build failed")
}

/// Tolerant-mode config with `Sheet1` seeds laid out like the grid.
pub fn tolerant_with_seeds(seeds: &[&[f64]]) -> Config {
    let matrix: Vec<Vec<CellValue>> = seeds
        .iter()
        .map(|row| row.iter().map(|&n| CellValue::Number(n)).collect())
        .collect();
    let mut initial = FxHashMap::default();
    initial.insert("Sheet1".to_string(), matrix);
    Config {
        allow_circular_references: true,
        initial_computed_values: initial,
        ..Config::default()
    }
}

pub fn num(engine: &mut Engine, cell: (u32, u32)) -> f64 {
    match engine.get_cell_value("Sheet1", cell.0, cell.1).unwrap() {
        CellValue::Number(n) => n,
        other => panic!("expected a number, got {other:?}"),
    }
}

pub fn value(engine: &mut Engine, cell: (u32, u32)) -> CellValue {
    engine.get_cell_value("Sheet1", cell.0, cell.1).unwrap()
}
