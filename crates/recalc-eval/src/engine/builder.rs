//! Bulk initial population of the dependency graph.
//!
//! Three phases: materialize content vertices (formulas parsed once per
//! distinct text), link dependencies, mark everything dirty for the first
//! pass. Empty cells are never materialized; the address mapping's absence
//! is their representation.

use recalc_common::{CellRef, CellValue};
use recalc_parse::AstNode;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::content::CellContent;
use crate::stats::StatPhase;

use super::address_mapping::AddressMapping;
use super::graph::collect_references;
use super::ops::predict_dims;
use super::vertex::{VertexId, VertexKind};
use super::{Engine, EngineError, SheetContent};

pub(crate) fn build_into(
    engine: &mut Engine,
    sheets: &[(String, SheetContent)],
) -> Result<(), EngineError> {
    engine.stats.start(StatPhase::GraphBuild);

    // Validate every sheet before creating any of them.
    let mut taken_names = FxHashSet::default();
    for (name, cells) in sheets {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "sheet name must not be empty".to_string(),
            ));
        }
        let rows = cells.len() as u32;
        let columns = cells.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
        if rows > engine.config.max_rows || columns > engine.config.max_columns {
            return Err(EngineError::SheetSizeLimit {
                sheet: name.clone(),
                rows,
                columns,
            });
        }
        if !taken_names.insert(name.to_lowercase())
            || engine.graph.sheets.id_for(name).is_some()
        {
            return Err(EngineError::DuplicateSheet(name.clone()));
        }
    }

    // Register all sheets first so cross-sheet references resolve while
    // parsing.
    let mut sheet_ids = Vec::with_capacity(sheets.len());
    for (name, cells) in sheets {
        let Some(sheet_id) = engine.graph.sheets.add(name) else {
            return Err(EngineError::DuplicateSheet(name.clone()));
        };
        let rows = cells.len();
        let columns = cells.iter().map(|r| r.len()).max().unwrap_or(0);
        let occupied = cells
            .iter()
            .flatten()
            .filter(|raw| !raw.trim().is_empty())
            .count();
        let total = rows * columns;
        let mapping = if total > 0
            && occupied as f64 / total as f64 > engine.config.dense_mapping_threshold
        {
            AddressMapping::dense(rows as u32, columns as u32)
        } else {
            AddressMapping::sparse()
        };
        engine.graph.addresses.add_sheet(sheet_id, mapping);
        sheet_ids.push(sheet_id);
    }

    // Phase A: materialize values and formulas.
    let mut parse_cache: FxHashMap<String, AstNode> = FxHashMap::default();
    let mut formulas: Vec<VertexId> = Vec::new();
    for ((_, cells), &sheet_id) in sheets.iter().zip(&sheet_ids) {
        for (r, row) in cells.iter().enumerate() {
            for (c, raw) in row.iter().enumerate() {
                let cell = CellRef::at(sheet_id, r as u32, c as u32);
                match engine.content_parser.classify(raw) {
                    CellContent::Empty => {}
                    CellContent::Number(n) => {
                        add_value(engine, cell, CellValue::Number(n));
                    }
                    CellContent::Boolean(b) => {
                        add_value(engine, cell, CellValue::Boolean(b));
                    }
                    CellContent::Text(s) => {
                        add_value(engine, cell, CellValue::Text(s));
                    }
                    CellContent::Error(e) => {
                        add_value(engine, cell, CellValue::Error(e));
                    }
                    CellContent::Formula(body) => {
                        let parsed = match parse_cache.get(&body) {
                            Some(cached) => Ok(cached.clone()),
                            None => match engine.parse_formula(&body) {
                                Ok(ast) => {
                                    parse_cache.insert(body.clone(), ast.clone());
                                    Ok(ast)
                                }
                                Err(e) => Err(e),
                            },
                        };
                        match parsed {
                            Err(e) => add_value(
                                engine,
                                cell,
                                CellValue::Error(
                                    recalc_common::CellError::new(
                                        recalc_common::ErrorKind::Error,
                                    )
                                    .with_message(e.to_string()),
                                ),
                            ),
                            Ok(ast) => {
                                let id = add_formula(engine, cell, ast);
                                formulas.push(id);
                            }
                        }
                    }
                }
            }
        }
    }

    // Phase B: link dependencies.
    for &id in &formulas {
        let Some(ast_id) = engine.graph.vertex(id).and_then(|v| v.ast_id()) else {
            continue;
        };
        let Some(host) = engine.graph.vertex(id).and_then(|v| v.cell()) else {
            continue;
        };
        let Some(ast) = engine.transforms.materialized_clone(ast_id) else {
            continue;
        };
        let refs = collect_references(&ast, host.sheet_id);
        engine.graph.link_formula(id, &refs);
    }

    // Phase C: everything recomputes on the first read.
    for &id in &formulas {
        engine.graph.mark_dirty(id);
    }
    engine.evaluation_pending = true;

    // Stash initial computed values; they are consumed per address at the
    // seeded vertex's first evaluation, and only in tolerant mode.
    if engine.config.allow_circular_references {
        let supplied = std::mem::take(&mut engine.config.initial_computed_values);
        for (sheet_name, matrix) in supplied {
            let Some(sheet_id) = engine.graph.sheets.id_for(&sheet_name) else {
                continue;
            };
            for (r, row) in matrix.into_iter().enumerate() {
                for (c, value) in row.into_iter().enumerate() {
                    if !matches!(value, CellValue::Empty) {
                        engine
                            .seeds
                            .insert(CellRef::at(sheet_id, r as u32, c as u32), value);
                    }
                }
            }
        }
    }

    engine.stats.stop(StatPhase::GraphBuild);
    engine.graph.debug_validate();
    Ok(())
}

fn add_value(engine: &mut Engine, cell: CellRef, value: CellValue) {
    engine.graph.add_vertex(VertexKind::Value {
        cell,
        value: value.clone(),
    });
    engine
        .column_search
        .update(cell.sheet_id, cell.row(), cell.col(), None, Some(&value));
}

fn add_formula(engine: &mut Engine, cell: CellRef, ast: AstNode) -> VertexId {
    let volatile = ast.contains_volatile;
    let dims = predict_dims(&ast);
    let ast_id = engine.transforms.park(ast, cell.sheet_id);
    if dims == (1, 1) {
        engine.graph.add_vertex(VertexKind::Formula {
            cell,
            ast: ast_id,
            value: None,
            dirty: true,
            volatile,
        })
    } else {
        let id = engine.graph.add_vertex(VertexKind::Array {
            anchor: cell,
            dims,
            ast: ast_id,
            values: None,
            dirty: true,
            volatile,
        });
        // claim the free cells of the predicted extent
        for r in cell.row()..cell.row() + dims.0 {
            for c in cell.col()..cell.col() + dims.1 {
                if engine.graph.vertex_at(CellRef::at(cell.sheet_id, r, c)).is_none() {
                    if let Some(m) = engine.graph.addresses.sheet_mut(cell.sheet_id) {
                        m.set(r, c, id);
                    }
                }
            }
        }
        id
    }
}
