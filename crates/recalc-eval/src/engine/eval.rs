//! The recompute pass.
//!
//! Mutations only mark state dirty; the first read after a batch of
//! mutations lands here. The pass takes the dirty closure (plus re-dirtied
//! volatiles), partitions it into strongly connected components, orders the
//! condensation, and evaluates component by component. Cyclic components go
//! through the cycle policy: `#CYCLE!` flagging in strict mode, seeded
//! in-place sweeps in tolerant mode.

use recalc_common::{CellRef, CellValue, ErrorKind, RangeRef, SheetId};
use recalc_parse::{AstKind, AstNode, BinaryOp};

use crate::column_search::{ColumnSearch, SearchOutcome};
use crate::config::Config;
use crate::functions::{FunctionDef, FunctionRegistry};
use crate::interpreter::{Computed, EvaluationContext, Interpreter};
use crate::stats::StatPhase;

use super::graph::DependencyGraph;
use super::scheduler::Scheduler;
use super::vertex::{VertexId, VertexKind};
use super::Engine;

/// Read-only view of the engine handed to the interpreter.
pub(crate) struct GraphContext<'a> {
    pub graph: &'a DependencyGraph,
    pub config: &'a Config,
    pub registry: &'a FunctionRegistry,
    pub search: &'a ColumnSearch,
}

impl<'a> EvaluationContext for GraphContext<'a> {
    fn config(&self) -> &Config {
        self.config
    }

    fn cell_value(&self, cell: CellRef) -> CellValue {
        self.graph.cell_value(cell)
    }

    fn range_values(&self, range: &RangeRef) -> Vec<Vec<CellValue>> {
        self.graph.range_values(range)
    }

    fn clamped_rect(&self, range: &RangeRef) -> Option<(u32, u32, u32, u32)> {
        self.graph.clamped_rect(range)
    }

    fn named_value(&self, name: &str, sheet: SheetId) -> Option<CellValue> {
        self.graph.named_value(name, sheet)
    }

    fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.registry.get(name)
    }

    fn search_column(
        &self,
        sheet: SheetId,
        col: u32,
        row_lo: u32,
        row_hi: u32,
        needle: &CellValue,
    ) -> SearchOutcome {
        self.search.find(sheet, col, row_lo, row_hi, needle)
    }
}

/// What one recompute pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassSummary {
    pub evaluated: usize,
    pub cycle_errors: usize,
}

impl Engine {
    /// Runs a pass if any mutation happened since the last one.
    pub(crate) fn recompute_if_needed(&mut self) {
        if self.evaluation_pending {
            self.run_pass();
        }
    }

    /// Forces an evaluation pass; volatile formulas re-evaluate even when
    /// nothing else is dirty.
    pub fn evaluate_now(&mut self) -> PassSummary {
        self.run_pass()
    }

    fn run_pass(&mut self) -> PassSummary {
        self.stats.start(StatPhase::Evaluation);
        self.graph.redirty_volatiles();
        let subset = self.graph.evaluation_vertices();
        let mut summary = PassSummary::default();

        if !subset.is_empty() {
            let schedule = Scheduler::new(&self.graph).create_schedule(&subset);
            for component in &schedule.components {
                if !component.cyclic {
                    // range vertices ride along for cycle detection only
                    if self.evaluates(component.vertices[0]) {
                        self.evaluate_vertex(component.vertices[0]);
                        summary.evaluated += 1;
                    }
                } else if !self.config.allow_circular_references {
                    for &id in &component.vertices {
                        if !self.evaluates(id) {
                            continue;
                        }
                        summary.cycle_errors += 1;
                        self.store_computed(
                            id,
                            Computed::Scalar(CellValue::Error(ErrorKind::Cycle.into())),
                        );
                    }
                } else {
                    let members: Vec<_> = component
                        .vertices
                        .iter()
                        .copied()
                        .filter(|&id| self.evaluates(id))
                        .collect();
                    summary.evaluated += members.len();
                    self.evaluate_tolerated_cycle(&members);
                }
            }
            self.graph.clear_dirty(&subset);
        }
        self.graph.flush_non_formula_dirty();
        self.evaluation_pending = false;
        self.stats.stop(StatPhase::Evaluation);
        self.graph.debug_validate();
        summary
    }

    /// Evaluates one vertex against current cached state and stores the
    /// result. Returns whether the stored value changed.
    fn evaluate_vertex(&mut self, id: VertexId) -> bool {
        let Some((ast_id, host_sheet)) = self.formula_shape(id) else {
            return false;
        };
        let Some(ast) = self.transforms.materialized_clone(ast_id) else {
            return false;
        };
        let computed = {
            let ctx = GraphContext {
                graph: &self.graph,
                config: &self.config,
                registry: &self.registry,
                search: &self.column_search,
            };
            Interpreter::new(&ctx, host_sheet).evaluate(&ast)
        };
        self.store_computed(id, computed)
    }

    /// Whether a vertex actually computes something during a pass.
    fn evaluates(&self, id: VertexId) -> bool {
        self.graph
            .vertex(id)
            .map(|v| v.is_formula_like())
            .unwrap_or(false)
    }

    fn formula_shape(&self, id: VertexId) -> Option<(super::transform::AstId, SheetId)> {
        let vertex = self.graph.vertex(id)?;
        let ast = vertex.ast_id()?;
        let host = match &vertex.kind {
            VertexKind::Formula { cell, .. } => cell.sheet_id,
            VertexKind::Array { anchor, .. } => anchor.sheet_id,
            VertexKind::Named { scope, .. } => match scope {
                super::named::NameScope::Sheet(sheet) => *sheet,
                super::named::NameScope::Workbook => 0,
            },
            _ => return None,
        };
        Some((ast, host))
    }

    /// Stores a computed result on a vertex, keeping the column index in
    /// sync. Returns whether anything changed.
    pub(crate) fn store_computed(&mut self, id: VertexId, computed: Computed) -> bool {
        let is_array = matches!(
            self.graph.vertex(id).map(|v| &v.kind),
            Some(VertexKind::Array { .. })
        );
        if is_array {
            self.store_array(id, computed.into_array())
        } else {
            self.store_scalar(id, computed.into_scalar())
        }
    }

    fn store_scalar(&mut self, id: VertexId, value: CellValue) -> bool {
        let old = self.graph.store_value(id, value.clone());
        let changed = old.as_ref() != Some(&value);
        if let Some(cell) = self.graph.vertex(id).and_then(|v| v.cell()) {
            self.column_search.update(
                cell.sheet_id,
                cell.row(),
                cell.col(),
                old.as_ref(),
                Some(&value),
            );
        }
        changed
    }

    /// Stores an array result, re-linking occupied cells when the extent
    /// changed. Covered cells that collide with unrelated vertices are left
    /// alone.
    fn store_array(&mut self, id: VertexId, grid: Vec<Vec<CellValue>>) -> bool {
        let Some(VertexKind::Array {
            anchor,
            dims,
            values,
            ..
        }) = self.graph.vertex(id).map(|v| &v.kind)
        else {
            return false;
        };
        let anchor = *anchor;
        let old_dims = *dims;
        let old_values = values.clone();
        let new_dims = (
            grid.len() as u32,
            grid.first().map_or(0, |r| r.len()) as u32,
        );

        if new_dims != old_dims {
            // unmap cells the array no longer covers
            for row in anchor.row()..anchor.row() + old_dims.0 {
                for col in anchor.col()..anchor.col() + old_dims.1 {
                    let inside =
                        row < anchor.row() + new_dims.0 && col < anchor.col() + new_dims.1;
                    if inside {
                        continue;
                    }
                    let covered = CellRef::at(anchor.sheet_id, row, col);
                    if self.graph.vertex_at(covered) == Some(id) {
                        if let Some(mapping) = self.graph.addresses.sheet_mut(anchor.sheet_id) {
                            mapping.remove(row, col);
                        }
                        self.graph.cell_left_ranges(id, covered);
                    }
                }
            }
            // claim newly covered, unoccupied cells
            for row in anchor.row()..anchor.row() + new_dims.0 {
                for col in anchor.col()..anchor.col() + new_dims.1 {
                    let covered = CellRef::at(anchor.sheet_id, row, col);
                    if self.graph.vertex_at(covered).is_none() {
                        if let Some(mapping) = self.graph.addresses.sheet_mut(anchor.sheet_id) {
                            mapping.set(row, col, id);
                        }
                        self.graph.cell_joined_ranges(id, covered);
                    }
                }
            }
        }

        // sync the column index over the union of the two extents
        for row in anchor.row()..anchor.row() + old_dims.0.max(new_dims.0) {
            for col in anchor.col()..anchor.col() + old_dims.1.max(new_dims.1) {
                let covered = CellRef::at(anchor.sheet_id, row, col);
                if self.graph.vertex_at(covered) != Some(id) {
                    continue;
                }
                let (r, c) = (row - anchor.row(), col - anchor.col());
                let old = old_values
                    .as_ref()
                    .and_then(|g| g.get(r as usize)?.get(c as usize).cloned());
                let new = grid.get(r as usize).and_then(|g| g.get(c as usize)).cloned();
                self.column_search.update(
                    anchor.sheet_id,
                    row,
                    col,
                    old.as_ref(),
                    new.as_ref(),
                );
            }
        }

        let changed = old_values.as_ref() != Some(&grid) || old_dims != new_dims;
        if let Some(VertexKind::Array { dims, values, .. }) =
            self.graph.vertex_mut(id).map(|v| &mut v.kind)
        {
            *dims = new_dims;
            *values = Some(grid);
        }
        changed
    }

    /* ─────────────────── tolerated cycles ─────────────────── */

    /// Evaluates one cyclic component under the tolerant policy.
    ///
    /// Members with an unconsumed initial computed value take it as their
    /// result outright (they arrived pre-computed). The rest get a starting
    /// value (current cached, else a kind-appropriate default) and are then
    /// swept in insertion order, updating in place, until a sweep changes
    /// nothing or the iteration limit runs out.
    fn evaluate_tolerated_cycle(&mut self, members: &[VertexId]) {
        let is_self_loop = members.len() == 1;
        let mut sweeping = Vec::new();
        for &id in members {
            let cell = self.graph.vertex(id).and_then(|v| v.cell());
            if let Some(seed) = cell.and_then(|c| self.seeds.remove(&c)) {
                self.store_computed(id, Computed::Scalar(seed));
                if let Some(v) = self.graph.vertex_mut(id) {
                    v.set_dirty(false);
                }
                continue;
            }
            self.ensure_start_value(id, is_self_loop);
            sweeping.push(id);
        }
        if sweeping.is_empty() {
            return;
        }
        for _ in 0..self.config.cycle_iteration_limit {
            let mut changed = false;
            for &id in &sweeping {
                changed |= self.evaluate_vertex(id);
            }
            if !changed {
                break;
            }
        }
    }

    /// Gives an unevaluated cycle member its starting value.
    fn ensure_start_value(&mut self, id: VertexId, is_self_loop: bool) {
        enum Start {
            Scalar,
            Array,
            Done,
        }
        let start = match self.graph.vertex(id).map(|v| &v.kind) {
            Some(VertexKind::Formula { value: None, .. })
            | Some(VertexKind::Named { value: None, .. }) => Start::Scalar,
            Some(VertexKind::Array { values: None, .. }) => Start::Array,
            _ => Start::Done,
        };
        match start {
            Start::Scalar => {
                let seed = self
                    .formula_shape(id)
                    .and_then(|(ast, _)| self.transforms.materialized_clone(ast))
                    .map(|ast| default_cycle_seed(&ast, is_self_loop))
                    .unwrap_or(CellValue::Empty);
                self.store_scalar(id, seed);
            }
            Start::Array => {
                // provisional: an array member starts from its first scalar
                // seed, else empty
                let first_seed = self
                    .graph
                    .vertex(id)
                    .and_then(|v| v.cell())
                    .and_then(|c| self.seeds.remove(&c))
                    .unwrap_or(CellValue::Empty);
                self.store_array(id, vec![vec![first_seed]]);
            }
            Start::Done => {}
        }
    }
}

/// Default starting value for an unseeded cycle member.
///
/// Numeric-looking formulas (arithmetic, functions, numeric literals)
/// start at zero; text-shaped ones start empty. A bare reference is
/// neutral: it starts at zero only when it points at itself, so a
/// reference-only cycle through empty cells stays empty.
fn default_cycle_seed(ast: &AstNode, is_self_loop: bool) -> CellValue {
    match &ast.kind {
        AstKind::Literal(CellValue::Text(_)) => CellValue::Empty,
        AstKind::Binary {
            op: BinaryOp::Concat,
            ..
        } => CellValue::Empty,
        AstKind::CellRef(_) | AstKind::RangeRef(_) | AstKind::NamedRef(_) => {
            if is_self_loop {
                CellValue::Number(0.0)
            } else {
                CellValue::Empty
            }
        }
        _ => CellValue::Number(0.0),
    }
}
