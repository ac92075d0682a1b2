//! Structural mutations: cell content changes, row/column insertion and
//! removal, sheet CRUD, named expressions.
//!
//! Every operation validates before touching anything, so a failure leaves
//! the engine exactly as it was, and records its inverse command before
//! applying. Mutations never evaluate; they mark state dirty and set the
//! pending flag the next read acts on.

use recalc_common::{CellRef, CellValue, Coord, RangeRef, SheetId, UNBOUNDED};
use recalc_parse::parser::is_valid_name;
use recalc_parse::{AstKind, AstNode};

use crate::content::CellContent;
use crate::stats::StatPhase;

use super::address_mapping::AddressMapping;
use super::graph::collect_references;
use super::named::{NameScope, NamedExpression};
use super::transform::{clamp_axis, Transform};
use super::vertex::{VertexId, VertexKind};
use super::{Engine, EngineError};

/// The command that undoes an applied operation, recorded before the
/// operation runs. Content wiped by destructive commands is restored by
/// the caller's clipboard/undo bookkeeping, not here.
#[derive(Debug, Clone, PartialEq)]
pub enum InverseCommand {
    SetCellContents {
        sheet: String,
        row: u32,
        col: u32,
        previous: String,
    },
    AddRows {
        sheet: String,
        at: u32,
        count: u32,
    },
    RemoveRows {
        sheet: String,
        at: u32,
        count: u32,
    },
    AddColumns {
        sheet: String,
        at: u32,
        count: u32,
    },
    RemoveColumns {
        sheet: String,
        at: u32,
        count: u32,
    },
    AddSheet {
        name: String,
    },
    RemoveSheet {
        name: String,
    },
    RenameSheet {
        from: String,
        to: String,
    },
    AddNamedExpression {
        name: String,
        expression: String,
        scope_sheet: Option<String>,
    },
    RemoveNamedExpression {
        name: String,
        scope_sheet: Option<String>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Row,
    Column,
}

/// What a cell is about to become.
enum NewCell {
    Empty,
    Value(CellValue),
    Formula { ast: AstNode },
    ArrayFormula { ast: AstNode, dims: (u32, u32) },
}

/// Conservative upper bound on a formula's result shape: array literals
/// spill their own dimensions, everything else predicts a scalar. A wrong
/// prediction re-links at evaluation time.
pub(crate) fn predict_dims(ast: &AstNode) -> (u32, u32) {
    match &ast.kind {
        AstKind::Array(rows) => (
            rows.len() as u32,
            rows.first().map_or(0, |r| r.len()) as u32,
        ),
        _ => (1, 1),
    }
}

impl Engine {
    pub fn undo_log(&self) -> &[InverseCommand] {
        &self.undo_log
    }

    /* ─────────────────── cell contents ─────────────────── */

    pub fn set_cell_contents(
        &mut self,
        sheet: &str,
        row: u32,
        col: u32,
        raw: &str,
    ) -> Result<(), EngineError> {
        let sheet_id = self.resolve_sheet(sheet)?;
        if !self.graph.in_bounds(row, col) {
            return Err(EngineError::SheetSizeLimit {
                sheet: sheet.to_string(),
                rows: row + 1,
                columns: col + 1,
            });
        }
        let cell = CellRef::at(sheet_id, row, col);

        // writing into the interior of an array is a domain violation
        if let Some(id) = self.graph.vertex_at(cell) {
            if let Some(VertexKind::Array { anchor, .. }) =
                self.graph.vertex(id).map(|v| &v.kind)
            {
                if *anchor != cell {
                    return Err(EngineError::InvalidArgument(
                        "cannot overwrite part of an array".to_string(),
                    ));
                }
            }
        }

        let new = match self.content_parser.classify(raw) {
            CellContent::Empty => NewCell::Empty,
            CellContent::Number(n) => NewCell::Value(CellValue::Number(n)),
            CellContent::Boolean(b) => NewCell::Value(CellValue::Boolean(b)),
            CellContent::Text(s) => NewCell::Value(CellValue::Text(s)),
            CellContent::Error(e) => NewCell::Value(CellValue::Error(e)),
            CellContent::Formula(body) => match self.parse_formula(&body) {
                Ok(ast) => {
                    let dims = predict_dims(&ast);
                    if dims == (1, 1) {
                        NewCell::Formula { ast }
                    } else {
                        NewCell::ArrayFormula { ast, dims }
                    }
                }
                Err(e) => NewCell::Value(CellValue::Error(
                    recalc_common::CellError::new(recalc_common::ErrorKind::Error)
                        .with_message(e.to_string()),
                )),
            },
        };

        // an array must not spill over occupied cells (its own previous
        // extent does not count)
        if let NewCell::ArrayFormula { dims, .. } = &new {
            if !self.graph.in_bounds(row + dims.0 - 1, col + dims.1 - 1) {
                return Err(EngineError::SheetSizeLimit {
                    sheet: sheet.to_string(),
                    rows: row + dims.0,
                    columns: col + dims.1,
                });
            }
            let replaced = self.graph.vertex_at(cell);
            for r in row..row + dims.0 {
                for c in col..col + dims.1 {
                    let covered = CellRef::at(sheet_id, r, c);
                    if covered == cell {
                        continue;
                    }
                    if let Some(other) = self.graph.vertex_at(covered) {
                        if Some(other) == replaced {
                            continue;
                        }
                        let placeholder = matches!(
                            self.graph.vertex(other).map(|v| &v.kind),
                            Some(VertexKind::Empty { .. })
                        );
                        if !placeholder {
                            return Err(EngineError::InvalidArgument(
                                "array result would overwrite existing cells".to_string(),
                            ));
                        }
                    }
                }
            }
        }

        let previous = self.raw_cell_content(cell);
        self.undo_log.push(InverseCommand::SetCellContents {
            sheet: sheet.to_string(),
            row,
            col,
            previous,
        });

        self.apply_cell_content(cell, new);
        self.evaluation_pending = true;
        self.stats.bump(StatPhase::Operation);
        self.graph.debug_validate();
        Ok(())
    }

    fn apply_cell_content(&mut self, cell: CellRef, new: NewCell) {
        let existing = self.graph.vertex_at(cell);

        // tear down whatever is there now
        let mut was_empty_placeholder = false;
        if let Some(id) = existing {
            let old_kind_info = self.graph.vertex(id).map(|v| {
                (
                    matches!(v.kind, VertexKind::Empty { .. }),
                    v.is_formula_like(),
                    matches!(v.kind, VertexKind::Array { .. }),
                )
            });
            let Some((was_empty, was_formula, was_array)) = old_kind_info else {
                return;
            };
            was_empty_placeholder = was_empty;

            if was_array {
                self.teardown_array_extent(id, cell);
            } else if let Some(old) = self.cached_scalar(id) {
                self.column_search.update(
                    cell.sheet_id,
                    cell.row(),
                    cell.col(),
                    Some(&old),
                    None,
                );
            }
            if was_formula {
                self.graph.unlink_formula(id);
                self.graph.set_volatile(id, false);
                if let Some(ast_id) = self.graph.vertex(id).and_then(|v| v.ast_id()) {
                    self.transforms.release(ast_id);
                }
            }
        }

        match new {
            NewCell::Empty => {
                let Some(id) = existing else {
                    return; // clearing a never-materialized cell is a no-op
                };
                if !was_empty_placeholder {
                    self.graph.cell_left_ranges(id, cell);
                }
                if self.graph.dependents_of(id).is_empty() {
                    self.graph.remove_vertex(id);
                } else {
                    if let Some(v) = self.graph.vertex_mut(id) {
                        v.kind = VertexKind::Empty { cell };
                    }
                    self.graph.mark_dirty(id);
                }
            }
            NewCell::Value(value) => {
                let id = match existing {
                    Some(id) => {
                        if let Some(v) = self.graph.vertex_mut(id) {
                            v.kind = VertexKind::Value { cell, value: value.clone() };
                        }
                        id
                    }
                    None => self.graph.add_vertex(VertexKind::Value {
                        cell,
                        value: value.clone(),
                    }),
                };
                if existing.is_none() || was_empty_placeholder {
                    self.graph.cell_joined_ranges(id, cell);
                }
                self.column_search.update(
                    cell.sheet_id,
                    cell.row(),
                    cell.col(),
                    None,
                    Some(&value),
                );
                self.graph.mark_dirty(id);
            }
            NewCell::Formula { ast } => {
                let volatile = ast.contains_volatile;
                let refs = collect_references(&ast, cell.sheet_id);
                let ast_id = self.transforms.park(ast, cell.sheet_id);
                let kind = VertexKind::Formula {
                    cell,
                    ast: ast_id,
                    value: None,
                    dirty: true,
                    volatile,
                };
                let id = match existing {
                    Some(id) => {
                        if let Some(v) = self.graph.vertex_mut(id) {
                            v.kind = kind;
                        }
                        id
                    }
                    None => self.graph.add_vertex(kind),
                };
                if existing.is_none() || was_empty_placeholder {
                    self.graph.cell_joined_ranges(id, cell);
                }
                self.graph.set_volatile(id, volatile);
                self.graph.link_formula(id, &refs);
                self.graph.mark_dirty(id);
            }
            NewCell::ArrayFormula { ast, dims } => {
                let volatile = ast.contains_volatile;
                let refs = collect_references(&ast, cell.sheet_id);
                let ast_id = self.transforms.park(ast, cell.sheet_id);
                let kind = VertexKind::Array {
                    anchor: cell,
                    dims,
                    ast: ast_id,
                    values: None,
                    dirty: true,
                    volatile,
                };
                let id = match existing {
                    Some(id) => {
                        if let Some(v) = self.graph.vertex_mut(id) {
                            v.kind = kind;
                        }
                        id
                    }
                    None => self.graph.add_vertex(kind),
                };
                // claim the predicted extent; referenced placeholders fold
                // in, handing their readers over to the array
                for r in cell.row()..cell.row() + dims.0 {
                    for c in cell.col()..cell.col() + dims.1 {
                        let covered = CellRef::at(cell.sheet_id, r, c);
                        match self.graph.vertex_at(covered) {
                            Some(other) if other != id => {
                                let readers = self.graph.dependents_of(other).to_vec();
                                self.graph.remove_vertex(other);
                                if let Some(m) =
                                    self.graph.addresses.sheet_mut(cell.sheet_id)
                                {
                                    m.set(r, c, id);
                                }
                                for reader in readers {
                                    self.graph.add_edge(id, reader);
                                }
                            }
                            Some(_) => {}
                            None => {
                                if let Some(m) =
                                    self.graph.addresses.sheet_mut(cell.sheet_id)
                                {
                                    m.set(r, c, id);
                                }
                            }
                        }
                        self.graph.cell_joined_ranges(id, covered);
                    }
                }
                self.graph.set_volatile(id, volatile);
                self.graph.link_formula(id, &refs);
                self.graph.mark_dirty(id);
            }
        }
    }

    /// Current cached scalar of a cell-shaped vertex, for index upkeep.
    fn cached_scalar(&self, id: VertexId) -> Option<CellValue> {
        match self.graph.vertex(id).map(|v| &v.kind)? {
            VertexKind::Value { value, .. } => Some(value.clone()),
            VertexKind::Formula { value, .. } => value.clone(),
            _ => None,
        }
    }

    /// Unmaps an array's covered cells (keeping the anchor address for the
    /// caller to reuse) and clears their index entries.
    fn teardown_array_extent(&mut self, id: VertexId, anchor: CellRef) {
        let Some(VertexKind::Array { dims, values, .. }) =
            self.graph.vertex(id).map(|v| &v.kind)
        else {
            return;
        };
        let dims = *dims;
        let values = values.clone();
        for r in anchor.row()..anchor.row() + dims.0 {
            for c in anchor.col()..anchor.col() + dims.1 {
                let covered = CellRef::at(anchor.sheet_id, r, c);
                let old = values.as_ref().and_then(|g| {
                    g.get((r - anchor.row()) as usize)?
                        .get((c - anchor.col()) as usize)
                        .cloned()
                });
                self.column_search
                    .update(anchor.sheet_id, r, c, old.as_ref(), None);
                if covered == anchor {
                    continue;
                }
                if self.graph.vertex_at(covered) == Some(id) {
                    if let Some(m) = self.graph.addresses.sheet_mut(anchor.sheet_id) {
                        m.remove(r, c);
                    }
                    self.graph.cell_left_ranges(id, covered);
                }
            }
        }
    }

    /* ─────────────────── rows and columns ─────────────────── */

    pub fn add_rows(&mut self, sheet: &str, at: u32, count: u32) -> Result<(), EngineError> {
        self.insert_lines(sheet, Axis::Row, at, count)
    }

    pub fn remove_rows(&mut self, sheet: &str, at: u32, count: u32) -> Result<(), EngineError> {
        self.remove_lines(sheet, Axis::Row, at, count)
    }

    pub fn add_columns(&mut self, sheet: &str, at: u32, count: u32) -> Result<(), EngineError> {
        self.insert_lines(sheet, Axis::Column, at, count)
    }

    pub fn remove_columns(&mut self, sheet: &str, at: u32, count: u32) -> Result<(), EngineError> {
        self.remove_lines(sheet, Axis::Column, at, count)
    }

    fn insert_lines(
        &mut self,
        sheet: &str,
        axis: Axis,
        at: u32,
        count: u32,
    ) -> Result<(), EngineError> {
        let sheet_id = self.resolve_sheet(sheet)?;
        if count == 0 {
            return Ok(());
        }
        let limit = match axis {
            Axis::Row => self.graph.max_rows(),
            Axis::Column => self.graph.max_columns(),
        };
        let entries = self
            .graph
            .addresses
            .sheet(sheet_id)
            .map(|m| m.entries())
            .unwrap_or_default();
        let extent = entries
            .iter()
            .map(|&(r, c, _)| match axis {
                Axis::Row => r,
                Axis::Column => c,
            })
            .max();
        if let Some(extent) = extent {
            let shifts = extent >= at;
            if shifts && extent.saturating_add(count) >= limit {
                return Err(EngineError::SheetSizeLimit {
                    sheet: sheet.to_string(),
                    rows: self.graph.max_rows(),
                    columns: self.graph.max_columns(),
                });
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(sheet, at, count, axis = ?axis, "inserting lines");

        self.undo_log.push(match axis {
            Axis::Row => InverseCommand::RemoveRows {
                sheet: sheet.to_string(),
                at,
                count,
            },
            Axis::Column => InverseCommand::RemoveColumns {
                sheet: sheet.to_string(),
                at,
                count,
            },
        });

        // shift the address book, then the vertices' own notion of where
        // they are
        let moved: Vec<(u32, u32, VertexId)> = entries
            .into_iter()
            .filter(|&(r, c, _)| {
                (match axis {
                    Axis::Row => r,
                    Axis::Column => c,
                }) >= at
            })
            .collect();
        if let Some(mapping) = self.graph.addresses.sheet_mut(sheet_id) {
            match axis {
                Axis::Row => mapping.insert_rows(at, count),
                Axis::Column => mapping.insert_cols(at, count),
            }
        }
        for (r, c, id) in moved {
            self.shift_vertex_cell(id, CellRef::at(sheet_id, r, c), axis, count as i64);
        }

        self.adjust_ranges_for_insert(sheet_id, axis, at, count);

        self.transforms.record(match axis {
            Axis::Row => Transform::RowsAdded {
                sheet: sheet_id,
                row: at,
                count,
            },
            Axis::Column => Transform::ColumnsAdded {
                sheet: sheet_id,
                col: at,
                count,
            },
        });
        self.rebuild_sheet_index(sheet_id);
        self.stats.bump(StatPhase::Transform);
        self.evaluation_pending = true;
        self.check_integrity()?;
        Ok(())
    }

    fn remove_lines(
        &mut self,
        sheet: &str,
        axis: Axis,
        at: u32,
        count: u32,
    ) -> Result<(), EngineError> {
        let sheet_id = self.resolve_sheet(sheet)?;
        if count == 0 {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(sheet, at, count, axis = ?axis, "removing lines");

        self.undo_log.push(match axis {
            Axis::Row => InverseCommand::AddRows {
                sheet: sheet.to_string(),
                at,
                count,
            },
            Axis::Column => InverseCommand::AddColumns {
                sheet: sheet.to_string(),
                at,
                count,
            },
        });

        let entries = self
            .graph
            .addresses
            .sheet(sheet_id)
            .map(|m| m.entries())
            .unwrap_or_default();
        let moved: Vec<(u32, u32, VertexId)> = entries
            .iter()
            .copied()
            .filter(|&(r, c, _)| {
                (match axis {
                    Axis::Row => r,
                    Axis::Column => c,
                }) >= at + count
            })
            .collect();

        let dropped = match (self.graph.addresses.sheet_mut(sheet_id), axis) {
            (Some(mapping), Axis::Row) => mapping.remove_rows(at, count),
            (Some(mapping), Axis::Column) => mapping.remove_cols(at, count),
            (None, _) => Vec::new(),
        };
        let mut seen = rustc_hash::FxHashSet::default();
        for id in dropped {
            if !seen.insert(id) {
                continue;
            }
            let in_band = self
                .graph
                .vertex(id)
                .and_then(|v| v.cell())
                .map(|cell| {
                    let coord = match axis {
                        Axis::Row => cell.row(),
                        Axis::Column => cell.col(),
                    };
                    cell.sheet_id == sheet_id && coord >= at && coord < at + count
                })
                .unwrap_or(false);
            if in_band {
                self.drop_cell_vertex(id);
            }
        }

        for (r, c, id) in moved {
            self.shift_vertex_cell(id, CellRef::at(sheet_id, r, c), axis, -(count as i64));
        }

        self.adjust_ranges_for_removal(sheet_id, axis, at, count);

        self.transforms.record(match axis {
            Axis::Row => Transform::RowsRemoved {
                sheet: sheet_id,
                row: at,
                count,
            },
            Axis::Column => Transform::ColumnsRemoved {
                sheet: sheet_id,
                col: at,
                count,
            },
        });
        self.rebuild_sheet_index(sheet_id);
        self.stats.bump(StatPhase::Transform);
        self.evaluation_pending = true;
        self.check_integrity()?;
        Ok(())
    }

    /// Updates a moved vertex's stored address. Array interiors share the
    /// anchor's id; only the entry matching the vertex's own cell applies.
    fn shift_vertex_cell(&mut self, id: VertexId, old: CellRef, axis: Axis, delta: i64) {
        let Some(vertex) = self.graph.vertex_mut(id) else {
            return;
        };
        if vertex.cell() != Some(old) {
            return;
        }
        let shifted = match axis {
            Axis::Row => CellRef::at(old.sheet_id, (old.row() as i64 + delta) as u32, old.col()),
            Axis::Column => {
                CellRef::at(old.sheet_id, old.row(), (old.col() as i64 + delta) as u32)
            }
        };
        match &mut vertex.kind {
            VertexKind::Empty { cell }
            | VertexKind::Value { cell, .. }
            | VertexKind::Formula { cell, .. } => *cell = shifted,
            VertexKind::Array { anchor, .. } => *anchor = shifted,
            _ => {}
        }
    }

    fn adjust_ranges_for_insert(&mut self, sheet_id: SheetId, axis: Axis, at: u32, count: u32) {
        for (range, rid) in self.graph.ranges.ranges_on_sheet(sheet_id) {
            let (s, e) = match axis {
                Axis::Row => (range.start.row, range.end.row),
                Axis::Column => (range.start.col, range.end.col),
            };
            let new_s = if s >= at { s + count } else { s };
            let new_e = if e != UNBOUNDED && e >= at { e + count } else { e };
            if (new_s, new_e) == (s, e) {
                continue;
            }
            let updated = match axis {
                Axis::Row => RangeRef::new(
                    sheet_id,
                    Coord::relative(new_s, range.start.col),
                    Coord::relative(new_e, range.end.col),
                ),
                Axis::Column => RangeRef::new(
                    sheet_id,
                    Coord::relative(range.start.row, new_s),
                    Coord::relative(range.end.row, new_e),
                ),
            };
            self.rekey_range(rid, range, updated);
        }
    }

    fn adjust_ranges_for_removal(&mut self, sheet_id: SheetId, axis: Axis, at: u32, count: u32) {
        for (range, rid) in self.graph.ranges.ranges_on_sheet(sheet_id) {
            let (s, e) = match axis {
                Axis::Row => (range.start.row, range.end.row),
                Axis::Column => (range.start.col, range.end.col),
            };
            match clamp_axis(s, e, at, count) {
                None => {
                    // the whole rectangle fell inside the removed band
                    self.graph.remove_vertex(rid);
                }
                Some((new_s, new_e)) if (new_s, new_e) != (s, e) => {
                    let updated = match axis {
                        Axis::Row => RangeRef::new(
                            sheet_id,
                            Coord::relative(new_s, range.start.col),
                            Coord::relative(new_e, range.end.col),
                        ),
                        Axis::Column => RangeRef::new(
                            sheet_id,
                            Coord::relative(range.start.row, new_s),
                            Coord::relative(range.end.row, new_e),
                        ),
                    };
                    self.rekey_range(rid, range, updated);
                    self.graph.mark_dirty(rid);
                }
                Some(_) => {}
            }
        }
    }

    fn rekey_range(&mut self, rid: VertexId, old: RangeRef, new: RangeRef) {
        self.graph.ranges.remove(&old, rid);
        self.graph.ranges.insert(new, rid);
        if let Some(VertexKind::Range { range, .. }) =
            self.graph.vertex_mut(rid).map(|v| &mut v.kind)
        {
            *range = new;
        }
    }

    /// Rebuilds the column index for one sheet after a structural shift.
    fn rebuild_sheet_index(&mut self, sheet_id: SheetId) {
        let cells: Vec<(u32, u32, CellValue)> = self
            .graph
            .addresses
            .sheet(sheet_id)
            .map(|m| m.entries())
            .unwrap_or_default()
            .into_iter()
            .map(|(r, c, _)| (r, c, self.graph.cell_value(CellRef::at(sheet_id, r, c))))
            .collect();
        self.column_search.rebuild_sheet(sheet_id, cells);
    }

    /// Structural invariants are enforced after every cascading edit:
    /// a violation is an internal bug, panicking in debug builds and
    /// surfacing as an operation error in release.
    fn check_integrity(&self) -> Result<(), EngineError> {
        if let Err(violation) = self.graph.validate() {
            debug_assert!(false, "dependency graph integrity violation: {violation}");
            return Err(EngineError::Internal(violation));
        }
        Ok(())
    }

    /// Removes a cell/named vertex together with its parked AST.
    fn drop_cell_vertex(&mut self, id: VertexId) {
        if let Some(ast_id) = self.graph.vertex(id).and_then(|v| v.ast_id()) {
            self.transforms.release(ast_id);
        }
        self.graph.remove_vertex(id);
    }

    /* ─────────────────── sheets ─────────────────── */

    pub fn add_sheet(&mut self, name: &str) -> Result<SheetId, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "sheet name must not be empty".to_string(),
            ));
        }
        let Some(id) = self.graph.sheets.add(name) else {
            return Err(EngineError::DuplicateSheet(name.to_string()));
        };
        self.graph
            .addresses
            .add_sheet(id, AddressMapping::sparse());
        self.undo_log.push(InverseCommand::RemoveSheet {
            name: name.to_string(),
        });
        self.stats.bump(StatPhase::Operation);
        self.evaluation_pending = true;
        Ok(id)
    }

    pub fn remove_sheet(&mut self, name: &str) -> Result<(), EngineError> {
        let sheet_id = self.resolve_sheet(name)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(sheet = name, "removing sheet");

        self.undo_log.push(InverseCommand::AddSheet {
            name: name.to_string(),
        });

        let mut seen = rustc_hash::FxHashSet::default();
        let entries = self
            .graph
            .addresses
            .sheet(sheet_id)
            .map(|m| m.entries())
            .unwrap_or_default();
        for (_, _, id) in entries {
            if seen.insert(id) {
                self.drop_cell_vertex(id);
            }
        }
        for (_, rid) in self.graph.ranges.ranges_on_sheet(sheet_id) {
            self.graph.remove_vertex(rid);
        }
        for expr in self.graph.named.remove_sheet_scope(sheet_id) {
            let dependents = self.graph.dependents_of(expr.vertex).to_vec();
            self.graph.park_name_dependents(&expr.name, &dependents);
            self.drop_cell_vertex(expr.vertex);
        }
        self.graph.addresses.remove_sheet(sheet_id);
        self.graph.sheets.remove(sheet_id);
        self.column_search
            .rebuild_sheet(sheet_id, Vec::<(u32, u32, CellValue)>::new());
        self.stats.bump(StatPhase::Operation);
        self.evaluation_pending = true;
        self.check_integrity()?;
        Ok(())
    }

    pub fn rename_sheet(&mut self, name: &str, new_name: &str) -> Result<(), EngineError> {
        let sheet_id = self.resolve_sheet(name)?;
        if new_name.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "sheet name must not be empty".to_string(),
            ));
        }
        if !self.graph.sheets.rename(sheet_id, new_name) {
            return Err(EngineError::DuplicateSheet(new_name.to_string()));
        }
        self.undo_log.push(InverseCommand::RenameSheet {
            from: new_name.to_string(),
            to: name.to_string(),
        });
        self.stats.bump(StatPhase::Operation);
        Ok(())
    }

    /* ─────────────────── named expressions ─────────────────── */

    pub fn add_named_expression(
        &mut self,
        name: &str,
        expression: &str,
        scope_sheet: Option<&str>,
    ) -> Result<(), EngineError> {
        if !is_valid_name(name) {
            return Err(EngineError::NamedExpressionNameInvalid(name.to_string()));
        }
        let scope = match scope_sheet {
            None => NameScope::Workbook,
            Some(sheet) => NameScope::Sheet(self.resolve_sheet(sheet)?),
        };
        if self.graph.named.contains(name, scope) {
            return Err(EngineError::NamedExpressionDuplicate(name.to_string()));
        }
        let body = expression.strip_prefix('=').unwrap_or(expression);
        let ast = self.parse_formula(body).map_err(|e| {
            EngineError::InvalidArgument(format!("cannot parse named expression: {e}"))
        })?;

        self.undo_log.push(InverseCommand::RemoveNamedExpression {
            name: name.to_string(),
            scope_sheet: scope_sheet.map(|s| s.to_string()),
        });

        let host = match scope {
            NameScope::Sheet(id) => id,
            NameScope::Workbook => 0,
        };
        let volatile = ast.contains_volatile;
        let refs = collect_references(&ast, host);
        let ast_id = self.transforms.park(ast, host);
        let vid = self.graph.add_vertex(VertexKind::Named {
            name: name.to_string(),
            scope,
            ast: ast_id,
            value: None,
            dirty: true,
        });
        self.graph.named.add(NamedExpression {
            name: name.to_string(),
            scope,
            vertex: vid,
        });
        self.graph.set_volatile(vid, volatile);
        self.graph.link_formula(vid, &refs);
        for woken in self.graph.resolve_pending_name(name, vid) {
            self.graph.mark_dirty(woken);
        }
        // a sheet-scoped name shadows the workbook one for formulas hosted
        // on that sheet; their edges move over
        if let NameScope::Sheet(scope_sheet) = scope {
            let shadowed = self
                .graph
                .named
                .resolve_scope(name, NameScope::Workbook)
                .map(|e| e.vertex);
            if let Some(global) = shadowed {
                let rerouted: Vec<VertexId> = self
                    .graph
                    .dependents_of(global)
                    .iter()
                    .copied()
                    .filter(|&d| {
                        self.graph
                            .vertex(d)
                            .and_then(|v| v.cell())
                            .map(|c| c.sheet_id == scope_sheet)
                            .unwrap_or(false)
                    })
                    .collect();
                for dependent in rerouted {
                    self.graph.remove_edge(global, dependent);
                    self.graph.add_edge(vid, dependent);
                    self.graph.mark_dirty(dependent);
                }
            }
        }
        self.graph.mark_dirty(vid);
        self.stats.bump(StatPhase::Operation);
        self.evaluation_pending = true;
        self.graph.debug_validate();
        Ok(())
    }

    pub fn remove_named_expression(
        &mut self,
        name: &str,
        scope_sheet: Option<&str>,
    ) -> Result<(), EngineError> {
        let scope = match scope_sheet {
            None => NameScope::Workbook,
            Some(sheet) => NameScope::Sheet(self.resolve_sheet(sheet)?),
        };
        // serialize the expression for the inverse before tearing down
        let Some(expr) = self.graph.named.resolve_scope(name, scope) else {
            return Err(EngineError::InvalidArgument(format!(
                "no named expression '{name}' in this scope"
            )));
        };
        let vid = expr.vertex;
        let expression = self
            .graph
            .vertex(vid)
            .and_then(|v| v.ast_id())
            .and_then(|ast_id| self.transforms.materialized_clone(ast_id))
            .map(|ast| {
                let ctx = super::EngineUnparseContext {
                    sheets: &self.graph.sheets,
                };
                format!("={}", recalc_parse::Unparser::new(&ctx).unparse(&ast))
            })
            .unwrap_or_default();
        self.undo_log.push(InverseCommand::AddNamedExpression {
            name: name.to_string(),
            expression,
            scope_sheet: scope_sheet.map(|s| s.to_string()),
        });

        self.graph.named.remove(name, scope);
        let dependents = self.graph.dependents_of(vid).to_vec();
        self.drop_cell_vertex(vid);
        // readers fall back to whatever the name resolves to now, or wait
        // for it to reappear
        for dependent in dependents {
            let host = self
                .graph
                .vertex(dependent)
                .and_then(|v| v.cell())
                .map(|c| c.sheet_id)
                .unwrap_or(0);
            match self.graph.named.resolve(name, host).map(|e| e.vertex) {
                Some(fallback) => {
                    self.graph.add_edge(fallback, dependent);
                }
                None => self.graph.park_name_dependents(name, &[dependent]),
            }
            self.graph.mark_dirty(dependent);
        }
        self.stats.bump(StatPhase::Operation);
        self.evaluation_pending = true;
        self.graph.debug_validate();
        Ok(())
    }
}
