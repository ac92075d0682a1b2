//! Deferred rewrites of parked formula ASTs after structural edits.
//!
//! Row/column insertion or deletion must shift references in every parked
//! formula. Instead of rewriting all of them eagerly, each structural edit
//! appends a [`Transform`] to a log, and each AST remembers the log version
//! it was parsed (or last advanced) at. When an AST is actually needed it
//! catches up: the pending suffix of the log is applied in order, mutating
//! references in place; references into a deleted region become `#REF!`
//! literal nodes. Catch-up is idempotent because the version moves with it.

use recalc_common::{SheetId, UNBOUNDED};
use recalc_parse::{AstKind, AstNode};

/// Handle to an AST parked in the service.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AstId(u32);

impl AstId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One structural edit, as it affects parked references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    RowsAdded { sheet: SheetId, row: u32, count: u32 },
    RowsRemoved { sheet: SheetId, row: u32, count: u32 },
    ColumnsAdded { sheet: SheetId, col: u32, count: u32 },
    ColumnsRemoved { sheet: SheetId, col: u32, count: u32 },
}

impl Transform {
    /// The transform that undoes this one. Content removed by a deletion is
    /// not resurrected here; undo bookkeeping restores it separately.
    pub fn inverse(&self) -> Transform {
        match *self {
            Transform::RowsAdded { sheet, row, count } => {
                Transform::RowsRemoved { sheet, row, count }
            }
            Transform::RowsRemoved { sheet, row, count } => {
                Transform::RowsAdded { sheet, row, count }
            }
            Transform::ColumnsAdded { sheet, col, count } => {
                Transform::ColumnsRemoved { sheet, col, count }
            }
            Transform::ColumnsRemoved { sheet, col, count } => {
                Transform::ColumnsAdded { sheet, col, count }
            }
        }
    }
}

#[derive(Debug)]
struct Parked {
    node: AstNode,
    /// Sheet the owning formula lives on; resolves sheet-relative
    /// references during rewriting.
    host_sheet: SheetId,
    version: u32,
}

#[derive(Debug, Default)]
pub struct TransformService {
    log: Vec<Transform>,
    asts: Vec<Option<Parked>>,
    free: Vec<u32>,
}

impl TransformService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current log version; ASTs parked now are already up to date.
    pub fn version(&self) -> u32 {
        self.log.len() as u32
    }

    pub fn record(&mut self, transform: Transform) {
        self.log.push(transform);
    }

    pub fn park(&mut self, node: AstNode, host_sheet: SheetId) -> AstId {
        let parked = Parked {
            node,
            host_sheet,
            version: self.version(),
        };
        if let Some(index) = self.free.pop() {
            self.asts[index as usize] = Some(parked);
            AstId(index)
        } else {
            self.asts.push(Some(parked));
            AstId(self.asts.len() as u32 - 1)
        }
    }

    pub fn release(&mut self, id: AstId) {
        if let Some(slot) = self.asts.get_mut(id.index()) {
            if slot.take().is_some() {
                self.free.push(id.0);
            }
        }
    }

    /// Catches the AST up with the log and returns it.
    pub fn materialize(&mut self, id: AstId) -> Option<&AstNode> {
        let parked = self.asts.get_mut(id.index())?.as_mut()?;
        let pending = &self.log[parked.version as usize..];
        for transform in pending {
            apply(transform, &mut parked.node, parked.host_sheet);
        }
        parked.version = self.log.len() as u32;
        Some(&parked.node)
    }

    pub fn materialized_clone(&mut self, id: AstId) -> Option<AstNode> {
        self.materialize(id).cloned()
    }

    /// Log version the AST currently sits at.
    pub fn ast_version(&self, id: AstId) -> Option<u32> {
        self.asts.get(id.index())?.as_ref().map(|p| p.version)
    }

    pub fn len(&self) -> usize {
        self.asts.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Applies one transform to one AST, rewriting references in place.
fn apply(transform: &Transform, node: &mut AstNode, host_sheet: SheetId) {
    let dangling = match &mut node.kind {
        AstKind::CellRef(r) => {
            let sheet = r.sheet.unwrap_or(host_sheet);
            match *transform {
                Transform::RowsAdded { sheet: s, row, count } if s == sheet => {
                    if r.coord.row >= row {
                        r.coord = shifted(r.coord, count as i64, 0);
                    }
                    false
                }
                Transform::RowsRemoved { sheet: s, row, count } if s == sheet => {
                    if r.coord.row >= row + count {
                        r.coord = shifted(r.coord, -(count as i64), 0);
                        false
                    } else {
                        r.coord.row >= row
                    }
                }
                Transform::ColumnsAdded { sheet: s, col, count } if s == sheet => {
                    if r.coord.col >= col {
                        r.coord = shifted(r.coord, 0, count as i64);
                    }
                    false
                }
                Transform::ColumnsRemoved { sheet: s, col, count } if s == sheet => {
                    if r.coord.col >= col + count {
                        r.coord = shifted(r.coord, 0, -(count as i64));
                        false
                    } else {
                        r.coord.col >= col
                    }
                }
                _ => false,
            }
        }
        AstKind::RangeRef(r) => {
            let sheet = r.sheet.unwrap_or(host_sheet);
            match *transform {
                Transform::RowsAdded { sheet: s, row, count } if s == sheet => {
                    if r.start.row >= row {
                        r.start = shifted(r.start, count as i64, 0);
                    }
                    if r.end.row != UNBOUNDED && r.end.row >= row {
                        r.end = shifted(r.end, count as i64, 0);
                    }
                    false
                }
                Transform::RowsRemoved { sheet: s, row, count } if s == sheet => {
                    clamp_axis(r.start.row, r.end.row, row, count)
                        .map(|(s_new, e_new)| {
                            r.start = recalc_common::Coord::new(
                                s_new,
                                r.start.col,
                                r.start.row_abs(),
                                r.start.col_abs(),
                            );
                            r.end = recalc_common::Coord::new(
                                e_new,
                                r.end.col,
                                r.end.row_abs(),
                                r.end.col_abs(),
                            );
                        })
                        .is_none()
                }
                Transform::ColumnsAdded { sheet: s, col, count } if s == sheet => {
                    if r.start.col >= col {
                        r.start = shifted(r.start, 0, count as i64);
                    }
                    if r.end.col != UNBOUNDED && r.end.col >= col {
                        r.end = shifted(r.end, 0, count as i64);
                    }
                    false
                }
                Transform::ColumnsRemoved { sheet: s, col, count } if s == sheet => {
                    clamp_axis(r.start.col, r.end.col, col, count)
                        .map(|(s_new, e_new)| {
                            r.start = recalc_common::Coord::new(
                                r.start.row,
                                s_new,
                                r.start.row_abs(),
                                r.start.col_abs(),
                            );
                            r.end = recalc_common::Coord::new(
                                r.end.row,
                                e_new,
                                r.end.row_abs(),
                                r.end.col_abs(),
                            );
                        })
                        .is_none()
                }
                _ => false,
            }
        }
        AstKind::Unary { expr, .. } => {
            apply(transform, expr, host_sheet);
            false
        }
        AstKind::Binary { left, right, .. } => {
            apply(transform, left, host_sheet);
            apply(transform, right, host_sheet);
            false
        }
        AstKind::Function { args, .. } => {
            for arg in args {
                apply(transform, arg, host_sheet);
            }
            false
        }
        AstKind::Array(rows) => {
            for row in rows {
                for item in row {
                    apply(transform, item, host_sheet);
                }
            }
            false
        }
        AstKind::Literal(_) | AstKind::NamedRef(_) => false,
    };
    if dangling {
        *node = AstNode::ref_error();
    }
}

fn shifted(coord: recalc_common::Coord, drow: i64, dcol: i64) -> recalc_common::Coord {
    recalc_common::Coord::new(
        (coord.row as i64 + drow) as u32,
        (coord.col as i64 + dcol) as u32,
        coord.row_abs(),
        coord.col_abs(),
    )
}

/// Clamps one axis of a range against removal of `count` lines starting at
/// `at`. Returns the adjusted `(start, end)` or `None` when the whole span
/// fell inside the removed band. `end == UNBOUNDED` stays open.
pub(crate) fn clamp_axis(s: u32, e: u32, at: u32, count: u32) -> Option<(u32, u32)> {
    let hi = at + count;
    if e != UNBOUNDED && s >= at && e < hi {
        return None;
    }
    let new_s = if s >= hi {
        s - count
    } else if s >= at {
        at
    } else {
        s
    };
    let new_e = if e == UNBOUNDED {
        e
    } else if e >= hi {
        e - count
    } else if e >= at {
        // at > 0 here: s < at or the whole span would have been removed
        at - 1
    } else {
        e
    };
    if new_e != UNBOUNDED && new_s > new_e {
        return None;
    }
    Some((new_s, new_e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recalc_common::{CellValue, Coord, ErrorKind};
    use recalc_parse::{CellReference, RangeReference};

    fn cell_ast(row: u32, col: u32) -> AstNode {
        AstNode::new(
            AstKind::CellRef(CellReference {
                sheet: None,
                coord: Coord::relative(row, col),
            }),
            false,
        )
    }

    fn range_ast(r1: u32, c1: u32, r2: u32, c2: u32) -> AstNode {
        AstNode::new(
            AstKind::RangeRef(RangeReference {
                sheet: None,
                start: Coord::relative(r1, c1),
                end: Coord::relative(r2, c2),
            }),
            false,
        )
    }

    fn cell_coord(node: &AstNode) -> (u32, u32) {
        match &node.kind {
            AstKind::CellRef(r) => (r.coord.row, r.coord.col),
            other => panic!("not a cell ref: {other:?}"),
        }
    }

    #[test]
    fn lazy_catch_up_shifts_references() {
        let mut svc = TransformService::new();
        let id = svc.park(cell_ast(4, 1), 0);
        svc.record(Transform::RowsAdded {
            sheet: 0,
            row: 2,
            count: 3,
        });
        // another sheet's edit leaves the AST alone
        svc.record(Transform::RowsAdded {
            sheet: 7,
            row: 0,
            count: 9,
        });
        assert_eq!(cell_coord(svc.materialize(id).unwrap()), (7, 1));
    }

    #[test]
    fn catch_up_is_idempotent() {
        let mut svc = TransformService::new();
        let id = svc.park(cell_ast(4, 1), 0);
        svc.record(Transform::RowsAdded {
            sheet: 0,
            row: 0,
            count: 1,
        });
        let once = svc.materialized_clone(id).unwrap();
        let twice = svc.materialized_clone(id).unwrap();
        assert_eq!(once, twice);
        assert_eq!(svc.ast_version(id), Some(1));
    }

    #[test]
    fn deleted_reference_becomes_ref_error() {
        let mut svc = TransformService::new();
        let id = svc.park(cell_ast(4, 1), 0);
        svc.record(Transform::RowsRemoved {
            sheet: 0,
            row: 3,
            count: 2,
        });
        let node = svc.materialize(id).unwrap();
        assert!(matches!(
            &node.kind,
            AstKind::Literal(CellValue::Error(e)) if e.kind == ErrorKind::Ref
        ));
    }

    #[test]
    fn ranges_shrink_at_the_cut() {
        let mut svc = TransformService::new();
        let id = svc.park(range_ast(0, 0, 9, 0), 0);
        svc.record(Transform::RowsRemoved {
            sheet: 0,
            row: 5,
            count: 10,
        });
        match &svc.materialize(id).unwrap().kind {
            AstKind::RangeRef(r) => {
                assert_eq!(r.start.row, 0);
                assert_eq!(r.end.row, 4);
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn fully_deleted_range_dangles() {
        let mut svc = TransformService::new();
        let id = svc.park(range_ast(3, 0, 4, 0), 0);
        svc.record(Transform::RowsRemoved {
            sheet: 0,
            row: 2,
            count: 5,
        });
        assert!(matches!(
            &svc.materialize(id).unwrap().kind,
            AstKind::Literal(CellValue::Error(e)) if e.kind == ErrorKind::Ref
        ));
    }

    #[test]
    fn column_transforms_mirror_row_transforms() {
        let mut svc = TransformService::new();
        let id = svc.park(cell_ast(0, 5), 0);
        svc.record(Transform::ColumnsAdded {
            sheet: 0,
            col: 0,
            count: 2,
        });
        svc.record(Transform::ColumnsRemoved {
            sheet: 0,
            col: 0,
            count: 1,
        });
        assert_eq!(cell_coord(svc.materialize(id).unwrap()), (0, 6));
    }

    #[test]
    fn inverse_round_trips() {
        let t = Transform::RowsAdded {
            sheet: 1,
            row: 4,
            count: 2,
        };
        assert_eq!(t.inverse().inverse(), t);
    }

    #[test]
    fn release_reuses_slots() {
        let mut svc = TransformService::new();
        let a = svc.park(cell_ast(0, 0), 0);
        svc.release(a);
        let b = svc.park(cell_ast(1, 1), 0);
        assert_eq!(a, b);
        assert_eq!(svc.len(), 1);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Version gating makes catch-up idempotent for any log.
            #[test]
            fn catch_up_is_idempotent_for_any_log(
                row in 0u32..500,
                col in 0u32..50,
                edits in proptest::collection::vec((0u32..500, 1u32..5, 0u8..4), 0..8),
            ) {
                let mut svc = TransformService::new();
                let id = svc.park(cell_ast(row, col), 0);
                for (at, count, kind) in edits {
                    svc.record(match kind {
                        0 => Transform::RowsAdded { sheet: 0, row: at, count },
                        1 => Transform::RowsRemoved { sheet: 0, row: at, count },
                        2 => Transform::ColumnsAdded { sheet: 0, col: at, count },
                        _ => Transform::ColumnsRemoved { sheet: 0, col: at, count },
                    });
                }
                let once = svc.materialized_clone(id).unwrap();
                let twice = svc.materialized_clone(id).unwrap();
                prop_assert_eq!(once, twice);
                prop_assert_eq!(svc.ast_version(id), Some(svc.version()));
            }

            /// Removing lines never produces an inverted range.
            #[test]
            fn clamped_spans_stay_ordered(
                s in 0u32..100,
                len in 0u32..100,
                at in 0u32..120,
                count in 1u32..40,
            ) {
                let e = s + len;
                if let Some((new_s, new_e)) = clamp_axis(s, e, at, count) {
                    prop_assert!(new_s <= new_e);
                    prop_assert!(new_e <= e);
                }
            }
        }
    }
}
