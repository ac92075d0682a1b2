//! Canonical range-vertex registry and the overlap index over it.
//!
//! The index answers two questions the graph needs on every mutation:
//! which range vertices cover a given address (column stripes per sheet,
//! plus a whole-sheet bucket for row-open ranges), and which already
//! materialized range is the longest vertical prefix of a new one
//! (sub-range chaining).

use recalc_common::{CellRef, RangeRef, SheetId, UNBOUNDED};
use rustc_hash::{FxHashMap, FxHashSet};

use super::vertex::VertexId;

#[derive(Debug, Default)]
pub struct RangeMapping {
    by_range: FxHashMap<RangeRef, VertexId>,
    /// (sheet, col) -> range vertices whose rectangle touches that column.
    col_stripes: FxHashMap<(SheetId, u32), FxHashSet<VertexId>>,
    /// Ranges with an unbounded column span (whole-row ranges); they touch
    /// every column of the sheet.
    open_cols: FxHashMap<SheetId, FxHashSet<VertexId>>,
    /// (sheet, start_row, start_col, end_col) -> (end_row, vertex), sorted
    /// by end_row. Feeds vertical prefix chaining.
    prefixes: FxHashMap<(SheetId, u32, u32, u32), Vec<(u32, VertexId)>>,
}

impl RangeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, range: &RangeRef) -> Option<VertexId> {
        self.by_range.get(range).copied()
    }

    pub fn insert(&mut self, range: RangeRef, id: VertexId) {
        self.by_range.insert(range, id);
        if range.end.col == UNBOUNDED {
            self.open_cols.entry(range.sheet_id).or_default().insert(id);
        } else {
            for col in range.start.col..=range.end.col {
                self.col_stripes
                    .entry((range.sheet_id, col))
                    .or_default()
                    .insert(id);
            }
        }
        if range.is_finite() {
            let key = (
                range.sheet_id,
                range.start.row,
                range.start.col,
                range.end.col,
            );
            let chain = self.prefixes.entry(key).or_default();
            let at = chain.partition_point(|&(end_row, _)| end_row < range.end.row);
            chain.insert(at, (range.end.row, id));
        }
    }

    pub fn remove(&mut self, range: &RangeRef, id: VertexId) {
        self.by_range.remove(range);
        if range.end.col == UNBOUNDED {
            if let Some(set) = self.open_cols.get_mut(&range.sheet_id) {
                set.remove(&id);
                if set.is_empty() {
                    self.open_cols.remove(&range.sheet_id);
                }
            }
        } else {
            for col in range.start.col..=range.end.col {
                if let Some(set) = self.col_stripes.get_mut(&(range.sheet_id, col)) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.col_stripes.remove(&(range.sheet_id, col));
                    }
                }
            }
        }
        if range.is_finite() {
            let key = (
                range.sheet_id,
                range.start.row,
                range.start.col,
                range.end.col,
            );
            if let Some(chain) = self.prefixes.get_mut(&key) {
                chain.retain(|&(_, v)| v != id);
                if chain.is_empty() {
                    self.prefixes.remove(&key);
                }
            }
        }
    }

    /// Candidate range vertices whose rectangle may contain `cell`; the
    /// caller still checks the rectangle itself.
    pub fn covering_candidates(&self, cell: CellRef) -> Vec<VertexId> {
        let mut out = Vec::new();
        if let Some(set) = self.col_stripes.get(&(cell.sheet_id, cell.col())) {
            out.extend(set.iter().copied());
        }
        if let Some(set) = self.open_cols.get(&cell.sheet_id) {
            out.extend(set.iter().copied());
        }
        out
    }

    /// The longest already-materialized range sharing `range`'s top edge and
    /// column span but ending on an earlier row. Adding `A1:A100` with
    /// `A1:A10` present links the prefix plus only the delta cells.
    pub fn chain_prefix(&self, range: &RangeRef) -> Option<(VertexId, RangeRef)> {
        if !range.is_finite() {
            return None;
        }
        let key = (
            range.sheet_id,
            range.start.row,
            range.start.col,
            range.end.col,
        );
        let chain = self.prefixes.get(&key)?;
        let at = chain.partition_point(|&(end_row, _)| end_row < range.end.row);
        let (end_row, id) = *chain.get(at.checked_sub(1)?)?;
        Some((
            id,
            RangeRef::new(
                range.sheet_id,
                range.start,
                recalc_common::Coord::relative(end_row, range.end.col),
            ),
        ))
    }

    /// All range vertices on a sheet, for structural adjustment.
    pub fn ranges_on_sheet(&self, sheet: SheetId) -> Vec<(RangeRef, VertexId)> {
        let mut out: Vec<_> = self
            .by_range
            .iter()
            .filter(|(r, _)| r.sheet_id == sheet)
            .map(|(&r, &id)| (r, id))
            .collect();
        out.sort_unstable_by_key(|&(r, _)| (r.start.row, r.start.col, r.end.row, r.end.col));
        out
    }

    pub fn len(&self) -> usize {
        self.by_range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_range.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::vertex::{VertexArena, VertexKind};
    use recalc_common::Coord;

    fn range(sheet: SheetId, r1: u32, c1: u32, r2: u32, c2: u32) -> RangeRef {
        RangeRef::new(sheet, Coord::relative(r1, c1), Coord::relative(r2, c2))
    }

    fn arena_with(n: usize) -> (VertexArena, Vec<VertexId>) {
        let mut arena = VertexArena::new();
        let ids = (0..n)
            .map(|i| {
                arena.insert(VertexKind::Range {
                    range: range(0, 0, 0, i as u32, 0),
                    contributors: Default::default(),
                    chained: None,
                })
            })
            .collect();
        (arena, ids)
    }

    #[test]
    fn covering_uses_column_stripes() {
        let (_, ids) = arena_with(2);
        let mut map = RangeMapping::new();
        map.insert(range(0, 0, 0, 9, 0), ids[0]);
        map.insert(range(0, 0, 2, 9, 3), ids[1]);

        let hits = map.covering_candidates(CellRef::at(0, 5, 0));
        assert_eq!(hits, vec![ids[0]]);
        let hits = map.covering_candidates(CellRef::at(0, 5, 3));
        assert_eq!(hits, vec![ids[1]]);
        assert!(map.covering_candidates(CellRef::at(0, 5, 7)).is_empty());
    }

    #[test]
    fn open_ranges_cover_every_column() {
        let (_, ids) = arena_with(1);
        let mut map = RangeMapping::new();
        let whole_rows = RangeRef::new(
            0,
            Coord::relative(2, 0),
            Coord::new(3, UNBOUNDED, false, false),
        );
        map.insert(whole_rows, ids[0]);
        assert_eq!(map.covering_candidates(CellRef::at(0, 2, 900)), vec![ids[0]]);
    }

    #[test]
    fn chain_prefix_finds_longest_shorter_range() {
        let (_, ids) = arena_with(3);
        let mut map = RangeMapping::new();
        map.insert(range(0, 0, 0, 9, 0), ids[0]); // A1:A10
        map.insert(range(0, 0, 0, 4, 0), ids[1]); // A1:A5

        let (id, prefix) = map.chain_prefix(&range(0, 0, 0, 99, 0)).unwrap();
        assert_eq!(id, ids[0]);
        assert_eq!(prefix.end.row, 9);

        // no prefix for a different column span
        assert!(map.chain_prefix(&range(0, 0, 0, 99, 1)).is_none());
        // a range never chains to itself
        map.insert(range(0, 0, 0, 99, 0), ids[2]);
        let (id, _) = map.chain_prefix(&range(0, 0, 0, 99, 0)).unwrap();
        assert_eq!(id, ids[0]);
    }

    #[test]
    fn remove_cleans_every_index() {
        let (_, ids) = arena_with(1);
        let mut map = RangeMapping::new();
        let r = range(0, 0, 0, 9, 0);
        map.insert(r, ids[0]);
        map.remove(&r, ids[0]);
        assert!(map.is_empty());
        assert!(map.covering_candidates(CellRef::at(0, 1, 0)).is_empty());
        assert!(map.chain_prefix(&range(0, 0, 0, 99, 0)).is_none());
    }
}
