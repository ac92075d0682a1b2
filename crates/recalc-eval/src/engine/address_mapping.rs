//! Per-sheet storage of cell vertices by (row, col).
//!
//! Two strategies, fixed for the sheet's lifetime: a dense 2-D vector for
//! sheets that arrive mostly full, a hash map otherwise. `get` returning
//! `None` means the address was never materialized, which is distinct from
//! an explicit empty-placeholder vertex.

use recalc_common::SheetId;
use rustc_hash::FxHashMap;

use super::vertex::VertexId;

#[derive(Debug)]
pub enum AddressMapping {
    Dense(DenseMapping),
    Sparse(SparseMapping),
}

#[derive(Debug)]
pub struct DenseMapping {
    rows: Vec<Vec<Option<VertexId>>>,
    width: usize,
    len: usize,
}

#[derive(Debug, Default)]
pub struct SparseMapping {
    cells: FxHashMap<(u32, u32), VertexId>,
}

impl AddressMapping {
    pub fn dense(height: u32, width: u32) -> Self {
        AddressMapping::Dense(DenseMapping {
            rows: vec![vec![None; width as usize]; height as usize],
            width: width as usize,
            len: 0,
        })
    }

    pub fn sparse() -> Self {
        AddressMapping::Sparse(SparseMapping::default())
    }

    pub fn get(&self, row: u32, col: u32) -> Option<VertexId> {
        match self {
            AddressMapping::Dense(m) => m
                .rows
                .get(row as usize)
                .and_then(|r| r.get(col as usize))
                .copied()
                .flatten(),
            AddressMapping::Sparse(m) => m.cells.get(&(row, col)).copied(),
        }
    }

    pub fn set(&mut self, row: u32, col: u32, id: VertexId) {
        match self {
            AddressMapping::Dense(m) => {
                let (row, col) = (row as usize, col as usize);
                if row >= m.rows.len() {
                    m.rows.resize_with(row + 1, || vec![None; m.width]);
                }
                if col >= m.width {
                    m.width = col + 1;
                    for r in &mut m.rows {
                        r.resize(m.width, None);
                    }
                }
                if m.rows[row][col].is_none() {
                    m.len += 1;
                }
                m.rows[row][col] = Some(id);
            }
            AddressMapping::Sparse(m) => {
                m.cells.insert((row, col), id);
            }
        }
    }

    pub fn remove(&mut self, row: u32, col: u32) -> Option<VertexId> {
        match self {
            AddressMapping::Dense(m) => {
                let slot = m
                    .rows
                    .get_mut(row as usize)
                    .and_then(|r| r.get_mut(col as usize))?;
                let old = slot.take();
                if old.is_some() {
                    m.len -= 1;
                }
                old
            }
            AddressMapping::Sparse(m) => m.cells.remove(&(row, col)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AddressMapping::Dense(m) => m.len,
            AddressMapping::Sparse(m) => m.cells.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All materialized cells as `(row, col, id)`.
    pub fn entries(&self) -> Vec<(u32, u32, VertexId)> {
        match self {
            AddressMapping::Dense(m) => {
                let mut out = Vec::with_capacity(m.len);
                for (r, row) in m.rows.iter().enumerate() {
                    for (c, slot) in row.iter().enumerate() {
                        if let Some(id) = slot {
                            out.push((r as u32, c as u32, *id));
                        }
                    }
                }
                out
            }
            AddressMapping::Sparse(m) => {
                let mut out: Vec<_> = m
                    .cells
                    .iter()
                    .map(|(&(r, c), &id)| (r, c, id))
                    .collect();
                out.sort_unstable_by_key(|&(r, c, _)| (r, c));
                out
            }
        }
    }

    pub fn row_entries(&self, row: u32) -> Vec<(u32, VertexId)> {
        self.entries()
            .into_iter()
            .filter(|&(r, _, _)| r == row)
            .map(|(_, c, id)| (c, id))
            .collect()
    }

    pub fn col_entries(&self, col: u32) -> Vec<(u32, VertexId)> {
        self.entries()
            .into_iter()
            .filter(|&(_, c, _)| c == col)
            .map(|(r, _, id)| (r, id))
            .collect()
    }

    /// Greatest used (row, col), or `None` for an empty sheet.
    pub fn used_bounds(&self) -> Option<(u32, u32)> {
        let mut bounds = None;
        for (r, c, _) in self.entries() {
            let (mr, mc) = bounds.get_or_insert((r, c));
            if r > *mr {
                *mr = r;
            }
            if c > *mc {
                *mc = c;
            }
        }
        bounds
    }

    /// Shifts every cell at `row >= at` down by `count`.
    pub fn insert_rows(&mut self, at: u32, count: u32) {
        match self {
            AddressMapping::Dense(m) => {
                let at = (at as usize).min(m.rows.len());
                for _ in 0..count {
                    m.rows.insert(at, vec![None; m.width]);
                }
            }
            AddressMapping::Sparse(m) => {
                m.cells = m
                    .cells
                    .drain()
                    .map(|((r, c), id)| ((if r >= at { r + count } else { r }, c), id))
                    .collect();
            }
        }
    }

    /// Drops rows `at .. at + count` and shifts the rest up. Returns the
    /// vertices that were inside the dropped band.
    pub fn remove_rows(&mut self, at: u32, count: u32) -> Vec<VertexId> {
        let mut dropped = Vec::new();
        match self {
            AddressMapping::Dense(m) => {
                let lo = (at as usize).min(m.rows.len());
                let hi = ((at + count) as usize).min(m.rows.len());
                for row in m.rows.drain(lo..hi) {
                    for id in row.into_iter().flatten() {
                        dropped.push(id);
                        m.len -= 1;
                    }
                }
            }
            AddressMapping::Sparse(m) => {
                m.cells = m
                    .cells
                    .drain()
                    .filter_map(|((r, c), id)| {
                        if r >= at && r < at + count {
                            dropped.push(id);
                            None
                        } else if r >= at + count {
                            Some(((r - count, c), id))
                        } else {
                            Some(((r, c), id))
                        }
                    })
                    .collect();
            }
        }
        dropped
    }

    pub fn insert_cols(&mut self, at: u32, count: u32) {
        match self {
            AddressMapping::Dense(m) => {
                let at = (at as usize).min(m.width);
                m.width += count as usize;
                for row in &mut m.rows {
                    for _ in 0..count {
                        row.insert(at, None);
                    }
                }
            }
            AddressMapping::Sparse(m) => {
                m.cells = m
                    .cells
                    .drain()
                    .map(|((r, c), id)| ((r, if c >= at { c + count } else { c }), id))
                    .collect();
            }
        }
    }

    pub fn remove_cols(&mut self, at: u32, count: u32) -> Vec<VertexId> {
        let mut dropped = Vec::new();
        match self {
            AddressMapping::Dense(m) => {
                let lo = (at as usize).min(m.width);
                let hi = ((at + count) as usize).min(m.width);
                for row in &mut m.rows {
                    for id in row.drain(lo..hi).flatten() {
                        dropped.push(id);
                        m.len -= 1;
                    }
                }
                m.width -= hi - lo;
            }
            AddressMapping::Sparse(m) => {
                m.cells = m
                    .cells
                    .drain()
                    .filter_map(|((r, c), id)| {
                        if c >= at && c < at + count {
                            dropped.push(id);
                            None
                        } else if c >= at + count {
                            Some(((r, c - count), id))
                        } else {
                            Some(((r, c), id))
                        }
                    })
                    .collect();
            }
        }
        dropped
    }
}

/// The per-engine collection of sheet mappings.
#[derive(Debug, Default)]
pub struct AddressBook {
    sheets: FxHashMap<SheetId, AddressMapping>,
}

impl AddressBook {
    pub fn add_sheet(&mut self, sheet: SheetId, mapping: AddressMapping) {
        self.sheets.insert(sheet, mapping);
    }

    pub fn remove_sheet(&mut self, sheet: SheetId) -> Option<AddressMapping> {
        self.sheets.remove(&sheet)
    }

    pub fn sheet(&self, sheet: SheetId) -> Option<&AddressMapping> {
        self.sheets.get(&sheet)
    }

    pub fn sheet_mut(&mut self, sheet: SheetId) -> Option<&mut AddressMapping> {
        self.sheets.get_mut(&sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::vertex::{VertexArena, VertexKind};
    use recalc_common::CellRef;

    fn ids(n: u32) -> Vec<VertexId> {
        let mut arena = VertexArena::new();
        (0..n)
            .map(|i| {
                arena.insert(VertexKind::Empty {
                    cell: CellRef::at(0, i, 0),
                })
            })
            .collect()
    }

    fn both() -> Vec<AddressMapping> {
        vec![AddressMapping::dense(4, 4), AddressMapping::sparse()]
    }

    #[test]
    fn strategies_agree_on_basic_ops() {
        let v = ids(2);
        for mut m in both() {
            assert_eq!(m.get(1, 1), None);
            m.set(1, 1, v[0]);
            m.set(3, 2, v[1]);
            assert_eq!(m.get(1, 1), Some(v[0]));
            assert_eq!(m.len(), 2);
            assert_eq!(m.used_bounds(), Some((3, 2)));
            assert_eq!(m.remove(1, 1), Some(v[0]));
            assert_eq!(m.get(1, 1), None);
            assert_eq!(m.len(), 1);
        }
    }

    #[test]
    fn strategies_agree_on_row_shifts() {
        let v = ids(3);
        for mut m in both() {
            m.set(0, 0, v[0]);
            m.set(2, 1, v[1]);
            m.set(5, 0, v[2]);
            m.insert_rows(1, 2);
            assert_eq!(m.get(0, 0), Some(v[0]));
            assert_eq!(m.get(4, 1), Some(v[1]));
            assert_eq!(m.get(7, 0), Some(v[2]));

            let dropped = m.remove_rows(3, 2);
            assert_eq!(dropped, vec![v[1]]);
            assert_eq!(m.get(5, 0), Some(v[2]));
        }
    }

    #[test]
    fn strategies_agree_on_col_shifts() {
        let v = ids(2);
        for mut m in both() {
            m.set(0, 0, v[0]);
            m.set(0, 3, v[1]);
            m.insert_cols(1, 1);
            assert_eq!(m.get(0, 0), Some(v[0]));
            assert_eq!(m.get(0, 4), Some(v[1]));
            let dropped = m.remove_cols(0, 1);
            assert_eq!(dropped, vec![v[0]]);
            assert_eq!(m.get(0, 3), Some(v[1]));
        }
    }

    #[test]
    fn row_and_column_iteration() {
        let v = ids(3);
        for mut m in both() {
            m.set(0, 0, v[0]);
            m.set(0, 2, v[1]);
            m.set(2, 0, v[2]);
            assert_eq!(m.row_entries(0), vec![(0, v[0]), (2, v[1])]);
            assert_eq!(m.col_entries(0), vec![(0, v[0]), (2, v[2])]);
            assert!(m.row_entries(5).is_empty());
        }
    }

    #[test]
    fn dense_grows_on_demand() {
        let v = ids(1);
        let mut m = AddressMapping::dense(2, 2);
        m.set(10, 7, v[0]);
        assert_eq!(m.get(10, 7), Some(v[0]));
    }
}
