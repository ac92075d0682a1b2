//! Column search strategy for lookup functions.
//!
//! Chosen once at engine construction: `Plain` makes lookups scan the
//! materialized range values; `Indexed` keeps a value -> rows map per
//! (sheet, column), updated on every cached-value write, and answers exact
//! lookups without touching the grid.

use recalc_common::{CellValue, SheetId};
use rustc_hash::FxHashMap;

#[derive(Debug)]
pub enum ColumnSearch {
    Plain,
    Indexed(ColumnIndex),
}

#[derive(Debug, Default)]
pub struct ColumnIndex {
    by_column: FxHashMap<(SheetId, u32), FxHashMap<CellValue, Vec<u32>>>,
}

/// Outcome of an indexed lookup. `Unindexed` tells the caller to fall back
/// to scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(u32),
    NotFound,
    Unindexed,
}

impl ColumnSearch {
    pub fn new(use_column_index: bool) -> Self {
        if use_column_index {
            ColumnSearch::Indexed(ColumnIndex::default())
        } else {
            ColumnSearch::Plain
        }
    }

    /// Records a cached-value change at an address. `None` means absent
    /// (never materialized, or an empty cell).
    pub fn update(
        &mut self,
        sheet: SheetId,
        row: u32,
        col: u32,
        old: Option<&CellValue>,
        new: Option<&CellValue>,
    ) {
        let ColumnSearch::Indexed(index) = self else {
            return;
        };
        if old == new {
            return;
        }
        if let Some(old) = old {
            index.remove(sheet, row, col, old);
        }
        if let Some(new) = new {
            index.insert(sheet, row, col, new);
        }
    }

    /// First row in `row_lo..=row_hi` of `col` holding exactly `needle`.
    pub fn find(
        &self,
        sheet: SheetId,
        col: u32,
        row_lo: u32,
        row_hi: u32,
        needle: &CellValue,
    ) -> SearchOutcome {
        let ColumnSearch::Indexed(index) = self else {
            return SearchOutcome::Unindexed;
        };
        let Some(values) = index.by_column.get(&(sheet, col)) else {
            return SearchOutcome::NotFound;
        };
        let Some(rows) = values.get(needle) else {
            return SearchOutcome::NotFound;
        };
        // rows are kept sorted, so the partition point is the first candidate
        let at = rows.partition_point(|&r| r < row_lo);
        match rows.get(at) {
            Some(&row) if row <= row_hi => SearchOutcome::Found(row),
            _ => SearchOutcome::NotFound,
        }
    }

    /// Drops and re-adds a whole sheet; used after structural edits shift
    /// rows under the index.
    pub fn rebuild_sheet<I>(&mut self, sheet: SheetId, cells: I)
    where
        I: IntoIterator<Item = (u32, u32, CellValue)>,
    {
        let ColumnSearch::Indexed(index) = self else {
            return;
        };
        index.by_column.retain(|(s, _), _| *s != sheet);
        for (row, col, value) in cells {
            index.insert(sheet, row, col, &value);
        }
    }
}

impl ColumnIndex {
    fn insert(&mut self, sheet: SheetId, row: u32, col: u32, value: &CellValue) {
        if matches!(value, CellValue::Empty) {
            return;
        }
        let rows = self
            .by_column
            .entry((sheet, col))
            .or_default()
            .entry(value.clone())
            .or_default();
        let at = rows.partition_point(|&r| r < row);
        if rows.get(at) != Some(&row) {
            rows.insert(at, row);
        }
    }

    fn remove(&mut self, sheet: SheetId, row: u32, col: u32, value: &CellValue) {
        if let Some(values) = self.by_column.get_mut(&(sheet, col)) {
            if let Some(rows) = values.get_mut(value) {
                rows.retain(|&r| r != row);
                if rows.is_empty() {
                    values.remove(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_strategy_reports_unindexed() {
        let search = ColumnSearch::new(false);
        assert_eq!(
            search.find(0, 0, 0, 10, &CellValue::Number(1.0)),
            SearchOutcome::Unindexed
        );
    }

    #[test]
    fn indexed_lookup_respects_row_window() {
        let mut search = ColumnSearch::new(true);
        let v = CellValue::Number(7.0);
        search.update(0, 2, 0, None, Some(&v));
        search.update(0, 8, 0, None, Some(&v));
        assert_eq!(search.find(0, 0, 0, 10, &v), SearchOutcome::Found(2));
        assert_eq!(search.find(0, 0, 3, 10, &v), SearchOutcome::Found(8));
        assert_eq!(search.find(0, 0, 3, 7, &v), SearchOutcome::NotFound);
    }

    #[test]
    fn updates_replace_old_entries() {
        let mut search = ColumnSearch::new(true);
        let old = CellValue::Number(1.0);
        let new = CellValue::Number(2.0);
        search.update(0, 4, 1, None, Some(&old));
        search.update(0, 4, 1, Some(&old), Some(&new));
        assert_eq!(search.find(0, 1, 0, 10, &old), SearchOutcome::NotFound);
        assert_eq!(search.find(0, 1, 0, 10, &new), SearchOutcome::Found(4));
    }
}
