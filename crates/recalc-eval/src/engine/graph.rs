//! The dependency graph: typed vertices, directed edges, dirty tracking.
//!
//! Edges run dependency -> dependent: if `B1` contains `=A1+1` there is an
//! edge `A1 -> B1`. Range vertices broker fan-in; named expressions hang
//! off their own vertices. Every mutation keeps the address book, the range
//! overlap index and the contributor sets in lockstep; `validate` checks
//! exactly that and mutating operations assert it in debug builds.

use recalc_common::{CellRef, CellValue, Coord, ErrorKind, RangeRef, SheetId};
use recalc_parse::{AstKind, AstNode};
use rustc_hash::{FxHashMap, FxHashSet};

use super::address_mapping::AddressBook;
use super::named::NamedExpressionStore;
use super::range_mapping::RangeMapping;
use super::sheet_registry::SheetRegistry;
use super::vertex::{Vertex, VertexArena, VertexId, VertexKind};

/// References a formula AST makes, deduplicated, with sheet-relative
/// entries resolved against the host sheet.
#[derive(Debug, Default, Clone)]
pub struct RefCollection {
    pub cells: Vec<CellRef>,
    pub ranges: Vec<RangeRef>,
    pub names: Vec<String>,
}

/// Walks an AST and collects every reference in it.
pub fn collect_references(ast: &AstNode, host_sheet: SheetId) -> RefCollection {
    let mut out = RefCollection::default();
    let mut seen_cells = FxHashSet::default();
    let mut seen_ranges = FxHashSet::default();
    let mut seen_names = FxHashSet::default();
    walk(ast, host_sheet, &mut |reference| match reference {
        Collected::Cell(cell) => {
            if seen_cells.insert(cell) {
                out.cells.push(cell);
            }
        }
        Collected::Range(range) => {
            if seen_ranges.insert(range) {
                out.ranges.push(range);
            }
        }
        Collected::Name(name) => {
            if seen_names.insert(name.to_lowercase()) {
                out.names.push(name.to_string());
            }
        }
    });
    out
}

enum Collected<'a> {
    Cell(CellRef),
    Range(RangeRef),
    Name(&'a str),
}

fn walk<'a>(ast: &'a AstNode, host_sheet: SheetId, f: &mut impl FnMut(Collected<'a>)) {
    match &ast.kind {
        AstKind::CellRef(r) => {
            let sheet = r.sheet.unwrap_or(host_sheet);
            f(Collected::Cell(CellRef::at(sheet, r.coord.row, r.coord.col)));
        }
        AstKind::RangeRef(r) => {
            let sheet = r.sheet.unwrap_or(host_sheet);
            f(Collected::Range(RangeRef::new(
                sheet,
                Coord::relative(r.start.row, r.start.col),
                Coord::relative(r.end.row, r.end.col),
            )));
        }
        AstKind::NamedRef(name) => f(Collected::Name(name)),
        AstKind::Unary { expr, .. } => walk(expr, host_sheet, f),
        AstKind::Binary { left, right, .. } => {
            walk(left, host_sheet, f);
            walk(right, host_sheet, f);
        }
        AstKind::Function { args, .. } => {
            for arg in args {
                walk(arg, host_sheet, f);
            }
        }
        AstKind::Array(rows) => {
            for row in rows {
                for item in row {
                    walk(item, host_sheet, f);
                }
            }
        }
        AstKind::Literal(_) => {}
    }
}

#[derive(Debug)]
pub struct DependencyGraph {
    arena: VertexArena,
    pub(crate) sheets: SheetRegistry,
    pub(crate) addresses: AddressBook,
    pub(crate) ranges: RangeMapping,
    pub(crate) named: NamedExpressionStore,
    /// Formulas referencing a name that does not exist yet; linked and
    /// dirtied when the name appears.
    pending_name_refs: FxHashMap<String, FxHashSet<VertexId>>,
    dirty: FxHashSet<VertexId>,
    dirty_rank: FxHashMap<VertexId, u32>,
    dirty_counter: u32,
    volatile: FxHashSet<VertexId>,
    max_rows: u32,
    max_columns: u32,
}

impl DependencyGraph {
    pub fn new(max_rows: u32, max_columns: u32) -> Self {
        Self {
            arena: VertexArena::new(),
            sheets: SheetRegistry::new(),
            addresses: AddressBook::default(),
            ranges: RangeMapping::new(),
            named: NamedExpressionStore::new(),
            pending_name_refs: FxHashMap::default(),
            dirty: FxHashSet::default(),
            dirty_rank: FxHashMap::default(),
            dirty_counter: 0,
            volatile: FxHashSet::default(),
            max_rows,
            max_columns,
        }
    }

    pub fn max_rows(&self) -> u32 {
        self.max_rows
    }

    pub fn max_columns(&self) -> u32 {
        self.max_columns
    }

    pub fn in_bounds(&self, row: u32, col: u32) -> bool {
        row < self.max_rows && col < self.max_columns
    }

    /* ─────────────────────── vertex access ─────────────────────── */

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.arena.get(id)
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut Vertex> {
        self.arena.get_mut(id)
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.arena.contains(id)
    }

    pub fn vertex_count(&self) -> usize {
        self.arena.len()
    }

    pub fn birth(&self, id: VertexId) -> u32 {
        self.arena.get(id).map(|v| v.birth).unwrap_or(u32::MAX)
    }

    pub fn vertex_at(&self, cell: CellRef) -> Option<VertexId> {
        self.addresses
            .sheet(cell.sheet_id)?
            .get(cell.row(), cell.col())
    }

    /// All formula-carrying vertices, ascending birth.
    pub fn formula_vertices(&self) -> Vec<VertexId> {
        let mut out: Vec<VertexId> = self
            .arena
            .iter()
            .filter(|(_, v)| v.is_formula_like())
            .map(|(id, _)| id)
            .collect();
        out.sort_by_key(|&id| self.birth(id));
        out
    }

    pub fn add_vertex(&mut self, kind: VertexKind) -> VertexId {
        let cell = match &kind {
            VertexKind::Empty { cell }
            | VertexKind::Value { cell, .. }
            | VertexKind::Formula { cell, .. } => Some(*cell),
            VertexKind::Array { anchor, .. } => Some(*anchor),
            _ => None,
        };
        let volatile = matches!(
            &kind,
            VertexKind::Formula { volatile: true, .. } | VertexKind::Array { volatile: true, .. }
        );
        let id = self.arena.insert(kind);
        if let Some(cell) = cell {
            if let Some(mapping) = self.addresses.sheet_mut(cell.sheet_id) {
                mapping.set(cell.row(), cell.col(), id);
            }
        }
        if volatile {
            self.volatile.insert(id);
        }
        id
    }

    /// Removes a vertex and cascades: placeholder/range dependencies left
    /// without dependents are collected too. Dependents of the removed
    /// vertex are marked dirty.
    pub fn remove_vertex(&mut self, id: VertexId) -> Option<Vertex> {
        let vertex = self.arena.get(id)?.clone();

        for dep in &vertex.dependents {
            if let Some(v) = self.arena.get_mut(*dep) {
                v.dependencies.retain(|&d| d != id);
            }
        }
        let dependents = vertex.dependents.clone();

        let mut to_collect = Vec::new();
        for dep in &vertex.dependencies {
            if let Some(v) = self.arena.get_mut(*dep) {
                v.dependents.retain(|&d| d != id);
                if v.dependents.is_empty() && v.is_collectible() {
                    to_collect.push(*dep);
                }
            }
        }

        // detach bookkeeping for this vertex's own shape
        match &vertex.kind {
            VertexKind::Range { range, .. } => {
                self.ranges.remove(range, id);
            }
            VertexKind::Empty { cell }
            | VertexKind::Value { cell, .. }
            | VertexKind::Formula { cell, .. } => {
                if let Some(mapping) = self.addresses.sheet_mut(cell.sheet_id) {
                    if mapping.get(cell.row(), cell.col()) == Some(id) {
                        mapping.remove(cell.row(), cell.col());
                    }
                }
                if !matches!(vertex.kind, VertexKind::Empty { .. }) {
                    self.cell_left_ranges(id, *cell);
                }
            }
            VertexKind::Array { anchor, dims, .. } => {
                for row in anchor.row()..anchor.row() + dims.0 {
                    for col in anchor.col()..anchor.col() + dims.1 {
                        let covered = CellRef::at(anchor.sheet_id, row, col);
                        if let Some(mapping) = self.addresses.sheet_mut(anchor.sheet_id) {
                            if mapping.get(row, col) == Some(id) {
                                mapping.remove(row, col);
                            }
                        }
                        self.cell_left_ranges(id, covered);
                    }
                }
            }
            VertexKind::Named { .. } => {}
        }

        self.dirty.remove(&id);
        self.dirty_rank.remove(&id);
        self.volatile.remove(&id);
        for (_, waiting) in self.pending_name_refs.iter_mut() {
            waiting.remove(&id);
        }

        let removed = self.arena.remove(id);

        for dep in dependents {
            self.mark_dirty(dep);
        }
        for candidate in to_collect {
            self.collect_if_orphaned(candidate);
        }
        removed
    }

    /// Collects a placeholder or range vertex once nothing depends on it.
    pub fn collect_if_orphaned(&mut self, id: VertexId) {
        let collectible = self
            .arena
            .get(id)
            .map(|v| v.is_collectible() && v.dependents.is_empty())
            .unwrap_or(false);
        if collectible {
            self.remove_vertex(id);
        }
    }

    /* ─────────────────────────── edges ─────────────────────────── */

    /// Adds `from -> to`; idempotent. Returns false when either endpoint is
    /// gone.
    pub fn add_edge(&mut self, from: VertexId, to: VertexId) -> bool {
        if !self.arena.contains(from) || !self.arena.contains(to) {
            return false;
        }
        let from_vertex = self.arena.get_mut(from).unwrap();
        if !from_vertex.dependents.contains(&to) {
            from_vertex.dependents.push(to);
        }
        let to_vertex = self.arena.get_mut(to).unwrap();
        if !to_vertex.dependencies.contains(&from) {
            to_vertex.dependencies.push(from);
        }
        true
    }

    pub fn remove_edge(&mut self, from: VertexId, to: VertexId) {
        if let Some(v) = self.arena.get_mut(from) {
            v.dependents.retain(|&d| d != to);
        }
        if let Some(v) = self.arena.get_mut(to) {
            v.dependencies.retain(|&d| d != from);
        }
    }

    pub fn dependencies_of(&self, id: VertexId) -> &[VertexId] {
        self.arena
            .get(id)
            .map(|v| v.dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: VertexId) -> &[VertexId] {
        self.arena
            .get(id)
            .map(|v| v.dependents.as_slice())
            .unwrap_or(&[])
    }

    /* ─────────────────────── dirty tracking ─────────────────────── */

    /// Marks a vertex and, transitively, everything that depends on it.
    /// Idempotent; records first-dirtying order for the scheduler.
    pub fn mark_dirty(&mut self, id: VertexId) {
        let mut to_visit = vec![id];
        let mut visited = FxHashSet::default();
        while let Some(current) = to_visit.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(vertex) = self.arena.get_mut(current) else {
                continue;
            };
            vertex.set_dirty(true);
            to_visit.extend(vertex.dependents.iter().copied());
            if self.dirty.insert(current) {
                self.dirty_rank.insert(current, self.dirty_counter);
                self.dirty_counter += 1;
            }
        }
    }

    /// Rank of the first dirtying in the current generation; used to break
    /// scheduling ties deterministically.
    pub fn dirty_rank(&self, id: VertexId) -> u32 {
        self.dirty_rank.get(&id).copied().unwrap_or(u32::MAX)
    }

    pub fn is_dirty(&self, id: VertexId) -> bool {
        self.dirty.contains(&id)
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn set_volatile(&mut self, id: VertexId, volatile: bool) {
        if volatile {
            self.volatile.insert(id);
        } else {
            self.volatile.remove(&id);
        }
    }

    pub fn volatile_vertices(&self) -> Vec<VertexId> {
        let mut out: Vec<VertexId> = self.volatile.iter().copied().collect();
        out.sort_by_key(|&id| self.birth(id));
        out
    }

    /// Re-marks every volatile vertex dirty ahead of a pass.
    pub fn redirty_volatiles(&mut self) {
        for id in self.volatile_vertices() {
            self.mark_dirty(id);
        }
    }

    /// The dirty closure as the scheduler needs it: everything that
    /// evaluates, plus dirty range vertices: a cycle can run through a
    /// range (a formula inside the rectangle it consumes), so ranges must
    /// be visible to component detection even though they never evaluate.
    /// Ascending birth.
    pub fn evaluation_vertices(&self) -> Vec<VertexId> {
        let mut out: Vec<VertexId> = self
            .dirty
            .iter()
            .copied()
            .filter(|&id| {
                self.arena
                    .get(id)
                    .map(|v| {
                        v.is_formula_like() || matches!(v.kind, VertexKind::Range { .. })
                    })
                    .unwrap_or(false)
            })
            .collect();
        out.sort_by_key(|&id| self.birth(id));
        out
    }

    /// Clears dirty state after a pass.
    pub fn clear_dirty(&mut self, ids: &[VertexId]) {
        for &id in ids {
            if let Some(v) = self.arena.get_mut(id) {
                v.set_dirty(false);
            }
            self.dirty.remove(&id);
            self.dirty_rank.remove(&id);
        }
    }

    /// Drops non-formula vertices from the dirty set (they carry no work).
    pub fn flush_non_formula_dirty(&mut self) {
        let stale: Vec<VertexId> = self
            .dirty
            .iter()
            .copied()
            .filter(|&id| {
                !self
                    .arena
                    .get(id)
                    .map(|v| v.is_formula_like())
                    .unwrap_or(false)
            })
            .collect();
        for id in stale {
            self.dirty.remove(&id);
            self.dirty_rank.remove(&id);
        }
    }

    /* ─────────────────────── value reads ─────────────────────── */

    /// The value a formula read of `cell` observes right now.
    pub fn cell_value(&self, cell: CellRef) -> CellValue {
        if !self.sheets.contains(cell.sheet_id) {
            return CellValue::Error(ErrorKind::Ref.into());
        }
        let Some(id) = self.vertex_at(cell) else {
            return CellValue::Empty;
        };
        let Some(vertex) = self.arena.get(id) else {
            return CellValue::Empty;
        };
        match &vertex.kind {
            VertexKind::Array { anchor, values, .. } => values
                .as_ref()
                .and_then(|rows| {
                    let r = cell.row().checked_sub(anchor.row())? as usize;
                    let c = cell.col().checked_sub(anchor.col())? as usize;
                    rows.get(r)?.get(c).cloned()
                })
                .unwrap_or(CellValue::Empty),
            _ => vertex.cached_value(),
        }
    }

    /// Clamps a possibly open range to the sheet's used bounds. `None` for
    /// an open range over an empty sheet.
    pub fn clamped_rect(&self, range: &RangeRef) -> Option<(u32, u32, u32, u32)> {
        let (mut end_row, mut end_col) = (range.end.row, range.end.col);
        if !range.is_finite() {
            let (used_row, used_col) = self
                .addresses
                .sheet(range.sheet_id)
                .and_then(|m| m.used_bounds())?;
            if end_row == recalc_common::UNBOUNDED {
                end_row = used_row;
            }
            if end_col == recalc_common::UNBOUNDED {
                end_col = used_col;
            }
        }
        if end_row < range.start.row || end_col < range.start.col {
            return None;
        }
        Some((range.start.row, range.start.col, end_row, end_col))
    }

    pub fn range_values(&self, range: &RangeRef) -> Vec<Vec<CellValue>> {
        let Some((r1, c1, r2, c2)) = self.clamped_rect(range) else {
            return vec![vec![CellValue::Empty]];
        };
        (r1..=r2)
            .map(|row| {
                (c1..=c2)
                    .map(|col| self.cell_value(CellRef::at(range.sheet_id, row, col)))
                    .collect()
            })
            .collect()
    }

    pub fn named_value(&self, name: &str, sheet: SheetId) -> Option<CellValue> {
        let expr = self.named.resolve(name, sheet)?;
        self.arena.get(expr.vertex).map(|v| v.cached_value())
    }

    /* ─────────────────── formula linking ─────────────────── */

    /// Materializes every reference a formula makes and wires the edges.
    pub fn link_formula(&mut self, id: VertexId, refs: &RefCollection) {
        for &cell in &refs.cells {
            if !self.in_bounds(cell.row(), cell.col()) {
                continue;
            }
            let Some(cell_id) = self.materialize_cell(cell) else {
                continue;
            };
            self.add_edge(cell_id, id);
        }
        for range in &refs.ranges {
            if !self.sheets.contains(range.sheet_id) {
                continue;
            }
            let range_id = self.materialize_range(*range);
            self.add_edge(range_id, id);
        }
        for name in &refs.names {
            let host = self
                .arena
                .get(id)
                .and_then(|v| v.cell())
                .map(|c| c.sheet_id)
                .unwrap_or(0);
            if let Some(expr) = self.named.resolve(name, host) {
                let from = expr.vertex;
                self.add_edge(from, id);
            } else {
                self.pending_name_refs
                    .entry(name.to_lowercase())
                    .or_default()
                    .insert(id);
            }
        }
    }

    /// Drops every dependency edge of a formula, collecting orphaned
    /// placeholders and ranges.
    pub fn unlink_formula(&mut self, id: VertexId) {
        let deps = self
            .arena
            .get(id)
            .map(|v| v.dependencies.clone())
            .unwrap_or_default();
        for dep in deps {
            self.remove_edge(dep, id);
            self.collect_if_orphaned(dep);
        }
        for (_, waiting) in self.pending_name_refs.iter_mut() {
            waiting.remove(&id);
        }
    }

    /// Looks up or creates the vertex backing an address referenced by a
    /// formula; absent addresses materialize as empty placeholders.
    pub fn materialize_cell(&mut self, cell: CellRef) -> Option<VertexId> {
        if !self.sheets.contains(cell.sheet_id) {
            return None;
        }
        if let Some(id) = self.vertex_at(cell) {
            return Some(id);
        }
        Some(self.add_vertex(VertexKind::Empty { cell }))
    }

    /// Looks up or creates the range vertex for a rectangle, chaining onto
    /// the longest existing vertical prefix.
    pub fn materialize_range(&mut self, range: RangeRef) -> VertexId {
        if let Some(id) = self.ranges.get(&range) {
            return id;
        }
        let chain = self.ranges.chain_prefix(&range);
        let id = self.add_vertex(VertexKind::Range {
            range,
            contributors: FxHashSet::default(),
            chained: chain.map(|(cid, _)| cid),
        });
        self.ranges.insert(range, id);

        // contributors: every materialized non-empty cell in the rectangle
        let mut contributors = Vec::new();
        if let Some(mapping) = self.addresses.sheet(range.sheet_id) {
            for (row, col, cell_id) in mapping.entries() {
                if cell_id == id {
                    continue;
                }
                if !range.contains(CellRef::at(range.sheet_id, row, col)) {
                    continue;
                }
                let non_empty = self
                    .arena
                    .get(cell_id)
                    .map(|v| !matches!(v.kind, VertexKind::Empty { .. }))
                    .unwrap_or(false);
                if non_empty {
                    contributors.push((row, cell_id));
                }
            }
        }

        let delta_from = match &chain {
            Some((chain_id, prefix)) => {
                self.add_edge(*chain_id, id);
                Some(prefix.end.row)
            }
            None => None,
        };
        for &(row, cell_id) in &contributors {
            let chained_covers = delta_from.map(|end| row <= end).unwrap_or(false);
            if !chained_covers {
                self.add_edge(cell_id, id);
            }
        }
        if let Some(VertexKind::Range {
            contributors: set, ..
        }) = self.arena.get_mut(id).map(|v| &mut v.kind)
        {
            set.extend(contributors.iter().map(|&(_, cid)| cid));
        }
        id
    }

    /// Wires a newly non-empty cell into every range vertex covering it.
    /// Skips the direct edge when a chained prefix of the range already
    /// carries it.
    pub fn cell_joined_ranges(&mut self, id: VertexId, cell: CellRef) {
        for range_id in self.ranges.covering_candidates(cell) {
            let Some(VertexKind::Range { range, chained, .. }) =
                self.arena.get(range_id).map(|v| &v.kind)
            else {
                continue;
            };
            if !range.contains(cell) {
                continue;
            }
            let chained = *chained;
            let covered_by_chain = chained
                .and_then(|cid| self.arena.get(cid))
                .and_then(|v| match &v.kind {
                    VertexKind::Range { range, .. } => Some(range.contains(cell)),
                    _ => None,
                })
                .unwrap_or(false);
            if !covered_by_chain {
                self.add_edge(id, range_id);
            }
            if let Some(VertexKind::Range { contributors, .. }) =
                self.arena.get_mut(range_id).map(|v| &mut v.kind)
            {
                contributors.insert(id);
            }
            self.mark_dirty(range_id);
        }
    }

    /// Unwires a cell that became empty (or disappeared) from covering
    /// ranges. An array vertex stays a contributor while any of its other
    /// covered cells remains inside the rectangle.
    pub fn cell_left_ranges(&mut self, id: VertexId, cell: CellRef) {
        let multi_cell = matches!(
            self.arena.get(id).map(|v| &v.kind),
            Some(VertexKind::Array { .. })
        );
        for range_id in self.ranges.covering_candidates(cell) {
            let rect = match self.arena.get(range_id).map(|v| &v.kind) {
                Some(VertexKind::Range { range, .. }) if range.contains(cell) => *range,
                _ => continue,
            };
            if multi_cell {
                let still_inside = self
                    .addresses
                    .sheet(cell.sheet_id)
                    .map(|mapping| {
                        mapping.entries().iter().any(|&(r, c, vid)| {
                            vid == id
                                && (r, c) != (cell.row(), cell.col())
                                && rect.contains(CellRef::at(cell.sheet_id, r, c))
                        })
                    })
                    .unwrap_or(false);
                if still_inside {
                    continue;
                }
            }
            self.remove_edge(id, range_id);
            if let Some(VertexKind::Range { contributors, .. }) =
                self.arena.get_mut(range_id).map(|v| &mut v.kind)
            {
                contributors.remove(&id);
            }
            self.mark_dirty(range_id);
        }
    }

    /// Links formulas that were waiting for a name to exist; returns them
    /// so the caller can dirty them.
    pub fn resolve_pending_name(&mut self, name: &str, vertex: VertexId) -> Vec<VertexId> {
        let Some(waiting) = self.pending_name_refs.remove(&name.to_lowercase()) else {
            return Vec::new();
        };
        let mut linked = Vec::new();
        for formula in waiting {
            if self.add_edge(vertex, formula) {
                linked.push(formula);
            }
        }
        linked
    }

    /// Re-parks a formula's dependents under the pending-name map after its
    /// named expression goes away.
    pub fn park_name_dependents(&mut self, name: &str, dependents: &[VertexId]) {
        let entry = self
            .pending_name_refs
            .entry(name.to_lowercase())
            .or_default();
        entry.extend(dependents.iter().copied());
    }

    /* ─────────────────── cached value writes ─────────────────── */

    /// Stores a computed scalar on a formula or named vertex, returning the
    /// previous cached value.
    pub fn store_value(&mut self, id: VertexId, value: CellValue) -> Option<CellValue> {
        match self.arena.get_mut(id).map(|v| &mut v.kind) {
            Some(VertexKind::Formula { value: slot, .. })
            | Some(VertexKind::Named { value: slot, .. }) => slot.replace(value),
            _ => None,
        }
    }

    /* ─────────────────────── integrity ─────────────────────── */

    /// Structural invariant check. Violations are internal bugs: callers
    /// panic in debug builds and surface an internal error in release.
    pub fn validate(&self) -> Result<(), String> {
        for (id, vertex) in self.arena.iter() {
            for &dep in &vertex.dependencies {
                let Some(dv) = self.arena.get(dep) else {
                    return Err(format!("{id:?} depends on missing vertex {dep:?}"));
                };
                if !dv.dependents.contains(&id) {
                    return Err(format!("asymmetric edge {dep:?} -> {id:?}"));
                }
            }
            for &dep in &vertex.dependents {
                let Some(dv) = self.arena.get(dep) else {
                    return Err(format!("{id:?} feeds missing vertex {dep:?}"));
                };
                if !dv.dependencies.contains(&id) {
                    return Err(format!("asymmetric edge {id:?} -> {dep:?}"));
                }
            }
            if let Some(cell) = vertex.cell() {
                if !matches!(vertex.kind, VertexKind::Array { .. }) {
                    let mapped = self.vertex_at(cell);
                    if mapped != Some(id) {
                        return Err(format!(
                            "address book maps {cell:?} to {mapped:?}, vertex is {id:?}"
                        ));
                    }
                }
            }
            if let VertexKind::Range {
                range,
                contributors,
                ..
            } = &vertex.kind
            {
                let mut expected = FxHashSet::default();
                if let Some(mapping) = self.addresses.sheet(range.sheet_id) {
                    for (row, col, cell_id) in mapping.entries() {
                        if cell_id == id || !range.contains(CellRef::at(range.sheet_id, row, col))
                        {
                            continue;
                        }
                        let non_empty = self
                            .arena
                            .get(cell_id)
                            .map(|v| !matches!(v.kind, VertexKind::Empty { .. }))
                            .unwrap_or(false);
                        if non_empty {
                            expected.insert(cell_id);
                        }
                    }
                }
                if &expected != contributors {
                    return Err(format!(
                        "range {range:?} contributors drifted: expected {expected:?}, have {contributors:?}"
                    ));
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        if let Err(violation) = self.validate() {
            panic!("dependency graph integrity violation: {violation}");
        }
    }
}
