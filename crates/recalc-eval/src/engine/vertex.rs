//! Graph vertices and the generational arena that owns them.

use recalc_common::{CellRef, CellValue, RangeRef};
use rustc_hash::FxHashSet;

use super::named::NameScope;
use super::transform::AstId;

/// Engine-internal vertex identity.
///
/// Generational: a freed slot bumps its generation, so a stale id held
/// across a removal resolves to `None` instead of the slot's new occupant.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct VertexId {
    index: u32,
    generation: u32,
}

impl VertexId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

#[derive(Debug, Clone)]
pub enum VertexKind {
    /// An implicitly created placeholder for a cell that is referenced but
    /// holds no content.
    Empty { cell: CellRef },

    /// Literal cell content.
    Value { cell: CellRef, value: CellValue },

    /// Formula evaluating to a scalar.
    Formula {
        cell: CellRef,
        ast: AstId,
        value: Option<CellValue>,
        dirty: bool,
        volatile: bool,
    },

    /// Formula returning an array; occupies the `dims` rectangle anchored
    /// at `anchor`.
    Array {
        anchor: CellRef,
        dims: (u32, u32),
        ast: AstId,
        values: Option<Vec<Vec<CellValue>>>,
        dirty: bool,
        volatile: bool,
    },

    /// Aggregate over a rectangle; exists while at least one formula
    /// consumes the range. `contributors` tracks the materialized non-empty
    /// cells inside the rectangle; `chained` is the reused sub-range, if
    /// any.
    Range {
        range: RangeRef,
        contributors: FxHashSet<VertexId>,
        chained: Option<VertexId>,
    },

    /// A named expression's vertex.
    Named {
        name: String,
        scope: NameScope,
        ast: AstId,
        value: Option<CellValue>,
        dirty: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub kind: VertexKind,
    /// What this vertex depends on (incoming edges).
    pub dependencies: Vec<VertexId>,
    /// What depends on this vertex (outgoing edges).
    pub dependents: Vec<VertexId>,
    /// Creation sequence number; "insertion order" everywhere in the engine
    /// means ascending birth.
    pub birth: u32,
}

impl Vertex {
    fn new(kind: VertexKind, birth: u32) -> Self {
        Self {
            kind,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            birth,
        }
    }

    /// The cell address of a cell-shaped vertex.
    pub fn cell(&self) -> Option<CellRef> {
        match &self.kind {
            VertexKind::Empty { cell }
            | VertexKind::Value { cell, .. }
            | VertexKind::Formula { cell, .. } => Some(*cell),
            VertexKind::Array { anchor, .. } => Some(*anchor),
            VertexKind::Range { .. } | VertexKind::Named { .. } => None,
        }
    }

    pub fn is_formula_like(&self) -> bool {
        matches!(
            self.kind,
            VertexKind::Formula { .. } | VertexKind::Array { .. } | VertexKind::Named { .. }
        )
    }

    pub fn is_dirty(&self) -> bool {
        match &self.kind {
            VertexKind::Formula { dirty, .. }
            | VertexKind::Array { dirty, .. }
            | VertexKind::Named { dirty, .. } => *dirty,
            _ => false,
        }
    }

    pub fn set_dirty(&mut self, value: bool) {
        match &mut self.kind {
            VertexKind::Formula { dirty, .. }
            | VertexKind::Array { dirty, .. }
            | VertexKind::Named { dirty, .. } => *dirty = value,
            _ => {}
        }
    }

    pub fn is_volatile(&self) -> bool {
        match &self.kind {
            VertexKind::Formula { volatile, .. } | VertexKind::Array { volatile, .. } => *volatile,
            _ => false,
        }
    }

    pub fn ast_id(&self) -> Option<AstId> {
        match &self.kind {
            VertexKind::Formula { ast, .. }
            | VertexKind::Array { ast, .. }
            | VertexKind::Named { ast, .. } => Some(*ast),
            _ => None,
        }
    }

    /// The value a read of this vertex observes right now.
    pub fn cached_value(&self) -> CellValue {
        match &self.kind {
            VertexKind::Empty { .. } => CellValue::Empty,
            VertexKind::Value { value, .. } => value.clone(),
            VertexKind::Formula { value, .. } | VertexKind::Named { value, .. } => {
                value.clone().unwrap_or(CellValue::Empty)
            }
            VertexKind::Array { values, .. } => values
                .as_ref()
                .and_then(|rows| rows.first())
                .and_then(|row| row.first())
                .cloned()
                .unwrap_or(CellValue::Empty),
            VertexKind::Range { .. } => CellValue::Empty,
        }
    }

    /// Whether removal should keep the vertex alive when nothing depends on
    /// it: placeholders and range aggregates carry no content of their own.
    pub fn is_collectible(&self) -> bool {
        matches!(
            self.kind,
            VertexKind::Empty { .. } | VertexKind::Range { .. }
        )
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    vertex: Option<Vertex>,
}

/// Slot arena with a free list; handles are (index, generation) pairs.
#[derive(Debug, Default)]
pub struct VertexArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    births: u32,
    live: usize,
}

impl VertexArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: VertexKind) -> VertexId {
        let birth = self.births;
        self.births += 1;
        self.live += 1;
        let vertex = Vertex::new(kind, birth);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.vertex = Some(vertex);
            VertexId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                vertex: Some(vertex),
            });
            VertexId::new(index, 0)
        }
    }

    pub fn remove(&mut self, id: VertexId) -> Option<Vertex> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation || slot.vertex.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        self.free.push(id.index() as u32);
        slot.vertex.take()
    }

    pub fn get(&self, id: VertexId) -> Option<&Vertex> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.vertex.as_ref()
    }

    pub fn get_mut(&mut self, id: VertexId) -> Option<&mut Vertex> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.vertex.as_mut()
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexId, &Vertex)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.vertex
                .as_ref()
                .map(|v| (VertexId::new(i as u32, slot.generation), v))
        })
    }

    /// Live vertex ids, ascending birth.
    pub fn ids_by_birth(&self) -> Vec<VertexId> {
        let mut ids: Vec<VertexId> = self.iter().map(|(id, _)| id).collect();
        ids.sort_by_key(|&id| self.get(id).map(|v| v.birth).unwrap_or(u32::MAX));
        ids
    }
}
