//! Strongly-connected components and evaluation ordering.
//!
//! Tarjan runs restricted to the requested subset (the dirty closure), with
//! an explicit stack so pathological dependency chains cannot overflow the
//! call stack. The condensed component DAG is then ordered with Kahn's
//! algorithm; ties break on (first-dirtying rank, birth) so identical
//! inputs always evaluate in the same order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::{FxHashMap, FxHashSet};

use super::graph::DependencyGraph;
use super::vertex::VertexId;

#[derive(Debug)]
pub struct Component {
    /// Members in insertion (birth) order.
    pub vertices: Vec<VertexId>,
    /// Size > 1, or a single vertex referencing itself.
    pub cyclic: bool,
}

#[derive(Debug)]
pub struct Schedule {
    /// Components in evaluation order: every dependency component comes
    /// before its dependents.
    pub components: Vec<Component>,
}

pub struct Scheduler<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn create_schedule(&self, subset: &[VertexId]) -> Schedule {
        let subset_set: FxHashSet<VertexId> = subset.iter().copied().collect();
        let sccs = self.tarjan(subset, &subset_set);

        let mut component_of: FxHashMap<VertexId, usize> = FxHashMap::default();
        for (idx, scc) in sccs.iter().enumerate() {
            for &v in scc {
                component_of.insert(v, idx);
            }
        }

        let mut components: Vec<Component> = sccs
            .into_iter()
            .map(|mut vertices| {
                vertices.sort_by_key(|&v| self.graph.birth(v));
                let cyclic = vertices.len() > 1
                    || vertices
                        .first()
                        .map(|&v| self.graph.dependencies_of(v).contains(&v))
                        .unwrap_or(false);
                Component { vertices, cyclic }
            })
            .collect();

        // condensation edges, deduplicated
        let mut succs: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); components.len()];
        let mut in_degree = vec![0usize; components.len()];
        for (idx, component) in components.iter().enumerate() {
            for &v in &component.vertices {
                for &dep in self.graph.dependents_of(v) {
                    let Some(&to) = component_of.get(&dep) else {
                        continue;
                    };
                    if to != idx && succs[idx].insert(to) {
                        in_degree[to] += 1;
                    }
                }
            }
        }

        let sort_key = |component: &Component| {
            let rank = component
                .vertices
                .iter()
                .map(|&v| self.graph.dirty_rank(v))
                .min()
                .unwrap_or(u32::MAX);
            let birth = component
                .vertices
                .iter()
                .map(|&v| self.graph.birth(v))
                .min()
                .unwrap_or(u32::MAX);
            (rank, birth)
        };

        let mut heap: BinaryHeap<Reverse<(u32, u32, usize)>> = components
            .iter()
            .enumerate()
            .filter(|&(idx, _)| in_degree[idx] == 0)
            .map(|(idx, c)| {
                let (rank, birth) = sort_key(c);
                Reverse((rank, birth, idx))
            })
            .collect();

        let mut order = Vec::with_capacity(components.len());
        while let Some(Reverse((_, _, idx))) = heap.pop() {
            order.push(idx);
            for &to in &succs[idx] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    let (rank, birth) = sort_key(&components[to]);
                    heap.push(Reverse((rank, birth, to)));
                }
            }
        }
        debug_assert_eq!(order.len(), components.len());

        // take components out in the chosen order
        let mut slots: Vec<Option<Component>> = components.drain(..).map(Some).collect();
        Schedule {
            components: order
                .into_iter()
                .filter_map(|idx| slots[idx].take())
                .collect(),
        }
    }

    /// Iterative Tarjan over the subset; successors are dependencies, so
    /// components pop in dependencies-first order.
    fn tarjan(&self, subset: &[VertexId], subset_set: &FxHashSet<VertexId>) -> Vec<Vec<VertexId>> {
        let mut index_counter = 0usize;
        let mut indices: FxHashMap<VertexId, usize> = FxHashMap::default();
        let mut lowlinks: FxHashMap<VertexId, usize> = FxHashMap::default();
        let mut on_stack: FxHashSet<VertexId> = FxHashSet::default();
        let mut stack: Vec<VertexId> = Vec::new();
        let mut sccs: Vec<Vec<VertexId>> = Vec::new();

        // (vertex, next dependency index to look at)
        let mut frames: Vec<(VertexId, usize)> = Vec::new();

        for &root in subset {
            if indices.contains_key(&root) {
                continue;
            }
            frames.push((root, 0));
            while let Some(&(v, child)) = frames.last() {
                if child == 0 {
                    indices.insert(v, index_counter);
                    lowlinks.insert(v, index_counter);
                    index_counter += 1;
                    stack.push(v);
                    on_stack.insert(v);
                }
                let deps = self.graph.dependencies_of(v);
                let mut advanced = false;
                let mut next = child;
                while next < deps.len() {
                    let dep = deps[next];
                    next += 1;
                    if !subset_set.contains(&dep) {
                        continue;
                    }
                    if !indices.contains_key(&dep) {
                        frames.last_mut().unwrap().1 = next;
                        frames.push((dep, 0));
                        advanced = true;
                        break;
                    }
                    if on_stack.contains(&dep) {
                        let low = lowlinks[&v].min(indices[&dep]);
                        lowlinks.insert(v, low);
                    }
                }
                if advanced {
                    continue;
                }
                // v is finished
                frames.pop();
                if let Some(&(parent, _)) = frames.last() {
                    let low = lowlinks[&parent].min(lowlinks[&v]);
                    lowlinks.insert(parent, low);
                }
                if lowlinks[&v] == indices[&v] {
                    let mut scc = Vec::new();
                    loop {
                        let w = stack.pop().unwrap();
                        on_stack.remove(&w);
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    sccs.push(scc);
                }
            }
        }
        sccs
    }
}
