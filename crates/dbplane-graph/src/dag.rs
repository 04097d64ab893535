//! Resource graph
//!
//! Vertices are kept in insertion order and indexed by object identity. An
//! edge `(after, before)` means `after` is applied once `before` has been.
//! Edges that would close a cycle are rejected when added, so the graph is
//! acyclic at all times.
//!
//! Walking visits prerequisites first using Kahn's algorithm. When several
//! vertices are ready at once the one inserted earliest goes first, which
//! keeps execution order reproducible.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use dbplane_common::{Error, ObjectKey, Result};
use tracing::trace;

use crate::vertex::{Action, ObjectVertex};

/// Position of a vertex in its graph
pub type VertexId = usize;

/// Directed acyclic graph of staged changes for one reconciliation pass
#[derive(Clone, Debug, Default)]
pub struct Dag {
    vertices: Vec<ObjectVertex>,
    index: BTreeMap<ObjectKey, VertexId>,
    edges: BTreeSet<(VertexId, VertexId)>,
    root: Option<VertexId>,
}

impl Dag {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty graph seeded with a copy of another graph's root vertex
    ///
    /// Used to give each member of a parallel transformer group its own graph
    /// that still merges back onto the same root.
    pub fn seeded_from(other: &Dag) -> Self {
        let mut dag = Self::new();
        if let Some(root) = other.root_vertex() {
            let id = dag.push(root.clone());
            dag.root = Some(id);
        }
        dag
    }

    fn push(&mut self, vertex: ObjectVertex) -> VertexId {
        let id = self.vertices.len();
        self.index.insert(vertex.object.key(), id);
        self.vertices.push(vertex);
        id
    }

    /// Add a vertex; fails if one already exists for the same object
    pub fn add_vertex(&mut self, vertex: ObjectVertex) -> Result<VertexId> {
        let key = vertex.object.key();
        if self.index.contains_key(&key) {
            return Err(Error::graph(format!("duplicate vertex for {key}")));
        }
        Ok(self.push(vertex))
    }

    /// Add the root vertex; fails if a root is already set
    pub fn add_root(&mut self, vertex: ObjectVertex) -> Result<VertexId> {
        if self.root.is_some() {
            return Err(Error::graph("root vertex already set"));
        }
        let id = self.add_vertex(vertex)?;
        self.root = Some(id);
        Ok(id)
    }

    /// Add an edge: `after` is applied once `before` has been
    pub fn add_edge(&mut self, after: VertexId, before: VertexId) -> Result<()> {
        self.check_id(after)?;
        self.check_id(before)?;
        if after == before {
            return Err(Error::graph(format!(
                "self edge on {}",
                self.vertices[after].object.key()
            )));
        }
        if self.edges.contains(&(after, before)) {
            return Ok(());
        }
        if self.reaches(before, after) {
            return Err(Error::graph(format!(
                "edge {} -> {} would create a cycle",
                self.vertices[after].object.key(),
                self.vertices[before].object.key()
            )));
        }
        self.edges.insert((after, before));
        Ok(())
    }

    fn check_id(&self, id: VertexId) -> Result<()> {
        if id >= self.vertices.len() {
            return Err(Error::graph(format!("unknown vertex id {id}")));
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` following dependency edges
    fn reaches(&self, from: VertexId, to: VertexId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(v) = stack.pop() {
            if v == to {
                return true;
            }
            if !seen.insert(v) {
                continue;
            }
            stack.extend(self.dependencies(v));
        }
        false
    }

    /// Vertices `id` waits for
    pub fn dependencies(&self, id: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.edges
            .range((id, 0)..=(id, VertexId::MAX))
            .map(|(_, before)| *before)
    }

    /// Vertices in insertion order
    pub fn vertices(&self) -> &[ObjectVertex] {
        &self.vertices
    }

    /// Vertex ids with their vertices, in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (VertexId, &ObjectVertex)> {
        self.vertices.iter().enumerate()
    }

    /// Edges as `(after, before)` pairs
    pub fn edges(&self) -> impl Iterator<Item = (VertexId, VertexId)> + '_ {
        self.edges.iter().copied()
    }

    /// Vertex by id
    pub fn vertex(&self, id: VertexId) -> Option<&ObjectVertex> {
        self.vertices.get(id)
    }

    /// Mutable vertex by id; the object identity must not change
    pub fn vertex_mut(&mut self, id: VertexId) -> Option<&mut ObjectVertex> {
        self.vertices.get_mut(id)
    }

    /// Vertex id for an object identity
    pub fn find(&self, key: &ObjectKey) -> Option<VertexId> {
        self.index.get(key).copied()
    }

    /// Root vertex id
    pub fn root(&self) -> Option<VertexId> {
        self.root
    }

    /// Root vertex
    pub fn root_vertex(&self) -> Option<&ObjectVertex> {
        self.root.and_then(|id| self.vertices.get(id))
    }

    /// Number of vertices
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the graph has no vertices
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Whether executing the graph would write anything
    pub fn has_effect(&self) -> bool {
        self.vertices.iter().any(|v| v.action != Action::Noop)
    }

    /// Union another graph into this one
    ///
    /// Vertices for the same object are unified when their actions agree and
    /// rejected when they differ. A unified vertex keeps this graph's object;
    /// the object staged by `other` for that key is discarded. Edges from
    /// `other` are rewired onto the kept vertex. Nothing changes if the merge
    /// fails.
    pub fn merge(&mut self, other: &Dag) -> Result<()> {
        let mut merged = self.clone();
        let mut mapping = Vec::with_capacity(other.vertices.len());
        for vertex in &other.vertices {
            let key = vertex.object.key();
            match merged.find(&key) {
                Some(existing) => {
                    let action = merged.vertices[existing].action;
                    if action != vertex.action {
                        return Err(Error::graph(format!(
                            "conflicting actions for {key}: {action} and {}",
                            vertex.action
                        )));
                    }
                    mapping.push(existing);
                }
                None => mapping.push(merged.push(vertex.clone())),
            }
        }
        for (after, before) in other.edges() {
            merged.add_edge(mapping[after], mapping[before])?;
        }
        if merged.root.is_none() {
            merged.root = other.root.map(|r| mapping[r]);
        }
        *self = merged;
        Ok(())
    }

    /// Vertex ids ordered so every vertex follows all of its dependencies
    pub fn reverse_topological_order(&self) -> Result<Vec<VertexId>> {
        let mut pending: Vec<usize> = vec![0; self.vertices.len()];
        let mut dependents: BTreeMap<VertexId, Vec<VertexId>> = BTreeMap::new();
        for &(after, before) in &self.edges {
            pending[after] += 1;
            dependents.entry(before).or_default().push(after);
        }

        let mut ready: BTreeSet<VertexId> = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &after in dependents.get(&id).into_iter().flatten() {
                pending[after] -= 1;
                if pending[after] == 0 {
                    ready.insert(after);
                }
            }
        }

        if order.len() != self.vertices.len() {
            let stuck: Vec<String> = pending
                .iter()
                .enumerate()
                .filter(|(_, n)| **n > 0)
                .map(|(id, _)| self.vertices[id].object.key().to_string())
                .collect();
            return Err(Error::graph(format!(
                "cycle detected, stuck vertices: {stuck:?}"
            )));
        }
        Ok(order)
    }

    /// Visit every vertex once, dependencies first; stops at the first error
    pub fn walk_reverse_topological<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(VertexId, &ObjectVertex) -> Result<()>,
    {
        for id in self.reverse_topological_order()? {
            trace!(vertex = %self.vertices[id], "visiting");
            visit(id, &self.vertices[id])?;
        }
        Ok(())
    }

    /// Async form of [`Dag::walk_reverse_topological`]
    ///
    /// Returns the visitor's outputs in visit order.
    pub async fn walk_reverse_topological_async<'a, T, F, Fut>(&'a self, mut visit: F) -> Result<Vec<T>>
    where
        F: FnMut(&'a ObjectVertex) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let order = self.reverse_topological_order()?;
        let mut outputs = Vec::with_capacity(order.len());
        for id in order {
            trace!(vertex = %self.vertices[id], "visiting");
            outputs.push(visit(&self.vertices[id]).await?);
        }
        Ok(outputs)
    }

    /// Check the invariants a finished graph must satisfy
    ///
    /// Every vertex must name a real object, `Update` and `Status` vertices
    /// must carry their original snapshot, and the graph must have a root.
    pub fn validate(&self) -> Result<()> {
        if self.root.is_none() && !self.vertices.is_empty() {
            return Err(Error::invariant("dag", "graph has vertices but no root"));
        }
        for vertex in &self.vertices {
            if vertex.object.name().is_empty() || vertex.object.kind().is_empty() {
                return Err(Error::invariant(
                    "dag",
                    format!("{} vertex has an object without identity", vertex.action),
                ));
            }
            if matches!(vertex.action, Action::Update | Action::Status) && vertex.original.is_none()
            {
                return Err(Error::invariant(
                    "dag",
                    format!("{vertex} has no original snapshot"),
                ));
            }
        }
        self.reverse_topological_order().map(|_| ())
    }
}
