//! The physical DAG: vertices wrapping processor factories, joined by
//! edges that carry the routing contract for the execution runtime.

use crate::error::{PlanError, Result};
use crate::function::KeyFn;
use crate::processor::ProcessorMetaSupplier;
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a vertex within its DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub(crate) usize);

impl VertexId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A physical node.
#[derive(Debug, Clone)]
pub struct Vertex {
    name: String,
    meta_supplier: ProcessorMetaSupplier,
    local_parallelism: Option<usize>,
}

impl Vertex {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta_supplier(&self) -> &ProcessorMetaSupplier {
        &self.meta_supplier
    }

    /// Explicit instances per member, if overridden.
    pub fn local_parallelism(&self) -> Option<usize> {
        self.local_parallelism
    }
}

/// What an item is partitioned by.
#[derive(Clone)]
pub enum PartitionKey {
    /// A user-supplied key function.
    User(KeyFn),
    /// The key of a `[key, value]` entry.
    EntryKey,
}

impl PartitionKey {
    pub fn extract(&self, item: &Value) -> Value {
        match self {
            PartitionKey::User(key_fn) => key_fn(item),
            PartitionKey::EntryKey => item.entry_key(),
        }
    }
}

impl fmt::Debug for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::User(_) => f.write_str("User(..)"),
            PartitionKey::EntryKey => f.write_str("EntryKey"),
        }
    }
}

/// How items travel from the source vertex to destination instances.
#[derive(Debug, Clone, Default)]
pub enum Routing {
    /// Each item goes to exactly one destination instance of the runtime's
    /// choosing.
    #[default]
    Unicast,
    /// Items with equal keys go to the same destination instance.
    Partitioned(PartitionKey),
    /// Every destination instance receives every item.
    Broadcast,
}

impl Routing {
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Routing::Partitioned(_))
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Routing::Broadcast)
    }

    /// Label used in textual and serialized descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            Routing::Unicast => "unicast",
            Routing::Partitioned(PartitionKey::User(_)) => "partitioned(key)",
            Routing::Partitioned(PartitionKey::EntryKey) => "partitioned(entry-key)",
            Routing::Broadcast => "broadcast",
        }
    }
}

/// A physical connection.
#[derive(Debug, Clone)]
pub struct Edge {
    source: VertexId,
    source_ordinal: usize,
    destination: VertexId,
    destination_ordinal: usize,
    routing: Routing,
    distributed: bool,
    priority: i32,
}

impl Edge {
    /// Edge from ordinal 0 of `source` to ordinal 0 of `destination`.
    pub fn between(source: VertexId, destination: VertexId) -> Self {
        Self::from(source, 0).to(destination, 0)
    }

    /// Start an edge at `source`'s output `ordinal`.
    pub fn from(source: VertexId, ordinal: usize) -> EdgeBuilder {
        EdgeBuilder { source, ordinal }
    }

    /// Cross member boundaries.
    pub fn distributed(mut self) -> Self {
        self.distributed = true;
        self
    }

    pub fn partitioned(mut self, key_fn: KeyFn) -> Self {
        self.routing = Routing::Partitioned(PartitionKey::User(key_fn));
        self
    }

    pub fn partitioned_by_entry_key(mut self) -> Self {
        self.routing = Routing::Partitioned(PartitionKey::EntryKey);
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.routing = Routing::Broadcast;
        self
    }

    /// Lower priorities are drained to exhaustion first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn source(&self) -> VertexId {
        self.source
    }

    pub fn source_ordinal(&self) -> usize {
        self.source_ordinal
    }

    pub fn destination(&self) -> VertexId {
        self.destination
    }

    pub fn destination_ordinal(&self) -> usize {
        self.destination_ordinal
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    pub fn drain_priority(&self) -> i32 {
        self.priority
    }
}

/// Half-built edge returned by [`Edge::from`].
#[derive(Debug, Clone, Copy)]
pub struct EdgeBuilder {
    source: VertexId,
    ordinal: usize,
}

impl EdgeBuilder {
    /// Finish the edge at `destination`'s input `ordinal`: local, unicast,
    /// priority 0.
    pub fn to(self, destination: VertexId, ordinal: usize) -> Edge {
        Edge {
            source: self.source,
            source_ordinal: self.ordinal,
            destination,
            destination_ordinal: ordinal,
            routing: Routing::Unicast,
            distributed: false,
            priority: 0,
        }
    }
}

/// The physical execution graph.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    vertices: Vec<Vertex>,
    names: IndexMap<String, VertexId>,
    edges: Vec<Edge>,
}

impl Dag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex. Names must be unique within the DAG. The factory's
    /// preferred local parallelism, if any, becomes the vertex's.
    pub fn new_vertex(
        &mut self,
        name: impl Into<String>,
        meta_supplier: ProcessorMetaSupplier,
    ) -> Result<VertexId> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(PlanError::DuplicateVertex(name));
        }
        let id = VertexId(self.vertices.len());
        self.names.insert(name.clone(), id);
        let local_parallelism = meta_supplier.preferred_local_parallelism();
        self.vertices.push(Vertex {
            name,
            meta_supplier,
            local_parallelism,
        });
        Ok(id)
    }

    /// Add an edge between existing vertices.
    pub fn edge(&mut self, edge: Edge) -> &mut Self {
        self.edges.push(edge);
        self
    }

    pub fn set_local_parallelism(&mut self, id: VertexId, parallelism: usize) {
        if let Some(vertex) = self.vertices.get_mut(id.0) {
            vertex.local_parallelism = Some(parallelism);
        }
    }

    /// Replace a vertex's factory with a function of the current one.
    pub fn update_meta_supplier<F>(&mut self, id: VertexId, update: F)
    where
        F: FnOnce(ProcessorMetaSupplier) -> ProcessorMetaSupplier,
    {
        if let Some(vertex) = self.vertices.get_mut(id.0) {
            vertex.meta_supplier = update(vertex.meta_supplier.clone());
        }
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.0)
    }

    pub fn vertex_id(&self, name: &str) -> Option<VertexId> {
        self.names.get(name).copied()
    }

    pub fn vertex_by_name(&self, name: &str) -> Option<&Vertex> {
        self.vertex_id(name).and_then(|id| self.vertex(id))
    }

    /// Vertices in creation order.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (VertexId(i), v))
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Edges in creation order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges into `id`, sorted by destination ordinal.
    pub fn inbound_edges(&self, id: VertexId) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.destination == id).collect();
        edges.sort_by_key(|e| e.destination_ordinal);
        edges
    }

    /// Edges out of `id`, sorted by source ordinal.
    pub fn outbound_edges(&self, id: VertexId) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.source == id).collect();
        edges.sort_by_key(|e| e.source_ordinal);
        edges
    }

    /// The edge between two named vertices, if any.
    pub fn edge_between(&self, source: &str, destination: &str) -> Option<&Edge> {
        let source = self.vertex_id(source)?;
        let destination = self.vertex_id(destination)?;
        self.edges
            .iter()
            .find(|e| e.source == source && e.destination == destination)
    }

    fn vertex_name(&self, id: VertexId) -> &str {
        self.vertices.get(id.0).map_or("?", |v| v.name.as_str())
    }

    /// A serializable summary of the graph.
    pub fn describe(&self) -> DagDescription {
        DagDescription {
            vertices: self
                .vertices
                .iter()
                .map(|v| VertexDescription {
                    name: v.name.clone(),
                    local_parallelism: v.local_parallelism,
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeDescription {
                    from: self.vertex_name(e.source).to_string(),
                    from_ordinal: e.source_ordinal,
                    to: self.vertex_name(e.destination).to_string(),
                    to_ordinal: e.destination_ordinal,
                    routing: e.routing.label().to_string(),
                    distributed: e.distributed,
                    priority: e.priority,
                })
                .collect(),
        }
    }
}

impl fmt::Display for Dag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dag")?;
        for v in &self.vertices {
            match v.local_parallelism {
                Some(n) => writeln!(f, "  vertex {} (local parallelism {n})", v.name)?,
                None => writeln!(f, "  vertex {}", v.name)?,
            }
        }
        for e in &self.edges {
            write!(
                f,
                "  edge {}:{} -> {}:{} {}",
                self.vertex_name(e.source),
                e.source_ordinal,
                self.vertex_name(e.destination),
                e.destination_ordinal,
                e.routing.label(),
            )?;
            if e.distributed {
                f.write_str(" distributed")?;
            }
            if e.priority != 0 {
                write!(f, " priority {}", e.priority)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Serializable form of a [`Dag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagDescription {
    pub vertices: Vec<VertexDescription>,
    pub edges: Vec<EdgeDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_parallelism: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub from: String,
    pub from_ordinal: usize,
    pub to: String,
    pub to_ordinal: usize,
    pub routing: String,
    pub distributed: bool,
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function;
    use crate::processors;

    #[test]
    fn test_duplicate_vertex_name() {
        let mut dag = Dag::new();
        dag.new_vertex("a", processors::noop_p()).unwrap();
        let err = dag.new_vertex("a", processors::noop_p()).unwrap_err();
        assert!(matches!(err, PlanError::DuplicateVertex(name) if name == "a"));
    }

    #[test]
    fn test_edge_builder_defaults() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a", processors::noop_p()).unwrap();
        let b = dag.new_vertex("b", processors::noop_p()).unwrap();
        dag.edge(Edge::from(a, 1).to(b, 2));

        let e = &dag.edges()[0];
        assert_eq!((e.source_ordinal(), e.destination_ordinal()), (1, 2));
        assert!(matches!(e.routing(), Routing::Unicast));
        assert!(!e.is_distributed());
        assert_eq!(e.drain_priority(), 0);
    }

    #[test]
    fn test_inbound_edges_sorted_by_ordinal() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a", processors::noop_p()).unwrap();
        let b = dag.new_vertex("b", processors::noop_p()).unwrap();
        let c = dag.new_vertex("c", processors::noop_p()).unwrap();
        dag.edge(Edge::from(b, 0).to(c, 1).broadcast().priority(-1))
            .edge(Edge::from(a, 0).to(c, 0).distributed().partitioned(function::identity()));

        let inbound = dag.inbound_edges(c);
        assert_eq!(inbound.len(), 2);
        assert_eq!(inbound[0].source(), a);
        assert!(inbound[0].routing().is_partitioned());
        assert!(inbound[1].routing().is_broadcast());
        assert_eq!(dag.outbound_edges(a).len(), 1);
    }

    #[test]
    fn test_preferred_parallelism_seeds_vertex() {
        let mut dag = Dag::new();
        let a = dag
            .new_vertex("a", processors::noop_p().with_preferred_local_parallelism(3))
            .unwrap();
        let b = dag.new_vertex("b", processors::noop_p()).unwrap();

        assert_eq!(dag.vertex(a).unwrap().local_parallelism(), Some(3));
        assert_eq!(dag.vertex(b).unwrap().local_parallelism(), None);

        dag.set_local_parallelism(a, 1);
        assert_eq!(dag.vertex(a).unwrap().local_parallelism(), Some(1));
    }

    #[test]
    fn test_partition_key_extract() {
        let entry = Value::entry("k", 5);
        assert_eq!(PartitionKey::EntryKey.extract(&entry), Value::from("k"));
        assert_eq!(
            PartitionKey::User(function::identity()).extract(&entry),
            entry
        );
    }

    #[test]
    fn test_display_and_describe() {
        let mut dag = Dag::new();
        let a = dag.new_vertex("a", processors::noop_p()).unwrap();
        let b = dag.new_vertex("b", processors::noop_p()).unwrap();
        dag.set_local_parallelism(b, 1);
        dag.edge(Edge::between(a, b).distributed().partitioned_by_entry_key());

        let text = dag.to_string();
        assert!(text.contains("vertex b (local parallelism 1)"));
        assert!(text.contains("edge a:0 -> b:0 partitioned(entry-key) distributed"));

        let description = dag.describe();
        assert_eq!(description.vertices.len(), 2);
        assert_eq!(description.edges[0].routing, "partitioned(entry-key)");
        let json = serde_json::to_string(&description).unwrap();
        assert!(!json.contains("\"local_parallelism\":null"));
    }
}
