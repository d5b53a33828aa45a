use crate::graph::{EdgeKind, GraphNode, NodeId, TemplateGraph};
use petgraph::Direction;

/// Read access to a compiled template graph.
///
/// Checks and the query library only see this trait, so they run unchanged against the
/// embedded [`TemplateGraph`] or a [`crate::graph::SnapshotStore`] loaded from disk.
/// Adjacency lists are ordered by node creation, which keeps sequence items in source order.
pub trait GraphBackend: Send + Sync {
    fn node(&self, id: NodeId) -> Option<&GraphNode>;

    fn outgoing(&self, id: NodeId) -> Vec<(EdgeKind, NodeId)>;

    fn incoming(&self, id: NodeId) -> Vec<(EdgeKind, NodeId)>;

    /// Root nodes of every template in the store.
    fn templates(&self) -> Vec<NodeId>;

    fn node_count(&self) -> usize;
}

impl GraphBackend for TemplateGraph {
    fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.get(id)
    }

    fn outgoing(&self, id: NodeId) -> Vec<(EdgeKind, NodeId)> {
        self.adjacent(id, Direction::Outgoing)
    }

    fn incoming(&self, id: NodeId) -> Vec<(EdgeKind, NodeId)> {
        self.adjacent(id, Direction::Incoming)
    }

    fn templates(&self) -> Vec<NodeId> {
        self.template_ids()
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}
