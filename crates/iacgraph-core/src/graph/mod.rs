pub mod backend;
pub mod export;
pub mod snapshot;

use crate::compiler::intrinsic::{key_labels, IntrinsicFn};
use crate::document::Scalar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub use backend::GraphBackend;
pub use snapshot::SnapshotStore;

/// Label carried by every template root node.
pub const TEMPLATE_LABEL: &str = "CloudFormationTemplate";

/// Opaque node handle, stable within one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn graph_index(self) -> NodeIndex {
        NodeIndex::new(self.index())
    }
}

impl From<NodeIndex> for NodeId {
    fn from(idx: NodeIndex) -> Self {
        NodeId(idx.index() as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Edge kinds in the template graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// Structural containment: template -> resource -> property -> value.
    Has,
    /// The source's value is the result of invoking the target function node.
    ExecuteFn,
    /// The source function's result depends on the target's value.
    Reference,
}

impl EdgeKind {
    pub fn label(&self) -> &str {
        match self {
            EdgeKind::Has => "HAS",
            EdgeKind::ExecuteFn => "EXECUTE_FN",
            EdgeKind::Reference => "REFERENCE",
        }
    }
}

/// What a node stands for in the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Template,
    /// Top-level section such as `Resources` or `Mappings`.
    Section,
    Resource,
    Parameter,
    /// Any node inside the `Mappings` section.
    Mapping,
    Condition,
    Output,
    Property,
    Item,
    /// Literal argument of an intrinsic function.
    Argument,
    Function(IntrinsicFn),
    /// Synthetic node for a provider pseudo-parameter such as `AWS::Region`.
    Pseudo,
}

/// A node of the template graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    pub labels: BTreeSet<String>,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Full type string of a resource node, e.g. `AWS::EC2::SecurityGroup`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Source path, set on template root nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl GraphNode {
    pub fn new(kind: NodeKind, labels: BTreeSet<String>, line: usize) -> Self {
        Self {
            kind,
            labels,
            line,
            value: None,
            name: None,
            index: None,
            resource_type: None,
            path: None,
        }
    }

    /// A node labeled and named after a template key.
    pub fn keyed(kind: NodeKind, key: &str, line: usize) -> Self {
        let mut node = Self::new(kind, key_labels(key), line);
        node.name = Some(key.to_string());
        node
    }

    pub fn item(kind: NodeKind, index: usize, line: usize) -> Self {
        let mut node = Self::new(kind, BTreeSet::from(["Item".to_string()]), line);
        node.index = Some(index);
        node
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn has_any_label(&self, labels: &[&str]) -> bool {
        labels.iter().any(|l| self.labels.contains(*l))
    }

    pub fn is_array(&self) -> bool {
        self.has_label("Array")
    }

    /// Display name: logical/property name, falling back to the item index.
    pub fn display_name(&self) -> String {
        match (&self.name, self.index) {
            (Some(name), _) => name.clone(),
            (None, Some(i)) => format!("[{}]", i),
            (None, None) => self.labels.iter().cloned().collect::<Vec<_>>().join(":"),
        }
    }
}

/// The embedded graph store: a petgraph `DiGraph` plus template and provider indexes.
#[derive(Debug, Clone, Default)]
pub struct TemplateGraph {
    pub graph: DiGraph<GraphNode, EdgeKind>,
    templates: Vec<NodeIndex>,
    providers: HashMap<String, NodeIndex>,
}

impl TemplateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: GraphNode) -> NodeId {
        self.graph.add_node(node).into()
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.graph
            .add_edge(from.graph_index(), to.graph_index(), kind);
    }

    /// Add a template root node for `path`.
    pub fn add_template(&mut self, path: &str, line: usize) -> NodeId {
        let mut node = GraphNode::new(
            NodeKind::Template,
            BTreeSet::from([TEMPLATE_LABEL.to_string()]),
            line,
        );
        node.path = Some(path.to_string());
        let idx = self.graph.add_node(node);
        self.templates.push(idx);
        idx.into()
    }

    /// Get or create the synthetic node for a pseudo-parameter. One node per name per store.
    pub fn provider_node(&mut self, name: &str) -> NodeId {
        if let Some(idx) = self.providers.get(name) {
            return (*idx).into();
        }
        let node = GraphNode::keyed(NodeKind::Pseudo, name, 0);
        let idx = self.graph.add_node(node);
        self.providers.insert(name.to_string(), idx);
        idx.into()
    }

    pub fn get(&self, id: NodeId) -> Option<&GraphNode> {
        self.graph.node_weight(id.graph_index())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.graph.node_weight_mut(id.graph_index())
    }

    pub fn template_ids(&self) -> Vec<NodeId> {
        self.templates.iter().map(|idx| (*idx).into()).collect()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All edges as `(source, target, kind)` in insertion order.
    pub fn edge_list(&self) -> Vec<(NodeId, NodeId, EdgeKind)> {
        self.graph
            .edge_references()
            .map(|e| (e.source().into(), e.target().into(), *e.weight()))
            .collect()
    }

    pub(crate) fn adjacent(&self, id: NodeId, direction: Direction) -> Vec<(EdgeKind, NodeId)> {
        let mut edges: Vec<(EdgeKind, NodeId)> = self
            .graph
            .edges_directed(id.graph_index(), direction)
            .map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                (*e.weight(), other.into())
            })
            .collect();
        // petgraph yields the newest edge first; creation order keeps items ordered.
        edges.sort_by_key(|(_, other)| *other);
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_nodes_are_deduplicated() {
        let mut graph = TemplateGraph::new();
        let a = graph.provider_node("AWS::Region");
        let b = graph.provider_node("AWS::Region");
        let c = graph.provider_node("AWS::AccountId");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(graph.get(a).unwrap().has_label("Region"));
    }

    #[test]
    fn test_adjacent_edges_follow_creation_order() {
        let mut graph = TemplateGraph::new();
        let root = graph.add_template("t.yaml", 1);
        let first = graph.add_node(GraphNode::item(NodeKind::Item, 0, 2));
        let second = graph.add_node(GraphNode::item(NodeKind::Item, 1, 3));
        graph.add_edge(root, first, EdgeKind::Has);
        graph.add_edge(root, second, EdgeKind::Has);
        let out = graph.adjacent(root, Direction::Outgoing);
        assert_eq!(out, vec![(EdgeKind::Has, first), (EdgeKind::Has, second)]);
        assert_eq!(graph.template_ids(), vec![root]);
    }
}
