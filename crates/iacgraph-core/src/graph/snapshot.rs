use crate::error::{IacError, Result};
use crate::graph::{EdgeKind, GraphBackend, GraphNode, NodeId, TemplateGraph};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEdge {
    source: NodeId,
    target: NodeId,
    kind: EdgeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    nodes: Vec<GraphNode>,
    edges: Vec<SnapshotEdge>,
    templates: Vec<NodeId>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// File-backed graph store.
///
/// A compiled [`TemplateGraph`] is written out as JSON and queried after reloading, so
/// the compile and check phases can run in different processes. Failures here are
/// [`IacError::GraphQueryBackend`] errors.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    nodes: Vec<GraphNode>,
    templates: Vec<NodeId>,
    outgoing: Vec<Vec<(EdgeKind, NodeId)>>,
    incoming: Vec<Vec<(EdgeKind, NodeId)>>,
}

impl SnapshotStore {
    /// Write `graph` to `path` as a snapshot.
    pub fn save(graph: &TemplateGraph, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(&snapshot_file(graph)).map_err(|e| {
            IacError::GraphQueryBackend(format!("failed to encode snapshot: {}", e))
        })?;
        std::fs::write(path, json).map_err(|e| {
            IacError::GraphQueryBackend(format!(
                "failed to write snapshot '{}': {}",
                path.display(),
                e
            ))
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            IacError::GraphQueryBackend(format!(
                "failed to read snapshot '{}': {}",
                path.display(),
                e
            ))
        })?;
        let file: SnapshotFile = serde_json::from_slice(&bytes).map_err(|e| {
            IacError::GraphQueryBackend(format!(
                "failed to decode snapshot '{}': {}",
                path.display(),
                e
            ))
        })?;
        if file.version != SNAPSHOT_VERSION {
            return Err(IacError::GraphQueryBackend(format!(
                "snapshot '{}' has version {}, expected {}",
                path.display(),
                file.version,
                SNAPSHOT_VERSION
            )));
        }
        Self::index(file)
    }

    fn index(file: SnapshotFile) -> Result<Self> {
        let count = file.nodes.len();
        let mut outgoing = vec![Vec::new(); count];
        let mut incoming = vec![Vec::new(); count];

        for edge in &file.edges {
            if edge.source.index() >= count || edge.target.index() >= count {
                return Err(IacError::GraphQueryBackend(format!(
                    "edge {} -> {} points outside the snapshot",
                    edge.source, edge.target
                )));
            }
            outgoing[edge.source.index()].push((edge.kind, edge.target));
            incoming[edge.target.index()].push((edge.kind, edge.source));
        }
        for list in outgoing.iter_mut().chain(incoming.iter_mut()) {
            list.sort_by_key(|(_, other)| *other);
        }
        if let Some(bad) = file.templates.iter().find(|t| t.index() >= count) {
            return Err(IacError::GraphQueryBackend(format!(
                "template root {} is missing from the snapshot",
                bad
            )));
        }

        Ok(Self {
            nodes: file.nodes,
            templates: file.templates,
            outgoing,
            incoming,
        })
    }
}

fn snapshot_file(graph: &TemplateGraph) -> SnapshotFile {
    let edges = graph
        .edge_list()
        .into_iter()
        .map(|(source, target, kind)| SnapshotEdge {
            source,
            target,
            kind,
        })
        .collect();
    SnapshotFile {
        version: SNAPSHOT_VERSION,
        nodes: graph.graph.node_weights().cloned().collect(),
        edges,
        templates: graph.template_ids(),
    }
}

impl GraphBackend for SnapshotStore {
    fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.index())
    }

    fn outgoing(&self, id: NodeId) -> Vec<(EdgeKind, NodeId)> {
        self.outgoing.get(id.index()).cloned().unwrap_or_default()
    }

    fn incoming(&self, id: NodeId) -> Vec<(EdgeKind, NodeId)> {
        self.incoming.get(id.index()).cloned().unwrap_or_default()
    }

    fn templates(&self) -> Vec<NodeId> {
        self.templates.clone()
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TemplateCompiler;
    use crate::document::parse_template;

    const TEMPLATE: &str = r#"
Resources:
  Key:
    Type: AWS::KMS::Key
  Topic:
    Type: AWS::SNS::Topic
    Properties:
      KmsMasterKeyId: !Ref Key
"#;

    #[test]
    fn test_snapshot_round_trip_matches_graph() {
        let doc = parse_template(TEMPLATE, "topic.yaml").unwrap();
        let mut graph = TemplateGraph::new();
        TemplateCompiler::new(&mut graph).compile(&doc).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topic.json");
        SnapshotStore::save(&graph, &path).unwrap();
        let store = SnapshotStore::load(&path).unwrap();

        assert_eq!(store.node_count(), graph.node_count());
        assert_eq!(GraphBackend::templates(&store), graph.template_ids());
        for id in 0..graph.node_count() {
            let id = NodeId(id as u32);
            assert_eq!(store.node(id), graph.node(id));
            assert_eq!(store.outgoing(id), graph.outgoing(id));
            assert_eq!(store.incoming(id), graph.incoming(id));
        }
    }

    #[test]
    fn test_corrupt_snapshot_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = SnapshotStore::load(&path).unwrap_err();
        assert!(matches!(err, IacError::GraphQueryBackend(_)));
        assert!(!err.is_designated());
    }

    #[test]
    fn test_dangling_edge_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dangling.json");
        std::fs::write(
            &path,
            r#"{"version":1,"nodes":[],"edges":[{"source":0,"target":3,"kind":"HAS"}],"templates":[]}"#,
        )
        .unwrap();
        assert!(SnapshotStore::load(&path).is_err());
    }
}
