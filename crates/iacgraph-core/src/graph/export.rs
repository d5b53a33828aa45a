use crate::graph::{EdgeKind, GraphBackend, GraphNode, NodeId, NodeKind};

fn node_label(node: &GraphNode) -> String {
    let mut label = node.display_name();
    if let Some(resource_type) = &node.resource_type {
        label = format!("{}\\n{}", label, resource_type);
    }
    if let Some(value) = &node.value {
        label = format!("{} = {}", label, value);
    }
    format!("{}\\nline {}", label, node.line).replace('"', "'")
}

fn fill_color(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Template => "#6366f1",
        NodeKind::Resource => "#22c55e",
        NodeKind::Parameter | NodeKind::Mapping | NodeKind::Condition => "#f59e0b",
        NodeKind::Function(_) => "#3b82f6",
        NodeKind::Pseudo => "#a855f7",
        _ => "#64748b",
    }
}

fn all_nodes(graph: &dyn GraphBackend) -> impl Iterator<Item = (NodeId, &GraphNode)> {
    (0..graph.node_count()).filter_map(move |i| {
        let id = NodeId(i as u32);
        graph.node(id).map(|node| (id, node))
    })
}

/// Generate a Mermaid flowchart of a compiled graph.
pub fn to_mermaid(graph: &dyn GraphBackend) -> String {
    let mut lines = vec!["graph LR".to_string()];

    for (id, node) in all_nodes(graph) {
        lines.push(format!("    {}[\"{}\"]", id, node_label(node)));
    }

    for (id, _) in all_nodes(graph) {
        for (kind, target) in graph.outgoing(id) {
            let arrow = match kind {
                EdgeKind::Has => "-->".to_string(),
                other => format!("-.->|{}|", other.label()),
            };
            lines.push(format!("    {} {} {}", id, arrow, target));
        }
    }

    for (id, node) in all_nodes(graph) {
        if matches!(node.kind, NodeKind::Resource | NodeKind::Function(_)) {
            lines.push(format!(
                "    style {} fill:{},color:#fff",
                id,
                fill_color(node.kind)
            ));
        }
    }

    lines.join("\n")
}

/// Generate a DOT (Graphviz) representation of a compiled graph.
pub fn to_dot(graph: &dyn GraphBackend, name: &str) -> String {
    let mut lines = vec![
        format!("digraph \"{}\" {{", name.replace('"', "'")),
        "    rankdir=LR;".to_string(),
        "    node [shape=box, style=\"rounded,filled\", fontname=\"Helvetica\"];".to_string(),
        "    edge [color=\"#666666\"];".to_string(),
        String::new(),
    ];

    for (id, node) in all_nodes(graph) {
        lines.push(format!(
            "    {} [label=\"{}\", fillcolor=\"{}\", fontcolor=\"#ffffff\"];",
            id,
            node_label(node),
            fill_color(node.kind)
        ));
    }

    lines.push(String::new());

    for (id, _) in all_nodes(graph) {
        for (kind, target) in graph.outgoing(id) {
            let style = match kind {
                EdgeKind::Has => String::new(),
                other => format!(" [style=dashed, label=\"{}\"]", other.label()),
            };
            lines.push(format!("    {} -> {}{};", id, target, style));
        }
    }

    lines.push("}".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TemplateCompiler;
    use crate::document::parse_template;
    use crate::graph::TemplateGraph;

    fn compiled() -> TemplateGraph {
        let doc = parse_template(
            r#"
Parameters:
  Env:
    Type: String
Resources:
  Bucket:
    Type: AWS::S3::Bucket
    Properties:
      BucketName: !Ref Env
"#,
            "bucket.yaml",
        )
        .unwrap();
        let mut graph = TemplateGraph::new();
        TemplateCompiler::new(&mut graph).compile(&doc).unwrap();
        graph
    }

    #[test]
    fn test_mermaid_marks_reference_edges() {
        let mermaid = to_mermaid(&compiled());
        assert!(mermaid.starts_with("graph LR"));
        assert!(mermaid.contains("-.->|EXECUTE_FN|"));
        assert!(mermaid.contains("-.->|REFERENCE|"));
        assert!(mermaid.contains("AWS::S3::Bucket"));
    }

    #[test]
    fn test_dot_output() {
        let dot = to_dot(&compiled(), "bucket.yaml");
        assert!(dot.starts_with("digraph \"bucket.yaml\" {"));
        assert!(dot.contains("label=\"REFERENCE\""));
        assert!(dot.ends_with('}'));
    }
}
