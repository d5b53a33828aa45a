//! Bounded traversals over a compiled template graph.
//!
//! Every primitive takes a `max_hops` bound and degrades to `None` or an empty result
//! instead of failing. Results come back in graph order (creation order of the nodes),
//! so sequence items keep their source order.

use crate::compiler::{IntrinsicFn, ValueArguments};
use crate::document::Scalar;
use crate::graph::{EdgeKind, GraphBackend, NodeId, NodeKind, TEMPLATE_LABEL};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Hop budgets for checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryLimits {
    /// Budget for following a value through functions and references.
    pub resolve_hops: usize,
    /// Budget for structural searches below a resource.
    pub search_hops: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            resolve_hops: 8,
            search_hops: 6,
        }
    }
}

fn targets<B: GraphBackend + ?Sized>(g: &B, id: NodeId, kinds: &[EdgeKind]) -> Vec<NodeId> {
    g.outgoing(id)
        .into_iter()
        .filter(|(kind, _)| kinds.contains(kind))
        .map(|(_, target)| target)
        .collect()
}

/// `HAS` children in creation order.
pub fn children<B: GraphBackend + ?Sized>(g: &B, node: NodeId) -> Vec<NodeId> {
    targets(g, node, &[EdgeKind::Has])
}

pub fn child_named<B: GraphBackend + ?Sized>(g: &B, node: NodeId, name: &str) -> Option<NodeId> {
    children(g, node)
        .into_iter()
        .find(|c| g.node(*c).and_then(|n| n.name.as_deref()) == Some(name))
}

/// Closest node above `node` carrying any of `labels`, walking `HAS` and `EXECUTE_FN`
/// edges backwards. The start node itself is never returned.
pub fn nearest_ancestor<B: GraphBackend + ?Sized>(
    g: &B,
    node: NodeId,
    labels: &[&str],
    max_hops: usize,
) -> Option<NodeId> {
    debug_assert!(max_hops > 0, "max_hops must be positive");
    let mut visited = HashSet::from([node]);
    let mut frontier = vec![node];

    for _ in 0..max_hops {
        let mut next = Vec::new();
        for id in frontier {
            for (kind, parent) in g.incoming(id) {
                if kind == EdgeKind::Reference || !visited.insert(parent) {
                    continue;
                }
                if g.node(parent).is_some_and(|n| n.has_any_label(labels)) {
                    return Some(parent);
                }
                next.push(parent);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    None
}

/// Path of the template that contains `node`.
pub fn template_path<B: GraphBackend + ?Sized>(g: &B, node: NodeId) -> Option<String> {
    let root = match g.node(node) {
        Some(n) if n.kind == NodeKind::Template => node,
        Some(_) => nearest_ancestor(g, node, &[TEMPLATE_LABEL], usize::MAX)?,
        None => return None,
    };
    g.node(root).and_then(|n| n.path.clone())
}

/// Edges a value flows through when leaving `id`.
fn value_sources<B: GraphBackend + ?Sized>(g: &B, id: NodeId) -> Vec<NodeId> {
    let Some(node) = g.node(id) else {
        return Vec::new();
    };
    match node.kind {
        NodeKind::Function(function) => {
            let mut out = Vec::new();
            for (kind, target) in g.outgoing(id) {
                let follow = match kind {
                    EdgeKind::ExecuteFn => true,
                    // Conditionals point at condition declarations, not at values.
                    EdgeKind::Reference => !function.is_conditional(),
                    EdgeKind::Has => match function.value_arguments() {
                        ValueArguments::None => false,
                        ValueArguments::All => true,
                        ValueArguments::SkipFirst => {
                            g.node(target).map_or(true, |t| t.index != Some(0))
                        }
                    },
                };
                if follow {
                    out.push(target);
                }
            }
            out
        }
        NodeKind::Parameter => child_named(g, id, "Default").into_iter().collect(),
        NodeKind::Mapping => targets(g, id, &[EdgeKind::Has, EdgeKind::ExecuteFn]),
        NodeKind::Condition => targets(g, id, &[EdgeKind::ExecuteFn]),
        NodeKind::Property | NodeKind::Item | NodeKind::Argument => {
            if node.is_array() {
                targets(g, id, &[EdgeKind::Has, EdgeKind::ExecuteFn])
            } else {
                targets(g, id, &[EdgeKind::ExecuteFn])
            }
        }
        NodeKind::Template
        | NodeKind::Section
        | NodeKind::Resource
        | NodeKind::Output
        | NodeKind::Pseudo => Vec::new(),
    }
}

/// Literal nodes that `node`'s value may come from.
///
/// A matching literal returns itself. Otherwise the value is followed through
/// `EXECUTE_FN` and `REFERENCE` edges (and the `HAS` edges that carry values: function
/// arguments, parameter defaults, mapping entries and array items), collecting literals
/// that satisfy `pred`. Calling it again on any returned node yields that node.
pub fn resolve_literal<B, P>(g: &B, node: NodeId, pred: P, max_hops: usize) -> Vec<NodeId>
where
    B: GraphBackend + ?Sized,
    P: Fn(&Scalar) -> bool,
{
    debug_assert!(max_hops > 0, "max_hops must be positive");
    let mut found = Vec::new();
    // Shallowest depth each node was expanded at. A node reached again by a shorter
    // path is expanded again, since it has more budget left.
    let mut best: HashMap<NodeId, usize> = HashMap::new();
    let mut stack = vec![(node, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        if best.get(&id).is_some_and(|seen| *seen <= depth) {
            continue;
        }
        best.insert(id, depth);
        let Some(current) = g.node(id) else {
            continue;
        };
        if let Some(value) = &current.value {
            if pred(value) && !found.contains(&id) {
                found.push(id);
            }
            continue;
        }
        if depth >= max_hops {
            continue;
        }
        for next in value_sources(g, id).into_iter().rev() {
            stack.push((next, depth + 1));
        }
    }
    found
}

/// Nodes below `root` (excluding it) whose labels intersect `labels`, in preorder over
/// `HAS` and `EXECUTE_FN` edges.
pub fn find_typed_descendants<B: GraphBackend + ?Sized>(
    g: &B,
    root: NodeId,
    labels: &[&str],
    max_hops: usize,
) -> Vec<NodeId> {
    debug_assert!(max_hops > 0, "max_hops must be positive");
    let mut found = Vec::new();
    let mut visited = HashSet::from([root]);
    let mut stack = vec![(root, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        if id != root && g.node(id).is_some_and(|n| n.has_any_label(labels)) {
            found.push(id);
        }
        if depth >= max_hops {
            continue;
        }
        let below = targets(g, id, &[EdgeKind::Has, EdgeKind::ExecuteFn]);
        for child in below.into_iter().rev() {
            if visited.insert(child) {
                stack.push((child, depth + 1));
            }
        }
    }
    found
}

/// Assemble a logical record from the nodes under `container`.
///
/// Each field maps to the nearest (breadth-first over `HAS`) node named after it within
/// `max_hops`. Fields that are not found are absent from the result.
pub fn reconstruct_record<B: GraphBackend + ?Sized>(
    g: &B,
    container: NodeId,
    fields: &[&str],
    max_hops: usize,
) -> BTreeMap<String, NodeId> {
    debug_assert!(max_hops > 0, "max_hops must be positive");
    let mut record = BTreeMap::new();
    let mut visited = HashSet::from([container]);
    let mut queue = VecDeque::from([(container, 0usize)]);

    while let Some((id, depth)) = queue.pop_front() {
        if record.len() == fields.len() {
            break;
        }
        if id != container {
            if let Some(name) = g.node(id).and_then(|n| n.name.as_deref()) {
                if fields.contains(&name) && !record.contains_key(name) {
                    record.insert(name.to_string(), id);
                }
            }
        }
        if depth >= max_hops {
            continue;
        }
        for child in children(g, id) {
            if visited.insert(child) {
                queue.push_back((child, depth + 1));
            }
        }
    }
    record
}

/// Resources of every template whose type is in `types` (all resources when empty).
pub fn resources<B: GraphBackend + ?Sized>(g: &B, types: &[&str]) -> Vec<NodeId> {
    g.templates()
        .into_iter()
        .filter_map(|template| child_named(g, template, "Resources"))
        .flat_map(|section| children(g, section))
        .filter(|id| {
            g.node(*id).is_some_and(|n| {
                n.kind == NodeKind::Resource
                    && (types.is_empty()
                        || n.resource_type
                            .as_deref()
                            .is_some_and(|t| types.contains(&t)))
            })
        })
        .collect()
}

/// Elements of a list-valued node.
///
/// An array yields its items and a plain mapping yields itself. An `Fn::If` value yields
/// the elements of both branches; other computed values yield nothing.
pub fn list_items<B: GraphBackend + ?Sized>(g: &B, node: NodeId, max_hops: usize) -> Vec<NodeId> {
    debug_assert!(max_hops > 0, "max_hops must be positive");
    let Some(current) = g.node(node) else {
        return Vec::new();
    };
    if current.is_array() {
        return children(g, node);
    }
    let calls = targets(g, node, &[EdgeKind::ExecuteFn]);
    if calls.is_empty() {
        return vec![node];
    }
    if max_hops == 1 {
        return Vec::new();
    }

    let mut items = Vec::new();
    for call in calls {
        let conditional = g
            .node(call)
            .is_some_and(|n| n.kind == NodeKind::Function(IntrinsicFn::If));
        if !conditional {
            continue;
        }
        for branch in value_sources(g, call) {
            items.extend(list_items(g, branch, max_hops - 1));
        }
    }
    items
}

/// Statements of a policy document, whether `Statement` is one object or a list.
pub fn statements<B: GraphBackend + ?Sized>(
    g: &B,
    policy_document: NodeId,
    max_hops: usize,
) -> Vec<NodeId> {
    child_named(g, policy_document, "Statement")
        .map(|statement| list_items(g, statement, max_hops))
        .unwrap_or_default()
}

/// String literals `node` may evaluate to, with the literal node they come from.
pub fn string_values<B: GraphBackend + ?Sized>(
    g: &B,
    node: NodeId,
    max_hops: usize,
) -> Vec<(NodeId, String)> {
    resolve_literal(g, node, Scalar::is_str, max_hops)
        .into_iter()
        .filter_map(|id| {
            let value = g.node(id)?.value.as_ref()?.as_str()?.to_string();
            Some((id, value))
        })
        .collect()
}

/// Literals under `root` labeled `label` whose value satisfies `pred`.
///
/// Descendants are searched within `max_hops`, and each is resolved with the same budget.
pub fn find_values<B, P>(
    g: &B,
    root: NodeId,
    label: &str,
    pred: P,
    max_hops: usize,
) -> Vec<NodeId>
where
    B: GraphBackend + ?Sized,
    P: Fn(&Scalar) -> bool,
{
    let mut found = Vec::new();
    for node in find_typed_descendants(g, root, &[label], max_hops) {
        for literal in resolve_literal(g, node, &pred, max_hops) {
            if !found.contains(&literal) {
                found.push(literal);
            }
        }
    }
    found
}

/// Resources `node` points at through functions (`Ref`, `Fn::GetAtt`, ...).
pub fn referenced_resources<B: GraphBackend + ?Sized>(
    g: &B,
    node: NodeId,
    max_hops: usize,
) -> Vec<NodeId> {
    debug_assert!(max_hops > 0, "max_hops must be positive");
    let mut found = Vec::new();
    let mut visited = HashSet::from([node]);
    let mut stack = vec![(node, 0usize)];

    while let Some((id, depth)) = stack.pop() {
        let Some(current) = g.node(id) else {
            continue;
        };
        if id != node && current.kind == NodeKind::Resource {
            found.push(id);
            continue;
        }
        if depth >= max_hops {
            continue;
        }
        let next = match current.kind {
            NodeKind::Function(_) => {
                targets(g, id, &[EdgeKind::Has, EdgeKind::ExecuteFn, EdgeKind::Reference])
            }
            _ => targets(g, id, &[EdgeKind::Has, EdgeKind::ExecuteFn]),
        };
        for target in next.into_iter().rev() {
            if visited.insert(target) {
                stack.push((target, depth + 1));
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TemplateCompiler;
    use crate::document::parse_template;
    use crate::graph::{GraphNode, TemplateGraph};
    use std::collections::BTreeSet;

    fn compile(content: &str) -> TemplateGraph {
        let doc = parse_template(content, "query.yaml").unwrap();
        let mut graph = TemplateGraph::new();
        TemplateCompiler::new(&mut graph).compile(&doc).unwrap();
        graph
    }

    fn named(graph: &TemplateGraph, name: &str) -> NodeId {
        graph
            .graph
            .node_indices()
            .find(|idx| graph.graph[*idx].name.as_deref() == Some(name))
            .map(NodeId::from)
            .unwrap()
    }

    fn values(graph: &TemplateGraph, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|id| graph.get(*id).unwrap().value.as_ref().unwrap().to_string())
            .collect()
    }

    const RULES: &str = r#"
Parameters:
  AllowedCidr:
    Type: String
    Default: 0.0.0.0/0
Conditions:
  IsProd: !Equals [prod, prod]
Resources:
  Group:
    Type: AWS::EC2::SecurityGroup
    Properties:
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 22
          ToPort: 22
          CidrIp: !Ref AllowedCidr
        - IpProtocol: tcp
          FromPort: !If [IsProd, 443, 80]
          CidrIp: 10.0.0.0/8
"#;

    #[test]
    fn test_resolve_literal_through_parameter_default() {
        let graph = compile(RULES);
        let cidr = named(&graph, "CidrIp");
        let found = resolve_literal(&graph, cidr, Scalar::is_str, 8);
        assert_eq!(values(&graph, &found), vec!["0.0.0.0/0"]);
    }

    #[test]
    fn test_resolve_literal_is_idempotent() {
        let graph = compile(RULES);
        let cidr = named(&graph, "CidrIp");
        for literal in resolve_literal(&graph, cidr, |_| true, 8) {
            assert_eq!(resolve_literal(&graph, literal, |_| true, 8), vec![literal]);
        }
    }

    #[test]
    fn test_resolve_literal_skips_if_condition_name() {
        let graph = compile(RULES);
        let ports: Vec<NodeId> = graph
            .graph
            .node_indices()
            .filter(|idx| graph.graph[*idx].name.as_deref() == Some("FromPort"))
            .map(NodeId::from)
            .collect();
        let found = resolve_literal(&graph, ports[1], |_| true, 8);
        assert_eq!(values(&graph, &found), vec!["443", "80"]);
    }

    #[test]
    fn test_bounded_traversal_terminates_on_cycles() {
        let mut graph = TemplateGraph::new();
        let root = graph.add_template("cycle.yaml", 1);
        let mut ring = Vec::new();
        for i in 0..20 {
            let node = GraphNode::new(
                NodeKind::Function(IntrinsicFn::Ref),
                BTreeSet::from(["Ref".to_string()]),
                i + 2,
            );
            ring.push(graph.add_node(node));
        }
        graph.add_edge(root, ring[0], EdgeKind::Has);
        for i in 0..ring.len() {
            graph.add_edge(ring[i], ring[(i + 1) % ring.len()], EdgeKind::Reference);
        }
        assert!(resolve_literal(&graph, ring[0], |_| true, 5).is_empty());
        assert!(resolve_literal(&graph, ring[0], |_| true, 100).is_empty());
        assert!(referenced_resources(&graph, ring[0], 100).is_empty());
    }

    #[test]
    fn test_resolve_literal_reexpands_nodes_reached_by_a_shorter_path() {
        let mut graph = TemplateGraph::new();
        let reference = || {
            GraphNode::new(
                NodeKind::Function(IntrinsicFn::Ref),
                BTreeSet::from(["Ref".to_string()]),
                1,
            )
        };
        let start = graph.add_node(reference());
        let detour = graph.add_node(reference());
        let detour_end = graph.add_node(reference());
        let shared = graph.add_node(reference());
        let mut value = GraphNode::new(NodeKind::Argument, BTreeSet::new(), 9);
        value.value = Some(Scalar::Str("0.0.0.0/0".to_string()));
        let literal = graph.add_node(value);

        // start -> detour -> detour_end -> shared -> literal, and start -> shared.
        graph.add_edge(start, detour, EdgeKind::Reference);
        graph.add_edge(detour, detour_end, EdgeKind::Reference);
        graph.add_edge(detour_end, shared, EdgeKind::Reference);
        graph.add_edge(start, shared, EdgeKind::Reference);
        graph.add_edge(shared, literal, EdgeKind::Reference);

        assert_eq!(resolve_literal(&graph, start, |_| true, 3), vec![literal]);
        assert_eq!(resolve_literal(&graph, start, |_| true, 8), vec![literal]);
        assert!(resolve_literal(&graph, start, |_| true, 1).is_empty());
    }

    #[test]
    fn test_nearest_ancestor() {
        let graph = compile(RULES);
        let cidr = named(&graph, "CidrIp");
        let group = nearest_ancestor(&graph, cidr, &["SecurityGroup"], 6).unwrap();
        assert_eq!(graph.get(group).unwrap().name.as_deref(), Some("Group"));
        assert_eq!(nearest_ancestor(&graph, cidr, &["SecurityGroup"], 1), None);
        assert_eq!(template_path(&graph, cidr).as_deref(), Some("query.yaml"));
    }

    #[test]
    fn test_find_typed_descendants_in_preorder() {
        let graph = compile(RULES);
        let group = named(&graph, "Group");
        let found = find_typed_descendants(&graph, group, &["FromPort", "ToPort"], 6);
        let names: Vec<_> = found
            .iter()
            .map(|id| graph.get(*id).unwrap().name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["FromPort", "ToPort", "FromPort"]);
        assert!(find_typed_descendants(&graph, group, &["FromPort"], 2).is_empty());
    }

    #[test]
    fn test_reconstruct_partial_record() {
        let graph = compile(RULES);
        let ingress = named(&graph, "SecurityGroupIngress");
        let rules = list_items(&graph, ingress, 4);
        assert_eq!(rules.len(), 2);

        let fields = ["IpProtocol", "FromPort", "ToPort", "CidrIp"];
        let full = reconstruct_record(&graph, rules[0], &fields, 2);
        assert_eq!(full.len(), 4);
        let partial = reconstruct_record(&graph, rules[1], &fields, 2);
        assert!(partial.contains_key("FromPort"));
        assert!(!partial.contains_key("ToPort"));
    }

    #[test]
    fn test_resources_by_type() {
        let graph = compile(RULES);
        assert_eq!(resources(&graph, &["AWS::EC2::SecurityGroup"]).len(), 1);
        assert!(resources(&graph, &["AWS::S3::Bucket"]).is_empty());
        assert_eq!(resources(&graph, &[]).len(), 1);
    }

    #[test]
    fn test_statements_single_and_list() {
        let graph = compile(
            r#"
Resources:
  Single:
    Type: AWS::IAM::ManagedPolicy
    Properties:
      PolicyDocument:
        Statement:
          Effect: Allow
          Action: s3:*
  Many:
    Type: AWS::IAM::ManagedPolicy
    Properties:
      PolicyDocument:
        Statement:
          - Effect: Allow
            Action: ["s3:GetObject", "s3:PutObject"]
          - Effect: Deny
            Action: "*"
"#,
        );
        let docs: Vec<NodeId> = graph
            .graph
            .node_indices()
            .filter(|idx| graph.graph[*idx].name.as_deref() == Some("PolicyDocument"))
            .map(NodeId::from)
            .collect();
        assert_eq!(statements(&graph, docs[0], 4).len(), 1);
        let many = statements(&graph, docs[1], 4);
        assert_eq!(many.len(), 2);

        let action = child_named(&graph, many[0], "Action").unwrap();
        let actions: Vec<String> = string_values(&graph, action, 4)
            .into_iter()
            .map(|(_, v)| v)
            .collect();
        assert_eq!(actions, vec!["s3:GetObject", "s3:PutObject"]);
    }

    #[test]
    fn test_find_values_and_references() {
        let graph = compile(
            r#"
Resources:
  Key:
    Type: AWS::KMS::Key
  Topic:
    Type: AWS::SNS::Topic
    Properties:
      KmsMasterKeyId: !GetAtt Key.Arn
      Enabled: "true"
"#,
        );
        let topic = named(&graph, "Topic");
        let enabled = find_values(
            &graph,
            topic,
            "Enabled",
            |v| v.to_boolean() == Some(true),
            4,
        );
        assert_eq!(enabled.len(), 1);
        let key = named(&graph, "KmsMasterKeyId");
        assert_eq!(referenced_resources(&graph, key, 4), vec![named(&graph, "Key")]);
    }
}
