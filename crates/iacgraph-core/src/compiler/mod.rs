pub mod intrinsic;
pub mod sub;
pub mod symbols;

pub use intrinsic::{is_pseudo_parameter, IntrinsicFn, ValueArguments, PSEUDO_PARAMETERS};
pub use symbols::{Namespace, SymbolTable};

use crate::document::{DocKey, DocNode, DocValue, Scalar, TemplateDocument};
use crate::error::{IacError, Result};
use crate::graph::{EdgeKind, GraphNode, NodeId, NodeKind, TemplateGraph};
use petgraph::Direction;
use std::collections::BTreeSet;
use tracing::{debug, warn};

const SECTIONS: [&str; 5] = ["Resources", "Parameters", "Mappings", "Conditions", "Outputs"];

/// Compiler switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Fail on names that resolve to nothing. When off, the edge is skipped with a warning.
    pub strict_references: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict_references: true,
        }
    }
}

/// Which node kinds plain keys and sequence items become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Template,
    Mappings,
}

impl Scope {
    fn property_kind(self) -> NodeKind {
        match self {
            Scope::Template => NodeKind::Property,
            Scope::Mappings => NodeKind::Mapping,
        }
    }

    fn item_kind(self) -> NodeKind {
        match self {
            Scope::Template => NodeKind::Item,
            Scope::Mappings => NodeKind::Mapping,
        }
    }
}

/// Output of the structural pass for one template.
#[derive(Debug)]
struct CompiledUnit {
    path: String,
    root: NodeId,
    symbols: SymbolTable,
    functions: Vec<NodeId>,
}

/// Compiles template documents into a [`TemplateGraph`].
///
/// Compilation runs in two passes. The structural pass turns the document into
/// containment (`HAS`) and invocation (`EXECUTE_FN`) edges, registers every logical name
/// and queues each function node. The resolution pass then walks the queue and adds
/// `REFERENCE` edges, so a template may refer to names declared further down.
pub struct TemplateCompiler<'g> {
    graph: &'g mut TemplateGraph,
    options: CompileOptions,
}

impl<'g> TemplateCompiler<'g> {
    pub fn new(graph: &'g mut TemplateGraph) -> Self {
        Self {
            graph,
            options: CompileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile one template and return its root node.
    pub fn compile(&mut self, doc: &TemplateDocument) -> Result<NodeId> {
        let unit = self.structure(doc)?;
        self.resolve(&unit, &SymbolTable::default())?;
        Ok(unit.root)
    }

    /// Compile templates that share one namespace.
    ///
    /// Every structural pass completes before any reference is resolved. A name is looked
    /// up in its own template first, then in the names declared by the whole group.
    pub fn compile_group(&mut self, docs: &[TemplateDocument]) -> Result<Vec<NodeId>> {
        let units = docs
            .iter()
            .map(|doc| self.structure(doc))
            .collect::<Result<Vec<_>>>()?;

        let mut shared = SymbolTable::default();
        for unit in &units {
            shared.absorb(&unit.symbols);
        }
        for unit in &units {
            self.resolve(unit, &shared)?;
        }

        Ok(units.iter().map(|unit| unit.root).collect())
    }

    fn structure(&mut self, doc: &TemplateDocument) -> Result<CompiledUnit> {
        let before = self.graph.graph.node_count();
        let unit = StructuralPass {
            graph: &mut *self.graph,
            path: &doc.path,
            symbols: SymbolTable::default(),
            functions: Vec::new(),
        }
        .run(&doc.root)?;
        debug!(
            path = %doc.path,
            nodes = self.graph.graph.node_count() - before,
            symbols = unit.symbols.len(),
            functions = unit.functions.len(),
            "structural pass complete"
        );
        Ok(unit)
    }

    fn resolve(&mut self, unit: &CompiledUnit, shared: &SymbolTable) -> Result<()> {
        let before = self.graph.edge_count();
        ResolutionPass {
            graph: &mut *self.graph,
            unit,
            shared,
            options: self.options,
        }
        .run()?;
        debug!(
            path = %unit.path,
            edges = self.graph.edge_count() - before,
            "resolution pass complete"
        );
        Ok(())
    }
}

struct StructuralPass<'a> {
    graph: &'a mut TemplateGraph,
    path: &'a str,
    symbols: SymbolTable,
    functions: Vec<NodeId>,
}

impl StructuralPass<'_> {
    fn run(mut self, root: &DocNode) -> Result<CompiledUnit> {
        let DocValue::Mapping(entries) = &root.value else {
            return Err(IacError::parse(self.path, "template root must be a mapping"));
        };
        if root.get("Resources").is_none() {
            return Err(IacError::parse(
                self.path,
                "Not a CloudFormation template: missing Resources section",
            ));
        }

        let template = self.graph.add_template(self.path, root.line);
        for (key, value) in entries {
            if SECTIONS.contains(&key.name.as_str()) {
                self.section(template, key, value)?;
            } else {
                self.entry(template, key, value, Scope::Template)?;
            }
        }

        Ok(CompiledUnit {
            path: self.path.to_string(),
            root: template,
            symbols: self.symbols,
            functions: self.functions,
        })
    }

    fn section(&mut self, template: NodeId, key: &DocKey, value: &DocNode) -> Result<()> {
        let section = self.add_child(
            template,
            GraphNode::keyed(NodeKind::Section, &key.name, key.line),
            EdgeKind::Has,
        );
        let DocValue::Mapping(declarations) = &value.value else {
            if key.name == "Resources" {
                return Err(IacError::parse(
                    self.path,
                    format!("line {}: Resources must be a mapping", value.line),
                ));
            }
            return self.value(section, value, Scope::Template);
        };

        let (kind, scope) = match key.name.as_str() {
            "Resources" => (NodeKind::Resource, Scope::Template),
            "Parameters" => (NodeKind::Parameter, Scope::Template),
            "Mappings" => (NodeKind::Mapping, Scope::Mappings),
            "Conditions" => (NodeKind::Condition, Scope::Template),
            _ => (NodeKind::Output, Scope::Template),
        };

        for (name, body) in declarations {
            let decl = self.add_child(
                section,
                GraphNode::keyed(kind, &name.name, name.line),
                EdgeKind::Has,
            );
            if let Some(namespace) = Namespace::for_section(&key.name) {
                if self.symbols.insert(namespace, &name.name, decl).is_some() {
                    return Err(IacError::parse(
                        self.path,
                        format!("line {}: duplicate logical name '{}'", name.line, name.name),
                    ));
                }
            }
            self.value(decl, body, scope)?;
            if kind == NodeKind::Resource {
                self.tag_resource_type(decl, body);
            }
        }
        Ok(())
    }

    fn tag_resource_type(&mut self, resource: NodeId, body: &DocNode) {
        let Some(type_name) = body
            .get("Type")
            .and_then(DocNode::as_scalar)
            .and_then(Scalar::as_str)
        else {
            return;
        };
        if !is_type_name(type_name) {
            return;
        }
        if let Some(node) = self.graph.get_mut(resource) {
            node.labels
                .extend(type_name.split("::").map(str::to_string));
            node.resource_type = Some(type_name.to_string());
        }
    }

    fn entry(&mut self, parent: NodeId, key: &DocKey, value: &DocNode, scope: Scope) -> Result<()> {
        if IntrinsicFn::is_intrinsic_key(&key.name) {
            let function = IntrinsicFn::from_key(&key.name).ok_or_else(|| {
                IacError::UnsupportedIntrinsicFunction {
                    path: self.path.to_string(),
                    name: key.name.clone(),
                    line: key.line,
                }
            })?;
            let call = self.add_child(
                parent,
                GraphNode::keyed(NodeKind::Function(function), &key.name, key.line),
                EdgeKind::ExecuteFn,
            );
            self.functions.push(call);
            return self.arguments(call, value, scope);
        }

        let child = self.add_child(
            parent,
            GraphNode::keyed(scope.property_kind(), &key.name, key.line),
            EdgeKind::Has,
        );
        self.value(child, value, scope)
    }

    fn value(&mut self, parent: NodeId, value: &DocNode, scope: Scope) -> Result<()> {
        match &value.value {
            DocValue::Scalar(scalar) => {
                if let Some(node) = self.graph.get_mut(parent) {
                    node.value = Some(scalar.clone());
                    node.line = value.line;
                }
                Ok(())
            }
            DocValue::Mapping(entries) => {
                for (key, child) in entries {
                    self.entry(parent, key, child, scope)?;
                }
                Ok(())
            }
            DocValue::Sequence(items) => {
                if let Some(node) = self.graph.get_mut(parent) {
                    node.labels.insert("Array".to_string());
                }
                self.items(parent, items, scope)
            }
        }
    }

    /// Function arguments hang off the function node itself.
    fn arguments(&mut self, call: NodeId, value: &DocNode, scope: Scope) -> Result<()> {
        match &value.value {
            DocValue::Scalar(scalar) => {
                let mut arg = GraphNode::new(
                    NodeKind::Argument,
                    BTreeSet::from(["Value".to_string()]),
                    value.line,
                );
                arg.value = Some(scalar.clone());
                self.add_child(call, arg, EdgeKind::Has);
                Ok(())
            }
            DocValue::Sequence(items) => self.items(call, items, scope),
            DocValue::Mapping(entries) => {
                for (key, child) in entries {
                    self.entry(call, key, child, scope)?;
                }
                Ok(())
            }
        }
    }

    fn items(&mut self, parent: NodeId, items: &[DocNode], scope: Scope) -> Result<()> {
        for (index, item) in items.iter().enumerate() {
            let child = self.add_child(
                parent,
                GraphNode::item(scope.item_kind(), index, item.line),
                EdgeKind::Has,
            );
            self.value(child, item, scope)?;
        }
        Ok(())
    }

    fn add_child(&mut self, parent: NodeId, node: GraphNode, kind: EdgeKind) -> NodeId {
        let id = self.graph.add_node(node);
        self.graph.add_edge(parent, id, kind);
        id
    }
}

/// `AWS::S3::Bucket`, `Custom::Thing`: two or more alphanumeric parts joined by `::`.
fn is_type_name(value: &str) -> bool {
    let parts: Vec<&str> = value.split("::").collect();
    parts.len() >= 2
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

struct ResolutionPass<'a> {
    graph: &'a mut TemplateGraph,
    unit: &'a CompiledUnit,
    shared: &'a SymbolTable,
    options: CompileOptions,
}

impl ResolutionPass<'_> {
    fn run(&mut self) -> Result<()> {
        for &call in &self.unit.functions {
            self.resolve(call)?;
        }
        Ok(())
    }

    fn resolve(&mut self, call: NodeId) -> Result<()> {
        let Some(node) = self.graph.get(call) else {
            return Ok(());
        };
        let NodeKind::Function(function) = node.kind else {
            return Ok(());
        };
        let line = node.line;

        match function {
            IntrinsicFn::Ref => {
                let name = self
                    .literal_argument(call)
                    .ok_or_else(|| self.malformed(function, line, "expects a logical name"))?;
                self.reference(call, &name, line)
            }
            IntrinsicFn::GetAtt => self.resolve_get_att(call, line),
            IntrinsicFn::Sub => self.resolve_sub(call, line),
            IntrinsicFn::FindInMap => self.resolve_find_in_map(call, line),
            IntrinsicFn::If => {
                let name = self
                    .item_text(call, 0)
                    .ok_or_else(|| self.malformed(function, line, "expects a condition name"))?;
                self.link(call, Namespace::Conditions, &name, line)
            }
            IntrinsicFn::And | IntrinsicFn::Or | IntrinsicFn::Not => {
                for arg in self.children(call) {
                    let condition = self
                        .child_named(arg, "Condition")
                        .and_then(|c| self.text(c));
                    if let Some(name) = condition {
                        self.link(call, Namespace::Conditions, &name, line)?;
                    }
                }
                Ok(())
            }
            // Literal arguments stay as children and nested calls sit in the queue.
            IntrinsicFn::Equals
            | IntrinsicFn::Join
            | IntrinsicFn::Split
            | IntrinsicFn::Select
            | IntrinsicFn::Base64
            | IntrinsicFn::Cidr
            | IntrinsicFn::GetAZs
            | IntrinsicFn::ImportValue
            | IntrinsicFn::Transform
            | IntrinsicFn::Length
            | IntrinsicFn::ToJsonString => Ok(()),
        }
    }

    fn resolve_get_att(&mut self, call: NodeId, line: usize) -> Result<()> {
        let (name, attribute) = match self.literal_argument(call) {
            Some(dotted) => match dotted.split_once('.') {
                Some((name, attribute)) => (name.to_string(), Some(attribute.to_string())),
                None => {
                    return Err(self.malformed(
                        IntrinsicFn::GetAtt,
                        line,
                        "expects <name>.<attribute>",
                    ))
                }
            },
            None => {
                let name = self.item_text(call, 0).ok_or_else(|| {
                    self.malformed(IntrinsicFn::GetAtt, line, "expects [name, attribute]")
                })?;
                (name, self.item_text(call, 1))
            }
        };

        self.reference(call, &name, line)?;
        if let Some(attribute) = attribute {
            let mut node = GraphNode::new(
                NodeKind::Argument,
                BTreeSet::from(["AttributeName".to_string()]),
                line,
            );
            node.value = Some(Scalar::Str(attribute));
            let id = self.graph.add_node(node);
            self.graph.add_edge(call, id, EdgeKind::Has);
        }
        Ok(())
    }

    fn resolve_sub(&mut self, call: NodeId, line: usize) -> Result<()> {
        let (template, bound) = match self.literal_argument(call) {
            Some(template) => (template, BTreeSet::new()),
            None => {
                let Some(template) = self.item_text(call, 0) else {
                    return Ok(());
                };
                let bound: BTreeSet<String> = self
                    .item(call, 1)
                    .map(|vars| {
                        self.children(vars)
                            .into_iter()
                            .filter_map(|c| self.graph.get(c).and_then(|n| n.name.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                (template, bound)
            }
        };

        for name in sub::placeholders(&template) {
            if !bound.contains(&name) {
                self.reference(call, &name, line)?;
            }
        }
        Ok(())
    }

    fn resolve_find_in_map(&mut self, call: NodeId, line: usize) -> Result<()> {
        let Some(map_name) = self.item_text(call, 0) else {
            return Ok(());
        };
        let Some(mut target) = self.lookup(Namespace::Mappings, &map_name) else {
            return self.unresolved(&map_name, line);
        };
        for index in 1..=2 {
            let Some(key) = self.item_text(call, index) else {
                break;
            };
            match self.child_named(target, &key) {
                Some(next) => target = next,
                None => break,
            }
        }
        self.graph.add_edge(call, target, EdgeKind::Reference);
        Ok(())
    }

    /// `Ref` semantics: pseudo-parameters go to the shared provider node.
    fn reference(&mut self, call: NodeId, name: &str, line: usize) -> Result<()> {
        if is_pseudo_parameter(name) {
            let provider = self.graph.provider_node(name);
            self.graph.add_edge(call, provider, EdgeKind::Reference);
            return Ok(());
        }
        self.link(call, Namespace::References, name, line)
    }

    fn link(&mut self, call: NodeId, namespace: Namespace, name: &str, line: usize) -> Result<()> {
        match self.lookup(namespace, name) {
            Some(target) => {
                self.graph.add_edge(call, target, EdgeKind::Reference);
                Ok(())
            }
            None => self.unresolved(name, line),
        }
    }

    fn lookup(&self, namespace: Namespace, name: &str) -> Option<NodeId> {
        self.unit
            .symbols
            .get(namespace, name)
            .or_else(|| self.shared.get(namespace, name))
    }

    fn unresolved(&self, name: &str, line: usize) -> Result<()> {
        if self.options.strict_references {
            return Err(IacError::UnresolvedReference {
                path: self.unit.path.clone(),
                name: name.to_string(),
                line,
            });
        }
        warn!(path = %self.unit.path, name, line, "skipping unresolved reference");
        Ok(())
    }

    fn malformed(&self, function: IntrinsicFn, line: usize, message: &str) -> IacError {
        IacError::parse(
            &self.unit.path,
            format!("line {}: {} {}", line, function, message),
        )
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.graph
            .adjacent(id, Direction::Outgoing)
            .into_iter()
            .filter(|(kind, _)| *kind == EdgeKind::Has)
            .map(|(_, child)| child)
            .collect()
    }

    fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .into_iter()
            .find(|c| self.graph.get(*c).and_then(|n| n.name.as_deref()) == Some(name))
    }

    fn item(&self, call: NodeId, index: usize) -> Option<NodeId> {
        self.children(call).into_iter().find(|c| {
            self.graph
                .get(*c)
                .is_some_and(|n| n.kind != NodeKind::Argument && n.index == Some(index))
        })
    }

    fn item_text(&self, call: NodeId, index: usize) -> Option<String> {
        self.item(call, index).and_then(|item| self.text(item))
    }

    /// The scalar `Ref: Name` / `Fn::GetAtt: Name.Attr` argument.
    fn literal_argument(&self, call: NodeId) -> Option<String> {
        self.children(call)
            .into_iter()
            .find(|c| {
                self.graph
                    .get(*c)
                    .is_some_and(|n| n.kind == NodeKind::Argument && n.has_label("Value"))
            })
            .and_then(|arg| self.text(arg))
    }

    fn text(&self, id: NodeId) -> Option<String> {
        match self.graph.get(id)?.value.as_ref()? {
            Scalar::Null => None,
            Scalar::Str(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
