use crate::graph::NodeId;
use std::collections::HashMap;

/// Logical-name namespaces of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `Ref` targets: resources and parameters.
    References,
    Mappings,
    Conditions,
}

impl Namespace {
    pub fn for_section(section: &str) -> Option<Self> {
        match section {
            "Resources" | "Parameters" => Some(Namespace::References),
            "Mappings" => Some(Namespace::Mappings),
            "Conditions" => Some(Namespace::Conditions),
            _ => None,
        }
    }
}

/// Logical name -> declaration node, filled by the structural pass.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<(Namespace, String), NodeId>,
}

impl SymbolTable {
    /// Register a declaration. Returns the previous node if the name was already taken.
    pub fn insert(&mut self, namespace: Namespace, name: &str, node: NodeId) -> Option<NodeId> {
        self.entries.insert((namespace, name.to_string()), node)
    }

    pub fn get(&self, namespace: Namespace, name: &str) -> Option<NodeId> {
        self.entries.get(&(namespace, name.to_string())).copied()
    }

    /// Add every symbol of `other` that is not already declared here.
    pub fn absorb(&mut self, other: &SymbolTable) {
        for (key, node) in &other.entries {
            self.entries.entry(key.clone()).or_insert(*node);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_are_separate() {
        let mut table = SymbolTable::default();
        assert!(table.insert(Namespace::References, "Prod", NodeId(1)).is_none());
        assert!(table.insert(Namespace::Conditions, "Prod", NodeId(2)).is_none());
        assert_eq!(table.get(Namespace::References, "Prod"), Some(NodeId(1)));
        assert_eq!(table.get(Namespace::Conditions, "Prod"), Some(NodeId(2)));
        assert_eq!(table.get(Namespace::Mappings, "Prod"), None);
        assert_eq!(
            table.insert(Namespace::References, "Prod", NodeId(3)),
            Some(NodeId(1))
        );
    }

    #[test]
    fn test_absorb_keeps_existing_entries() {
        let mut shared = SymbolTable::default();
        shared.insert(Namespace::References, "Bucket", NodeId(1));
        let mut other = SymbolTable::default();
        other.insert(Namespace::References, "Bucket", NodeId(9));
        other.insert(Namespace::Mappings, "Regions", NodeId(10));
        shared.absorb(&other);
        assert_eq!(shared.len(), 2);
        assert_eq!(shared.get(Namespace::References, "Bucket"), Some(NodeId(1)));
    }
}
