pub mod ec2;
pub mod iam;
pub mod rds;
pub mod s3;
pub mod services;

use crate::context::ScanContext;
use crate::error::{IacError, Result};
use crate::graph::{GraphBackend, NodeId};
use crate::query::{self, QueryLimits};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Verdict of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Open,
    Closed,
    Unknown,
}

impl Status {
    pub fn symbol(&self) -> &str {
        match self {
            Status::Open => "OPEN",
            Status::Closed => "CLOSED",
            Status::Unknown => "UNKNOWN",
        }
    }
}

/// Risk level of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Risk {
    High,
    Medium,
    Low,
}

impl Risk {
    pub fn priority(&self) -> u8 {
        match self {
            Risk::High => 3,
            Risk::Medium => 2,
            Risk::Low => 1,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Risk::High => "HIGH",
            Risk::Medium => "MEDIUM",
            Risk::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Ec2,
    Iam,
    S3,
    Rds,
}

impl Service {
    pub fn label(&self) -> &str {
        match self {
            Service::Ec2 => "EC2",
            Service::Iam => "IAM",
            Service::S3 => "S3",
            Service::Rds => "RDS",
        }
    }
}

/// One vulnerable spot in a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vulnerability {
    pub path: String,
    pub entity: String,
    pub identifier: String,
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for Vulnerability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} {}",
            self.path, self.entity, self.identifier, self.reason
        )
    }
}

/// Outcome of running one check over one scan unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check: String,
    pub risk: Risk,
    pub status: Status,
    pub message: String,
    pub vulnerabilities: Vec<Vulnerability>,
}

impl CheckResult {
    /// OPEN with the check's open message when anything was found, CLOSED otherwise.
    pub fn from_vulnerabilities(def: &CheckDef, mut vulnerabilities: Vec<Vulnerability>) -> Self {
        vulnerabilities.sort_by(|a, b| {
            (&a.path, a.line, &a.entity, &a.reason, &a.identifier)
                .cmp(&(&b.path, b.line, &b.entity, &b.reason, &b.identifier))
        });
        vulnerabilities.dedup();

        let (status, message) = if vulnerabilities.is_empty() {
            (Status::Closed, def.msg_closed)
        } else {
            (Status::Open, def.msg_open)
        };
        Self {
            check: def.id.to_string(),
            risk: def.risk,
            status,
            message: message.to_string(),
            vulnerabilities,
        }
    }

    pub fn unknown(def: &CheckDef, message: impl Into<String>) -> Self {
        Self {
            check: def.id.to_string(),
            risk: def.risk,
            status: Status::Unknown,
            message: message.into(),
            vulnerabilities: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == Status::Open
    }
}

/// Read-only view handed to check functions.
pub struct CheckInput<'a> {
    pub graph: &'a dyn GraphBackend,
    pub limits: QueryLimits,
}

impl CheckInput<'_> {
    pub fn resources(&self, types: &[&str]) -> Vec<NodeId> {
        query::resources(self.graph, types)
    }

    /// Logical name of a declaration node.
    pub fn name(&self, node: NodeId) -> String {
        self.graph
            .node(node)
            .map(|n| n.display_name())
            .unwrap_or_default()
    }

    pub fn line(&self, node: NodeId) -> usize {
        self.graph.node(node).map(|n| n.line).unwrap_or_default()
    }

    pub fn resource_type(&self, resource: NodeId) -> String {
        self.graph
            .node(resource)
            .and_then(|n| n.resource_type.clone())
            .unwrap_or_default()
    }

    pub fn child(&self, node: NodeId, name: &str) -> Option<NodeId> {
        query::child_named(self.graph, node, name)
    }

    /// Follow a chain of child names, e.g. `["Properties", "LaunchTemplateData"]`.
    pub fn descend(&self, node: NodeId, names: &[&str]) -> Option<NodeId> {
        names
            .iter()
            .try_fold(node, |current, name| self.child(current, name))
    }

    /// `Properties/<name>` of a resource.
    pub fn property(&self, resource: NodeId, name: &str) -> Option<NodeId> {
        self.descend(resource, &["Properties", name])
    }

    pub fn items(&self, node: NodeId) -> Vec<NodeId> {
        query::list_items(self.graph, node, self.limits.resolve_hops)
    }

    pub fn strings(&self, node: NodeId) -> Vec<(NodeId, String)> {
        query::string_values(self.graph, node, self.limits.resolve_hops)
    }

    /// Values `node` may take that read as template booleans.
    pub fn booleans(&self, node: NodeId) -> Vec<(NodeId, bool)> {
        query::resolve_literal(
            self.graph,
            node,
            |v| v.to_boolean().is_some(),
            self.limits.resolve_hops,
        )
        .into_iter()
        .filter_map(|id| {
            let value = self.graph.node(id)?.value.as_ref()?.to_boolean()?;
            Some((id, value))
        })
        .collect()
    }

    /// Every non-null scalar `node` may take, rendered as text.
    pub fn texts(&self, node: NodeId) -> Vec<(NodeId, String)> {
        query::resolve_literal(
            self.graph,
            node,
            |v| !matches!(v, crate::document::Scalar::Null),
            self.limits.resolve_hops,
        )
        .into_iter()
        .filter_map(|id| {
            let value = self.graph.node(id)?.value.as_ref()?.to_string();
            Some((id, value))
        })
        .collect()
    }

    pub fn vulnerability(
        &self,
        resource: NodeId,
        entity: impl Into<String>,
        line: usize,
        reason: impl Into<String>,
    ) -> Vulnerability {
        Vulnerability {
            path: query::template_path(self.graph, resource).unwrap_or_default(),
            entity: entity.into(),
            identifier: self.name(resource),
            line,
            reason: reason.into(),
        }
    }
}

/// A registered check.
pub struct CheckDef {
    pub id: &'static str,
    pub service: Service,
    pub risk: Risk,
    pub description: &'static str,
    pub msg_open: &'static str,
    pub msg_closed: &'static str,
    pub eval: fn(&CheckInput<'_>) -> Vec<Vulnerability>,
}

impl fmt::Debug for CheckDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckDef")
            .field("id", &self.id)
            .field("risk", &self.risk)
            .finish()
    }
}

/// The full catalogue, grouped by service.
pub fn all_checks() -> Vec<&'static CheckDef> {
    ec2::CHECKS
        .iter()
        .chain(iam::CHECKS)
        .chain(s3::CHECKS)
        .chain(rds::CHECKS)
        .collect()
}

pub fn find_check(id: &str) -> Option<&'static CheckDef> {
    all_checks().into_iter().find(|c| c.id == id)
}

/// Run one check against a compiled graph.
pub fn evaluate(def: &CheckDef, graph: &dyn GraphBackend, limits: QueryLimits) -> CheckResult {
    let input = CheckInput { graph, limits };
    CheckResult::from_vulnerabilities(def, (def.eval)(&input))
}

/// Turn designated failures into an UNKNOWN verdict and let every other error through.
pub fn unknown_if(def: &CheckDef, result: Result<CheckResult>) -> Result<CheckResult> {
    match result {
        Err(e) if e.is_designated() => {
            debug!(check = def.id, error = %e, "check could not complete");
            Ok(CheckResult::unknown(def, e.unknown_message()))
        }
        other => other,
    }
}

/// Compile `paths` as one unit and run a single check.
pub fn run_check(ctx: &ScanContext, def: &CheckDef, paths: &[PathBuf]) -> Result<CheckResult> {
    let result = ctx
        .compile_paths(paths)
        .map(|graph| evaluate(def, graph.as_ref(), ctx.limits()));
    unknown_if(def, result)
}

/// Compile `paths` once and run every check in `defs`.
pub fn run_checks(
    ctx: &ScanContext,
    defs: &[&CheckDef],
    paths: &[PathBuf],
) -> Result<Vec<CheckResult>> {
    match ctx.compile_paths(paths) {
        Ok(graph) => Ok(defs
            .iter()
            .map(|def| evaluate(def, graph.as_ref(), ctx.limits()))
            .collect()),
        Err(e) if e.is_designated() => {
            debug!(error = %e, "unit could not be compiled");
            Ok(unknown_all(defs, &e))
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn unknown_all(defs: &[&CheckDef], error: &IacError) -> Vec<CheckResult> {
    defs.iter()
        .map(|def| CheckResult::unknown(def, error.unknown_message()))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalogue_ids_are_unique_and_prefixed() {
        let checks = all_checks();
        let ids: HashSet<&str> = checks.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), checks.len());
        for check in checks {
            let prefix = check.service.label().to_lowercase();
            assert!(check.id.starts_with(&format!("{}.", prefix)), "{}", check.id);
        }
        assert!(find_check("ec2.admin_ports_open_to_internet").is_some());
        assert!(find_check("ec2.nope").is_none());
    }

    #[test]
    fn test_every_check_on_missing_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let missing = vec![dir.path().join("absent.yaml")];
        let ctx = ScanContext::in_memory();
        for def in all_checks() {
            let result = run_check(&ctx, def, &missing).unwrap();
            assert_eq!(result.status, Status::Unknown, "{}", def.id);
            assert!(result.message.starts_with("FileNotFound: "));
            assert!(result.message.contains("not found"));
        }
    }

    #[test]
    fn test_results_are_sorted_and_deduplicated() {
        let def = find_check("ec2.unencrypted_volumes").unwrap();
        let vuln = |line: usize| Vulnerability {
            path: "a.yaml".into(),
            entity: "AWS::EC2::Volume".into(),
            identifier: "Data".into(),
            line,
            reason: "is not encrypted".into(),
        };
        let result = CheckResult::from_vulnerabilities(def, vec![vuln(9), vuln(3), vuln(9)]);
        assert_eq!(result.status, Status::Open);
        let lines: Vec<usize> = result.vulnerabilities.iter().map(|v| v.line).collect();
        assert_eq!(lines, vec![3, 9]);
        assert_eq!(
            result.vulnerabilities[0].to_string(),
            "a.yaml: AWS::EC2::Volume/Data is not encrypted"
        );
    }

    #[test]
    fn test_unknown_if_only_converts_designated_errors() {
        let def = find_check("s3.encryption_disabled").unwrap();
        let parsed = unknown_if(def, Err(IacError::parse("x.yaml", "bad"))).unwrap();
        assert_eq!(parsed.status, Status::Unknown);
        assert!(unknown_if(def, Err(IacError::GraphQueryBackend("down".into()))).is_err());
    }
}
