//! IAM checks over roles, users, inline policies and managed policies.

use super::services::is_write_action;
use super::{CheckDef, CheckInput, Risk, Service, Vulnerability};
use crate::graph::NodeId;
use crate::query;
use regex::Regex;
use std::sync::LazyLock;

const ROLE: &str = "AWS::IAM::Role";
const USER: &str = "AWS::IAM::User";
const POLICY: &str = "AWS::IAM::Policy";
const MANAGED_POLICY: &str = "AWS::IAM::ManagedPolicy";

/// `*`, `*Something` or `service:*`.
static WILDCARD_ACTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?:\*|\w+:\*$)").ok());

pub static CHECKS: &[CheckDef] = &[
    CheckDef {
        id: "iam.role_over_privileged",
        service: Service::Iam,
        risk: Risk::Medium,
        description: "Role grants wildcard actions or resources, uses black listing, or attaches AdministratorAccess",
        msg_open: "IAM Role grants unnecessary privileges",
        msg_closed: "IAM Role grants granular privileges",
        eval: role_over_privileged,
    },
    CheckDef {
        id: "iam.policy_misconfigured",
        service: Service::Iam,
        risk: Risk::Medium,
        description: "Policy grants wildcard privileges, uses black listing, or applies to users",
        msg_open: "IAM Policy is miss configured",
        msg_closed: "IAM Policy is properly configured",
        eval: policy_misconfigured,
    },
    CheckDef {
        id: "iam.managed_policy_misconfigured",
        service: Service::Iam,
        risk: Risk::Medium,
        description: "Managed policy grants wildcard privileges, uses black listing, or applies to users",
        msg_open: "IAM ManagedPolicy is miss configured",
        msg_closed: "IAM ManagedPolicy is properly configured",
        eval: managed_policy_misconfigured,
    },
    CheckDef {
        id: "iam.user_inline_policies",
        service: Service::Iam,
        risk: Risk::Medium,
        description: "User carries inline policies instead of getting permissions through a role",
        msg_open: "IAM User is not assigned permissions through a role",
        msg_closed: "IAM User is assigned permissions through a role",
        eval: user_inline_policies,
    },
    CheckDef {
        id: "iam.wildcard_resource_on_write_action",
        service: Service::Iam,
        risk: Risk::Medium,
        description: "Policy allows write actions on Resource \"*\"",
        msg_open: "Write actions are allowed for all resources.",
        msg_closed: "Write actions are not allowed for all resources.",
        eval: wildcard_resource_on_write_action,
    },
    CheckDef {
        id: "iam.privileges_over_iam",
        service: Service::Iam,
        risk: Risk::Medium,
        description: "Policy allows IAM actions",
        msg_open: "Policies have privileges over iam.",
        msg_closed: "Policies have no privileges over iam.",
        eval: privileges_over_iam,
    },
    CheckDef {
        id: "iam.full_access_to_ssm",
        service: Service::Iam,
        risk: Risk::Medium,
        description: "Policy allows ssm:*, which lets anyone run commands as root on instances",
        msg_open: "Policy allows full access to SSM.",
        msg_closed: "Policy does not allow full access to SSM.",
        eval: full_access_to_ssm,
    },
];

fn is_wildcard_action(action: &str) -> bool {
    WILDCARD_ACTION
        .as_ref()
        .is_some_and(|re| re.is_match(action))
}

/// A policy document attached to a resource, inline or standalone.
struct PolicyDocument {
    resource: NodeId,
    node: NodeId,
    /// Policy name when it is a plain string, else the resource's logical name.
    name: String,
}

fn policy_documents(input: &CheckInput<'_>, types: &[&str]) -> Vec<PolicyDocument> {
    let mut documents = Vec::new();
    for resource in input.resources(types) {
        let resource_type = input.resource_type(resource);
        if let Some(node) = input.property(resource, "PolicyDocument") {
            let short = resource_type.rsplit("::").next().unwrap_or_default();
            let name = input
                .property(resource, &format!("{}Name", short))
                .and_then(|n| first_string(input, n))
                .unwrap_or_else(|| input.name(resource));
            documents.push(PolicyDocument {
                resource,
                node,
                name,
            });
        }
        for policy in inline_policies(input, resource) {
            let Some(node) = input.child(policy, "PolicyDocument") else {
                continue;
            };
            let name = input
                .child(policy, "PolicyName")
                .and_then(|n| first_string(input, n))
                .unwrap_or_else(|| input.name(resource));
            documents.push(PolicyDocument {
                resource,
                node,
                name,
            });
        }
    }
    documents
}

fn inline_policies(input: &CheckInput<'_>, resource: NodeId) -> Vec<NodeId> {
    input
        .property(resource, "Policies")
        .map(|list| {
            input
                .items(list)
                .into_iter()
                .flat_map(|item| input.items(item))
                .collect()
        })
        .unwrap_or_default()
}

fn first_string(input: &CheckInput<'_>, node: NodeId) -> Option<String> {
    input.strings(node).into_iter().next().map(|(_, s)| s)
}

/// Statements of a document whose `Effect` may be `Allow`.
fn allow_statements(input: &CheckInput<'_>, document: NodeId) -> Vec<NodeId> {
    query::statements(input.graph, document, input.limits.resolve_hops)
        .into_iter()
        .flat_map(|statement| input.items(statement))
        .filter(|statement| {
            input
                .child(*statement, "Effect")
                .is_some_and(|effect| input.strings(effect).iter().any(|(_, e)| e == "Allow"))
        })
        .collect()
}

fn field_strings(input: &CheckInput<'_>, statement: NodeId, field: &str) -> Vec<(NodeId, String)> {
    input
        .child(statement, field)
        .map(|node| input.strings(node))
        .unwrap_or_default()
}

/// An entity suffix, its line and the reason it is reported.
type Finding = (String, usize, String);

const BLACK_LISTING: &str = "avoid security through black listing";
const WILDCARD: &str = "grants wildcard privileges";

/// Wildcard actions and resources plus `NotAction`/`NotResource` in allow statements.
fn permission_findings(input: &CheckInput<'_>, document: NodeId, prefix: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for statement in allow_statements(input, document) {
        for field in ["NotAction", "NotResource"] {
            if let Some(node) = input.child(statement, field) {
                findings.push((
                    format!("{}/Statement/{}", prefix, field),
                    input.line(node),
                    BLACK_LISTING.to_string(),
                ));
            }
        }
        for (literal, action) in field_strings(input, statement, "Action") {
            if is_wildcard_action(&action) {
                findings.push((
                    format!("{}/Statement/Action: {}", prefix, action),
                    input.line(literal),
                    WILDCARD.to_string(),
                ));
            }
        }
        for (literal, resource) in field_strings(input, statement, "Resource") {
            if resource == "*" {
                findings.push((
                    format!("{}/Statement/Resource: {}", prefix, resource),
                    input.line(literal),
                    WILDCARD.to_string(),
                ));
            }
        }
    }
    findings
}

/// Trust policy: wildcard actions, `NotAction` and `NotPrincipal` in allow statements.
fn trust_findings(input: &CheckInput<'_>, document: NodeId) -> Vec<Finding> {
    let prefix = "AssumeRolePolicyDocument/Statement";
    let mut findings = Vec::new();
    for statement in allow_statements(input, document) {
        for (literal, action) in field_strings(input, statement, "Action") {
            if is_wildcard_action(&action) {
                findings.push((
                    format!("{}/Action: {}", prefix, action),
                    input.line(literal),
                    WILDCARD.to_string(),
                ));
            }
        }
        for field in ["NotAction", "NotPrincipal"] {
            if let Some(node) = input.child(statement, field) {
                findings.push((
                    format!("{}/{}", prefix, field),
                    input.line(node),
                    BLACK_LISTING.to_string(),
                ));
            }
        }
    }
    findings
}

fn report(
    input: &CheckInput<'_>,
    resource: NodeId,
    entity_prefix: &str,
    findings: Vec<Finding>,
) -> Vec<Vulnerability> {
    findings
        .into_iter()
        .map(|(entity, line, reason)| {
            input.vulnerability(resource, format!("{}/{}", entity_prefix, entity), line, reason)
        })
        .collect()
}

fn role_over_privileged(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for role in input.resources(&[ROLE]) {
        let mut findings: Vec<Finding> = Vec::new();

        if let Some(arns) = input.property(role, "ManagedPolicyArns") {
            for (literal, arn) in input.strings(arns) {
                if arn.contains("AdministratorAccess") {
                    findings.push((
                        format!("ManagedPolicyArns: {}", arn),
                        input.line(literal),
                        "grants excessive privileges".to_string(),
                    ));
                }
            }
        }
        for policy in inline_policies(input, role) {
            if let Some(document) = input.child(policy, "PolicyDocument") {
                findings.extend(permission_findings(
                    input,
                    document,
                    "Policies/PolicyDocument",
                ));
            }
        }
        if let Some(trust) = input.property(role, "AssumeRolePolicyDocument") {
            findings.extend(trust_findings(input, trust));
        }

        found.extend(report(input, role, ROLE, findings));
    }
    found
}

/// Who a `Users` entry names: its string value, or the user resources it references.
fn user_names(input: &CheckInput<'_>, item: NodeId) -> Vec<String> {
    let names: Vec<String> = input.strings(item).into_iter().map(|(_, s)| s).collect();
    if !names.is_empty() {
        return names;
    }
    let referenced: Vec<String> =
        query::referenced_resources(input.graph, item, input.limits.resolve_hops)
            .into_iter()
            .map(|user| input.name(user))
            .collect();
    if referenced.is_empty() {
        vec!["any".to_string()]
    } else {
        referenced
    }
}

fn misconfigured_policies(input: &CheckInput<'_>, resource_type: &str) -> Vec<Vulnerability> {
    let kind = resource_type.rsplit("::").next().unwrap_or_default();
    let mut found = Vec::new();
    for policy in input.resources(&[resource_type]) {
        let mut findings: Vec<Finding> = Vec::new();
        if let Some(document) = input.property(policy, "PolicyDocument") {
            findings.extend(permission_findings(input, document, "PolicyDocument"));
        }
        if let Some(users) = input.property(policy, "Users") {
            for item in input.items(users) {
                for user in user_names(input, item) {
                    findings.push((
                        format!("Users: {}", user),
                        input.line(item),
                        format!("{} applied to user, apply to role instead", kind),
                    ));
                }
            }
        }
        found.extend(report(input, policy, resource_type, findings));
    }
    found
}

fn policy_misconfigured(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    misconfigured_policies(input, POLICY)
}

fn managed_policy_misconfigured(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    misconfigured_policies(input, MANAGED_POLICY)
}

fn user_inline_policies(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for user in input.resources(&[USER]) {
        for policy in inline_policies(input, user) {
            let name = input
                .child(policy, "PolicyName")
                .and_then(|n| first_string(input, n))
                .unwrap_or_else(|| "any".to_string());
            found.push(input.vulnerability(
                user,
                format!("{}/Policies: {}", USER, name),
                input.line(policy),
                "do not attach inline policies; use role-based access control",
            ));
        }
    }
    found
}

/// Documents with an allow statement matching `pred`, reported once per document.
fn documents_allowing(
    input: &CheckInput<'_>,
    reason: &str,
    pred: impl Fn(&CheckInput<'_>, NodeId) -> bool,
) -> Vec<Vulnerability> {
    policy_documents(input, &[ROLE, POLICY, MANAGED_POLICY])
        .into_iter()
        .filter(|doc| {
            allow_statements(input, doc.node)
                .into_iter()
                .any(|statement| pred(input, statement))
        })
        .map(|doc| {
            let entity = format!("{}/{}", input.resource_type(doc.resource), doc.name);
            input.vulnerability(doc.resource, entity, input.line(doc.node), reason)
        })
        .collect()
}

fn wildcard_resource_on_write_action(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    documents_allowing(
        input,
        "allows write actions on a wildcard resource.",
        |input, statement| {
            let all_resources = field_strings(input, statement, "Resource")
                .iter()
                .any(|(_, r)| r == "*");
            all_resources
                && field_strings(input, statement, "Action")
                    .iter()
                    .any(|(_, a)| is_write_action(a))
        },
    )
}

fn privileges_over_iam(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    documents_allowing(input, "has privileges over iam.", |input, statement| {
        field_strings(input, statement, "Action")
            .iter()
            .any(|(_, a)| a == "*" || a.split(':').next() == Some("iam"))
    })
}

fn full_access_to_ssm(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for doc in policy_documents(input, &[ROLE, POLICY, MANAGED_POLICY]) {
        let entity = format!("{}/PolicyDocument", input.resource_type(doc.resource));
        for statement in allow_statements(input, doc.node) {
            for (literal, action) in field_strings(input, statement, "Action") {
                if action == "ssm:*" {
                    found.push(input.vulnerability(
                        doc.resource,
                        &entity,
                        input.line(literal),
                        "allows full access to SSM.",
                    ));
                }
            }
        }
    }
    found
}
