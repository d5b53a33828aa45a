use super::{CheckDef, CheckInput, Risk, Service, Vulnerability};
use crate::graph::NodeId;

const DB_INSTANCE: &str = "AWS::RDS::DBInstance";
const DB_CLUSTER: &str = "AWS::RDS::DBCluster";

pub static CHECKS: &[CheckDef] = &[
    CheckDef {
        id: "rds.publicly_accessible",
        service: Service::Rds,
        risk: Risk::High,
        description: "Database instance is reachable from the internet",
        msg_open: "RDS instances are publicly accessible",
        msg_closed: "RDS instances are not publicly accessible",
        eval: publicly_accessible,
    },
    CheckDef {
        id: "rds.storage_not_encrypted",
        service: Service::Rds,
        risk: Risk::Medium,
        description: "Database storage is not encrypted at rest",
        msg_open: "RDS storage is not encrypted",
        msg_closed: "RDS storage is encrypted",
        eval: storage_not_encrypted,
    },
    CheckDef {
        id: "rds.deletion_protection_disabled",
        service: Service::Rds,
        risk: Risk::Low,
        description: "Database can be deleted without first disabling deletion protection",
        msg_open: "RDS databases have deletion protection disabled",
        msg_closed: "RDS databases have deletion protection enabled",
        eval: deletion_protection_disabled,
    },
];

/// Resources whose boolean `property` is absent or may be false.
fn unset_or_false(
    input: &CheckInput<'_>,
    resources: Vec<NodeId>,
    property: &str,
    reason: &str,
) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for resource in resources {
        let entity = format!("{}/{}/false", input.resource_type(resource), property);
        match input.property(resource, property) {
            None => found.push(input.vulnerability(resource, &entity, input.line(resource), reason)),
            Some(node) => {
                for (literal, value) in input.booleans(node) {
                    if !value {
                        found.push(input.vulnerability(
                            resource,
                            &entity,
                            input.line(literal),
                            reason,
                        ));
                    }
                }
            }
        }
    }
    found
}

fn publicly_accessible(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for instance in input.resources(&[DB_INSTANCE]) {
        let Some(node) = input.property(instance, "PubliclyAccessible") else {
            continue;
        };
        for (literal, value) in input.booleans(node) {
            if value {
                found.push(input.vulnerability(
                    instance,
                    format!("{}/PubliclyAccessible/true", DB_INSTANCE),
                    input.line(literal),
                    "is publicly accessible",
                ));
            }
        }
    }
    found
}

fn storage_not_encrypted(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    // Cluster members inherit encryption from their cluster.
    let resources = input
        .resources(&[DB_INSTANCE, DB_CLUSTER])
        .into_iter()
        .filter(|r| input.property(*r, "DBClusterIdentifier").is_none())
        .collect();
    unset_or_false(input, resources, "StorageEncrypted", "is not encrypted")
}

fn deletion_protection_disabled(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let resources = input.resources(&[DB_INSTANCE, DB_CLUSTER]);
    unset_or_false(
        input,
        resources,
        "DeletionProtection",
        "has deletion protection disabled",
    )
}
