//! S3 checks over buckets and bucket policies.

use super::{CheckDef, CheckInput, Risk, Service, Vulnerability};
use crate::graph::NodeId;
use crate::query;

const BUCKET: &str = "AWS::S3::Bucket";
const BUCKET_POLICY: &str = "AWS::S3::BucketPolicy";

/// Canned ACLs other than `Private`.
const NON_PRIVATE_ACLS: &[&str] = &[
    "PublicRead",
    "PublicReadWrite",
    "AuthenticatedRead",
    "BucketOwnerRead",
    "BucketOwnerFullControl",
];

pub static CHECKS: &[CheckDef] = &[
    CheckDef {
        id: "s3.not_private_access_control",
        service: Service::S3,
        risk: Risk::High,
        description: "Bucket uses a canned ACL other than Private",
        msg_open: "S3 Bucket has not Private Access Control",
        msg_closed: "S3 Bucket has Private Access Control",
        eval: not_private_access_control,
    },
    CheckDef {
        id: "s3.encryption_disabled",
        service: Service::S3,
        risk: Risk::Medium,
        description: "Bucket declares no BucketEncryption",
        msg_open: "S3 buckets have encryption disabled",
        msg_closed: "S3 Buckets have encryption enabled",
        eval: encryption_disabled,
    },
    CheckDef {
        id: "s3.public_bucket_policy",
        service: Service::S3,
        risk: Risk::Medium,
        description: "Bucket policy allows the \"*\" principal",
        msg_open: "S3 bucket policy allows public access",
        msg_closed: "S3 bucket policy does not allow public access",
        eval: public_bucket_policy,
    },
    CheckDef {
        id: "s3.missing_secure_transport",
        service: Service::S3,
        risk: Risk::Medium,
        description: "Bucket policy lets requests through without SSL",
        msg_open: "S3 bucket does not use SSL transport",
        msg_closed: "S3 buckets use SSL transport",
        eval: missing_secure_transport,
    },
    CheckDef {
        id: "s3.server_side_encryption_disabled",
        service: Service::S3,
        risk: Risk::Medium,
        description: "Bucket policy allows objects uploaded without server-side encryption",
        msg_open: "S3 bucket policy allows unencrypted objects",
        msg_closed: "S3 bucket policy does not allow unencrypted objects",
        eval: server_side_encryption_disabled,
    },
    CheckDef {
        id: "s3.object_lock_disabled",
        service: Service::S3,
        risk: Risk::Low,
        description: "Bucket does not enable Object Lock",
        msg_open: "S3 buckets have object lock disabled",
        msg_closed: "S3 Buckets have object lock enabled",
        eval: object_lock_disabled,
    },
];

/// `(policy resource, statement)` for every statement of every bucket policy.
fn policy_statements(input: &CheckInput<'_>) -> Vec<(NodeId, NodeId)> {
    let mut found = Vec::new();
    for policy in input.resources(&[BUCKET_POLICY]) {
        let Some(document) = input.property(policy, "PolicyDocument") else {
            continue;
        };
        for statement in query::statements(input.graph, document, input.limits.resolve_hops) {
            for item in input.items(statement) {
                found.push((policy, item));
            }
        }
    }
    found
}

fn has_effect(input: &CheckInput<'_>, statement: NodeId, effect: &str) -> bool {
    input
        .child(statement, "Effect")
        .is_some_and(|node| input.strings(node).iter().any(|(_, e)| e == effect))
}

/// Boolean literals below `statement` under keys labeled `label`.
fn condition_flags(
    input: &CheckInput<'_>,
    statement: NodeId,
    label: &str,
    wanted: bool,
) -> Vec<NodeId> {
    query::find_values(
        input.graph,
        statement,
        label,
        |v| v.to_boolean() == Some(wanted),
        input.limits.search_hops,
    )
}

fn not_private_access_control(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for bucket in input.resources(&[BUCKET]) {
        let Some(acl) = input.property(bucket, "AccessControl") else {
            continue;
        };
        for (literal, value) in input.strings(acl) {
            if NON_PRIVATE_ACLS.contains(&value.as_str()) {
                found.push(input.vulnerability(
                    bucket,
                    format!("{}/AccessControl/{}", BUCKET, value),
                    input.line(literal),
                    "is not Private",
                ));
            }
        }
    }
    found
}

fn encryption_disabled(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    input
        .resources(&[BUCKET])
        .into_iter()
        .filter(|bucket| input.property(*bucket, "BucketEncryption").is_none())
        .map(|bucket| {
            input.vulnerability(
                bucket,
                format!("{}/BucketEncryption", BUCKET),
                input.line(bucket),
                "has encryption disabled.",
            )
        })
        .collect()
}

fn public_bucket_policy(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for (policy, statement) in policy_statements(input) {
        if !has_effect(input, statement, "Allow") {
            continue;
        }
        let Some(principal) = input.child(statement, "Principal") else {
            continue;
        };
        let mut candidates = vec![principal];
        candidates.extend(input.child(principal, "AWS"));
        for (literal, value) in candidates.into_iter().flat_map(|n| input.strings(n)) {
            if value == "*" {
                found.push(input.vulnerability(
                    policy,
                    format!("{}/PolicyDocument/Statement/Principal", BUCKET_POLICY),
                    input.line(literal),
                    "allows public access.",
                ));
            }
        }
    }
    found
}

fn missing_secure_transport(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for (policy, statement) in policy_statements(input) {
        // Deny on SecureTransport=true blocks SSL, Allow on false admits plain HTTP.
        let mut insecure = Vec::new();
        if has_effect(input, statement, "Deny") {
            insecure.extend(condition_flags(input, statement, "SecureTransport", true));
        }
        if has_effect(input, statement, "Allow") {
            insecure.extend(condition_flags(input, statement, "SecureTransport", false));
        }
        for literal in insecure {
            found.push(input.vulnerability(
                policy,
                format!(
                    "{}/PolicyDocument/Statement/Condition/Bool/aws:SecureTransport",
                    BUCKET_POLICY
                ),
                input.line(literal),
                "allows requests without secure transport.",
            ));
        }
    }
    found
}

fn server_side_encryption_disabled(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    let mut found = Vec::new();
    for (policy, statement) in policy_statements(input) {
        if !has_effect(input, statement, "Allow") {
            continue;
        }
        for literal in condition_flags(input, statement, "x_amz_server_side_encryption", false) {
            found.push(input.vulnerability(
                policy,
                format!(
                    "{}/PolicyDocument/Statement/Condition/Null/s3:x-amz-server-side-encryption",
                    BUCKET_POLICY
                ),
                input.line(literal),
                "has serverside encryption disabled",
            ));
        }
    }
    found
}

fn object_lock_disabled(input: &CheckInput<'_>) -> Vec<Vulnerability> {
    input
        .resources(&[BUCKET])
        .into_iter()
        .filter(|bucket| {
            let enabled = query::find_values(
                input.graph,
                *bucket,
                "ObjectLockEnabled",
                |v| v.to_boolean() == Some(true),
                input.limits.search_hops,
            );
            enabled.is_empty()
        })
        .map(|bucket| {
            input.vulnerability(
                bucket,
                format!("{}/ObjectLockEnabled", BUCKET),
                input.line(bucket),
                "has object lock disabled.",
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::run;
    use crate::checks::{find_check, Status};

    fn check(id: &str) -> &'static CheckDef {
        find_check(id).unwrap()
    }

    const BUCKETS: &str = r#"
Parameters:
  Acl:
    Type: String
    Default: PublicRead
Resources:
  Logs:
    Type: AWS::S3::Bucket
    Properties:
      AccessControl: !Ref Acl
  Vault:
    Type: AWS::S3::Bucket
    Properties:
      AccessControl: Private
      ObjectLockEnabled: "true"
      BucketEncryption:
        ServerSideEncryptionConfiguration:
          - ServerSideEncryptionByDefault:
              SSEAlgorithm: aws:kms
"#;

    #[test]
    fn test_access_control_through_parameter() {
        let result = run(check("s3.not_private_access_control"), BUCKETS);
        assert_eq!(result.status, Status::Open);
        assert_eq!(result.vulnerabilities.len(), 1);
        let vuln = &result.vulnerabilities[0];
        assert_eq!(vuln.entity, "AWS::S3::Bucket/AccessControl/PublicRead");
        assert_eq!(vuln.identifier, "Logs");
        assert_eq!(vuln.line, 5);
    }

    #[test]
    fn test_bucket_encryption_and_object_lock() {
        let encryption = run(check("s3.encryption_disabled"), BUCKETS);
        assert_eq!(encryption.vulnerabilities.len(), 1);
        assert_eq!(encryption.vulnerabilities[0].identifier, "Logs");

        let lock = run(check("s3.object_lock_disabled"), BUCKETS);
        assert_eq!(lock.vulnerabilities.len(), 1);
        assert_eq!(lock.vulnerabilities[0].identifier, "Logs");
        assert_eq!(lock.vulnerabilities[0].line, 7);
    }

    const POLICY: &str = r#"
Resources:
  Policy:
    Type: AWS::S3::BucketPolicy
    Properties:
      Bucket: logs
      PolicyDocument:
        Statement:
          - Effect: Allow
            Principal: "*"
            Action: s3:GetObject
            Resource: arn:aws:s3:::logs/*
          - Effect: Deny
            Principal:
              AWS: ["*"]
            Action: s3:*
            Condition:
              Bool:
                aws:SecureTransport: true
          - Effect: Allow
            Principal:
              AWS: arn:aws:iam::123456789012:root
            Action: s3:PutObject
            Condition:
              "Null":
                s3:x-amz-server-side-encryption: "false"
"#;

    #[test]
    fn test_public_principal_only_on_allow() {
        let result = run(check("s3.public_bucket_policy"), POLICY);
        assert_eq!(result.vulnerabilities.len(), 1);
        assert_eq!(result.vulnerabilities[0].line, 10);
    }

    #[test]
    fn test_secure_transport() {
        let result = run(check("s3.missing_secure_transport"), POLICY);
        assert_eq!(result.status, Status::Open);
        assert_eq!(result.vulnerabilities.len(), 1);
        assert_eq!(result.vulnerabilities[0].line, 19);
    }

    #[test]
    fn test_server_side_encryption() {
        let result = run(check("s3.server_side_encryption_disabled"), POLICY);
        assert_eq!(result.vulnerabilities.len(), 1);
        assert_eq!(result.vulnerabilities[0].line, 26);
    }

    #[test]
    fn test_policies_without_findings() {
        let template = r#"
Resources:
  Policy:
    Type: AWS::S3::BucketPolicy
    Properties:
      Bucket: logs
      PolicyDocument:
        Statement:
          Effect: Deny
          Principal: "*"
          Action: s3:*
          Condition:
            Bool:
              aws:SecureTransport: false
"#;
        for id in [
            "s3.public_bucket_policy",
            "s3.missing_secure_transport",
            "s3.server_side_encryption_disabled",
        ] {
            assert_eq!(run(check(id), template).status, Status::Closed, "{}", id);
        }
    }
}
