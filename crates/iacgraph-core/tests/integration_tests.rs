use iacgraph_core::checks::{self, run_check, CheckResult, Status};
use iacgraph_core::config::{BackendConfig, BackendKind, ScanConfig};
use iacgraph_core::graph::{export, EdgeKind, GraphBackend};
use iacgraph_core::report::{sarif, Summary};
use iacgraph_core::{all_checks, find_check, plan_units, query, ScanContext, Scanner};
use std::path::{Path, PathBuf};

/// Get the workspace root (two levels up from CARGO_MANIFEST_DIR of iacgraph-core).
fn fixtures_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    Path::new(manifest_dir)
        .parent()
        .unwrap() // crates/
        .parent()
        .unwrap() // workspace root
        .join("tests/fixtures/cloudformation")
}

fn fixture(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

fn check(id: &str, name: &str) -> CheckResult {
    let ctx = ScanContext::in_memory();
    run_check(&ctx, find_check(id).unwrap(), &[fixture(name)]).unwrap()
}

fn lines(result: &CheckResult) -> Vec<usize> {
    result.vulnerabilities.iter().map(|v| v.line).collect()
}

#[test]
fn test_insecure_network_fixture() {
    let admin = check("ec2.admin_ports_open_to_internet", "insecure_network.yaml");
    assert_eq!(admin.status, Status::Open);
    assert_eq!(admin.vulnerabilities.len(), 1);
    let vuln = &admin.vulnerabilities[0];
    assert_eq!(
        vuln.entity,
        "AWS::EC2::SecurityGroup/SecurityGroupIngress/CidrIp/22"
    );
    assert!(vuln.reason.contains("port 22"));
    assert_eq!(vuln.identifier, "BastionGroup");
    assert_eq!(vuln.line, 13);
    assert!(vuln.path.ends_with("insecure_network.yaml"));

    let cidrs = check("ec2.unrestricted_cidrs", "insecure_network.yaml");
    assert_eq!(lines(&cidrs), vec![6, 6, 20]);

    let outbound = check("ec2.allows_all_outbound_traffic", "insecure_network.yaml");
    assert_eq!(lines(&outbound), vec![8]);

    let profile = check("ec2.missing_iam_instance_profile", "insecure_network.yaml");
    assert_eq!(profile.vulnerabilities[0].identifier, "Bastion");

    let shutdown = check("ec2.terminate_shutdown_behavior", "insecure_network.yaml");
    assert_eq!(lines(&shutdown), vec![26]);

    let volumes = check("ec2.unencrypted_volumes", "insecure_network.yaml");
    assert_eq!(lines(&volumes), vec![34]);

    let default_group = check("ec2.default_security_group", "insecure_network.yaml");
    assert_eq!(default_group.status, Status::Closed);
}

#[test]
fn test_secure_network_passes_every_check() {
    let ctx = ScanContext::in_memory();
    let defs = all_checks();
    let results = checks::run_checks(&ctx, &defs, &[fixture("secure_network.yaml")]).unwrap();
    assert_eq!(results.len(), defs.len());
    for result in results {
        assert_eq!(result.status, Status::Closed, "{}", result.check);
    }
}

#[test]
fn test_json_iam_fixture() {
    let role = check("iam.role_over_privileged", "iam_roles.json");
    assert_eq!(role.status, Status::Open);
    assert!(lines(&role).contains(&23));
    assert!(role
        .vulnerabilities
        .iter()
        .all(|v| v.entity.starts_with("AWS::IAM::Role/") && v.identifier == "DeployRole"));

    let ssm = check("iam.full_access_to_ssm", "iam_roles.json");
    assert_eq!(lines(&ssm), vec![28]);
}

#[test]
fn test_storage_fixture_follows_condition_branches() {
    let acl = check("s3.not_private_access_control", "storage.yaml");
    assert_eq!(acl.vulnerabilities.len(), 1);
    assert_eq!(
        acl.vulnerabilities[0].entity,
        "AWS::S3::Bucket/AccessControl/PublicRead"
    );
    assert_eq!(acl.vulnerabilities[0].line, 8);

    let policy = check("s3.public_bucket_policy", "storage.yaml");
    assert_eq!(lines(&policy), vec![16]);

    let public_db = check("rds.publicly_accessible", "storage.yaml");
    assert_eq!(lines(&public_db), vec![24]);

    for id in ["rds.storage_not_encrypted", "rds.deletion_protection_disabled"] {
        assert_eq!(check(id, "storage.yaml").status, Status::Closed, "{}", id);
    }
}

#[test]
fn test_non_templates_and_missing_files_are_unknown() {
    for name in ["not_a_template.yaml", "does_not_exist.yaml"] {
        for def in all_checks() {
            let ctx = ScanContext::in_memory();
            let result = run_check(&ctx, def, &[fixture(name)]).unwrap();
            assert_eq!(result.status, Status::Unknown, "{} on {}", def.id, name);
            assert!(result.vulnerabilities.is_empty());
        }
    }
}

#[test]
fn test_nested_templates_need_grouping() {
    let files = vec![
        fixture("nested/database.yaml"),
        fixture("nested/network.yaml"),
    ];
    let scanner = Scanner::new(ScanContext::in_memory());

    let separate = scanner.scan_blocking(plan_units(&files, false)).unwrap();
    assert_eq!(separate.units.len(), 2);
    assert_eq!(separate.count(Status::Open), 0);
    assert_eq!(separate.count(Status::Unknown), 2 * scanner.checks().len());

    let grouped = scanner.scan_blocking(plan_units(&files, true)).unwrap();
    assert_eq!(grouped.units.len(), 1);
    let results = &grouped.units[0].results;
    let by_id = |id: &str| results.iter().find(|r| r.check == id).unwrap();

    let admin = by_id("ec2.admin_ports_open_to_internet");
    assert_eq!(admin.vulnerabilities.len(), 1);
    assert_eq!(
        admin.vulnerabilities[0].entity,
        "AWS::EC2::SecurityGroup/SecurityGroupIngress/CidrIp/3389"
    );
    assert!(admin.vulnerabilities[0].path.ends_with("network.yaml"));

    let protocols = by_id("ec2.unrestricted_ip_protocols");
    assert_eq!(protocols.vulnerabilities[0].identifier, "DbGroup");
    assert_eq!(protocols.vulnerabilities[0].line, 12);

    assert_eq!(by_id("ec2.allows_all_outbound_traffic").status, Status::Closed);
    assert_eq!(by_id("ec2.rfc1918_ingress").status, Status::Closed);

    let summary = Summary::from_report(&grouped);
    assert!(summary.open >= 3);
    assert_eq!(summary.unknown, 0);

    let stats = scanner.close().unwrap();
    assert_eq!(stats.units, 3);
    assert_eq!(stats.compile_failures, 2);
}

#[test]
fn test_snapshot_backend_matches_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScanConfig {
        backend: BackendConfig {
            kind: BackendKind::Snapshot,
            snapshot_dir: Some(dir.path().to_path_buf()),
        },
        ..Default::default()
    };
    let files = vec![
        fixture("insecure_network.yaml"),
        fixture("storage.yaml"),
        fixture("iam_roles.json"),
    ];

    let snapshot = Scanner::new(ScanContext::open(config).unwrap())
        .scan_blocking(plan_units(&files, false))
        .unwrap();
    let memory = Scanner::new(ScanContext::in_memory())
        .scan_blocking(plan_units(&files, false))
        .unwrap();

    let verdicts = |report: &iacgraph_core::ScanReport| -> Vec<CheckResult> {
        report.results().cloned().collect()
    };
    assert_eq!(verdicts(&snapshot), verdicts(&memory));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
}

#[test]
fn test_sarif_for_fixture_scan() {
    let scanner = Scanner::new(ScanContext::in_memory());
    let report = scanner
        .scan_blocking(plan_units(&[fixture("insecure_network.yaml")], false))
        .unwrap();
    let log = sarif::to_sarif(&report);

    let results = log["runs"][0]["results"].as_array().unwrap();
    let admin = results
        .iter()
        .find(|r| r["ruleId"] == "ec2.admin_ports_open_to_internet")
        .unwrap();
    assert_eq!(
        admin["locations"][0]["physicalLocation"]["region"]["startLine"],
        13
    );
}

#[test]
fn test_compiled_fixture_graph() {
    let ctx = ScanContext::in_memory();
    let graph = ctx.compile_paths(&[fixture("storage.yaml")]).unwrap();

    let policies = query::resources(graph.as_ref(), &["AWS::S3::BucketPolicy"]);
    assert_eq!(policies.len(), 1);
    let bucket = query::resources(graph.as_ref(), &["AWS::S3::Bucket"])[0];
    let referenced = query::referenced_resources(graph.as_ref(), policies[0], 6);
    assert!(referenced.contains(&bucket));

    let references = (0..graph.node_count() as u32)
        .map(iacgraph_core::NodeId)
        .flat_map(|id| graph.outgoing(id))
        .filter(|(kind, _)| *kind == EdgeKind::Reference)
        .count();
    assert!(references >= 4);

    let dot = export::to_dot(graph.as_ref(), "storage");
    assert!(dot.starts_with("digraph"));
}
