use crate::checks::{find_check, CheckResult, Risk, Status, Vulnerability};
use crate::scan::ScanReport;
use serde_json::json;
use std::collections::BTreeMap;

/// Generate a SARIF 2.1.0 log from a scan report.
/// One rule per check that ran, one result per vulnerability. UNKNOWN verdicts become
/// tool execution notifications.
pub fn to_sarif(report: &ScanReport) -> serde_json::Value {
    let mut rules: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
    let mut results = Vec::new();
    let mut notifications = Vec::new();

    for unit in &report.units {
        for result in &unit.results {
            rules
                .entry(result.check.as_str())
                .or_insert_with(|| sarif_rule(result));
            match result.status {
                Status::Open => results.extend(
                    result
                        .vulnerabilities
                        .iter()
                        .map(|v| sarif_result(result, v)),
                ),
                Status::Unknown => notifications.push(json!({
                    "level": "warning",
                    "message": {
                        "text": format!("{}: {}", result.check, result.message),
                    },
                    "locations": unit.paths.iter().map(|path| json!({
                        "physicalLocation": {
                            "artifactLocation": { "uri": path },
                        }
                    })).collect::<Vec<_>>(),
                })),
                Status::Closed => {}
            }
        }
    }

    json!({
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/main/sarif-2.1/schema/sarif-schema-2.1.0.json",
        "version": "2.1.0",
        "runs": [{
            "tool": {
                "driver": {
                    "name": "iacgraph",
                    "version": env!("CARGO_PKG_VERSION"),
                    "rules": rules.into_values().collect::<Vec<_>>(),
                }
            },
            "results": results,
            "invocations": [{
                "executionSuccessful": report.errors() == 0,
                "toolExecutionNotifications": notifications,
            }]
        }]
    })
}

fn level(risk: Risk) -> &'static str {
    match risk {
        Risk::High => "error",
        Risk::Medium => "warning",
        Risk::Low => "note",
    }
}

fn sarif_rule(result: &CheckResult) -> serde_json::Value {
    let description = find_check(&result.check)
        .map(|def| def.description)
        .unwrap_or_default();

    json!({
        "id": result.check,
        "shortDescription": {
            "text": description,
        },
        "defaultConfiguration": {
            "level": level(result.risk),
        },
        "properties": {
            "risk": result.risk.symbol(),
        }
    })
}

fn sarif_result(result: &CheckResult, vuln: &Vulnerability) -> serde_json::Value {
    json!({
        "ruleId": result.check,
        "level": level(result.risk),
        "message": {
            "text": format!("{}/{} {}", vuln.entity, vuln.identifier, vuln.reason),
        },
        "locations": [{
            "physicalLocation": {
                "artifactLocation": {
                    "uri": vuln.path,
                },
                "region": {
                    "startLine": vuln.line,
                }
            },
            "logicalLocations": [{
                "name": vuln.identifier,
                "kind": "resource",
            }]
        }],
    })
}
