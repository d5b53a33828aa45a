//! Batch scanning: compile units on the blocking pool and run the selected checks.

use crate::checks::{run_checks, CheckDef, CheckResult, Status};
use crate::context::{ScanContext, ScanStats};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Files compiled into one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanUnit {
    pub paths: Vec<PathBuf>,
}

/// One unit per file, or a single unit for the whole group.
pub fn plan_units(paths: &[PathBuf], group: bool) -> Vec<ScanUnit> {
    if paths.is_empty() {
        return Vec::new();
    }
    if group {
        return vec![ScanUnit {
            paths: paths.to_vec(),
        }];
    }
    paths
        .iter()
        .map(|p| ScanUnit {
            paths: vec![p.clone()],
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitReport {
    pub paths: Vec<String>,
    pub results: Vec<CheckResult>,
    /// Failure that was not turned into UNKNOWN by the check wrapper.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl UnitReport {
    fn unknown(unit: &ScanUnit, checks: &[&CheckDef], message: &str, elapsed_ms: u64) -> Self {
        Self {
            paths: display_paths(unit),
            results: checks
                .iter()
                .map(|def| CheckResult::unknown(def, message))
                .collect(),
            error: None,
            timed_out: false,
            elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub units: Vec<UnitReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ScanStats>,
}

impl ScanReport {
    pub fn count(&self, status: Status) -> usize {
        self.results().filter(|r| r.status == status).count()
    }

    pub fn results(&self) -> impl Iterator<Item = &CheckResult> {
        self.units.iter().flat_map(|u| u.results.iter())
    }

    pub fn has_open(&self) -> bool {
        self.results().any(|r| r.is_open())
    }

    pub fn errors(&self) -> usize {
        self.units.iter().filter(|u| u.error.is_some()).count()
    }
}

fn display_paths(unit: &ScanUnit) -> Vec<String> {
    unit.paths.iter().map(|p| p.display().to_string()).collect()
}

/// Runs the selected checks over scan units.
pub struct Scanner {
    ctx: Arc<ScanContext>,
    checks: Vec<&'static CheckDef>,
    budget: Duration,
}

impl Scanner {
    /// Scanner running the checks selected by the context's configuration.
    pub fn new(ctx: ScanContext) -> Self {
        let checks = ctx.config().selected_checks();
        let budget = Duration::from_secs(ctx.config().scan.timeout_secs);
        Self {
            ctx: Arc::new(ctx),
            checks,
            budget,
        }
    }

    pub fn with_checks(mut self, checks: Vec<&'static CheckDef>) -> Self {
        self.checks = checks;
        self
    }

    /// Per-unit wall-clock budget, overriding `[scan].timeout_secs`.
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn checks(&self) -> &[&'static CheckDef] {
        &self.checks
    }

    /// Scan every unit. Reports come back in input order and each unit carries one
    /// verdict per selected check.
    pub async fn scan(&self, units: Vec<ScanUnit>) -> ScanReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let budget = self.budget;
        let sem = Arc::new(Semaphore::new(self.ctx.config().scan.workers.max(1)));
        let mut join_set = JoinSet::new();

        for (index, unit) in units.iter().enumerate() {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let ctx = Arc::clone(&self.ctx);
            let checks = self.checks.clone();
            let paths = unit.paths.clone();
            join_set.spawn(async move {
                let unit_started = Instant::now();
                let worker = tokio::task::spawn_blocking(move || {
                    // Held until compilation ends, even when the unit has timed out.
                    let _permit = permit;
                    run_checks(&ctx, &checks, &paths)
                });
                let outcome = timeout(budget, worker).await;
                (index, outcome, unit_started.elapsed().as_millis() as u64)
            });
        }

        let mut slots: Vec<Option<UnitReport>> = vec![None; units.len()];
        while let Some(joined) = join_set.join_next().await {
            let Ok((index, outcome, elapsed_ms)) = joined else {
                continue;
            };
            let unit = &units[index];
            let report = match outcome {
                Ok(Ok(Ok(results))) => UnitReport {
                    paths: display_paths(unit),
                    results,
                    error: None,
                    timed_out: false,
                    elapsed_ms,
                },
                Ok(Ok(Err(e))) => {
                    warn!(paths = ?unit.paths, error = %e, "unit failed");
                    let mut report =
                        UnitReport::unknown(unit, &self.checks, &e.to_string(), elapsed_ms);
                    report.error = Some(e.to_string());
                    report
                }
                Ok(Err(join_error)) => {
                    let message = format!("worker failed: {}", join_error);
                    warn!(paths = ?unit.paths, "{}", message);
                    let mut report = UnitReport::unknown(unit, &self.checks, &message, elapsed_ms);
                    report.error = Some(message);
                    report
                }
                Err(_) => {
                    warn!(
                        paths = ?unit.paths,
                        timeout_ms = budget.as_millis() as u64,
                        "unit timed out"
                    );
                    let message = format!("timed out after {:?}", budget);
                    let mut report = UnitReport::unknown(unit, &self.checks, &message, elapsed_ms);
                    report.timed_out = true;
                    report
                }
            };
            info!(
                paths = ?report.paths,
                open = report.results.iter().filter(|r| r.is_open()).count(),
                elapsed_ms = report.elapsed_ms,
                "unit scanned"
            );
            slots[index] = Some(report);
        }

        // A task that never reported (cancelled or panicked outside the worker) still
        // gets its verdicts.
        let units = slots
            .into_iter()
            .zip(&units)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| {
                    let mut report = UnitReport::unknown(unit, &self.checks, "scan task lost", 0);
                    report.error = Some("scan task lost".to_string());
                    report
                })
            })
            .collect();

        ScanReport {
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            units,
            stats: None,
        }
    }

    /// [`Scanner::scan`] on a fresh multi-threaded runtime.
    pub fn scan_blocking(&self, units: Vec<ScanUnit>) -> anyhow::Result<ScanReport> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start the scan runtime")?;
        Ok(rt.block_on(self.scan(units)))
    }

    /// Close the context. Returns `None` while a timed-out worker still holds it.
    pub fn close(self) -> Option<ScanStats> {
        match Arc::try_unwrap(self.ctx) {
            Ok(ctx) => Some(ctx.close()),
            Err(_) => {
                warn!("scan context still in use by a timed-out worker");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::find_check;
    use std::path::Path;

    const OPEN_ADMIN: &str = r#"
Resources:
  Sg:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: ssh
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 22
          ToPort: 22
          CidrIp: 0.0.0.0/0
"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn scanner(checks: &[&str]) -> Scanner {
        Scanner::new(ScanContext::in_memory())
            .with_checks(checks.iter().map(|id| find_check(id).unwrap()).collect())
    }

    #[test]
    fn test_plan_units() {
        let paths = vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")];
        assert_eq!(plan_units(&paths, false).len(), 2);
        let grouped = plan_units(&paths, true);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].paths, paths);
        assert!(plan_units(&[], true).is_empty());
    }

    #[tokio::test]
    async fn test_scan_keeps_input_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let open = write(dir.path(), "open.yaml", OPEN_ADMIN);
        let broken = write(dir.path(), "broken.yaml", "Resources: [1, 2");
        let missing = dir.path().join("missing.yaml");

        let scanner = scanner(&[
            "ec2.admin_ports_open_to_internet",
            "ec2.unrestricted_cidrs",
        ]);
        let units = plan_units(&[open.clone(), broken, missing], false);
        let report = scanner.scan(units).await;

        assert_eq!(report.units.len(), 3);
        assert_eq!(report.units[0].paths, vec![open.display().to_string()]);
        assert_eq!(report.units[0].results[0].status, Status::Open);
        for unit in &report.units[1..] {
            assert_eq!(unit.results.len(), 2);
            assert!(unit.results.iter().all(|r| r.status == Status::Unknown));
            assert!(unit.error.is_none());
        }
        assert!(report.has_open());
        assert_eq!(report.count(Status::Unknown), 4);

        let stats = scanner.close().unwrap();
        assert_eq!(stats.units, 3);
        assert_eq!(stats.compile_failures, 2);
    }

    #[tokio::test]
    async fn test_timed_out_unit_reports_unknown_for_every_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut template = String::from("Resources:\n");
        for i in 0..4000 {
            template.push_str(&format!(
                "  Sg{i}:\n    Type: AWS::EC2::SecurityGroup\n    Properties:\n      \
                 SecurityGroupIngress:\n        - IpProtocol: tcp\n          FromPort: 22\n          \
                 ToPort: 22\n          CidrIp: 0.0.0.0/0\n"
            ));
        }
        let large = write(dir.path(), "large.yaml", &template);

        let scanner = Scanner::new(ScanContext::in_memory()).with_timeout(Duration::ZERO);
        let report = scanner.scan(plan_units(&[large], false)).await;

        let unit = &report.units[0];
        assert!(unit.timed_out);
        assert!(unit.error.is_none());
        assert_eq!(unit.results.len(), scanner.checks().len());
        assert!(unit.results.iter().all(|r| r.status == Status::Unknown));
        assert!(unit.results[0].message.contains("timed out"));
        assert!(!report.has_open());
    }

    #[test]
    fn test_grouped_scan_resolves_across_templates() {
        let dir = tempfile::tempdir().unwrap();
        let params = write(
            dir.path(),
            "params.yaml",
            "Parameters:\n  Cidr:\n    Type: String\n    Default: 0.0.0.0/0\nResources: {}\n",
        );
        let sg = write(
            dir.path(),
            "sg.yaml",
            r#"
Resources:
  Sg:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: db
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 5432
          ToPort: 5432
          CidrIp: !Ref Cidr
"#,
        );

        let scanner = scanner(&["ec2.admin_ports_open_to_internet"]);
        let separate = scanner
            .scan_blocking(plan_units(&[params.clone(), sg.clone()], false))
            .unwrap();
        assert_eq!(separate.units[1].results[0].status, Status::Unknown);

        let grouped = scanner
            .scan_blocking(plan_units(&[params, sg], true))
            .unwrap();
        assert_eq!(grouped.units.len(), 1);
        let result = &grouped.units[0].results[0];
        assert_eq!(result.status, Status::Open);
        // Reported at the rule in sg.yaml, not at the parameter default it resolved through.
        let vuln = &result.vulnerabilities[0];
        assert_eq!(vuln.line, 8);
        assert!(vuln.path.ends_with("sg.yaml"));
        assert!(vuln.reason.contains("5432"));
    }
}
