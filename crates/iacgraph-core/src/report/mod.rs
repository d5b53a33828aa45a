//! Renderings of scan results.

pub mod sarif;

use crate::checks::{CheckResult, Risk, Status};
use crate::scan::ScanReport;
use serde::{Deserialize, Serialize};

/// One line per vulnerability: `path: entity/identifier reason`.
pub fn vulnerability_lines(result: &CheckResult) -> Vec<String> {
    result.vulnerabilities.iter().map(|v| v.to_string()).collect()
}

/// OPEN results first, highest risk first. Order is otherwise kept.
pub fn by_priority(results: &[CheckResult]) -> Vec<&CheckResult> {
    let mut ordered: Vec<&CheckResult> = results.iter().collect();
    ordered.sort_by_key(|r| (!r.is_open(), std::cmp::Reverse(r.risk.priority())));
    ordered
}

/// Plain-text rendering of a whole report.
pub fn render_text(report: &ScanReport) -> String {
    let mut out = String::new();
    for unit in &report.units {
        for result in by_priority(&unit.results) {
            out.push_str(&format!(
                "[{}] {} ({}): {}\n",
                result.status.symbol(),
                result.check,
                result.risk.symbol(),
                result.message
            ));
            for line in vulnerability_lines(result) {
                out.push_str("  ");
                out.push_str(&line);
                out.push('\n');
            }
        }
    }
    out
}

/// Verdict totals over a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub open: usize,
    pub closed: usize,
    pub unknown: usize,
    pub vulnerabilities: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl Summary {
    pub fn from_report(report: &ScanReport) -> Self {
        let mut summary = Self::default();
        for result in report.results() {
            match result.status {
                Status::Open => summary.open += 1,
                Status::Closed => summary.closed += 1,
                Status::Unknown => summary.unknown += 1,
            }
            if result.is_open() {
                let count = result.vulnerabilities.len();
                summary.vulnerabilities += count;
                match result.risk {
                    Risk::High => summary.high += count,
                    Risk::Medium => summary.medium += count,
                    Risk::Low => summary.low += count,
                }
            }
        }
        summary
    }
}
