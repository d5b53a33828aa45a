use colored::*;
use iacgraph_core::checks::{CheckDef, CheckResult, Risk, Status};
use iacgraph_core::report::{by_priority, Summary};
use iacgraph_core::scan::ScanReport;

fn status_tag(status: Status) -> String {
    let tag = format!(" {} ", status.symbol());
    match status {
        Status::Open => tag.on_red().white().bold().to_string(),
        Status::Closed => tag.green().to_string(),
        Status::Unknown => tag.on_yellow().black().bold().to_string(),
    }
}

fn risk_label(risk: Risk) -> String {
    match risk {
        Risk::High => risk.symbol().red().bold().to_string(),
        Risk::Medium => risk.symbol().yellow().to_string(),
        Risk::Low => risk.symbol().dimmed().to_string(),
    }
}

/// Print a full scan report to the terminal.
pub fn print_scan_report(report: &ScanReport) {
    println!();
    println!(
        "{}",
        format!(
            " iacgraph v{}: scanned {} unit(s)",
            env!("CARGO_PKG_VERSION"),
            report.units.len()
        )
        .bold()
    );
    println!();

    for unit in &report.units {
        println!(" {}", unit.paths.join(", ").bold().underline());
        if let Some(error) = &unit.error {
            println!("   {} {}", "error:".red().bold(), error);
        }
        if unit.timed_out {
            println!("   {} unit timed out", "warning:".yellow().bold());
        }

        let flagged: Vec<&CheckResult> = by_priority(&unit.results)
            .into_iter()
            .filter(|r| r.status != Status::Closed)
            .collect();

        if flagged.is_empty() {
            println!(
                "   {} All {} checks passed",
                "OK".green().bold(),
                unit.results.len()
            );
        }
        for result in flagged {
            print_result(result);
        }
        println!();
    }

    println!(" {}", "=".repeat(60).dimmed());
    println!();

    let summary = Summary::from_report(report);
    println!(" {}", "Summary".bold().underline());
    println!(
        " {} Verdicts: {} open, {} closed, {} unknown",
        "|-".dimmed(),
        if summary.open > 0 {
            summary.open.to_string().red().bold().to_string()
        } else {
            "0".to_string()
        },
        summary.closed.to_string().green(),
        if summary.unknown > 0 {
            summary.unknown.to_string().yellow().bold().to_string()
        } else {
            "0".to_string()
        },
    );
    println!(
        " {} Vulnerabilities: {} high, {} medium, {} low",
        "|-".dimmed(),
        summary.high,
        summary.medium,
        summary.low
    );
    if let Some(stats) = &report.stats {
        println!(
            " {} Compiled {} template(s), {} graph nodes",
            "|-".dimmed(),
            stats.templates,
            stats.nodes
        );
    }
    println!(" {} Duration: {} ms", "|-".dimmed(), report.duration_ms);
    println!();
}

fn print_result(result: &CheckResult) {
    println!(
        "   {} {} [{}]",
        status_tag(result.status),
        result.message.bold(),
        risk_label(result.risk)
    );
    println!("     {} {}", "|".dimmed(), result.check.dimmed());
    for vuln in &result.vulnerabilities {
        println!(
            "     {} {}:{} {}/{} {}",
            "|".dimmed(),
            vuln.path,
            vuln.line.to_string().cyan(),
            vuln.entity,
            vuln.identifier.bold(),
            vuln.reason
        );
    }
}

/// Print the check catalogue.
pub fn print_check_catalogue(checks: &[&CheckDef]) {
    println!();
    println!("{}", format!(" iacgraph checks ({})", checks.len()).bold());
    println!();

    let mut service = None;
    for check in checks {
        if service != Some(check.service) {
            service = Some(check.service);
            println!(" {}", check.service.label().bold().underline());
        }
        println!(
            " {} {:<40} {:<8} {}",
            "|-".dimmed(),
            check.id.cyan(),
            risk_label(check.risk),
            check.description
        );
    }
    println!();
}
