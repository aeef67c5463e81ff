//! Terminal output for run reports and status messages

use canopy_common::{PhaseKind, TenantPhaseResult};
use canopy_provision::RunReport;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// One line of the tenant summary
#[derive(Debug, Tabled, Serialize, PartialEq, Eq)]
pub struct TenantRow {
    #[tabled(rename = "Tenant")]
    pub ordinal: usize,
    #[tabled(rename = "URL")]
    pub url: String,
    #[tabled(rename = "Cluster")]
    pub cluster: String,
    #[tabled(rename = "Import")]
    pub import: String,
    #[tabled(rename = "Install")]
    pub install: String,
}

fn phase_cell(results: &[TenantPhaseResult], ordinal: usize) -> String {
    match results.iter().find(|r| r.ordinal == ordinal) {
        Some(r) if r.succeeded => "ok".to_string(),
        Some(_) => "failed".to_string(),
        None => "-".to_string(),
    }
}

pub fn tenant_rows(report: &RunReport) -> Vec<TenantRow> {
    report
        .tenant_urls
        .iter()
        .map(|(&ordinal, url)| {
            let cluster = report
                .imports
                .iter()
                .find(|r| r.ordinal == ordinal)
                .map(|r| format!("{} ({})", r.name, r.phase.as_deref().unwrap_or("pending")))
                .unwrap_or_else(|| "-".to_string());

            TenantRow {
                ordinal,
                url: url.clone(),
                cluster,
                import: phase_cell(&report.phase1, ordinal),
                install: phase_cell(&report.phase2, ordinal),
            }
        })
        .collect()
}

pub fn print_report(report: &RunReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(report)?),
        OutputFormat::Table => print_summary(report),
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let state = report.state.to_string();
    let state = if report.succeeded() {
        state.green().bold()
    } else {
        state.red().bold()
    };

    println!();
    println!("{} {}", "State:".bold(), state);
    if let Some(finished) = report.finished_at {
        let secs = (finished - report.started_at).num_seconds().max(0) as u64;
        println!("{} {}", "Duration:".bold(), format_duration(secs));
    }

    let host_status = if report.host_ready {
        "ready".green()
    } else {
        "not ready".yellow()
    };
    match &report.host_url {
        Some(url) => println!("{} {} ({})", "Host:".bold(), url, host_status),
        None => println!("{} {}", "Host:".bold(), "not provisioned".dimmed()),
    }

    let rows = tenant_rows(report);
    if rows.is_empty() {
        println!("{}", "No tenants provisioned".yellow());
    } else {
        println!("{}", Table::new(rows));
    }

    for failure in report.failures() {
        let phase = match failure.phase {
            PhaseKind::Import => "import",
            PhaseKind::Install => "install",
        };
        print_error(&format!(
            "tenant {} {}: {}",
            failure.ordinal,
            phase,
            failure.error.as_deref().unwrap_or("unknown error")
        ));
    }

    if let Some(error) = &report.error {
        println!("{} {}", "Error:".red().bold(), error);
    }
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Format duration in seconds to human-readable string
pub fn format_duration(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}
