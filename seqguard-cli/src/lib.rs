//! Helpers behind the `seqguard` binary.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use seqguard::store::CounterRow;
use seqguard::{Allocation, BulkAllocation, ParsedCode, RepairReport, ScopeRef, SeqguardConfig};
use std::path::Path;
use uuid::Uuid;

/// Environment variables checked for the database URL, in order
pub const DATABASE_URL_VARS: [&str; 2] = ["SEQGUARD_DATABASE_URL", "DATABASE_URL"];

/// Load configuration and apply the database URL override.
///
/// The URL comes from `--database-url`, then `SEQGUARD_DATABASE_URL`, then
/// `DATABASE_URL`, then the configuration file.
pub fn load_config(path: &Path, database_url: Option<String>) -> Result<SeqguardConfig> {
    let mut config = SeqguardConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;

    let url = database_url.or_else(|| {
        DATABASE_URL_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    });
    if let Some(url) = url {
        config.database.url = url;
    }
    seqguard::validate_connection_string(&config.database.url)
        .context("invalid database URL")?;
    Ok(config)
}

/// Scope reference from the `--scope` / `--cost-center` / `--organization` flags
pub fn scope_ref(scope: Option<String>, cost_center: Option<Uuid>, organization: bool) -> Result<ScopeRef> {
    match (scope, cost_center, organization) {
        (Some(code), None, false) => Ok(ScopeRef::Code(code)),
        (None, Some(id), false) => Ok(ScopeRef::CostCenter(id)),
        (None, None, true) => Ok(ScopeRef::Organization),
        // Inventory items ignore the scope; anything else needs exactly one
        (None, None, false) => Ok(ScopeRef::Organization),
        _ => bail!("give at most one of --scope, --cost-center or --organization"),
    }
}

pub fn render_allocation(allocation: &Allocation) -> String {
    match allocation {
        Allocation::Succeeded(code) => code.as_str().green().bold().to_string(),
        Allocation::FallbackApplied { code, cause } => format!(
            "{} {}",
            code.as_str().yellow().bold(),
            format!("(fallback: {cause})").yellow()
        ),
    }
}

pub fn render_bulk(batch: &BulkAllocation) -> String {
    let mut out: Vec<String> = batch.codes().iter().map(|c| c.as_str().to_string()).collect();
    if let BulkAllocation::FallbackApplied { cause, .. } = batch {
        out.push(format!("(fallback: {cause})").yellow().to_string());
    }
    out.join("\n")
}

pub fn render_parsed(parsed: &ParsedCode) -> String {
    let scope = if parsed.scope.is_empty() { "-" } else { parsed.scope.as_str() };
    format!("type: {}\nscope: {scope}\nsequence: {}", parsed.doc_type, parsed.sequence)
}

pub fn render_report(report: &RepairReport) -> String {
    let mut lines = Vec::new();
    let verb = if report.dry_run { "would fix" } else { "fixed" };
    lines.push(format!(
        "{}: {} {verb}, {} unchanged, {} error(s)",
        report.table.to_string().bold(),
        report.fixed_count,
        report.unchanged,
        report.errors.len()
    ));
    for message in report.error_messages() {
        lines.push(format!("  {} {message}", "✗".red()));
    }
    lines.join("\n")
}

pub fn render_counters(counters: &[CounterRow]) -> String {
    if counters.is_empty() {
        return "No counters yet".to_string();
    }
    counters
        .iter()
        .map(|c| {
            let scope = if c.scope.is_empty() { "-" } else { c.scope.as_str() };
            let updated = c
                .updated_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "N/A".to_string());
            format!("{:<5} {scope:<12} {:>6}  {updated}", c.doc_type, c.last_value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Counters and histograms recorded by this process, in the Prometheus text format
pub fn render_metrics() -> String {
    seqguard::metrics::METRICS.render()
}
