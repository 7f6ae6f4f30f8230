//! Sequential code repair.
//!
//! Renumbers every record of a table in creation order: within each lane the
//! n-th record gets `base + n`. Records that already carry their canonical
//! code are left alone, so a second run over unchanged data fixes nothing.
//! Per-record failures are collected into the report and never stop the run.
//!
//! Repair must not run while the table receives live allocations; the repair
//! lock only keeps two repairs of the same table apart.

mod lock;

pub use lock::RepairLockGuard;

use crate::code::{format_code, parse_code, Code, ScopeKey, TableKind};
use crate::config::RepairConfig;
use crate::error::SeqError;
use crate::store::{RecordStore, StoredRow};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

#[derive(Debug, Clone, Copy, Default)]
pub struct RepairOptions {
    /// Compute the report without writing anything
    pub dry_run: bool,
}

/// One record (or lane counter) that could not be repaired
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairPartialFailure {
    /// Row id, or `counter <lane>` for a counter reset
    pub subject: String,
    pub code: Option<String>,
    pub reason: String,
}

impl fmt::Display for RepairPartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code}): {}", self.subject, self.reason),
            None => write!(f, "{}: {}", self.subject, self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub table: TableKind,
    pub dry_run: bool,
    /// Records rewritten (or that would be, on a dry run)
    pub fixed_count: usize,
    /// Records already carrying their canonical code
    pub unchanged: usize,
    pub errors: Vec<RepairPartialFailure>,
}

impl RepairReport {
    fn new(table: TableKind, dry_run: bool) -> Self {
        Self { table, dry_run, fixed_count: 0, unchanged: 0, errors: Vec::new() }
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Pretty-printed JSON, as written by `seqguard repair --json`
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn fail(&mut self, subject: impl Into<String>, code: Option<&str>, reason: impl fmt::Display) {
        let failure = RepairPartialFailure {
            subject: subject.into(),
            code: code.map(str::to_string),
            reason: reason.to_string(),
        };
        log::warn!("Repair of {}: {failure}", self.table);
        self.errors.push(failure);
    }
}

pub struct CodeRepairService<S> {
    store: S,
    config: RepairConfig,
}

impl<S: RecordStore> CodeRepairService<S> {
    pub fn new(store: S, config: RepairConfig) -> Self {
        Self { store, config }
    }

    /// Renumber `table`.
    ///
    /// Fails as a whole only when the lock cannot be taken or the rows cannot
    /// be loaded; everything after that ends up in [`RepairReport::errors`].
    pub fn repair(&self, table: TableKind, options: RepairOptions) -> Result<RepairReport, SeqError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::repair_span(table.as_str()).entered();

        let _guard = if options.dry_run {
            None
        } else {
            let timeout = Duration::from_secs(self.config.lock_timeout_seconds);
            Some(RepairLockGuard::acquire(&self.store, table, timeout)?)
        };

        let rows = self.store.load_rows(table)?;
        let base = self.config.base_for(table);
        log::info!("Repairing {} row(s) of {table} from base {base}", rows.len());

        let mut report = RepairReport::new(table, options.dry_run);
        let mut lanes: HashMap<ScopeKey, u32> = HashMap::new();

        for row in &rows {
            let key = match lane_of(table, row) {
                Ok(key) => key,
                Err(reason) => {
                    report.fail(&row.id, row.code.as_deref(), reason);
                    continue;
                }
            };
            let ordinal = lanes.entry(key.clone()).or_insert(0);
            *ordinal += 1;

            let target = match canonical_code(&key, base, *ordinal) {
                Ok(code) => code,
                Err(reason) => {
                    report.fail(&row.id, row.code.as_deref(), reason);
                    continue;
                }
            };

            if row.code.as_deref() == Some(target.as_str()) {
                report.unchanged += 1;
                continue;
            }
            if options.dry_run {
                log::debug!("Would rewrite {} from {:?} to {target}", row.id, row.code);
                report.fixed_count += 1;
                continue;
            }
            match self.store.update_code(table, &row.id, target.as_str()) {
                Ok(()) => {
                    log::debug!("Rewrote {} from {:?} to {target}", row.id, row.code);
                    report.fixed_count += 1;
                }
                Err(e) => report.fail(&row.id, row.code.as_deref(), e),
            }
        }

        if !options.dry_run {
            self.reset_counters(&lanes, base, &mut report);
        }

        #[cfg(feature = "metrics")]
        METRICS.record_repair(table.as_str(), report.fixed_count as u64, report.errors.len() as u64);

        log::info!(
            "Repair of {table} done: {} fixed, {} unchanged, {} error(s)",
            report.fixed_count,
            report.unchanged,
            report.errors.len()
        );
        Ok(report)
    }

    /// Point each repaired lane's counter at its last canonical value
    fn reset_counters(&self, lanes: &HashMap<ScopeKey, u32>, base: u32, report: &mut RepairReport) {
        for (key, last) in lanes {
            let value = base.saturating_add(*last);
            if let Err(e) = self.store.reset_counter(key, value) {
                report.fail(format!("counter {key}"), None, e);
            }
        }
    }
}

/// Lane a stored row is numbered in
fn lane_of(table: TableKind, row: &StoredRow) -> Result<ScopeKey, String> {
    // Every material belongs to the single item lane, whatever its code
    if table == TableKind::Materials {
        return Ok(ScopeKey::inventory_items());
    }
    let code = row.code.as_deref().ok_or("record has no code")?;
    let parsed = parse_code(code).ok_or_else(|| format!("'{code}' is not a valid code"))?;
    if parsed.doc_type.table() != table {
        return Err(format!("'{code}' is a {} code, not a {table} code", parsed.doc_type));
    }
    Ok(parsed.scope_key())
}

/// Canonical code of the `ordinal`-th record of a lane
pub fn canonical_code(key: &ScopeKey, base: u32, ordinal: u32) -> Result<Code, SeqError> {
    let seq = base
        .checked_add(ordinal)
        .ok_or_else(|| SeqError::InvalidRequest(format!("ordinal {ordinal} overflows the base {base}")))?;
    Ok(format_code(&key.doc_type, &key.scope, seq)?)
}
