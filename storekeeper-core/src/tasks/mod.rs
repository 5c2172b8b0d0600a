// src/tasks/mod.rs
//! One-shot maintenance tasks. Each task is a library function taking an
//! open [`Store`](crate::store::Store) plus its config and returning a
//! report value; the CLI owns confirmation, logging setup and exit codes.

pub mod backfill_name;
pub mod clone_db;
pub mod copy_fields;
pub mod date_range_update;
pub mod migrate_ids;
pub mod payments_export;
pub mod rename_offer_ids;
pub mod rewrite_status;

use crate::log_info;

/// End-of-run numbers shared by the simple batch-update tasks. Always
/// produced, even on partial failure, so the operator can decide whether
/// to re-run (every task converges on re-run).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Documents that matched the task's criteria.
    pub matched: u64,
    /// Documents actually modified (no-op updates are not counted).
    pub updated: u64,
    /// Per-record failures that were logged and skipped.
    pub errors: u64,
    /// True when the run only previewed.
    pub dry_run: bool,
}

impl UpdateSummary {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    pub fn log(&self, task: &str) {
        log_info!("=== {} summary ===", task);
        log_info!("  matched:  {}", self.matched);
        if self.dry_run {
            log_info!("  would update: {} (dry run, nothing written)", self.matched);
        } else {
            log_info!("  updated:  {}", self.updated);
        }
        log_info!("  errors:   {}", self.errors);
    }
}

pub(crate) fn log_batch_progress(task: &str, processed: usize, total: usize) {
    log_info!("{}: processed {}/{} documents", task, processed, total);
}
