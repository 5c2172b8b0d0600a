// src/tasks/clone_db.rs
//! Duplicate a production database into a test environment.
//!
//! Every source collection (minus the configured exclusions) is copied
//! into the destination; destination collections are dropped and recreated
//! first, so the copy is a complete replacement. The source handle is
//! never written. Source and destination are guaranteed distinct by
//! config validation before either is opened.

use serde_json::json;

use crate::config::CloneConfig;
use crate::error::Result;
use crate::interrupt::check_interrupted;
use crate::store::Store;
use crate::tasks::log_batch_progress;
use crate::{log_info, log_warn};

#[derive(Debug, Clone)]
pub struct CloneReport {
    /// (collection, documents copied) in copy order.
    pub copied: Vec<(String, u64)>,
    pub skipped: Vec<String>,
    pub dry_run: bool,
}

impl CloneReport {
    pub fn total_documents(&self) -> u64 {
        self.copied.iter().map(|(_, n)| n).sum()
    }
}

pub fn run(source: &Store, dest: &Store, config: &CloneConfig) -> Result<CloneReport> {
    let mut report = CloneReport {
        copied: Vec::new(),
        skipped: Vec::new(),
        dry_run: config.dry_run,
    };

    for name in source.list_collections() {
        if config.excluded_collections.contains(&name) {
            log_warn!("skipping excluded collection '{}'", name);
            report.skipped.push(name);
            continue;
        }

        let src_coll = source.collection(&name);
        let count = src_coll.count_documents(&json!({}))?;

        if config.dry_run {
            log_info!("DRY RUN: would copy {} document(s) from '{}'", count, name);
            report.copied.push((name, count));
            continue;
        }

        log_info!("copying '{}' ({} documents)...", name, count);
        dest.drop_collection(&name);
        let dest_coll = dest.collection(&name);

        let mut cursor = src_coll.find_batched(&json!({}), None)?;
        let total = cursor.remaining();
        let mut copied = 0u64;
        while !cursor.is_finished() {
            check_interrupted()?;
            let chunk = cursor.next_chunk(config.batch_size);
            copied += dest_coll.insert_many(&chunk)?;
            dest.flush()?;
            log_batch_progress(&name, copied as usize, total);
        }
        report.copied.push((name, copied));
    }

    log_info!("=== clone summary ===");
    for (name, count) in &report.copied {
        log_info!("  {}: {} document(s)", name, count);
    }
    if !report.skipped.is_empty() {
        log_info!("  skipped: {:?}", report.skipped);
    }
    if config.dry_run {
        log_info!("DRY RUN completed - destination untouched");
    } else {
        log_info!("  total copied: {}", report.total_documents());
    }

    Ok(report)
}
