// src/tasks/rewrite_status.rs
//! Substitute one status value for another in a single field.
//!
//! The production use: orders stuck on the retired
//! `PREPARING_FOR_DISPATCH` delivery status become `PREPARING`.
//! Documents already carrying the target value are untouched.

use serde_json::{json, Value};

use crate::error::Result;
use crate::interrupt::check_interrupted;
use crate::store::Store;
use crate::tasks::{log_batch_progress, UpdateSummary};
use crate::{log_error, log_info};

#[derive(Debug, Clone)]
pub struct RewriteStatusConfig {
    pub collection: String,
    pub field: String,
    pub from_value: String,
    pub to_value: String,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl RewriteStatusConfig {
    pub fn preparing_for_dispatch(batch_size: usize, dry_run: bool) -> Self {
        RewriteStatusConfig {
            collection: "orders".to_string(),
            field: "deliveryStatus".to_string(),
            from_value: "PREPARING_FOR_DISPATCH".to_string(),
            to_value: "PREPARING".to_string(),
            batch_size,
            dry_run,
        }
    }
}

pub fn run(store: &Store, config: &RewriteStatusConfig) -> Result<UpdateSummary> {
    let coll = store.collection(&config.collection);
    let filter = json!({ &config.field: &config.from_value });

    let mut summary = UpdateSummary {
        dry_run: config.dry_run,
        ..Default::default()
    };

    let matching = coll.count_documents(&filter)?;
    log_info!(
        "{}: {} document(s) with {} = {:?}",
        config.collection,
        matching,
        config.field,
        config.from_value
    );

    if config.dry_run {
        summary.matched = matching;
        log_info!(
            "DRY RUN: would set {} = {:?} on {} document(s)",
            config.field,
            config.to_value,
            matching
        );
        return Ok(summary);
    }

    // Batched update-many over _id chunks, so progress is visible and a
    // failed batch only skips its own documents.
    let mut cursor = coll.find_batched(&filter, Some(&[]))?;
    let total = cursor.remaining();
    let mut processed = 0usize;

    while !cursor.is_finished() {
        check_interrupted()?;
        let chunk = cursor.next_chunk(config.batch_size);
        let ids: Vec<Value> = chunk.iter().map(|row| row["_id"].clone()).collect();
        processed += ids.len();
        summary.matched += ids.len() as u64;

        let batch_filter = json!({
            "_id": {"$in": ids},
            &config.field: &config.from_value
        });
        let update = json!({ "$set": { &config.field: &config.to_value } });
        match coll.update_many(&batch_filter, &update) {
            Ok((_, modified)) => summary.updated += modified,
            Err(e) => {
                summary.errors += chunk.len() as u64;
                log_error!("failed to update a batch of {} documents: {}", chunk.len(), e);
            }
        }
        store.flush()?;
        log_batch_progress(&config.collection, processed, total);
    }

    summary.log("status rewrite");
    Ok(summary)
}
