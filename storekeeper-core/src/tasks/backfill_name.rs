// src/tasks/backfill_name.rs
//! Backfill a derived `name` field from `firstName` / `lastName`.
//!
//! Every user gets a `name`: both parts joined by a space when available,
//! the single present part otherwise, the empty string when neither
//! exists. With `skip_existing` (the default) documents that already have
//! a `name` are untouched, so a re-run is a no-op.

use serde_json::{json, Value};

use crate::error::Result;
use crate::interrupt::check_interrupted;
use crate::store::Store;
use crate::tasks::{log_batch_progress, UpdateSummary};
use crate::{log_error, log_info};

#[derive(Debug, Clone)]
pub struct BackfillNameConfig {
    pub collection: String,
    pub batch_size: usize,
    pub dry_run: bool,
    pub skip_existing: bool,
}

impl BackfillNameConfig {
    pub fn for_users(batch_size: usize, dry_run: bool, skip_existing: bool) -> Self {
        BackfillNameConfig {
            collection: "users".to_string(),
            batch_size,
            dry_run,
            skip_existing,
        }
    }
}

/// The derivation rule, kept separate so it is testable on its own.
pub fn derive_name(first: Option<&str>, last: Option<&str>) -> String {
    match (first, last) {
        (Some(f), Some(l)) => format!("{} {}", f, l),
        (Some(f), None) => f.to_string(),
        (None, Some(l)) => l.to_string(),
        (None, None) => String::new(),
    }
}

fn string_field<'a>(row: &'a Value, field: &str) -> Option<&'a str> {
    row.get(field).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty())
}

pub fn run(store: &Store, config: &BackfillNameConfig) -> Result<UpdateSummary> {
    let coll = store.collection(&config.collection);
    let filter = if config.skip_existing {
        json!({ "name": {"$exists": false} })
    } else {
        json!({})
    };

    let mut summary = UpdateSummary {
        dry_run: config.dry_run,
        ..Default::default()
    };

    if config.dry_run {
        summary.matched = coll.count_documents(&filter)?;
        log_info!(
            "DRY RUN: would set name on {} document(s) in {}",
            summary.matched,
            config.collection
        );
        return Ok(summary);
    }

    let mut cursor = coll.find_batched(&filter, Some(&["firstName", "lastName", "name"]))?;
    let total = cursor.remaining();
    let mut processed = 0usize;

    while !cursor.is_finished() {
        check_interrupted()?;
        for row in cursor.next_chunk(config.batch_size) {
            processed += 1;
            summary.matched += 1;

            let name = derive_name(
                string_field(&row, "firstName"),
                string_field(&row, "lastName"),
            );
            let filter = json!({ "_id": row["_id"] });
            match coll.update_one(&filter, &json!({ "$set": { "name": name } })) {
                Ok((_, modified)) => summary.updated += modified,
                Err(e) => {
                    summary.errors += 1;
                    log_error!("failed to set name on document {}: {}", row["_id"], e);
                }
            }
        }
        store.flush()?;
        log_batch_progress(&config.collection, processed, total);
    }

    summary.log("name backfill");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_name_variants() {
        assert_eq!(derive_name(Some("John"), Some("Doe")), "John Doe");
        assert_eq!(derive_name(Some("John"), None), "John");
        assert_eq!(derive_name(None, Some("Doe")), "Doe");
        assert_eq!(derive_name(None, None), "");
    }
}
