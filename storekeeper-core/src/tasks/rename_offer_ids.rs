// src/tasks/rename_offer_ids.rs
//! Rename `id` -> `offerId` inside the `offers` array of order documents.
//!
//! Array elements without an `id` field are left untouched; documents
//! whose array needs no change are not rewritten, so a re-run is a no-op.

use serde_json::{json, Value};

use crate::error::Result;
use crate::interrupt::check_interrupted;
use crate::store::Store;
use crate::tasks::{log_batch_progress, UpdateSummary};
use crate::{log_error, log_info};

#[derive(Debug, Clone)]
pub struct RenameOfferIdsConfig {
    pub collection: String,
    pub array_field: String,
    pub old_key: String,
    pub new_key: String,
    pub batch_size: usize,
    pub dry_run: bool,
}

impl RenameOfferIdsConfig {
    pub fn for_orders(batch_size: usize, dry_run: bool) -> Self {
        RenameOfferIdsConfig {
            collection: "orders".to_string(),
            array_field: "offers".to_string(),
            old_key: "id".to_string(),
            new_key: "offerId".to_string(),
            batch_size,
            dry_run,
        }
    }
}

/// Rewrite one array value, renaming the key in every element object that
/// carries it. Returns the rewritten array and whether anything changed.
fn rename_in_array(array: &Value, old_key: &str, new_key: &str) -> (Value, bool) {
    let Some(elements) = array.as_array() else {
        return (array.clone(), false);
    };
    let mut changed = false;
    let rewritten: Vec<Value> = elements
        .iter()
        .map(|element| match element.as_object() {
            Some(obj) if obj.contains_key(old_key) => {
                let mut updated = obj.clone();
                if let Some(value) = updated.remove(old_key) {
                    updated.insert(new_key.to_string(), value);
                    changed = true;
                }
                Value::Object(updated)
            }
            _ => element.clone(),
        })
        .collect();
    (Value::Array(rewritten), changed)
}

pub fn run(store: &Store, config: &RenameOfferIdsConfig) -> Result<UpdateSummary> {
    let coll = store.collection(&config.collection);
    let filter = json!({ &config.array_field: {"$exists": true, "$ne": null} });

    let mut summary = UpdateSummary {
        dry_run: config.dry_run,
        ..Default::default()
    };

    let mut cursor = coll.find_batched(&filter, Some(&[&config.array_field]))?;
    let total = cursor.remaining();
    let mut processed = 0usize;

    if config.dry_run {
        // Still count precisely: only arrays actually carrying the old key.
        while !cursor.is_finished() {
            for row in cursor.next_chunk(config.batch_size) {
                if let Some(array) = row.get(&config.array_field) {
                    let (_, would_change) =
                        rename_in_array(array, &config.old_key, &config.new_key);
                    if would_change {
                        summary.matched += 1;
                    }
                }
            }
        }
        log_info!(
            "DRY RUN: would rename {}.{} in {} of {} document(s)",
            config.array_field,
            config.old_key,
            summary.matched,
            total
        );
        return Ok(summary);
    }

    while !cursor.is_finished() {
        check_interrupted()?;
        for row in cursor.next_chunk(config.batch_size) {
            processed += 1;
            let Some(array) = row.get(&config.array_field) else {
                continue;
            };
            let (rewritten, changed) = rename_in_array(array, &config.old_key, &config.new_key);
            if !changed {
                continue;
            }
            summary.matched += 1;

            let filter = json!({ "_id": row["_id"] });
            let update = json!({ "$set": { &config.array_field: rewritten } });
            match coll.update_one(&filter, &update) {
                Ok((_, modified)) => summary.updated += modified,
                Err(e) => {
                    summary.errors += 1;
                    log_error!("failed to rewrite {} on document {}: {}", config.array_field, row["_id"], e);
                }
            }
        }
        store.flush()?;
        log_batch_progress(&config.collection, processed, total);
    }

    summary.log("offer id rename");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_in_array_mixed_elements() {
        let array = json!([
            {"id": "o1", "discount": 5},
            {"offerId": "o2"},
            {"note": "no id"},
            42
        ]);
        let (rewritten, changed) = rename_in_array(&array, "id", "offerId");
        assert!(changed);
        assert_eq!(
            rewritten,
            json!([
                {"offerId": "o1", "discount": 5},
                {"offerId": "o2"},
                {"note": "no id"},
                42
            ])
        );
    }

    #[test]
    fn test_rename_in_array_no_change() {
        let array = json!([{"offerId": "o1"}]);
        let (rewritten, changed) = rename_in_array(&array, "id", "offerId");
        assert!(!changed);
        assert_eq!(rewritten, array);
    }
}
