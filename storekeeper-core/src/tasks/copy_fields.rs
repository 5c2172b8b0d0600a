// src/tasks/copy_fields.rs
//! Exact-copy field duplication inside one collection.
//!
//! Copies each source field's value to a new target field, verbatim and
//! whatever its type; source fields are never modified or removed. With
//! `skip_existing` (the default) documents already holding the target
//! field are left alone, which makes a re-run a no-op.

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::interrupt::check_interrupted;
use crate::store::Store;
use crate::tasks::{log_batch_progress, UpdateSummary};
use crate::{log_error, log_info};

#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct CopyFieldsConfig {
    pub collection: String,
    pub mappings: Vec<FieldMapping>,
    pub batch_size: usize,
    pub dry_run: bool,
    pub skip_existing: bool,
}

impl CopyFieldsConfig {
    /// The production use: users' phone fields get their new names.
    pub fn phone_fields(batch_size: usize, dry_run: bool, skip_existing: bool) -> Self {
        CopyFieldsConfig {
            collection: "users".to_string(),
            mappings: vec![
                FieldMapping {
                    source: "phone".to_string(),
                    target: "phoneNumber".to_string(),
                },
                FieldMapping {
                    source: "phoneVerification".to_string(),
                    target: "phoneNumberVerification".to_string(),
                },
            ],
            batch_size,
            dry_run,
            skip_existing,
        }
    }

    /// Documents needing work: any mapping whose source exists and (when
    /// skipping) whose target does not.
    fn selection_filter(&self) -> Value {
        let clauses: Vec<Value> = self
            .mappings
            .iter()
            .map(|m| {
                let mut clause = Map::new();
                clause.insert(m.source.clone(), json!({"$exists": true}));
                if self.skip_existing {
                    clause.insert(m.target.clone(), json!({"$exists": false}));
                }
                Value::Object(clause)
            })
            .collect();
        match clauses.len() {
            0 => json!({}),
            1 => clauses.into_iter().next().unwrap_or_default(),
            _ => json!({ "$or": clauses }),
        }
    }
}

pub fn run(store: &Store, config: &CopyFieldsConfig) -> Result<UpdateSummary> {
    let coll = store.collection(&config.collection);
    let filter = config.selection_filter();

    for mapping in &config.mappings {
        let has_source = coll.count_documents(&json!({ &mapping.source: {"$exists": true} }))?;
        let has_target = coll.count_documents(&json!({ &mapping.target: {"$exists": true} }))?;
        log_info!(
            "{} -> {}: {} documents with source, {} with target",
            mapping.source,
            mapping.target,
            has_source,
            has_target
        );
    }

    let mut summary = UpdateSummary {
        dry_run: config.dry_run,
        ..Default::default()
    };

    if config.dry_run {
        summary.matched = coll.count_documents(&filter)?;
        log_info!(
            "DRY RUN: would copy fields on {} document(s) in {}",
            summary.matched,
            config.collection
        );
        return Ok(summary);
    }

    let mut cursor = coll.find_batched(&filter, None)?;
    let total = cursor.remaining();
    let mut processed = 0usize;

    while !cursor.is_finished() {
        check_interrupted()?;
        for row in cursor.next_chunk(config.batch_size) {
            processed += 1;
            summary.matched += 1;

            let mut set = Map::new();
            for mapping in &config.mappings {
                let Some(value) = row.get(&mapping.source) else {
                    continue;
                };
                if config.skip_existing && row.get(&mapping.target).is_some() {
                    continue;
                }
                set.insert(mapping.target.clone(), value.clone());
            }
            if set.is_empty() {
                continue;
            }

            let filter = json!({ "_id": row["_id"] });
            match coll.update_one(&filter, &json!({ "$set": set })) {
                Ok((_, modified)) => summary.updated += modified,
                Err(e) => {
                    summary.errors += 1;
                    log_error!("failed to copy fields on document {}: {}", row["_id"], e);
                }
            }
        }
        store.flush()?;
        log_batch_progress(&config.collection, processed, total);
    }

    summary.log("field copy");
    Ok(summary)
}
