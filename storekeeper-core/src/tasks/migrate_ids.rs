// src/tasks/migrate_ids.rs
//! Business-identifier migration and referential-integrity verification.
//!
//! Brings a primary collection's business identifier field into agreement
//! with its surrogate `_id` and propagates the change to the dependent
//! collections that reference it, with before/after integrity reporting
//! and a JSON backup of the old-id -> new-id mapping for audit.
//!
//! The whole procedure is a single linear batch pass: analyze, verify,
//! build the mapping, rewrite the primary collection, rewrite each
//! dependent kind in its configured order, verify again. Re-running
//! converges: every mutation writes the value the record should already
//! have.

use ahash::{AHashMap, AHashSet};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::document::value_id_string;
use crate::error::Result;
use crate::interrupt::check_interrupted;
use crate::store::{Collection, Store};
use crate::tasks::log_batch_progress;
use crate::{log_error, log_info, log_warn};

/// How many mismatch / invalid-reference samples a report carries.
pub const SAMPLE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Mutate the store.
    Live,
    /// Analyze and verify, report would-update counts, write nothing.
    DryRun,
    /// Analyze and verify only.
    CheckOnly,
}

#[derive(Debug, Clone)]
pub struct MigrateConfig {
    pub primary_collection: String,
    /// Dependent kinds, migrated and verified in this order. The order is
    /// cosmetic (report readability); no kind depends on another.
    pub dependent_collections: Vec<String>,
    /// The business-identifier field, in the primary collection and as the
    /// foreign reference in every dependent kind.
    pub id_field: String,
    pub batch_size: usize,
    pub backup_path: PathBuf,
    pub mode: RunMode,
}

impl MigrateConfig {
    /// The production layout: users referenced by addresses, orders,
    /// reviews and rewards through `userId`.
    pub fn for_users(batch_size: usize, mode: RunMode) -> Self {
        MigrateConfig {
            primary_collection: "users".to_string(),
            dependent_collections: vec![
                "addresses".to_string(),
                "orders".to_string(),
                "reviews".to_string(),
                "rewards".to_string(),
            ],
            id_field: "userId".to_string(),
            batch_size,
            backup_path: PathBuf::from("user_id_migration_backup.json"),
            mode,
        }
    }
}

// ---------------------------------------------------------------------------
// Analyze
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct PrimaryStats {
    pub total: u64,
    pub with_business_id: u64,
    pub without_business_id: u64,
    pub already_consistent: u64,
}

#[derive(Debug, Clone)]
pub struct DependentStats {
    pub kind: String,
    pub total_documents: u64,
    pub with_reference: u64,
    pub distinct_references: u64,
}

#[derive(Debug, Clone)]
pub struct StateAnalysis {
    pub primary: PrimaryStats,
    pub dependents: Vec<DependentStats>,
}

/// Read-only census of the primary and dependent collections.
pub fn analyze(store: &Store, config: &MigrateConfig) -> Result<StateAnalysis> {
    let primary = store.collection(&config.primary_collection);
    let present = json!({ &config.id_field: {"$exists": true, "$ne": null} });

    let mut stats = PrimaryStats {
        total: primary.count_documents(&json!({}))?,
        with_business_id: primary.count_documents(&present)?,
        ..Default::default()
    };
    stats.without_business_id = stats.total - stats.with_business_id;

    // Consistency cannot be expressed as a plain filter; scan and compare.
    for row in primary.find_with_projection(&json!({}), Some(&[&config.id_field]))? {
        if business_id_of(&row, &config.id_field).as_deref() == Some(surrogate_of(&row).as_str()) {
            stats.already_consistent += 1;
        }
    }

    let mut dependents = Vec::new();
    for kind in &config.dependent_collections {
        let coll = store.collection(kind);
        dependents.push(DependentStats {
            kind: kind.clone(),
            total_documents: coll.count_documents(&json!({}))?,
            with_reference: coll.count_documents(&present)?,
            distinct_references: coll.distinct(&config.id_field, &json!({}))?.len() as u64,
        });
    }

    Ok(StateAnalysis {
        primary: stats,
        dependents,
    })
}

pub fn log_analysis(analysis: &StateAnalysis, config: &MigrateConfig) {
    log_info!("=== current state ===");
    log_info!("{} collection:", config.primary_collection);
    log_info!("  total records:            {}", analysis.primary.total);
    log_info!("  with {} field:        {}", config.id_field, analysis.primary.with_business_id);
    log_info!("  without {} field:     {}", config.id_field, analysis.primary.without_business_id);
    log_info!("  already consistent:       {}", analysis.primary.already_consistent);
    for dep in &analysis.dependents {
        log_info!("{}:", dep.kind);
        log_info!("  total documents:          {}", dep.total_documents);
        log_info!("  carrying a reference:     {}", dep.with_reference);
        log_info!("  distinct reference values:{}", dep.distinct_references);
    }
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Old business identifier -> new business identifier (== surrogate id),
/// built once per run and discarded afterwards except for its backup file.
#[derive(Debug, Clone, Default)]
pub struct IdMapping {
    entries: AHashMap<String, String>,
}

impl IdMapping {
    /// One entry per primary record. Records lacking a business id are
    /// keyed by their surrogate id, so no record is ever unmapped.
    pub fn build(primary: &Collection, id_field: &str) -> Result<IdMapping> {
        let mut entries = AHashMap::new();
        for row in primary.find_with_projection(&json!({}), Some(&[id_field]))? {
            let new_id = surrogate_of(&row);
            let old_id = business_id_of(&row, id_field).unwrap_or_else(|| new_id.clone());
            entries.insert(old_id, new_id);
        }
        Ok(IdMapping { entries })
    }

    pub fn get(&self, old_id: &str) -> Option<&String> {
        self.entries.get(old_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the mapping as a flat string-to-string JSON object. Best
    /// effort: a failed write is logged and the migration proceeds.
    pub fn save_backup(&self, path: &std::path::Path) {
        let sorted: BTreeMap<&String, &String> = self.entries.iter().collect();
        let write = serde_json::to_string_pretty(&sorted)
            .map_err(std::io::Error::other)
            .and_then(|rendered| std::fs::write(path, rendered));
        match write {
            Ok(()) => log_info!("mapping backup saved to {}", path.display()),
            Err(e) => log_warn!("could not save mapping backup {}: {}", path.display(), e),
        }
    }
}

/// Surrogate id string of a projected row.
fn surrogate_of(row: &Value) -> String {
    value_id_string(&row["_id"])
}

/// Business id string of a projected row, `None` when absent or null.
fn business_id_of(row: &Value, id_field: &str) -> Option<String> {
    match row.get(id_field) {
        None | Some(Value::Null) => None,
        Some(v) => Some(value_id_string(v)),
    }
}

// ---------------------------------------------------------------------------
// Migrate
// ---------------------------------------------------------------------------

/// Set the business id of every primary record to its surrogate id string.
/// Per-record failures are logged and skipped; the count of errors is part
/// of the outcome. Idempotent.
fn migrate_primary(store: &Store, config: &MigrateConfig) -> Result<(u64, u64)> {
    let primary = store.collection(&config.primary_collection);
    let mut cursor = primary.find_batched(&json!({}), Some(&[&config.id_field]))?;
    let total = cursor.remaining();
    log_info!("migrating {} ({} records)...", config.primary_collection, total);

    let mut updated = 0u64;
    let mut errors = 0u64;
    let mut processed = 0usize;

    while !cursor.is_finished() {
        check_interrupted()?;
        for row in cursor.next_chunk(config.batch_size) {
            let new_id = surrogate_of(&row);
            let filter = json!({ "_id": row["_id"] });
            let update = json!({ "$set": { &config.id_field: new_id } });
            match primary.update_one(&filter, &update) {
                Ok((_, modified)) => updated += modified,
                Err(e) => {
                    errors += 1;
                    log_error!("failed to update {} record {}: {}", config.primary_collection, surrogate_of(&row), e);
                }
            }
            processed += 1;
        }
        store.flush()?;
        log_batch_progress(&config.primary_collection, processed, total);
    }

    log_info!("updated {} records in {}", updated, config.primary_collection);
    Ok((updated, errors))
}

/// Rewrite references in one dependent kind through the mapping. References
/// absent from the mapping are left byte-for-byte untouched - a primary
/// record list captured before new references were added is a known,
/// accepted gap, not a failure.
fn migrate_dependent(
    store: &Store,
    config: &MigrateConfig,
    kind: &str,
    mapping: &IdMapping,
) -> Result<(u64, u64)> {
    let coll = store.collection(kind);
    let filter = json!({ &config.id_field: {"$exists": true, "$ne": null} });
    let mut cursor = coll.find_batched(&filter, Some(&[&config.id_field]))?;
    let total = cursor.remaining();
    log_info!("migrating references in {} ({} documents)...", kind, total);

    let mut updated = 0u64;
    let mut errors = 0u64;
    let mut processed = 0usize;

    while !cursor.is_finished() {
        check_interrupted()?;
        for row in cursor.next_chunk(config.batch_size) {
            processed += 1;
            let old_ref = match business_id_of(&row, &config.id_field) {
                Some(r) => r,
                None => continue,
            };
            let Some(new_ref) = mapping.get(&old_ref) else {
                continue;
            };
            let filter = json!({ "_id": row["_id"] });
            let update = json!({ "$set": { &config.id_field: new_ref } });
            match coll.update_one(&filter, &update) {
                Ok((_, modified)) => updated += modified,
                Err(e) => {
                    errors += 1;
                    log_error!("failed to update {} document {}: {}", kind, surrogate_of(&row), e);
                }
            }
        }
        store.flush()?;
        log_batch_progress(kind, processed, total);
    }

    log_info!("updated {} documents in {}", updated, kind);
    Ok((updated, errors))
}

// ---------------------------------------------------------------------------
// Verify
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MismatchSample {
    pub id: String,
    pub business_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub total: u64,
    pub consistent: u64,
    pub inconsistent: u64,
    /// At most [`SAMPLE_LIMIT`] mismatches for inspection.
    pub samples: Vec<MismatchSample>,
}

#[derive(Debug, Clone)]
pub struct ReferenceReport {
    pub kind: String,
    pub total_references: u64,
    pub valid_references: u64,
    pub invalid_references: u64,
    /// At most [`SAMPLE_LIMIT`] de-duplicated invalid values.
    pub invalid_samples: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrphanReport {
    pub kind: String,
    /// The full de-duplicated set of reference values with no matching
    /// primary business id, sorted for stable output.
    pub values: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub consistency: ConsistencyReport,
    pub references: Vec<ReferenceReport>,
    pub orphans: Vec<OrphanReport>,
}

impl IntegrityReport {
    /// Clean means every primary record is consistent and every dependent
    /// reference resolves.
    pub fn is_clean(&self) -> bool {
        self.consistency.inconsistent == 0
            && self.references.iter().all(|r| r.invalid_references == 0)
    }
}

/// Read-only consistency, reference-integrity and orphan checks.
pub fn verify_integrity(store: &Store, config: &MigrateConfig) -> Result<IntegrityReport> {
    let primary = store.collection(&config.primary_collection);

    // (a) consistency: business id == surrogate id, as strings.
    let mut consistency = ConsistencyReport::default();
    for row in primary.find_with_projection(&json!({}), Some(&[&config.id_field]))? {
        consistency.total += 1;
        let surrogate = surrogate_of(&row);
        let business = business_id_of(&row, &config.id_field);
        if business.as_deref() == Some(surrogate.as_str()) {
            consistency.consistent += 1;
        } else {
            consistency.inconsistent += 1;
            if consistency.samples.len() < SAMPLE_LIMIT {
                consistency.samples.push(MismatchSample {
                    id: surrogate,
                    business_id: business,
                });
            }
        }
    }

    // The valid set: every business-id value currently in the primary
    // collection.
    let present = json!({ &config.id_field: {"$exists": true, "$ne": null} });
    let valid_ids: AHashSet<String> = primary
        .distinct(&config.id_field, &json!({}))?
        .iter()
        .filter(|v| !v.is_null())
        .map(value_id_string)
        .collect();

    // (b) reference integrity and (c) orphan detection, one scan per kind.
    let mut references = Vec::new();
    let mut orphans = Vec::new();
    for kind in &config.dependent_collections {
        let coll = store.collection(kind);
        let mut report = ReferenceReport {
            kind: kind.clone(),
            total_references: 0,
            valid_references: 0,
            invalid_references: 0,
            invalid_samples: Vec::new(),
        };
        let mut orphan_set: AHashSet<String> = AHashSet::new();

        for row in coll.find_with_projection(&present, Some(&[&config.id_field]))? {
            let Some(reference) = business_id_of(&row, &config.id_field) else {
                continue;
            };
            report.total_references += 1;
            if valid_ids.contains(&reference) {
                report.valid_references += 1;
            } else {
                report.invalid_references += 1;
                if !orphan_set.contains(&reference) && report.invalid_samples.len() < SAMPLE_LIMIT {
                    report.invalid_samples.push(reference.clone());
                }
                orphan_set.insert(reference);
            }
        }

        let mut values: Vec<String> = orphan_set.into_iter().collect();
        values.sort();
        references.push(report);
        orphans.push(OrphanReport {
            kind: kind.clone(),
            values,
        });
    }

    Ok(IntegrityReport {
        consistency,
        references,
        orphans,
    })
}

pub fn log_integrity(report: &IntegrityReport, config: &MigrateConfig) {
    log_info!("=== referential integrity ===");
    log_info!("{} consistency:", config.primary_collection);
    log_info!("  total:        {}", report.consistency.total);
    log_info!("  consistent:   {}", report.consistency.consistent);
    log_info!("  inconsistent: {}", report.consistency.inconsistent);
    for sample in &report.consistency.samples {
        log_warn!(
            "  mismatch: _id={}, {}={}",
            sample.id,
            config.id_field,
            sample.business_id.as_deref().unwrap_or("<missing>")
        );
    }
    if report.consistency.inconsistent as usize > report.consistency.samples.len()
        && !report.consistency.samples.is_empty()
    {
        log_warn!(
            "  (showing first {} of {} mismatches)",
            report.consistency.samples.len(),
            report.consistency.inconsistent
        );
    }

    for refs in &report.references {
        log_info!("{} references:", refs.kind);
        log_info!("  total:   {}", refs.total_references);
        log_info!("  valid:   {}", refs.valid_references);
        log_info!("  invalid: {}", refs.invalid_references);
        for value in &refs.invalid_samples {
            log_warn!("  invalid {} value: {}", config.id_field, value);
        }
    }

    for orphan in &report.orphans {
        if orphan.values.is_empty() {
            log_info!("{}: no orphaned references", orphan.kind);
        } else {
            log_warn!(
                "{}: {} orphaned {} value(s): {:?}",
                orphan.kind,
                orphan.values.len(),
                config.id_field,
                &orphan.values[..orphan.values.len().min(10)]
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MigrationOutcome {
    pub mode: RunMode,
    pub analysis: StateAnalysis,
    pub pre_integrity: IntegrityReport,
    pub mapping_size: usize,
    pub primary_updated: u64,
    pub dependent_updates: Vec<(String, u64)>,
    /// Present after a live or dry run; absent for check-only.
    pub post_integrity: Option<IntegrityReport>,
    pub record_errors: u64,
    pub elapsed: Duration,
}

impl MigrationOutcome {
    /// A live run succeeds only when nothing errored and the post-run
    /// verification is clean; residual counts mean the operator should
    /// re-run. Preview and check-only runs mutate nothing and always
    /// succeed.
    pub fn is_success(&self) -> bool {
        match self.mode {
            RunMode::CheckOnly | RunMode::DryRun => true,
            RunMode::Live => {
                self.record_errors == 0
                    && self.post_integrity.as_ref().is_some_and(|r| r.is_clean())
            }
        }
    }
}

/// The complete migration procedure of the module docs. The store handle
/// is borrowed for the duration of the run; the caller opened it (fail
/// closed on connectivity) and drops it unconditionally afterwards.
pub fn run_migration(store: &Store, config: &MigrateConfig) -> Result<MigrationOutcome> {
    let start = Instant::now();

    let analysis = analyze(store, config)?;
    log_analysis(&analysis, config);

    log_info!("pre-migration integrity check...");
    let pre_integrity = verify_integrity(store, config)?;
    log_integrity(&pre_integrity, config);

    if config.mode == RunMode::CheckOnly {
        log_info!("check-only mode: skipping migration");
        return Ok(MigrationOutcome {
            mode: config.mode,
            analysis,
            pre_integrity,
            mapping_size: 0,
            primary_updated: 0,
            dependent_updates: Vec::new(),
            post_integrity: None,
            record_errors: 0,
            elapsed: start.elapsed(),
        });
    }

    let primary = store.collection(&config.primary_collection);
    let mapping = IdMapping::build(&primary, &config.id_field)?;
    log_info!("built mapping for {} records", mapping.len());
    if config.mode == RunMode::Live {
        mapping.save_backup(&config.backup_path);
    }

    let mut primary_updated = 0u64;
    let mut dependent_updates = Vec::new();
    let mut record_errors = 0u64;

    if config.mode == RunMode::DryRun {
        let would_update = analysis.primary.total - analysis.primary.already_consistent;
        log_info!(
            "DRY RUN: would update {} field on {} {} record(s)",
            config.id_field,
            would_update,
            config.primary_collection
        );
        for dep in &analysis.dependents {
            log_info!(
                "DRY RUN: would examine {} reference(s) in {}",
                dep.with_reference,
                dep.kind
            );
        }
    } else if mapping.is_empty() {
        log_info!("no records to migrate");
    } else {
        let (updated, errors) = migrate_primary(store, config)?;
        primary_updated = updated;
        record_errors += errors;

        for kind in &config.dependent_collections {
            let (updated, errors) = migrate_dependent(store, config, kind, &mapping)?;
            dependent_updates.push((kind.clone(), updated));
            record_errors += errors;
        }
    }

    log_info!("post-migration integrity check...");
    let post_integrity = verify_integrity(store, config)?;
    log_integrity(&post_integrity, config);

    let outcome = MigrationOutcome {
        mode: config.mode,
        analysis,
        pre_integrity,
        mapping_size: mapping.len(),
        primary_updated,
        dependent_updates,
        post_integrity: Some(post_integrity),
        record_errors,
        elapsed: start.elapsed(),
    };

    log_info!("=== migration summary ===");
    log_info!("  elapsed:          {:.2}s", outcome.elapsed.as_secs_f64());
    log_info!("  mapping entries:  {}", outcome.mapping_size);
    log_info!("  primary updated:  {}", outcome.primary_updated);
    for (kind, updated) in &outcome.dependent_updates {
        log_info!("  {} updated: {}", kind, updated);
    }
    log_info!("  record errors:    {}", outcome.record_errors);
    if config.mode == RunMode::DryRun {
        log_info!("DRY RUN completed - no changes were made");
    }

    Ok(outcome)
}
