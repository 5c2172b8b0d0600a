// Integration tests for the id migration and its verification reports,
// run against a seeded store in a temp directory.

use serde_json::{json, Value};
use tempfile::TempDir;

use crate::store::Store;
use crate::tasks::migrate_ids::{
    analyze, run_migration, verify_integrity, IdMapping, MigrateConfig, RunMode, SAMPLE_LIMIT,
};

fn open_store(seed: Value) -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.json");
    std::fs::write(&path, serde_json::to_string(&seed).unwrap()).unwrap();
    let store = Store::connect(dir.path().to_str().unwrap(), "app").unwrap();
    (dir, store)
}

fn config(dir: &TempDir, mode: RunMode) -> MigrateConfig {
    MigrateConfig {
        primary_collection: "users".to_string(),
        dependent_collections: vec!["addresses".to_string(), "orders".to_string()],
        id_field: "userId".to_string(),
        batch_size: 10,
        backup_path: dir.path().join("backup.json"),
        mode,
    }
}

fn seed() -> Value {
    json!({
        "users": [
            {"_id": "A", "userId": "old1", "email": "a@x"},
            {"_id": "B", "email": "b@x"}
        ],
        "addresses": [
            {"_id": 1, "userId": "old1", "city": "Pune"},
            {"_id": 2, "userId": "unknown", "city": "Goa"}
        ],
        "orders": [
            {"_id": 10, "userId": "old1", "total": 250}
        ]
    })
}

#[test]
fn test_mapping_covers_every_primary_record() {
    let (_dir, store) = open_store(seed());
    let mapping = IdMapping::build(&store.collection("users"), "userId").unwrap();
    assert_eq!(mapping.len(), 2);
    assert_eq!(mapping.get("old1"), Some(&"A".to_string()));
    // A record without a business id is keyed by its surrogate id.
    assert_eq!(mapping.get("B"), Some(&"B".to_string()));
}

#[test]
fn test_live_migration_rewrites_primary_and_references() {
    let (dir, store) = open_store(seed());
    let outcome = run_migration(&store, &config(&dir, RunMode::Live)).unwrap();

    let users = store.collection("users");
    let a = users.find_one(&json!({"_id": "A"})).unwrap().unwrap();
    assert_eq!(a["userId"], json!("A"));
    let b = users.find_one(&json!({"_id": "B"})).unwrap().unwrap();
    assert_eq!(b["userId"], json!("B"));
    // Unrelated fields survive.
    assert_eq!(a["email"], json!("a@x"));

    let addresses = store.collection("addresses");
    let mapped = addresses.find_one(&json!({"_id": 1})).unwrap().unwrap();
    assert_eq!(mapped["userId"], json!("A"));
    // A reference absent from the mapping stays untouched.
    let orphaned = addresses.find_one(&json!({"_id": 2})).unwrap().unwrap();
    assert_eq!(orphaned["userId"], json!("unknown"));

    let order = store
        .collection("orders")
        .find_one(&json!({"_id": 10}))
        .unwrap()
        .unwrap();
    assert_eq!(order["userId"], json!("A"));

    // The orphaned reference keeps the post-run verification dirty, so
    // the run reports failure and the operator is pointed at the orphan.
    assert!(!outcome.is_success());
    let post = outcome.post_integrity.unwrap();
    assert_eq!(post.consistency.inconsistent, 0);
    let addr_refs = &post.references[0];
    assert_eq!(addr_refs.kind, "addresses");
    assert_eq!(addr_refs.invalid_references, 1);
    assert_eq!(post.orphans[0].values, vec!["unknown".to_string()]);
}

#[test]
fn test_live_migration_without_orphans_succeeds() {
    let (dir, store) = open_store(json!({
        "users": [{"_id": "A", "userId": "old1"}],
        "addresses": [{"_id": 1, "userId": "old1"}],
        "orders": []
    }));
    let outcome = run_migration(&store, &config(&dir, RunMode::Live)).unwrap();
    assert!(outcome.is_success());
    assert!(outcome.post_integrity.unwrap().is_clean());
    assert_eq!(outcome.record_errors, 0);
}

#[test]
fn test_migration_is_idempotent() {
    let (dir, store) = open_store(seed());
    run_migration(&store, &config(&dir, RunMode::Live)).unwrap();
    let second = run_migration(&store, &config(&dir, RunMode::Live)).unwrap();
    // Every record already carries the value it should; nothing modifies.
    assert_eq!(second.primary_updated, 0);
    for (_, updated) in &second.dependent_updates {
        assert_eq!(*updated, 0);
    }
}

#[test]
fn test_live_migration_writes_mapping_backup() {
    let (dir, store) = open_store(seed());
    run_migration(&store, &config(&dir, RunMode::Live)).unwrap();

    let backup = std::fs::read_to_string(dir.path().join("backup.json")).unwrap();
    let mapping: serde_json::Map<String, Value> = serde_json::from_str(&backup).unwrap();
    assert_eq!(mapping["old1"], json!("A"));
    assert_eq!(mapping["B"], json!("B"));
}

#[test]
fn test_dry_run_mutates_nothing() {
    let (dir, store) = open_store(seed());
    let before = store.collection("users").find(&json!({})).unwrap();
    let outcome = run_migration(&store, &config(&dir, RunMode::DryRun)).unwrap();
    assert!(outcome.is_success());
    assert_eq!(store.collection("users").find(&json!({})).unwrap(), before);
    assert!(!dir.path().join("backup.json").exists());
}

#[test]
fn test_check_only_reports_without_migrating() {
    let (dir, store) = open_store(seed());
    let outcome = run_migration(&store, &config(&dir, RunMode::CheckOnly)).unwrap();
    assert!(outcome.is_success());
    assert!(outcome.post_integrity.is_none());
    assert_eq!(outcome.primary_updated, 0);

    let a = store
        .collection("users")
        .find_one(&json!({"_id": "A"}))
        .unwrap()
        .unwrap();
    assert_eq!(a["userId"], json!("old1"));
}

#[test]
fn test_analyze_counts() {
    let (dir, store) = open_store(seed());
    let analysis = analyze(&store, &config(&dir, RunMode::CheckOnly)).unwrap();

    assert_eq!(analysis.primary.total, 2);
    assert_eq!(analysis.primary.with_business_id, 1);
    assert_eq!(analysis.primary.without_business_id, 1);
    assert_eq!(analysis.primary.already_consistent, 0);

    let addresses = &analysis.dependents[0];
    assert_eq!(addresses.kind, "addresses");
    assert_eq!(addresses.total_documents, 2);
    assert_eq!(addresses.with_reference, 2);
    assert_eq!(addresses.distinct_references, 2);
}

#[test]
fn test_verify_dedupes_repeated_orphans() {
    let (dir, store) = open_store(json!({
        "users": [{"_id": "A", "userId": "A"}],
        "addresses": [
            {"_id": 1, "userId": "ghost"},
            {"_id": 2, "userId": "ghost"},
            {"_id": 3, "userId": "A"}
        ],
        "orders": []
    }));
    let report = verify_integrity(&store, &config(&dir, RunMode::CheckOnly)).unwrap();

    let refs = &report.references[0];
    assert_eq!(refs.total_references, 3);
    assert_eq!(refs.valid_references, 1);
    assert_eq!(refs.invalid_references, 2);
    // Samples and the orphan set are de-duplicated.
    assert_eq!(refs.invalid_samples, vec!["ghost".to_string()]);
    assert_eq!(report.orphans[0].values, vec!["ghost".to_string()]);
    assert!(!report.is_clean());
}

#[test]
fn test_consistency_samples_are_capped() {
    let users: Vec<Value> = (0..SAMPLE_LIMIT + 10)
        .map(|i| json!({"_id": format!("u{}", i), "userId": format!("old{}", i)}))
        .collect();
    let (dir, store) = open_store(json!({
        "users": users,
        "addresses": [],
        "orders": []
    }));
    let report = verify_integrity(&store, &config(&dir, RunMode::CheckOnly)).unwrap();
    assert_eq!(report.consistency.inconsistent, (SAMPLE_LIMIT + 10) as u64);
    assert_eq!(report.consistency.samples.len(), SAMPLE_LIMIT);
}

#[test]
fn test_update_failures_are_counted_and_do_not_abort() {
    // Pointing the engine at the immutable `_id` field makes every
    // primary update fail; each failure is counted and skipped, and the
    // run still completes with a full report instead of erroring out.
    let (dir, store) = open_store(json!({
        "users": [{"_id": "A"}, {"_id": "B"}],
        "addresses": [{"_id": 1}],
        "orders": []
    }));
    let mut config = config(&dir, RunMode::Live);
    config.id_field = "_id".to_string();

    let outcome = run_migration(&store, &config).unwrap();
    assert_eq!(outcome.record_errors, 2);
    assert_eq!(outcome.primary_updated, 0);
    assert!(!outcome.is_success());

    // Nothing was mutated along the way.
    let users = store.collection("users").find(&json!({})).unwrap();
    assert_eq!(users, vec![json!({"_id": "A"}), json!({"_id": "B"})]);
}

#[test]
fn test_numeric_ids_compare_as_strings() {
    let (dir, store) = open_store(json!({
        "users": [{"_id": 42, "userId": "legacy"}],
        "addresses": [{"_id": 1, "userId": "legacy"}],
        "orders": []
    }));
    run_migration(&store, &config(&dir, RunMode::Live)).unwrap();

    let user = store
        .collection("users")
        .find_one(&json!({"_id": 42}))
        .unwrap()
        .unwrap();
    // The business id becomes the surrogate id's string rendering.
    assert_eq!(user["userId"], json!("42"));
    let addr = store
        .collection("addresses")
        .find_one(&json!({"_id": 1}))
        .unwrap()
        .unwrap();
    assert_eq!(addr["userId"], json!("42"));
}
