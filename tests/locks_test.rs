//! Lock directory operations.

use serde_json::{Map, Value, json};
use workq::locks::{Acquire, ClaimLocks, lock_exists, read_payload};

fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("payload must be an object"),
    }
}

#[tokio::test]
async fn acquire_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let locks = ClaimLocks::new(dir.path().join(".locks"));

    let first = locks
        .try_acquire("12", &payload(json!({"sessionKey": "a"})))
        .await
        .unwrap();
    let second = locks
        .try_acquire("12", &payload(json!({"sessionKey": "b"})))
        .await
        .unwrap();

    let path = locks.path_for("12");
    assert_eq!(path, dir.path().join(".locks/workitem-12.lock"));
    assert_eq!(first, Acquire::Acquired(path.clone()));
    assert_eq!(second, Acquire::AlreadyLocked(path.clone()));
    assert_eq!(read_payload(&path).await.unwrap()["sessionKey"], "a");
}

#[tokio::test]
async fn merge_update_is_shallow_and_creates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let locks = ClaimLocks::new(dir.path());
    assert!(!lock_exists(&locks.path_for("5")).await);

    locks
        .merge_update("5", payload(json!({"sessionKey": "s", "status": "claimed"})))
        .await
        .unwrap();
    let merged = locks
        .merge_update("5", payload(json!({"status": "done", "branch": "feat/5"})))
        .await
        .unwrap();

    assert_eq!(merged["sessionKey"], "s");
    assert_eq!(merged["status"], "done");
    assert_eq!(merged["branch"], "feat/5");
    assert_eq!(read_payload(&locks.path_for("5")).await.unwrap(), merged);
}

#[tokio::test]
async fn merge_update_replaces_unreadable_payload() {
    let dir = tempfile::tempdir().unwrap();
    let locks = ClaimLocks::new(dir.path());
    std::fs::write(locks.path_for("9"), "not json").unwrap();

    let merged = locks
        .merge_update("9", payload(json!({"status": "done"})))
        .await
        .unwrap();
    assert_eq!(merged.len(), 1);
}

#[tokio::test]
async fn list_all_ignores_foreign_files_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    let locks = ClaimLocks::new(dir.path());
    for id in ["2", "10", "1a"] {
        locks
            .try_acquire(id, &payload(json!({"itemId": id})))
            .await
            .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
    std::fs::write(dir.path().join("workitem-3.lock.tmp.1.abc"), "{}").unwrap();
    std::fs::write(dir.path().join("workitem-4.lock"), "garbage").unwrap();

    let records = locks.list_all().await.unwrap();
    let ids: Vec<_> = records.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(ids, vec!["10", "1a", "2", "4"]);

    assert_eq!(records[0].field("itemId"), Some("10"));
    assert!(records[3].data.is_none());
    assert!(records.iter().all(|r| r.age_ms >= 0 && r.mtime_ms > 0));
}

#[tokio::test]
async fn list_all_on_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let locks = ClaimLocks::new(dir.path().join("never-created"));
    assert!(locks.list_all().await.unwrap().is_empty());
}
