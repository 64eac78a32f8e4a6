//! State document persistence.

use serde_json::json;
use tempfile::TempDir;
use workq::error::Error;
use workq::model::{Claim, ClaimStatus, STATE_VERSION, StateDocument};
use workq::storage::StateStore;

fn test_store() -> (TempDir, StateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join(".workq/state.json"));
    (dir, store)
}

#[tokio::test]
async fn missing_file_loads_empty_document() {
    let (_dir, store) = test_store();
    let doc = store.load().await.unwrap();
    assert_eq!(doc.version, STATE_VERSION);
    assert!(doc.claims.is_empty());
    assert!(doc.backlog.items.is_empty());
    assert_eq!(doc.created_at_ms, doc.updated_at_ms);
    // Loading never creates the file.
    assert!(!store.path().exists());
}

#[tokio::test]
async fn persist_then_load() {
    let (_dir, store) = test_store();
    let mut doc = StateDocument::new(1_000);
    doc.claims.insert(
        "7".to_string(),
        Claim {
            item_id: "7".to_string(),
            session_key: Some("s1".to_string()),
            status: Some(ClaimStatus::Claimed),
            claimed_at_ms: Some(1_000),
            lease_ms: Some(60_000),
            ..Default::default()
        },
    );
    store.persist(&doc).await.unwrap();

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded, doc);
}

#[tokio::test]
async fn corrupt_json_is_a_parse_error() {
    let (_dir, store) = test_store();
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(store.path(), "{\"version\": 1, \"claims\": {").unwrap();

    let err = store.load().await.unwrap_err();
    assert!(matches!(err, Error::StateParse { .. }), "got {err:?}");
    assert_eq!(err.code(), "E_STATE_PARSE");
    assert_eq!(err.details()["statePath"], json!(store.path()));
}

#[tokio::test]
async fn non_object_root_is_a_shape_error() {
    let (_dir, store) = test_store();
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(store.path(), "[1, 2, 3]").unwrap();

    let err = store.load().await.unwrap_err();
    assert_eq!(err.code(), "E_STATE_SHAPE");
}

#[tokio::test]
async fn drifted_sections_are_reset() {
    let (_dir, store) = test_store();
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(
        store.path(),
        r#"{"version": 1, "createdAtMs": 5, "updatedAtMs": 6, "backlog": "oops", "claims": []}"#,
    )
    .unwrap();

    let doc = store.load().await.unwrap();
    assert!(doc.backlog.items.is_empty());
    assert!(doc.claims.is_empty());
    assert_eq!(doc.created_at_ms, 5);
    assert_eq!(doc.updated_at_ms, 6);
}

#[tokio::test]
async fn claim_without_item_id_takes_its_key() {
    let (_dir, store) = test_store();
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(
        store.path(),
        r#"{"claims": {"12a": {"sessionKey": "s", "status": "claimed"}}}"#,
    )
    .unwrap();

    let doc = store.load().await.unwrap();
    let claim = &doc.claims["12a"];
    assert_eq!(claim.item_id, "12a");
    assert_eq!(claim.status, Some(ClaimStatus::Claimed));
    assert_eq!(doc.version, STATE_VERSION);
}

#[tokio::test]
async fn unknown_fields_survive_a_rewrite() {
    let (_dir, store) = test_store();
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(
        store.path(),
        r#"{
            "version": 1, "createdAtMs": 1, "updatedAtMs": 2,
            "owner": "ops-team",
            "backlog": {"sourceFile": "/tmp/BACKLOG.md", "items": []},
            "claims": {"3": {"itemId": "3", "status": "in_review", "reviewer": "kim"}}
        }"#,
    )
    .unwrap();

    let doc = store.load().await.unwrap();
    assert_eq!(doc.backlog.file.as_deref(), Some(std::path::Path::new("/tmp/BACKLOG.md")));
    assert_eq!(
        doc.claims["3"].status,
        Some(ClaimStatus::Custom("in_review".to_string()))
    );
    store.persist(&doc).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(raw["owner"], "ops-team");
    assert_eq!(raw["claims"]["3"]["reviewer"], "kim");
    assert_eq!(raw["claims"]["3"]["status"], "in_review");
}

#[tokio::test]
async fn leftover_temp_file_does_not_affect_load() {
    let (dir, store) = test_store();
    let doc = StateDocument::new(42);
    store.persist(&doc).await.unwrap();

    // A writer that died between creating its temp file and renaming it.
    let partial = dir.path().join(".workq/state.json.tmp.999.dead");
    std::fs::write(&partial, "{\"version\": 1, \"cla").unwrap();

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded, doc);
}

#[tokio::test]
async fn persist_leaves_no_temp_files() {
    let (dir, store) = test_store();
    store.persist(&StateDocument::new(1)).await.unwrap();
    store.persist(&StateDocument::new(2)).await.unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path().join(".workq"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["state.json".to_string()]);
}

#[test]
fn touch_never_moves_backwards() {
    let mut doc = StateDocument::new(1_000);
    assert_eq!(doc.touch(2_000), 2_000);
    assert_eq!(doc.touch(1_500), 2_000);
    assert_eq!(doc.updated_at_ms, 2_000);
}

#[test]
fn terminal_claims_are_not_active() {
    let mut doc = StateDocument::new(0);
    for (id, status) in [("1", "claimed"), ("2", "pr_opened"), ("3", "Done")] {
        doc.claims.insert(
            id.to_string(),
            Claim {
                item_id: id.to_string(),
                status: Some(ClaimStatus::from(status)),
                ..Default::default()
            },
        );
    }
    assert!(doc.active_claim("1").is_some());
    assert!(doc.active_claim("2").is_none());
    assert!(doc.active_claim("3").is_none());
    assert!(doc.active_claim("4").is_none());
}

// ---------------------------------------------------------------------------
// Entry-level drift
// ---------------------------------------------------------------------------

async fn load_raw(raw: &str) -> StateDocument {
    let (_dir, store) = test_store();
    std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
    std::fs::write(store.path(), raw).unwrap();
    store.load().await.unwrap()
}

#[tokio::test]
async fn numeric_strings_in_claims_are_coerced() {
    let doc = load_raw(
        r#"{"claims": {"9": {"itemId": "9", "status": "claimed", "leaseMs": "7200000",
            "claimedAtMs": 1, "heartbeatAtMs": 2.0, "prNumber": " 17 "}}}"#,
    )
    .await;

    let claim = &doc.claims["9"];
    assert_eq!(claim.lease_ms, Some(7_200_000));
    assert_eq!(claim.claimed_at_ms, Some(1));
    assert_eq!(claim.heartbeat_at_ms, Some(2));
    assert_eq!(claim.pr_number, Some(17));
    assert_eq!(claim.status, Some(ClaimStatus::Claimed));
}

#[tokio::test]
async fn non_object_claims_are_dropped() {
    let doc = load_raw(
        r#"{"claims": {"9": null, "10": "claimed", "11": [1], "12": {"status": "claimed"}}}"#,
    )
    .await;

    assert_eq!(doc.claims.len(), 1);
    assert_eq!(doc.claims["12"].item_id, "12");
}

#[tokio::test]
async fn mistyped_claim_fields_are_removed() {
    let doc = load_raw(
        r#"{"claims": {"3": {"itemId": 3, "status": 5, "sessionKey": {"x": 1},
            "leaseMs": "soon", "heartbeatAtMs": true, "prNumber": -4,
            "branch": ["main"], "label": "keep-me", "reviewer": "kim"}}}"#,
    )
    .await;

    let claim = &doc.claims["3"];
    assert_eq!(claim.item_id, "3");
    assert_eq!(claim.status, None);
    assert_eq!(claim.session_key, None);
    assert_eq!(claim.lease_ms, None);
    assert_eq!(claim.heartbeat_at_ms, None);
    assert_eq!(claim.pr_number, None);
    assert_eq!(claim.branch, None);
    assert_eq!(claim.label.as_deref(), Some("keep-me"));
    assert_eq!(claim.extra["reviewer"], "kim");
}

#[tokio::test]
async fn blank_claim_status_is_treated_as_absent() {
    let doc = load_raw(r#"{"claims": {"4": {"status": "  "}}}"#).await;
    assert_eq!(doc.claims["4"].status, None);
}

#[tokio::test]
async fn malformed_backlog_items_are_dropped() {
    let doc = load_raw(
        r#"{"backlog": {"file": 7, "syncedAtMs": "12", "items": [
            null,
            3,
            {"itemId": "1", "workLine": "1. First [zsc]", "eligible": true},
            {"itemId": "2", "eligible": "yes"},
            {"workLine": "no id"}
        ]}}"#,
    )
    .await;

    assert_eq!(doc.backlog.file, None);
    assert_eq!(doc.backlog.synced_at_ms, Some(12));
    let ids: Vec<_> = doc.backlog.items.iter().map(|it| it.item_id.as_str()).collect();
    assert_eq!(ids, vec!["1"]);
}

#[tokio::test]
async fn old_and_new_backlog_file_keys_do_not_clash() {
    let doc = load_raw(
        r#"{"backlog": {"file": "/new/BACKLOG.md", "sourceFile": "/old/BACKLOG.md", "items": []}}"#,
    )
    .await;
    assert_eq!(
        doc.backlog.file.as_deref(),
        Some(std::path::Path::new("/new/BACKLOG.md"))
    );
}

#[tokio::test]
async fn mistyped_document_stamps_are_replaced() {
    let doc = load_raw(r#"{"version": -1, "createdAtMs": "15", "updatedAtMs": "later"}"#).await;
    assert_eq!(doc.version, STATE_VERSION);
    assert_eq!(doc.created_at_ms, 15);
    assert!(doc.updated_at_ms > 15);
}
