//! Marker-file gate behaviour.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use workq::config::GateConfig;
use workq::error::Error;
use workq::gate::{FileGate, Gate};

fn gate(wait_ms: u64, stale_ms: u64) -> FileGate {
    FileGate::new(GateConfig {
        wait: Duration::from_millis(wait_ms),
        stale: Duration::from_millis(stale_ms),
        poll: Duration::from_millis(5),
    })
}

#[tokio::test]
async fn runs_body_and_releases_marker() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("state.json");
    let marker = FileGate::marker_path(&resource);
    assert_eq!(marker, dir.path().join("state.json.mutex"));

    let marker_ref = &marker;
    let value = gate(1_000, 30_000)
        .with_exclusive_access(&resource, || async move {
            assert!(marker_ref.exists(), "marker must exist while body runs");
            let holder: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(marker_ref).unwrap()).unwrap();
            assert_eq!(holder["pid"], std::process::id());
            Ok(42)
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert!(!marker.exists());
}

#[tokio::test]
async fn releases_marker_when_body_fails() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("state.json");

    let result: workq::error::Result<()> = gate(1_000, 30_000)
        .with_exclusive_access(&resource, || async { Err(Error::Other("boom".into())) })
        .await;

    assert!(result.is_err());
    assert!(!FileGate::marker_path(&resource).exists());
}

#[tokio::test]
async fn releases_marker_when_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("state.json");
    let g = gate(1_000, 30_000);

    let held = g.with_exclusive_access(&resource, || async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(50), held).await;

    assert!(timed_out.is_err());
    assert!(!FileGate::marker_path(&resource).exists());
}

#[tokio::test]
async fn times_out_on_fresh_marker() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("state.json");
    let marker = FileGate::marker_path(&resource);
    std::fs::write(&marker, "{}").unwrap();

    let started = Instant::now();
    let err = gate(100, 60_000)
        .with_exclusive_access(&resource, || async { Ok(()) })
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(100));
    match &err {
        Error::LockTimeout { resource: r, .. } => assert_eq!(r, &resource),
        other => panic!("expected LockTimeout, got {other:?}"),
    }
    assert_eq!(err.code(), "E_STATE_LOCK_TIMEOUT");
    assert!(err.details().contains_key("waitMs"));
    // Someone else's marker is left alone.
    assert!(marker.exists());
}

#[tokio::test]
async fn takes_over_stale_marker() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("state.json");
    let marker = FileGate::marker_path(&resource);
    std::fs::write(&marker, "{\"pid\": 1}").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let ran = gate(2_000, 50)
        .with_exclusive_access(&resource, || async { Ok(true) })
        .await
        .unwrap();

    assert!(ran);
    assert!(!marker.exists());
}

#[tokio::test]
async fn bodies_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("state.json");
    let g = gate(5_000, 30_000);
    let inside = AtomicUsize::new(0);
    let max_inside = AtomicUsize::new(0);

    let (inside, max_inside) = (&inside, &max_inside);
    let body = || async move {
        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
        max_inside.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        inside.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    };

    let (a, b, c) = tokio::join!(
        g.with_exclusive_access(&resource, body),
        g.with_exclusive_access(&resource, body),
        g.with_exclusive_access(&resource, body),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn creates_missing_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let resource = dir.path().join("nested/deeper/state.json");

    gate(1_000, 30_000)
        .with_exclusive_access(&resource, || async { Ok(()) })
        .await
        .unwrap();
    assert!(dir.path().join("nested/deeper").is_dir());
}
