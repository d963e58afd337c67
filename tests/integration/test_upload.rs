//! Integration tests for the three-phase upload protocol.
//!
//! Drives `UploadOrchestrator` against the test-double storage and control
//! plane: the happy path, partial-transfer resume, expiry-forced re-init, and
//! server-side integrity rejection with re-transfer.

mod support;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trove_api::{ApiClient, FileRole, ImageKind, MemoryTokenStore, TokenPair, TokenStore};
use trove_publish::{
    FileDescriptor, ImageDescriptor, PublishError, UploadEvent, UploadOrchestrator, UploadPlan,
    UploadState,
};

use support::spawn_server;

const MODEL_BYTES: &[u8] = b"model bytes for upload";
const THUMB_BYTES: &[u8] = b"thumbnail pixels";

async fn write_artifacts(name: &str) -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(format!("trove-it-upload-{}-{name}", std::process::id()));
    tokio::fs::create_dir_all(&dir).await.expect("create dir");
    let model = dir.join("model.usdz");
    let thumb = dir.join("thumb.jpg");
    tokio::fs::write(&model, MODEL_BYTES).await.expect("write model");
    tokio::fs::write(&thumb, THUMB_BYTES).await.expect("write thumb");
    (model, thumb)
}

async fn plan_for(name: &str) -> UploadPlan {
    let (model, thumb) = write_artifacts(name).await;
    UploadPlan {
        dims_source: "reconstruction".to_string(),
        dimensions: None,
        files: vec![FileDescriptor::from_path(FileRole::ModelUsdz, model)
            .await
            .expect("model descriptor")],
        images: vec![
            ImageDescriptor::from_path(ImageKind::Thumbnail, 0, thumb)
                .await
                .expect("thumb descriptor"),
        ],
    }
}

fn orchestrator(base_url: &str) -> UploadOrchestrator {
    let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
        "access-1", "refresh-1",
    )));
    UploadOrchestrator::new(Arc::new(ApiClient::new(
        base_url,
        store as Arc<dyn TokenStore>,
    )))
}

#[tokio::test]
async fn test_happy_path_transfers_and_verifies_everything() {
    let server = spawn_server().await;
    let uploader = orchestrator(&server.base_url);
    let plan = plan_for("happy").await;
    let mut state = UploadState::default();

    let asset_id = uploader
        .run(&plan, &mut state, &|_event| {})
        .await
        .expect("upload should succeed");

    assert_eq!(asset_id, "asset-1");
    assert_eq!(
        server.state.stored_object(&asset_id, "MODEL_USDZ").as_deref(),
        Some(MODEL_BYTES)
    );
    assert_eq!(
        server.state.stored_object(&asset_id, "THUMBNAIL-0").as_deref(),
        Some(THUMB_BYTES)
    );
    assert_eq!(server.state.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.state.complete_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transfer_failure_resumes_without_reinit() {
    let server = spawn_server().await;
    // The first PUT (the model file) fails with a 500.
    server.state.fail_puts.store(1, Ordering::SeqCst);

    let uploader = orchestrator(&server.base_url);
    let plan = plan_for("resume").await;
    let mut state = UploadState::default();

    let events: Arc<Mutex<Vec<UploadEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink = move |event: UploadEvent| sink_events.lock().expect("events lock").push(event);

    let err = uploader.run(&plan, &mut state, &sink).await.unwrap_err();
    assert!(matches!(err, PublishError::ServerRejected { status: 500, .. }));

    // The asset was allocated before the transfer failed, and completion was
    // never attempted.
    assert_eq!(state.asset_id(), Some("asset-1"));
    assert!(events
        .lock()
        .expect("events lock")
        .iter()
        .any(|e| matches!(e, UploadEvent::AssetAllocated { asset_id } if asset_id == "asset-1")));
    assert_eq!(server.state.complete_calls.load(Ordering::SeqCst), 0);

    // The retry reuses the transaction: no second init, same asset.
    let asset_id = uploader
        .run(&plan, &mut state, &sink)
        .await
        .expect("retry should succeed");
    assert_eq!(asset_id, "asset-1");
    assert_eq!(server.state.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.state.complete_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_expired_pending_targets_force_a_fresh_transaction() {
    let server = spawn_server().await;
    server.state.target_ttl_ms.store(200, Ordering::SeqCst);
    server.state.fail_puts.store(1, Ordering::SeqCst);

    let uploader = orchestrator(&server.base_url);
    let plan = plan_for("expiry").await;
    let mut state = UploadState::default();

    uploader
        .run(&plan, &mut state, &|_event| {})
        .await
        .unwrap_err();
    assert_eq!(state.asset_id(), Some("asset-1"));

    // Let the first transaction's targets lapse before retrying.
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.state.target_ttl_ms.store(3_600_000, Ordering::SeqCst);

    let asset_id = uploader
        .run(&plan, &mut state, &|_event| {})
        .await
        .expect("retry should succeed on a fresh transaction");
    assert_eq!(asset_id, "asset-2");
    assert_eq!(server.state.init_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_integrity_mismatch_clears_and_retransfers_failed_roles() {
    let server = spawn_server().await;
    // The stored model bytes are corrupted once, so the server's checksum
    // disagrees with the declared one.
    *server.state.corrupt_slot_once.lock().expect("corrupt lock") =
        Some("MODEL_USDZ".to_string());

    let uploader = orchestrator(&server.base_url);
    let plan = plan_for("integrity").await;
    let mut state = UploadState::default();

    let err = uploader
        .run(&plan, &mut state, &|_event| {})
        .await
        .unwrap_err();
    match err {
        PublishError::IntegrityMismatch { roles } => {
            assert_eq!(roles, vec!["MODEL_USDZ".to_string()]);
        }
        other => panic!("expected IntegrityMismatch, got {other:?}"),
    }
    assert_eq!(server.state.complete_calls.load(Ordering::SeqCst), 1);

    // The retry re-transfers only the failed role, then verifies cleanly
    // under a fresh completion key.
    let asset_id = uploader
        .run(&plan, &mut state, &|_event| {})
        .await
        .expect("re-transfer should succeed");
    assert_eq!(asset_id, "asset-1");
    assert_eq!(
        server.state.stored_object(&asset_id, "MODEL_USDZ").as_deref(),
        Some(MODEL_BYTES)
    );
    assert_eq!(server.state.init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.state.complete_calls.load(Ordering::SeqCst), 2);
}
