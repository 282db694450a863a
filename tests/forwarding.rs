//! End-to-end forwarder and relocation behavior against a scripted
//! downstream server.

mod common;

use common::{png_fixture, scratch_dir, spawn_mock, spawn_silent_mock, tiny_policy};
use face_screening::artifact::{ArtifactStore, relocate_artifacts};
use face_screening::forward::{ForwardOutcome, Forwarder, StageTarget};
use serde_json::json;

fn forwarder_for(base_url: &str) -> Forwarder {
    Forwarder::new(StageTarget::new(base_url), "/process", tiny_policy()).unwrap()
}

#[tokio::test]
async fn test_success_consumes_one_attempt() {
    let mock = spawn_mock(|method, path| {
        assert_eq!(method, "POST");
        assert_eq!(path, "/process");
        (200, br#"{"status":"ok","faces":2}"#.to_vec())
    })
    .await;

    let outcome = forwarder_for(&mock.base_url).forward_bytes(png_fixture()).await;
    match outcome {
        ForwardOutcome::Success(payload) => {
            assert_eq!(payload["status"], "ok");
            assert_eq!(payload["faces"], 2);
        }
        ForwardOutcome::Failed { reason, .. } => panic!("unexpected failure: {reason}"),
    }
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_server_errors_retry_to_exhaustion() {
    let mock = spawn_mock(|_, _| (500, br#"{"detail":"boom"}"#.to_vec())).await;

    let outcome = forwarder_for(&mock.base_url).forward_bytes(png_fixture()).await;
    match outcome {
        ForwardOutcome::Failed { reason, attempts } => {
            assert_eq!(attempts, 3);
            assert!(reason.contains("500"), "reason was: {reason}");
        }
        ForwardOutcome::Success(_) => panic!("expected failure"),
    }
    assert_eq!(mock.hits(), 3);
}

#[tokio::test]
async fn test_non_500_status_is_terminal_on_first_attempt() {
    let mock = spawn_mock(|_, _| (404, br#"{"detail":"missing"}"#.to_vec())).await;

    let outcome = forwarder_for(&mock.base_url).forward_bytes(png_fixture()).await;
    match outcome {
        ForwardOutcome::Failed { reason, attempts } => {
            assert_eq!(attempts, 1);
            assert!(reason.contains("404"), "reason was: {reason}");
        }
        ForwardOutcome::Success(_) => panic!("expected failure"),
    }
    assert_eq!(mock.hits(), 1);
}

#[tokio::test]
async fn test_timeouts_retry_then_report() {
    let mock = spawn_silent_mock().await;

    let outcome = forwarder_for(&mock.base_url).forward_bytes(png_fixture()).await;
    match outcome {
        ForwardOutcome::Failed { reason, attempts } => {
            assert_eq!(attempts, 3);
            assert!(reason.contains("timed out"), "reason was: {reason}");
        }
        ForwardOutcome::Success(_) => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_relocation_rewrites_reference_and_persists_copy() {
    let mock = spawn_mock(|method, path| {
        assert_eq!(method, "GET");
        assert_eq!(path, "/annotated/remote.jpg");
        (200, b"fakejpegbytes".to_vec())
    })
    .await;

    let dir = scratch_dir();
    let store = ArtifactStore::new(&dir, "/annotated").unwrap();
    let mut payload = json!({
        "status": "success",
        "annotated_image_path": "/annotated/remote.jpg",
    });

    let client = reqwest::Client::new();
    let report = relocate_artifacts(&client, &mock.base_url, &mut payload, &store).await;
    assert_eq!(report.found, 1);
    assert_eq!(report.relocated, 1);
    assert!(report.fully_relocated());

    let new_path = payload["annotated_image_path"].as_str().unwrap();
    assert!(new_path.starts_with("/annotated/relocated_"));
    let on_disk = store.dir().join(new_path.rsplit('/').next().unwrap());
    assert_eq!(std::fs::read(&on_disk).unwrap(), b"fakejpegbytes");
    assert_eq!(mock.hits(), 1);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_failed_relocation_keeps_original_reference() {
    let mock = spawn_mock(|_, _| (404, b"gone".to_vec())).await;

    let dir = scratch_dir();
    let store = ArtifactStore::new(&dir, "/annotated").unwrap();
    let mut payload = json!({
        "age_analysis_data": {"annotated_image_url": "/annotated_age/a.jpg"},
    });

    let client = reqwest::Client::new();
    let report = relocate_artifacts(&client, &mock.base_url, &mut payload, &store).await;
    assert_eq!(report.found, 1);
    assert_eq!(report.relocated, 0);
    assert!(report.attempted());
    assert!(!report.fully_relocated());
    assert_eq!(
        payload["age_analysis_data"]["annotated_image_url"],
        "/annotated_age/a.jpg"
    );

    std::fs::remove_dir_all(&dir).unwrap();
}
