//! Update check and changelog tests
mod common;

use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{config_for, descriptor_json, drain, harness, mount_descriptor, CHANGELOG_PATH, DESCRIPTOR_PATH};
use opp_updater::manager::{CHANGELOG_FAILED, CHANGELOG_UNAVAILABLE};
use opp_updater::{CheckOutcome, UpdateError, UpdateEvent, UpdateState};

// ============================================================================
// Version Decision Tests
// ============================================================================

#[tokio::test]
async fn test_newer_version_is_available() {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor_json(&server, "2.0.0", None)).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));
    let mut events = h.manager.subscribe();

    let outcome = h.manager.check_for_updates().await;

    assert!(outcome.is_update_available());
    match outcome {
        CheckOutcome::UpdateAvailable(d) => assert_eq!(d.version, "2.0.0"),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(h.manager.state(), UpdateState::UpdateAvailable);
    assert_eq!(h.manager.available_update().unwrap().version, "2.0.0");
    assert!(!h.manager.is_checking());

    assert_eq!(
        drain(&mut events),
        vec![
            UpdateEvent::CheckingChanged(true),
            UpdateEvent::StatusChanged(UpdateState::Checking),
            UpdateEvent::StatusChanged(UpdateState::UpdateAvailable),
            UpdateEvent::CheckingChanged(false),
        ]
    );
}

#[tokio::test]
async fn test_equal_version_is_no_update() {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor_json(&server, "1.5.0", None)).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    let outcome = h.manager.check_for_updates().await;

    assert!(matches!(outcome, CheckOutcome::NoUpdate));
    assert!(!outcome.is_update_available());
    assert_eq!(h.manager.state(), UpdateState::NoUpdate);
    assert!(h.manager.available_update().is_none());
}

#[tokio::test]
async fn test_older_remote_is_no_update() {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor_json(&server, "1.4.9", None)).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    assert!(matches!(h.manager.check_for_updates().await, CheckOutcome::NoUpdate));
}

#[tokio::test]
async fn test_shorter_version_compares_numerically() {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor_json(&server, "1.10", None)).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    assert!(h.manager.check_for_updates().await.is_update_available());
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_missing_version_fails_check() {
    let server = MockServer::start().await;
    mount_descriptor(&server, r#"{"DownloadUrl": "http://example.com/x.exe"}"#.to_string()).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    let outcome = h.manager.check_for_updates().await;

    assert!(matches!(outcome, CheckOutcome::Failed(UpdateError::Parse(_))));
    assert!(matches!(h.manager.state(), UpdateState::Error(_)));
    assert!(h.manager.session().last_error.is_some());
}

#[tokio::test]
async fn test_malformed_version_never_triggers_update() {
    let server = MockServer::start().await;
    mount_descriptor(&server, r#"{"Version": "two"}"#.to_string()).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    let outcome = h.manager.check_for_updates().await;
    assert!(matches!(outcome, CheckOutcome::Failed(UpdateError::InvalidVersionFormat(_))));
}

#[tokio::test]
async fn test_http_error_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));
    let mut events = h.manager.subscribe();

    let outcome = h.manager.check_for_updates().await;

    assert!(matches!(outcome, CheckOutcome::Failed(UpdateError::Network(_))));
    let events = drain(&mut events);
    let error_message = events.iter().find_map(|e| match e {
        UpdateEvent::StatusChanged(UpdateState::Error(msg)) => Some(msg.clone()),
        _ => None,
    });
    assert!(error_message.unwrap().contains("404"));
}

#[tokio::test]
async fn test_timeout_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(200)
            .set_body_string(descriptor_json(&server, "2.0.0", None))
            .set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = config_for(&server, dir.path());
    config.timeout = Duration::from_millis(200);
    let h = harness(&config);

    let outcome = h.manager.check_for_updates().await;
    assert!(matches!(outcome, CheckOutcome::Failed(UpdateError::Network(_))));
}

#[tokio::test]
async fn test_failed_check_keeps_previous_descriptor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(descriptor_json(&server, "2.0.0", None)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    assert!(h.manager.check_for_updates().await.is_update_available());
    assert!(matches!(h.manager.check_for_updates().await, CheckOutcome::Failed(_)));

    let session = h.manager.session();
    assert!(matches!(session.state, UpdateState::Error(_)));
    assert_eq!(session.descriptor.unwrap().version, "2.0.0");
}

#[tokio::test]
async fn test_error_resets_to_idle_on_next_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_descriptor(&server, descriptor_json(&server, "1.5.0", None)).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    assert!(matches!(h.manager.check_for_updates().await, CheckOutcome::Failed(_)));

    let mut events = h.manager.subscribe();
    assert!(matches!(h.manager.check_for_updates().await, CheckOutcome::NoUpdate));

    let statuses: Vec<UpdateState> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            UpdateEvent::StatusChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![UpdateState::Idle, UpdateState::Checking, UpdateState::NoUpdate]);
}

// ============================================================================
// Re-entrancy Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_check_is_busy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(200)
            .set_body_string(descriptor_json(&server, "2.0.0", None))
            .set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    let (first, second) = tokio::join!(h.manager.check_for_updates(), async {
        assert!(h.manager.is_checking());
        h.manager.check_for_updates().await
    });

    assert!(first.is_update_available());
    assert!(matches!(second, CheckOutcome::Busy));
    assert!(!h.manager.is_checking());

    // Only one descriptor request reached the server
    server.verify().await;
}

#[tokio::test]
async fn test_cancel_does_not_disable_later_checks() {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor_json(&server, "2.0.0", None)).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    h.manager.cancel();
    assert!(h.manager.check_for_updates().await.is_update_available());

    h.manager.cancel();
    assert!(h.manager.check_for_updates().await.is_update_available());
    assert_eq!(h.manager.state(), UpdateState::UpdateAvailable);
}

#[tokio::test]
async fn test_cancel_stops_in_flight_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(200)
            .set_body_string(descriptor_json(&server, "2.0.0", None))
            .set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    let (outcome, _) = tokio::join!(h.manager.check_for_updates(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.manager.cancel();
    });

    assert!(matches!(outcome, CheckOutcome::Failed(UpdateError::Cancelled)));
    assert!(matches!(h.manager.state(), UpdateState::Error(_)));
    assert!(!h.manager.is_checking());
}

// ============================================================================
// Changelog Tests
// ============================================================================

#[tokio::test]
async fn test_changelog_download() {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor_json(&server, "2.0.0", None)).await;
    Mock::given(method("GET"))
        .and(path(CHANGELOG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("## 2.0.0\n- Faster cleanup\n"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    assert!(h.manager.check_for_updates().await.is_update_available());
    let changelog = h.manager.download_changelog().await;

    assert!(changelog.contains("Faster cleanup"));
    assert_eq!(h.manager.session().changelog.as_deref(), Some(changelog.as_str()));
    assert_eq!(h.manager.state(), UpdateState::UpdateAvailable);
}

#[tokio::test]
async fn test_changelog_failure_yields_placeholder() {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor_json(&server, "2.0.0", None)).await;
    Mock::given(method("GET"))
        .and(path(CHANGELOG_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    h.manager.check_for_updates().await;
    assert_eq!(h.manager.download_changelog().await, CHANGELOG_FAILED);
    assert_eq!(h.manager.state(), UpdateState::UpdateAvailable);
}

#[tokio::test]
async fn test_changelog_without_url() {
    let server = MockServer::start().await;
    mount_descriptor(&server, r#"{"Version": "2.0.0"}"#.to_string()).await;

    let dir = TempDir::new().unwrap();
    let h = harness(&config_for(&server, dir.path()));

    h.manager.check_for_updates().await;
    assert_eq!(h.manager.download_changelog().await, CHANGELOG_UNAVAILABLE);
}
