//! End-to-end tests with the real probes behind the distributor
//!
//! These tests verify that:
//! - A TCP monitor against a closed port reports Dead
//! - An HTTP monitor against a healthy endpoint reports Ok with its status
//! - Status codes outside the accepted range report Dead

use std::sync::Arc;
use std::time::Duration;

use upwatch::{actors::DistributorHandle, probe::Prober, storage::StorageBackend};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{
    RecordingStorage, closed_port, http_monitor, next_frame, subscribe, tcp_monitor,
};

fn spawn(storage: Arc<RecordingStorage>) -> DistributorHandle {
    DistributorHandle::spawn(Arc::new(Prober::new().unwrap()), storage)
}

#[tokio::test]
async fn test_tcp_closed_port_is_dead() {
    let storage = RecordingStorage::new();
    let distributor = spawn(storage.clone());
    let mut peer = subscribe(&distributor).await;

    let port = closed_port().await;
    let id = storage.insert_monitor(&tcp_monitor(None, port)).await.unwrap();
    let monitor = storage.select_monitor(id).await.unwrap().unwrap();
    distributor.start(monitor).await.unwrap();

    let frame = next_frame(&mut peer, Duration::from_secs(3)).await;
    assert_eq!(frame["monitor_id"], id);
    assert_eq!(frame["state"], "dead");
    assert_eq!(frame["state_hint"], "connection_failed");

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_ok_in_range() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;

    let storage = RecordingStorage::new();
    let distributor = spawn(storage.clone());
    let mut peer = subscribe(&distributor).await;

    let url = format!("{}/health", server.uri());
    let id = storage.insert_monitor(&http_monitor(None, &url)).await.unwrap();
    let monitor = storage.select_monitor(id).await.unwrap().unwrap();
    distributor.start(monitor).await.unwrap();

    let frame = next_frame(&mut peer, Duration::from_secs(3)).await;
    assert_eq!(frame["state"], "ok");
    assert_eq!(frame["http_status_code"], 200);
    assert_eq!(frame["http_body"], "fine");
    assert!(frame.get("state_hint").is_none());

    // the persisted copy matches what was streamed
    let stored = storage.select_measurements(id, 1).await.unwrap();
    assert_eq!(stored[0].http_status_code, Some(200));
    assert_eq!(frame["id"], stored[0].id.unwrap());

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_status_out_of_range_is_dead() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let storage = RecordingStorage::new();
    let distributor = spawn(storage.clone());
    let mut peer = subscribe(&distributor).await;

    let id = storage
        .insert_monitor(&http_monitor(None, &server.uri()))
        .await
        .unwrap();
    distributor.poll_now(id).await.unwrap();

    let frame = next_frame(&mut peer, Duration::from_secs(3)).await;
    assert_eq!(frame["state"], "dead");
    assert_eq!(frame["state_hint"], "status_mismatch");
    assert_eq!(frame["http_status_code"], 503);

    distributor.shutdown().await.unwrap();
}
