//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Monitors round-trip through SQLite with their kind configuration
//! - Measurements and certificates are persisted together
//! - Queries return the newest measurements first
//! - Deleting a monitor removes its history
//! - Data survives reopening the database

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use upwatch::{
    actors::DistributorHandle,
    measurement::{Certificate, State, StateHint},
    monitor::{IcmpConfig, MonitorKind, ScriptConfig},
    storage::{StorageBackend, StorageError, sqlite::SqliteBackend},
};

use crate::helpers::{CountingProbe, finalized, http_monitor, next_frame, subscribe, tcp_monitor};

fn certificate() -> Certificate {
    Certificate {
        serial: "0a:1b:2c".to_string(),
        public_key_algorithm: "EC".to_string(),
        issuer: Some("Test CA".to_string()),
        subject: Some("example.com".to_string()),
        not_before: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        not_after: Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn test_monitor_round_trip() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::new(temp_dir.path().join("upwatch.db"))
        .await
        .unwrap();

    let mut monitor = http_monitor(None, "https://example.com/health");
    monitor.event_hook = Some(ScriptConfig {
        path: "/usr/local/bin/notify".to_string(),
        args: vec!["{{monitor.name}}".to_string()],
    });
    let http_id = backend.insert_monitor(&monitor).await.unwrap();

    let icmp = upwatch::monitor::Monitor {
        id: None,
        name: "gateway".to_string(),
        active: false,
        interval: 15,
        timeout: 3,
        kind: MonitorKind::Icmp(IcmpConfig {
            address: "10.0.0.1".to_string(),
            packet_size: 56,
            count: 5,
            ttl: 64,
            wait: 500,
        }),
        event_hook: None,
    };
    let icmp_id = backend.insert_monitor(&icmp).await.unwrap();

    let stored = backend.select_monitor(http_id).await.unwrap().unwrap();
    monitor.id = Some(http_id);
    assert_eq!(stored, monitor);

    let all = backend.select_monitors().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[1].id, Some(icmp_id));
    assert!(!all[1].active);
    assert_matches!(&all[1].kind, MonitorKind::Icmp(config) if config.count == 5);

    // already persisted monitors cannot be inserted again
    assert_matches!(
        backend.insert_monitor(&stored).await,
        Err(StorageError::AlreadyPersisted(id)) if id == http_id
    );
}

#[tokio::test]
async fn test_update_and_delete_monitor() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::new(temp_dir.path().join("upwatch.db"))
        .await
        .unwrap();

    let id = backend.insert_monitor(&tcp_monitor(None, 22)).await.unwrap();
    backend
        .insert_measurement(&finalized(id, State::Ok))
        .await
        .unwrap();

    let mut monitor = backend.select_monitor(id).await.unwrap().unwrap();
    monitor.name = "ssh".to_string();
    monitor.interval = 120;
    backend.update_monitor(&monitor).await.unwrap();

    let updated = backend.select_monitor(id).await.unwrap().unwrap();
    assert_eq!(updated.name, "ssh");
    assert_eq!(updated.interval, 120);

    backend.delete_monitor(id).await.unwrap();
    assert!(backend.select_monitor(id).await.unwrap().is_none());
    assert!(backend.select_measurements(id, 10).await.unwrap().is_empty());

    assert_matches!(
        backend.delete_monitor(id).await,
        Err(StorageError::MonitorNotFound(_))
    );
    assert_matches!(
        backend.update_monitor(&monitor).await,
        Err(StorageError::MonitorNotFound(_))
    );
}

#[tokio::test]
async fn test_measurement_with_certificates() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::new(temp_dir.path().join("upwatch.db"))
        .await
        .unwrap();
    let monitor_id = backend
        .insert_monitor(&http_monitor(None, "https://example.com"))
        .await
        .unwrap();

    let mut measurement = finalized(monitor_id, State::Ok);
    measurement.downgrade_with_hint(State::Warn, StateHint::CertificateExpiring);
    measurement.http_status_code = Some(200);
    measurement.http_headers = Some(BTreeMap::from([(
        "content-type".to_string(),
        "text/html".to_string(),
    )]));
    measurement.http_body = Some("<html></html>".to_string());
    measurement.certificates.push(certificate());

    let id = backend.insert_measurement(&measurement).await.unwrap();

    let history = backend.select_measurements(monitor_id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    let stored = &history[0];
    assert_eq!(stored.id, Some(id));
    assert_eq!(stored.state(), State::Warn);
    assert_eq!(stored.state_hint(), Some(StateHint::CertificateExpiring));
    assert_eq!(stored.duration(), measurement.duration());
    assert_eq!(stored.http_headers, measurement.http_headers);
    assert_eq!(stored.http_body.as_deref(), Some("<html></html>"));
    assert_eq!(
        stored.recorded_at.timestamp_millis(),
        measurement.recorded_at.timestamp_millis()
    );
    assert!(stored.certificates.is_empty());

    let certificates = backend.select_certificates(id).await.unwrap();
    assert_eq!(certificates, vec![certificate()]);
}

#[tokio::test]
async fn test_measurements_newest_first_with_limit() {
    let temp_dir = tempdir().unwrap();
    let backend = SqliteBackend::new(temp_dir.path().join("upwatch.db"))
        .await
        .unwrap();
    let monitor_id = backend.insert_monitor(&tcp_monitor(None, 22)).await.unwrap();

    let base = Utc::now();
    for (offset, state) in [State::Ok, State::Warn, State::Dead].into_iter().enumerate() {
        let mut measurement = finalized(monitor_id, state);
        measurement.recorded_at = base + chrono::Duration::seconds(offset as i64);
        backend.insert_measurement(&measurement).await.unwrap();
    }

    let latest = backend.select_measurements(monitor_id, 2).await.unwrap();
    let states: Vec<State> = latest.iter().map(|m| m.state()).collect();
    assert_eq!(states, vec![State::Dead, State::Warn]);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("upwatch.db");

    let monitor_id = {
        let backend = SqliteBackend::new(&db_path).await.unwrap();
        let id = backend.insert_monitor(&tcp_monitor(None, 5432)).await.unwrap();
        backend
            .insert_measurement(&finalized(id, State::Dead))
            .await
            .unwrap();
        backend.close().await.unwrap();
        id
    };

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    let monitor = backend.select_monitor(monitor_id).await.unwrap().unwrap();
    assert_eq!(monitor.target(), "127.0.0.1:5432");
    let history = backend.select_measurements(monitor_id, 10).await.unwrap();
    assert_eq!(history[0].state(), State::Dead);
}

#[tokio::test]
async fn test_distributor_persists_to_sqlite() {
    let temp_dir = tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(
        SqliteBackend::new(temp_dir.path().join("upwatch.db"))
            .await
            .unwrap(),
    );
    let id = backend.insert_monitor(&tcp_monitor(None, 22)).await.unwrap();

    let distributor = DistributorHandle::spawn(CountingProbe::new(State::Warn), backend.clone());
    let mut peer = subscribe(&distributor).await;

    distributor.poll_now(id).await.unwrap();
    let frame = next_frame(&mut peer, Duration::from_secs(2)).await;

    let history = backend.select_measurements(id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(frame["id"], history[0].id.unwrap());
    assert_eq!(history[0].state(), State::Warn);

    distributor.shutdown().await.unwrap();
}
