//! Integration tests for the distributor pipeline
//!
//! These tests verify that:
//! - Start and Stop are idempotent
//! - Measurements are persisted once and fanned out to every subscriber
//! - Stopped monitors produce no further measurements
//! - PollNow on a monitor that is not running polls once without scheduling it

use std::time::Duration;

use pretty_assertions::assert_eq;
use upwatch::{actors::DistributorHandle, measurement::State, storage::StorageBackend};

use crate::helpers::{
    CountingProbe, RecordingStorage, finalized, next_frame, subscribe, tcp_monitor,
    wait_for_snapshot,
};

#[tokio::test]
async fn test_start_is_idempotent() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();
    let distributor = DistributorHandle::spawn(probe.clone(), storage.clone());

    let monitor = tcp_monitor(Some(7), 22);
    distributor.start(monitor.clone()).await.unwrap();
    distributor.start(monitor.clone()).await.unwrap();
    distributor.start(monitor).await.unwrap();

    let snapshot = distributor.snapshot().await.unwrap();
    assert_eq!(snapshot.monitors, vec![7]);

    // only one poller is probing
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(probe.calls(), 1);

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_unknown_monitor_is_noop() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();
    let distributor = DistributorHandle::spawn(probe, storage);

    distributor.start(tcp_monitor(Some(1), 22)).await.unwrap();
    distributor.stop(42).await.unwrap();

    let snapshot = distributor.snapshot().await.unwrap();
    assert_eq!(snapshot.monitors, vec![1]);

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_one_persist_per_measurement_regardless_of_subscribers() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();
    let distributor = DistributorHandle::spawn(probe, storage.clone());

    let mut healthy = subscribe(&distributor).await;

    // three subscribers whose outbound queue is gone but whose connection is open
    let mut open_connections = Vec::new();
    for _ in 0..3 {
        let peer = subscribe(&distributor).await;
        drop(peer.frames);
        open_connections.push(peer.events);
    }
    assert_eq!(distributor.snapshot().await.unwrap().subscribers.len(), 4);

    distributor.publish(finalized(3, State::Warn)).await.unwrap();

    let frame = next_frame(&mut healthy, Duration::from_secs(2)).await;
    assert_eq!(frame["monitor_id"], 3);
    assert_eq!(frame["state"], "warn");
    assert_eq!(storage.inserts(), 1);

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_subscriber_receives_measurement() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();
    let distributor = DistributorHandle::spawn(probe, storage.clone());

    let mut peers = Vec::new();
    for _ in 0..5 {
        peers.push(subscribe(&distributor).await);
    }

    distributor.publish(finalized(1, State::Dead)).await.unwrap();

    for peer in &mut peers {
        let frame = next_frame(peer, Duration::from_secs(2)).await;
        assert_eq!(frame["state"], "dead");
        assert_eq!(frame["id"], 1);
    }
    assert_eq!(storage.inserts(), 1);

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_halts_measurements() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();
    let distributor = DistributorHandle::spawn(probe.clone(), storage.clone());
    let mut peer = subscribe(&distributor).await;

    distributor.start(tcp_monitor(Some(5), 22)).await.unwrap();
    next_frame(&mut peer, Duration::from_secs(2)).await;

    distributor.stop(5).await.unwrap();
    let snapshot = distributor.snapshot().await.unwrap();
    assert!(snapshot.monitors.is_empty());

    // let anything already in flight settle
    tokio::time::sleep(Duration::from_millis(200)).await;
    while peer.frames.try_recv().is_ok() {}
    let calls = probe.calls();

    // a full interval and then some
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(probe.calls(), calls);
    assert!(peer.frames.try_recv().is_err());

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poll_now_on_inactive_monitor() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();

    let mut monitor = tcp_monitor(None, 22);
    monitor.active = false;
    let id = storage.insert_monitor(&monitor).await.unwrap();

    let distributor = DistributorHandle::spawn(probe.clone(), storage.clone());
    let mut peer = subscribe(&distributor).await;

    distributor.poll_now(id).await.unwrap();

    let frame = next_frame(&mut peer, Duration::from_secs(2)).await;
    assert_eq!(frame["monitor_id"], id);

    let snapshot = distributor.snapshot().await.unwrap();
    assert!(snapshot.monitors.is_empty());
    assert_eq!(probe.calls(), 1);
    assert_eq!(storage.inserts(), 1);

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poll_now_on_running_monitor_is_forwarded() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();
    let distributor = DistributorHandle::spawn(probe.clone(), storage);
    let mut peer = subscribe(&distributor).await;

    let mut monitor = tcp_monitor(Some(9), 22);
    monitor.interval = 3600;
    distributor.start(monitor).await.unwrap();
    next_frame(&mut peer, Duration::from_secs(2)).await;

    distributor.poll_now(9).await.unwrap();
    next_frame(&mut peer, Duration::from_secs(2)).await;

    assert_eq!(probe.calls(), 2);
    assert_eq!(distributor.snapshot().await.unwrap().monitors, vec![9]);

    distributor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resume_starts_active_monitors() {
    let probe = CountingProbe::new(State::Ok);
    let storage = RecordingStorage::new();

    let active = storage.insert_monitor(&tcp_monitor(None, 22)).await.unwrap();
    let mut paused = tcp_monitor(None, 23);
    paused.active = false;
    storage.insert_monitor(&paused).await.unwrap();

    let distributor = DistributorHandle::spawn(probe, storage.clone());
    let started = distributor.resume(storage.as_ref()).await.unwrap();

    assert_eq!(started, 1);
    let snapshot = wait_for_snapshot(&distributor, Duration::from_secs(1), |s| {
        !s.monitors.is_empty()
    })
    .await;
    assert_eq!(snapshot.monitors, vec![active]);

    distributor.shutdown().await.unwrap();
}
