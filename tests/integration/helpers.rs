//! Helper types and functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use upwatch::{
    actors::{DistributorHandle, DistributorSnapshot, RemotePeer, SubscriberConnection},
    measurement::{Certificate, Measurement, State},
    monitor::{HttpConfig, HttpMethod, Monitor, MonitorKind, TcpConfig},
    probe::Probe,
    storage::{MemoryBackend, StorageBackend, StorageError, StorageResult},
};

/// Probe answering every poll with a fixed state
pub struct CountingProbe {
    calls: AtomicUsize,
    running: AtomicUsize,
    state: State,
    delay: Duration,
}

/// Decrements the running gauge however the poll ends
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CountingProbe {
    pub fn new(state: State) -> Arc<Self> {
        Self::with_delay(state, Duration::ZERO)
    }

    pub fn with_delay(state: State, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            state,
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Polls currently in progress
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for CountingProbe {
    async fn poll(&self, monitor: &Monitor) -> Measurement {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);
        let _running = Running(&self.running);

        let mut measurement = Measurement::new(monitor.id.expect("monitor without id"));
        measurement.start();
        tokio::time::sleep(self.delay).await;
        measurement.downgrade(self.state);
        measurement.finalize();
        measurement
    }
}

/// In-memory storage counting measurement inserts, optionally failing them
#[derive(Default)]
pub struct RecordingStorage {
    inner: MemoryBackend,
    inserts: AtomicUsize,
    fail: AtomicBool,
    insert_delay: Duration,
}

impl RecordingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let storage = Self::default();
        storage.fail.store(true, Ordering::SeqCst);
        Arc::new(storage)
    }

    /// Storage whose measurement inserts take `delay` each
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            insert_delay: delay,
            ..Self::default()
        })
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for RecordingStorage {
    async fn insert_monitor(&self, monitor: &Monitor) -> StorageResult<i64> {
        self.inner.insert_monitor(monitor).await
    }

    async fn update_monitor(&self, monitor: &Monitor) -> StorageResult<()> {
        self.inner.update_monitor(monitor).await
    }

    async fn delete_monitor(&self, id: i64) -> StorageResult<()> {
        self.inner.delete_monitor(id).await
    }

    async fn select_monitor(&self, id: i64) -> StorageResult<Option<Monitor>> {
        self.inner.select_monitor(id).await
    }

    async fn select_monitors(&self) -> StorageResult<Vec<Monitor>> {
        self.inner.select_monitors().await
    }

    async fn insert_measurement(&self, measurement: &Measurement) -> StorageResult<i64> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.insert_delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("injected failure".to_string()));
        }
        self.inner.insert_measurement(measurement).await
    }

    async fn select_measurements(
        &self,
        monitor_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<Measurement>> {
        self.inner.select_measurements(monitor_id, limit).await
    }

    async fn select_certificates(&self, measurement_id: i64) -> StorageResult<Vec<Certificate>> {
        self.inner.select_certificates(measurement_id).await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

pub fn tcp_monitor(id: Option<i64>, port: u16) -> Monitor {
    Monitor {
        id,
        name: format!("tcp-{port}"),
        active: true,
        interval: 1,
        timeout: 1,
        kind: MonitorKind::Tcp(TcpConfig {
            address: "127.0.0.1".to_string(),
            port,
        }),
        event_hook: None,
    }
}

pub fn http_monitor(id: Option<i64>, url: &str) -> Monitor {
    Monitor {
        id,
        name: "website".to_string(),
        active: true,
        interval: 60,
        timeout: 5,
        kind: MonitorKind::Http(HttpConfig {
            url: url.to_string(),
            method: HttpMethod::Get,
            headers: Default::default(),
            body: None,
            range: "200-299".parse().unwrap(),
            cert_expiry: Default::default(),
        }),
        event_hook: None,
    }
}

/// A port on localhost nothing is listening on
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

pub fn finalized(monitor_id: i64, state: State) -> Measurement {
    let mut measurement = Measurement::new(monitor_id);
    measurement.start();
    measurement.downgrade(state);
    measurement.finalize();
    measurement
}

/// Subscribe an in-process peer and wait until it is registered
pub async fn subscribe(distributor: &DistributorHandle) -> RemotePeer {
    let before = distributor.snapshot().await.unwrap().subscribers.len();
    let (connection, peer) = SubscriberConnection::pair(32);
    distributor.subscribe(connection).await.unwrap();

    // messages are handled in order, so the snapshot already sees it
    let after = distributor.snapshot().await.unwrap().subscribers.len();
    assert_eq!(after, before + 1);
    peer
}

/// Next frame fanned out to a peer, parsed as JSON
pub async fn next_frame(peer: &mut RemotePeer, within: Duration) -> serde_json::Value {
    let frame = timeout(within, peer.frames.recv())
        .await
        .expect("no frame within deadline")
        .expect("subscriber closed");
    serde_json::from_str(&frame).unwrap()
}

/// Poll snapshots until `condition` holds
pub async fn wait_for_snapshot(
    distributor: &DistributorHandle,
    within: Duration,
    condition: impl Fn(&DistributorSnapshot) -> bool,
) -> DistributorSnapshot {
    timeout(within, async {
        loop {
            let snapshot = distributor.snapshot().await.unwrap();
            if condition(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("snapshot condition not reached")
}
