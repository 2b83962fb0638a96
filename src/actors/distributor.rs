//! Distributor - Owns all scheduling and fan-out state
//!
//! The distributor is the single owner of the subscriber registry and of the
//! `monitor id → poller` table. Every change to either arrives as a
//! [`DistributorMessage`] on one bounded inbox and is applied one message at a
//! time, so neither structure needs a lock.
//!
//! ## Message Flow
//!
//! ```text
//! API / bootstrap ──► DistributorHandle ──► inbox ──► Distributor
//!                                             ▲          │ spawns
//!                 Poller ── MeasurementResult ┤          ├──► Poller (per monitor)
//!        read loop ── Unsubscribe ────────────┘          └──► read loop (per subscriber)
//!
//! MeasurementResult → persistence task → Persisted → JSON frame → every subscriber
//! ```
//!
//! The loop only ever suspends on its inbox. Inserts run on tracked tasks
//! that hand the measurement back once storage has answered.
//!
//! Spawned tasks only hold weak senders, so the distributor shuts down once
//! every [`DistributorHandle`] is dropped, or on an explicit `Shutdown`.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::measurement::Measurement;
use crate::monitor::Monitor;
use crate::probe::Probe;
use crate::storage::StorageBackend;

use super::messages::{DistributorMessage, DistributorSnapshot, PollTarget};
use super::poller::{self, PollerHandle};
use super::subscriber::{self, SubscriberConnection, SubscriberId, SubscriberRegistry};

/// Capacity of the distributor inbox
pub const INBOX_CAPACITY: usize = 256;

/// How long spawned tasks get to finish on shutdown before they are aborted
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Actor coordinating pollers, persistence and subscribers
pub struct Distributor {
    inbox: mpsc::Receiver<DistributorMessage>,

    /// Handed to spawned tasks so they can report back without keeping
    /// the inbox open
    loopback: mpsc::WeakSender<DistributorMessage>,

    probe: Arc<dyn Probe>,
    storage: Arc<dyn StorageBackend>,

    subscribers: SubscriberRegistry,
    pollers: HashMap<i64, PollerHandle>,

    /// Pollers, read loops, ad hoc polls and persistence
    tasks: JoinSet<()>,
}

impl Distributor {
    fn new(
        inbox: mpsc::Receiver<DistributorMessage>,
        loopback: mpsc::WeakSender<DistributorMessage>,
        probe: Arc<dyn Probe>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            inbox,
            loopback,
            probe,
            storage,
            subscribers: SubscriberRegistry::default(),
            pollers: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown message arrives or every handle is dropped.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        info!("starting distributor");

        let acknowledge = loop {
            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(message) => {
                        if let ControlFlow::Break(respond_to) = self.handle(message) {
                            break respond_to;
                        }
                    }
                    None => {
                        debug!("all handles dropped");
                        break None;
                    }
                },

                // reap finished tasks
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        error!("spawned task panicked: {e}");
                    }
                }
            }
        };

        self.shutdown().await;

        if let Some(respond_to) = acknowledge {
            let _ = respond_to.send(());
        }

        info!("distributor stopped");
    }

    fn handle(
        &mut self,
        message: DistributorMessage,
    ) -> ControlFlow<Option<oneshot::Sender<()>>> {
        match message {
            DistributorMessage::Subscribe(connection) => self.subscribe(connection),
            DistributorMessage::Unsubscribe(id) => self.unsubscribe(id),
            DistributorMessage::Start(monitor) => self.start(monitor),
            DistributorMessage::Stop(id) => self.stop(id),
            DistributorMessage::PollNow(target) => self.poll_now(target),
            DistributorMessage::MeasurementResult(measurement) => self.persist(measurement),
            DistributorMessage::Persisted(measurement) => self.distribute(measurement),
            DistributorMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            DistributorMessage::Shutdown { respond_to } => {
                debug!("received shutdown message");
                return ControlFlow::Break(respond_to);
            }
        }

        ControlFlow::Continue(())
    }

    fn subscribe(&mut self, connection: SubscriberConnection) {
        let Some(id) = self.subscribers.allocate() else {
            error!("no free subscriber handle found, dropping connection");
            return;
        };

        let SubscriberConnection { outbound, inbound } = connection;
        let reader = self
            .tasks
            .spawn(subscriber::read_loop(id, inbound, self.loopback.clone()));

        self.subscribers.insert(id, outbound, reader);
        info!(
            "subscriber {id} registered ({} total)",
            self.subscribers.len()
        );
    }

    fn unsubscribe(&mut self, id: SubscriberId) {
        if self.subscribers.remove(id) {
            info!(
                "subscriber {id} removed ({} remaining)",
                self.subscribers.len()
            );
        } else {
            debug!("subscriber {id} is not registered");
        }
    }

    fn start(&mut self, monitor: Monitor) {
        let Some(id) = monitor.id else {
            warn!("not starting '{}': monitor is not stored", monitor.name);
            return;
        };

        if !monitor.active {
            warn!("not starting monitor {id}: monitor is inactive");
            return;
        }

        if self.pollers.contains_key(&id) {
            debug!("monitor {id} is already running");
            return;
        }

        if let Err(e) = monitor.validate() {
            warn!("not starting monitor {id}: {e}");
            return;
        }

        info!("starting monitor {id} ('{}')", monitor.name);
        let handle = PollerHandle::spawn(
            &mut self.tasks,
            monitor,
            Arc::clone(&self.probe),
            self.loopback.clone(),
        );
        self.pollers.insert(id, handle);
    }

    fn stop(&mut self, id: i64) {
        match self.pollers.remove(&id) {
            Some(handle) => {
                handle.stop();
                info!("stopped monitor {id}");
            }
            None => debug!("monitor {id} is not running"),
        }
    }

    fn poll_now(&mut self, target: PollTarget) {
        if let Some(id) = target.id()
            && let Some(handle) = self.pollers.get(&id)
        {
            trace!("forwarding poll request to monitor {id}");
            handle.poll_now();
            return;
        }

        let probe = Arc::clone(&self.probe);
        let loopback = self.loopback.clone();

        match target {
            PollTarget::Monitor(monitor) if monitor.id.is_some() => {
                self.tasks.spawn(poller::poll_once(monitor, probe, loopback));
            }
            PollTarget::Monitor(monitor) => {
                warn!("not polling '{}': monitor is not stored", monitor.name);
            }
            PollTarget::Id(id) => {
                let storage = Arc::clone(&self.storage);
                self.tasks.spawn(async move {
                    match storage.select_monitor(id).await {
                        Ok(Some(monitor)) => poller::poll_once(monitor, probe, loopback).await,
                        Ok(None) => debug!("monitor {id} does not exist, nothing to poll"),
                        Err(e) => error!("failed to load monitor {id}: {e}"),
                    }
                });
            }
        }
    }

    /// Insert a measurement on a tracked task, which reports back as `Persisted`
    fn persist(&mut self, mut measurement: Measurement) {
        let storage = Arc::clone(&self.storage);
        let loopback = self.loopback.clone();

        self.tasks.spawn(async move {
            match storage.insert_measurement(&measurement).await {
                Ok(id) => measurement.id = Some(id),
                Err(e) => error!(
                    "failed to persist measurement of monitor {}: {e}",
                    measurement.monitor_id
                ),
            }

            let Some(distributor) = loopback.upgrade() else {
                debug!("distributor is gone, not fanning out");
                return;
            };
            if distributor
                .send(DistributorMessage::Persisted(measurement))
                .await
                .is_err()
            {
                debug!("distributor inbox closed, not fanning out");
            }
        });
    }

    /// Send a persisted measurement to every subscriber
    fn distribute(&mut self, measurement: Measurement) {
        let frame = match serde_json::to_string(&measurement) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to serialize measurement: {e}");
                return;
            }
        };

        let report = self.subscribers.fan_out(&frame);
        trace!(
            "fanned out measurement of monitor {} to {}/{} subscribers",
            measurement.monitor_id, report.delivered, report.attempted
        );
    }

    fn snapshot(&self) -> DistributorSnapshot {
        let mut monitors: Vec<i64> = self.pollers.keys().copied().collect();
        monitors.sort_unstable();

        DistributorSnapshot {
            subscribers: self.subscribers.handles(),
            monitors,
        }
    }

    async fn shutdown(&mut self) {
        // spawned tasks fail fast on send from now on
        self.inbox.close();

        for (_, handle) in self.pollers.drain() {
            handle.stop();
        }
        self.subscribers.clear();

        debug!("waiting for {} tasks", self.tasks.len());

        let joined = time::timeout(SHUTDOWN_GRACE, async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result
                    && e.is_panic()
                {
                    error!("spawned task panicked: {e}");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                "{} tasks still running after {}s, aborting",
                self.tasks.len(),
                SHUTDOWN_GRACE.as_secs()
            );
            self.tasks.shutdown().await;
        }
    }
}

/// Handle for talking to the [`Distributor`]
///
/// Cheap to clone. The distributor exits once the last handle is dropped.
#[derive(Clone)]
pub struct DistributorHandle {
    sender: mpsc::Sender<DistributorMessage>,
}

impl DistributorHandle {
    /// Spawn a new distributor
    pub fn spawn(probe: Arc<dyn Probe>, storage: Arc<dyn StorageBackend>) -> Self {
        let (sender, inbox) = mpsc::channel(INBOX_CAPACITY);

        let actor = Distributor::new(inbox, sender.downgrade(), probe, storage);
        tokio::spawn(actor.run());

        Self { sender }
    }

    async fn send(&self, message: DistributorMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| anyhow!("distributor is not running"))
    }

    /// Register a connection for measurement fan-out
    pub async fn subscribe(&self, connection: SubscriberConnection) -> Result<()> {
        self.send(DistributorMessage::Subscribe(connection))
            .await
            .context("failed to send Subscribe message")
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<()> {
        self.send(DistributorMessage::Unsubscribe(id))
            .await
            .context("failed to send Unsubscribe message")
    }

    /// Start periodic polling; a no-op if the monitor is already running
    pub async fn start(&self, monitor: Monitor) -> Result<()> {
        self.send(DistributorMessage::Start(monitor))
            .await
            .context("failed to send Start message")
    }

    /// Stop periodic polling; a no-op if the monitor is not running
    pub async fn stop(&self, id: i64) -> Result<()> {
        self.send(DistributorMessage::Stop(id))
            .await
            .context("failed to send Stop message")
    }

    /// Poll a monitor right away
    ///
    /// Running monitors restart their interval. Other monitors are polled
    /// once without being scheduled.
    pub async fn poll_now(&self, target: impl Into<PollTarget>) -> Result<()> {
        self.send(DistributorMessage::PollNow(target.into()))
            .await
            .context("failed to send PollNow message")
    }

    /// Persist and fan out a measurement produced elsewhere
    pub async fn publish(&self, measurement: Measurement) -> Result<()> {
        self.send(DistributorMessage::MeasurementResult(measurement))
            .await
            .context("failed to send MeasurementResult message")
    }

    pub async fn snapshot(&self) -> Result<DistributorSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(DistributorMessage::Snapshot { respond_to: tx })
            .await
            .context("failed to send Snapshot message")?;

        rx.await.context("failed to receive snapshot")
    }

    /// Shut down and wait until all spawned tasks are gone
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(DistributorMessage::Shutdown {
            respond_to: Some(tx),
        })
        .await
        .context("failed to send Shutdown message")?;

        rx.await.context("distributor exited without acknowledging")
    }

    /// Start every active monitor in storage, returning how many were started
    pub async fn resume(&self, storage: &dyn StorageBackend) -> Result<usize> {
        let monitors = storage
            .select_monitors()
            .await
            .context("failed to load monitors")?;

        let mut started = 0;
        for monitor in monitors.into_iter().filter(|monitor| monitor.active) {
            self.start(monitor).await?;
            started += 1;
        }

        Ok(started)
    }
}
