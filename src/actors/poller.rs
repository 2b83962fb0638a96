//! Poller - Periodically probes a single monitor
//!
//! ## Lifecycle
//!
//! ```text
//! Starting ──(random delay)──► Probing ──► Waiting ──(interval | PollNow)──► Probing ...
//!     │                           │           │
//!     └──────── Stop / closed control channel ┴──────────────► Stopped
//! ```
//!
//! The random initial delay spreads out monitors that were started together.
//! The interval timer restarts from zero after every measurement, so a
//! `PollNow` pushes the next scheduled poll back by a full interval.
//!
//! Probes and event hooks run on tasks owned by the poller. A Stop that
//! arrives while a probe is in flight ends the schedule right away and the
//! measurement is dropped. The poller task itself only exits once its probe
//! and hooks are done, so aborting the poller aborts them too.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, error, instrument, trace, warn};

use crate::measurement::{Measurement, State};
use crate::monitor::Monitor;
use crate::probe::{Probe, script};

use super::messages::{DistributorMessage, PollerCommand};

/// Upper bound of the randomized delay before the first poll
pub const INITIAL_DELAY_MAX: Duration = Duration::from_millis(800);

/// Buffered control commands per poller
const CONTROL_CAPACITY: usize = 8;

/// How long a stopped poller waits for its probe and hooks before aborting them
///
/// Shorter than [`SHUTDOWN_GRACE`](super::distributor::SHUTDOWN_GRACE), so a
/// poller has cancelled its own tasks before the distributor gives up on it.
pub(crate) const DRAIN_GRACE: Duration = Duration::from_secs(4);

/// Actor polling one monitor on its interval
pub(crate) struct Poller {
    monitor: Monitor,
    probe: Arc<dyn Probe>,

    /// Stop / PollNow from the distributor
    control: mpsc::Receiver<PollerCommand>,

    /// Measurements go back through the distributor inbox
    distributor: mpsc::WeakSender<DistributorMessage>,

    /// State of the previous measurement, for event hooks
    last_state: Option<State>,

    /// At most one in-flight probe
    probes: JoinSet<Measurement>,

    /// Running event hooks
    hooks: JoinSet<()>,
}

impl Poller {
    fn new(
        monitor: Monitor,
        probe: Arc<dyn Probe>,
        control: mpsc::Receiver<PollerCommand>,
        distributor: mpsc::WeakSender<DistributorMessage>,
    ) -> Self {
        Self {
            monitor,
            probe,
            control,
            distributor,
            last_state: None,
            probes: JoinSet::new(),
            hooks: JoinSet::new(),
        }
    }

    #[instrument(skip(self), fields(monitor = %self.monitor.name))]
    async fn run(mut self) {
        debug!("starting poller");

        let delay = initial_delay();
        trace!("first poll in {}ms", delay.as_millis());

        tokio::select! {
            _ = time::sleep(delay) => {}
            command = self.control.recv() => match command {
                Some(PollerCommand::PollNow) => trace!("poll requested during startup"),
                Some(PollerCommand::Stop) | None => {
                    debug!("stopped before the first poll");
                    return;
                }
            }
        }

        let interval = Duration::from_secs(self.monitor.interval.max(1));

        loop {
            if self.poll().await.is_break() {
                break;
            }

            tokio::select! {
                _ = time::sleep(interval) => {}
                command = self.control.recv() => match command {
                    Some(PollerCommand::PollNow) => trace!("poll requested"),
                    Some(PollerCommand::Stop) => break,
                    None => {
                        debug!("control channel closed");
                        break;
                    }
                }
            }
        }

        self.drain().await;
        debug!("poller stopped");
    }

    /// Wait for the probe and hooks still running after the schedule ended
    ///
    /// Whatever is left after [`DRAIN_GRACE`] is aborted, and the abort is
    /// awaited.
    async fn drain(&mut self) {
        if !self.probes.is_empty() {
            debug!("waiting for in-flight probe, its measurement is dropped");
        }

        let joined = time::timeout(DRAIN_GRACE, async {
            while let Some(result) = self.probes.join_next().await {
                if let Err(e) = result {
                    error!("probe task failed: {e}");
                }
            }
            while let Some(result) = self.hooks.join_next().await {
                if let Err(e) = result {
                    error!("event hook task failed: {e}");
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!(
                "aborting {} probe and {} hook tasks",
                self.probes.len(),
                self.hooks.len()
            );
            self.probes.shutdown().await;
            self.hooks.shutdown().await;
        }
    }

    /// Run one probe, staying responsive to control commands meanwhile
    async fn poll(&mut self) -> ControlFlow<()> {
        let probe = Arc::clone(&self.probe);
        let monitor = self.monitor.clone();
        self.probes.spawn(async move { probe.poll(&monitor).await });

        loop {
            tokio::select! {
                Some(result) = self.probes.join_next() => {
                    return match result {
                        Ok(measurement) => self.deliver(measurement).await,
                        Err(e) => {
                            error!("probe task failed: {e}");
                            ControlFlow::Continue(())
                        }
                    };
                }
                command = self.control.recv() => match command {
                    Some(PollerCommand::PollNow) => trace!("poll already in progress"),
                    Some(PollerCommand::Stop) | None => {
                        debug!("stopped while probing, discarding measurement");
                        return ControlFlow::Break(());
                    }
                }
            }
        }
    }

    async fn deliver(&mut self, measurement: Measurement) -> ControlFlow<()> {
        let state = measurement.state();
        trace!("measured {state} in {}ms", measurement.duration());

        if let Some(previous) = self.last_state.replace(state)
            && previous != state
        {
            debug!("state changed from {previous} to {state}");
            if let Some(hook) = &self.monitor.event_hook {
                // reap hooks that already finished
                while self.hooks.try_join_next().is_some() {}

                let hook = hook.clone();
                let monitor = self.monitor.clone();
                let measurement = measurement.clone();
                self.hooks
                    .spawn(async move { script::run_hook(&hook, &monitor, &measurement).await });
            }
        }

        let Some(distributor) = self.distributor.upgrade() else {
            debug!("distributor is gone, dropping measurement");
            return ControlFlow::Break(());
        };

        match distributor
            .send(DistributorMessage::MeasurementResult(measurement))
            .await
        {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => {
                debug!("distributor inbox closed, dropping measurement");
                ControlFlow::Break(())
            }
        }
    }
}

fn initial_delay() -> Duration {
    let millis = INITIAL_DELAY_MAX.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

/// Distributor-side handle of a running poller
///
/// Dropping the handle closes the control channel, which stops the poller.
pub(crate) struct PollerHandle {
    control: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    /// Spawn a poller onto the distributor's task set
    pub(crate) fn spawn(
        tasks: &mut JoinSet<()>,
        monitor: Monitor,
        probe: Arc<dyn Probe>,
        distributor: mpsc::WeakSender<DistributorMessage>,
    ) -> Self {
        let (control, control_rx) = mpsc::channel(CONTROL_CAPACITY);

        let poller = Poller::new(monitor, probe, control_rx, distributor);
        tasks.spawn(poller.run());

        Self { control }
    }

    /// Ask for an immediate poll; coalesced with pending requests
    pub(crate) fn poll_now(&self) {
        match self.control.try_send(PollerCommand::PollNow) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("poll request already pending"),
            Err(TrySendError::Closed(_)) => warn!("poller exited unexpectedly"),
        }
    }

    pub(crate) fn stop(self) {
        // a full queue is fine, dropping the sender stops the poller too
        let _ = self.control.try_send(PollerCommand::Stop);
    }
}

/// Poll once outside of any schedule and report to the distributor
pub(crate) async fn poll_once(
    monitor: Monitor,
    probe: Arc<dyn Probe>,
    distributor: mpsc::WeakSender<DistributorMessage>,
) {
    let measurement = probe.poll(&monitor).await;
    debug!("ad hoc poll of '{}' measured {}", monitor.name, measurement.state());

    if let Some(distributor) = distributor.upgrade() {
        let _ = distributor
            .send(DistributorMessage::MeasurementResult(measurement))
            .await;
    }
}
