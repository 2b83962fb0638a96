//! Probe capability
//!
//! A probe executes one check against a monitor's target and turns the outcome
//! into a [`Measurement`]. Unreachable targets are not errors: they produce a
//! `Dead` (or `Warn`) measurement with a [`StateHint`](crate::measurement::StateHint).
//!
//! ## Variants
//!
//! - [`http::HttpProbe`]: request + status range + certificate expiry policy
//! - [`tcp::TcpProbe`]: plain connect
//! - [`icmp::IcmpProbe`]: echo requests via the system `ping`
//! - [`script::ScriptProbe`]: external program, classified by exit code
//!
//! [`Prober`] bundles all variants and dispatches on [`MonitorKind`].

pub mod http;
pub mod icmp;
pub mod script;
pub mod tcp;

use async_trait::async_trait;

use crate::measurement::Measurement;
use crate::monitor::{Monitor, MonitorKind};

/// Maximum bytes kept from bodies and process output
pub const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Execute one check against a monitor's target
///
/// Implementations must return within the monitor's `timeout` (plus a small
/// scheduling slack) and must always return a finalized measurement.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn poll(&self, monitor: &Monitor) -> Measurement;
}

/// Default probe dispatching on the monitor kind
pub struct Prober {
    http: http::HttpProbe,
    tcp: tcp::TcpProbe,
    icmp: icmp::IcmpProbe,
    script: script::ScriptProbe,
}

impl Prober {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http::HttpProbe::new()?,
            tcp: tcp::TcpProbe,
            icmp: icmp::IcmpProbe,
            script: script::ScriptProbe,
        })
    }
}

#[async_trait]
impl Probe for Prober {
    async fn poll(&self, monitor: &Monitor) -> Measurement {
        match &monitor.kind {
            MonitorKind::Http(config) => self.http.check(monitor, config).await,
            MonitorKind::Tcp(config) => self.tcp.check(monitor, config).await,
            MonitorKind::Icmp(config) => self.icmp.check(monitor, config).await,
            MonitorKind::Script(config) => self.script.check(monitor, config).await,
        }
    }
}

/// Fresh, started measurement for a monitor
pub(crate) fn begin(monitor: &Monitor) -> Measurement {
    debug_assert!(monitor.id.is_some(), "probing a monitor without identity");

    let mut measurement = Measurement::new(monitor.id.unwrap_or_default());
    measurement.start();
    measurement
}

/// Cut a string down to [`MAX_CAPTURE_BYTES`] on a char boundary
pub(crate) fn truncate(mut value: String) -> String {
    if value.len() > MAX_CAPTURE_BYTES {
        let mut end = MAX_CAPTURE_BYTES;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}
