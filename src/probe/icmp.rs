//! ICMP echo probe
//!
//! Raw ICMP sockets need elevated privileges, so the probe drives the system
//! `ping` binary (which is usually installed setuid or with `cap_net_raw`) and
//! parses its summary lines.
//!
//! The invocation uses Linux (iputils, busybox) flags: `-t` sets the TTL and
//! `-i` the packet interval. BSD and macOS `ping` read `-t` as a timeout.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::net::lookup_host;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, instrument, trace, warn};

use crate::measurement::{Measurement, State, StateHint};
use crate::monitor::{IcmpConfig, Monitor};

static PACKETS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received").expect("valid regex")
});

static ROUND_TRIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"min/avg/max(?:/[a-z]+)? = ([\d.]+)/([\d.]+)/([\d.]+)").expect("valid regex")
});

/// Summary of one `ping` run
#[derive(Debug, Clone, PartialEq)]
pub struct PingSummary {
    pub transmitted: u32,
    pub received: u32,

    /// (min, avg, max) round trip in milliseconds, absent when nothing came back
    pub round_trip: Option<(f64, f64, f64)>,
}

pub struct IcmpProbe;

impl IcmpProbe {
    #[instrument(skip_all, fields(monitor = %monitor.name))]
    pub async fn check(&self, monitor: &Monitor, config: &IcmpConfig) -> Measurement {
        let mut measurement = super::begin(monitor);
        let deadline = Duration::from_secs(monitor.timeout);

        match time::timeout(deadline, ping(config)).await {
            Ok(Ok(summary)) => apply_summary(&mut measurement, &summary),
            Ok(Err(hint)) => measurement.downgrade_with_hint(State::Dead, hint),
            Err(_) => {
                warn!("ping timed out after {}s", monitor.timeout);
                measurement.downgrade_with_hint(State::Dead, StateHint::Timeout);
            }
        }

        measurement.finalize();
        measurement
    }
}

fn apply_summary(measurement: &mut Measurement, summary: &PingSummary) {
    measurement.icmp_packets_out = Some(summary.transmitted);
    measurement.icmp_packets_in = Some(summary.received);

    if let Some((min, avg, max)) = summary.round_trip {
        measurement.icmp_rtt_min = Some(min);
        measurement.icmp_rtt_avg = Some(avg);
        measurement.icmp_rtt_max = Some(max);
    }

    if summary.received < summary.transmitted || summary.transmitted == 0 {
        debug!(
            "packet loss: {}/{} received",
            summary.received, summary.transmitted
        );
        measurement.downgrade_with_hint(State::Dead, StateHint::PacketLoss);
    }
}

async fn ping(config: &IcmpConfig) -> Result<PingSummary, StateHint> {
    let address = resolve(&config.address).await?;

    let wait_secs = config.wait as f64 / 1000.0;
    let mut command = Command::new("ping");
    command
        .arg("-n")
        .args(["-c", &config.count.to_string()])
        .args(["-s", &config.packet_size.to_string()])
        .args(["-t", &config.ttl.to_string()])
        .args(["-i", &format!("{wait_secs:.3}")])
        .arg(address.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    trace!("running {command:?}");

    let output = command.output().await.map_err(|e| {
        warn!("failed to run ping: {e}");
        StateHint::ExecutionFailed
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ping_output(&stdout).ok_or_else(|| {
        warn!(
            "unexpected ping output (status {}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        StateHint::ExecutionFailed
    })
}

async fn resolve(address: &str) -> Result<IpAddr, StateHint> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    lookup_host((address, 0))
        .await
        .map_err(|e| {
            warn!("failed to resolve {address}: {e}");
            StateHint::ResolutionFailed
        })?
        .next()
        .map(|addr| addr.ip())
        .ok_or(StateHint::ResolutionFailed)
}

/// Parse the `ping` summary lines (iputils, busybox and BSD wording)
pub fn parse_ping_output(output: &str) -> Option<PingSummary> {
    let packets = PACKETS.captures(output)?;
    let transmitted = packets[1].parse().ok()?;
    let received = packets[2].parse().ok()?;

    let round_trip = ROUND_TRIP.captures(output).and_then(|rtt| {
        Some((
            rtt[1].parse().ok()?,
            rtt[2].parse().ok()?,
            rtt[3].parse().ok()?,
        ))
    });

    Some(PingSummary {
        transmitted,
        received,
        round_trip,
    })
}
