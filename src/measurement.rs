//! Measurement and certificate data model
//!
//! A [`Measurement`] is the result of one probe execution. Probes build it up
//! in three steps:
//!
//! 1. [`Measurement::start`] records the wall clock and a start instant
//! 2. Sub-checks call [`Measurement::downgrade`] / [`Measurement::downgrade_with_hint`]
//!    and fill in the kind-specific result fields
//! 3. [`Measurement::finalize`] commits state and duration
//!
//! After finalizing, a measurement is only moved around (distributor, storage,
//! subscribers) and never mutated again.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a probe, ordered from best to worst
///
/// The derived ordering is what makes downgrading work: `Ok < Warn < Dead`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Ok,
    Warn,
    Dead,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Ok => "ok",
            State::Warn => "warn",
            State::Dead => "dead",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(State::Ok),
            "warn" => Ok(State::Warn),
            "dead" => Ok(State::Dead),
            other => Err(format!("unknown state '{other}'")),
        }
    }
}

/// Qualifier explaining why a measurement is not `Ok`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateHint {
    Timeout,
    ConnectionFailed,
    ResolutionFailed,
    PacketLoss,
    StatusMismatch,
    CertificateExpiring,
    CertificateExpired,
    ExitCode,
    ExecutionFailed,
}

impl StateHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateHint::Timeout => "timeout",
            StateHint::ConnectionFailed => "connection_failed",
            StateHint::ResolutionFailed => "resolution_failed",
            StateHint::PacketLoss => "packet_loss",
            StateHint::StatusMismatch => "status_mismatch",
            StateHint::CertificateExpiring => "certificate_expiring",
            StateHint::CertificateExpired => "certificate_expired",
            StateHint::ExitCode => "exit_code",
            StateHint::ExecutionFailed => "execution_failed",
        }
    }
}

impl fmt::Display for StateHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hint = match s {
            "timeout" => StateHint::Timeout,
            "connection_failed" => StateHint::ConnectionFailed,
            "resolution_failed" => StateHint::ResolutionFailed,
            "packet_loss" => StateHint::PacketLoss,
            "status_mismatch" => StateHint::StatusMismatch,
            "certificate_expiring" => StateHint::CertificateExpiring,
            "certificate_expired" => StateHint::CertificateExpired,
            "exit_code" => StateHint::ExitCode,
            "execution_failed" => StateHint::ExecutionFailed,
            other => return Err(format!("unknown state hint '{other}'")),
        };
        Ok(hint)
    }
}

/// Metadata of one TLS certificate observed during an HTTP probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Serial number as colon separated hex
    pub serial: String,

    /// Public key algorithm (e.g. "RSA", "ECDSA", or the raw OID)
    pub public_key_algorithm: String,

    /// Issuer common name
    pub issuer: Option<String>,

    /// Subject common name
    pub subject: Option<String>,

    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Certificate {
    /// Whole days until `not_after`, negative once expired
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }
}

/// Result of one probe execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    /// Storage identity, `None` until persisted
    pub id: Option<i64>,

    pub monitor_id: i64,

    pub recorded_at: DateTime<Utc>,

    /// Elapsed wall time in milliseconds
    pub(crate) duration: u64,

    pub(crate) state: State,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) state_hint: Option<StateHint>,

    // === HTTP ===
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_headers: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_body: Option<String>,

    // === ICMP ===
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_packets_out: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_packets_in: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_rtt_min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_rtt_avg: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_rtt_max: Option<f64>,

    // === Script ===
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    #[serde(default)]
    pub certificates: Vec<Certificate>,

    #[serde(skip)]
    started: Option<Instant>,

    #[serde(skip)]
    finalized: bool,
}

impl Measurement {
    /// Create an empty `Ok` measurement for a monitor
    pub fn new(monitor_id: i64) -> Self {
        Self {
            id: None,
            monitor_id,
            recorded_at: Utc::now(),
            duration: 0,
            state: State::Ok,
            state_hint: None,
            http_status_code: None,
            http_headers: None,
            http_body: None,
            icmp_packets_out: None,
            icmp_packets_in: None,
            icmp_rtt_min: None,
            icmp_rtt_avg: None,
            icmp_rtt_max: None,
            exit_code: None,
            stdout: None,
            stderr: None,
            certificates: Vec::new(),
            started: None,
            finalized: false,
        }
    }

    /// Record the start timestamp
    ///
    /// Must be called before [`Measurement::finalize`].
    pub fn start(&mut self) {
        self.recorded_at = Utc::now();
        self.started = Some(Instant::now());
    }

    /// Move the state towards a worse outcome
    ///
    /// A state that is not worse than the current one is ignored.
    pub fn downgrade(&mut self, state: State) {
        if state > self.state {
            self.state = state;
        }
    }

    /// Like [`Measurement::downgrade`], additionally recording why
    ///
    /// The hint only changes when the state actually gets worse, so it always
    /// explains the worst observed condition.
    pub fn downgrade_with_hint(&mut self, state: State, hint: StateHint) {
        if state > self.state {
            self.state = state;
            self.state_hint = Some(hint);
        }
    }

    /// Commit state and duration
    ///
    /// # Panics
    ///
    /// Panics if [`Measurement::start`] was never called or if the measurement
    /// was already finalized. Both are programming errors in a probe.
    pub fn finalize(&mut self) {
        assert!(!self.finalized, "measurement finalized twice");
        let started = self
            .started
            .expect("measurement finalized without a start timestamp");

        self.duration = started.elapsed().as_millis() as u64;
        self.finalized = true;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn state_hint(&self) -> Option<StateHint> {
        self.state_hint
    }

    /// Duration in milliseconds
    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}
