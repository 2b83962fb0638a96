//! Monitor configuration
//!
//! A [`Monitor`] is a named scheduling unit: probe configuration, interval,
//! timeout and an active flag. Monitors are serialized as
//!
//! ```json
//! {
//!   "name": "website",
//!   "interval": 30,
//!   "timeout": 10,
//!   "kind": "http",
//!   "config": { "url": "https://example.com", "range": "200-299" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("monitor name must not be empty")]
    EmptyName,

    #[error("interval must be greater than zero for an active monitor")]
    InvalidInterval,

    #[error("timeout must be greater than zero")]
    InvalidTimeout,

    #[error("{kind} monitor requires '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("invalid status range '{0}'")]
    InvalidRange(String),

    #[error("icmp packet count must be greater than zero")]
    InvalidCount,

    #[error("icmp wait must be at least {}ms", MIN_ICMP_WAIT)]
    InvalidWait,

    #[error("certificate dead_days must not exceed warn_days")]
    InvalidCertPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// Storage identity, `None` until persisted
    #[serde(default)]
    pub id: Option<i64>,

    pub name: String,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Seconds between probes
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Seconds a single probe may take
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(flatten)]
    pub kind: MonitorKind,

    /// Script executed whenever the monitor changes state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_hook: Option<ScriptConfig>,
}

fn default_active() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "lowercase")]
pub enum MonitorKind {
    Http(HttpConfig),
    Tcp(TcpConfig),
    Icmp(IcmpConfig),
    Script(ScriptConfig),
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http(_) => "http",
            MonitorKind::Tcp(_) => "tcp",
            MonitorKind::Icmp(_) => "icmp",
            MonitorKind::Script(_) => "script",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,

    /// Accepted status codes
    #[serde(default)]
    pub range: StatusRange,

    #[serde(default)]
    pub cert_expiry: CertExpiryPolicy,
}

/// Certificate expiry thresholds in days
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertExpiryPolicy {
    /// Warn when the certificate expires within this many days
    #[serde(default)]
    pub warn_days: Option<u32>,

    /// Dead when the certificate expires within this many days
    #[serde(default)]
    pub dead_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcmpConfig {
    pub address: String,

    /// Payload size in bytes
    #[serde(default = "default_packet_size")]
    pub packet_size: u16,

    /// Echo requests per probe
    #[serde(default = "default_count")]
    pub count: u16,

    #[serde(default = "default_ttl")]
    pub ttl: u8,

    /// Wait between packets in milliseconds
    #[serde(default = "default_wait")]
    pub wait: u64,
}

fn default_packet_size() -> u16 {
    56
}

fn default_count() -> u16 {
    3
}

fn default_ttl() -> u8 {
    64
}

/// Smallest packet interval `ping` accepts from unprivileged users
pub const MIN_ICMP_WAIT: u64 = 200;

fn default_wait() -> u64 {
    1000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub path: String,

    /// Argument templates, see [`crate::probe::script::render`]
    #[serde(default)]
    pub args: Vec<String>,
}

impl Monitor {
    /// Human readable target (url, address, script path)
    pub fn target(&self) -> String {
        match &self.kind {
            MonitorKind::Http(config) => config.url.clone(),
            MonitorKind::Tcp(config) => format!("{}:{}", config.address, config.port),
            MonitorKind::Icmp(config) => config.address.clone(),
            MonitorKind::Script(config) => config.path.clone(),
        }
    }

    /// Check the configuration before it gets scheduled
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::EmptyName);
        }
        if self.active && self.interval == 0 {
            return Err(MonitorError::InvalidInterval);
        }
        if self.timeout == 0 {
            return Err(MonitorError::InvalidTimeout);
        }

        match &self.kind {
            MonitorKind::Http(config) => {
                require("http", "url", &config.url)?;
                if let (Some(warn), Some(dead)) =
                    (config.cert_expiry.warn_days, config.cert_expiry.dead_days)
                    && dead > warn
                {
                    return Err(MonitorError::InvalidCertPolicy);
                }
            }
            MonitorKind::Tcp(config) => require("tcp", "address", &config.address)?,
            MonitorKind::Icmp(config) => {
                require("icmp", "address", &config.address)?;
                if config.count == 0 {
                    return Err(MonitorError::InvalidCount);
                }
                if config.wait < MIN_ICMP_WAIT {
                    return Err(MonitorError::InvalidWait);
                }
            }
            MonitorKind::Script(config) => require("script", "path", &config.path)?,
        }

        if let Some(hook) = &self.event_hook {
            require("event hook", "path", &hook.path)?;
        }

        Ok(())
    }
}

fn require(kind: &'static str, field: &'static str, value: &str) -> Result<(), MonitorError> {
    if value.trim().is_empty() {
        Err(MonitorError::MissingField { kind, field })
    } else {
        Ok(())
    }
}

/// Set of accepted HTTP status codes
///
/// Parsed from a comma separated list of codes and inclusive ranges, e.g.
/// `"200-299,301,304"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StatusRange {
    ranges: Vec<(u16, u16)>,
}

impl StatusRange {
    pub fn contains(&self, status: u16) -> bool {
        self.ranges
            .iter()
            .any(|(low, high)| (*low..=*high).contains(&status))
    }
}

impl Default for StatusRange {
    fn default() -> Self {
        Self {
            ranges: vec![(200, 299)],
        }
    }
}

impl FromStr for StatusRange {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MonitorError::InvalidRange(s.to_string());

        let mut ranges = Vec::new();
        for part in s.split(',').map(str::trim) {
            let (low, high) = match part.split_once('-') {
                Some((low, high)) => (low.trim(), high.trim()),
                None => (part, part),
            };
            let low: u16 = low.parse().map_err(|_| invalid())?;
            let high: u16 = high.parse().map_err(|_| invalid())?;
            if low > high || !(100..=599).contains(&low) || high > 599 {
                return Err(invalid());
            }
            ranges.push((low, high));
        }

        Ok(Self { ranges })
    }
}

impl TryFrom<String> for StatusRange {
    type Error = MonitorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StatusRange> for String {
    fn from(value: StatusRange) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StatusRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .ranges
            .iter()
            .map(|(low, high)| {
                if low == high {
                    low.to_string()
                } else {
                    format!("{low}-{high}")
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}
