//! TCP connect probe

use std::time::Duration;

use tokio::net::{TcpStream, lookup_host};
use tokio::time;
use tracing::{instrument, trace, warn};

use crate::measurement::{Measurement, State, StateHint};
use crate::monitor::{Monitor, TcpConfig};

pub struct TcpProbe;

impl TcpProbe {
    /// Connect to `address:port` within the monitor's timeout
    #[instrument(skip_all, fields(monitor = %monitor.name))]
    pub async fn check(&self, monitor: &Monitor, config: &TcpConfig) -> Measurement {
        let mut measurement = super::begin(monitor);
        let deadline = Duration::from_secs(monitor.timeout);

        match time::timeout(deadline, connect(&config.address, config.port)).await {
            Ok(Ok(_stream)) => trace!("connected to {}:{}", config.address, config.port),
            Ok(Err(hint)) => measurement.downgrade_with_hint(State::Dead, hint),
            Err(_) => {
                warn!("connect timed out after {}s", monitor.timeout);
                measurement.downgrade_with_hint(State::Dead, StateHint::Timeout);
            }
        }

        measurement.finalize();
        measurement
    }
}

async fn connect(address: &str, port: u16) -> Result<TcpStream, StateHint> {
    let addrs: Vec<_> = lookup_host((address, port))
        .await
        .map_err(|e| {
            warn!("failed to resolve {address}: {e}");
            StateHint::ResolutionFailed
        })?
        .collect();

    if addrs.is_empty() {
        warn!("{address} resolved to no addresses");
        return Err(StateHint::ResolutionFailed);
    }

    TcpStream::connect(&addrs[..]).await.map_err(|e| {
        warn!("failed to connect to {address}:{port}: {e}");
        StateHint::ConnectionFailed
    })
}
