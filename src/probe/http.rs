//! HTTP/HTTPS probe
//!
//! Checks performed, each of which may downgrade the measurement:
//!
//! 1. Request succeeds within the timeout (else `Dead` / timeout or connection_failed)
//! 2. Status code lies in the configured range (else `Dead` / status_mismatch)
//! 3. The peer certificate is not expired or about to expire, according to
//!    the monitor's [`CertExpiryPolicy`]

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::measurement::{Certificate, Measurement, State, StateHint};
use crate::monitor::{CertExpiryPolicy, HttpConfig, HttpMethod, Monitor};

pub struct HttpProbe {
    /// Shared client, timeouts are applied per request
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .tls_info(true)
            .user_agent(concat!("upwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    #[instrument(skip_all, fields(monitor = %monitor.name))]
    pub async fn check(&self, monitor: &Monitor, config: &HttpConfig) -> Measurement {
        let mut measurement = super::begin(monitor);

        trace!("requesting {}", config.url);

        let mut request = self
            .client
            .request(config.method.into(), &config.url)
            .timeout(Duration::from_secs(monitor.timeout));

        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &config.body {
            request = request.body(body.clone());
        }

        match request.send().await {
            Ok(response) => {
                self.evaluate_response(&mut measurement, config, response)
                    .await
            }
            Err(e) => {
                warn!("request to {} failed: {e}", config.url);
                measurement.downgrade_with_hint(State::Dead, transport_hint(&e));
            }
        }

        measurement.finalize();
        measurement
    }

    async fn evaluate_response(
        &self,
        measurement: &mut Measurement,
        config: &HttpConfig,
        response: reqwest::Response,
    ) {
        let status = response.status().as_u16();
        measurement.http_status_code = Some(status);

        if !config.range.contains(status) {
            debug!("status {status} outside of range {}", config.range);
            measurement.downgrade_with_hint(State::Dead, StateHint::StatusMismatch);
        }

        let certificate = response
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .and_then(parse_certificate);

        if let Some(certificate) = certificate {
            if let Some((state, hint)) =
                evaluate_certificate(&certificate, &config.cert_expiry, Utc::now())
            {
                debug!(
                    "certificate for {:?} expires {}",
                    certificate.subject, certificate.not_after
                );
                measurement.downgrade_with_hint(state, hint);
            }
            measurement.certificates.push(certificate);
        }

        // repeated headers are joined like a proxy would fold them
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes());
            match headers.get_mut(name.as_str()) {
                Some(existing) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                None => {
                    headers.insert(name.as_str().to_string(), value.into_owned());
                }
            }
        }
        measurement.http_headers = Some(headers);

        if matches!(config.method, HttpMethod::Head) {
            return;
        }

        match response.text().await {
            Ok(body) => measurement.http_body = Some(super::truncate(body)),
            Err(e) => {
                warn!("failed to read response body: {e}");
                measurement.downgrade_with_hint(State::Dead, transport_hint(&e));
            }
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

fn transport_hint(error: &reqwest::Error) -> StateHint {
    if error.is_timeout() {
        StateHint::Timeout
    } else {
        StateHint::ConnectionFailed
    }
}

/// Classify a certificate against the expiry policy
///
/// An expired certificate is always `Dead`, regardless of the policy.
pub fn evaluate_certificate(
    certificate: &Certificate,
    policy: &CertExpiryPolicy,
    now: DateTime<Utc>,
) -> Option<(State, StateHint)> {
    if certificate.is_expired(now) {
        return Some((State::Dead, StateHint::CertificateExpired));
    }

    let days_left = certificate.days_until_expiry(now);

    if policy.dead_days.is_some_and(|days| days_left < days as i64) {
        return Some((State::Dead, StateHint::CertificateExpired));
    }
    if policy.warn_days.is_some_and(|days| days_left < days as i64) {
        return Some((State::Warn, StateHint::CertificateExpiring));
    }

    None
}

/// Extract certificate metadata from a DER encoded X.509 certificate
pub fn parse_certificate(der: &[u8]) -> Option<Certificate> {
    let (_, cert) = X509Certificate::from_der(der)
        .inspect_err(|e| warn!("failed to parse peer certificate: {e}"))
        .ok()?;

    let common_name = |name: &x509_parser::x509::X509Name<'_>| {
        name.iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
    };

    let validity = cert.validity();

    Some(Certificate {
        serial: cert.tbs_certificate.raw_serial_as_string(),
        public_key_algorithm: key_algorithm_name(
            &cert.public_key().algorithm.algorithm.to_id_string(),
        ),
        issuer: common_name(cert.issuer()),
        subject: common_name(cert.subject()),
        not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0)?,
        not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0)?,
    })
}

fn key_algorithm_name(oid: &str) -> String {
    match oid {
        "1.2.840.113549.1.1.1" => "RSA".to_string(),
        "1.2.840.10045.2.1" => "ECDSA".to_string(),
        "1.3.101.112" => "Ed25519".to_string(),
        "1.3.101.113" => "Ed448".to_string(),
        "1.2.840.10040.4.1" => "DSA".to_string(),
        other => other.to_string(),
    }
}
