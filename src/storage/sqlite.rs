//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: API reads do not queue behind distributor writes
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds. Monitor kind configuration and
//! HTTP headers are stored as JSON text.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use crate::measurement::{Certificate, Measurement, State, StateHint};
use crate::monitor::{Monitor, MonitorKind, ScriptConfig};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Open (or create) the database and run migrations
    ///
    /// ```no_run
    /// # use upwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./upwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path = db_path.as_ref();

        info!("initializing SQLite backend at: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite backend ready");

        Ok(Self { pool })
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn monitor_from_row(row: &SqliteRow) -> StorageResult<Monitor> {
        let settings: String = row.get("settings");
        let kind: MonitorKind = serde_json::from_str(&settings)?;

        let event_hook = row
            .get::<Option<String>, _>("event_hook")
            .map(|hook| serde_json::from_str::<ScriptConfig>(&hook))
            .transpose()?;

        Ok(Monitor {
            id: Some(row.get("id")),
            name: row.get("name"),
            active: row.get("active"),
            interval: row.get::<i64, _>("interval_secs") as u64,
            timeout: row.get::<i64, _>("timeout_secs") as u64,
            kind,
            event_hook,
        })
    }

    fn measurement_from_row(row: &SqliteRow) -> StorageResult<Measurement> {
        let state: String = row.get("state");
        let state = state
            .parse::<State>()
            .map_err(StorageError::SerializationError)?;

        let state_hint = row
            .get::<Option<String>, _>("state_hint")
            .map(|hint| hint.parse::<StateHint>())
            .transpose()
            .map_err(StorageError::SerializationError)?;

        let http_headers = row
            .get::<Option<String>, _>("http_headers")
            .map(|headers| serde_json::from_str(&headers))
            .transpose()?;

        let mut measurement = Measurement::new(row.get("monitor_id"));
        measurement.id = Some(row.get("id"));
        measurement.recorded_at = Self::millis_to_timestamp(row.get("recorded_at"));
        measurement.duration = row.get::<i64, _>("duration_ms") as u64;
        measurement.state = state;
        measurement.state_hint = state_hint;
        measurement.http_status_code = row
            .get::<Option<i64>, _>("http_status_code")
            .map(|code| code as u16);
        measurement.http_headers = http_headers;
        measurement.http_body = row.get("http_body");
        measurement.icmp_packets_out = row
            .get::<Option<i64>, _>("icmp_packets_out")
            .map(|n| n as u32);
        measurement.icmp_packets_in = row
            .get::<Option<i64>, _>("icmp_packets_in")
            .map(|n| n as u32);
        measurement.icmp_rtt_min = row.get("icmp_rtt_min");
        measurement.icmp_rtt_avg = row.get("icmp_rtt_avg");
        measurement.icmp_rtt_max = row.get("icmp_rtt_max");
        measurement.exit_code = row.get::<Option<i64>, _>("exit_code").map(|c| c as i32);
        measurement.stdout = row.get("stdout");
        measurement.stderr = row.get("stderr");

        Ok(measurement)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip_all, fields(monitor = %monitor.name))]
    async fn insert_monitor(&self, monitor: &Monitor) -> StorageResult<i64> {
        if let Some(id) = monitor.id {
            return Err(StorageError::AlreadyPersisted(id));
        }

        let settings = serde_json::to_string(&monitor.kind)?;
        let event_hook = monitor
            .event_hook
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO monitors (
                name, active, interval_secs, timeout_secs, kind, settings,
                event_hook, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&monitor.name)
        .bind(monitor.active)
        .bind(monitor.interval as i64)
        .bind(monitor.timeout as i64)
        .bind(monitor.kind.as_str())
        .bind(settings)
        .bind(event_hook)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("inserted monitor {id}");
        Ok(id)
    }

    #[instrument(skip_all, fields(monitor = %monitor.name))]
    async fn update_monitor(&self, monitor: &Monitor) -> StorageResult<()> {
        let id = monitor.id.ok_or(StorageError::MissingIdentity)?;

        let settings = serde_json::to_string(&monitor.kind)?;
        let event_hook = monitor
            .event_hook
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE monitors SET
                name = ?, active = ?, interval_secs = ?, timeout_secs = ?,
                kind = ?, settings = ?, event_hook = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&monitor.name)
        .bind(monitor.active)
        .bind(monitor.interval as i64)
        .bind(monitor.timeout as i64)
        .bind(monitor.kind.as_str())
        .bind(settings)
        .bind(event_hook)
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::MonitorNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_monitor(&self, id: i64) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM monitors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::MonitorNotFound(id));
        }
        Ok(())
    }

    async fn select_monitor(&self, id: i64) -> StorageResult<Option<Monitor>> {
        let row = sqlx::query("SELECT * FROM monitors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::monitor_from_row).transpose()
    }

    async fn select_monitors(&self) -> StorageResult<Vec<Monitor>> {
        let rows = sqlx::query("SELECT * FROM monitors ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::monitor_from_row).collect()
    }

    #[instrument(skip_all, fields(monitor_id = measurement.monitor_id))]
    async fn insert_measurement(&self, measurement: &Measurement) -> StorageResult<i64> {
        let http_headers = measurement
            .http_headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Measurement and certificates go in atomically
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO measurements (
                monitor_id, recorded_at, duration_ms, state, state_hint,
                http_status_code, http_headers, http_body,
                icmp_packets_out, icmp_packets_in, icmp_rtt_min, icmp_rtt_avg, icmp_rtt_max,
                exit_code, stdout, stderr
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(measurement.monitor_id)
        .bind(measurement.recorded_at.timestamp_millis())
        .bind(measurement.duration() as i64)
        .bind(measurement.state().as_str())
        .bind(measurement.state_hint().map(|hint| hint.as_str()))
        .bind(measurement.http_status_code.map(i64::from))
        .bind(http_headers)
        .bind(&measurement.http_body)
        .bind(measurement.icmp_packets_out.map(i64::from))
        .bind(measurement.icmp_packets_in.map(i64::from))
        .bind(measurement.icmp_rtt_min)
        .bind(measurement.icmp_rtt_avg)
        .bind(measurement.icmp_rtt_max)
        .bind(measurement.exit_code.map(i64::from))
        .bind(&measurement.stdout)
        .bind(&measurement.stderr)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();

        for certificate in &measurement.certificates {
            sqlx::query(
                r#"
                INSERT INTO certificates (
                    measurement_id, serial, public_key_algorithm, issuer, subject,
                    not_before, not_after
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(&certificate.serial)
            .bind(&certificate.public_key_algorithm)
            .bind(&certificate.issuer)
            .bind(&certificate.subject)
            .bind(certificate.not_before.timestamp_millis())
            .bind(certificate.not_after.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(id)
    }

    #[instrument(skip(self))]
    async fn select_measurements(
        &self,
        monitor_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<Measurement>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM measurements
            WHERE monitor_id = ?
            ORDER BY recorded_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(monitor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let measurements: StorageResult<Vec<Measurement>> =
            rows.iter().map(Self::measurement_from_row).collect();

        let measurements = measurements?;
        debug!("query returned {} measurements", measurements.len());
        Ok(measurements)
    }

    async fn select_certificates(&self, measurement_id: i64) -> StorageResult<Vec<Certificate>> {
        let rows = sqlx::query(
            r#"
            SELECT serial, public_key_algorithm, issuer, subject, not_before, not_after
            FROM certificates
            WHERE measurement_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(measurement_id)
        .fetch_all(&self.pool)
        .await?;

        let certificates = rows
            .iter()
            .map(|row| Certificate {
                serial: row.get("serial"),
                public_key_algorithm: row.get("public_key_algorithm"),
                issuer: row.get("issuer"),
                subject: row.get("subject"),
                not_before: Self::millis_to_timestamp(row.get("not_before")),
                not_after: Self::millis_to_timestamp(row.get("not_after")),
            })
            .collect();

        Ok(certificates)
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing SQLite connection pool");
        self.pool.close().await;
        Ok(())
    }
}
