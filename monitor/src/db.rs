use crate::errors::{Error, Result};
use crate::model::{
    Alert, AlertReadingRow, AlertState, AlertType, Device, DeviceReading, ReadingValues,
};
use crate::store::ReadingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ReadingRecord {
    device_reading_id: i64,
    device_serial_number: String,
    temperature: f64,
    carbon_monoxide: f64,
    humidity: f64,
    health: String,
    recorded_date_time_utc: DateTime<Utc>,
    processed_on_date_time_utc: Option<DateTime<Utc>>,
}

impl TryFrom<ReadingRecord> for DeviceReading {
    type Error = Error;

    fn try_from(record: ReadingRecord) -> Result<Self> {
        Ok(DeviceReading {
            device_reading_id: record.device_reading_id,
            device_serial_number: record.device_serial_number,
            values: ReadingValues {
                temperature: record.temperature,
                carbon_monoxide: record.carbon_monoxide,
                humidity: record.humidity,
            },
            health: record.health.parse()?,
            recorded_date_time_utc: record.recorded_date_time_utc,
            processed_on_date_time_utc: record.processed_on_date_time_utc,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AlertRecord {
    alert_id: Uuid,
    device_serial_number: String,
    alert_type: String,
    alert_state: String,
    created_date_time_utc: DateTime<Utc>,
    reported_date_time_utc: DateTime<Utc>,
    last_reported_date_time_utc: DateTime<Utc>,
    message: String,
}

impl TryFrom<AlertRecord> for Alert {
    type Error = Error;

    fn try_from(record: AlertRecord) -> Result<Self> {
        let alert_type = record.alert_type.parse().unwrap_or_else(|_| {
            warn!(
                "Alert {} has unrecognised type '{}'",
                record.alert_id, record.alert_type
            );
            AlertType::Unknown
        });

        Ok(Alert {
            alert_id: record.alert_id,
            device_serial_number: record.device_serial_number,
            alert_type,
            alert_state: record.alert_state.parse()?,
            created_date_time_utc: record.created_date_time_utc,
            reported_date_time_utc: record.reported_date_time_utc,
            last_reported_date_time_utc: record.last_reported_date_time_utc,
            message: record.message,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AlertReadingRecord {
    #[sqlx(flatten)]
    alert: AlertRecord,
    temperature: Option<f64>,
    carbon_monoxide: Option<f64>,
    humidity: Option<f64>,
}

impl TryFrom<AlertReadingRecord> for AlertReadingRow {
    type Error = Error;

    fn try_from(record: AlertReadingRecord) -> Result<Self> {
        let reading = match (record.temperature, record.carbon_monoxide, record.humidity) {
            (Some(temperature), Some(carbon_monoxide), Some(humidity)) => Some(ReadingValues {
                temperature,
                carbon_monoxide,
                humidity,
            }),
            _ => None,
        };

        Ok(AlertReadingRow {
            alert: record.alert.try_into()?,
            reading,
        })
    }
}

/// Group selected rows by device, keeping the serial order of `serials`.
/// Rows that fail to decode are logged and left out so one bad row cannot
/// stall the whole fleet.
fn assemble_batch(
    serials: Vec<String>,
    readings: Vec<ReadingRecord>,
    alerts: Vec<AlertRecord>,
) -> Vec<Device> {
    let mut devices: Vec<Device> = serials.into_iter().map(Device::new).collect();
    let index: HashMap<String, usize> = devices
        .iter()
        .enumerate()
        .map(|(i, d)| (d.serial_number.clone(), i))
        .collect();

    for record in readings {
        let id = record.device_reading_id;
        match DeviceReading::try_from(record) {
            Ok(reading) => {
                if let Some(&i) = index.get(&reading.device_serial_number) {
                    devices[i].readings.push(reading);
                }
            }
            Err(e) => warn!("Skipping reading {}: {}", id, e),
        }
    }
    for record in alerts {
        let id = record.alert_id;
        match Alert::try_from(record) {
            Ok(alert) => {
                if let Some(&i) = index.get(&alert.device_serial_number) {
                    devices[i].alerts.push(alert);
                }
            }
            Err(e) => warn!("Skipping alert {}: {}", id, e),
        }
    }

    devices
}

const SELECT_BATCH_SERIALS: &str = r#"
    SELECT d.serial_number
    FROM devices d
    WHERE EXISTS (
        SELECT 1 FROM device_readings r
        WHERE r.device_serial_number = d.serial_number
          AND r.processed_on_date_time_utc IS NULL
    )
    ORDER BY d.serial_number COLLATE "C"
    LIMIT $1
    "#;

const SELECT_UNPROCESSED_READINGS: &str = r#"
    SELECT device_reading_id, device_serial_number, temperature, carbon_monoxide,
           humidity, health, recorded_date_time_utc, processed_on_date_time_utc
    FROM device_readings
    WHERE device_serial_number = ANY($1)
      AND processed_on_date_time_utc IS NULL
    ORDER BY device_reading_id
    "#;

const SELECT_ALERTS: &str = r#"
    SELECT alert_id, device_serial_number, alert_type, alert_state, created_date_time_utc,
           reported_date_time_utc, last_reported_date_time_utc, message
    FROM alerts
    WHERE device_serial_number = ANY($1)
    ORDER BY created_date_time_utc, alert_id
    "#;

const UPSERT_ALERTS: &str = r#"
    INSERT INTO alerts (
        alert_id, device_serial_number, alert_type, alert_state, created_date_time_utc,
        reported_date_time_utc, last_reported_date_time_utc, message
    )
    SELECT * FROM UNNEST(
        $1::uuid[], $2::text[], $3::text[], $4::text[],
        $5::timestamptz[], $6::timestamptz[], $7::timestamptz[], $8::text[]
    )
    ON CONFLICT (alert_id) DO UPDATE SET
        last_reported_date_time_utc = EXCLUDED.last_reported_date_time_utc,
        message = EXCLUDED.message
    "#;

const MARK_READINGS_PROCESSED: &str = r#"
    UPDATE device_readings AS r
    SET processed_on_date_time_utc = u.processed_on
    FROM UNNEST($1::bigint[], $2::timestamptz[]) AS u(device_reading_id, processed_on)
    WHERE r.device_reading_id = u.device_reading_id
      AND r.processed_on_date_time_utc IS NULL
    "#;

// Alerts join the device's whole reading history, not only readings
// captured while the alert was open.
const SELECT_ALERT_READINGS: &str = r#"
    SELECT a.alert_id, a.device_serial_number, a.alert_type, a.alert_state,
           a.created_date_time_utc, a.reported_date_time_utc,
           a.last_reported_date_time_utc, a.message,
           r.temperature, r.carbon_monoxide, r.humidity
    FROM alerts a
    LEFT JOIN device_readings r ON r.device_serial_number = a.device_serial_number
    WHERE a.device_serial_number = $1
      AND ($2::text IS NULL OR a.alert_state = $2)
    ORDER BY a.alert_id
    "#;

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn devices_with_unprocessed_readings(&self, batch_size: usize) -> Result<Vec<Device>> {
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let serials: Vec<String> = sqlx::query_scalar(SELECT_BATCH_SERIALS)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;

        if serials.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let readings: Vec<ReadingRecord> = sqlx::query_as(SELECT_UNPROCESSED_READINGS)
            .bind(&serials)
            .fetch_all(&mut *tx)
            .await?;
        let alerts: Vec<AlertRecord> = sqlx::query_as(SELECT_ALERTS)
            .bind(&serials)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let devices = assemble_batch(serials, readings, alerts);
        debug!("Selected {} devices with unprocessed readings", devices.len());
        Ok(devices)
    }

    async fn commit(&self, devices: &[Device], cancel: &CancellationToken) -> Result<()> {
        let alerts: Vec<&Alert> = devices.iter().flat_map(|d| d.touched_alerts()).collect();
        let processed: Vec<(i64, DateTime<Utc>)> = devices
            .iter()
            .flat_map(|d| d.readings.iter())
            .filter_map(|r| {
                r.processed_on_date_time_utc
                    .map(|ts| (r.device_reading_id, ts))
            })
            .collect();

        let mut tx = self.pool.begin().await?;

        if !alerts.is_empty() {
            let alert_ids: Vec<Uuid> = alerts.iter().map(|a| a.alert_id).collect();
            let serials: Vec<&str> = alerts.iter().map(|a| a.device_serial_number.as_str()).collect();
            let types: Vec<&str> = alerts.iter().map(|a| a.alert_type.as_str()).collect();
            let states: Vec<&str> = alerts.iter().map(|a| a.alert_state.as_str()).collect();
            let created: Vec<DateTime<Utc>> = alerts.iter().map(|a| a.created_date_time_utc).collect();
            let reported: Vec<DateTime<Utc>> = alerts.iter().map(|a| a.reported_date_time_utc).collect();
            let last_reported: Vec<DateTime<Utc>> =
                alerts.iter().map(|a| a.last_reported_date_time_utc).collect();
            let messages: Vec<&str> = alerts.iter().map(|a| a.message.as_str()).collect();

            sqlx::query(UPSERT_ALERTS)
                .bind(&alert_ids)
                .bind(&serials)
                .bind(&types)
                .bind(&states)
                .bind(&created)
                .bind(&reported)
                .bind(&last_reported)
                .bind(&messages)
                .execute(&mut *tx)
                .await?;
        }

        if !processed.is_empty() {
            let (ids, timestamps): (Vec<i64>, Vec<DateTime<Utc>>) = processed.into_iter().unzip();

            let result = sqlx::query(MARK_READINGS_PROCESSED)
                .bind(&ids)
                .bind(&timestamps)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() != ids.len() as u64 {
                warn!(
                    "Marked {} of {} readings processed; the rest were already processed",
                    result.rows_affected(),
                    ids.len()
                );
            }
        }

        if cancel.is_cancelled() {
            tx.rollback().await?;
            return Err(Error::Canceled);
        }

        tx.commit().await?;
        Ok(())
    }

    fn alert_readings<'a>(
        &'a self,
        serial_number: &'a str,
        state: Option<AlertState>,
    ) -> BoxStream<'a, Result<AlertReadingRow>> {
        sqlx::query_as::<_, AlertReadingRecord>(SELECT_ALERT_READINGS)
            .bind(serial_number)
            .bind(state.map(|s| s.as_str()))
            .fetch(&self.pool)
            .map(|record| record.map_err(Error::from).and_then(AlertReadingRow::try_from))
            .boxed()
    }
}
