//! In-process [`ReadingStore`].
//!
//! Keeps the same contract as the PostgreSQL store: selection is a
//! snapshot taken under one lock and a commit is applied all-or-nothing.

use crate::errors::{Error, Result};
use crate::model::{
    Alert, AlertReadingRow, AlertState, Device, DeviceHealth, DeviceReading, ReadingValues,
};
use crate::store::ReadingStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    devices: BTreeSet<String>,
    readings: Vec<DeviceReading>,
    alerts: Vec<Alert>,
    next_reading_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_next_commit: AtomicBool,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, serial_number: &str) {
        self.inner.lock().devices.insert(serial_number.to_string());
    }

    /// Append a reading for `serial_number`, registering the device if
    /// needed. Returns the new reading id.
    pub fn record_reading(
        &self,
        serial_number: &str,
        values: ReadingValues,
        health: DeviceHealth,
        recorded_at: DateTime<Utc>,
    ) -> i64 {
        let mut inner = self.inner.lock();
        inner.devices.insert(serial_number.to_string());
        inner.next_reading_id += 1;
        let device_reading_id = inner.next_reading_id;
        inner.readings.push(DeviceReading {
            device_reading_id,
            device_serial_number: serial_number.to_string(),
            values,
            health,
            recorded_date_time_utc: recorded_at,
            processed_on_date_time_utc: None,
        });
        device_reading_id
    }

    pub fn insert_alert(&self, alert: Alert) {
        let mut inner = self.inner.lock();
        inner.devices.insert(alert.device_serial_number.clone());
        inner.alerts.push(alert);
    }

    pub fn readings(&self, serial_number: &str) -> Vec<DeviceReading> {
        self.inner
            .lock()
            .readings
            .iter()
            .filter(|r| r.device_serial_number == serial_number)
            .cloned()
            .collect()
    }

    pub fn alerts(&self, serial_number: &str) -> Vec<Alert> {
        self.inner
            .lock()
            .alerts
            .iter()
            .filter(|a| a.device_serial_number == serial_number)
            .cloned()
            .collect()
    }

    /// Make the next commit fail with a database error, leaving the store
    /// untouched.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn devices_with_unprocessed_readings(&self, batch_size: usize) -> Result<Vec<Device>> {
        let inner = self.inner.lock();

        let devices = inner
            .devices
            .iter()
            .filter(|serial| {
                inner
                    .readings
                    .iter()
                    .any(|r| &r.device_serial_number == *serial && !r.is_processed())
            })
            .take(batch_size)
            .map(|serial| Device {
                readings: inner
                    .readings
                    .iter()
                    .filter(|r| &r.device_serial_number == serial && !r.is_processed())
                    .cloned()
                    .collect(),
                alerts: inner
                    .alerts
                    .iter()
                    .filter(|a| &a.device_serial_number == serial)
                    .cloned()
                    .collect(),
                ..Device::new(serial.as_str())
            })
            .collect();

        Ok(devices)
    }

    async fn commit(&self, devices: &[Device], cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }

        let mut inner = self.inner.lock();
        for device in devices {
            // state belongs to the alert's owner; only the extension is applied
            for alert in device.touched_alerts() {
                match inner.alerts.iter().position(|a| a.alert_id == alert.alert_id) {
                    Some(idx) => {
                        let stored = &mut inner.alerts[idx];
                        stored.last_reported_date_time_utc = alert.last_reported_date_time_utc;
                        stored.message = alert.message.clone();
                    }
                    None => inner.alerts.push(alert.clone()),
                }
            }

            for reading in &device.readings {
                let Some(processed_on) = reading.processed_on_date_time_utc else {
                    continue;
                };
                if let Some(stored) = inner
                    .readings
                    .iter_mut()
                    .find(|r| r.device_reading_id == reading.device_reading_id)
                {
                    // processed-marker is write-once
                    stored.processed_on_date_time_utc.get_or_insert(processed_on);
                }
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} devices to memory store", devices.len());
        Ok(())
    }

    fn alert_readings<'a>(
        &'a self,
        serial_number: &'a str,
        state: Option<AlertState>,
    ) -> BoxStream<'a, Result<AlertReadingRow>> {
        let inner = self.inner.lock();

        let readings: Vec<ReadingValues> = inner
            .readings
            .iter()
            .filter(|r| r.device_serial_number == serial_number)
            .map(|r| r.values)
            .collect();

        let mut rows = Vec::new();
        for alert in inner.alerts.iter().filter(|a| {
            a.device_serial_number == serial_number && state.map_or(true, |s| a.alert_state == s)
        }) {
            if readings.is_empty() {
                rows.push(AlertReadingRow {
                    alert: alert.clone(),
                    reading: None,
                });
            }
            for values in &readings {
                rows.push(AlertReadingRow {
                    alert: alert.clone(),
                    reading: Some(*values),
                });
            }
        }

        stream::iter(rows.into_iter().map(Ok)).boxed()
    }
}
