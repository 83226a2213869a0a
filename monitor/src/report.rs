//! Alert reports: per-alert min/max of the sensor the alert is about.
//!
//! Every alert of a device is paired with every reading ever recorded for
//! that device, so the extremes cover the whole reading history rather than
//! only the time the alert was open.

use crate::errors::{Error, Result};
use crate::metrics::REPORT_LATENCY_SECONDS;
use crate::model::{Alert, AlertReport, AlertState, AlertType, ReadingValues};
use crate::store::ReadingStore;
use futures::TryStreamExt;
use std::collections::HashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

type FieldSelector = fn(&ReadingValues) -> f64;

/// Which reading field each alert type summarizes. Types without an entry
/// report zero.
const FIELD_SELECTORS: &[(AlertType, FieldSelector)] = &[
    (AlertType::OutOfRangeTemp, |r| r.temperature),
    (AlertType::OutOfRangeCo, |r| r.carbon_monoxide),
    (AlertType::DangerousCoLevel, |r| r.carbon_monoxide),
    (AlertType::OutOfRangeHumidity, |r| r.humidity),
];

fn field_selector(alert_type: AlertType) -> Option<FieldSelector> {
    FIELD_SELECTORS
        .iter()
        .find(|(t, _)| *t == alert_type)
        .map(|(_, select)| *select)
}

/// Running extremes of one alert.
struct ReportBuilder {
    alert: Alert,
    selector: Option<FieldSelector>,
    min: Option<f64>,
    max: Option<f64>,
}

impl ReportBuilder {
    fn new(alert: Alert) -> Self {
        let selector = field_selector(alert.alert_type);
        Self {
            alert,
            selector,
            min: None,
            max: None,
        }
    }

    fn observe(&mut self, reading: &ReadingValues) {
        let Some(select) = self.selector else {
            return;
        };
        let value = select(reading);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn build(self) -> AlertReport {
        AlertReport {
            device_serial_number: self.alert.device_serial_number,
            alert_type: self.alert.alert_type,
            alert_state: self.alert.alert_state,
            created_date_time_utc: self.alert.created_date_time_utc,
            reported_date_time_utc: self.alert.reported_date_time_utc,
            last_reported_date_time_utc: self.alert.last_reported_date_time_utc,
            message: self.alert.message,
            min_value: self.min.unwrap_or(0.0),
            max_value: self.max.unwrap_or(0.0),
        }
    }
}

/// Compute the alert reports of one device, newest reported first.
///
/// `state` of `None` means every state. The underlying join is consumed as
/// a stream; `cancel` is checked between rows.
pub async fn compute_alert_reports(
    store: &dyn ReadingStore,
    serial_number: &str,
    state: Option<AlertState>,
    cancel: &CancellationToken,
) -> Result<Vec<AlertReport>> {
    let start = Instant::now();

    let mut builders: Vec<ReportBuilder> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut rows = store.alert_readings(serial_number, state);

    while let Some(row) = rows.try_next().await? {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let i = *index.entry(row.alert.alert_id).or_insert_with(|| {
            builders.push(ReportBuilder::new(row.alert.clone()));
            builders.len() - 1
        });
        if let Some(reading) = &row.reading {
            builders[i].observe(reading);
        }
    }

    let mut reports: Vec<AlertReport> = builders.into_iter().map(ReportBuilder::build).collect();
    reports.sort_by(|a, b| b.reported_date_time_utc.cmp(&a.reported_date_time_utc));

    REPORT_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
    debug!(
        "Computed {} alert reports for device {}",
        reports.len(),
        serial_number
    );
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::model::DeviceHealth;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rand::seq::SliceRandom;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    fn values(temperature: f64, carbon_monoxide: f64, humidity: f64) -> ReadingValues {
        ReadingValues {
            temperature,
            carbon_monoxide,
            humidity,
        }
    }

    fn alert_at(alert_type: AlertType, state: AlertState, reported: DateTime<Utc>) -> Alert {
        let mut alert = Alert::raise("dev-1", alert_type, format!("{}", alert_type), reported);
        alert.alert_state = state;
        alert
    }

    async fn reports(store: &MemoryStore, state: Option<AlertState>) -> Vec<AlertReport> {
        compute_alert_reports(store, "dev-1", state, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_temperature_extremes_ignore_insertion_order() {
        let mut temperatures = vec![18.0, 22.5, 15.0];
        temperatures.shuffle(&mut rand::thread_rng());

        let store = MemoryStore::new();
        for t in temperatures {
            store.record_reading("dev-1", values(t, 1.0, 40.0), DeviceHealth::Ok, t0());
        }
        store.insert_alert(alert_at(AlertType::OutOfRangeTemp, AlertState::New, t0()));

        let reports = reports(&store, None).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].min_value, 15.0);
        assert_eq!(reports[0].max_value, 22.5);
    }

    #[tokio::test]
    async fn test_alert_type_selects_reading_field() {
        let store = MemoryStore::new();
        store.record_reading("dev-1", values(20.0, 5.0, 30.0), DeviceHealth::Ok, t0());
        store.record_reading("dev-1", values(25.0, 12.0, 60.0), DeviceHealth::Ok, t0());
        store.insert_alert(alert_at(AlertType::OutOfRangeCo, AlertState::New, t0()));
        store.insert_alert(alert_at(
            AlertType::DangerousCoLevel,
            AlertState::New,
            t0() + Duration::minutes(1),
        ));
        store.insert_alert(alert_at(
            AlertType::OutOfRangeHumidity,
            AlertState::New,
            t0() + Duration::minutes(2),
        ));

        let reports = reports(&store, None).await;
        let by_type = |t: AlertType| reports.iter().find(|r| r.alert_type == t).unwrap();

        assert_eq!(by_type(AlertType::OutOfRangeCo).min_value, 5.0);
        assert_eq!(by_type(AlertType::OutOfRangeCo).max_value, 12.0);
        assert_eq!(by_type(AlertType::DangerousCoLevel).max_value, 12.0);
        assert_eq!(by_type(AlertType::OutOfRangeHumidity).min_value, 30.0);
        assert_eq!(by_type(AlertType::OutOfRangeHumidity).max_value, 60.0);
    }

    #[tokio::test]
    async fn test_device_without_readings_reports_zero() {
        let store = MemoryStore::new();
        store.insert_alert(alert_at(AlertType::OutOfRangeTemp, AlertState::New, t0()));

        let reports = reports(&store, None).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].min_value, 0.0);
        assert_eq!(reports[0].max_value, 0.0);
    }

    #[tokio::test]
    async fn test_types_without_selector_report_zero_without_failing_others() {
        let store = MemoryStore::new();
        store.record_reading("dev-1", values(30.0, 1.0, 40.0), DeviceHealth::NeedsService, t0());
        store.insert_alert(alert_at(AlertType::PoorHealth, AlertState::New, t0()));
        store.insert_alert(alert_at(
            AlertType::Unknown,
            AlertState::New,
            t0() + Duration::minutes(1),
        ));
        store.insert_alert(alert_at(
            AlertType::OutOfRangeTemp,
            AlertState::New,
            t0() + Duration::minutes(2),
        ));

        let reports = reports(&store, None).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].alert_type, AlertType::OutOfRangeTemp);
        assert_eq!(reports[0].max_value, 30.0);
        for report in &reports[1..] {
            assert_eq!(report.min_value, 0.0);
            assert_eq!(report.max_value, 0.0);
        }
    }

    #[tokio::test]
    async fn test_state_filter_and_newest_first_ordering() {
        let store = MemoryStore::new();
        let (t1, t2, t3) = (t0(), t0() + Duration::hours(1), t0() + Duration::hours(2));
        store.insert_alert(alert_at(AlertType::OutOfRangeTemp, AlertState::Reported, t2));
        store.insert_alert(alert_at(AlertType::OutOfRangeCo, AlertState::Reported, t1));
        store.insert_alert(alert_at(AlertType::OutOfRangeHumidity, AlertState::New, t3));
        store.insert_alert(alert_at(AlertType::DangerousCoLevel, AlertState::Reported, t3));

        let reports = reports(&store, Some(AlertState::Reported)).await;
        let reported: Vec<DateTime<Utc>> =
            reports.iter().map(|r| r.reported_date_time_utc).collect();

        assert_eq!(reported, vec![t3, t2, t1]);
        assert!(reports.iter().all(|r| r.alert_state == AlertState::Reported));
    }

    #[tokio::test]
    async fn test_other_devices_are_not_included() {
        let store = MemoryStore::new();
        store.record_reading("dev-2", values(99.0, 1.0, 40.0), DeviceHealth::Ok, t0());
        store.insert_alert(alert_at(AlertType::OutOfRangeTemp, AlertState::New, t0()));
        let mut foreign = alert_at(AlertType::OutOfRangeTemp, AlertState::New, t0());
        foreign.device_serial_number = "dev-2".to_string();
        store.insert_alert(foreign);

        let reports = reports(&store, None).await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].device_serial_number, "dev-1");
        assert_eq!(reports[0].max_value, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_device_yields_empty_report() {
        let store = MemoryStore::new();

        assert!(reports(&store, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_canceled_report_returns_error() {
        let store = MemoryStore::new();
        store.record_reading("dev-1", values(20.0, 1.0, 40.0), DeviceHealth::Ok, t0());
        store.insert_alert(alert_at(AlertType::OutOfRangeTemp, AlertState::New, t0()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = compute_alert_reports(&store, "dev-1", None, &cancel).await;

        assert!(matches!(result, Err(Error::Canceled)));
    }
}
