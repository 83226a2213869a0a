use crate::errors::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Climate-control unit with the readings and alerts loaded for it.
///
/// `touched` holds the ids of alerts raised or extended since the device
/// was loaded; only those are written back on commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub serial_number: String,
    pub readings: Vec<DeviceReading>,
    pub alerts: Vec<Alert>,
    pub touched: BTreeSet<Uuid>,
}

impl Device {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            readings: Vec::new(),
            alerts: Vec::new(),
            touched: BTreeSet::new(),
        }
    }

    pub fn touched_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts
            .iter()
            .filter(move |a| self.touched.contains(&a.alert_id))
    }
}

/// Sensor values captured by a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReadingValues {
    pub temperature: f64,
    pub carbon_monoxide: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub device_reading_id: i64,
    pub device_serial_number: String,
    pub values: ReadingValues,
    pub health: DeviceHealth,
    pub recorded_date_time_utc: DateTime<Utc>,
    pub processed_on_date_time_utc: Option<DateTime<Utc>>,
}

impl DeviceReading {
    pub fn is_processed(&self) -> bool {
        self.processed_on_date_time_utc.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceHealth {
    Ok,
    NeedsFilter,
    NeedsService,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertType {
    OutOfRangeTemp,
    OutOfRangeCo,
    OutOfRangeHumidity,
    DangerousCoLevel,
    PoorHealth,
    /// Stored type this build does not know about.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertState {
    New,
    Reported,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub device_serial_number: String,
    pub alert_type: AlertType,
    pub alert_state: AlertState,
    pub created_date_time_utc: DateTime<Utc>,
    pub reported_date_time_utc: DateTime<Utc>,
    pub last_reported_date_time_utc: DateTime<Utc>,
    pub message: String,
}

impl Alert {
    /// A freshly raised alert; all three timestamps start at `now`.
    pub fn raise(
        device_serial_number: impl Into<String>,
        alert_type: AlertType,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            device_serial_number: device_serial_number.into(),
            alert_type,
            alert_state: AlertState::New,
            created_date_time_utc: now,
            reported_date_time_utc: now,
            last_reported_date_time_utc: now,
            message: message.into(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.alert_state != AlertState::Resolved
    }
}

/// One alert joined with one reading of the same device. `reading` is
/// `None` when the device has no readings at all.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertReadingRow {
    pub alert: Alert,
    pub reading: Option<ReadingValues>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReport {
    pub device_serial_number: String,
    pub alert_type: AlertType,
    pub alert_state: AlertState,
    pub created_date_time_utc: DateTime<Utc>,
    pub reported_date_time_utc: DateTime<Utc>,
    pub last_reported_date_time_utc: DateTime<Utc>,
    pub message: String,
    pub min_value: f64,
    pub max_value: f64,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReportResponse {
    pub data: Vec<AlertReport>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant),)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok($ty::$variant),)+
                    other => Err(Error::Decode(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(DeviceHealth { Ok, NeedsFilter, NeedsService });
text_enum!(AlertState { New, Reported, Resolved });
text_enum!(AlertType {
    OutOfRangeTemp,
    OutOfRangeCo,
    OutOfRangeHumidity,
    DangerousCoLevel,
    PoorHealth,
    Unknown,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_text_round_trip() {
        assert_eq!("DangerousCoLevel".parse::<AlertType>().unwrap(), AlertType::DangerousCoLevel);
        assert_eq!(AlertState::Reported.to_string(), "Reported");
        assert_eq!("NeedsFilter".parse::<DeviceHealth>().unwrap(), DeviceHealth::NeedsFilter);
        assert!("Exploded".parse::<AlertType>().is_err());
        assert!("reported".parse::<AlertState>().is_err());
    }

    #[test]
    fn test_raised_alert_is_open() {
        let now = Utc::now();
        let mut alert = Alert::raise("dev-1", AlertType::OutOfRangeTemp, "too hot", now);

        assert_eq!(alert.alert_state, AlertState::New);
        assert_eq!(alert.created_date_time_utc, now);
        assert_eq!(alert.last_reported_date_time_utc, now);
        assert!(alert.is_open());

        alert.alert_state = AlertState::Resolved;
        assert!(!alert.is_open());
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let now = Utc::now();
        let report = AlertReport {
            device_serial_number: "dev-1".to_string(),
            alert_type: AlertType::OutOfRangeHumidity,
            alert_state: AlertState::New,
            created_date_time_utc: now,
            reported_date_time_utc: now,
            last_reported_date_time_utc: now,
            message: "dry".to_string(),
            min_value: 1.5,
            max_value: 2.5,
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["deviceSerialNumber"], "dev-1");
        assert_eq!(json["alertType"], "OutOfRangeHumidity");
        assert_eq!(json["minValue"], 1.5);
        assert_eq!(json["maxValue"], 2.5);
    }
}
