use crate::config::{SensorRange, SensorThresholds};
use crate::model::{Alert, AlertType, Device, DeviceHealth, DeviceReading};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Outcome of evaluating one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub readings: usize,
    pub alerts_raised: usize,
    pub alerts_extended: usize,
}

/// Turns unprocessed readings into alert state.
///
/// Works purely in memory: the device's alerts and the processed-markers
/// of its readings are updated in place, persistence is left to the caller.
#[derive(Debug, Clone)]
pub struct Processor {
    thresholds: SensorThresholds,
}

impl Processor {
    /// `thresholds` are expected to be validated already.
    pub fn new(thresholds: SensorThresholds) -> Self {
        Self { thresholds }
    }

    pub fn handle(&self, device: &mut Device, now: DateTime<Utc>) -> ProcessSummary {
        let mut summary = ProcessSummary::default();

        for reading in device.readings.iter_mut() {
            if reading.is_processed() {
                continue;
            }

            for (alert_type, message) in self.violations(reading) {
                let open = device
                    .alerts
                    .iter_mut()
                    .find(|a| a.alert_type == alert_type && a.is_open());

                match open {
                    Some(alert) => {
                        alert.last_reported_date_time_utc = now;
                        alert.message = message;
                        device.touched.insert(alert.alert_id);
                        summary.alerts_extended += 1;
                    }
                    None => {
                        let alert = Alert::raise(
                            device.serial_number.as_str(),
                            alert_type,
                            message,
                            now,
                        );
                        device.touched.insert(alert.alert_id);
                        device.alerts.push(alert);
                        summary.alerts_raised += 1;
                    }
                }
            }

            reading.processed_on_date_time_utc = Some(now);
            summary.readings += 1;
        }

        debug!(
            "Device {}: {} readings, {} alerts raised, {} extended",
            device.serial_number, summary.readings, summary.alerts_raised, summary.alerts_extended
        );
        summary
    }

    /// Alert conditions present in a single reading.
    pub fn violations(&self, reading: &DeviceReading) -> Vec<(AlertType, String)> {
        let t = &self.thresholds;
        let values = &reading.values;
        let mut found = Vec::new();

        if let Some(message) = out_of_range("temperature", values.temperature, &t.temperature) {
            found.push((AlertType::OutOfRangeTemp, message));
        }

        if let Some(message) =
            out_of_range("carbon monoxide", values.carbon_monoxide, &t.carbon_monoxide)
        {
            found.push((AlertType::OutOfRangeCo, message));
        } else if values.carbon_monoxide >= t.carbon_monoxide_dangerous {
            found.push((
                AlertType::DangerousCoLevel,
                format!(
                    "Sensor carbon monoxide {} ppm at or above dangerous level {} ppm",
                    values.carbon_monoxide, t.carbon_monoxide_dangerous
                ),
            ));
        }

        if let Some(message) = out_of_range("humidity", values.humidity, &t.humidity) {
            found.push((AlertType::OutOfRangeHumidity, message));
        }

        if reading.health != DeviceHealth::Ok {
            found.push((
                AlertType::PoorHealth,
                format!("Device reports health {}", reading.health),
            ));
        }

        found
    }
}

fn out_of_range(name: &str, value: f64, range: &SensorRange) -> Option<String> {
    if range.contains(value) {
        return None;
    }
    Some(format!(
        "Sensor {} {} out of range [{}, {}]",
        name, value, range.min, range.max
    ))
}
