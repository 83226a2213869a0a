//! Runtime configuration for the monitor service.
//!
//! Values come from environment variables (a `.env` file is honoured by the
//! binary). Everything is validated here, so a bad threshold or batch size
//! stops the service at startup instead of surfacing per reading.

use crate::errors::{Error, Result};
use std::env;
use std::str::FromStr;
use tracing::info;

/// Inclusive `[min, max]` bound for one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorRange {
    pub min: f64,
    pub max: f64,
}

impl SensorRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(Error::Config(format!("{} bounds must be finite", name)));
        }
        if self.min > self.max {
            return Err(Error::Config(format!(
                "{} min {} is greater than max {}",
                name, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Sensor-specific bounds used by the alert evaluator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorThresholds {
    pub temperature: SensorRange,
    pub carbon_monoxide: SensorRange,
    pub carbon_monoxide_dangerous: f64,
    pub humidity: SensorRange,
}

impl Default for SensorThresholds {
    fn default() -> Self {
        Self {
            temperature: SensorRange::new(-30.0, 100.0),
            carbon_monoxide: SensorRange::new(0.0, 100.0),
            carbon_monoxide_dangerous: 9.0,
            humidity: SensorRange::new(0.0, 100.0),
        }
    }
}

impl SensorThresholds {
    pub fn validate(&self) -> Result<()> {
        self.temperature.validate("temperature")?;
        self.carbon_monoxide.validate("carbon monoxide")?;
        self.humidity.validate("humidity")?;

        if !self.carbon_monoxide.contains(self.carbon_monoxide_dangerous) {
            return Err(Error::Config(format!(
                "dangerous carbon monoxide level {} outside of sensor range [{}, {}]",
                self.carbon_monoxide_dangerous, self.carbon_monoxide.min, self.carbon_monoxide.max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobConfig {
    pub batch_size: usize,
    pub interval_ms: u64,
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("JOB_BATCH_SIZE must be at least 1".to_string()));
        }
        if self.interval_ms == 0 {
            return Err(Error::Config("JOB_INTERVAL_MS must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub http_addr: String,
    pub db_pool_max: u32,
    pub job: JobConfig,
    pub thresholds: SensorThresholds,
}

impl Config {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| Error::Config("DATABASE_URL must be set".to_string()))?;
        let http_addr = env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let db_pool_max = parse_env("DB_POOL_MAX", 20)?;

        let defaults = JobConfig::default();
        let job = JobConfig {
            batch_size: parse_env("JOB_BATCH_SIZE", defaults.batch_size)?,
            interval_ms: parse_env("JOB_INTERVAL_MS", defaults.interval_ms)?,
        };

        let defaults = SensorThresholds::default();
        let thresholds = SensorThresholds {
            temperature: SensorRange::new(
                parse_env("SENSOR_TEMP_MIN", defaults.temperature.min)?,
                parse_env("SENSOR_TEMP_MAX", defaults.temperature.max)?,
            ),
            carbon_monoxide: SensorRange::new(
                parse_env("SENSOR_CO_MIN", defaults.carbon_monoxide.min)?,
                parse_env("SENSOR_CO_MAX", defaults.carbon_monoxide.max)?,
            ),
            carbon_monoxide_dangerous: parse_env(
                "SENSOR_CO_DANGEROUS",
                defaults.carbon_monoxide_dangerous,
            )?,
            humidity: SensorRange::new(
                parse_env("SENSOR_HUMIDITY_MIN", defaults.humidity.min)?,
                parse_env("SENSOR_HUMIDITY_MAX", defaults.humidity.max)?,
            ),
        };

        let config = Config {
            database_url,
            http_addr,
            db_pool_max,
            job,
            thresholds,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_pool_max == 0 {
            return Err(Error::Config("DB_POOL_MAX must be at least 1".to_string()));
        }
        self.job.validate()?;
        self.thresholds.validate()
    }

    pub fn log_config(&self) {
        info!("Database: {}", mask_password(&self.database_url));
        info!("HTTP server: {}", self.http_addr);
        info!("DB pool max: {}", self.db_pool_max);
        info!(
            "Job: batch_size={}, interval_ms={}",
            self.job.batch_size, self.job.interval_ms
        );
        info!("Sensor thresholds: {:?}", self.thresholds);
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", name, raw, e)))
}

fn mask_password(url: &str) -> String {
    let Some(at_pos) = url.rfind('@') else {
        return url.to_string();
    };
    match url[..at_pos].rfind(':') {
        // skip the scheme colon when there is no password
        Some(colon_pos) if url[..colon_pos].contains("//") => {
            format!("{}:****{}", &url[..colon_pos], &url[at_pos..])
        }
        _ => url.to_string(),
    }
}
