use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref JOB_RUNS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_job_runs_total",
        "Total reading processor invocations that started"
    ))
    .unwrap();
    pub static ref JOB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_job_failures_total",
        "Total reading processor invocations that faulted"
    ))
    .unwrap();
    pub static ref JOB_SKIPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_job_skipped_total",
        "Invocations dropped because a previous one was still running"
    ))
    .unwrap();
    pub static ref READINGS_PROCESSED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_readings_processed_total",
        "Total readings marked processed by committed invocations"
    ))
    .unwrap();
    pub static ref ALERTS_RAISED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "monitor_alerts_raised_total",
        "Total new alerts raised by committed invocations"
    ))
    .unwrap();
    pub static ref BATCH_DEVICES: Gauge = Gauge::with_opts(Opts::new(
        "monitor_batch_devices",
        "Devices selected by the current invocation"
    ))
    .unwrap();
    pub static ref JOB_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_job_latency_seconds",
            "Time taken by one reading processor invocation"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref REPORT_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "monitor_report_latency_seconds",
            "Time taken to compute the alert reports of one device"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(JOB_RUNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(JOB_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_PROCESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ALERTS_RAISED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCH_DEVICES.clone()))?;
    REGISTRY.register(Box::new(JOB_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(REPORT_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
