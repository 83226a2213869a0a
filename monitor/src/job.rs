use crate::metrics::{
    ALERTS_RAISED_TOTAL, BATCH_DEVICES, JOB_FAILURES_TOTAL, JOB_LATENCY_SECONDS,
    JOB_RUNS_TOTAL, JOB_SKIPPED_TOTAL, READINGS_PROCESSED_TOTAL,
};
use crate::errors::Error;
use crate::processor::{ProcessSummary, Processor};
use crate::store::ReadingStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Idle,
    Running,
    Faulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum JobOutcome {
    /// Another invocation was running; this one was dropped.
    Skipped,
    NoWork,
    #[serde(rename_all = "camelCase")]
    Committed {
        devices: usize,
        readings: usize,
        alerts_raised: usize,
    },
    /// Shutdown was requested before the commit; nothing was persisted.
    Canceled,
    Faulted { error: String },
}

/// Finds devices with unprocessed readings, evaluates them and commits the
/// result in one transaction.
pub struct ReadingProcessorJob {
    store: Arc<dyn ReadingStore>,
    processor: Processor,
    batch_size: usize,
    running: Mutex<()>,
    state: watch::Sender<JobState>,
}

impl ReadingProcessorJob {
    pub fn new(store: Arc<dyn ReadingStore>, processor: Processor, batch_size: usize) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            store,
            processor,
            batch_size,
            running: Mutex::new(()),
            state,
        }
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// Run one invocation. Never overlaps with another invocation of the
    /// same job: a call made while one is running returns `Skipped`.
    pub async fn run_once(&self, cancel: &CancellationToken) -> JobOutcome {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("Reading processor still running, dropping invocation");
            JOB_SKIPPED_TOTAL.inc();
            return JobOutcome::Skipped;
        };

        self.state.send_replace(JobState::Running);
        JOB_RUNS_TOTAL.inc();
        let start = Instant::now();

        let outcome = self.execute(cancel).await;

        JOB_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        BATCH_DEVICES.set(0.0);

        let next = match &outcome {
            JobOutcome::Faulted { .. } => JobState::Faulted,
            _ => JobState::Idle,
        };
        self.state.send_replace(next);
        outcome
    }

    async fn execute(&self, cancel: &CancellationToken) -> JobOutcome {
        let mut devices = match self
            .store
            .devices_with_unprocessed_readings(self.batch_size)
            .await
        {
            Ok(devices) => devices,
            Err(e) => return self.fault("select batch", e),
        };

        if devices.is_empty() {
            debug!("No devices with unprocessed readings");
            return JobOutcome::NoWork;
        }

        BATCH_DEVICES.set(devices.len() as f64);
        debug!("Processing batch of {} devices", devices.len());

        let now = Utc::now();
        let mut total = ProcessSummary::default();
        for device in devices.iter_mut() {
            let summary = self.processor.handle(device, now);
            total.readings += summary.readings;
            total.alerts_raised += summary.alerts_raised;
            total.alerts_extended += summary.alerts_extended;
        }

        if cancel.is_cancelled() {
            info!("Reading processor canceled before commit, discarding batch");
            return JobOutcome::Canceled;
        }

        match self.store.commit(&devices, cancel).await {
            Ok(()) => {
                READINGS_PROCESSED_TOTAL.inc_by(total.readings as f64);
                ALERTS_RAISED_TOTAL.inc_by(total.alerts_raised as f64);
                info!(
                    "Committed {} devices: {} readings, {} alerts raised, {} extended",
                    devices.len(),
                    total.readings,
                    total.alerts_raised,
                    total.alerts_extended
                );
                JobOutcome::Committed {
                    devices: devices.len(),
                    readings: total.readings,
                    alerts_raised: total.alerts_raised,
                }
            }
            Err(Error::Canceled) => {
                info!("Reading processor canceled at commit, batch rolled back");
                JobOutcome::Canceled
            }
            Err(e) => self.fault("commit batch", e),
        }
    }

    fn fault(&self, step: &str, e: Error) -> JobOutcome {
        JOB_FAILURES_TOTAL.inc();
        if e.is_transient() {
            error!("Reading processor failed to {} (transient, retrying next tick): {}", step, e);
        } else {
            error!("Reading processor failed to {}: {}", step, e);
        }
        JobOutcome::Faulted {
            error: e.to_string(),
        }
    }
}

/// Invoke the job every `interval_ms` until `shutdown` fires. Ticks missed
/// while an invocation runs are skipped, not queued.
pub async fn run_scheduler(
    job: Arc<ReadingProcessorJob>,
    interval_ms: u64,
    shutdown: CancellationToken,
) {
    info!("Starting reading processor scheduler with interval_ms={}", interval_ms);

    let mut ticker = interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Shutdown requested, stopping scheduler");
                break;
            }

            _ = ticker.tick() => {
                let outcome = job.run_once(&shutdown).await;
                debug!("Reading processor outcome: {:?}", outcome);
            }
        }
    }

    info!("Scheduler stopped");
}
