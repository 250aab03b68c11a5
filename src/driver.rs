//! Periodic feedback loop driver.
//!
//! Each cycle:
//! 1. Replays write-backs queued by earlier failures
//! 2. Pulls all records from the gateway
//! 3. Processes only the most recent open record carrying feedback
//! 4. Every N cycles, sweeps old tone memory
//!
//! Cycles never overlap: a cycle that finds another one running is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::LoopError;
use crate::regen::controller::gateway_error;
use crate::regen::{FeedbackRecord, Outcome, RegenerationController};
use crate::retry::{RetryPolicy, retry_async};

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// No record needed work.
    Idle,
    /// One record was processed.
    Processed,
    /// Processing the selected record failed; isolated to that record.
    Failed,
    /// The gateway could not be read; retried next cycle.
    GatewayUnavailable,
    /// The cycle exceeded its time budget and was abandoned.
    TimedOut,
    /// Another cycle was still running.
    Overlapped,
}

/// Summary of one driver cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub status: CycleStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_seen: usize,
    pub decode_failures: usize,
    pub flushed_writes: usize,
    pub selected_record: Option<String>,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    /// Entries removed by this cycle's memory sweep, if one ran.
    pub cleaned_up: Option<usize>,
}

impl CycleReport {
    fn new(cycle: u64, status: CycleStatus) -> Self {
        let now = Utc::now();
        Self {
            cycle,
            status,
            started_at: now,
            finished_at: now,
            records_seen: 0,
            decode_failures: 0,
            flushed_writes: 0,
            selected_record: None,
            outcome: None,
            error: None,
            cleaned_up: None,
        }
    }
}

pub struct FeedbackLoopDriver {
    controller: Arc<RegenerationController>,
    gateway_policy: RetryPolicy,
    cycle_lock: Mutex<()>,
    cycles: AtomicU64,
    last_report: RwLock<Option<CycleReport>>,
}

impl FeedbackLoopDriver {
    pub fn new(controller: Arc<RegenerationController>) -> Self {
        let config = controller.config();
        let gateway_policy = RetryPolicy::new(config.gateway_attempts, config.gateway_timeout);
        Self {
            controller,
            gateway_policy,
            cycle_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
            last_report: RwLock::new(None),
        }
    }

    pub fn with_retry_base_delay(mut self, delay: std::time::Duration) -> Self {
        self.gateway_policy = self.gateway_policy.with_base_delay(delay);
        self
    }

    pub fn controller(&self) -> &Arc<RegenerationController> {
        &self.controller
    }

    /// Cycles started so far (overlapped ticks excluded).
    pub fn cycles_run(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Run one cycle. Never panics on a bad record or an unavailable gateway.
    pub async fn run_cycle(&self) -> CycleReport {
        let Ok(_running) = self.cycle_lock.try_lock() else {
            warn!("Previous cycle still running, skipping tick");
            return CycleReport::new(self.cycles_run(), CycleStatus::Overlapped);
        };

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let config = self.controller.config();
        let mut report = CycleReport::new(cycle, CycleStatus::Idle);

        if tokio::time::timeout(config.cycle_timeout, self.cycle_body(&mut report))
            .await
            .is_err()
        {
            error!(cycle, timeout = ?config.cycle_timeout, "Cycle timed out, abandoning");
            report.status = CycleStatus::TimedOut;
            report.error = Some(LoopError::CycleTimeout(config.cycle_timeout).to_string());
        }

        if cycle % config.cleanup_every_cycles == 0 {
            match self.controller.memory().cleanup(config.retention_days).await {
                Ok(removed) => report.cleaned_up = Some(removed),
                Err(e) => error!(cycle, error = %e, "Tone memory cleanup failed"),
            }
        }

        report.finished_at = Utc::now();
        info!(
            cycle,
            status = ?report.status,
            records = report.records_seen,
            selected = report.selected_record.as_deref().unwrap_or("-"),
            "Cycle complete"
        );
        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn cycle_body(&self, report: &mut CycleReport) {
        report.flushed_writes = self.controller.flush_pending_writes().await;

        let gateway = self.controller.gateway();
        let fetched = retry_async(&self.gateway_policy, "gateway.get_all_records", |_| {
            gateway.get_all_records()
        })
        .await;
        let raw = match fetched {
            Ok(records) => records,
            Err(e) => {
                let e = gateway_error("get_all_records", e);
                error!(error = %e, "Gateway unavailable, skipping cycle");
                report.status = CycleStatus::GatewayUnavailable;
                report.error = Some(e.to_string());
                return;
            }
        };
        report.records_seen = raw.len();

        let mut records = Vec::with_capacity(raw.len());
        for record in &raw {
            match FeedbackRecord::from_gateway(record) {
                Ok(r) => records.push(r),
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "Skipping undecodable record");
                    report.decode_failures += 1;
                }
            }
        }

        let Some(record) = select_most_recent(&records, |id| {
            self.controller.claims().is_claimed(id)
        }) else {
            debug!("No open record with feedback");
            return;
        };
        report.selected_record = Some(record.id.clone());

        match self.controller.process(record).await {
            Ok(outcome) => {
                report.status = CycleStatus::Processed;
                report.outcome = Some(outcome);
            }
            Err(e) => {
                error!(record_id = %record.id, error = %e, "Record processing failed");
                report.status = CycleStatus::Failed;
                report.error = Some(e.to_string());
            }
        }
    }
}

/// Most recent actionable record by timestamp; later position breaks ties.
fn select_most_recent(
    records: &[FeedbackRecord],
    is_claimed: impl Fn(&str) -> bool,
) -> Option<&FeedbackRecord> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_actionable() && !is_claimed(&r.id))
        .max_by_key(|(i, r)| (r.timestamp, *i))
        .map(|(_, r)| r)
}

/// Handle to a spawned driver loop.
pub struct DriverHandle {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl DriverHandle {
    /// Stop after the current cycle and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
        if let Err(e) = self.handle.await {
            error!(error = %e, "Driver task ended abnormally");
        }
    }
}

/// Spawn the periodic driver. The first cycle runs immediately.
pub fn spawn_driver(driver: Arc<FeedbackLoopDriver>) -> DriverHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let wake = Arc::new(Notify::new());
    let interval = driver.controller().config().poll_interval;

    let handle = tokio::spawn({
        let shutdown = Arc::clone(&shutdown);
        let wake = Arc::clone(&wake);
        async move {
            info!(interval_secs = interval.as_secs(), "Feedback loop started");
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = wake.notified() => {}
                }

                if shutdown.load(Ordering::SeqCst) {
                    info!("Feedback loop shutting down");
                    return;
                }

                driver.run_cycle().await;
            }
        }
    });

    DriverHandle {
        handle,
        shutdown,
        wake,
    }
}
