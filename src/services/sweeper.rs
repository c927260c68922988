//! Delay/timeout sweeper daemon.
//!
//! Periodically scans every pending task instance and force-dispatches the
//! ones whose delay has elapsed or whose last update is older than their
//! template's timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::ControllerResult;
use crate::domain::models::{ControllerMessage, SweeperConfig};
use crate::services::controller::Controller;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    /// Dispatched because their delay elapsed.
    pub delayed: usize,
    /// Force-dispatched after going stale.
    pub timed_out: usize,
    /// Deleted because their template no longer exists.
    pub orphaned: usize,
    /// Claimed by another replica first.
    pub raced: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn dispatched(&self) -> usize {
        self.delayed + self.timed_out
    }
}

/// Reason the sweeper stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TooManyFailures,
}

#[derive(Debug, Clone, Default)]
pub struct SweeperStatus {
    pub running: bool,
    pub total_runs: u64,
    pub failed_runs: u64,
    pub total_dispatched: u64,
    pub last_run: Option<Instant>,
}

/// Handle to stop a running sweeper and read its status.
#[derive(Clone)]
pub struct SweeperHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<SweeperStatus>>,
}

impl SweeperHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> SweeperStatus {
        self.status.read().await.clone()
    }
}

pub struct Sweeper {
    controller: Arc<Controller>,
    interval: Duration,
    max_consecutive_failures: u32,
    status: Arc<RwLock<SweeperStatus>>,
    stop_flag: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new(controller: Arc<Controller>, config: &SweeperConfig) -> Self {
        Self {
            controller,
            interval: Duration::from_millis(config.interval_ms.max(1)),
            max_consecutive_failures: config.max_consecutive_failures,
            status: Arc::new(RwLock::new(SweeperStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> SweeperHandle {
        SweeperHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// Sweep on every tick until stopped or too many passes fail in a row.
    pub async fn run(self) -> StopReason {
        self.status.write().await.running = true;
        info!(interval_ms = self.interval.as_millis() as u64, "sweeper started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        let reason = loop {
            ticker.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }

            match self.run_once().await {
                Ok(report) => {
                    consecutive_failures = 0;
                    if report.scanned > 0 {
                        debug!(?report, "sweep complete");
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(error = %e, consecutive_failures, "sweep failed");
                    if consecutive_failures >= self.max_consecutive_failures {
                        break StopReason::TooManyFailures;
                    }
                }
            }
        };

        self.status.write().await.running = false;
        info!(?reason, "sweeper stopped");
        reason
    }

    /// One sweep at the current time.
    pub async fn run_once(&self) -> ControllerResult<SweepReport> {
        let result = self.sweep_at(Utc::now()).await;

        let mut status = self.status.write().await;
        status.total_runs += 1;
        status.last_run = Some(Instant::now());
        match &result {
            Ok(report) => status.total_dispatched += report.dispatched() as u64,
            Err(_) => status.failed_runs += 1,
        }
        result
    }

    /// One sweep as if the clock read `now`.
    ///
    /// Only a failed scan is an error; per-instance failures are logged and
    /// counted in the report.
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> ControllerResult<SweepReport> {
        let store = self.controller.store();
        let graph = self.controller.graph();
        let default_timeout = chrono::Duration::milliseconds(
            i64::try_from(self.controller.config().default_timeout_ms).unwrap_or(i64::MAX),
        );

        let mut report = SweepReport::default();
        for mut instance in store.scan_all().await? {
            report.scanned += 1;

            let Some(template) = graph.get(&instance.task_template_id) else {
                warn!(
                    instance_id = %instance.id,
                    template_id = %instance.task_template_id,
                    "deleting instance of unknown template"
                );
                match store.delete_by_id(&instance.id).await {
                    Ok(0) => report.raced += 1,
                    Ok(_) => report.orphaned += 1,
                    Err(e) => {
                        error!(instance_id = %instance.id, error = %e, "orphan delete failed");
                        report.failed += 1;
                    }
                }
                continue;
            };

            let timeout = template.options.timeout_or(default_timeout);
            let (message, delayed) = if instance.is_delay_elapsed(now) {
                if instance.dependencies_ready.is_none() {
                    instance.dependencies_ready = Some(now);
                }
                (None, true)
            } else if instance.is_stale(now, timeout) {
                (Some(ControllerMessage::timeout_expired(now, timeout)), false)
            } else {
                continue;
            };

            let instance_id = instance.id.clone();
            match self.controller.dispatch(instance, message).await {
                Ok(Some(_)) if delayed => report.delayed += 1,
                Ok(Some(_)) => report.timed_out += 1,
                Ok(None) => report.raced += 1,
                Err(e) => {
                    error!(instance_id = %instance_id, error = %e, "forced dispatch failed");
                    report.failed += 1;
                }
            }
        }

        if report.dispatched() > 0 || report.orphaned > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                delayed = report.delayed,
                timed_out = report.timed_out,
                orphaned = report.orphaned,
                failed = report.failed,
                "sweep acted on instances"
            );
        }
        Ok(report)
    }
}
