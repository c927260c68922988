//! `subject-flow run`: the long-running controller process.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::application::SubjectConsumer;
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::services::{StopReason, Sweeper};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub sweeps: u64,
    pub failed_sweeps: u64,
    pub swept_dispatches: u64,
    pub stopped_by: String,
}

impl CommandOutput for RunSummary {
    fn to_human(&self) -> String {
        format!(
            "Stopped ({}) after {} sweep(s), {} failed, {} dispatched by the sweeper",
            self.stopped_by, self.sweeps, self.failed_sweeps, self.swept_dispatches
        )
    }
}

pub async fn execute(runtime: Runtime, json: bool) -> Result<()> {
    let controller = runtime.controller();

    let sweeper = Sweeper::new(controller.clone(), &runtime.config.sweeper);
    let sweeper_handle = sweeper.handle();
    let mut sweeper_task = tokio::spawn(sweeper.run());

    let consumer = SubjectConsumer::new(controller, runtime.bus.clone(), &runtime.config.bus);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer_task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    info!(graph = %runtime.graph.name(), backend = ?runtime.config.backend, "controller running");

    let stopped_by = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("interrupt received, shutting down");
            "interrupt"
        }
        reason = &mut sweeper_task => {
            let reason = reason.context("Sweeper task panicked")?;
            if reason == StopReason::TooManyFailures {
                error!("sweeper gave up after repeated failures");
            }
            "sweeper"
        }
        result = &mut consumer_task => {
            result.context("Consumer task panicked")??;
            warn!("subject consumer exited");
            "consumer"
        }
    };

    // Either receiver may already be gone.
    let _ = shutdown_tx.send(true);
    sweeper_handle.stop();

    if stopped_by != "consumer" {
        consumer_task
            .await
            .context("Consumer task panicked")?
            .context("Subject consumer failed")?;
    }
    if stopped_by != "sweeper" {
        sweeper_task.await.context("Sweeper task panicked")?;
    }

    runtime.close().await;
    let status = sweeper_handle.status().await;
    output(
        &RunSummary {
            sweeps: status.total_runs,
            failed_sweeps: status.failed_runs,
            swept_dispatches: status.total_dispatched,
            stopped_by: stopped_by.to_string(),
        },
        json,
    );
    Ok(())
}
