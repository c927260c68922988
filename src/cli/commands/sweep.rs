//! `subject-flow sweep`

use anyhow::Result;

use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::services::{SweepReport, Sweeper};

impl CommandOutput for SweepReport {
    fn to_human(&self) -> String {
        format!(
            "Scanned {} pending instance(s): {} delayed dispatch(es), {} timeout(s), {} orphan(s) removed, {} lost race(s), {} failure(s)",
            self.scanned, self.delayed, self.timed_out, self.orphaned, self.raced, self.failed
        )
    }
}

pub async fn execute(runtime: Runtime, json: bool) -> Result<()> {
    let sweeper = Sweeper::new(runtime.controller(), &runtime.config.sweeper);
    let report = sweeper.run_once().await;
    runtime.close().await;
    let report = report?;
    output(&report, json);
    Ok(())
}
