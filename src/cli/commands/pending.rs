//! `subject-flow pending`

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::TaskInstance;

#[derive(Debug, Serialize)]
pub struct PendingOutput {
    pub instances: Vec<TaskInstance>,
}

impl CommandOutput for PendingOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "product", "template", "ready", "last updated", "fires at"]);
        for i in &self.instances {
            table.add_row(vec![
                truncate(&i.id, 40),
                i.product.clone(),
                i.task_template_id.clone(),
                format!("{}/{}", i.ready.len(), i.required.len()),
                i.last_updated.to_rfc3339(),
                i.delay_ready_time.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
            ]);
        }
        render_list("pending instance", &table, self.instances.len())
    }
}

pub async fn execute(runtime: Runtime, json: bool) -> Result<()> {
    let instances = runtime.store.scan_all().await;
    runtime.close().await;
    let instances = instances?;
    output(&PendingOutput { instances }, json);
    Ok(())
}
