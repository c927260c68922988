//! `subject-flow graph`

use anyhow::{bail, Result};
use serde::Serialize;

use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::cli::runtime::load_graph;
use crate::domain::models::{CommandSpec, Config};
use crate::services::{ResolverRegistry, TaskGraph, TaskTemplate};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRow {
    pub id: String,
    pub name: String,
    pub worker: Option<String>,
    pub dependencies: Vec<String>,
    pub dependent_count: usize,
    pub is_multi_dependency: bool,
    pub delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub command: String,
}

impl From<&TaskTemplate> for TemplateRow {
    fn from(t: &TaskTemplate) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            worker: t.worker.clone(),
            dependencies: t.dependencies.iter().map(|d| d.pattern.as_str().to_string()).collect(),
            dependent_count: t.options.dependent_count(),
            is_multi_dependency: t.options.is_multi_dependency(),
            delay_ms: t.options.delay,
            timeout_ms: t.options.timeout,
            command: match &t.command {
                CommandSpec::Literal(command) => command.clone(),
                CommandSpec::Resolver { resolver } => format!("<{resolver}>"),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TemplateListOutput {
    pub graph: String,
    pub templates: Vec<TemplateRow>,
}

impl CommandOutput for TemplateListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["template", "name", "worker", "deps", "count", "command"]);
        for t in &self.templates {
            table.add_row(vec![
                t.id.clone(),
                truncate(&t.name, 30),
                t.worker.clone().unwrap_or_else(|| "-".to_string()),
                t.dependencies.len().to_string(),
                t.dependent_count.to_string(),
                truncate(&t.command, 40),
            ]);
        }
        render_list("template", &table, self.templates.len())
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct TaskGraphOutput(pub TaskGraph);

impl CommandOutput for TaskGraphOutput {
    fn to_human(&self) -> String {
        let graph = &self.0;
        let mut lines = vec![format!("{} (template {})", graph.subject, graph.task_id)];

        lines.push("\nFeeds:".to_string());
        for (template, edges) in &graph.children {
            for edge in edges {
                lines.push(format!("  {template} -> {} ({})", edge.subject, edge.task_id));
            }
        }

        lines.push("\nWaits on:".to_string());
        for (template, deps) in &graph.parents {
            for dep in deps {
                lines.push(format!("  {template} <- {dep}"));
            }
        }
        lines.join("\n")
    }
}

pub fn execute(config: &Config, subject: Option<String>, json: bool) -> Result<()> {
    let graph = load_graph(config, &ResolverRegistry::with_builtins())?;

    match subject {
        Some(subject) => {
            let Some(task_graph) = graph.task_graph(&subject) else {
                bail!("No task template produces {subject}");
            };
            output(&TaskGraphOutput(task_graph), json);
        }
        None => output(
            &TemplateListOutput {
                graph: graph.name().to_string(),
                templates: graph.templates().iter().map(TemplateRow::from).collect(),
            },
            json,
        ),
    }
    Ok(())
}
