//! `subject-flow match`

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{list_table, output, render_list, CommandOutput};
use crate::cli::runtime::load_graph;
use crate::domain::models::{Bindings, Config};
use crate::services::{DependentTaskMatch, ResolverRegistry};

#[derive(Debug, Serialize)]
pub struct MatchOutput {
    pub subject: String,
    pub recurse: bool,
    pub matches: Vec<DependentTaskMatch>,
}

fn format_args(args: &Bindings) -> String {
    args.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl CommandOutput for MatchOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["from", "template", "product", "args"]);
        for m in &self.matches {
            table.add_row(vec![
                m.subject.clone(),
                m.task_template_id.clone(),
                m.product.clone(),
                format_args(&m.args),
            ]);
        }
        render_list("match", &table, self.matches.len())
    }
}

pub fn execute(config: &Config, subject: String, recurse: bool, json: bool) -> Result<()> {
    let graph = load_graph(config, &ResolverRegistry::with_builtins())?;
    let matches = graph.match_subject(&subject, recurse);
    output(
        &MatchOutput {
            subject,
            recurse,
            matches,
        },
        json,
    );
    Ok(())
}
