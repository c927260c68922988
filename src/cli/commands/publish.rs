//! `subject-flow publish`

use anyhow::{Context, Result};
use serde::Serialize;

use crate::application::SubjectPublisher;
use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::ParsedSubject;

#[derive(Debug, Serialize)]
pub struct PublishOutput {
    pub id: String,
    pub subject: String,
    pub topic: String,
    pub offset: i64,
}

impl CommandOutput for PublishOutput {
    fn to_human(&self) -> String {
        format!("Announced {} on {} (offset {})", self.subject, self.topic, self.offset)
    }
}

pub async fn execute(runtime: Runtime, subject: String, json: bool) -> Result<()> {
    ParsedSubject::parse(&subject).context("Subject must be a URI")?;

    let topic = runtime.config.bus.subject_ready_topic.clone();
    let publisher = SubjectPublisher::new(runtime.bus.clone(), &topic, &runtime.config.controller.source);
    let announced = publisher.announce(&subject).await;
    runtime.close().await;
    let (event, offset) = announced?;

    output(
        &PublishOutput {
            id: event.id,
            subject,
            topic,
            offset,
        },
        json,
    );
    Ok(())
}
