//! Bus event envelopes.
//!
//! Inbound `new.subject` events announce that a subject exists; outbound
//! task-ready events carry a resolved command to a worker. Both use the same
//! CloudEvents-style envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subject::Bindings;
use super::task_instance::TaskInstance;
use crate::domain::errors::EventError;

/// Event type of inbound subject announcements.
pub const SUBJECT_READY_TYPE: &str = "new.subject";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Reason attached to timeout-forced dispatches.
pub const TIMEOUT_REASON: &str = "window timeout expired";

/// A subject has become available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectReadyEvent {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(rename = "type", default = "default_subject_ready_type")]
    pub event_type: String,

    #[serde(default)]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,

    #[serde(default)]
    pub subject: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SubjectReadyData>,
}

fn default_subject_ready_type() -> String {
    SUBJECT_READY_TYPE.to_string()
}

/// Optional payload of a subject-ready event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectReadyData {
    /// The upstream task message that produced the subject, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<serde_json::Value>,
}

impl SubjectReadyEvent {
    pub fn new(subject: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time: Some(Utc::now()),
            event_type: SUBJECT_READY_TYPE.to_string(),
            source: source.into(),
            datacontenttype: Some(JSON_CONTENT_TYPE.to_string()),
            subject: subject.into(),
            data: None,
        }
    }

    /// Decode a bus payload, rejecting envelopes without a subject.
    pub fn parse(payload: &[u8]) -> Result<Self, EventError> {
        let event: Self = serde_json::from_slice(payload)?;
        if event.subject.trim().is_empty() {
            return Err(EventError::MissingSubject { id: event.id });
        }
        Ok(event)
    }
}

/// Diagnostic attached when the sweeper forces a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerMessage {
    pub reason: String,
    pub now: DateTime<Utc>,
    /// Timeout window in milliseconds.
    pub timeout: i64,
}

impl ControllerMessage {
    pub fn timeout_expired(now: DateTime<Utc>, timeout: chrono::Duration) -> Self {
        Self {
            reason: TIMEOUT_REASON.to_string(),
            now,
            timeout: timeout.num_milliseconds(),
        }
    }
}

/// Payload of a task-ready event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReadyData {
    /// The task instance this dispatch claimed.
    pub instance_id: String,
    pub name: String,
    pub required: Vec<String>,
    pub ready: Vec<String>,
    pub task_def_id: String,
    pub args: Bindings,
    pub command: String,
    pub is_multi_dependency: bool,
    pub dependencies_ready: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_message: Option<ControllerMessage>,
}

/// A task whose dependencies are satisfied, addressed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReadyEvent {
    pub id: String,
    pub time: DateTime<Utc>,
    /// Dispatch target the worker pool listens on.
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub datacontenttype: String,
    /// The product subject the task will produce.
    pub subject: String,
    pub data: TaskReadyData,
}

impl TaskReadyEvent {
    /// Assemble the outbound message for a claimed instance.
    pub fn from_instance(
        instance: &TaskInstance,
        name: impl Into<String>,
        target: impl Into<String>,
        source: impl Into<String>,
        command: String,
        controller_message: Option<ControllerMessage>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            event_type: target.into(),
            source: source.into(),
            datacontenttype: JSON_CONTENT_TYPE.to_string(),
            subject: instance.product.clone(),
            data: TaskReadyData {
                instance_id: instance.id.clone(),
                name: name.into(),
                required: instance.required.clone(),
                ready: instance.ready.clone(),
                task_def_id: instance.task_template_id.clone(),
                args: instance.args.clone(),
                command,
                is_multi_dependency: instance.is_multi_dependency,
                dependencies_ready: instance.dependencies_ready,
                controller_message,
            },
        }
    }
}

/// Map a dispatch target to a bus topic name.
///
/// Runs of characters outside `[A-Za-z0-9._-]` collapse to a single `_`.
pub fn topic_name(target: &str) -> String {
    let mut out = String::with_capacity(target.len());
    let mut in_run = false;
    for c in target.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}
