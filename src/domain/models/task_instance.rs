//! Task instance domain model.
//!
//! A task instance aggregates the dependency subjects that have arrived for
//! one product of one task template. It lives in the shared state store from
//! the first matching arrival until it is dispatched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::subject::Bindings;

/// Pending aggregation state for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstance {
    /// The product subject for fan-in instances, a fresh UUID otherwise.
    pub id: String,
    pub product: String,
    pub task_template_id: String,
    pub is_multi_dependency: bool,
    /// Subjects that must arrive, in discovery order. Never holds duplicates.
    pub required: Vec<String>,
    /// Required subjects observed so far. Always a subset of `required`.
    pub ready: Vec<String>,
    pub args: Bindings,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub dependencies_ready: Option<DateTime<Utc>>,
    pub delay_ready_time: Option<DateTime<Utc>>,
}

impl TaskInstance {
    /// A fan-in instance keyed by its product, with nothing required yet.
    pub fn fan_in(
        product: impl Into<String>,
        task_template_id: impl Into<String>,
        args: Bindings,
        now: DateTime<Utc>,
    ) -> Self {
        let product = product.into();
        Self {
            id: product.clone(),
            product,
            task_template_id: task_template_id.into(),
            is_multi_dependency: true,
            required: Vec::new(),
            ready: Vec::new(),
            args,
            created_at: now,
            last_updated: now,
            dependencies_ready: None,
            delay_ready_time: None,
        }
    }

    /// A fan-out instance with a fresh id, already requiring `subject`.
    pub fn fan_out(
        product: impl Into<String>,
        task_template_id: impl Into<String>,
        subject: impl Into<String>,
        args: Bindings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            product: product.into(),
            task_template_id: task_template_id.into(),
            is_multi_dependency: false,
            required: vec![subject.into()],
            ready: Vec::new(),
            args,
            created_at: now,
            last_updated: now,
            dependencies_ready: None,
            delay_ready_time: None,
        }
    }

    pub fn requires(&self, subject: &str) -> bool {
        self.required.iter().any(|s| s == subject)
    }

    pub fn has_arrived(&self, subject: &str) -> bool {
        self.ready.iter().any(|s| s == subject)
    }

    pub fn is_delay_scheduled(&self) -> bool {
        self.delay_ready_time.is_some()
    }

    pub fn is_delay_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.delay_ready_time.is_some_and(|at| at <= now)
    }

    /// Whether the instance has gone without updates for longer than `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.checked_sub_signed(timeout)
            .is_some_and(|cutoff| self.last_updated < cutoff)
    }
}

/// Result of an idempotent set-add against a stored instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetAdd {
    Added,
    AlreadyPresent,
    /// The subject is not in `required`, so it cannot be marked ready.
    NotRequired,
    /// A bounded add found `required` already full.
    AtCapacity,
    /// The instance no longer exists, typically dispatched by another replica.
    InstanceMissing,
}

impl SetAdd {
    /// Whether the subject is a member of the set after the call.
    pub const fn is_member(self) -> bool {
        matches!(self, Self::Added | Self::AlreadyPresent)
    }
}
