//! Task aggregation state store port.
//!
//! Every mutating operation is a single conditional or idempotent primitive,
//! so controller replicas sharing one store never perform an unguarded
//! read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreError;
use crate::domain::models::{SetAdd, TaskInstance};

/// Shared, crash-tolerant storage of pending task instances.
#[async_trait]
pub trait TaskStateStore: Send + Sync {
    /// All pending instances for a product, oldest first.
    async fn find_by_product(&self, product: &str) -> Result<Vec<TaskInstance>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<TaskInstance>, StoreError>;

    /// Insert the instance unless one with the same id exists.
    ///
    /// Returns `true` when this call created it.
    async fn insert_if_absent(&self, instance: &TaskInstance) -> Result<bool, StoreError>;

    /// Idempotently add a subject to `required`.
    async fn add_to_required_set(&self, id: &str, subject: &str) -> Result<SetAdd, StoreError>;

    /// Add a subject to `required` only while it holds fewer than `limit` subjects.
    async fn add_to_required_set_bounded(
        &self,
        id: &str,
        subject: &str,
        limit: usize,
    ) -> Result<SetAdd, StoreError>;

    /// Idempotently add a required subject to `ready`.
    ///
    /// `last_updated` is stamped with `now` only when the subject is new.
    async fn add_to_ready_set(
        &self,
        id: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<SetAdd, StoreError>;

    /// Record when a delayed instance must fire, unless already scheduled.
    ///
    /// Returns `true` when this call scheduled it.
    async fn schedule_delay(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Remove an instance, returning how many rows went away (0 or 1).
    async fn delete_by_id(&self, id: &str) -> Result<u64, StoreError>;

    /// Every pending instance.
    async fn scan_all(&self) -> Result<Vec<TaskInstance>, StoreError>;
}
