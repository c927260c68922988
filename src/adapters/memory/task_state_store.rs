//! In-process TaskStateStore.
//!
//! One write lock per operation gives the same atomicity the shared store
//! provides through conditional statements.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::errors::StoreError;
use crate::domain::models::{SetAdd, TaskInstance};
use crate::domain::ports::TaskStateStore;

#[derive(Default)]
pub struct InMemoryTaskStateStore {
    instances: RwLock<HashMap<String, TaskInstance>>,
}

impl InMemoryTaskStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

fn oldest_first(mut instances: Vec<TaskInstance>) -> Vec<TaskInstance> {
    instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    instances
}

#[async_trait]
impl TaskStateStore for InMemoryTaskStateStore {
    async fn find_by_product(&self, product: &str) -> Result<Vec<TaskInstance>, StoreError> {
        let instances = self.instances.read().await;
        Ok(oldest_first(
            instances.values().filter(|i| i.product == product).cloned().collect(),
        ))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TaskInstance>, StoreError> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn insert_if_absent(&self, instance: &TaskInstance) -> Result<bool, StoreError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Ok(false);
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(true)
    }

    async fn add_to_required_set(&self, id: &str, subject: &str) -> Result<SetAdd, StoreError> {
        self.add_to_required_set_bounded(id, subject, usize::MAX).await
    }

    async fn add_to_required_set_bounded(
        &self,
        id: &str,
        subject: &str,
        limit: usize,
    ) -> Result<SetAdd, StoreError> {
        let mut instances = self.instances.write().await;
        let Some(instance) = instances.get_mut(id) else {
            return Ok(SetAdd::InstanceMissing);
        };
        if instance.requires(subject) {
            return Ok(SetAdd::AlreadyPresent);
        }
        if instance.required.len() >= limit {
            return Ok(SetAdd::AtCapacity);
        }
        instance.required.push(subject.to_string());
        Ok(SetAdd::Added)
    }

    async fn add_to_ready_set(
        &self,
        id: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<SetAdd, StoreError> {
        let mut instances = self.instances.write().await;
        let Some(instance) = instances.get_mut(id) else {
            return Ok(SetAdd::InstanceMissing);
        };
        if instance.has_arrived(subject) {
            return Ok(SetAdd::AlreadyPresent);
        }
        if !instance.requires(subject) {
            return Ok(SetAdd::NotRequired);
        }
        instance.ready.push(subject.to_string());
        instance.last_updated = now;
        Ok(SetAdd::Added)
    }

    async fn schedule_delay(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut instances = self.instances.write().await;
        match instances.get_mut(id) {
            Some(instance) if instance.delay_ready_time.is_none() => {
                instance.delay_ready_time = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_by_id(&self, id: &str) -> Result<u64, StoreError> {
        Ok(u64::from(self.instances.write().await.remove(id).is_some()))
    }

    async fn scan_all(&self) -> Result<Vec<TaskInstance>, StoreError> {
        let instances = self.instances.read().await;
        Ok(oldest_first(instances.values().cloned().collect()))
    }
}
