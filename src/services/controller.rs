//! Readiness and dispatch controller.
//!
//! Turns one subject-ready event into task instance bookkeeping and, once an
//! instance is ready, claims and dispatches it. Replicas coordinate only
//! through the store's conditional primitives; nothing here holds a lock.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{BusError, ControllerError, ControllerResult};
use crate::domain::models::{
    topic_name, ControllerConfig, ControllerMessage, ParsedSubject, SetAdd, TaskInstance,
    TaskReadyEvent,
};
use crate::domain::ports::{MessageBus, TaskStateStore};
use crate::services::dependency_graph::{DependencyGraph, DependentTaskMatch, TaskTemplate};
use crate::services::resolvers::ResolverRegistry;

/// Insert-then-add rounds before giving up on a fan-in instance that keeps
/// being dispatched underneath us.
const UPSERT_ATTEMPTS: usize = 3;

struct MatchFailure {
    instance_id: Option<String>,
    error: ControllerError,
}

pub struct Controller {
    graph: Arc<DependencyGraph>,
    resolvers: Arc<ResolverRegistry>,
    store: Arc<dyn TaskStateStore>,
    bus: Arc<dyn MessageBus>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        graph: Arc<DependencyGraph>,
        resolvers: Arc<ResolverRegistry>,
        store: Arc<dyn TaskStateStore>,
        bus: Arc<dyn MessageBus>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            graph,
            resolvers,
            store,
            bus,
            config,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &Arc<dyn TaskStateStore> {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Process one subject-ready event, returning the tasks it dispatched.
    ///
    /// Every matching template is handled even when another one fails. The
    /// failures come back as one error, retryable if any of them was, so the
    /// caller can leave the event unacknowledged for redelivery.
    #[instrument(skip(self), fields(matches))]
    pub async fn on_subject_ready(&self, subject: &str) -> ControllerResult<Vec<TaskReadyEvent>> {
        let matches = self.graph.match_subject(subject, false);
        tracing::Span::current().record("matches", matches.len());
        if matches.is_empty() {
            debug!("no dependent tasks");
            return Ok(Vec::new());
        }

        let mut dispatched = Vec::new();
        let mut failures = Vec::new();
        for m in &matches {
            match self.handle_match(m, subject).await {
                Ok(Some(event)) => dispatched.push(event),
                Ok(None) => {}
                Err(failure) => {
                    error!(
                        subject,
                        template_id = %m.task_template_id,
                        product = %m.product,
                        instance_id = failure.instance_id.as_deref().unwrap_or("-"),
                        retryable = failure.error.is_retryable(),
                        error = %failure.error,
                        "dependent task failed"
                    );
                    failures.push(failure.error);
                }
            }
        }

        match ControllerError::combine(subject, failures) {
            Some(err) => {
                if !dispatched.is_empty() {
                    info!(dispatched = dispatched.len(), "other dependent tasks dispatched despite failure");
                }
                Err(err)
            }
            None => Ok(dispatched),
        }
    }

    async fn handle_match(
        &self,
        m: &DependentTaskMatch,
        subject: &str,
    ) -> Result<Option<TaskReadyEvent>, MatchFailure> {
        let template = self.graph.get(&m.task_template_id).ok_or_else(|| MatchFailure {
            instance_id: None,
            error: ControllerError::UnknownTemplate(m.task_template_id.clone()),
        })?;

        let instance_id = match self.fetch_or_create(template, m).await {
            Ok(Some(id)) => id,
            Ok(None) => return Ok(None),
            Err(error) => {
                return Err(MatchFailure {
                    instance_id: None,
                    error,
                })
            }
        };

        // Only direct matches advance readiness.
        if m.subject != subject {
            return Ok(None);
        }

        match self.advance(template, &instance_id, subject).await {
            Ok(event) => Ok(event),
            Err(error) => Err(MatchFailure {
                instance_id: Some(instance_id),
                error,
            }),
        }
    }

    /// Find or create the instance `m` contributes to, returning its id.
    ///
    /// `None` means a fan-in instance kept vanishing between insert and add.
    async fn fetch_or_create(
        &self,
        template: &TaskTemplate,
        m: &DependentTaskMatch,
    ) -> ControllerResult<Option<String>> {
        if template.options.is_multi_dependency() {
            return self.upsert_fan_in(template, m).await;
        }

        if !template.options.runs_everytime() {
            let existing: Vec<TaskInstance> = self
                .store
                .find_by_product(&m.product)
                .await?
                .into_iter()
                .filter(|i| i.task_template_id == template.id)
                .collect();

            if let Some(instance) = existing.iter().find(|i| i.requires(&m.subject)) {
                debug!(instance_id = %instance.id, "reusing instance already tracking subject");
                return Ok(Some(instance.id.clone()));
            }

            let limit = template.options.dependent_count();
            for instance in existing.iter().filter(|i| i.required.len() < limit) {
                let outcome = self
                    .store
                    .add_to_required_set_bounded(&instance.id, &m.subject, limit)
                    .await?;
                if outcome.is_member() {
                    debug!(instance_id = %instance.id, "joined instance with spare capacity");
                    return Ok(Some(instance.id.clone()));
                }
            }
        }

        let instance = TaskInstance::fan_out(
            &m.product,
            &template.id,
            &m.subject,
            m.args.clone(),
            Utc::now(),
        );
        self.store.insert_if_absent(&instance).await?;
        debug!(instance_id = %instance.id, product = %m.product, "created fan-out instance");
        Ok(Some(instance.id))
    }

    async fn upsert_fan_in(
        &self,
        template: &TaskTemplate,
        m: &DependentTaskMatch,
    ) -> ControllerResult<Option<String>> {
        for attempt in 1..=UPSERT_ATTEMPTS {
            let fresh = TaskInstance::fan_in(&m.product, &template.id, m.args.clone(), Utc::now());
            if self.store.insert_if_absent(&fresh).await? {
                debug!(instance_id = %fresh.id, "created fan-in instance");
            }

            match self.store.add_to_required_set(&fresh.id, &m.subject).await? {
                SetAdd::InstanceMissing => {
                    debug!(instance_id = %fresh.id, attempt, "instance dispatched during upsert, retrying");
                }
                _ => return Ok(Some(fresh.id)),
            }
        }

        warn!(
            product = %m.product,
            template_id = %template.id,
            "fan-in instance kept disappearing, skipping match"
        );
        Ok(None)
    }

    /// Mark `subject` arrived on the instance and dispatch it if ready.
    async fn advance(
        &self,
        template: &TaskTemplate,
        instance_id: &str,
        subject: &str,
    ) -> ControllerResult<Option<TaskReadyEvent>> {
        let now = Utc::now();
        match self.store.add_to_ready_set(instance_id, subject, now).await? {
            SetAdd::InstanceMissing => {
                debug!(instance_id, "instance already dispatched");
                return Ok(None);
            }
            SetAdd::NotRequired => {
                warn!(instance_id, "subject is not required by instance");
                return Ok(None);
            }
            _ => {}
        }

        // Another replica may have advanced or dispatched it meanwhile.
        let Some(mut instance) = self.store.find_by_id(instance_id).await? else {
            debug!(instance_id, "instance gone before readiness check");
            return Ok(None);
        };

        if !self.is_ready(template, subject, &instance)? {
            debug!(
                instance_id,
                ready = instance.ready.len(),
                required = instance.required.len(),
                "instance not ready"
            );
            return Ok(None);
        }

        if let Some(delay) = template.options.delay() {
            if !instance.is_delay_scheduled() {
                let at = now + delay;
                if self.store.schedule_delay(instance_id, at).await? {
                    info!(instance_id, delay_ready_time = %at, "dispatch delayed");
                }
            }
            return Ok(None);
        }

        instance.dependencies_ready = Some(now);
        self.dispatch(instance, None).await
    }

    fn is_ready(
        &self,
        template: &TaskTemplate,
        subject: &str,
        instance: &TaskInstance,
    ) -> ControllerResult<bool> {
        let Some(name) = &template.options.ready else {
            return Ok(instance.ready.len() >= template.options.dependent_count());
        };

        let predicate = self
            .resolvers
            .predicate(name)
            .ok_or_else(|| ControllerError::Resolver {
                template: template.id.clone(),
                message: format!("unknown ready predicate '{name}'"),
            })?;
        let parsed = ParsedSubject::parse(subject)?;
        Ok(predicate(&parsed, instance, self.graph.config()))
    }

    /// Claim `instance` by deleting it, then publish its task-ready event.
    ///
    /// Returns `Ok(None)` when another replica claimed it first. A resolver or
    /// publish failure after the claim is returned as an error; the instance is
    /// not restored.
    #[instrument(
        skip(self, instance, controller_message),
        fields(instance_id = %instance.id, template_id = %instance.task_template_id, product = %instance.product)
    )]
    pub async fn dispatch(
        &self,
        instance: TaskInstance,
        controller_message: Option<ControllerMessage>,
    ) -> ControllerResult<Option<TaskReadyEvent>> {
        let template = self
            .graph
            .get(&instance.task_template_id)
            .ok_or_else(|| ControllerError::UnknownTemplate(instance.task_template_id.clone()))?;

        if self.store.delete_by_id(&instance.id).await? == 0 {
            debug!("already dispatched by another replica");
            return Ok(None);
        }

        let command = self
            .resolvers
            .resolve_command(template, &instance, self.graph.config())?;
        let target = template
            .worker
            .as_deref()
            .unwrap_or(&self.config.default_worker);
        let name = if template.name.is_empty() {
            template.id.as_str()
        } else {
            template.name.as_str()
        };

        let event = TaskReadyEvent::from_instance(
            &instance,
            name,
            target,
            &self.config.source,
            command,
            controller_message,
        );
        let payload = serde_json::to_vec(&event).map_err(BusError::from)?;
        self.bus
            .publish(&topic_name(target), Some(&event.subject), &payload)
            .await?;

        info!(
            target,
            forced = event.data.controller_message.is_some(),
            "task dispatched"
        );
        Ok(Some(event))
    }
}
