//! Common test utilities for integration tests
//!
//! Builds a controller over either backend and collects the task-ready
//! events it publishes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use subject_flow::adapters::memory::{InMemoryMessageBus, InMemoryTaskStateStore};
use subject_flow::adapters::sqlite::{create_migrated_test_pool, SqliteMessageBus, SqliteTaskStateStore};
use subject_flow::domain::errors::StoreError;
use serde_json::Value;

use subject_flow::domain::models::{
    topic_name, ControllerConfig, GraphDefinition, ParsedSubject, SetAdd, TaskInstance, TaskReadyEvent,
};
use subject_flow::domain::ports::{MessageBus, TaskStateStore};
use subject_flow::services::{Controller, DependencyGraph, ResolverRegistry};

/// Two inputs that must both arrive before `file:///out/{x}` can be built.
pub const PAIR_GRAPH: &str = r#"
name: pair
config:
  fs:
    nfsRoot: /nfs
graph:
  "file:///out/{x}":
    name: Out
    worker: out-worker
    dependencies:
      - subject: "file:///a/{x}"
      - subject: "file:///b/{x}"
    options:
      dependentCount: 2
      timeout: 60000
    command:
      resolver: echo-args
  "file:///thumb/{x}":
    dependencies:
      - subject: "file:///img/{x}/{y}"
    command:
      resolver: echo-subject
  "file:///mosaic/{x}":
    worker: mosaic
    dependencies:
      - subject: "file:///tile/{x}/{part}"
        constraints:
          part: "^(p1|p2|p3)$"
    options:
      dependentCount: 3
    command: "make-mosaic"
  "file:///digest/{x}":
    dependencies:
      - subject: "file:///note/{x}"
    options:
      delay: 1000
    command: "digest"
  "file:///nfs/{x}":
    dependencies:
      - subject: "file:///raw/{x}"
    command:
      resolver: touch-product
"#;

/// Same shape as [`PAIR_GRAPH`] but without `fs.nfsRoot`, so `touch-product` fails.
pub const NO_ROOT_GRAPH: &str = r#"
graph:
  "file:///nfs/{x}":
    dependencies:
      - subject: "file:///raw/{x}"
    command:
      resolver: touch-product
"#;

/// Two templates fed by `file:///raw/{x}`, one of which cannot resolve its command.
pub const SIBLING_GRAPH: &str = r#"
graph:
  "file:///nfs/{x}":
    dependencies:
      - subject: "file:///raw/{x}"
    command:
      resolver: touch-product
  "file:///other/{x}":
    dependencies:
      - subject: "file:///raw/{x}"
    command: "other"
"#;

/// Two independent fan-out templates fed by `file:///raw/{x}`.
pub const TWIN_GRAPH: &str = r#"
graph:
  "file:///left/{x}":
    dependencies:
      - subject: "file:///raw/{x}"
    command: "left"
  "file:///right/{x}":
    dependencies:
      - subject: "file:///raw/{x}"
    command: "right"
"#;

/// Repeat-firing and predicate-gated templates.
pub const OPTIONS_GRAPH: &str = r#"
graph:
  "file:///scan/{x}":
    dependencies:
      - subject: "file:///frame/{x}"
    options:
      run: everytime
      delay: 1000
    command: "scan"
  "file:///bundle/{x}":
    worker: bundler
    dependencies:
      - subject: "file:///band/{x}/{b}"
    options:
      ready: all-required-ready
    command: "bundle"
  "file:///pair/{x}":
    worker: pairer
    dependencies:
      - subject: "file:///half/{x}/{h}"
    options:
      ready: two-halves
    command: "pair"
"#;

/// Ready once two distinct subjects have arrived.
pub fn two_halves(_: &ParsedSubject, instance: &TaskInstance, _: &Value) -> bool {
    instance.ready.len() >= 2
}

pub fn registry() -> ResolverRegistry {
    let mut registry = ResolverRegistry::with_builtins();
    registry.register_predicate("two-halves", two_halves);
    registry
}

#[derive(Debug, Clone, Copy)]
pub enum TestBackend {
    Memory,
    Sqlite,
}

pub const BACKENDS: [TestBackend; 2] = [TestBackend::Memory, TestBackend::Sqlite];

pub fn build_graph(yaml: &str, registry: &ResolverRegistry) -> DependencyGraph {
    let definition = GraphDefinition::from_str(yaml).expect("graph yaml should parse");
    let graph = DependencyGraph::build(definition).expect("graph should compile");
    registry.validate(&graph).expect("resolvers should exist");
    graph
}

/// A controller wired to one backend, plus a second consumer group that
/// reads what it dispatches.
pub struct Harness {
    pub controller: Arc<Controller>,
    pub store: Arc<dyn TaskStateStore>,
    pub bus: Arc<dyn MessageBus>,
    watcher: Arc<dyn MessageBus>,
}

impl Harness {
    pub async fn new(backend: TestBackend, yaml: &str) -> Self {
        Self::with_registry(backend, yaml, registry()).await
    }

    pub async fn with_registry(backend: TestBackend, yaml: &str, registry: ResolverRegistry) -> Self {
        let (store, bus, watcher): (Arc<dyn TaskStateStore>, Arc<dyn MessageBus>, Arc<dyn MessageBus>) =
            match backend {
                TestBackend::Memory => {
                    let bus = InMemoryMessageBus::new("controller");
                    let watcher = bus.with_group("watcher");
                    (Arc::new(InMemoryTaskStateStore::new()), Arc::new(bus), Arc::new(watcher))
                }
                TestBackend::Sqlite => {
                    let pool = create_migrated_test_pool().await.expect("test pool");
                    (
                        Arc::new(SqliteTaskStateStore::new(pool.clone())),
                        Arc::new(SqliteMessageBus::new(pool.clone(), "controller")),
                        Arc::new(SqliteMessageBus::new(pool, "watcher")),
                    )
                }
            };
        Self::assemble(yaml, registry, store, bus, watcher)
    }

    pub fn with_parts(
        yaml: &str,
        store: Arc<dyn TaskStateStore>,
        bus: Arc<dyn MessageBus>,
        watcher: Arc<dyn MessageBus>,
    ) -> Self {
        Self::assemble(yaml, registry(), store, bus, watcher)
    }

    fn assemble(
        yaml: &str,
        registry: ResolverRegistry,
        store: Arc<dyn TaskStateStore>,
        bus: Arc<dyn MessageBus>,
        watcher: Arc<dyn MessageBus>,
    ) -> Self {
        let graph = build_graph(yaml, &registry);
        let controller = Arc::new(Controller::new(
            Arc::new(graph),
            Arc::new(registry),
            store.clone(),
            bus.clone(),
            ControllerConfig::default(),
        ));
        Self {
            controller,
            store,
            bus,
            watcher,
        }
    }

    /// Task-ready events published for `worker` since the last call.
    pub async fn dispatched(&self, worker: &str) -> Vec<TaskReadyEvent> {
        self.watcher
            .subscribe(&[topic_name(worker)])
            .await
            .expect("watcher subscribe");

        let mut events = Vec::new();
        while let Some(message) = self.watcher.consume_one().await.expect("watcher consume") {
            self.watcher.commit(&message).await.expect("watcher commit");
            if message.topic == topic_name(worker) {
                events.push(serde_json::from_slice(&message.payload).expect("task-ready payload"));
            }
        }
        events
    }
}

/// A store whose `find_by_product` and `insert_if_absent` fail a set number
/// of times before delegating. Deletes of one chosen id can fail too.
pub struct FlakyStore {
    inner: InMemoryTaskStateStore,
    failures_left: AtomicUsize,
    undeletable: Option<String>,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryTaskStateStore::new(),
            failures_left: AtomicUsize::new(failures),
            undeletable: None,
        }
    }

    pub fn failing_delete_of(mut self, id: &str) -> Self {
        self.undeletable = Some(id.to_string());
        self
    }

    fn trip(&self) -> Result<(), StoreError> {
        let tripped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Connection("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskStateStore for FlakyStore {
    async fn find_by_product(&self, product: &str) -> Result<Vec<TaskInstance>, StoreError> {
        self.trip()?;
        self.inner.find_by_product(product).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TaskInstance>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn insert_if_absent(&self, instance: &TaskInstance) -> Result<bool, StoreError> {
        self.trip()?;
        self.inner.insert_if_absent(instance).await
    }

    async fn add_to_required_set(&self, id: &str, subject: &str) -> Result<SetAdd, StoreError> {
        self.inner.add_to_required_set(id, subject).await
    }

    async fn add_to_required_set_bounded(
        &self,
        id: &str,
        subject: &str,
        limit: usize,
    ) -> Result<SetAdd, StoreError> {
        self.inner.add_to_required_set_bounded(id, subject, limit).await
    }

    async fn add_to_ready_set(
        &self,
        id: &str,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<SetAdd, StoreError> {
        self.inner.add_to_ready_set(id, subject, now).await
    }

    async fn schedule_delay(&self, id: &str, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.schedule_delay(id, at).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<u64, StoreError> {
        if self.undeletable.as_deref() == Some(id) {
            return Err(StoreError::Connection("injected delete failure".to_string()));
        }
        self.inner.delete_by_id(id).await
    }

    async fn scan_all(&self) -> Result<Vec<TaskInstance>, StoreError> {
        self.inner.scan_all().await
    }
}

/// Initializes a tracing subscriber that writes through the test harness.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
