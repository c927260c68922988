//! Subject Flow - event-driven dependency resolver
//!
//! Watches a stream of "subject is ready" events (subjects are URIs naming
//! data products), works out which task templates in a declarative
//! dependency graph those subjects feed, tracks per-instance readiness in a
//! shared store, and publishes a task-ready event to the responsible worker
//! once an instance's dependencies have all arrived.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): subjects, graph definitions, task instances, events, ports
//! - **Service Layer** (`services`): dependency graph, resolvers, controller, sweeper
//! - **Application Layer** (`application`): bus consumer loop and subject publisher
//! - **Adapters** (`adapters`): SQLite and in-memory store and bus
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use subject_flow::adapters::memory::{InMemoryMessageBus, InMemoryTaskStateStore};
//! use subject_flow::domain::models::{ControllerConfig, GraphDefinition};
//! use subject_flow::services::{Controller, DependencyGraph, ResolverRegistry};
//!
//! let graph = DependencyGraph::build(GraphDefinition::from_file("demos/graph.yaml")?)?;
//! let controller = Controller::new(
//!     Arc::new(graph),
//!     Arc::new(ResolverRegistry::with_builtins()),
//!     Arc::new(InMemoryTaskStateStore::new()),
//!     Arc::new(InMemoryMessageBus::new("controller")),
//!     ControllerConfig::default(),
//! );
//! let dispatched = controller.on_subject_ready("file:///a/1").await?;
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{SubjectConsumer, SubjectPublisher};
pub use domain::models::{Config, GraphDefinition, TaskInstance, TaskReadyEvent};
pub use domain::ports::{MessageBus, TaskStateStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Controller, DependencyGraph, ResolverRegistry, Sweeper};
