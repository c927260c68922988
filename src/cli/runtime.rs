//! Wiring shared by the CLI commands: config, graph, store and bus.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::adapters::memory::{InMemoryMessageBus, InMemoryTaskStateStore};
use crate::adapters::sqlite::{initialize_database, PoolConfig, SqliteMessageBus, SqliteTaskStateStore};
use crate::domain::models::{Backend, Config, GraphDefinition};
use crate::domain::ports::{MessageBus, TaskStateStore};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{Controller, DependencyGraph, ResolverRegistry};

/// Load configuration from `--config` or the default layered files.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Compile the graph named by the config and check its resolver names.
pub fn load_graph(config: &Config, resolvers: &ResolverRegistry) -> Result<DependencyGraph> {
    let definition = GraphDefinition::from_file(&config.graph_file)
        .with_context(|| format!("Failed to load graph {}", config.graph_file))?;
    let graph = DependencyGraph::build(definition).context("Invalid dependency graph")?;
    resolvers.validate(&graph).context("Invalid dependency graph")?;
    info!(graph = %graph.name(), templates = graph.len(), "dependency graph loaded");
    Ok(graph)
}

/// Everything a command may need, connected to the configured backend.
pub struct Runtime {
    pub config: Config,
    pub graph: Arc<DependencyGraph>,
    pub resolvers: Arc<ResolverRegistry>,
    pub store: Arc<dyn TaskStateStore>,
    pub bus: Arc<dyn MessageBus>,
    pool: Option<SqlitePool>,
}

impl Runtime {
    pub async fn connect(config: Config) -> Result<Self> {
        let resolvers = ResolverRegistry::with_builtins();
        let graph = load_graph(&config, &resolvers)?;

        let (store, bus, pool): (Arc<dyn TaskStateStore>, Arc<dyn MessageBus>, _) = match config.backend {
            Backend::Sqlite => {
                let pool = initialize_database(&config.database.url, Some(PoolConfig::from(&config.database)))
                    .await
                    .with_context(|| format!("Failed to open database {}", config.database.url))?;
                (
                    Arc::new(SqliteTaskStateStore::new(pool.clone())),
                    Arc::new(SqliteMessageBus::new(pool.clone(), &config.bus.group_id)),
                    Some(pool),
                )
            }
            Backend::Memory => (
                Arc::new(InMemoryTaskStateStore::new()),
                Arc::new(InMemoryMessageBus::new(&config.bus.group_id)),
                None,
            ),
        };

        Ok(Self {
            config,
            graph: Arc::new(graph),
            resolvers: Arc::new(resolvers),
            store,
            bus,
            pool,
        })
    }

    /// Release the database pool, waiting for open connections to finish.
    pub async fn close(self) {
        if let Some(pool) = self.pool {
            pool.close().await;
        }
    }

    pub fn controller(&self) -> Arc<Controller> {
        Arc::new(Controller::new(
            self.graph.clone(),
            self.resolvers.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.config.controller.clone(),
        ))
    }
}
