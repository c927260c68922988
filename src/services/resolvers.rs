//! Registry of named command resolvers and ready predicates.
//!
//! Graph definitions refer to these by name (`command: { resolver: touch-product }`,
//! `options: { ready: all-required-ready }`), so task templates stay plain data.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::domain::errors::{ControllerError, ControllerResult, GraphError};
use crate::domain::models::{CommandSpec, ParsedSubject, TaskInstance};
use crate::services::dependency_graph::{DependencyGraph, TaskTemplate};

/// Builds a command from the parsed product subject, the instance and global config.
pub type CommandResolver = fn(&ParsedSubject, &TaskInstance, &Value) -> Result<String, String>;

/// Decides readiness from the arriving subject, the instance and global config.
pub type ReadyPredicate = fn(&ParsedSubject, &TaskInstance, &Value) -> bool;

#[derive(Clone, Default)]
pub struct ResolverRegistry {
    commands: HashMap<String, CommandResolver>,
    predicates: HashMap<String, ReadyPredicate>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<_> = self.commands.keys().collect();
        let mut predicates: Vec<_> = self.predicates.keys().collect();
        commands.sort();
        predicates.sort();
        f.debug_struct("ResolverRegistry")
            .field("commands", &commands)
            .field("predicates", &predicates)
            .finish()
    }
}

impl ResolverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in resolvers and predicates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_command("touch-product", touch_product);
        registry.register_command("echo-subject", echo_subject);
        registry.register_command("echo-args", echo_args);
        registry.register_predicate("all-required-ready", all_required_ready);
        registry.register_predicate("any-ready", any_ready);
        registry
    }

    pub fn register_command(&mut self, name: impl Into<String>, resolver: CommandResolver) {
        self.commands.insert(name.into(), resolver);
    }

    pub fn register_predicate(&mut self, name: impl Into<String>, predicate: ReadyPredicate) {
        self.predicates.insert(name.into(), predicate);
    }

    pub fn command(&self, name: &str) -> Option<CommandResolver> {
        self.commands.get(name).copied()
    }

    pub fn predicate(&self, name: &str) -> Option<ReadyPredicate> {
        self.predicates.get(name).copied()
    }

    /// Check that every resolver and predicate the graph names is registered.
    pub fn validate(&self, graph: &DependencyGraph) -> Result<(), GraphError> {
        for template in graph.templates() {
            if let CommandSpec::Resolver { resolver } = &template.command {
                if !self.commands.contains_key(resolver) {
                    return Err(GraphError::UnknownResolver {
                        template: template.id.clone(),
                        name: resolver.clone(),
                    });
                }
            }
            if let Some(name) = &template.options.ready {
                if !self.predicates.contains_key(name) {
                    return Err(GraphError::UnknownPredicate {
                        template: template.id.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve the command of `template` for a claimed instance.
    pub fn resolve_command(
        &self,
        template: &TaskTemplate,
        instance: &TaskInstance,
        config: &Value,
    ) -> ControllerResult<String> {
        let name = match &template.command {
            CommandSpec::Literal(command) => return Ok(command.clone()),
            CommandSpec::Resolver { resolver } => resolver,
        };

        let resolver = self.command(name).ok_or_else(|| ControllerError::Resolver {
            template: template.id.clone(),
            message: format!("unknown resolver '{name}'"),
        })?;
        let product = ParsedSubject::parse(&instance.product)?;

        debug!(template_id = %template.id, resolver = %name, "resolving command");
        resolver(&product, instance, config).map_err(|message| ControllerError::Resolver {
            template: template.id.clone(),
            message,
        })
    }
}

/// `touch <config.fs.nfsRoot><product path>`
fn touch_product(product: &ParsedSubject, _: &TaskInstance, config: &Value) -> Result<String, String> {
    let root = config
        .pointer("/fs/nfsRoot")
        .and_then(Value::as_str)
        .ok_or_else(|| "global config has no fs.nfsRoot".to_string())?;
    Ok(format!("touch {root}{}", product.path))
}

fn echo_subject(product: &ParsedSubject, _: &TaskInstance, _: &Value) -> Result<String, String> {
    Ok(format!("echo {}", product.href))
}

/// `echo name=value ...` over the bound args, in name order.
fn echo_args(_: &ParsedSubject, instance: &TaskInstance, _: &Value) -> Result<String, String> {
    let args: Vec<String> = instance
        .args
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    Ok(format!("echo {}", args.join(" ")))
}

fn all_required_ready(_: &ParsedSubject, instance: &TaskInstance, _: &Value) -> bool {
    !instance.required.is_empty() && instance.ready.len() >= instance.required.len()
}

fn any_ready(_: &ParsedSubject, instance: &TaskInstance, _: &Value) -> bool {
    !instance.ready.is_empty()
}
