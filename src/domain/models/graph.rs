//! Raw dependency graph definition, as loaded from YAML or JSON.
//!
//! ```yaml
//! name: casita
//! config:
//!   fs: { nfs_root: /storage/nfs }
//! graph:
//!   "file:///out/{x}":
//!     name: Merge
//!     worker: merge.worker
//!     dependencies:
//!       - subject: "file:///a/{x}"
//!       - subject: "file:///b/{x}"
//!         constraints: { x: "^[0-9]+$" }
//!     options: { dependentCount: 2, timeout: 120000 }
//!     command: { resolver: touch-product }
//! ```
//!
//! Entry order is significant: the matcher evaluates templates in the order
//! they are written.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::errors::GraphError;

/// Top-level graph document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub name: String,

    /// Free-form configuration handed to command resolvers and ready predicates.
    #[serde(default)]
    pub config: serde_json::Value,

    /// Task templates keyed by their product subject template.
    #[serde(default, with = "ordered_entries")]
    pub graph: Vec<(String, TaskDefinition)>,
}

impl GraphDefinition {
    /// Parse a graph document. YAML is a superset of JSON, so both are accepted.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(source: &str) -> Result<Self, GraphError> {
        serde_yaml::from_str(source).map_err(|e| GraphError::Parse(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| GraphError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&source)
    }
}

/// One task template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(default)]
    pub name: String,

    /// Dispatch target; the controller's default worker when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    #[serde(default)]
    pub dependencies: Vec<DependencyDefinition>,

    #[serde(default)]
    pub options: TaskOptions,

    #[serde(default)]
    pub command: CommandSpec,
}

/// A subject the task depends on, with optional per-placeholder constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyDefinition {
    pub subject: String,

    /// Placeholder name to regex the bound value must satisfy.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, String>,
}

/// How often a template may fire for the same dependency subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Reuse a pending instance already tracking the subject.
    Once,
    /// Every arrival spawns a fresh instance.
    Everytime,
}

/// Aggregation options for a task template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    #[serde(default, alias = "dependent_count", skip_serializing_if = "Option::is_none")]
    pub dependent_count: Option<usize>,

    /// Name of a registered ready predicate; overrides `dependent_count`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<String>,

    /// Debounce window in milliseconds once the task is ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Milliseconds without updates before the sweeper forces dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunMode>,
}

impl TaskOptions {
    pub fn dependent_count(&self) -> usize {
        self.dependent_count.unwrap_or(1)
    }

    /// Fan-in templates aggregate every contribution into one instance per product.
    pub fn is_multi_dependency(&self) -> bool {
        self.dependent_count() > 1 || self.ready.is_some()
    }

    pub fn runs_everytime(&self) -> bool {
        self.run == Some(RunMode::Everytime)
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay.map(millis)
    }

    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.map_or(default, millis)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

/// The command a dispatched task carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Used verbatim.
    Literal(String),
    /// Computed at dispatch time by a registered resolver.
    Resolver { resolver: String },
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self::Literal(String::new())
    }
}

/// (De)serializes a map as an ordered list of entries.
mod ordered_entries {
    use std::fmt;
    use std::marker::PhantomData;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, V>(entries: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Vec<(String, V)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of subject templates to task definitions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if entries.iter().any(|(existing, _)| existing == &key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate task template {key}"
                        )));
                    }
                    entries.push((key, value));
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}
