//! Domain errors for the subject-flow resolver.

use thiserror::Error;

/// Errors raised while compiling, parsing or rendering subjects.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubjectError {
    #[error("Empty subject")]
    Empty,

    #[error("Invalid placeholder name '{name}' in {pattern}")]
    InvalidPlaceholder { pattern: String, name: String },

    #[error("Unterminated placeholder in {0}")]
    UnterminatedPlaceholder(String),

    #[error("Duplicate placeholder '{name}' in {pattern}")]
    DuplicatePlaceholder { pattern: String, name: String },

    #[error("No binding for placeholder '{name}' in {pattern}")]
    MissingBinding { pattern: String, name: String },

    #[error("Invalid subject URI {subject}: {reason}")]
    InvalidUri { subject: String, reason: String },

    #[error("Failed to compile pattern {pattern}: {reason}")]
    Regex { pattern: String, reason: String },
}

/// Errors raised while building the dependency graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Failed to read graph file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse graph definition: {0}")]
    Parse(String),

    #[error("Task template {template}: {source}")]
    Pattern {
        template: String,
        #[source]
        source: SubjectError,
    },

    #[error("Task template {template}: invalid constraint on '{placeholder}': {reason}")]
    Constraint {
        template: String,
        placeholder: String,
        reason: String,
    },

    #[error("Task template {template}: unknown command resolver '{name}'")]
    UnknownResolver { template: String, name: String },

    #[error("Task template {template}: unknown ready predicate '{name}'")]
    UnknownPredicate { template: String, name: String },

    #[error("Task template {template}: dependentCount must be at least 1")]
    ZeroDependentCount { template: String },
}

/// Reasons an inbound bus message is rejected as malformed.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Message is not a valid subject-ready event: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Subject-ready event {id} has no subject")]
    MissingSubject { id: String },
}

/// Errors raised by the task aggregation state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised by the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Consumer has no subscriptions")]
    NotSubscribed,

    #[error("Bus closed")]
    Closed,
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors surfaced by the readiness and dispatch controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error("Unknown task template: {0}")]
    UnknownTemplate(String),

    #[error("Command resolver for {template} failed: {message}")]
    Resolver { template: String, message: String },

    #[error("{failed} dependent tasks of {subject} failed, first: {first}")]
    Matches {
        subject: String,
        failed: usize,
        retryable: bool,
        first: Box<ControllerError>,
    },
}

impl ControllerError {
    /// Whether redelivering the triggering event may succeed.
    ///
    /// Resolver failures happen after the instance was claimed, so they are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(_) | Self::Bus(_) => true,
            Self::Matches { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Fold the per-template failures of one subject into a single error.
    ///
    /// A lone failure is returned as is.
    pub fn combine(subject: &str, mut failures: Vec<ControllerError>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop(),
            failed => {
                let retryable = failures.iter().any(Self::is_retryable);
                let first = failures.swap_remove(0);
                Some(Self::Matches {
                    subject: subject.to_string(),
                    failed,
                    retryable,
                    first: Box::new(first),
                })
            }
        }
    }
}

pub type ControllerResult<T> = Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_error_display() {
        let err = SubjectError::MissingBinding {
            pattern: "file:///a/{x}".to_string(),
            name: "x".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No binding for placeholder 'x' in file:///a/{x}"
        );
    }

    #[test]
    fn test_retryable_classification() {
        let store = ControllerError::Store(StoreError::Connection("down".to_string()));
        assert!(store.is_retryable());

        let resolver = ControllerError::Resolver {
            template: "file:///out/{x}".to_string(),
            message: "boom".to_string(),
        };
        assert!(!resolver.is_retryable());
        assert!(!ControllerError::UnknownTemplate("t".to_string()).is_retryable());
    }

    #[test]
    fn test_combine_failures() {
        let resolver = || ControllerError::Resolver {
            template: "file:///nfs/{x}".to_string(),
            message: "no root".to_string(),
        };
        let store = || ControllerError::Store(StoreError::Connection("down".to_string()));

        assert!(ControllerError::combine("file:///raw/1", Vec::new()).is_none());

        let single = ControllerError::combine("file:///raw/1", vec![resolver()]).unwrap();
        assert!(matches!(single, ControllerError::Resolver { .. }));

        let permanent = ControllerError::combine("file:///raw/1", vec![resolver(), resolver()]).unwrap();
        assert!(matches!(permanent, ControllerError::Matches { failed: 2, .. }));
        assert!(!permanent.is_retryable());

        let mixed = ControllerError::combine("file:///raw/1", vec![resolver(), store()]).unwrap();
        assert!(mixed.is_retryable());
        assert!(mixed.to_string().starts_with("2 dependent tasks of file:///raw/1 failed"));
    }
}
