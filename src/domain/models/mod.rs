pub mod config;
pub mod events;
pub mod graph;
pub mod subject;
pub mod task_instance;

pub use config::{
    Backend, BusConfig, Config, ControllerConfig, DatabaseConfig, LoggingConfig, SweeperConfig,
};
pub use events::{
    topic_name, ControllerMessage, SubjectReadyData, SubjectReadyEvent, TaskReadyData,
    TaskReadyEvent, SUBJECT_READY_TYPE, TIMEOUT_REASON,
};
pub use graph::{CommandSpec, DependencyDefinition, GraphDefinition, RunMode, TaskDefinition, TaskOptions};
pub use subject::{Bindings, ParsedSubject, SubjectPattern, WILDCARD};
pub use task_instance::{SetAdd, TaskInstance};
