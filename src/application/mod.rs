//! Application layer: the bus-facing consumer loop and subject publisher.

pub mod subject_consumer;

pub use subject_consumer::{ConsumeOutcome, SubjectConsumer, SubjectPublisher};
