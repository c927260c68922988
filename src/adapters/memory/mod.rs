//! In-process adapters for single-replica runs and tests.

pub mod message_bus;
pub mod task_state_store;

pub use message_bus::InMemoryMessageBus;
pub use task_state_store::InMemoryTaskStateStore;
