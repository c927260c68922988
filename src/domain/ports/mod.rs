//! Port trait definitions (Hexagonal Architecture)
//!
//! - TaskStateStore: shared storage of pending task instances
//! - MessageBus: inbound subject announcements and outbound task dispatch
//!
//! The controller depends only on these traits; SQLite and in-memory
//! adapters implement them.

pub mod message_bus;
pub mod task_state_store;

pub use message_bus::{BusMessage, MessageBus};
pub use task_state_store::TaskStateStore;
