//! Domain layer for the subject-flow resolver
//!
//! This module contains the core models and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{BusError, ControllerError, EventError, GraphError, StoreError, SubjectError};
