//! Adapters implementing the domain ports.
//!
//! - `sqlite`: shared store and bus that several replicas can attach to
//! - `memory`: in-process store and bus for a single replica

pub mod memory;
pub mod sqlite;
