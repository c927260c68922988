//! Services: the dependency graph, resolver registry, controller and sweeper.

pub mod controller;
pub mod dependency_graph;
pub mod resolvers;
pub mod sweeper;

pub use controller::Controller;
pub use dependency_graph::{
    CompiledDependency, DependencyGraph, DependentTaskMatch, TaskGraph, TaskGraphEdge,
    TaskTemplate,
};
pub use resolvers::{CommandResolver, ReadyPredicate, ResolverRegistry};
pub use sweeper::{StopReason, SweepReport, Sweeper, SweeperHandle, SweeperStatus};
