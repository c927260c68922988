//! One module per subcommand.

pub mod graph;
pub mod matching;
pub mod pending;
pub mod publish;
pub mod run;
pub mod sweep;
