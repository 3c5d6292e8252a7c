pub mod cli;
pub mod engine;
pub mod executor;
pub mod sentinel;

pub use cli::{CommonArgs, PhaseContext, EXIT_CONFIG, EXIT_OK, EXIT_RUNTIME, EXIT_SIGINT};
