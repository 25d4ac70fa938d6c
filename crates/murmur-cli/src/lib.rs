pub mod cli;
pub mod format;
pub mod tracing_setup;
