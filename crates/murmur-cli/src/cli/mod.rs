pub mod commands;
pub mod config;

pub use commands::{normalize_pubkey, parse_attachment, run_command, CliCommand, CommandOptions};
pub use config::{CliConfig, Credentials};
