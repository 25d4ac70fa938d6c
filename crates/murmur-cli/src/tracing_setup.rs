use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,nostr_relay_pool=warn";

/// Install the global subscriber. `MURMUR_LOG` sets the filter; when
/// `MURMUR_LOG_FILE` is set, output goes to that file instead of stderr.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("MURMUR_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if let Ok(log_path) = std::env::var("MURMUR_LOG_FILE") {
        match OpenOptions::new().create(true).append(true).open(&log_path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true)
                    .init();
                return;
            }
            Err(e) => eprintln!("Failed to open log file {}: {}", log_path, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
