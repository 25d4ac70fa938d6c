use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use murmur_cli::cli::{parse_attachment, run_command, CliCommand, CliConfig, CommandOptions};
use murmur_cli::tracing_setup::init_tracing;
use murmur_core::constants::PAGE_SIZE;
use murmur_core::Protocol;

#[derive(Parser)]
#[command(name = "murmur-cli")]
#[command(about = "Sync and send Nostr direct messages")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (contains dataDir, coreConfig, credentials)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Seconds to wait for the initial sync before printing
    #[arg(long, default_value_t = 10)]
    wait_secs: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync, then list conversations
    Conversations,

    /// Sync, then list the newest messages with a partner
    Messages {
        /// Partner public key (hex or npub)
        partner: String,
        /// Number of messages to show
        #[arg(long, short = 'n', default_value_t = PAGE_SIZE)]
        count: usize,
    },

    /// Send a direct message
    Send {
        /// Recipient public key (hex or npub)
        partner: String,
        /// Message text
        content: String,
        /// nip04 or nip17
        #[arg(long, default_value = "nip17")]
        protocol: Protocol,
        /// Attachment as <url>:<mime/type> (can be specified multiple times)
        #[arg(long = "attach", short = 'a')]
        attach: Vec<String>,
    },

    /// Print data changes as JSON lines until interrupted
    Watch,

    /// Print the current relay list
    Relays,

    /// Drop the local message cache
    ClearCache,
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli);

    let command = match cli.command {
        Some(Commands::Conversations) => CliCommand::Conversations,
        Some(Commands::Messages { partner, count }) => CliCommand::Messages { partner, count },
        Some(Commands::Send {
            partner,
            content,
            protocol,
            attach,
        }) => {
            let attachments = match attach.iter().map(|a| parse_attachment(a)).collect() {
                Ok(attachments) => attachments,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };
            CliCommand::Send {
                partner,
                content,
                protocol,
                attachments,
            }
        }
        Some(Commands::Watch) => CliCommand::Watch,
        Some(Commands::Relays) => CliCommand::Relays,
        Some(Commands::ClearCache) => CliCommand::ClearCache,
        None => {
            eprintln!("No command specified. Use --help for usage.");
            std::process::exit(1);
        }
    };

    let options = CommandOptions {
        pretty: cli.pretty,
        wait: Duration::from_secs(cli.wait_secs),
    };

    if let Err(e) = run_command(command, &config, &options) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> CliConfig {
    match &cli.config {
        Some(path) => match CliConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => CliConfig::default_path()
            .filter(|path| path.exists())
            .and_then(|path| match CliConfig::load(&path) {
                Ok(config) => Some(config),
                Err(e) => {
                    eprintln!("Warning: {}", e);
                    None
                }
            })
            .unwrap_or_default(),
    }
}
