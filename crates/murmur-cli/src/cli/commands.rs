use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use murmur_core::models::unix_now;
use murmur_core::{
    ConversationPage, ConversationSummary, DataChange, DecryptedMessage, DmCommand, DmRuntime,
    FileAttachment, KeysSigner, LoadingPhase, Protocol,
};
use nostr_sdk::prelude::PublicKey;
use serde::Serialize;

use super::config::CliConfig;
use crate::format::{format_conversation_time, format_full_date_time};

const PHASE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Conversations,
    Messages {
        partner: String,
        count: usize,
    },
    Send {
        partner: String,
        content: String,
        protocol: Protocol,
        attachments: Vec<FileAttachment>,
    },
    Watch,
    Relays,
    ClearCache,
}

#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub pretty: bool,
    /// Upper bound on waiting for the sync pipeline to become ready
    pub wait: Duration,
}

#[derive(Serialize)]
struct ConversationRow {
    partner: String,
    time: String,
    last_activity: u64,
    preview: Option<String>,
    unread: usize,
    nip04: bool,
    nip17: bool,
}

impl ConversationRow {
    fn from_summary(summary: &ConversationSummary, now: u64) -> Self {
        Self {
            partner: summary.partner_id.clone(),
            time: format_conversation_time(summary.last_activity, now),
            last_activity: summary.last_activity,
            preview: summary.last_message.as_ref().map(preview),
            unread: summary.unread_count,
            nip04: summary.has_nip04,
            nip17: summary.has_nip17,
        }
    }
}

#[derive(Serialize)]
struct MessageRow {
    id: String,
    author: String,
    created_at: u64,
    time: String,
    protocol: Protocol,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&DecryptedMessage> for MessageRow {
    fn from(message: &DecryptedMessage) -> Self {
        Self {
            id: message.id().to_string(),
            author: message.author().to_string(),
            created_at: message.created_at(),
            time: format_full_date_time(message.created_at()),
            protocol: message.protocol(),
            content: message.decrypted_content.clone(),
            error: message.error.clone(),
        }
    }
}

fn preview(message: &DecryptedMessage) -> String {
    if message.is_unreadable() {
        return "[unable to decrypt]".to_string();
    }
    let text = message.decrypted_content.replace('\n', " ");
    if text.chars().count() > 80 {
        format!("{}…", text.chars().take(80).collect::<String>())
    } else {
        text
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

/// Accepts hex or npub and returns hex.
pub fn normalize_pubkey(input: &str) -> Result<String> {
    let pubkey = PublicKey::parse(input.trim())
        .with_context(|| format!("Invalid public key: {}", input))?;
    Ok(pubkey.to_hex())
}

/// Parse `url:mime`, splitting on the last colon.
pub fn parse_attachment(value: &str) -> Result<FileAttachment> {
    let (url, mime) = value
        .rsplit_once(':')
        .filter(|(url, mime)| !url.is_empty() && mime.contains('/'))
        .ok_or_else(|| anyhow::anyhow!("Attachment must look like <url>:<mime/type>: {}", value))?;
    Ok(FileAttachment::new(url, mime))
}

pub fn run_command(command: CliCommand, config: &CliConfig, options: &CommandOptions) -> Result<()> {
    let mut runtime = DmRuntime::new(config.core_config()?)?;
    let result = execute(&mut runtime, command, config, options);
    runtime.shutdown();
    result
}

fn execute(
    runtime: &mut DmRuntime,
    command: CliCommand,
    config: &CliConfig,
    options: &CommandOptions,
) -> Result<()> {
    match command {
        CliCommand::Conversations => {
            login(runtime, config)?;
            wait_until_ready(runtime, options.wait);
            let now = unix_now();
            let rows: Vec<ConversationRow> = runtime
                .session()
                .conversations()
                .iter()
                .map(|s| ConversationRow::from_summary(s, now))
                .collect();
            print_json(&rows, options.pretty)
        }
        CliCommand::Messages { partner, count } => {
            let partner = normalize_pubkey(&partner)?;
            login(runtime, config)?;
            wait_until_ready(runtime, options.wait);
            let page: ConversationPage = runtime.session().page(&partner, count);
            let rows: Vec<MessageRow> = page.messages.iter().map(MessageRow::from).collect();
            print_json(
                &serde_json::json!({
                    "partner": partner,
                    "total": page.total_count,
                    "hasMore": page.has_more,
                    "messages": rows,
                }),
                options.pretty,
            )
        }
        CliCommand::Send {
            partner,
            content,
            protocol,
            attachments,
        } => {
            login(runtime, config)?;
            // Give the relay list lookup a chance to route the publish.
            wait_until_ready(runtime, options.wait);

            let (tx, rx) = mpsc::channel();
            runtime
                .handle()
                .send(DmCommand::Send {
                    partner,
                    content,
                    protocol,
                    attachments,
                    response_tx: Some(tx),
                })
                .map_err(|_| anyhow::anyhow!("Failed to send Send command"))?;
            let message = rx
                .recv()
                .context("Worker stopped before the message was sent")?
                .map_err(|e| anyhow::anyhow!(e))?;
            print_json(&MessageRow::from(&message), options.pretty)
        }
        CliCommand::Watch => {
            let data_rx = runtime
                .take_data_rx()
                .ok_or_else(|| anyhow::anyhow!("Data channel already taken"))?;
            login(runtime, config)?;
            for change in data_rx.iter() {
                let value = match change {
                    DataChange::PhaseChanged(phase) => {
                        serde_json::json!({ "type": "phase", "phase": phase })
                    }
                    DataChange::ConversationsChanged(summaries) => {
                        let now = unix_now();
                        let rows: Vec<ConversationRow> = summaries
                            .iter()
                            .map(|s| ConversationRow::from_summary(s, now))
                            .collect();
                        serde_json::json!({ "type": "conversations", "conversations": rows })
                    }
                    DataChange::SendFailed { partner, error } => {
                        serde_json::json!({ "type": "sendFailed", "partner": partner, "error": error })
                    }
                };
                print_json(&value, options.pretty)?;
            }
            Ok(())
        }
        CliCommand::Relays => {
            if config.credentials().is_some() {
                login(runtime, config)?;
                wait_until_ready(runtime, options.wait);
            }
            print_json(&runtime.session().relay_metadata(), options.pretty)
        }
        CliCommand::ClearCache => {
            runtime
                .handle()
                .send(DmCommand::ClearCache)
                .map_err(|_| anyhow::anyhow!("Failed to send ClearCache command"))?;
            print_json(&serde_json::json!({ "cleared": true }), options.pretty)
        }
    }
}

fn login(runtime: &DmRuntime, config: &CliConfig) -> Result<()> {
    let credentials = config.credentials().ok_or_else(|| {
        anyhow::anyhow!("No credentials: add them to the config file or set MURMUR_KEY")
    })?;
    let keys = credentials.keys()?;

    let (tx, rx) = mpsc::channel();
    runtime
        .handle()
        .send(DmCommand::Login {
            signer: Arc::new(KeysSigner::new(keys)),
            response_tx: Some(tx),
        })
        .map_err(|_| anyhow::anyhow!("Failed to send Login command"))?;
    rx.recv()
        .context("Worker stopped during login")?
        .map_err(|e| anyhow::anyhow!(e))
}

/// Poll until the pipeline reports ready or `wait` elapses. Returns whether it
/// became ready.
fn wait_until_ready(runtime: &DmRuntime, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        let phase = runtime.session().phase();
        if phase == LoadingPhase::Ready {
            return true;
        }
        if Instant::now() >= deadline {
            tracing::warn!(%phase, ?wait, "sync not ready, showing partial results");
            return false;
        }
        std::thread::sleep(PHASE_POLL_INTERVAL);
    }
}
