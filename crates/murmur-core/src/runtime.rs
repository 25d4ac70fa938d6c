use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use tokio::runtime::Runtime;

use crate::config::CoreConfig;
use crate::crypto::DmSigner;
use crate::models::{
    ConversationSummary, DecryptedMessage, FileAttachment, Protocol, RelayEntry, RelayMetadata,
};
use crate::relay::{NostrConnector, RelayConnector};
use crate::session::{DmSession, LoadingPhase};
use crate::store::{DurableStore, MemoryStore, SqliteStore};

pub type ResultSender<T> = Sender<Result<T, String>>;

pub enum DmCommand {
    Login {
        signer: Arc<dyn DmSigner>,
        response_tx: Option<ResultSender<()>>,
    },
    Logout,
    Send {
        partner: String,
        content: String,
        protocol: Protocol,
        attachments: Vec<FileAttachment>,
        response_tx: Option<ResultSender<DecryptedMessage>>,
    },
    MarkRead {
        partner: String,
    },
    /// Wipe stored snapshots and in-memory state, keeping the identity
    ClearCache,
    /// Re-run the load pipeline for the current identity
    Restart,
    PublishRelayList {
        relays: Vec<RelayEntry>,
        response_tx: Option<ResultSender<RelayMetadata>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChange {
    PhaseChanged(LoadingPhase),
    ConversationsChanged(Vec<ConversationSummary>),
    /// A send issued through the command channel was rejected
    SendFailed { partner: String, error: String },
}

#[derive(Clone)]
pub struct CoreHandle {
    command_tx: Sender<DmCommand>,
}

impl CoreHandle {
    pub fn send(&self, command: DmCommand) -> Result<(), mpsc::SendError<DmCommand>> {
        self.command_tx.send(command)
    }
}

/// Owns the worker thread that drives a [`DmSession`].
///
/// Mutations go through [`CoreHandle`]; reads can use [`session`](Self::session)
/// directly from any thread.
pub struct DmRuntime {
    session: DmSession,
    handle: CoreHandle,
    data_rx: Option<Receiver<DataChange>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DmRuntime {
    /// Runtime backed by SQLite under `config.data_dir` and live relays. Falls
    /// back to an in-memory store when the database cannot be opened.
    pub fn new(config: CoreConfig) -> Result<Self> {
        let durable: Arc<dyn DurableStore> = match SqliteStore::open(config.cache_db_path()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(error = %e, "cache database unavailable, running network-only");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_parts(config, durable, Arc::new(NostrConnector)))
    }

    pub fn with_parts(
        config: CoreConfig,
        durable: Arc<dyn DurableStore>,
        connector: Arc<dyn RelayConnector>,
    ) -> Self {
        let session = DmSession::new(config, durable, connector);

        let (command_tx, command_rx) = mpsc::channel::<DmCommand>();
        let (data_tx, data_rx) = mpsc::channel::<DataChange>();

        let worker = DmWorker {
            session: session.clone(),
            command_rx,
            data_tx,
        };
        let worker_handle = std::thread::spawn(move || {
            worker.run();
        });

        Self {
            session,
            handle: CoreHandle { command_tx },
            data_rx: Some(data_rx),
            worker_handle: Some(worker_handle),
        }
    }

    pub fn handle(&self) -> CoreHandle {
        self.handle.clone()
    }

    pub fn session(&self) -> &DmSession {
        &self.session
    }

    pub fn take_data_rx(&mut self) -> Option<Receiver<DataChange>> {
        self.data_rx.take()
    }

    pub fn shutdown(&mut self) {
        let _ = self.handle.send(DmCommand::Shutdown);
        if let Some(worker_handle) = self.worker_handle.take() {
            let _ = worker_handle.join();
        }
    }
}

struct DmWorker {
    session: DmSession,
    command_rx: Receiver<DmCommand>,
    data_tx: Sender<DataChange>,
}

impl DmWorker {
    fn run(self) {
        let rt = Runtime::new().expect("Failed to create runtime");
        let guard = rt.enter();
        tracing::debug!("dm worker thread started");

        rt.spawn(forward_changes(self.session.clone(), self.data_tx.clone()));

        while let Ok(cmd) = self.command_rx.recv() {
            match cmd {
                DmCommand::Login {
                    signer,
                    response_tx,
                } => {
                    self.session.login(signer);
                    if let Some(tx) = response_tx {
                        let _ = tx.send(Ok(()));
                    }
                }
                DmCommand::Logout => self.session.logout(),
                DmCommand::Send {
                    partner,
                    content,
                    protocol,
                    attachments,
                    response_tx,
                } => {
                    let result = rt
                        .block_on(self.session.send(&partner, &content, protocol, &attachments))
                        .map_err(|e| e.to_string());
                    if let Err(error) = &result {
                        tracing::warn!(%partner, %error, "send failed");
                        let _ = self.data_tx.send(DataChange::SendFailed {
                            partner: partner.clone(),
                            error: error.clone(),
                        });
                    }
                    if let Some(tx) = response_tx {
                        let _ = tx.send(result);
                    }
                }
                DmCommand::MarkRead { partner } => self.session.mark_read(&partner),
                DmCommand::ClearCache => self.session.clear_cache(),
                DmCommand::Restart => {
                    if !self.session.restart() {
                        tracing::warn!("restart requested without an identity");
                    }
                }
                DmCommand::PublishRelayList {
                    relays,
                    response_tx,
                } => {
                    let result = rt
                        .block_on(self.session.publish_relay_list(relays))
                        .map_err(|e| e.to_string());
                    if let Err(error) = &result {
                        tracing::warn!(%error, "relay list publish failed");
                    }
                    if let Some(tx) = response_tx {
                        let _ = tx.send(result);
                    }
                }
                DmCommand::Shutdown => {
                    tracing::debug!("dm worker shutting down");
                    self.session.logout();
                    break;
                }
            }
        }

        drop(guard);
        rt.shutdown_timeout(Duration::from_secs(1));
        tracing::debug!("dm worker thread stopped");
    }
}

async fn forward_changes(session: DmSession, data_tx: Sender<DataChange>) {
    let mut phase_rx = session.subscribe_phase();
    let mut conversations_rx = session.subscribe_conversations();

    loop {
        let change = tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                DataChange::PhaseChanged(*phase_rx.borrow_and_update())
            }
            changed = conversations_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                DataChange::ConversationsChanged(conversations_rx.borrow_and_update().clone())
            }
        };
        if data_tx.send(change).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeysSigner;
    use crate::testing::{signer_pair, FakeNetwork};
    use nostr_sdk::prelude::Keys;

    const RELAY: &str = "wss://relay.test";

    fn runtime(network: &FakeNetwork) -> DmRuntime {
        let mut config = CoreConfig::new(std::env::temp_dir().join("murmur-test"));
        config.relays = RelayMetadata::new(vec![RelayEntry::read_write(RELAY)], 0);
        config.query_timeout_ms = 1_000;
        DmRuntime::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(network.connector()),
        )
    }

    fn wait_for(rx: &Receiver<DataChange>, wanted: impl Fn(&DataChange) -> bool) {
        loop {
            let change = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("data change not received");
            if wanted(&change) {
                return;
            }
        }
    }

    #[test]
    fn test_login_reaches_ready_and_send_round_trips() {
        let network = FakeNetwork::new();
        let mut runtime = runtime(&network);
        let data_rx = runtime.take_data_rx().unwrap();
        let (alice, bob) = signer_pair();

        let (tx, rx) = mpsc::channel();
        runtime
            .handle()
            .send(DmCommand::Login {
                signer: alice,
                response_tx: Some(tx),
            })
            .unwrap();
        rx.recv().unwrap().unwrap();
        wait_for(&data_rx, |c| *c == DataChange::PhaseChanged(LoadingPhase::Ready));

        let (tx, rx) = mpsc::channel();
        runtime
            .handle()
            .send(DmCommand::Send {
                partner: bob.public_key().to_hex(),
                content: "hi".to_string(),
                protocol: Protocol::Nip17,
                attachments: Vec::new(),
                response_tx: Some(tx),
            })
            .unwrap();
        let message = rx.recv().unwrap().unwrap();
        assert_eq!(message.decrypted_content, "hi");

        wait_for(&data_rx, |c| {
            matches!(c, DataChange::ConversationsChanged(list) if list.len() == 1)
        });
        assert_eq!(runtime.session().message_count(), 1);

        runtime.shutdown();
        assert!(runtime.session().identity().is_none());
    }

    #[test]
    fn test_failed_send_is_reported() {
        let network = FakeNetwork::new();
        let mut runtime = runtime(&network);
        let data_rx = runtime.take_data_rx().unwrap();

        let signer = Arc::new(KeysSigner::new(Keys::generate()).without_nip04());
        runtime
            .handle()
            .send(DmCommand::Login {
                signer,
                response_tx: None,
            })
            .unwrap();

        let (tx, rx) = mpsc::channel();
        runtime
            .handle()
            .send(DmCommand::Send {
                partner: "abc".to_string(),
                content: "hi".to_string(),
                protocol: Protocol::Nip04,
                attachments: Vec::new(),
                response_tx: Some(tx),
            })
            .unwrap();
        assert!(rx.recv().unwrap().is_err());
        wait_for(&data_rx, |c| matches!(c, DataChange::SendFailed { .. }));
        assert_eq!(runtime.session().message_count(), 0);

        runtime.shutdown();
    }

    #[test]
    fn test_clear_cache_returns_to_idle() {
        let network = FakeNetwork::new();
        let mut runtime = runtime(&network);
        let data_rx = runtime.take_data_rx().unwrap();
        let (alice, _) = signer_pair();

        runtime
            .handle()
            .send(DmCommand::Login {
                signer: alice,
                response_tx: None,
            })
            .unwrap();
        wait_for(&data_rx, |c| *c == DataChange::PhaseChanged(LoadingPhase::Ready));

        runtime.handle().send(DmCommand::ClearCache).unwrap();
        wait_for(&data_rx, |c| *c == DataChange::PhaseChanged(LoadingPhase::Idle));
        assert!(runtime.session().identity().is_some());

        runtime.handle().send(DmCommand::Restart).unwrap();
        wait_for(&data_rx, |c| *c == DataChange::PhaseChanged(LoadingPhase::Ready));

        runtime.shutdown();
    }
}
