use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::phase::{LoadingPhase, PhaseMachine};
use super::{pipeline, relay_list};
use crate::config::CoreConfig;
use crate::crypto::{DmSigner, MessageDecryptor};
use crate::models::{
    unix_now, ConversationPage, ConversationSummary, DecryptedMessage, RelayMetadata,
};
use crate::relay::{RelayConnector, RelayPool};
use crate::store::{DurableStore, MessageStore, PersistenceCache};

/// Handle to the DM engine. Cheap to clone; all clones share one session.
///
/// Login, logout, clear and restart must be called from within a tokio runtime
/// because they spawn the pipeline tasks.
#[derive(Clone)]
pub struct DmSession {
    pub(super) inner: Arc<SessionInner>,
}

pub(super) struct SessionInner {
    pub(super) config: CoreConfig,
    pub(super) pool: Arc<RelayPool>,
    pub(super) cache: PersistenceCache,
    pub(super) messages: Arc<Mutex<MessageStore>>,
    pub(super) phase: PhaseMachine,
    summaries: watch::Sender<Vec<ConversationSummary>>,
    pub(super) state: Mutex<SessionState>,
}

#[derive(Default)]
pub(super) struct SessionState {
    pub(super) signer: Option<Arc<dyn DmSigner>>,
    pub(super) scope: Option<ActiveScope>,
}

/// Everything tied to one run of the pipeline. Dropped on teardown.
pub(super) struct ActiveScope {
    pub(super) decryptor: MessageDecryptor,
    cancel_tx: watch::Sender<bool>,
}

impl DmSession {
    pub fn new(
        config: CoreConfig,
        durable: Arc<dyn DurableStore>,
        connector: Arc<dyn RelayConnector>,
    ) -> Self {
        let pool = Arc::new(RelayPool::new(
            connector,
            config.relays.clone(),
            config.eose_grace(),
        ));
        let cache = PersistenceCache::new(durable, config.cache_debounce());
        let (summaries, _rx) = watch::channel(Vec::new());

        Self {
            inner: Arc::new(SessionInner {
                config,
                pool,
                cache,
                messages: Arc::new(Mutex::new(MessageStore::new())),
                phase: PhaseMachine::new(),
                summaries,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Hex public key of the logged-in identity.
    pub fn identity(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .signer
            .as_ref()
            .map(|s| s.public_key().to_hex())
    }

    pub(super) fn signer(&self) -> Option<Arc<dyn DmSigner>> {
        self.inner.state.lock().signer.clone()
    }

    pub fn phase(&self) -> LoadingPhase {
        self.inner.phase.current()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<LoadingPhase> {
        self.inner.phase.subscribe()
    }

    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.inner.summaries.borrow().clone()
    }

    pub fn subscribe_conversations(&self) -> watch::Receiver<Vec<ConversationSummary>> {
        self.inner.summaries.subscribe()
    }

    pub fn page(&self, partner: &str, visible_count: usize) -> ConversationPage {
        self.inner.messages.lock().page(partner, visible_count)
    }

    pub fn message_count(&self) -> usize {
        self.inner.messages.lock().message_count()
    }

    pub fn mark_read(&self, partner: &str) {
        let mut messages = self.inner.messages.lock();
        messages.mark_read(partner, unix_now());
        self.inner.summaries.send_replace(messages.summaries());
    }

    pub fn relay_metadata(&self) -> RelayMetadata {
        self.inner.pool.metadata()
    }

    /// Last-writer-wins. Only calls made after acceptance see the new relays.
    pub fn propose_relay_metadata(&self, candidate: RelayMetadata) -> bool {
        self.inner.pool.propose_metadata(candidate)
    }

    /// Start syncing for `signer`, replacing any previous identity.
    pub fn login(&self, signer: Arc<dyn DmSigner>) {
        let mut state = self.inner.state.lock();
        if state.scope.is_some() {
            self.flush_and_stop(&mut state);
        }
        state.signer = Some(signer);
        self.start(&mut state);
    }

    /// Stop syncing and forget the identity. Durable snapshots are kept, and a
    /// pending snapshot write is flushed first.
    pub fn logout(&self) {
        let mut state = self.inner.state.lock();
        self.flush();
        state.signer = None;
        self.stop(&mut state);
        tracing::info!("logged out");
    }

    /// Wipe every stored snapshot and all in-memory state. The identity is
    /// kept; call [`restart`](Self::restart) to sync again.
    pub fn clear_cache(&self) {
        let mut state = self.inner.state.lock();
        self.stop(&mut state);
        self.inner.cache.clear(None);
        tracing::info!("message cache cleared");
    }

    /// Re-run the whole pipeline for the retained identity. Returns false when
    /// nobody is logged in.
    pub fn restart(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.signer.is_none() {
            return false;
        }
        if state.scope.is_some() {
            self.flush_and_stop(&mut state);
        }
        self.start(&mut state);
        true
    }

    /// Write any pending snapshot immediately.
    pub fn flush(&self) {
        self.inner.cache.flush(&self.inner.messages);
    }

    /// Insert decrypted messages produced under `epoch`. Results from an older
    /// epoch are discarded. Returns the number of new messages.
    pub(super) fn apply(&self, epoch: u64, batch: Vec<(String, DecryptedMessage)>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let (owner, inserted) = {
            let mut messages = self.inner.messages.lock();
            if messages.epoch() != epoch {
                tracing::debug!(count = batch.len(), "discarding messages from stale pipeline");
                return 0;
            }

            let mut inserted = 0;
            for (partner, message) in batch {
                if messages.insert(&partner, message) {
                    inserted += 1;
                }
            }
            if inserted == 0 {
                return 0;
            }

            self.inner.summaries.send_replace(messages.summaries());
            (messages.owner().map(str::to_string), inserted)
        };

        if let Some(owner) = owner {
            self.inner
                .cache
                .schedule_write(self.inner.messages.clone(), owner, epoch);
        }
        inserted
    }

    fn start(&self, state: &mut SessionState) {
        let Some(signer) = state.signer.clone() else {
            return;
        };

        let decryptor = MessageDecryptor::new(signer);
        let me = decryptor.me().to_string();
        let epoch = self.inner.messages.lock().reset(Some(me.clone()));
        self.inner.summaries.send_replace(Vec::new());
        self.inner.phase.reset(epoch);
        if let Err(e) = self.inner.phase.begin(epoch) {
            tracing::warn!(error = %e, "could not start loading pipeline");
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        tokio::spawn(pipeline::run(
            self.clone(),
            decryptor.clone(),
            epoch,
            cancel_rx.clone(),
        ));
        tokio::spawn(relay_list::sync_relay_list(
            self.inner.pool.clone(),
            me.clone(),
            cancel_rx,
        ));

        tracing::info!(identity = %me, epoch, "dm session started");
        state.scope = Some(ActiveScope {
            decryptor,
            cancel_tx,
        });
    }

    fn flush_and_stop(&self, state: &mut SessionState) {
        self.flush();
        self.stop(state);
    }

    /// Cancel running tasks and reset memory and phase to empty/idle.
    fn stop(&self, state: &mut SessionState) {
        if let Some(scope) = state.scope.take() {
            let _ = scope.cancel_tx.send(true);
        }
        self.inner.cache.cancel_pending();

        let owner = state.signer.as_ref().map(|s| s.public_key().to_hex());
        let epoch = self.inner.messages.lock().reset(owner);
        self.inner.phase.reset(epoch);
        self.inner.summaries.send_replace(Vec::new());
    }
}
