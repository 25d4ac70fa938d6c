//! The load pipeline for one identity: cache, history, live subscription.

use futures::StreamExt;
use tokio::sync::watch;

use super::engine::DmSession;
use super::phase::LoadingPhase;
use crate::constants::{kinds, GIFT_WRAP_TIMESTAMP_JITTER_SECS};
use crate::crypto::MessageDecryptor;
use crate::models::{unix_now, DecryptedMessage, RawEvent};
use crate::relay::{DmFilter, EventStream};

pub(super) async fn run(
    session: DmSession,
    decryptor: MessageDecryptor,
    epoch: u64,
    mut cancel: watch::Receiver<bool>,
) {
    let me = decryptor.me().to_string();

    let cached = session.inner.cache.load(&me).await;
    let restored = decrypt_all(&decryptor, &cached).await;
    if is_cancelled(&cancel) {
        return;
    }
    let count = session.apply(epoch, restored);
    tracing::info!(stored = cached.len(), restored = count, "cache phase finished");
    if !advance(&session, epoch, LoadingPhase::Relays) {
        return;
    }

    let timeout = session.config().query_timeout();
    tokio::select! {
        _ = cancel.wait_for(|c| *c) => return,
        result = tokio::time::timeout(timeout, load_history(&session, &decryptor, epoch)) => {
            if result.is_err() {
                tracing::warn!(?timeout, "historical query did not finish in time");
            }
        }
    }
    if !advance(&session, epoch, LoadingPhase::Subscriptions) {
        return;
    }

    let filters = live_filters(&me, unix_now());
    let subscribed = tokio::select! {
        _ = cancel.wait_for(|c| *c) => return,
        result = session.inner.pool.subscribe(&filters) => result,
    };
    match subscribed {
        Ok(stream) => {
            tokio::spawn(dispatch_live(
                session.clone(),
                decryptor,
                epoch,
                cancel,
                stream,
            ));
        }
        Err(e) => tracing::warn!(error = %e, "live subscription failed"),
    }
    advance(&session, epoch, LoadingPhase::Ready);
}

fn advance(session: &DmSession, epoch: u64, to: LoadingPhase) -> bool {
    match session.inner.phase.advance(epoch, to) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "pipeline stopped");
            false
        }
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

async fn decrypt_all(
    decryptor: &MessageDecryptor,
    events: &[RawEvent],
) -> Vec<(String, DecryptedMessage)> {
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        if let Some(decrypted) = decryptor.decrypt(event).await {
            out.push(decrypted);
        }
    }
    out
}

/// NIP-04 in both directions plus gift wraps addressed to us. Each batch is
/// applied as soon as its query returns.
async fn load_history(session: &DmSession, decryptor: &MessageDecryptor, epoch: u64) {
    let me = decryptor.me();
    let limit = session.config().history_limit;

    let nip04 = [
        DmFilter::new().kind(kinds::ENCRYPTED_DM).p_tag(me).limit(limit),
        DmFilter::new().kind(kinds::ENCRYPTED_DM).author(me).limit(limit),
    ];
    let nip17 = [DmFilter::new().kind(kinds::GIFT_WRAP).p_tag(me).limit(limit)];

    futures::join!(
        fetch_and_apply(session, decryptor, epoch, &nip04, "nip04"),
        fetch_and_apply(session, decryptor, epoch, &nip17, "nip17"),
    );
}

async fn fetch_and_apply(
    session: &DmSession,
    decryptor: &MessageDecryptor,
    epoch: u64,
    filters: &[DmFilter],
    label: &str,
) {
    let timeout = session.config().query_timeout();
    match session.inner.pool.query(filters, timeout).await {
        Ok(events) => {
            let batch = decrypt_all(decryptor, &events).await;
            let inserted = session.apply(epoch, batch);
            tracing::info!(label, fetched = events.len(), inserted, "history loaded");
        }
        Err(e) => tracing::warn!(label, error = %e, "history query failed"),
    }
}

/// Gift wraps are backdated by up to two days, so their window opens earlier.
fn live_filters(me: &str, now: u64) -> Vec<DmFilter> {
    vec![
        DmFilter::new()
            .kind(kinds::ENCRYPTED_DM)
            .p_tag(me)
            .since(now),
        DmFilter::new()
            .kind(kinds::GIFT_WRAP)
            .p_tag(me)
            .since(now.saturating_sub(GIFT_WRAP_TIMESTAMP_JITTER_SECS)),
    ]
}

async fn dispatch_live(
    session: DmSession,
    decryptor: MessageDecryptor,
    epoch: u64,
    mut cancel: watch::Receiver<bool>,
    mut stream: EventStream,
) {
    loop {
        tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            next = stream.next() => {
                let Some(event) = next else {
                    tracing::info!("live subscription ended");
                    break;
                };
                let Some(decrypted) = decryptor.decrypt(&event).await else {
                    continue;
                };
                if is_cancelled(&cancel) {
                    break;
                }
                session.apply(epoch, vec![decrypted]);
            }
        }
    }
    tracing::debug!("live dispatcher stopped");
}
