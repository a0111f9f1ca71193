//! In-memory registry of in-flight channels.
//!
//! Holds the bidirectional map between channel IDs and engine request keys
//! plus the ancillary per-channel state: cancel handles for requests we
//! opened, pending latches for requests the engine has not yet surfaced,
//! the requestor-cancelled flag, the transfer-started flag, deferred
//! extensions, and store-override flags.
//!
//! Every operation is a composite performed under one critical section of a
//! single reader/writer lock. The lock is never held across an `.await` or
//! across calls into the engine or the session layer.

use libp2p::PeerId;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::engine::{ExtensionData, RequestId};
use crate::error::TransferError;
use crate::types::ChannelId;

/// Engine request key: the engine numbers requests per peer, so the peer
/// that owns the request on the wire qualifies the sequence number. For
/// requests we open the peer is the local peer; for requests we serve it is
/// the remote requestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EngineKey {
    pub request_id: RequestId,
    pub peer: PeerId,
}

/// Cancellation state of an outgoing request we opened.
struct CancelHandle {
    /// Cancels the engine request when triggered.
    token: CancellationToken,
    /// Closes once the request's executor has fully drained.
    completed: watch::Receiver<bool>,
}

/// What the incoming-request hook must do after its bookkeeping.
pub(crate) struct IncomingRequestBookkeeping {
    /// Pause the response even though the session did not ask to: the
    /// channel is restarting and its transfer never left the paused state.
    pub pause_anyway: bool,
    /// Extensions queued while the requestor was cancelled, FIFO.
    pub deferred: Vec<ExtensionData>,
    /// A store override is registered for this channel.
    pub use_store: bool,
}

#[derive(Default)]
struct RegistryState {
    request_to_channel: HashMap<EngineKey, ChannelId>,
    channel_to_request: HashMap<ChannelId, EngineKey>,
    cancel_handles: HashMap<ChannelId, CancelHandle>,
    pending: HashMap<ChannelId, watch::Sender<bool>>,
    requestor_cancelled: HashSet<ChannelId>,
    transfer_started: HashMap<ChannelId, bool>,
    deferred_extensions: HashMap<ChannelId, Vec<ExtensionData>>,
    stores: HashSet<ChannelId>,
}

pub(crate) struct ChannelRegistry {
    state: RwLock<RegistryState>,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().expect("channel registry poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().expect("channel registry poisoned")
    }

    // ------------------------------------------------------------------
    // Outgoing request lifecycle
    // ------------------------------------------------------------------

    /// If an outgoing request already exists for this channel, cancel it
    /// and return its completion latch for the caller to wait on.
    pub(crate) fn cancel_existing(&self, channel_id: ChannelId) -> Option<watch::Receiver<bool>> {
        let state = self.write();
        state.cancel_handles.get(&channel_id).map(|handle| {
            let completed = handle.completed.clone();
            handle.token.cancel();
            completed
        })
    }

    /// Register a fresh outgoing request: create the pending latch and a
    /// cancel handle with a context derived from the caller's.
    ///
    /// Returns the request context for the engine and the completion-latch
    /// sender for the request's executor.
    pub(crate) fn register_outgoing(
        &self,
        channel_id: ChannelId,
        ctx: &CancellationToken,
    ) -> (CancellationToken, watch::Sender<bool>) {
        let request_ctx = ctx.child_token();
        let (completed_tx, completed_rx) = watch::channel(false);
        let (pending_tx, _) = watch::channel(false);

        let mut state = self.write();
        state.pending.insert(channel_id, pending_tx);
        state.cancel_handles.insert(
            channel_id,
            CancelHandle {
                token: request_ctx.clone(),
                completed: completed_rx,
            },
        );

        (request_ctx, completed_tx)
    }

    /// Finish the outgoing-request hook's bookkeeping: install both ID
    /// mappings when the session accepted the open, close and remove the
    /// pending latch, and report whether a store override is registered.
    pub(crate) fn complete_outgoing_open(
        &self,
        channel_id: ChannelId,
        key: EngineKey,
        opened: bool,
    ) -> bool {
        let mut state = self.write();
        if opened {
            state.request_to_channel.insert(key, channel_id);
            state.channel_to_request.insert(channel_id, key);
        }
        if let Some(pending) = state.pending.remove(&channel_id) {
            pending.send_replace(true);
        }
        state.stores.contains(&channel_id)
    }

    /// Cancellation token of the channel's outgoing request, if we opened one.
    pub(crate) fn cancel_handle_token(&self, channel_id: ChannelId) -> Option<CancellationToken> {
        self.read()
            .cancel_handles
            .get(&channel_id)
            .map(|handle| handle.token.clone())
    }

    /// Cancel every outstanding outgoing request.
    pub(crate) fn cancel_all(&self) {
        let state = self.read();
        for handle in state.cancel_handles.values() {
            handle.token.cancel();
        }
    }

    // ------------------------------------------------------------------
    // Key lookup
    // ------------------------------------------------------------------

    /// Resolve the engine key for a channel, waiting on the pending latch
    /// when the outgoing-request hook has not fired yet.
    ///
    /// Fails with `ChannelNotFound` when the channel has neither a key nor
    /// a pending outgoing request, or when `ctx` is cancelled first.
    pub(crate) async fn await_engine_key(
        &self,
        ctx: &CancellationToken,
        channel_id: ChannelId,
    ) -> Result<EngineKey, TransferError> {
        loop {
            let mut pending = {
                let state = self.read();
                if let Some(key) = state.channel_to_request.get(&channel_id) {
                    return Ok(*key);
                }
                match state.pending.get(&channel_id) {
                    Some(latch) => latch.subscribe(),
                    None => return Err(TransferError::ChannelNotFound),
                }
            };

            tokio::select! {
                _ = ctx.cancelled() => return Err(TransferError::ChannelNotFound),
                // A dropped latch also wakes us; the retry then sees the
                // registry's current truth.
                _ = pending.wait_for(|closed| *closed) => {}
            }
        }
    }

    /// Channel owning the given engine key, if any.
    pub(crate) fn lookup(&self, key: &EngineKey) -> Option<ChannelId> {
        self.read().request_to_channel.get(key).copied()
    }

    /// Try both orientations of an engine key: the remote peer first, then
    /// the local peer. Used by the send-error listener, which cannot know
    /// which side owns the failing request.
    pub(crate) fn lookup_either(
        &self,
        request_id: RequestId,
        remote: PeerId,
        local: PeerId,
    ) -> Option<ChannelId> {
        let state = self.read();
        state
            .request_to_channel
            .get(&EngineKey { request_id, peer: remote })
            .or_else(|| {
                state
                    .request_to_channel
                    .get(&EngineKey { request_id, peer: local })
            })
            .copied()
    }

    /// All registered channels whose initiator or responder is `peer`.
    pub(crate) fn channels_with_peer(&self, peer: PeerId) -> Vec<ChannelId> {
        self.read()
            .request_to_channel
            .values()
            .filter(|chid| chid.initiator == peer || chid.responder == peer)
            .copied()
            .collect()
    }

    // ------------------------------------------------------------------
    // Responder-side state
    // ------------------------------------------------------------------

    /// The remote requestor cancelled the engine request for this key.
    pub(crate) fn mark_requestor_cancelled(&self, key: &EngineKey) {
        let mut state = self.write();
        if let Some(channel_id) = state.request_to_channel.get(key).copied() {
            state.requestor_cancelled.insert(channel_id);
        }
    }

    pub(crate) fn is_requestor_cancelled(&self, channel_id: ChannelId) -> bool {
        self.read().requestor_cancelled.contains(&channel_id)
    }

    /// Resume bookkeeping for the responder side: while the requestor is
    /// cancelled, queue the extensions for replay and report the resume as
    /// deferred; otherwise mark the transfer started and hand the
    /// extensions back for the engine call.
    pub(crate) fn try_defer_resume(
        &self,
        channel_id: ChannelId,
        extensions: Vec<ExtensionData>,
    ) -> Option<Vec<ExtensionData>> {
        let mut state = self.write();
        if state.requestor_cancelled.contains(&channel_id) {
            state
                .deferred_extensions
                .entry(channel_id)
                .or_default()
                .extend(extensions);
            None
        } else {
            state.transfer_started.insert(channel_id, true);
            Some(extensions)
        }
    }

    /// Bookkeeping for the incoming-request hook, in one critical section:
    /// apply the restart-while-paused rule, record the paused/started
    /// state, clear the requestor-cancelled flag and drain its deferred
    /// extensions, install both ID mappings, and observe the store flag.
    pub(crate) fn begin_incoming_request(
        &self,
        channel_id: ChannelId,
        key: EngineKey,
        paused_by_session: bool,
    ) -> IncomingRequestBookkeeping {
        let mut state = self.write();

        // A transfer-started entry means this is a restart; if the previous
        // incarnation never left the paused state, the response must start
        // paused too, or the responder would stream ahead of a validator
        // that is still unsealing.
        let started = state.transfer_started.get(&channel_id).copied();
        let pause_anyway = started == Some(false) && !paused_by_session;
        let paused = paused_by_session || pause_anyway;
        state.transfer_started.insert(channel_id, !paused);

        let deferred = if state.requestor_cancelled.remove(&channel_id) {
            state
                .deferred_extensions
                .remove(&channel_id)
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        state.request_to_channel.insert(key, channel_id);
        state.channel_to_request.insert(channel_id, key);

        IncomingRequestBookkeeping {
            pause_anyway,
            deferred,
            use_store: state.stores.contains(&channel_id),
        }
    }

    // ------------------------------------------------------------------
    // Stores
    // ------------------------------------------------------------------

    /// Flag the channel as having a store override. Returns false when it
    /// already had one.
    pub(crate) fn flag_store(&self, channel_id: ChannelId) -> bool {
        self.write().stores.insert(channel_id)
    }

    /// Drop the store flag after a failed engine registration.
    pub(crate) fn unflag_store(&self, channel_id: ChannelId) {
        self.write().stores.remove(&channel_id);
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Remove every entry for the channel. Returns `None` when no engine
    /// key is known for it; otherwise reports whether a store override was
    /// registered so the caller can unregister it with the engine.
    pub(crate) fn cleanup(&self, channel_id: ChannelId) -> Option<bool> {
        let mut state = self.write();
        let key = state.channel_to_request.remove(&channel_id)?;
        state.request_to_channel.remove(&key);
        state.cancel_handles.remove(&channel_id);
        state.pending.remove(&channel_id);
        state.requestor_cancelled.remove(&channel_id);
        state.transfer_started.remove(&channel_id);
        state.deferred_extensions.remove(&channel_id);
        Some(state.stores.remove(&channel_id))
    }
}
