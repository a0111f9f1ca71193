//! Transport adapter bridging the data-transfer session layer onto the
//! block-exchange engine.
//!
//! The [`Transport`] owns the registry of in-flight channels and installs
//! the engine hooks that translate engine events into semantic data-transfer
//! events. The session layer drives it through the public operations
//! (`open_channel`, `pause_channel`, `resume_channel`, `close_channel`,
//! `cleanup_channel`, `use_store`, `set_event_handler`, `shutdown`) and
//! receives events back through its installed [`EventsHandler`].

pub mod extension;

mod channel_lock;
mod executor;
mod hooks;
mod registry;

use libp2p::PeerId;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::TransportConfig;
use crate::content_id::ContentId;
use crate::engine::{
    encode_cid_set, BlockExchange, BlockIo, ExtensionData, UnregisterHookFn,
    EXTENSION_DO_NOT_SEND_CIDS,
};
use crate::error::TransferError;
use crate::events::EventsHandler;
use crate::message::TransferMessage;
use crate::types::ChannelId;
use channel_lock::ChannelLocker;
use extension::to_extension_data;
use registry::ChannelRegistry;

/// Minimum wait after a cancelled engine request completes before reopening,
/// so the engine has flushed all trailing events for the old request.
pub const MIN_CANCEL_WAIT: Duration = Duration::from_millis(100);

/// Safety ceiling on waiting for a cancelled engine request to complete.
pub const MAX_CANCEL_WAIT: Duration = Duration::from_secs(1);

/// Name of the engine persistence option registered for a channel's store.
pub(crate) fn persistence_option_name(channel_id: &ChannelId) -> String {
    format!("data-transfer-{}", channel_id)
}

/// Test-facing listener invoked with the channel ID of a finished request
/// or response.
pub type ChannelListener = Arc<dyn Fn(ChannelId) + Send + Sync>;

pub(crate) struct TransportInner {
    pub(crate) peer_id: PeerId,
    pub(crate) engine: Arc<dyn BlockExchange>,
    pub(crate) registry: ChannelRegistry,
    pub(crate) supported_extensions: Vec<String>,
    events: OnceLock<Arc<dyn EventsHandler>>,
    channel_locker: ChannelLocker,
    min_cancel_wait: Duration,
    max_cancel_wait: Duration,
    unregister_hooks: Mutex<Vec<UnregisterHookFn>>,
    pub(crate) completed_request_listener: Mutex<Option<ChannelListener>>,
    pub(crate) completed_response_listener: Mutex<Option<ChannelListener>>,
}

impl TransportInner {
    pub(crate) fn events(&self) -> Option<&Arc<dyn EventsHandler>> {
        self.events.get()
    }

    /// Wait for a cancelled request's executor to drain, bounded by the
    /// safety ceiling, then sleep the minimum backoff so the engine has
    /// flushed every trailing event before the channel ID is reused.
    async fn wait_for_cancel_complete(
        &self,
        ctx: &CancellationToken,
        mut completed: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), TransferError> {
        tokio::select! {
            // A dropped latch means the executor is gone too; either way the
            // request is done.
            _ = async { let _ = completed.wait_for(|done| *done).await; } => {
                tokio::select! {
                    _ = tokio::time::sleep(self.min_cancel_wait) => Ok(()),
                    _ = ctx.cancelled() => Err(TransferError::ContextCancelled),
                }
            }
            _ = tokio::time::sleep(self.max_cancel_wait) => Ok(()),
            _ = ctx.cancelled() => Err(TransferError::ContextCancelled),
        }
    }
}

/// The transport adapter. The engine hooks hold clones of the shared inner
/// state, so the transport stays live as long as any hook can still fire.
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    /// Create a transport over `engine` with default configuration.
    pub fn new(peer_id: PeerId, engine: Arc<dyn BlockExchange>) -> Self {
        Self::with(peer_id, engine, TransportConfig::default())
    }

    /// Create a transport with explicit configuration.
    pub fn with(peer_id: PeerId, engine: Arc<dyn BlockExchange>, config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                peer_id,
                engine,
                registry: ChannelRegistry::new(),
                supported_extensions: config.supported_extensions.clone(),
                events: OnceLock::new(),
                channel_locker: ChannelLocker::new(),
                min_cancel_wait: config.min_cancel_wait(),
                max_cancel_wait: config.max_cancel_wait(),
                unregister_hooks: Mutex::new(Vec::new()),
                completed_request_listener: Mutex::new(None),
                completed_response_listener: Mutex::new(None),
            }),
        }
    }

    /// Our own peer ID.
    pub fn local_peer(&self) -> PeerId {
        self.inner.peer_id
    }

    /// Test hook: called after each outgoing request finishes executing.
    pub fn register_completed_request_listener(&self, listener: ChannelListener) {
        *self
            .inner
            .completed_request_listener
            .lock()
            .expect("listener lock poisoned") = Some(listener);
    }

    /// Test hook: called after each served response reaches a terminal
    /// status other than cancelled.
    pub fn register_completed_response_listener(&self, listener: ChannelListener) {
        *self
            .inner
            .completed_response_listener
            .lock()
            .expect("listener lock poisoned") = Some(listener);
    }

    /// Install the session callbacks and register all engine hooks.
    ///
    /// May be called exactly once.
    pub fn set_event_handler(&self, events: Arc<dyn EventsHandler>) -> Result<(), TransferError> {
        self.inner
            .events
            .set(events)
            .map_err(|_| TransferError::HandlerAlreadySet)?;

        let mut unregister = Vec::with_capacity(11);
        let engine = &self.inner.engine;

        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_incoming_request_hook(Box::new(move |p, r, a| {
            h.incoming_request_hook(p, r, a)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_completed_response_listener(Box::new(
            move |p, r, status| h.completed_response_listener(p, r, status),
        )));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_incoming_block_hook(Box::new(move |p, r, b, a| {
            h.incoming_block_hook(p, r, b, a)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_outgoing_block_hook(Box::new(move |p, r, b, a| {
            h.outgoing_block_hook(p, r, b, a)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(
            engine.register_block_sent_listener(Box::new(move |p, r, b| {
                h.block_sent_listener(p, r, b)
            })),
        );
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_outgoing_request_hook(Box::new(move |p, r, a| {
            h.outgoing_request_hook(p, r, a)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_incoming_response_hook(Box::new(move |p, r, a| {
            h.incoming_response_hook(p, r, a)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_request_updated_hook(Box::new(move |p, r, u, a| {
            h.request_updated_hook(p, r, u, a)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_requestor_cancelled_listener(Box::new(move |p, r| {
            h.requestor_cancelled_listener(p, r)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_network_send_error_listener(Box::new(move |p, r, e| {
            h.network_send_error_listener(p, r, e)
        })));
        let h = Arc::clone(&self.inner);
        unregister.push(engine.register_network_receive_error_listener(Box::new(move |p, e| {
            h.network_receive_error_listener(p, e)
        })));

        *self
            .inner
            .unregister_hooks
            .lock()
            .expect("unregister list poisoned") = unregister;
        Ok(())
    }

    /// Open an outgoing engine request asking `data_sender` to send the
    /// graph rooted at `root` over this channel.
    ///
    /// From the data-transfer standpoint push and pull are alike here:
    /// `open_channel` is called by the party that intends to receive data.
    /// When an outgoing request already exists for the channel (a restart),
    /// it is cancelled and fully drained first; `do_not_send` then lists
    /// the CIDs already received so the sender skips them.
    pub async fn open_channel(
        &self,
        ctx: &CancellationToken,
        data_sender: PeerId,
        channel_id: ChannelId,
        root: ContentId,
        selector: Vec<u8>,
        do_not_send: Vec<ContentId>,
        message: TransferMessage,
    ) -> Result<(), TransferError> {
        if self.inner.events().is_none() {
            return Err(TransferError::HandlerNotSet);
        }
        let mut extensions = to_extension_data(&message, &self.inner.supported_extensions)?;

        // One open at a time per channel, so the cancel-and-reopen dance
        // below is atomic with respect to other opens.
        let _channel_guard = self.inner.channel_locker.lock(channel_id).await;

        if let Some(completed) = self.inner.registry.cancel_existing(channel_id) {
            warn!(
                channel_id = %channel_id,
                "Restarting channel - cancelling existing engine request"
            );
            self.inner.wait_for_cancel_complete(ctx, completed).await?;
        }

        let (request_ctx, completed_tx) = self.inner.registry.register_outgoing(channel_id, ctx);

        if !do_not_send.is_empty() {
            let data = encode_cid_set(&do_not_send)?;
            extensions.push(ExtensionData::new(EXTENSION_DO_NOT_SEND_CIDS, data));
        }

        info!(
            peer = %data_sender,
            root = %root,
            already_received = do_not_send.len(),
            "Opening engine request"
        );
        let (progress, errors) =
            self.inner
                .engine
                .request(request_ctx.clone(), data_sender, root, selector, extensions);

        tokio::spawn(executor::execute_request(
            Arc::clone(&self.inner),
            channel_id,
            request_ctx,
            progress,
            errors,
            completed_tx,
        ));
        Ok(())
    }

    /// Pause the given channel.
    pub async fn pause_channel(
        &self,
        ctx: &CancellationToken,
        channel_id: ChannelId,
    ) -> Result<(), TransferError> {
        if self.inner.events().is_none() {
            return Err(TransferError::HandlerNotSet);
        }
        let key = self.inner.registry.await_engine_key(ctx, channel_id).await?;

        if key.peer == self.inner.peer_id {
            return self.inner.engine.pause_request(key.request_id).map_err(Into::into);
        }

        if self.inner.registry.is_requestor_cancelled(channel_id) {
            return Ok(());
        }
        self.inner
            .engine
            .pause_response(key.peer, key.request_id)
            .map_err(Into::into)
    }

    /// Resume the given channel, optionally carrying a message to the
    /// counterparty as extension data.
    pub async fn resume_channel(
        &self,
        ctx: &CancellationToken,
        message: Option<TransferMessage>,
        channel_id: ChannelId,
    ) -> Result<(), TransferError> {
        if self.inner.events().is_none() {
            return Err(TransferError::HandlerNotSet);
        }
        let key = self.inner.registry.await_engine_key(ctx, channel_id).await?;

        let extensions = match &message {
            Some(message) => to_extension_data(message, &self.inner.supported_extensions)?,
            None => Vec::new(),
        };

        if key.peer == self.inner.peer_id {
            return self
                .inner
                .engine
                .unpause_request(key.request_id, extensions)
                .map_err(Into::into);
        }

        // While the requestor is cancelled there is no live response to
        // unpause; the message replays on the next incoming request.
        match self.inner.registry.try_defer_resume(channel_id, extensions) {
            None => Ok(()),
            Some(extensions) => self
                .inner
                .engine
                .unpause_response(key.peer, key.request_id, extensions)
                .map_err(Into::into),
        }
    }

    /// Close the given channel.
    ///
    /// For a request we opened this cancels its context; the executor fires
    /// completion. For a response we serve it cancels the response with the
    /// engine.
    pub async fn close_channel(
        &self,
        ctx: &CancellationToken,
        channel_id: ChannelId,
    ) -> Result<(), TransferError> {
        if self.inner.events().is_none() {
            return Err(TransferError::HandlerNotSet);
        }
        let key = self.inner.registry.await_engine_key(ctx, channel_id).await?;

        if key.peer == self.inner.peer_id {
            let token = self
                .inner
                .registry
                .cancel_handle_token(channel_id)
                .ok_or(TransferError::ChannelNotFound)?;
            token.cancel();
            return Ok(());
        }

        if self.inner.registry.is_requestor_cancelled(channel_id) {
            return Ok(());
        }
        self.inner
            .engine
            .cancel_response(key.peer, key.request_id)
            .map_err(Into::into)
    }

    /// Remove all state for the channel. Idempotent; called on the other
    /// side of a cancel.
    pub fn cleanup_channel(&self, channel_id: ChannelId) {
        if let Some(had_store) = self.inner.registry.cleanup(channel_id) {
            if had_store {
                let option = persistence_option_name(&channel_id);
                if let Err(e) = self.inner.engine.unregister_persistence_option(&option) {
                    error!(option = %option, error = %e, "Failed to unregister persistence option");
                }
            }
        }
    }

    /// Register a channel-scoped block store with the engine. Idempotent
    /// per channel.
    pub fn use_store(
        &self,
        channel_id: ChannelId,
        store: Arc<dyn BlockIo>,
    ) -> Result<(), TransferError> {
        if !self.inner.registry.flag_store(channel_id) {
            return Ok(());
        }
        let option = persistence_option_name(&channel_id);
        if let Err(e) = self.inner.engine.register_persistence_option(&option, store) {
            self.inner.registry.unflag_store(channel_id);
            return Err(e.into());
        }
        Ok(())
    }

    /// Disconnect from the engine: unregister every hook and cancel every
    /// outstanding request. Executors self-terminate; this does not block
    /// on them.
    pub fn shutdown(&self) {
        let hooks: Vec<UnregisterHookFn> = self
            .inner
            .unregister_hooks
            .lock()
            .expect("unregister list poisoned")
            .drain(..)
            .collect();
        for unregister in hooks {
            unregister();
        }
        self.inner.registry.cancel_all();
    }
}
