//! Engine hook handlers.
//!
//! Each handler translates one engine event into semantic data-transfer
//! events through the registry and the installed session callbacks. The
//! registry lock is released before every call back into the engine or the
//! session layer.

use libp2p::PeerId;
use tracing::{debug, error, warn};

use super::registry::EngineKey;
use super::{persistence_option_name, TransportInner};
use crate::engine::{
    BlockData, HasExtensions, IncomingBlockActions, IncomingRequestActions,
    IncomingResponseActions, OutgoingBlockActions, OutgoingRequestActions, RequestData,
    RequestUpdatedActions, ResponseData, ResponseStatus,
};
use crate::error::{EngineError, TransferError};
use crate::message::TransferMessage;
use crate::transport::extension::{message_from_extensions, to_extension_data};
use crate::types::ChannelId;

impl TransportInner {
    /// Channel ID for a payload seen on the outgoing side: we are the
    /// initiator iff the payload is a request.
    fn outgoing_channel_id(&self, message: &TransferMessage, peer: PeerId) -> ChannelId {
        let (initiator, responder) = if message.is_request() {
            (self.peer_id, peer)
        } else {
            (peer, self.peer_id)
        };
        ChannelId {
            initiator,
            responder,
            id: message.transfer_id(),
        }
    }

    /// Fires when the engine begins emitting an outgoing request we made.
    pub(crate) fn outgoing_request_hook(
        &self,
        peer: PeerId,
        request: &RequestData,
        actions: &mut dyn OutgoingRequestActions,
    ) {
        // Extension absent or unreadable: not our request.
        let Ok(Some(message)) = message_from_extensions(request, &self.supported_extensions)
        else {
            return;
        };
        let Some(events) = self.events() else {
            return;
        };

        let channel_id = self.outgoing_channel_id(&message, peer);
        let opened = events.on_channel_opened(channel_id);
        if let Err(e) = &opened {
            warn!(channel_id = %channel_id, error = %e, "Session rejected channel open");
        }

        let key = EngineKey {
            request_id: request.id(),
            peer: self.peer_id,
        };
        let use_store = self
            .registry
            .complete_outgoing_open(channel_id, key, opened.is_ok());
        if use_store {
            actions.use_persistence_option(&persistence_option_name(&channel_id));
        }
    }

    /// Fires when the engine receives a request, i.e. we respond.
    pub(crate) fn incoming_request_hook(
        &self,
        peer: PeerId,
        request: &RequestData,
        actions: &mut dyn IncomingRequestActions,
    ) {
        let message = match message_from_extensions(request, &self.supported_extensions) {
            Err(e) => {
                actions.terminate_with_error(e.into());
                return;
            }
            // extension not found; probably not our request
            Ok(None) => return,
            Ok(Some(message)) => message,
        };
        let Some(events) = self.events() else {
            return;
        };

        let (channel_id, response_message, verdict) = match &message {
            TransferMessage::Request(dt_request) => {
                // A request coming in on the engine means we serve a pull.
                let channel_id = ChannelId {
                    initiator: peer,
                    responder: self.peer_id,
                    id: dt_request.transfer_id,
                };
                debug!(channel_id = %channel_id, request = ?dt_request, "Validating received engine request");
                let (response, verdict) = events.on_request_received(channel_id, dt_request);
                debug!(
                    channel_id = %channel_id,
                    response = ?response,
                    verdict = ?verdict,
                    "Session verdict for received request"
                );
                (channel_id, response, verdict)
            }
            TransferMessage::Response(dt_response) => {
                // A response coming in on the engine means our push.
                let channel_id = ChannelId {
                    initiator: self.peer_id,
                    responder: peer,
                    id: dt_response.transfer_id,
                };
                let verdict = events.on_response_received(channel_id, dt_response);
                (channel_id, None, verdict)
            }
        };

        if let Some(response) = &response_message {
            match to_extension_data(response, &self.supported_extensions) {
                Err(extension_err) => {
                    // TODO: surface extension_err here instead of the
                    // validation verdict; kept for parity with existing
                    // deployments.
                    let terminal = verdict
                        .clone()
                        .err()
                        .unwrap_or_else(|| extension_err.into());
                    error!(
                        channel_id = %channel_id,
                        error = %terminal,
                        "Terminated incoming engine request on response serialization failure"
                    );
                    actions.terminate_with_error(terminal);
                    return;
                }
                Ok(extensions) => {
                    for extension in extensions {
                        debug!(channel_id = %channel_id, extension = %extension.name, "Queued response extension");
                        actions.send_extension_data(extension);
                    }
                }
            }
        }

        match &verdict {
            Err(TransferError::Pause) | Ok(()) => {}
            Err(e) => {
                error!(channel_id = %channel_id, error = %e, "Terminated incoming engine request");
                actions.terminate_with_error(e.clone());
                return;
            }
        }

        let paused_by_session = matches!(verdict, Err(TransferError::Pause));
        if paused_by_session {
            actions.pause_response();
        }

        let key = EngineKey {
            request_id: request.id(),
            peer,
        };
        let bookkeeping = self
            .registry
            .begin_incoming_request(channel_id, key, paused_by_session);

        if bookkeeping.pause_anyway {
            debug!(
                channel_id = %channel_id,
                "Pausing responder for restarted channel that never left the paused state"
            );
            actions.pause_response();
        }
        for extension in bookkeeping.deferred {
            actions.send_extension_data(extension);
        }
        if bookkeeping.use_store {
            actions.use_persistence_option(&persistence_option_name(&channel_id));
        }

        actions.validate_request();
    }

    /// Fires for each block arriving on an outgoing request we made.
    pub(crate) fn incoming_block_hook(
        &self,
        _peer: PeerId,
        response: &ResponseData,
        block: &BlockData,
        actions: &mut dyn IncomingBlockActions,
    ) {
        let key = EngineKey {
            request_id: response.request_id(),
            peer: self.peer_id,
        };
        let Some(channel_id) = self.registry.lookup(&key) else {
            return;
        };
        let Some(events) = self.events() else {
            return;
        };

        match events.on_data_received(channel_id, &block.link, block.size) {
            Ok(()) => {}
            Err(TransferError::Pause) => actions.pause_request(),
            Err(e) => actions.terminate_with_error(e),
        }
    }

    /// Fires for each block the engine queues on a response we serve.
    pub(crate) fn outgoing_block_hook(
        &self,
        peer: PeerId,
        request: &RequestData,
        block: &BlockData,
        actions: &mut dyn OutgoingBlockActions,
    ) {
        // Blocks in a restart's do-not-send list still reach this hook but
        // never cross the wire; they produce no events.
        if block.size_on_wire == 0 {
            return;
        }

        let key = EngineKey {
            request_id: request.id(),
            peer,
        };
        let Some(channel_id) = self.registry.lookup(&key) else {
            return;
        };
        let Some(events) = self.events() else {
            return;
        };

        let (message, verdict) = events.on_data_queued(channel_id, &block.link, block.size);
        match verdict {
            Ok(()) => {}
            Err(TransferError::Pause) => actions.pause_response(),
            Err(e) => {
                actions.terminate_with_error(e);
                return;
            }
        }

        if let Some(message) = message {
            match to_extension_data(&message, &self.supported_extensions) {
                Err(e) => {
                    actions.terminate_with_error(e.into());
                }
                Ok(extensions) => {
                    for extension in extensions {
                        actions.send_extension_data(extension);
                    }
                }
            }
        }
    }

    /// Fires for each block actually sent on a response we serve.
    pub(crate) fn block_sent_listener(&self, peer: PeerId, request: &RequestData, block: &BlockData) {
        // The engine reports every block of a restarted transfer here, even
        // those deduplicated by the do-not-send list; only blocks that
        // actually crossed the wire count.
        if block.size_on_wire == 0 {
            return;
        }

        let key = EngineKey {
            request_id: request.id(),
            peer,
        };
        let Some(channel_id) = self.registry.lookup(&key) else {
            return;
        };
        let Some(events) = self.events() else {
            return;
        };

        if let Err(e) = events.on_data_sent(channel_id, &block.link, block.size) {
            error!(channel_id = %channel_id, error = %e, "Failed to process data sent");
        }
    }

    /// Fires when a response arrives for an outgoing request we made.
    pub(crate) fn incoming_response_hook(
        &self,
        peer: PeerId,
        response: &ResponseData,
        actions: &mut dyn IncomingResponseActions,
    ) {
        let key = EngineKey {
            request_id: response.request_id(),
            peer: self.peer_id,
        };
        let Some(channel_id) = self.registry.lookup(&key) else {
            return;
        };

        let (response_message, verdict) = self.process_extension(channel_id, response, peer);

        if let Some(message) = &response_message {
            match to_extension_data(message, &self.supported_extensions) {
                Err(extension_err) => {
                    let terminal = verdict.err().unwrap_or_else(|| extension_err.into());
                    actions.terminate_with_error(terminal);
                    return;
                }
                Ok(extensions) => {
                    for extension in extensions {
                        actions.update_request_with_extensions(extension);
                    }
                }
            }
        }

        if let Err(e) = verdict {
            actions.terminate_with_error(e);
        }
    }

    /// Fires when the requestor updates a request we serve.
    pub(crate) fn request_updated_hook(
        &self,
        peer: PeerId,
        request: &RequestData,
        update: &RequestData,
        actions: &mut dyn RequestUpdatedActions,
    ) {
        let key = EngineKey {
            request_id: request.id(),
            peer,
        };
        let Some(channel_id) = self.registry.lookup(&key) else {
            return;
        };

        let (response_message, verdict) = self.process_extension(channel_id, update, peer);

        if let Some(message) = &response_message {
            match to_extension_data(message, &self.supported_extensions) {
                Err(extension_err) => {
                    let terminal = verdict.err().unwrap_or_else(|| extension_err.into());
                    actions.terminate_with_error(terminal);
                    return;
                }
                Ok(extensions) => {
                    for extension in extensions {
                        actions.send_extension_data(extension);
                    }
                }
            }
        }

        match verdict {
            Ok(()) | Err(TransferError::Pause) => {}
            Err(e) => actions.terminate_with_error(e),
        }
    }

    /// Decode a data-transfer payload carried on an update or response and
    /// dispatch it to the session, guarding against cross-channel payloads:
    /// a request payload is only accepted on a channel the sender
    /// initiated, a response payload only on a channel we initiated.
    fn process_extension(
        &self,
        channel_id: ChannelId,
        source: &dyn HasExtensions,
        peer: PeerId,
    ) -> (Option<TransferMessage>, Result<(), TransferError>) {
        let message = match message_from_extensions(source, &self.supported_extensions) {
            Err(e) => return (None, Err(e.into())),
            // extension not found; probably not our request
            Ok(None) => return (None, Ok(())),
            Ok(Some(message)) => message,
        };
        let Some(events) = self.events() else {
            return (None, Ok(()));
        };

        match message {
            TransferMessage::Request(dt_request) => {
                let expected = ChannelId {
                    initiator: peer,
                    responder: self.peer_id,
                    id: dt_request.transfer_id,
                };
                if channel_id != expected {
                    return (None, Err(TransferError::RequestOnResponseChannel));
                }
                events.on_request_received(channel_id, &dt_request)
            }
            TransferMessage::Response(dt_response) => {
                let expected = ChannelId {
                    initiator: self.peer_id,
                    responder: peer,
                    id: dt_response.transfer_id,
                };
                if channel_id != expected {
                    return (None, Err(TransferError::ResponseOnRequestChannel));
                }
                let verdict = events.on_response_received(channel_id, &dt_response);
                if let Err(e) = &verdict {
                    error!(channel_id = %channel_id, error = %e, "Error from on_response_received");
                }
                (None, verdict)
            }
        }
    }

    /// Fires when a response we serve reaches a terminal status.
    pub(crate) fn completed_response_listener(
        &self,
        peer: PeerId,
        request: &RequestData,
        status: ResponseStatus,
    ) {
        let key = EngineKey {
            request_id: request.id(),
            peer,
        };
        let Some(channel_id) = self.registry.lookup(&key) else {
            return;
        };

        if status == ResponseStatus::RequestCancelled {
            return;
        }

        let result = if status == ResponseStatus::RequestCompletedFull {
            Ok(())
        } else {
            Err(TransferError::ResponseIncomplete {
                peer,
                status: status.as_str(),
            })
        };

        let listener = self
            .completed_response_listener
            .lock()
            .expect("listener lock poisoned")
            .clone();
        if let Some(listener) = listener {
            listener(channel_id);
        }

        let Some(events) = self.events() else {
            return;
        };
        if let Err(e) = events.on_channel_completed(channel_id, result) {
            error!(channel_id = %channel_id, error = %e, "Failed to process channel completion");
        }
    }

    /// Fires when the remote requestor cancels a request we serve.
    pub(crate) fn requestor_cancelled_listener(&self, peer: PeerId, request: &RequestData) {
        let key = EngineKey {
            request_id: request.id(),
            peer,
        };
        self.registry.mark_requestor_cancelled(&key);
    }

    /// Fires when the engine fails to send data for a request.
    pub(crate) fn network_send_error_listener(
        &self,
        peer: PeerId,
        request: &RequestData,
        engine_error: EngineError,
    ) {
        // The failing request may be ours or the remote peer's; try both
        // orientations of the key.
        let Some(channel_id) = self
            .registry
            .lookup_either(request.id(), peer, self.peer_id)
        else {
            return;
        };
        let Some(events) = self.events() else {
            return;
        };

        if let Err(e) = events.on_send_data_error(channel_id, engine_error.clone()) {
            error!(
                channel_id = %channel_id,
                send_error = %engine_error,
                error = %e,
                "Failed to fire transport send error"
            );
        }
    }

    /// Fires when the engine fails to receive data from a peer; fans out to
    /// every channel with that peer.
    pub(crate) fn network_receive_error_listener(&self, peer: PeerId, engine_error: EngineError) {
        let channels = self.registry.channels_with_peer(peer);
        let Some(events) = self.events() else {
            return;
        };

        for channel_id in channels {
            if let Err(e) = events.on_receive_data_error(channel_id, engine_error.clone()) {
                error!(
                    channel_id = %channel_id,
                    receive_error = %engine_error,
                    error = %e,
                    "Failed to fire transport receive error"
                );
            }
        }
    }
}
