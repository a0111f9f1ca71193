//! Session-side callbacks the transport drives.

use crate::content_id::ContentId;
use crate::error::{EngineError, TransferError};
use crate::message::{TransferMessage, TransferRequest, TransferResponse};
use crate::types::ChannelId;

/// Callbacks installed by the session layer via `Transport::set_event_handler`.
///
/// Hooks invoke these synchronously from the engine's workers, so
/// implementations must be non-blocking or known-short.
///
/// Two callbacks can hand back a message *and* a verdict at once: a
/// responder may accept a request with a response message while also asking
/// for an immediate pause, so those return a
/// `(Option<TransferMessage>, Result<(), TransferError>)` pair. Everywhere
/// else [`TransferError::Pause`] in the error position is the pause
/// sentinel.
pub trait EventsHandler: Send + Sync {
    /// The engine started emitting the outgoing request for this channel.
    fn on_channel_opened(&self, channel_id: ChannelId) -> Result<(), TransferError>;

    /// A transfer request arrived (new, restart, update, or cancel).
    fn on_request_received(
        &self,
        channel_id: ChannelId,
        request: &TransferRequest,
    ) -> (Option<TransferMessage>, Result<(), TransferError>);

    /// A transfer response arrived for a channel we initiated.
    fn on_response_received(
        &self,
        channel_id: ChannelId,
        response: &TransferResponse,
    ) -> Result<(), TransferError>;

    /// A block arrived on an outgoing request.
    fn on_data_received(
        &self,
        channel_id: ChannelId,
        link: &ContentId,
        size: u64,
    ) -> Result<(), TransferError>;

    /// A block was queued for sending on a response we serve.
    fn on_data_queued(
        &self,
        channel_id: ChannelId,
        link: &ContentId,
        size: u64,
    ) -> (Option<TransferMessage>, Result<(), TransferError>);

    /// A block actually crossed the wire on a response we serve.
    fn on_data_sent(
        &self,
        channel_id: ChannelId,
        link: &ContentId,
        size: u64,
    ) -> Result<(), TransferError>;

    /// The engine abandoned the outgoing request because its context expired.
    fn on_request_timed_out(
        &self,
        channel_id: ChannelId,
        error: TransferError,
    ) -> Result<(), TransferError>;

    /// The engine failed to send data for this channel.
    fn on_send_data_error(
        &self,
        channel_id: ChannelId,
        error: EngineError,
    ) -> Result<(), TransferError>;

    /// The engine failed to receive data for this channel.
    fn on_receive_data_error(
        &self,
        channel_id: ChannelId,
        error: EngineError,
    ) -> Result<(), TransferError>;

    /// The underlying request reached a terminal state.
    ///
    /// `result` is `Ok` only for a fully completed transfer.
    fn on_channel_completed(
        &self,
        channel_id: ChannelId,
        result: Result<(), TransferError>,
    ) -> Result<(), TransferError>;
}
