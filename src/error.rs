//! Error types for the data-transfer transport layer.

use libp2p::PeerId;
use thiserror::Error;

/// Errors that can occur during message serialization/deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// CBOR serialization failed.
    #[error("CBOR serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization failed.
    #[error("CBOR deserialization error: {0}")]
    Deserialization(String),

    /// Message exceeds size limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Invalid CID in message.
    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    /// Envelope discriminator does not match its body.
    #[error("Message envelope missing {0} body")]
    MissingBody(&'static str),
}

/// Errors surfaced by the block-exchange engine for an in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine gave up on the request because its context expired.
    #[error("engine request context cancelled")]
    RequestContextCancelled,

    /// The request was cancelled by its requestor.
    #[error("engine request cancelled")]
    RequestCancelled,

    /// Any other engine-side failure.
    #[error("{0}")]
    Other(String),
}

/// Errors returned by transport operations and session callbacks.
///
/// `Pause` and `ChannelNotFound` are sentinels: `Pause` asks the transport
/// to pause the underlying engine operation instead of terminating it, and
/// `ChannelNotFound` reports that no in-flight channel matches a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Sentinel: pause the underlying engine operation.
    #[error("pause channel")]
    Pause,

    /// No in-flight channel matches the given channel ID.
    #[error("channel not found")]
    ChannelNotFound,

    /// A façade operation was invoked before `set_event_handler`.
    #[error("event handler has not been set")]
    HandlerNotSet,

    /// `set_event_handler` was called twice.
    #[error("event handler already set")]
    HandlerAlreadySet,

    /// The caller's context was cancelled while an operation was suspended.
    #[error("context cancelled")]
    ContextCancelled,

    /// An extension payload failed to serialize or deserialize.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// An engine operation failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The outgoing engine request drained with a terminal error.
    #[error("engine request failed to complete: {0}")]
    RequestFailed(String),

    /// The responder side finished with a non-complete terminal status.
    #[error("response to peer {peer} did not complete: response status code {status}")]
    ResponseIncomplete { peer: PeerId, status: &'static str },

    /// A request payload arrived over a channel we initiated.
    #[error("received request on response channel")]
    RequestOnResponseChannel,

    /// A response payload arrived over a channel the remote initiated.
    #[error("received response on request channel")]
    ResponseOnRequestChannel,

    /// No validator is registered for the given voucher type.
    #[error("no validator registered for voucher type {0}")]
    ValidatorNotRegistered(String),

    /// A restart request could not be delivered.
    #[error("unable to send request: {0}")]
    SendMessage(String),

    /// Catch-all for session-layer errors crossing the callback boundary.
    #[error("{0}")]
    Other(String),
}

impl TransferError {
    /// True when this value is the pause sentinel.
    pub fn is_pause(&self) -> bool {
        matches!(self, TransferError::Pause)
    }
}
