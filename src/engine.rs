//! Abstraction over the content-addressed block-exchange engine.
//!
//! The transport never talks to a concrete engine; it consumes the
//! [`BlockExchange`] trait, registers hooks with it, and reacts to the data
//! the engine passes back into those hooks. Everything here mirrors the
//! engine's own vocabulary: requests are numbered per peer, extensions are
//! named byte payloads, and terminal outcomes are status codes.

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::content_id::ContentId;
use crate::error::{EngineError, MessageError, TransferError};

// ============================================================================
// Identifiers and payloads
// ============================================================================

/// Engine-level request sequence number.
///
/// Only unique per peer: the same number may be in flight simultaneously
/// for requests owned by different peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Named byte payload attached to an engine request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionData {
    pub name: String,
    pub data: Vec<u8>,
}

impl ExtensionData {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Anything carrying named extensions: requests, responses, updates.
pub trait HasExtensions {
    /// Payload of the named extension, if attached.
    fn extension(&self, name: &str) -> Option<&[u8]>;
}

/// View of an engine request as handed to hooks.
#[derive(Debug, Clone)]
pub struct RequestData {
    id: RequestId,
    extensions: Vec<ExtensionData>,
}

impl RequestData {
    pub fn new(id: RequestId, extensions: Vec<ExtensionData>) -> Self {
        Self { id, extensions }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl HasExtensions for RequestData {
    fn extension(&self, name: &str) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }
}

/// View of an engine response as handed to hooks.
#[derive(Debug, Clone)]
pub struct ResponseData {
    request_id: RequestId,
    extensions: Vec<ExtensionData>,
}

impl ResponseData {
    pub fn new(request_id: RequestId, extensions: Vec<ExtensionData>) -> Self {
        Self {
            request_id,
            extensions,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }
}

impl HasExtensions for ResponseData {
    fn extension(&self, name: &str) -> Option<&[u8]> {
        self.extensions
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }
}

/// One block as seen by a block hook or listener.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// Link of the block in the transferred graph.
    pub link: ContentId,

    /// Size of the block in the local store.
    pub size: u64,

    /// Bytes actually crossing the wire for this block. Zero when the block
    /// is deduplicated away by a restart's do-not-send list.
    pub size_on_wire: u64,
}

/// One step of progress on an outgoing engine request.
#[derive(Debug, Clone)]
pub struct ResponseProgress {
    /// Link the traversal just visited.
    pub link: ContentId,
}

// ============================================================================
// Terminal statuses
// ============================================================================

/// Terminal and intermediate status codes for an engine response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    RequestAcknowledged,
    AdditionalPeers,
    NotEnoughGas,
    OtherProtocol,
    PartialResponse,
    RequestPaused,
    RequestCompletedFull,
    RequestCompletedPartial,
    RequestRejected,
    RequestFailedBusy,
    RequestFailedUnknown,
    RequestFailedLegal,
    RequestFailedContentNotFound,
    RequestCancelled,
}

impl ResponseStatus {
    /// Returns the stable status symbol used in completion errors.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::RequestAcknowledged => "RequestAcknowledged",
            ResponseStatus::AdditionalPeers => "AdditionalPeers",
            ResponseStatus::NotEnoughGas => "NotEnoughGas",
            ResponseStatus::OtherProtocol => "OtherProtocol",
            ResponseStatus::PartialResponse => "PartialResponse",
            ResponseStatus::RequestPaused => "RequestPaused",
            ResponseStatus::RequestCompletedFull => "RequestCompletedFull",
            ResponseStatus::RequestCompletedPartial => "RequestCompletedPartial",
            ResponseStatus::RequestRejected => "RequestRejected",
            ResponseStatus::RequestFailedBusy => "RequestFailedBusy",
            ResponseStatus::RequestFailedUnknown => "RequestFailedUnknown",
            ResponseStatus::RequestFailedLegal => "RequestFailedLegal",
            ResponseStatus::RequestFailedContentNotFound => "RequestFailedContentNotFound",
            ResponseStatus::RequestCancelled => "RequestCancelled",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Hook actions
// ============================================================================

/// Actions available while the outgoing-request hook runs.
pub trait OutgoingRequestActions {
    fn use_persistence_option(&mut self, name: &str);
}

/// Actions available while the incoming-request hook runs.
pub trait IncomingRequestActions {
    fn send_extension_data(&mut self, extension: ExtensionData);
    fn use_persistence_option(&mut self, name: &str);
    fn pause_response(&mut self);
    fn terminate_with_error(&mut self, error: TransferError);
    fn validate_request(&mut self);
}

/// Actions available while the incoming-block hook runs.
pub trait IncomingBlockActions {
    fn pause_request(&mut self);
    fn terminate_with_error(&mut self, error: TransferError);
}

/// Actions available while the outgoing-block hook runs.
pub trait OutgoingBlockActions {
    fn send_extension_data(&mut self, extension: ExtensionData);
    fn pause_response(&mut self);
    fn terminate_with_error(&mut self, error: TransferError);
}

/// Actions available while the incoming-response hook runs.
pub trait IncomingResponseActions {
    fn update_request_with_extensions(&mut self, extension: ExtensionData);
    fn terminate_with_error(&mut self, error: TransferError);
}

/// Actions available while the request-updated hook runs.
pub trait RequestUpdatedActions {
    fn send_extension_data(&mut self, extension: ExtensionData);
    fn terminate_with_error(&mut self, error: TransferError);
}

// ============================================================================
// Hook registrations
// ============================================================================

/// Handle that removes a registered hook when invoked.
pub type UnregisterHookFn = Box<dyn FnOnce() + Send>;

pub type OutgoingRequestHook =
    Box<dyn Fn(PeerId, &RequestData, &mut dyn OutgoingRequestActions) + Send + Sync>;
pub type IncomingRequestHook =
    Box<dyn Fn(PeerId, &RequestData, &mut dyn IncomingRequestActions) + Send + Sync>;
pub type IncomingBlockHook =
    Box<dyn Fn(PeerId, &ResponseData, &BlockData, &mut dyn IncomingBlockActions) + Send + Sync>;
pub type OutgoingBlockHook =
    Box<dyn Fn(PeerId, &RequestData, &BlockData, &mut dyn OutgoingBlockActions) + Send + Sync>;
pub type BlockSentListener = Box<dyn Fn(PeerId, &RequestData, &BlockData) + Send + Sync>;
pub type IncomingResponseHook =
    Box<dyn Fn(PeerId, &ResponseData, &mut dyn IncomingResponseActions) + Send + Sync>;
pub type RequestUpdatedHook = Box<
    dyn Fn(PeerId, &RequestData, &RequestData, &mut dyn RequestUpdatedActions) + Send + Sync,
>;
pub type CompletedResponseListener =
    Box<dyn Fn(PeerId, &RequestData, ResponseStatus) + Send + Sync>;
pub type RequestorCancelledListener = Box<dyn Fn(PeerId, &RequestData) + Send + Sync>;
pub type NetworkSendErrorListener =
    Box<dyn Fn(PeerId, &RequestData, EngineError) + Send + Sync>;
pub type NetworkReceiveErrorListener = Box<dyn Fn(PeerId, EngineError) + Send + Sync>;

// ============================================================================
// Stores
// ============================================================================

/// Loader/storer pair the engine uses for a channel-scoped block store.
pub trait BlockIo: Send + Sync {
    fn load(&self, link: &ContentId) -> io::Result<Vec<u8>>;
    fn store(&self, link: &ContentId, data: Vec<u8>) -> io::Result<()>;
}

// ============================================================================
// Engine interface
// ============================================================================

/// The block-exchange engine the transport adapts.
pub trait BlockExchange: Send + Sync + 'static {
    /// Open an outgoing request for the graph rooted at `root` on `peer`.
    ///
    /// Returns the progress stream and the error stream for the request.
    /// Cancelling `ctx` asks the engine to terminate the request; terminal
    /// errors then surface on the error stream.
    fn request(
        &self,
        ctx: CancellationToken,
        peer: PeerId,
        root: ContentId,
        selector: Vec<u8>,
        extensions: Vec<ExtensionData>,
    ) -> (
        mpsc::UnboundedReceiver<ResponseProgress>,
        mpsc::UnboundedReceiver<EngineError>,
    );

    fn pause_request(&self, request_id: RequestId) -> Result<(), EngineError>;
    fn unpause_request(
        &self,
        request_id: RequestId,
        extensions: Vec<ExtensionData>,
    ) -> Result<(), EngineError>;
    fn pause_response(&self, peer: PeerId, request_id: RequestId) -> Result<(), EngineError>;
    fn unpause_response(
        &self,
        peer: PeerId,
        request_id: RequestId,
        extensions: Vec<ExtensionData>,
    ) -> Result<(), EngineError>;
    fn cancel_response(&self, peer: PeerId, request_id: RequestId) -> Result<(), EngineError>;

    fn register_persistence_option(
        &self,
        name: &str,
        store: Arc<dyn BlockIo>,
    ) -> Result<(), EngineError>;
    fn unregister_persistence_option(&self, name: &str) -> Result<(), EngineError>;

    fn register_outgoing_request_hook(&self, hook: OutgoingRequestHook) -> UnregisterHookFn;
    fn register_incoming_request_hook(&self, hook: IncomingRequestHook) -> UnregisterHookFn;
    fn register_incoming_block_hook(&self, hook: IncomingBlockHook) -> UnregisterHookFn;
    fn register_outgoing_block_hook(&self, hook: OutgoingBlockHook) -> UnregisterHookFn;
    fn register_block_sent_listener(&self, listener: BlockSentListener) -> UnregisterHookFn;
    fn register_incoming_response_hook(&self, hook: IncomingResponseHook) -> UnregisterHookFn;
    fn register_request_updated_hook(&self, hook: RequestUpdatedHook) -> UnregisterHookFn;
    fn register_completed_response_listener(
        &self,
        listener: CompletedResponseListener,
    ) -> UnregisterHookFn;
    fn register_requestor_cancelled_listener(
        &self,
        listener: RequestorCancelledListener,
    ) -> UnregisterHookFn;
    fn register_network_send_error_listener(
        &self,
        listener: NetworkSendErrorListener,
    ) -> UnregisterHookFn;
    fn register_network_receive_error_listener(
        &self,
        listener: NetworkReceiveErrorListener,
    ) -> UnregisterHookFn;
}

// ============================================================================
// Do-not-send CID set
// ============================================================================

/// Engine-defined extension carrying CIDs the requestor already holds.
/// Attached only to restart opens.
pub const EXTENSION_DO_NOT_SEND_CIDS: &str = "do-not-send-cids";

/// Wire form of the do-not-send set: CBOR list of binary CIDs.
#[derive(Serialize, Deserialize)]
struct WireCidSet(Vec<serde_bytes::ByteBuf>);

/// Encode a set of CIDs into the compact do-not-send payload.
///
/// Duplicates collapse and the output is ordered, so equal sets encode to
/// equal bytes.
pub fn encode_cid_set(cids: &[ContentId]) -> Result<Vec<u8>, MessageError> {
    let set: BTreeSet<Vec<u8>> = cids.iter().map(|c| c.to_bytes()).collect();
    let wire = WireCidSet(set.into_iter().map(serde_bytes::ByteBuf::from).collect());
    serde_cbor::to_vec(&wire).map_err(|e| MessageError::Serialization(e.to_string()))
}

/// Decode a do-not-send payload back into CIDs.
pub fn decode_cid_set(bytes: &[u8]) -> Result<Vec<ContentId>, MessageError> {
    let wire: WireCidSet =
        serde_cbor::from_slice(bytes).map_err(|e| MessageError::Deserialization(e.to_string()))?;
    wire.0
        .iter()
        .map(|b| ContentId::from_raw_bytes(b))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
