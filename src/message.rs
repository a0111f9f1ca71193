//! Wire messages for the data-transfer protocol.
//!
//! A transfer rides on the block-exchange engine as a named extension whose
//! payload is a CBOR-encoded envelope holding either a request or a response
//! record. The `is_request` discriminator inside the envelope tells the two
//! apart, so one codec covers both directions.
//!
//! Restart negotiation additionally uses a standalone [`RestartRequest`]
//! control message carried by the session's own messaging layer rather than
//! by the engine.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::content_id::ContentId;
use crate::error::MessageError;
use crate::types::{ChannelId, TransferId};
use crate::voucher::Voucher;

/// Maximum message size in bytes (16 MB).
/// Vouchers and selectors can be large; anything beyond this is rejected.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

// ============================================================================
// Request
// ============================================================================

/// Request record: opens, restarts, or cancels a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Transfer sequence number assigned by the initiator.
    pub transfer_id: TransferId,

    /// True when the counterparty should send data to the requestor.
    pub is_pull: bool,

    /// True when this request cancels an in-progress transfer.
    pub is_cancel: bool,

    /// True when this request re-establishes a transfer that already has
    /// persisted session state on both sides.
    pub is_restart: bool,

    /// Registered voucher type identifier.
    pub voucher_type: String,

    /// Encoded voucher payload.
    #[serde(with = "serde_bytes")]
    pub voucher: Vec<u8>,

    /// Root of the transferred graph. Absent on cancel requests.
    pub base_cid: Option<ContentId>,

    /// Serialized selector describing the requested portion of the graph.
    #[serde(with = "serde_bytes")]
    pub selector: Vec<u8>,
}

impl TransferRequest {
    /// Build a new transfer request.
    pub fn new(
        transfer_id: TransferId,
        is_pull: bool,
        voucher: &Voucher,
        base_cid: ContentId,
        selector: Vec<u8>,
    ) -> Self {
        Self {
            transfer_id,
            is_pull,
            is_cancel: false,
            is_restart: false,
            voucher_type: voucher.type_id.clone(),
            voucher: voucher.data.clone(),
            base_cid: Some(base_cid),
            selector,
        }
    }

    /// Build a restart request for a transfer with persisted state.
    pub fn restart(
        transfer_id: TransferId,
        is_pull: bool,
        voucher: &Voucher,
        base_cid: ContentId,
        selector: Vec<u8>,
    ) -> Self {
        Self {
            is_restart: true,
            ..Self::new(transfer_id, is_pull, voucher, base_cid, selector)
        }
    }

    /// Build a request cancelling an in-progress transfer.
    ///
    /// Cancel requests carry only the transfer id.
    pub fn cancel(transfer_id: TransferId) -> Self {
        Self {
            transfer_id,
            is_pull: false,
            is_cancel: true,
            is_restart: false,
            voucher_type: String::new(),
            voucher: Vec::new(),
            base_cid: None,
            selector: Vec::new(),
        }
    }

    /// Reassemble the voucher carried by this request.
    pub fn voucher(&self) -> Voucher {
        Voucher::new(self.voucher_type.clone(), self.voucher.clone())
    }
}

// ============================================================================
// Response
// ============================================================================

/// Response record: accepts or rejects a transfer request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResponse {
    /// Transfer sequence number this response refers to.
    pub transfer_id: TransferId,

    /// Whether the request was accepted.
    pub accepted: bool,
}

impl TransferResponse {
    pub fn new(transfer_id: TransferId, accepted: bool) -> Self {
        Self {
            transfer_id,
            accepted,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A data-transfer message: either a request or a response record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMessage {
    Request(TransferRequest),
    Response(TransferResponse),
}

/// CBOR envelope with the `is_request` discriminator.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    is_request: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    request: Option<TransferRequest>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    response: Option<TransferResponse>,
}

impl TransferMessage {
    /// True when this message is a request record.
    pub fn is_request(&self) -> bool {
        matches!(self, TransferMessage::Request(_))
    }

    /// The transfer sequence number this message refers to.
    pub fn transfer_id(&self) -> TransferId {
        match self {
            TransferMessage::Request(r) => r.transfer_id,
            TransferMessage::Response(r) => r.transfer_id,
        }
    }

    /// Serialize to the CBOR envelope.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let wire = match self {
            TransferMessage::Request(r) => WireMessage {
                is_request: true,
                request: Some(r.clone()),
                response: None,
            },
            TransferMessage::Response(r) => WireMessage {
                is_request: false,
                request: None,
                response: Some(r.clone()),
            },
        };

        let bytes = serde_cbor::to_vec(&wire).map_err(|e| {
            warn!(error = %e, "Failed to serialize TransferMessage");
            MessageError::Serialization(e.to_string())
        })?;

        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        Ok(bytes)
    }

    /// Deserialize from the CBOR envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let wire: WireMessage = serde_cbor::from_slice(bytes).map_err(|e| {
            warn!(error = %e, "Failed to deserialize TransferMessage");
            MessageError::Deserialization(e.to_string())
        })?;

        if wire.is_request {
            wire.request
                .map(TransferMessage::Request)
                .ok_or(MessageError::MissingBody("request"))
        } else {
            wire.response
                .map(TransferMessage::Response)
                .ok_or(MessageError::MissingBody("response"))
        }
    }
}

impl From<TransferRequest> for TransferMessage {
    fn from(request: TransferRequest) -> Self {
        TransferMessage::Request(request)
    }
}

impl From<TransferResponse> for TransferMessage {
    fn from(response: TransferResponse) -> Self {
        TransferMessage::Response(response)
    }
}

// ============================================================================
// Restart request
// ============================================================================

/// Control message asking a peer to reopen a transfer with persisted state.
///
/// Carried by the session's peer-to-peer messaging layer, not by the engine.
/// The receiver consults its own channel state and runs its restart flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub channel_id: ChannelId,
}

impl RestartRequest {
    pub fn new(channel_id: ChannelId) -> Self {
        Self { channel_id }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        serde_cbor::to_vec(self).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        serde_cbor::from_slice(bytes).map_err(|e| MessageError::Deserialization(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
