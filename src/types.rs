//! Core identifiers for data-transfer channels.

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence number distinguishing transfers between the same pair of peers.
pub type TransferId = u64;

/// Serde helpers for `PeerId` fields: bytes in binary formats, base58
/// strings in human-readable formats.
pub(crate) mod peer_id_serde {
    use libp2p::PeerId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(peer_id: &PeerId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&peer_id.to_string())
        } else {
            serializer.serialize_bytes(&peer_id.to_bytes())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PeerId, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse::<PeerId>()
                .map_err(|e| serde::de::Error::custom(format!("Invalid PeerId: {}", e)))
        } else {
            let bytes = serde_bytes::ByteBuf::deserialize(deserializer)?;
            PeerId::from_bytes(&bytes)
                .map_err(|e| serde::de::Error::custom(format!("Invalid PeerId: {}", e)))
        }
    }
}

/// Identifies one data-transfer session between two peers.
///
/// The triple is globally unique per transfer: the initiator is the peer
/// that created the channel, the responder is its counterparty, and `id`
/// is the initiator-assigned transfer sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId {
    /// Peer that created the channel.
    #[serde(with = "peer_id_serde")]
    pub initiator: PeerId,

    /// Counterparty of the transfer.
    #[serde(with = "peer_id_serde")]
    pub responder: PeerId,

    /// Transfer sequence number assigned by the initiator.
    pub id: TransferId,
}

impl ChannelId {
    /// Return the counterparty of `local` on this channel.
    pub fn other_party(&self, local: PeerId) -> PeerId {
        if self.initiator == local {
            self.responder
        } else {
            self.initiator
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.initiator, self.responder, self.id)
    }
}
