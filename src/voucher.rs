//! Vouchers and the registries that validate and configure transfers.
//!
//! A voucher is an opaque, caller-defined authorization payload carried in
//! the data-transfer request. The session layer registers a validator per
//! voucher type; it may also register a transport configurer that is run
//! before a transfer (re)opens, typically to point the transport at a
//! channel-specific block store.

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::content_id::ContentId;
use crate::error::TransferError;
use crate::message::TransferRequest;
use crate::transport::Transport;
use crate::types::ChannelId;

/// Opaque authorization payload with its registered type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Registered voucher type identifier.
    pub type_id: String,

    /// Encoded voucher payload; interpretation belongs to the validator.
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Voucher {
    pub fn new(type_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_id: type_id.into(),
            data,
        }
    }
}

/// Validates a transfer request carrying a voucher of a registered type.
pub trait RequestValidator: Send + Sync {
    /// Validate `request` as sent by or to `other_party`.
    ///
    /// `is_pull` distinguishes the pull flavor (counterparty sends data to
    /// us) from push. The base CID and selector are the ones the request
    /// was built from.
    fn validate(
        &self,
        other_party: PeerId,
        request: &TransferRequest,
        is_pull: bool,
        base_cid: &ContentId,
        selector: &[u8],
    ) -> Result<(), TransferError>;
}

/// Configures the transport for a channel before it (re)opens.
pub trait TransportConfigurer: Send + Sync {
    fn configure(&self, channel_id: ChannelId, voucher: &Voucher, transport: &Transport);
}

/// Maps voucher type identifiers to validators and transport configurers.
#[derive(Default)]
pub struct VoucherRegistry {
    validators: RwLock<HashMap<String, Arc<dyn RequestValidator>>>,
    configurers: RwLock<HashMap<String, Arc<dyn TransportConfigurer>>>,
}

impl VoucherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validator for a voucher type, replacing any previous one.
    pub fn register_validator(
        &self,
        type_id: impl Into<String>,
        validator: Arc<dyn RequestValidator>,
    ) {
        let type_id = type_id.into();
        debug!(voucher_type = %type_id, "Registering voucher validator");
        self.validators
            .write()
            .expect("voucher registry poisoned")
            .insert(type_id, validator);
    }

    /// Register a transport configurer for a voucher type.
    pub fn register_configurer(
        &self,
        type_id: impl Into<String>,
        configurer: Arc<dyn TransportConfigurer>,
    ) {
        let type_id = type_id.into();
        debug!(voucher_type = %type_id, "Registering transport configurer");
        self.configurers
            .write()
            .expect("voucher registry poisoned")
            .insert(type_id, configurer);
    }

    pub fn validator(&self, type_id: &str) -> Option<Arc<dyn RequestValidator>> {
        self.validators
            .read()
            .expect("voucher registry poisoned")
            .get(type_id)
            .cloned()
    }

    pub fn configurer(&self, type_id: &str) -> Option<Arc<dyn TransportConfigurer>> {
        self.configurers
            .read()
            .expect("voucher registry poisoned")
            .get(type_id)
            .cloned()
    }
}
