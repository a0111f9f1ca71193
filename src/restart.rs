//! Restart coordination for channels with persisted session state.
//!
//! Restarting a transfer depends on who created the channel and on its
//! direction. When the counterparty created it, we revalidate the original
//! voucher and ask them to reopen with a restart-request control message.
//! When we created a push, we resend the (restart-flagged) request over the
//! messaging layer. When we created a pull, we reopen it through the
//! transport, which performs the cancel-and-reopen dance and carries the
//! do-not-send set of CIDs we already hold.

use async_trait::async_trait;
use libp2p::PeerId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::content_id::ContentId;
use crate::error::TransferError;
use crate::message::{RestartRequest, TransferMessage, TransferRequest};
use crate::transport::Transport;
use crate::types::ChannelId;
use crate::voucher::{Voucher, VoucherRegistry};

/// Snapshot of a channel's persisted session state, as needed to rebuild
/// and revalidate its original request.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    /// True when the initiator receives data.
    pub is_pull: bool,
    pub voucher: Voucher,
    pub base_cid: ContentId,
    pub selector: Vec<u8>,
    /// CIDs already received on this channel; becomes the do-not-send set
    /// when a pull reopens.
    pub received_cids: Vec<ContentId>,
}

impl ChannelState {
    pub fn other_party(&self, local: PeerId) -> PeerId {
        self.channel_id.other_party(local)
    }
}

/// The session's peer-to-peer messaging layer, as consumed by restarts.
#[async_trait]
pub trait TransferNetwork: Send + Sync {
    /// Deliver a data-transfer message to a peer.
    async fn send_message(
        &self,
        peer: PeerId,
        message: TransferMessage,
    ) -> Result<(), TransferError>;

    /// Deliver a restart-request control message to a peer.
    async fn send_restart_request(
        &self,
        peer: PeerId,
        request: RestartRequest,
    ) -> Result<(), TransferError>;

    /// Protect the connection to a peer for the duration of a transfer.
    fn protect(&self, peer: PeerId, tag: &str);
}

/// Coordinates channel restarts above the transport façade.
pub struct RestartCoordinator {
    peer_id: PeerId,
    transport: Arc<Transport>,
    network: Arc<dyn TransferNetwork>,
    vouchers: Arc<VoucherRegistry>,
}

impl RestartCoordinator {
    pub fn new(
        peer_id: PeerId,
        transport: Arc<Transport>,
        network: Arc<dyn TransferNetwork>,
        vouchers: Arc<VoucherRegistry>,
    ) -> Self {
        Self {
            peer_id,
            transport,
            network,
            vouchers,
        }
    }

    /// Restart the transfer for a channel with persisted state.
    pub async fn restart_channel(
        &self,
        ctx: &CancellationToken,
        channel: &ChannelState,
    ) -> Result<(), TransferError> {
        let created_locally = channel.channel_id.initiator == self.peer_id;
        match (created_locally, channel.is_pull) {
            (true, true) => self.open_pull_restart_channel(ctx, channel).await,
            (true, false) => self.open_push_restart_channel(channel).await,
            (false, is_pull) => self.restart_peer_created(channel, is_pull).await,
        }
    }

    /// The counterparty created this channel: revalidate the voucher, then
    /// ask them to reopen with a restart-request message.
    async fn restart_peer_created(
        &self,
        channel: &ChannelState,
        is_pull: bool,
    ) -> Result<(), TransferError> {
        self.validate_restart_voucher(channel, is_pull)?;

        let counterparty = channel.other_party(self.peer_id);
        info!(
            channel_id = %channel.channel_id,
            peer = %counterparty,
            is_pull,
            "Asking counterparty to reopen channel"
        );
        self.network
            .send_restart_request(counterparty, RestartRequest::new(channel.channel_id))
            .await
    }

    /// Revalidate the voucher by reconstructing the request that created
    /// this channel and rerunning its validator.
    fn validate_restart_voucher(
        &self,
        channel: &ChannelState,
        is_pull: bool,
    ) -> Result<(), TransferError> {
        let request = TransferRequest::new(
            channel.channel_id.id,
            is_pull,
            &channel.voucher,
            channel.base_cid.clone(),
            channel.selector.clone(),
        );

        let validator = self
            .vouchers
            .validator(&channel.voucher.type_id)
            .ok_or_else(|| {
                TransferError::ValidatorNotRegistered(channel.voucher.type_id.clone())
            })?;

        validator.validate(
            channel.other_party(self.peer_id),
            &request,
            is_pull,
            &channel.base_cid,
            &channel.selector,
        )
    }

    /// We created this push: resend the restart-flagged request over the
    /// messaging layer; the recipient reopens the pull on their side.
    async fn open_push_restart_channel(&self, channel: &ChannelState) -> Result<(), TransferError> {
        let chid = channel.channel_id;
        let request = TransferRequest::restart(
            chid.id,
            false,
            &channel.voucher,
            channel.base_cid.clone(),
            channel.selector.clone(),
        );
        let request_to = channel.other_party(self.peer_id);

        self.configure_transport(chid, &channel.voucher);
        self.network.protect(request_to, &chid.to_string());

        info!(channel_id = %chid, peer = %request_to, "Sending push restart request");
        self.network
            .send_message(request_to, request.into())
            .await
            .map_err(|e| TransferError::SendMessage(e.to_string()))
    }

    /// We created this pull: reopen it through the transport with the
    /// already-received CIDs as the do-not-send set.
    async fn open_pull_restart_channel(
        &self,
        ctx: &CancellationToken,
        channel: &ChannelState,
    ) -> Result<(), TransferError> {
        let chid = channel.channel_id;
        let request = TransferRequest::restart(
            chid.id,
            true,
            &channel.voucher,
            channel.base_cid.clone(),
            channel.selector.clone(),
        );
        let request_to = channel.other_party(self.peer_id);

        self.configure_transport(chid, &channel.voucher);
        self.network.protect(request_to, &chid.to_string());

        info!(
            channel_id = %chid,
            peer = %request_to,
            already_received = channel.received_cids.len(),
            "Reopening pull channel"
        );
        self.transport
            .open_channel(
                ctx,
                request_to,
                chid,
                channel.base_cid.clone(),
                channel.selector.clone(),
                channel.received_cids.clone(),
                request.into(),
            )
            .await
    }

    /// Run the transport configurer registered for the voucher type, if any.
    fn configure_transport(&self, channel_id: ChannelId, voucher: &Voucher) {
        if let Some(configurer) = self.vouchers.configurer(&voucher.type_id) {
            debug!(
                channel_id = %channel_id,
                voucher_type = %voucher.type_id,
                "Running transport configurer"
            );
            configurer.configure(channel_id, voucher, &self.transport);
        }
    }
}
