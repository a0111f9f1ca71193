//! Shared fakes for driving the transport without a real engine.
//!
//! `FakeEngine` records every call the transport makes and hands back the
//! hooks the transport registered so tests can fire them as the engine
//! would. `FakeEvents` records every session callback and returns scripted
//! verdicts. `RecordedActions` captures what a hook asked the engine to do.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use flow_data_transfer::engine::{
    BlockData, BlockExchange, BlockIo, BlockSentListener, CompletedResponseListener,
    ExtensionData, IncomingBlockActions, IncomingBlockHook, IncomingRequestActions,
    IncomingRequestHook, IncomingResponseActions, IncomingResponseHook,
    NetworkReceiveErrorListener, NetworkSendErrorListener, OutgoingBlockActions,
    OutgoingBlockHook, OutgoingRequestActions, OutgoingRequestHook, RequestData, RequestId,
    RequestUpdatedActions, RequestUpdatedHook, RequestorCancelledListener, ResponseData,
    ResponseProgress, ResponseStatus, UnregisterHookFn,
};
use flow_data_transfer::{
    ChannelId, ContentId, EngineError, EventsHandler, TransferError, TransferMessage,
    TransferRequest, TransferResponse, Voucher,
};
use libp2p::identity::Keypair;
use libp2p::PeerId;

// ============================================================================
// Test data helpers
// ============================================================================

pub fn test_peer() -> PeerId {
    Keypair::generate_ed25519().public().to_peer_id()
}

pub fn test_channel(initiator: PeerId, responder: PeerId, id: u64) -> ChannelId {
    ChannelId {
        initiator,
        responder,
        id,
    }
}

pub fn test_voucher() -> Voucher {
    Voucher::new("deal", vec![0xCA, 0xFE])
}

pub fn test_root() -> ContentId {
    ContentId::from_bytes(b"transfer root")
}

pub fn pull_request_message(transfer_id: u64) -> TransferMessage {
    TransferRequest::new(transfer_id, true, &test_voucher(), test_root(), vec![0xA0]).into()
}

pub fn response_message(transfer_id: u64) -> TransferMessage {
    TransferResponse::new(transfer_id, true).into()
}

// ============================================================================
// Recorded hook actions
// ============================================================================

/// Captures everything a hook asked the engine to do.
#[derive(Debug, Default)]
pub struct RecordedActions {
    pub sent_extensions: Vec<ExtensionData>,
    pub updated_extensions: Vec<ExtensionData>,
    pub pause_request_calls: usize,
    pub pause_response_calls: usize,
    pub terminated: Option<TransferError>,
    pub validated: bool,
    pub persistence_option: Option<String>,
}

impl OutgoingRequestActions for RecordedActions {
    fn use_persistence_option(&mut self, name: &str) {
        self.persistence_option = Some(name.to_string());
    }
}

impl IncomingRequestActions for RecordedActions {
    fn send_extension_data(&mut self, extension: ExtensionData) {
        self.sent_extensions.push(extension);
    }

    fn use_persistence_option(&mut self, name: &str) {
        self.persistence_option = Some(name.to_string());
    }

    fn pause_response(&mut self) {
        self.pause_response_calls += 1;
    }

    fn terminate_with_error(&mut self, error: TransferError) {
        self.terminated = Some(error);
    }

    fn validate_request(&mut self) {
        self.validated = true;
    }
}

impl IncomingBlockActions for RecordedActions {
    fn pause_request(&mut self) {
        self.pause_request_calls += 1;
    }

    fn terminate_with_error(&mut self, error: TransferError) {
        self.terminated = Some(error);
    }
}

impl OutgoingBlockActions for RecordedActions {
    fn send_extension_data(&mut self, extension: ExtensionData) {
        self.sent_extensions.push(extension);
    }

    fn pause_response(&mut self) {
        self.pause_response_calls += 1;
    }

    fn terminate_with_error(&mut self, error: TransferError) {
        self.terminated = Some(error);
    }
}

impl IncomingResponseActions for RecordedActions {
    fn update_request_with_extensions(&mut self, extension: ExtensionData) {
        self.updated_extensions.push(extension);
    }

    fn terminate_with_error(&mut self, error: TransferError) {
        self.terminated = Some(error);
    }
}

impl RequestUpdatedActions for RecordedActions {
    fn send_extension_data(&mut self, extension: ExtensionData) {
        self.sent_extensions.push(extension);
    }

    fn terminate_with_error(&mut self, error: TransferError) {
        self.terminated = Some(error);
    }
}

// ============================================================================
// Fake engine
// ============================================================================

pub struct RequestSenders {
    pub progress: mpsc::UnboundedSender<ResponseProgress>,
    pub errors: mpsc::UnboundedSender<EngineError>,
}

/// One outgoing request the transport opened on the fake engine.
pub struct FakeRequest {
    pub id: RequestId,
    pub peer: PeerId,
    pub root: ContentId,
    pub selector: Vec<u8>,
    pub extensions: Vec<ExtensionData>,
    pub ctx: CancellationToken,
    senders: Arc<Mutex<Option<RequestSenders>>>,
}

impl FakeRequest {
    /// Take the stream senders to drive the request from the test. Dropping
    /// them completes the request.
    pub fn take_senders(&self) -> Option<RequestSenders> {
        self.senders.lock().unwrap().take()
    }

    pub fn extension(&self, name: &str) -> Option<Vec<u8>> {
        self.extensions
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.clone())
    }

    /// The request as the engine would hand it to a hook.
    pub fn request_data(&self) -> RequestData {
        RequestData::new(self.id, self.extensions.clone())
    }
}

/// Engine operations recorded by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    PauseRequest(RequestId),
    UnpauseRequest(RequestId, Vec<ExtensionData>),
    PauseResponse(PeerId, RequestId),
    UnpauseResponse(PeerId, RequestId, Vec<ExtensionData>),
    CancelResponse(PeerId, RequestId),
    RegisterPersistenceOption(String),
    UnregisterPersistenceOption(String),
}

#[derive(Default)]
struct Hooks {
    outgoing_request: Option<OutgoingRequestHook>,
    incoming_request: Option<IncomingRequestHook>,
    incoming_block: Option<IncomingBlockHook>,
    outgoing_block: Option<OutgoingBlockHook>,
    block_sent: Option<BlockSentListener>,
    incoming_response: Option<IncomingResponseHook>,
    request_updated: Option<RequestUpdatedHook>,
    completed_response: Option<CompletedResponseListener>,
    requestor_cancelled: Option<RequestorCancelledListener>,
    network_send_error: Option<NetworkSendErrorListener>,
    network_receive_error: Option<NetworkReceiveErrorListener>,
}

/// Scripted stand-in for the block-exchange engine.
#[derive(Default)]
pub struct FakeEngine {
    next_request_id: AtomicU64,
    pub requests: Mutex<Vec<Arc<FakeRequest>>>,
    pub calls: Mutex<Vec<EngineCall>>,
    pub unregister_count: Arc<AtomicUsize>,
    hooks: Mutex<Hooks>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> Arc<FakeRequest> {
        Arc::clone(&self.requests.lock().unwrap()[index])
    }

    fn unregister_fn(&self) -> UnregisterHookFn {
        let count = Arc::clone(&self.unregister_count);
        Box::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    // ------------------------------------------------------------------
    // Hook firing
    // ------------------------------------------------------------------

    pub fn fire_outgoing_request_hook(&self, peer: PeerId, request: &RequestData) -> RecordedActions {
        let mut actions = RecordedActions::default();
        let hooks = self.hooks.lock().unwrap();
        (hooks.outgoing_request.as_ref().expect("hook not registered"))(
            peer,
            request,
            &mut actions,
        );
        actions
    }

    pub fn fire_incoming_request_hook(&self, peer: PeerId, request: &RequestData) -> RecordedActions {
        let mut actions = RecordedActions::default();
        let hooks = self.hooks.lock().unwrap();
        (hooks.incoming_request.as_ref().expect("hook not registered"))(
            peer,
            request,
            &mut actions,
        );
        actions
    }

    pub fn fire_incoming_block_hook(
        &self,
        peer: PeerId,
        response: &ResponseData,
        block: &BlockData,
    ) -> RecordedActions {
        let mut actions = RecordedActions::default();
        let hooks = self.hooks.lock().unwrap();
        (hooks.incoming_block.as_ref().expect("hook not registered"))(
            peer,
            response,
            block,
            &mut actions,
        );
        actions
    }

    pub fn fire_outgoing_block_hook(
        &self,
        peer: PeerId,
        request: &RequestData,
        block: &BlockData,
    ) -> RecordedActions {
        let mut actions = RecordedActions::default();
        let hooks = self.hooks.lock().unwrap();
        (hooks.outgoing_block.as_ref().expect("hook not registered"))(
            peer,
            request,
            block,
            &mut actions,
        );
        actions
    }

    pub fn fire_block_sent(&self, peer: PeerId, request: &RequestData, block: &BlockData) {
        let hooks = self.hooks.lock().unwrap();
        (hooks.block_sent.as_ref().expect("hook not registered"))(peer, request, block);
    }

    pub fn fire_incoming_response_hook(
        &self,
        peer: PeerId,
        response: &ResponseData,
    ) -> RecordedActions {
        let mut actions = RecordedActions::default();
        let hooks = self.hooks.lock().unwrap();
        (hooks.incoming_response.as_ref().expect("hook not registered"))(
            peer,
            response,
            &mut actions,
        );
        actions
    }

    pub fn fire_request_updated_hook(
        &self,
        peer: PeerId,
        request: &RequestData,
        update: &RequestData,
    ) -> RecordedActions {
        let mut actions = RecordedActions::default();
        let hooks = self.hooks.lock().unwrap();
        (hooks.request_updated.as_ref().expect("hook not registered"))(
            peer,
            request,
            update,
            &mut actions,
        );
        actions
    }

    pub fn fire_completed_response(
        &self,
        peer: PeerId,
        request: &RequestData,
        status: ResponseStatus,
    ) {
        let hooks = self.hooks.lock().unwrap();
        (hooks.completed_response.as_ref().expect("hook not registered"))(peer, request, status);
    }

    pub fn fire_requestor_cancelled(&self, peer: PeerId, request: &RequestData) {
        let hooks = self.hooks.lock().unwrap();
        (hooks
            .requestor_cancelled
            .as_ref()
            .expect("hook not registered"))(peer, request);
    }

    pub fn fire_send_error(&self, peer: PeerId, request: &RequestData, error: EngineError) {
        let hooks = self.hooks.lock().unwrap();
        (hooks
            .network_send_error
            .as_ref()
            .expect("hook not registered"))(peer, request, error);
    }

    pub fn fire_receive_error(&self, peer: PeerId, error: EngineError) {
        let hooks = self.hooks.lock().unwrap();
        (hooks
            .network_receive_error
            .as_ref()
            .expect("hook not registered"))(peer, error);
    }
}

impl BlockExchange for FakeEngine {
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
    ) {
        let id = RequestId(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let senders = Arc::new(Mutex::new(Some(RequestSenders {
            progress: progress_tx,
            errors: error_tx,
        })));

        // A cancelled request drains with no explicit error, matching the
        // engine defect the executor has to tolerate.
        let watcher_ctx = ctx.clone();
        let watcher_senders = Arc::clone(&senders);
        tokio::spawn(async move {
            watcher_ctx.cancelled().await;
            watcher_senders.lock().unwrap().take();
        });

        self.requests.lock().unwrap().push(Arc::new(FakeRequest {
            id,
            peer,
            root,
            selector,
            extensions,
            ctx,
            senders,
        }));

        (progress_rx, error_rx)
    }

    fn pause_request(&self, request_id: RequestId) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::PauseRequest(request_id));
        Ok(())
    }

    fn unpause_request(
        &self,
        request_id: RequestId,
        extensions: Vec<ExtensionData>,
    ) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::UnpauseRequest(request_id, extensions));
        Ok(())
    }

    fn pause_response(&self, peer: PeerId, request_id: RequestId) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::PauseResponse(peer, request_id));
        Ok(())
    }

    fn unpause_response(
        &self,
        peer: PeerId,
        request_id: RequestId,
        extensions: Vec<ExtensionData>,
    ) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::UnpauseResponse(peer, request_id, extensions));
        Ok(())
    }

    fn cancel_response(&self, peer: PeerId, request_id: RequestId) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::CancelResponse(peer, request_id));
        Ok(())
    }

    fn register_persistence_option(
        &self,
        name: &str,
        _store: Arc<dyn BlockIo>,
    ) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::RegisterPersistenceOption(name.to_string()));
        Ok(())
    }

    fn unregister_persistence_option(&self, name: &str) -> Result<(), EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(EngineCall::UnregisterPersistenceOption(name.to_string()));
        Ok(())
    }

    fn register_outgoing_request_hook(&self, hook: OutgoingRequestHook) -> UnregisterHookFn {
        self.hooks.lock().unwrap().outgoing_request = Some(hook);
        self.unregister_fn()
    }

    fn register_incoming_request_hook(&self, hook: IncomingRequestHook) -> UnregisterHookFn {
        self.hooks.lock().unwrap().incoming_request = Some(hook);
        self.unregister_fn()
    }

    fn register_incoming_block_hook(&self, hook: IncomingBlockHook) -> UnregisterHookFn {
        self.hooks.lock().unwrap().incoming_block = Some(hook);
        self.unregister_fn()
    }

    fn register_outgoing_block_hook(&self, hook: OutgoingBlockHook) -> UnregisterHookFn {
        self.hooks.lock().unwrap().outgoing_block = Some(hook);
        self.unregister_fn()
    }

    fn register_block_sent_listener(&self, listener: BlockSentListener) -> UnregisterHookFn {
        self.hooks.lock().unwrap().block_sent = Some(listener);
        self.unregister_fn()
    }

    fn register_incoming_response_hook(&self, hook: IncomingResponseHook) -> UnregisterHookFn {
        self.hooks.lock().unwrap().incoming_response = Some(hook);
        self.unregister_fn()
    }

    fn register_request_updated_hook(&self, hook: RequestUpdatedHook) -> UnregisterHookFn {
        self.hooks.lock().unwrap().request_updated = Some(hook);
        self.unregister_fn()
    }

    fn register_completed_response_listener(
        &self,
        listener: CompletedResponseListener,
    ) -> UnregisterHookFn {
        self.hooks.lock().unwrap().completed_response = Some(listener);
        self.unregister_fn()
    }

    fn register_requestor_cancelled_listener(
        &self,
        listener: RequestorCancelledListener,
    ) -> UnregisterHookFn {
        self.hooks.lock().unwrap().requestor_cancelled = Some(listener);
        self.unregister_fn()
    }

    fn register_network_send_error_listener(
        &self,
        listener: NetworkSendErrorListener,
    ) -> UnregisterHookFn {
        self.hooks.lock().unwrap().network_send_error = Some(listener);
        self.unregister_fn()
    }

    fn register_network_receive_error_listener(
        &self,
        listener: NetworkReceiveErrorListener,
    ) -> UnregisterHookFn {
        self.hooks.lock().unwrap().network_receive_error = Some(listener);
        self.unregister_fn()
    }
}

/// Store stand-in for `use_store` tests.
pub struct NullStore;

impl BlockIo for NullStore {
    fn load(&self, _link: &ContentId) -> io::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn store(&self, _link: &ContentId, _data: Vec<u8>) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Fake events handler
// ============================================================================

/// One recorded session callback.
#[derive(Debug, Clone)]
pub enum Event {
    Opened(ChannelId),
    RequestReceived(ChannelId, TransferRequest),
    ResponseReceived(ChannelId, TransferResponse),
    DataReceived(ChannelId, ContentId, u64),
    DataQueued(ChannelId, ContentId, u64),
    DataSent(ChannelId, ContentId, u64),
    TimedOut(ChannelId),
    SendError(ChannelId),
    ReceiveError(ChannelId),
    Completed(ChannelId, Result<(), TransferError>),
}

type MessageVerdict = (Option<TransferMessage>, Result<(), TransferError>);

/// Records every callback and returns scripted verdicts.
pub struct FakeEvents {
    pub recorded: Mutex<Vec<Event>>,
    pub open_result: Mutex<Result<(), TransferError>>,
    pub request_received_result: Mutex<MessageVerdict>,
    pub response_received_result: Mutex<Result<(), TransferError>>,
    pub data_received_result: Mutex<Result<(), TransferError>>,
    pub data_queued_result: Mutex<MessageVerdict>,
}

impl Default for FakeEvents {
    fn default() -> Self {
        Self {
            recorded: Mutex::new(Vec::new()),
            open_result: Mutex::new(Ok(())),
            request_received_result: Mutex::new((None, Ok(()))),
            response_received_result: Mutex::new(Ok(())),
            data_received_result: Mutex::new(Ok(())),
            data_queued_result: Mutex::new((None, Ok(()))),
        }
    }
}

impl FakeEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn opened_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Opened(_)))
            .count()
    }

    pub fn completions(&self) -> Vec<(ChannelId, Result<(), TransferError>)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Completed(chid, result) => Some((*chid, result.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn set_request_received(&self, verdict: MessageVerdict) {
        *self.request_received_result.lock().unwrap() = verdict;
    }

    pub fn set_data_received(&self, verdict: Result<(), TransferError>) {
        *self.data_received_result.lock().unwrap() = verdict;
    }

    pub fn set_data_queued(&self, verdict: MessageVerdict) {
        *self.data_queued_result.lock().unwrap() = verdict;
    }
}

impl EventsHandler for FakeEvents {
    fn on_channel_opened(&self, channel_id: ChannelId) -> Result<(), TransferError> {
        self.recorded.lock().unwrap().push(Event::Opened(channel_id));
        self.open_result.lock().unwrap().clone()
    }

    fn on_request_received(
        &self,
        channel_id: ChannelId,
        request: &TransferRequest,
    ) -> (Option<TransferMessage>, Result<(), TransferError>) {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::RequestReceived(channel_id, request.clone()));
        self.request_received_result.lock().unwrap().clone()
    }

    fn on_response_received(
        &self,
        channel_id: ChannelId,
        response: &TransferResponse,
    ) -> Result<(), TransferError> {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::ResponseReceived(channel_id, response.clone()));
        self.response_received_result.lock().unwrap().clone()
    }

    fn on_data_received(
        &self,
        channel_id: ChannelId,
        link: &ContentId,
        size: u64,
    ) -> Result<(), TransferError> {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::DataReceived(channel_id, link.clone(), size));
        self.data_received_result.lock().unwrap().clone()
    }

    fn on_data_queued(
        &self,
        channel_id: ChannelId,
        link: &ContentId,
        size: u64,
    ) -> (Option<TransferMessage>, Result<(), TransferError>) {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::DataQueued(channel_id, link.clone(), size));
        self.data_queued_result.lock().unwrap().clone()
    }

    fn on_data_sent(
        &self,
        channel_id: ChannelId,
        link: &ContentId,
        size: u64,
    ) -> Result<(), TransferError> {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::DataSent(channel_id, link.clone(), size));
        Ok(())
    }

    fn on_request_timed_out(
        &self,
        channel_id: ChannelId,
        _error: TransferError,
    ) -> Result<(), TransferError> {
        self.recorded.lock().unwrap().push(Event::TimedOut(channel_id));
        Ok(())
    }

    fn on_send_data_error(
        &self,
        channel_id: ChannelId,
        _error: EngineError,
    ) -> Result<(), TransferError> {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::SendError(channel_id));
        Ok(())
    }

    fn on_receive_data_error(
        &self,
        channel_id: ChannelId,
        _error: EngineError,
    ) -> Result<(), TransferError> {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::ReceiveError(channel_id));
        Ok(())
    }

    fn on_channel_completed(
        &self,
        channel_id: ChannelId,
        result: Result<(), TransferError>,
    ) -> Result<(), TransferError> {
        self.recorded
            .lock()
            .unwrap()
            .push(Event::Completed(channel_id, result));
        Ok(())
    }
}
