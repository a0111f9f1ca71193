//! Data-transfer transport adapter over a content-addressed block-exchange
//! engine.
//!
//! This crate bridges a high-level data-transfer session layer onto a
//! lower-level block-exchange engine moving IPLD graphs between peers. The
//! [`transport::Transport`] translates engine events (request received,
//! block sent, request cancelled, transport errors) into semantic
//! data-transfer events delivered to the session's [`events::EventsHandler`],
//! and translates session operations (open, pause, resume, close, restart)
//! into engine operations on the right underlying request. The
//! [`restart::RestartCoordinator`] sits above the transport and drives the
//! cancel-and-reopen negotiation for channels with persisted state.
//!
//! The engine itself, the block store, the session state machine, and the
//! peer-to-peer messaging layer are external collaborators, consumed through
//! the traits in [`engine`], [`voucher`], and [`restart`].

pub mod config;
pub mod content_id;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod restart;
pub mod transport;
pub mod types;
pub mod voucher;

pub use config::TransportConfig;
pub use content_id::ContentId;
pub use error::{EngineError, MessageError, TransferError};
pub use events::EventsHandler;
pub use message::{RestartRequest, TransferMessage, TransferRequest, TransferResponse};
pub use restart::{ChannelState, RestartCoordinator, TransferNetwork};
pub use transport::{Transport, MAX_CANCEL_WAIT, MIN_CANCEL_WAIT};
pub use types::{ChannelId, TransferId};
pub use voucher::{RequestValidator, TransportConfigurer, Voucher, VoucherRegistry};
