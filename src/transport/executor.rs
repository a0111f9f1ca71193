//! Executor for one outgoing engine request.
//!
//! Spawned per request opened by `open_channel`. Drains the progress stream
//! to completion, then drains the error stream keeping the last error, then
//! classifies the outcome and fires completion exactly once.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::TransportInner;
use crate::engine::ResponseProgress;
use crate::error::{EngineError, TransferError};
use crate::types::ChannelId;

/// Closes the request's completion latch on every exit path.
struct CompletionGuard {
    completed: watch::Sender<bool>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.completed.send_replace(true);
    }
}

pub(crate) async fn execute_request(
    inner: Arc<TransportInner>,
    channel_id: ChannelId,
    request_ctx: CancellationToken,
    mut progress: mpsc::UnboundedReceiver<ResponseProgress>,
    mut errors: mpsc::UnboundedReceiver<EngineError>,
    completed: watch::Sender<bool>,
) {
    let _guard = CompletionGuard { completed };

    while progress.recv().await.is_some() {}

    let mut last_error = None;
    while let Some(err) = errors.recv().await {
        last_error = Some(err);
    }

    let Some(events) = inner.events() else {
        return;
    };

    match &last_error {
        Some(EngineError::RequestContextCancelled) => {
            let timeout = TransferError::Engine(EngineError::RequestContextCancelled);
            warn!(channel_id = %channel_id, error = %timeout, "Engine request context cancelled");
            if let Err(e) = events.on_request_timed_out(channel_id, timeout) {
                error!(channel_id = %channel_id, error = %e, "Failed to process request timeout");
            }
            return;
        }
        Some(EngineError::RequestCancelled) => return,
        _ => {}
    }

    // Some engines drop a cancelled request without ever putting a
    // RequestCancelled error on the error stream; our own token is the
    // ground truth in that case.
    if request_ctx.is_cancelled() {
        warn!(channel_id = %channel_id, "Engine request cancelled");
        return;
    }

    if let Some(err) = &last_error {
        warn!(channel_id = %channel_id, error = %err, "Engine request error");
    }

    debug!(channel_id = %channel_id, "Finished executing engine request");

    let result = match last_error {
        Some(err) => Err(TransferError::RequestFailed(err.to_string())),
        None => Ok(()),
    };

    let listener = inner
        .completed_request_listener
        .lock()
        .expect("listener lock poisoned")
        .clone();
    if let Some(listener) = listener {
        listener(channel_id);
    }

    if let Err(e) = events.on_channel_completed(channel_id, result) {
        error!(channel_id = %channel_id, error = %e, "Failed to process channel completion");
    }
}
