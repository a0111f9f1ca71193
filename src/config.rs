//! Configuration for the transport adapter.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::transport::extension::default_supported_extensions;

/// Configuration for the transport adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Supported data-transfer extension names, newest first.
    pub supported_extensions: Vec<String>,
    /// Minimum wait after a cancelled request completes, in milliseconds,
    /// so the engine can flush trailing events before a reopen.
    pub min_cancel_wait_ms: u64,
    /// Safety ceiling on waiting for a cancelled request, in milliseconds.
    pub max_cancel_wait_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            supported_extensions: default_supported_extensions(),
            min_cancel_wait_ms: 100,
            max_cancel_wait_ms: 1_000,
        }
    }
}

impl TransportConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            supported_extensions: std::env::var("DATA_TRANSFER_EXTENSIONS")
                .ok()
                .map(|s| s.split(',').map(|e| e.trim().to_string()).collect())
                .unwrap_or(defaults.supported_extensions),
            min_cancel_wait_ms: std::env::var("DATA_TRANSFER_MIN_CANCEL_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_cancel_wait_ms),
            max_cancel_wait_ms: std::env::var("DATA_TRANSFER_MAX_CANCEL_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_cancel_wait_ms),
        }
    }

    /// Get the minimum cancel wait as Duration.
    pub fn min_cancel_wait(&self) -> Duration {
        Duration::from_millis(self.min_cancel_wait_ms)
    }

    /// Get the maximum cancel wait as Duration.
    pub fn max_cancel_wait(&self) -> Duration {
        Duration::from_millis(self.max_cancel_wait_ms)
    }
}
