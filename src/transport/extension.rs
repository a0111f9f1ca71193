//! Packing and unpacking data-transfer messages as engine extensions.
//!
//! A transfer message rides on an engine request or response as a named
//! extension. The adapter emits one copy of the payload per supported
//! extension version (newest first) so older counterparties still find a
//! payload they understand, and reads back the first recognized one.

use crate::engine::{ExtensionData, HasExtensions};
use crate::error::MessageError;
use crate::message::TransferMessage;

/// Current extension version.
pub const EXTENSION_DATA_TRANSFER_1_1: &str = "flow/data-transfer/1.1";

/// Legacy extension version, still accepted and emitted.
pub const EXTENSION_DATA_TRANSFER_1_0: &str = "flow/data-transfer/1.0";

/// Default supported extension names, newest first.
pub fn default_supported_extensions() -> Vec<String> {
    vec![
        EXTENSION_DATA_TRANSFER_1_1.to_string(),
        EXTENSION_DATA_TRANSFER_1_0.to_string(),
    ]
}

/// Serialize a message into one extension payload per supported name.
pub fn to_extension_data(
    message: &TransferMessage,
    supported: &[String],
) -> Result<Vec<ExtensionData>, MessageError> {
    let bytes = message.to_bytes()?;
    Ok(supported
        .iter()
        .map(|name| ExtensionData::new(name.clone(), bytes.clone()))
        .collect())
}

/// Scan a request or response for a data-transfer payload.
///
/// Extensions are tried in the configured order; the first present one is
/// decoded. `Ok(None)` means no supported extension is attached, i.e. the
/// request is not ours.
pub fn message_from_extensions(
    source: &dyn HasExtensions,
    supported: &[String],
) -> Result<Option<TransferMessage>, MessageError> {
    for name in supported {
        if let Some(payload) = source.extension(name) {
            return TransferMessage::from_bytes(payload).map(Some);
        }
    }
    Ok(None)
}
