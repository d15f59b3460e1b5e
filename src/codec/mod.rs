//! Wire encoders for observed events.
//!
//! Three interchangeable framings are supported:
//! - [`FrameFormat::Fixed`]: `[u16 key len][u32 value len][key][value]`
//! - [`FrameFormat::Newline`]: `[u16 key len][key][value]['\n']`
//! - [`FrameFormat::Json`]: one JSON trace record per line, base64 payloads
//!
//! Each encoder produces a complete frame; sinks write frames verbatim.

mod binary;
mod json;

pub use binary::{
    decode_fixed, decode_newline, encode_fixed, encode_newline, Frame, FIXED_HEADER_SIZE,
    NEWLINE_HEADER_SIZE,
};
pub use json::{decode_json, encode_json, encode_table_update, TraceOperation};

use crate::error::Result;
use crate::types::{Event, TraceContext};
use serde::{Deserialize, Serialize};

/// Framing used by a listener.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    Fixed,
    Newline,
    #[default]
    Json,
}

impl FrameFormat {
    /// Encode an event.
    ///
    /// Returns `Ok(None)` when a binary framing cannot represent the
    /// key or value length; the event is dropped for this format.
    pub fn encode(&self, event: &Event<'_>, metadata: &TraceContext) -> Result<Option<Vec<u8>>> {
        let frame = match self {
            FrameFormat::Fixed => encode_fixed(event.key, event.value_bytes()),
            FrameFormat::Newline => encode_newline(event.key, event.value_bytes()),
            FrameFormat::Json => Some(encode_json(event, metadata)?),
        };

        if frame.is_none() {
            tracing::debug!(
                format = ?self,
                key_len = event.key.len(),
                value_len = event.value_bytes().len(),
                "dropping event too large for framing"
            );
        }

        Ok(frame)
    }
}
