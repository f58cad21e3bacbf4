use serde::{Deserialize, Serialize};

use crate::constants::ERROR_FRAME_PREFIX;

/// Outbound status frame, sent to the client as JSON text.
///
/// Serialized untagged, so each variant is a single-key object:
/// `{"done":N}`, `{"ok":true}` or `{"error":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Done { done: u64 },
    Ok { ok: bool },
    Error { error: String },
}

impl Frame {
    /// Cumulative bytes uploaded so far.
    pub fn done(bytes: u64) -> Self {
        Frame::Done { done: bytes }
    }

    /// Session complete; the connection is closed right after.
    pub fn ok() -> Self {
        Frame::Ok { ok: true }
    }

    /// Fatal failure; the connection is closed right after.
    pub fn error(reason: impl std::fmt::Display) -> Self {
        Frame::Error {
            error: format!("{ERROR_FRAME_PREFIX}{reason}"),
        }
    }

    /// Returns `true` for frames after which the connection is closed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Done { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
