//! WebSocket endpoint receiving file uploads.
//!
//! Each connection to the upload path gets its own [`UploadSession`],
//! driven by a single worker task so that messages are applied strictly
//! in arrival order. Files are written through a
//! [`StagingBackend`](fsupload_transfer::StagingBackend) and moved into
//! place once complete.

mod connection;
mod server;
mod session;

#[cfg(test)]
mod testing;

pub use connection::{SendError, Sender};
pub use server::{ServerConfig, UploadServer};
pub use session::{Inbound, SessionError, SessionState, UploadSession};

/// Send buffer capacity.
///
/// At most one frame is produced per inbound message, so this only has
/// to absorb bursts while the write pump is blocked on a slow client.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Inbound queue capacity between the read pump and the worker.
///
/// When the worker falls behind (slow disk) the read pump stops reading,
/// which pushes back on the client through TCP flow control.
pub const INBOUND_QUEUE_SIZE: usize = 64;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
