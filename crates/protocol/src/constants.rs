use std::time::Duration;

/// Well-known path the upload endpoint is registered on.
pub const UPLOAD_WS_PATH: &str = "/file-upload";

/// How often the server pings the client.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Longest silence without a pong, counted from the last pong (or from
/// the upgrade), before the connection is considered dead.
///
/// Kept generous because a slow disk can stall the worker while the
/// client keeps streaming chunks.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Prefix of every error frame sent to the client.
pub const ERROR_FRAME_PREFIX: &str = "upload failed (see backend logs for details), reason: ";
