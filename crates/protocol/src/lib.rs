pub mod constants;
pub mod frame;
pub mod request;

// Re-export primary types for convenience.
pub use frame::Frame;
pub use request::{ProtocolError, UploadRequest};
