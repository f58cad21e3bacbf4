//! Staged file writing and destination resolution.
//!
//! Each incoming file is written to a hidden staging file next to its
//! destination and moved into place with a single rename once all of
//! its bytes have arrived.

mod resolver;
mod staging;
mod upload;
mod validation;

pub use resolver::UriResolver;
pub use staging::{StagedUpload, StagingBackend, TransferFuture};
pub use upload::{FileUpload, FsStaging, STAGING_SUFFIX};
pub use validation::{ensure_within_root, validate_destination_path};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid uri: {0}")]
    InvalidUri(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("chunk overflows declared size: {attempted} > {declared} bytes")]
    Overflow { declared: u64, attempted: u64 },

    #[error("staging file not created")]
    NotCreated,

    #[error("upload already finalized")]
    AlreadyFinalized,
}
