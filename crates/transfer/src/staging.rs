//! Seam between the upload session and whatever stores the bytes.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::TransferError;

/// A boxed future returned by staging operations.
pub type TransferFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>>;

/// One file being received.
///
/// Calls arrive strictly in order: `create`, any number of `append`,
/// then either `rename` or `dispose`.
pub trait StagedUpload: Send + 'static {
    /// Prepares the staging resource for the declared size.
    fn create(&mut self) -> TransferFuture<'_>;

    /// Appends `data` after everything appended so far.
    ///
    /// Must reject data that would grow the file past [`size`](Self::size).
    fn append<'a>(&'a mut self, data: &'a [u8]) -> TransferFuture<'a>;

    /// Atomically moves the staged bytes to the destination path.
    fn rename(&mut self) -> TransferFuture<'_>;

    /// Releases an unfinalized staging resource. Never fails.
    fn dispose(&mut self);

    /// Declared size in bytes.
    fn size(&self) -> u64;

    /// Bytes appended so far.
    fn uploaded_bytes(&self) -> u64;
}

/// Produces a [`StagedUpload`] per file.
///
/// Implementations are shared by every connection of a server, so
/// uploads for different destinations must not interfere.
pub trait StagingBackend: Send + Sync + 'static {
    type Upload: StagedUpload;

    /// Starts a new upload of `size` bytes destined for `path`.
    fn begin(&self, path: PathBuf, size: u64) -> Self::Upload;
}
