use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::TransferError;
use crate::staging::{StagedUpload, StagingBackend, TransferFuture};

/// Extension of every staging file.
pub const STAGING_SUFFIX: &str = "upload";

// ---------------------------------------------------------------------------
// FileUpload
// ---------------------------------------------------------------------------

/// Receives one file into a hidden staging file next to its destination.
///
/// The staging file shares the destination's directory so the final
/// rename never crosses a filesystem boundary.
pub struct FileUpload {
    path: PathBuf,
    staging_path: PathBuf,
    size: u64,
    uploaded: u64,
    file: Option<tokio::fs::File>,
    finalized: bool,
    disposed: bool,
}

impl FileUpload {
    /// Creates an upload of `size` bytes for `path`. Touches nothing on disk.
    pub fn new(path: PathBuf, size: u64) -> Self {
        let staging_path = staging_path_for(&path);
        Self {
            path,
            staging_path,
            size,
            uploaded: 0,
            file: None,
            finalized: false,
            disposed: false,
        }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the staging file.
    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    /// Returns `true` once the staged bytes were moved into place.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn check_open(&self) -> Result<(), TransferError> {
        if self.finalized || self.disposed {
            return Err(TransferError::AlreadyFinalized);
        }
        Ok(())
    }
}

/// `dir/name` -> `dir/.name.<uuid>.upload`
fn staging_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging_name = format!(".{name}.{}.{STAGING_SUFFIX}", uuid::Uuid::new_v4());
    path.with_file_name(staging_name)
}

impl StagedUpload for FileUpload {
    fn create(&mut self) -> TransferFuture<'_> {
        Box::pin(async move {
            self.check_open()?;
            if let Some(parent) = self.staging_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::File::create(&self.staging_path).await?;
            self.file = Some(file);

            debug!(
                dest = %self.path.display(),
                tmp = %self.staging_path.display(),
                size = self.size,
                "staging file created"
            );
            Ok(())
        })
    }

    fn append<'a>(&'a mut self, data: &'a [u8]) -> TransferFuture<'a> {
        Box::pin(async move {
            self.check_open()?;
            let attempted = self.uploaded + data.len() as u64;
            if attempted > self.size {
                return Err(TransferError::Overflow {
                    declared: self.size,
                    attempted,
                });
            }

            let file = self.file.as_mut().ok_or(TransferError::NotCreated)?;
            file.write_all(data).await?;
            self.uploaded = attempted;
            Ok(())
        })
    }

    fn rename(&mut self) -> TransferFuture<'_> {
        Box::pin(async move {
            self.check_open()?;
            let mut file = self.file.take().ok_or(TransferError::NotCreated)?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            // Replaces an existing destination in a single step.
            tokio::fs::rename(&self.staging_path, &self.path).await?;
            self.finalized = true;

            debug!(
                dest = %self.path.display(),
                bytes = self.uploaded,
                "upload finalized"
            );
            Ok(())
        })
    }

    fn dispose(&mut self) {
        if self.finalized || self.disposed {
            return;
        }
        self.disposed = true;
        drop(self.file.take());

        match std::fs::remove_file(&self.staging_path) {
            Ok(()) => debug!(tmp = %self.staging_path.display(), "staging file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                tmp = %self.staging_path.display(),
                "failed to remove staging file: {e}"
            ),
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn uploaded_bytes(&self) -> u64 {
        self.uploaded
    }
}

// ---------------------------------------------------------------------------
// FsStaging
// ---------------------------------------------------------------------------

/// [`StagingBackend`] writing straight to the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStaging;

impl StagingBackend for FsStaging {
    type Upload = FileUpload;

    fn begin(&self, path: PathBuf, size: u64) -> FileUpload {
        FileUpload::new(path, size)
    }
}
