//! Per-connection upload state machine.
//!
//! The session knows nothing about sockets: it is fed one [`Inbound`]
//! message at a time and answers with the frame to send back, if any.
//! The connection worker is responsible for calling [`apply`] strictly
//! sequentially and for [`teardown`] once the connection is gone.
//!
//! [`apply`]: UploadSession::apply
//! [`teardown`]: UploadSession::teardown

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fsupload_protocol::{Frame, ProtocolError, UploadRequest};
use fsupload_transfer::{StagedUpload, StagingBackend, TransferError, UriResolver};
use tracing::{debug, info, warn};

/// One message received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// JSON request.
    Text(String),
    /// Raw chunk of the active file.
    Binary(Vec<u8>),
}

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No file in progress, waiting for the next request.
    Idle,
    /// A file was started and is waiting for chunks.
    Transferring,
    /// Completed, failed or torn down. Accepts nothing more.
    Closed,
}

/// Failures while applying a message. All of them end the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("unknown upload request, see backend logs")]
    UnexpectedChunk,

    #[error("file transfer already in progress: {0}")]
    TransferInProgress(String),

    #[error("total already announced: {0} bytes")]
    TotalAlreadySet(u64),

    #[error("session closed")]
    Closed,
}

/// The file currently being received.
struct ActiveTransfer<U> {
    path: PathBuf,
    upload: U,
}

/// Upload bookkeeping for one connection.
pub struct UploadSession<B: StagingBackend> {
    backend: Arc<B>,
    resolver: UriResolver,
    /// `None` until the client announces it.
    total_expected: Option<u64>,
    /// Sum of the sizes of finalized files.
    completed: u64,
    active: Option<ActiveTransfer<B::Upload>>,
    closed: bool,
}

impl<B: StagingBackend> UploadSession<B> {
    pub fn new(backend: Arc<B>, resolver: UriResolver) -> Self {
        Self {
            backend,
            resolver,
            total_expected: None,
            completed: 0,
            active: None,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.active.is_some() {
            SessionState::Transferring
        } else {
            SessionState::Idle
        }
    }

    /// Total announced by the client, if any.
    pub fn total_expected_bytes(&self) -> Option<u64> {
        self.total_expected
    }

    /// Bytes of files that were fully written and finalized.
    pub fn completed_bytes(&self) -> u64 {
        self.completed
    }

    /// Finalized bytes plus what the active file has received so far.
    pub fn uploaded_bytes(&self) -> u64 {
        self.completed
            + self
                .active
                .as_ref()
                .map_or(0, |a| a.upload.uploaded_bytes())
    }

    /// Destination of the file in progress.
    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Applies one inbound message.
    ///
    /// Returns the frame to send back, if any. A terminal frame or an
    /// error closes the session; the active transfer (if any) is left in
    /// place for [`teardown`](Self::teardown).
    pub async fn apply(&mut self, msg: Inbound) -> Result<Option<Frame>, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let result = match msg {
            Inbound::Binary(data) => self.on_chunk(&data).await.map(Some),
            Inbound::Text(text) => match UploadRequest::parse(&text) {
                Ok(UploadRequest::Sizing { total }) => self.on_sizing(total).map(|()| None),
                Ok(UploadRequest::FileStart { uri, size }) => self.on_file_start(&uri, size).await,
                Err(e) => {
                    warn!(request = %text, "unknown upload request");
                    Err(e.into())
                }
            },
        };

        match &result {
            Ok(Some(frame)) if frame.is_terminal() => self.closed = true,
            Err(_) => self.closed = true,
            _ => {}
        }
        result
    }

    fn on_sizing(&mut self, total: u64) -> Result<(), SessionError> {
        if let Some(previous) = self.total_expected {
            return Err(SessionError::TotalAlreadySet(previous));
        }
        debug!(total, "upload total announced");
        self.total_expected = Some(total);
        Ok(())
    }

    async fn on_file_start(&mut self, uri: &str, size: u64) -> Result<Option<Frame>, SessionError> {
        if let Some(active) = &self.active {
            return Err(SessionError::TransferInProgress(
                active.path.display().to_string(),
            ));
        }

        let path = self.resolver.resolve(uri)?;
        let upload = self.backend.begin(path.clone(), size);
        let active = self.active.insert(ActiveTransfer { path, upload });
        active.upload.create().await?;
        debug!(path = %active.path.display(), size, "file upload started");

        if size > 0 {
            return Ok(None);
        }

        // Nothing to wait for.
        self.finalize().await?;
        Ok(match self.total_expected {
            Some(total) if self.uploaded_bytes() >= total => Some(Frame::ok()),
            _ => None,
        })
    }

    async fn on_chunk(&mut self, data: &[u8]) -> Result<Frame, SessionError> {
        let active = self.active.as_mut().ok_or(SessionError::UnexpectedChunk)?;
        active.upload.append(data).await?;

        if active.upload.uploaded_bytes() >= active.upload.size() {
            self.finalize().await?;
        }

        // An unannounced total counts as zero: the first chunk completes.
        let uploaded = self.uploaded_bytes();
        if uploaded < self.total_expected.unwrap_or(0) {
            Ok(Frame::done(uploaded))
        } else {
            Ok(Frame::ok())
        }
    }

    /// Moves the active file into place and clears it.
    async fn finalize(&mut self) -> Result<(), SessionError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active.upload.rename().await?;

        let size = active.upload.size();
        self.completed += size;
        if let Some(done) = self.active.take() {
            info!(path = %done.path.display(), size, "file uploaded");
        }
        Ok(())
    }

    /// Closes the session, disposing of an unfinished transfer.
    ///
    /// Returns `true` if a transfer was disposed. Calling it again is a
    /// no-op, so disposal happens at most once.
    pub fn teardown(&mut self) -> bool {
        self.closed = true;
        match self.active.take() {
            Some(mut active) => {
                warn!(
                    path = %active.path.display(),
                    received = active.upload.uploaded_bytes(),
                    size = active.upload.size(),
                    "discarding unfinished upload"
                );
                active.upload.dispose();
                true
            }
            None => false,
        }
    }
}
