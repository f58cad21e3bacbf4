//! In-memory staging backend that records every call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fsupload_transfer::{StagedUpload, StagingBackend, TransferError, TransferFuture};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Create(PathBuf),
    /// Destination and chunk length.
    Append(PathBuf, usize),
    Rename(PathBuf),
    Dispose(PathBuf),
}

#[derive(Default)]
struct Inner {
    events: Mutex<Vec<Event>>,
    appends: AtomicUsize,
    fail_append_at: Mutex<Option<usize>>,
    fail_create: AtomicBool,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    inner: Arc<Inner>,
}

impl RecordingBackend {
    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.inner.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Makes the `n`-th append call (1-based, across all uploads) fail.
    pub fn fail_append_at(&self, n: usize) {
        *self.inner.fail_append_at.lock().unwrap() = Some(n);
    }

    pub fn fail_create(&self) {
        self.inner.fail_create.store(true, Ordering::SeqCst);
    }

    /// Every async call sleeps this long before taking effect.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock().unwrap() = Some(delay);
    }

    /// Highest number of async calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Polls until `pred` holds for the recorded events or `timeout` passes.
    pub async fn wait_for(&self, timeout: Duration, pred: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if pred(&self.events()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Inner {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RecordingUpload {
    path: PathBuf,
    size: u64,
    uploaded: u64,
    inner: Arc<Inner>,
}

impl StagedUpload for RecordingUpload {
    fn create(&mut self) -> TransferFuture<'_> {
        Box::pin(async move {
            self.inner.enter().await;
            self.inner.exit();
            if self.inner.fail_create.load(Ordering::SeqCst) {
                return Err(TransferError::Io(std::io::Error::other(
                    "simulated create failure",
                )));
            }
            self.inner.record(Event::Create(self.path.clone()));
            Ok(())
        })
    }

    fn append<'a>(&'a mut self, data: &'a [u8]) -> TransferFuture<'a> {
        Box::pin(async move {
            self.inner.enter().await;
            self.inner.exit();
            let n = self.inner.appends.fetch_add(1, Ordering::SeqCst) + 1;
            if *self.inner.fail_append_at.lock().unwrap() == Some(n) {
                return Err(TransferError::Io(std::io::Error::other(
                    "simulated append failure",
                )));
            }
            let attempted = self.uploaded + data.len() as u64;
            if attempted > self.size {
                return Err(TransferError::Overflow {
                    declared: self.size,
                    attempted,
                });
            }
            self.uploaded = attempted;
            self.inner
                .record(Event::Append(self.path.clone(), data.len()));
            Ok(())
        })
    }

    fn rename(&mut self) -> TransferFuture<'_> {
        Box::pin(async move {
            self.inner.enter().await;
            self.inner.exit();
            self.inner.record(Event::Rename(self.path.clone()));
            Ok(())
        })
    }

    fn dispose(&mut self) {
        self.inner.record(Event::Dispose(self.path.clone()));
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn uploaded_bytes(&self) -> u64 {
        self.uploaded
    }
}

impl StagingBackend for RecordingBackend {
    type Upload = RecordingUpload;

    fn begin(&self, path: PathBuf, size: u64) -> RecordingUpload {
        RecordingUpload {
            path,
            size,
            uploaded: 0,
            inner: Arc::clone(&self.inner),
        }
    }
}
