//! Upload connection: read/write pumps, ping/pong, and the session worker.

use std::net::SocketAddr;
use std::sync::Arc;

use fsupload_protocol::Frame;
use fsupload_protocol::constants::{WS_PING_PERIOD, WS_PONG_WAIT};
use fsupload_transfer::{StagingBackend, UriResolver};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::session::{Inbound, UploadSession};
use crate::{INBOUND_QUEUE_SIZE, SEND_BUFFER_SIZE};

/// Handle for sending frames to the connected client.
///
/// Cloneable; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
    cancel: CancellationToken,
}

impl Sender {
    /// Queues a status [`Frame`] as JSON text.
    ///
    /// Waits for buffer space while the client is slow to read. Returns
    /// `Err` once the connection is closed.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), SendError> {
        let json = frame.to_json().map_err(|_| SendError)?;
        tokio::select! {
            biased;
            res = self.tx.send(WsMessage::Text(json.into())) => res.map_err(|_| SendError),
            _ = self.cancel.cancelled() => Err(SendError),
        }
    }

    /// Returns `true` while the connection is open.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: connection closed")]
pub struct SendError;

/// Active upload connection.
///
/// Owns the pump and worker tasks. Closing is driven by the client, by
/// the session reaching a terminal frame, or by server shutdown.
pub struct UploadConnection {
    pub peer_addr: SocketAddr,
    done: CancellationToken,
}

impl UploadConnection {
    /// Waits until the worker has torn the session down.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }
}

/// Runs the pumps and the session worker for a WebSocket connection.
///
/// Returns the [`UploadConnection`] handle. Everything runs as
/// background tokio tasks and stops when the connection is closed or
/// the cancel token is triggered.
pub fn spawn_connection<S, B>(
    ws_stream: S,
    peer_addr: SocketAddr,
    backend: Arc<B>,
    resolver: UriResolver,
    server_cancel: CancellationToken,
) -> UploadConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    B: StagingBackend,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(INBOUND_QUEUE_SIZE);
    let cancel = server_cancel.child_token();
    let done = CancellationToken::new();
    let sender = Sender {
        tx,
        cancel: cancel.clone(),
    };

    let conn = UploadConnection {
        peer_addr,
        done: done.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    // Write pump.
    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    // Read pump.
    let read_cancel = cancel.clone();
    let read_sender = sender.clone();
    tokio::spawn(async move {
        read_pump(ws_stream, read_sender, inbound_tx, read_cancel.clone()).await;
        // When the read pump exits, the connection is gone.
        read_cancel.cancel();
        tracing::info!(%peer_addr, "client disconnected");
    });

    // Session worker.
    let session = UploadSession::new(backend, resolver);
    tokio::spawn(async move {
        run_worker(session, inbound_rx, sender, cancel.clone(), peer_addr).await;
        cancel.cancel();
        done.cancel();
    });

    conn
}

/// Applies inbound messages one at a time, in arrival order.
///
/// The next message is not taken off the queue before the previous one
/// has fully settled, so appends and renames can never overlap.
async fn run_worker<B: StagingBackend>(
    mut session: UploadSession<B>,
    mut inbound: mpsc::Receiver<Inbound>,
    sender: Sender,
    cancel: CancellationToken,
    peer_addr: SocketAddr,
) {
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = inbound.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        let result = session.apply(msg).await;

        if let Err(e) = &result {
            tracing::error!(%peer_addr, "upload failed: {e:?}");
        }
        if !sender.is_connected() {
            tracing::debug!(%peer_addr, "connection closed during processing, result discarded");
            break;
        }

        match result {
            Ok(None) => {}
            Ok(Some(frame)) => {
                let terminal = frame.is_terminal();
                if sender.send_frame(&frame).await.is_err() {
                    tracing::debug!(%peer_addr, "connection closed before frame was sent");
                    break;
                }
                if terminal {
                    tracing::info!(
                        %peer_addr,
                        bytes = session.completed_bytes(),
                        "upload session complete"
                    );
                    break;
                }
            }
            Err(e) => {
                if sender.send_frame(&Frame::error(&e)).await.is_err() {
                    tracing::debug!(%peer_addr, "connection closed before error frame was sent");
                }
                break;
            }
        }
    }

    if session.teardown() {
        tracing::info!(%peer_addr, "unfinished upload disposed");
    }
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + WS_PING_PERIOD, WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Final ok/error frames are queued right before the close.
                while let Ok(ws_msg) = rx.try_recv() {
                    if sink.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                break;
            }

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and queues them for the worker.
async fn read_pump<S>(
    mut stream: S,
    sender: Sender,
    inbound: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
{
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        // Frames already received are drained before the deadline is checked.
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => Inbound::Text(text.as_str().to_owned()),
                    Some(Ok(WsMessage::Binary(data))) => Inbound::Binary(data.to_vec()),
                    Some(Ok(WsMessage::Pong(_))) => {
                        pong_deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + WS_PONG_WAIT);
                        continue;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                        continue;
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        tracing::info!("received close frame");
                        break;
                    }
                    Some(Ok(WsMessage::Frame(_))) => continue, // Raw frames ignored.
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }

            _ = &mut pong_deadline => {
                tracing::warn!("no pong within {WS_PONG_WAIT:?}, closing connection");
                break;
            }
        };

        // Waits while the worker is busy; fails once it has stopped.
        if inbound.send(msg).await.is_err() {
            break;
        }
    }
}
