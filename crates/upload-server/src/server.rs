//! Upload WebSocket server.
//!
//! Listens on a TCP port, upgrades HTTP GET on the upload path to
//! WebSocket, and runs an independent upload session per connection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fsupload_protocol::constants::{UPLOAD_WS_PATH, WS_MAX_MESSAGE_SIZE};
use fsupload_transfer::{StagingBackend, UriResolver};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// HTTP path upgraded to the upload WebSocket.
    pub path: String,
    /// Largest accepted message or frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            path: UPLOAD_WS_PATH.to_string(),
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

/// The upload WebSocket server.
///
/// Every accepted connection gets its own session; sessions share
/// nothing but the staging backend and the URI resolver.
pub struct UploadServer<B: StagingBackend> {
    config: ServerConfig,
    backend: Arc<B>,
    resolver: UriResolver,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    active: AtomicUsize,
}

impl<B: StagingBackend> UploadServer<B> {
    /// Creates a new server writing through `backend`.
    pub fn new(config: ServerConfig, backend: B, resolver: UriResolver) -> Arc<Self> {
        Arc::new(Self {
            config,
            backend: Arc::new(backend),
            resolver,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            active: AtomicUsize::new(0),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of connections whose session has not been torn down yet.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Gracefully shuts down the server and every open connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(path = %self.config.path, "upload server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Handles a single TCP connection: upgrades to WS and runs the session.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let upload_path = self.config.path.clone();
        let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let path = req.uri().path();
            if path == upload_path {
                return Ok(resp);
            }
            tracing::warn!(%peer_addr, path, "rejecting upgrade: unknown path");
            let mut err = ErrorResponse::new(Some(format!("no upload endpoint at {path}")));
            *err.status_mut() = StatusCode::NOT_FOUND;
            Err(err)
        };

        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);
        let ws_stream = accept_hdr_async_with_config(stream, check_path, Some(ws_config)).await?;
        tracing::info!(%peer_addr, "upload connection established");

        let conn = connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.backend),
            self.resolver.clone(),
            self.cancel.clone(),
        );

        self.active.fetch_add(1, Ordering::SeqCst);
        conn.finished().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(peer_addr = %conn.peer_addr, "upload session finished");

        Ok(())
    }
}
