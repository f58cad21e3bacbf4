//! Wires the upload server to the local filesystem.

use std::sync::Arc;
use std::time::Duration;

use fsupload_server::{ServerConfig, UploadServer};
use fsupload_transfer::{FsStaging, UriResolver};

use crate::config::Config;

/// Runs the daemon until Ctrl-C or a fatal server error.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let resolver = match &config.upload_root {
        Some(root) => {
            tracing::info!(root = %root.display(), "uploads restricted to root");
            UriResolver::with_root(root)
        }
        None => UriResolver::new(),
    };

    let server_config = ServerConfig {
        bind: config.bind,
        port: config.port,
        path: config.path.clone(),
        max_message_size: config.max_message_size,
    };

    let server = UploadServer::new(server_config, FsStaging, resolver);
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    // Wait for the server to bind.
    let addr = loop {
        if let Some(addr) = server.local_addr().await {
            break addr;
        }
        if server_task.is_finished() {
            server_task.await??;
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    tracing::info!(%addr, path = %config.path, "upload endpoint listening");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        result = &mut server_task => {
            result??;
            return Ok(());
        }
    }

    server.shutdown();
    if let Err(e) = server_task.await? {
        tracing::warn!("server stopped with error: {e}");
    }
    Ok(())
}
