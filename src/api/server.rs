//! HTTP server lifecycle: bind, serve in a background task, shut down on
//! signal and flush the audit buffer on the way out.
//!
//! Pattern: bind → spawn background task → return handle with shutdown
//! channel. `serve` wires that handle to Ctrl-C for the CLI.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::api_router;
use crate::core_state::CoreState;
use crate::integrations::llm::LlmClient;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Metadata for a running server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSession {
    pub addr: SocketAddr,
    pub started_at: String,
}

/// Handle to a running API server.
pub struct ApiServer {
    pub session: ServerSession,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Send the shutdown signal. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }

    /// Signal shutdown and wait for in-flight requests to finish.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        self.shutdown();
        self.task.await?;
        Ok(())
    }
}

/// Bind `addr` (port 0 picks an ephemeral port) and serve the API router
/// in a background task.
pub async fn start_server_on(
    core: Arc<CoreState>,
    llm: Option<Arc<dyn LlmClient>>,
    addr: SocketAddr,
) -> Result<ApiServer, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let addr = listener.local_addr()?;

    let app = api_router(core, llm);
    let session = ServerSession {
        addr,
        started_at: chrono::Utc::now().to_rfc3339(),
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(%addr, "API server started");
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("API server error: {e}");
        }
        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        session,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}

/// Serve on the configured address until Ctrl-C.
pub async fn serve(core: Arc<CoreState>, llm: Option<Arc<dyn LlmClient>>) -> Result<(), ServerError> {
    let addr = core.config().bind_addr;
    let server = start_server_on(core.clone(), llm, addr).await?;
    tracing::info!(addr = %server.session.addr, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
    }
    server.stop().await?;

    match core.flush_audit() {
        Ok(n) => tracing::info!(flushed = n, "Audit buffer flushed"),
        Err(e) => tracing::warn!("Final audit flush failed: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use crate::config::AppConfig;
    use crate::crypto::FieldKey;

    fn test_core(tmp: &tempfile::TempDir) -> Arc<CoreState> {
        let config = AppConfig::for_database(tmp.path().join("server.db"));
        Arc::new(CoreState::new(config, FieldKey::from_bytes([1u8; 32])))
    }

    fn localhost() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    #[tokio::test]
    async fn start_and_stop_server() {
        let tmp = tempfile::tempdir().unwrap();
        let server = start_server_on(test_core(&tmp), None, localhost())
            .await
            .expect("server should start");
        let port = server.session.addr.port();
        assert!(port > 0);

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        // Protected route without a token
        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/patients"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let server = start_server_on(test_core(&tmp), None, localhost()).await.unwrap();
        let port = server.session.addr.port();

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/nonexistent"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rotating_tokens_share_the_address_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let server = start_server_on(test_core(&tmp), None, localhost()).await.unwrap();
        let url = format!("http://127.0.0.1:{}/api/health", server.session.addr.port());
        let client = reqwest::Client::new();

        for i in 0..100 {
            let resp = client
                .get(&url)
                .bearer_auth(format!("forged-{i:016}"))
                .header("X-Forwarded-For", format!("10.0.0.{}", i % 250))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::OK);
        }
        let resp = client
            .get(&url)
            .bearer_auth("forged-one-more")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = start_server_on(test_core(&tmp), None, localhost()).await.unwrap();
        server.shutdown();
        server.shutdown();
        server.stop().await.unwrap();
    }
}
