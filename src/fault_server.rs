//! Fault-injection sink server
//!
//! Accepts any request on any path and swallows it with `204 No Content`, so
//! agents that push data somewhere have a cheap, always-up endpoint while the
//! run simulates degraded conditions. `GET /stats` reports what was swallowed.

use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::FaultServerConfig;
use crate::error::{BenchError, Result};

/// Counters shared with the request handlers
#[derive(Debug)]
pub struct FaultState {
    pub started_at: DateTime<Utc>,
    pub requests: AtomicU64,
    pub bytes: AtomicU64,
}

impl FaultState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            requests: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> FaultStats {
        FaultStats {
            started_at: self.started_at,
            requests: self.requests.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for FaultState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FaultStats {
    pub started_at: DateTime<Utc>,
    pub requests: u64,
    pub bytes: u64,
}

pub struct FaultServer {
    state: Arc<FaultState>,
    addr: SocketAddr,
}

impl FaultServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            state: Arc::new(FaultState::new()),
            addr,
        }
    }

    pub fn from_config(config: &FaultServerConfig) -> Result<Self> {
        let addr = config.listen_addr.parse().map_err(|e| {
            BenchError::InvalidConfig(format!(
                "fault_server.listen_addr {:?}: {}",
                config.listen_addr, e
            ))
        })?;
        Ok(Self::new(addr))
    }

    pub fn state(&self) -> Arc<FaultState> {
        Arc::clone(&self.state)
    }

    pub fn router(&self) -> Router {
        router(self.state())
    }

    /// Serve until the process exits
    pub async fn run(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Fault-injection server listening on {}", self.addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Start on a background task that is never joined.
    ///
    /// Bind or serve failures are logged; the run carries on without the sink.
    pub fn spawn(self) -> Arc<FaultState> {
        let state = self.state();
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                warn!(addr = %self.addr, error = %e, "Fault-injection server stopped");
            }
        });
        state
    }
}

pub fn router(state: Arc<FaultState>) -> Router {
    Router::new()
        .route("/stats", get(stats_handler))
        .fallback(swallow_handler)
        .with_state(state)
}

async fn swallow_handler(State(state): State<Arc<FaultState>>, body: Bytes) -> StatusCode {
    state.requests.fetch_add(1, Ordering::Relaxed);
    state.bytes.fetch_add(body.len() as u64, Ordering::Relaxed);
    StatusCode::NO_CONTENT
}

async fn stats_handler(State(state): State<Arc<FaultState>>) -> impl IntoResponse {
    Json(state.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_any_request_is_swallowed() {
        let state = Arc::new(FaultState::new());
        let app = router(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/push")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let stats = state.snapshot();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.bytes, 7);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let state = Arc::new(FaultState::new());
        state.requests.store(3, Ordering::Relaxed);
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["requests"], 3);
    }

    #[test]
    fn test_invalid_listen_addr() {
        let config = FaultServerConfig {
            enabled: true,
            listen_addr: "not-an-addr".into(),
        };
        assert!(matches!(
            FaultServer::from_config(&config),
            Err(BenchError::InvalidConfig(_))
        ));
    }
}
