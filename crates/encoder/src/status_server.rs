//! Status HTTP server
//!
//! Exposes the export status snapshot for dashboards and scripts.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;

use crate::status::{ExportStatus, SharedStatus};

/// Default bind address of the status endpoint
pub const DEFAULT_STATUS_ADDR: &str = "127.0.0.1:7879";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid status address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /status
async fn get_status(State(status): State<SharedStatus>) -> Json<ExportStatus> {
    let snapshot = status.read().await.clone();
    Json(snapshot)
}

pub fn create_status_router(status: SharedStatus) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(status)
}

/// Runs the status server on `addr` until the process exits
///
/// # Returns
/// * `Err(ServerError)` if the address is invalid or cannot be bound
pub async fn run_status_server(status: SharedStatus, addr: &str) -> Result<(), ServerError> {
    let addr: SocketAddr = addr.parse().map_err(|source| ServerError::InvalidAddress {
        addr: addr.to_string(),
        source,
    })?;
    let app = create_status_router(status);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "status endpoint listening");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportSummary;
    use crate::status::new_shared_status;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn fetch(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (code, body.to_vec())
    }

    #[tokio::test]
    async fn test_get_status_returns_json() {
        let status = new_shared_status();
        {
            let mut snapshot = status.write().await;
            snapshot.begin(2, 7);
            snapshot.tasks_done = 3;
            snapshot.tasks_failed = 1;
        }

        let response = create_status_router(status.clone())
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .expect("should have content-type header");
        assert!(content_type.to_str().unwrap().contains("application/json"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let snapshot: ExportStatus = serde_json::from_slice(&body).expect("should deserialize to ExportStatus");
        assert!(snapshot.running);
        assert_eq!(snapshot.audiobooks, 2);
        assert_eq!(snapshot.tasks_total, 7);
        assert_eq!(snapshot.tasks_done, 3);
        assert_eq!(snapshot.tasks_failed, 1);
        assert!(snapshot.last_summary.is_none());
    }

    #[tokio::test]
    async fn test_status_includes_last_summary() {
        let status = new_shared_status();
        status.write().await.finish(ExportSummary {
            total: 1,
            succeeded: 1,
            ..ExportSummary::default()
        });

        let (code, body) = fetch(create_status_router(status), "/status").await;
        assert_eq!(code, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["running"], false);
        assert_eq!(json["last_summary"]["total"], 1);
        assert_eq!(json["last_summary"]["succeeded"], 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (code, _) = fetch(create_status_router(new_shared_status()), "/metrics").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        let err = run_status_server(new_shared_status(), "not an address").await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress { .. }));
    }
}
