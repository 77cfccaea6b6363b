use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::error::{OpsError, Result};
use crate::mcp::McpServer;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer>,
    /// 与 stdio 一致：同一时刻只处理一个调用。
    pub lock: Arc<Mutex<()>>,
}

async fn mcp_handler(State(state): State<AppState>, body: String) -> Response {
    let _guard = state.lock.lock().await;
    match state.server.handle_line(&body).await {
        Some(resp) => (StatusCode::OK, Json(resp)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

pub fn build_router(server: Arc<McpServer>) -> Router {
    let state = AppState {
        server,
        lock: Arc::new(Mutex::new(())),
    };
    Router::new()
        .route("/mcp", post(mcp_handler))
        .with_state(state)
}

pub async fn serve_http(
    server: Arc<McpServer>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let router = build_router(server);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| OpsError::ConfigError(format!("bind {addr} failed: {e}")))?;
    info!(%addr, "HTTP server listening on http://{addr}/mcp");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::util::ServiceExt;

    use crate::config::Config;
    use crate::guardrail::Guardrail;
    use crate::source::MemorySource;
    use crate::tools::build_registry;

    fn app() -> Router {
        let src = Arc::new(MemorySource::new());
        let registry = build_registry(Arc::new(Guardrail::new(&Config::default())), src.clone(), src);
        build_router(Arc::new(McpServer::new("gcp-ops-mcp", "test", registry)))
    }

    fn post_mcp(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn tools_list_over_http() {
        let resp = app()
            .oneshot(post_mcp(r#"{"id":1,"method":"tools/list"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["result"]["tools"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn notification_returns_accepted() {
        let resp = app()
            .oneshot(post_mcp(r#"{"method":"notifications/initialized"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn malformed_body_is_a_parse_error() {
        let resp = app().oneshot(post_mcp("not-json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let v: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["error"]["code"], -32700);
    }
}
