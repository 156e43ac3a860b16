// HTTP surface: router assembly, middleware stack, and the serve loop.

use std::{sync::Arc, time::Instant};

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::GatewayConfig;
use crate::cors::cors_layer;
use crate::error::{
    attach_request_id_header, current_request_id, request_id_from_headers_or_generate,
    with_request_id_scope, ErrorCode, GatewayError,
};
use crate::gateway::Gateway;
use crate::metrics::{self, GatewayMetrics};
use crate::store::MessageStore;
use crate::ws;

pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;
const UNMATCHED_PATH_LABEL: &str = "unmatched";

pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    metrics::set_global_metrics(Arc::new(GatewayMetrics::default()));

    let store = MessageStore::connect(&config).await.context("failed to open message store")?;
    info!(backend = store.backend_name(), "message store ready");

    let gateway = Gateway::new(store);
    let app = build_router(gateway, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting gateway server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited unexpectedly")
}

pub fn build_router(gateway: Gateway, cors_origins: Option<&str>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics_endpoint))
            .route("/v1/presence", get(presence))
            .with_state(gateway.clone())
            .merge(ws::router(gateway))
            .fallback(not_found),
        cors_origins,
    )
}

fn apply_middleware(router: Router, cors_origins: Option<&str>) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(payload_limit_envelope))
        .layer(middleware::from_fn(panic_handler))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(cors_layer(cors_origins))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn metrics_endpoint() -> impl IntoResponse {
    let body = match metrics::global_metrics() {
        Some(metrics) => metrics.render_prometheus(),
        None => GatewayMetrics::default().render_prometheus(),
    };
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    online_users: Vec<String>,
}

async fn presence(State(gateway): State<Gateway>) -> Json<PresenceResponse> {
    Json(PresenceResponse { online_users: gateway.online_users().await })
}

async fn not_found() -> GatewayError {
    GatewayError::new(ErrorCode::NotFound, "no route matches this request")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = %error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(error = %error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    // The handler runs on its own task, which does not inherit task-locals.
    let request_id = current_request_id();
    let handled = async move { next.run(request).await };
    let joined = match request_id {
        Some(request_id) => tokio::spawn(with_request_id_scope(request_id, handled)).await,
        None => tokio::spawn(handled).await,
    };

    match joined {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            GatewayError::from_code(ErrorCode::InternalError).into_response()
        }
    }
}

/// Replaces the extractor's plain-text 413 with the JSON error envelope.
async fn payload_limit_envelope(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return GatewayError::from_code(ErrorCode::PayloadTooLarge).into_response();
    }
    response
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let metric_path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_PATH_LABEL.to_owned());
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics::record_http_request(
        method.as_str(),
        &metric_path,
        response.status().as_u16(),
        latency_ms,
    );
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, MAX_REQUEST_BODY_BYTES};
    use crate::gateway::Gateway;
    use crate::store::MessageStore;

    fn test_router() -> Router {
        build_router(Gateway::new(MessageStore::in_memory()), None)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request should build")
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body =
            to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        serde_json::from_slice(&body).expect("body should be valid json")
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response =
            test_router().oneshot(get_request("/healthz")).await.expect("healthz should respond");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn caller_request_id_is_echoed() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-from-client")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz should respond");

        assert_eq!(
            response.headers().get("x-request-id").and_then(|value| value.to_str().ok()),
            Some("req-from-client")
        );
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_error_envelope() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)), None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .header("x-request-id", "req-panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let parsed = body_json(response).await;
        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(parsed["error"]["request_id"], "req-panic");
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)), None);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().contains_key("x-request-id"));
        let parsed = body_json(response).await;
        assert_eq!(parsed["error"]["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(parsed["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn unknown_route_returns_not_found_envelope() {
        let response =
            test_router().oneshot(get_request("/v1/messages")).await.expect("should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned)
            .expect("not found response should carry a request id");
        let parsed = body_json(response).await;
        assert_eq!(parsed["error"]["code"], "NOT_FOUND");
        assert_eq!(parsed["error"]["retryable"], false);
        assert_eq!(parsed["error"]["request_id"], request_id);
    }

    #[tokio::test]
    async fn presence_route_reports_registered_users() {
        let gateway = Gateway::new(MessageStore::in_memory());
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_anon, _rx_anon) = mpsc::unbounded_channel();
        gateway.connect(Some("bob".into()), tx_b).await;
        gateway.connect(Some("alice".into()), tx_a).await;
        gateway.connect(None, tx_anon).await;

        let response = build_router(gateway, None)
            .oneshot(get_request("/v1/presence"))
            .await
            .expect("presence should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let parsed = body_json(response).await;
        assert_eq!(parsed, serde_json::json!({ "online_users": ["alice", "bob"] }));
    }

    #[tokio::test]
    async fn metrics_route_renders_prometheus_text() {
        let response =
            test_router().oneshot(get_request("/metrics")).await.expect("metrics should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let body =
            to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
        let text = String::from_utf8(body.to_vec()).expect("metrics should be utf-8");
        assert!(text.contains("gateway_seen_events_total{outcome=\"notified\"}"));
        assert!(text.contains("gateway_connections_registered"));
    }
}
