// CORS configuration for the gateway's HTTP surface.
//
// Browsers open the WebSocket from the chat frontend's origin; the operational
// routes are read with plain GETs.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Origins allowed when no override is configured.
const DEFAULT_DEV_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

/// Build a [`CorsLayer`] from the configured origin list.
///
/// - `Some("*")` allows any origin, without credentials.
/// - `Some(list)` allows exactly the comma-separated origins.
/// - `None` allows the default development origins.
pub fn cors_layer(configured_origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600));

    match configured_origins.map(str::trim) {
        Some("*") => base.allow_origin(AllowOrigin::any()).allow_credentials(false),
        Some(origins) => base.allow_origin(parse_origins(origins)),
        None => base.allow_origin(parse_origins(&DEFAULT_DEV_ORIGINS.join(","))),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn test_app(origins: Option<&str>) -> Router {
        Router::new().route("/test", get(|| async { "ok" })).layer(cors_layer(origins))
    }

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/test")
            .header("origin", origin)
            .header("access-control-request-method", "GET")
            .body(Body::empty())
            .expect("preflight request should build")
    }

    #[tokio::test]
    async fn vite_dev_origin_is_allowed_by_default() {
        let response = test_app(None)
            .oneshot(preflight("http://localhost:5173"))
            .await
            .expect("preflight should return a response");

        assert_eq!(
            response.headers().get("access-control-allow-origin").and_then(|v| v.to_str().ok()),
            Some("http://localhost:5173")
        );
        assert_eq!(
            response.headers().get("access-control-max-age").and_then(|v| v.to_str().ok()),
            Some("3600")
        );
    }

    #[tokio::test]
    async fn unknown_origin_gets_no_cors_headers() {
        let response = test_app(None)
            .oneshot(preflight("https://evil.example.com"))
            .await
            .expect("preflight should return a response");

        assert!(response.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn configured_origins_replace_defaults() {
        let app = test_app(Some("https://chat.parley.dev, https://staging.parley.dev"));

        let allowed = app
            .clone()
            .oneshot(preflight("https://staging.parley.dev"))
            .await
            .expect("preflight should return a response");
        let default_origin = app
            .oneshot(preflight("http://localhost:5173"))
            .await
            .expect("preflight should return a response");

        assert_eq!(
            allowed.headers().get("access-control-allow-origin").and_then(|v| v.to_str().ok()),
            Some("https://staging.parley.dev")
        );
        assert!(default_origin.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn wildcard_origin_disables_credentials() {
        let response = test_app(Some("*"))
            .oneshot(preflight("https://anything.example.com"))
            .await
            .expect("preflight should return a response");

        assert_eq!(
            response.headers().get("access-control-allow-origin").and_then(|v| v.to_str().ok()),
            Some("*")
        );
        assert!(response.headers().get("access-control-allow-credentials").is_none());
    }

    #[test]
    fn parse_origins_handles_whitespace() {
        let origins = parse_origins("  https://a.com , https://b.com  , ");
        assert_eq!(origins, vec!["https://a.com", "https://b.com"]);
    }
}
