//! Request and response middleware.
//!
//! The pages run inside the host app's frame, so framing is left open.
//! API responses carry user data and are never cached.

use crate::auth::ClientId;
use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Cookie holding the browser's client id.
pub const CLIENT_COOKIE: &str = "agro_client";

/// The client id from the request cookies, if it is one we could have issued.
pub fn client_cookie(headers: &HeaderMap) -> Option<ClientId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == CLIENT_COOKIE)
        .and_then(|(_, value)| ClientId::parse(value.trim()))
}

/// Attach the caller's [`ClientId`] to the request, issuing a new one in a
/// cookie when it is missing or unrecognized.
pub async fn client_id(mut request: Request, next: Next) -> Response {
    let existing = client_cookie(request.headers());
    let issued = existing.is_none();
    let client = existing.unwrap_or_else(ClientId::generate);

    request.extensions_mut().insert(client.clone());
    let mut response = next.run(request).await;

    if issued {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            CLIENT_COOKIE, client
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Unencodable client cookie"),
        }
    }

    response
}

/// Adds the headers every response gets, plus `no-store` under `/api/`.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let is_api = request.uri().path().starts_with("/api/");
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("microphone=(), geolocation=(), payment=()"),
    );

    if is_api {
        headers.insert("cache-control", HeaderValue::from_static("no-store"));
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        Router,
    };
    use tower::ServiceExt;

    async fn test_handler() -> impl IntoResponse {
        (StatusCode::OK, "test response")
    }

    fn app() -> Router {
        Router::new()
            .route("/", axum::routing::get(test_handler))
            .route("/api/auth/session", axum::routing::get(test_handler))
            .layer(middleware::from_fn(security_headers))
    }

    #[tokio::test]
    async fn test_page_headers() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get("referrer-policy").unwrap(),
            "strict-origin-when-cross-origin"
        );
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert!(headers.get("permissions-policy").is_some());
        // Embeddable by the host app.
        assert!(headers.get("x-frame-options").is_none());
        assert!(headers.get("cache-control").is_none());
    }

    #[tokio::test]
    async fn test_api_responses_not_cached() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/auth/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");
    }

    async fn echo_client(request: axum::extract::Request) -> String {
        request
            .extensions()
            .get::<ClientId>()
            .map(|client| client.to_string())
            .unwrap_or_default()
    }

    fn client_app() -> Router {
        Router::new()
            .route("/", axum::routing::get(echo_client))
            .layer(middleware::from_fn(client_id))
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_new_client_gets_cookie() {
        let response = client_app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.starts_with("agro_client="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));

        let issued = body_text(response).await;
        assert!(cookie.contains(&issued));
        assert!(ClientId::parse(&issued).is_some());
    }

    #[tokio::test]
    async fn test_known_client_keeps_id() {
        let client = ClientId::generate();
        let response = client_app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::COOKIE, format!("theme=dark; agro_client={}", client))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_text(response).await, client.to_string());
    }

    #[tokio::test]
    async fn test_forged_client_id_is_replaced() {
        let response = client_app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::COOKIE, "agro_client=../../etc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().get(header::SET_COOKIE).is_some());
        assert_ne!(body_text(response).await, "../../etc");
    }

    #[tokio::test]
    async fn test_response_body_preserved() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, "test response");
    }
}
