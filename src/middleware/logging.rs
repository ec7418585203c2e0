use axum::{extract::Request, middleware::Next, response::Response};

/// Structured request log for the HTTP surface (`/health`, `/stats`,
/// `/metrics`). The WebSocket upgrade itself is logged from
/// `downstream::websocket` once the session is established.
pub async fn log_requests_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        "handled request"
    );

    response
}
