//! Request logging.

use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use drover_types::AGENT_HEADER;
use tracing::{Level, debug, error, info, warn};

use crate::state::AppState;

/// Log level for a finished request.
///
/// Empty long polls and health probes are routine for idle agents and
/// load balancers, so they go to debug.
fn level_for(path: &str, status: StatusCode) -> Level {
    if status.is_server_error() {
        Level::ERROR
    } else if status.is_client_error() {
        Level::WARN
    } else if status == StatusCode::NO_CONTENT || path == "/health" {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Logs method, path, status, duration and the calling agent, if any.
pub async fn request_logging_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.request_logging {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let agent = request
        .headers()
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis() as u64;

    let level = level_for(&path, response.status());
    if level == Level::ERROR {
        error!(%method, %path, status, duration_ms, %agent, "Request failed");
    } else if level == Level::WARN {
        warn!(%method, %path, status, duration_ms, %agent, "Request rejected");
    } else if level == Level::DEBUG {
        debug!(%method, %path, status, duration_ms, %agent, "Request completed");
    } else {
        info!(%method, %path, status, duration_ms, %agent, "Request completed");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(level_for("/api/v1/next", StatusCode::NO_CONTENT), Level::DEBUG);
        assert_eq!(level_for("/health", StatusCode::OK), Level::DEBUG);
        assert_eq!(level_for("/api/v1/queue", StatusCode::CREATED), Level::INFO);
        assert_eq!(level_for("/api/v1/queue", StatusCode::BAD_REQUEST), Level::WARN);
        assert_eq!(
            level_for("/api/v1/logs", StatusCode::INTERNAL_SERVER_ERROR),
            Level::ERROR
        );
    }
}
