//! Process-wide tracing setup and the HTTP access log

use std::{io::IsTerminal, time::Instant};

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "info";

/// Logs go to stderr: in stdio mode stdout carries the protocol.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .init();
}

/// One access-log line per HTTP request, at a level that follows the status class.
///
/// `/mcp` responses are still streaming when this runs, so `first_byte_ms` does not cover the
/// whole exchange.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_bytes = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    let started_at = Instant::now();

    let response = next.run(request).await;
    let status = response.status();
    let first_byte_ms = started_at.elapsed().as_millis() as u64;

    if status.is_server_error() {
        error!(method = %method, path = %path, status = status.as_u16(), request_bytes, first_byte_ms, "request failed");
    } else if status.is_client_error() {
        warn!(method = %method, path = %path, status = status.as_u16(), request_bytes, first_byte_ms, "request rejected");
    } else {
        info!(method = %method, path = %path, status = status.as_u16(), request_bytes, first_byte_ms, "request served");
    }

    response
}
