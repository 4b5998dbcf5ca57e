use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::{
    errors::AppError,
    http::stream::ChannelTransport,
    protocol::{encode_response, invalid_request_response},
    transport::serve,
    AppState,
};

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";
const STREAM_BUFFER: usize = 32;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: "/mcp",
    })
}

pub async fn mcp_endpoint(
    State(state): State<AppState>,
    authorization: Option<TypedHeader<Authorization<Bearer>>>,
    body: Bytes,
) -> Result<Response, AppError> {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            let response = invalid_request_response("message is not valid JSON");
            let mut line = encode_response(&response)
                .map_err(|err| AppError::internal(format!("failed to encode response: {err}")))?;
            line.push('\n');
            return Ok(([(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)], line).into_response());
        }
    };

    let items = match payload {
        Value::Array(items) if items.is_empty() => {
            return Err(AppError::bad_request(
                "empty_batch",
                "request batch must not be empty",
            ))
        }
        Value::Array(items) => items,
        single => vec![single],
    };

    let bearer = authorization.map(|TypedHeader(auth)| format!("Bearer {}", auth.token()));
    let messages: Vec<String> = items
        .into_iter()
        .map(|mut item| {
            if let Some(bearer) = bearer.as_deref() {
                attach_authorization(&mut item, bearer);
            }
            item.to_string()
        })
        .collect();

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let dispatcher = state.dispatcher.clone();
    let batch_size = messages.len();
    tokio::spawn(async move {
        let mut transport = ChannelTransport::new(messages, tx);
        if let Err(err) = serve(&mut transport, &dispatcher).await {
            debug!(error = %err, batch_size, "response stream ended early");
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .map_err(|err| AppError::internal(format!("failed to build streaming response: {err}")))
}

/// Copies the HTTP credential into the message unless it carries its own.
fn attach_authorization(item: &mut Value, bearer: &str) {
    let Value::Object(message) = item else {
        return;
    };

    let metadata = message
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if metadata.is_null() {
        *metadata = Value::Object(Map::new());
    }
    if let Value::Object(metadata) = metadata {
        metadata
            .entry("authorization")
            .or_insert_with(|| Value::String(bearer.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn header_credential_fills_missing_metadata_only() {
        let mut bare = json!({"id": 1, "tool": "add"});
        attach_authorization(&mut bare, "Bearer header");
        assert_eq!(bare["metadata"]["authorization"], json!("Bearer header"));

        let mut null_metadata = json!({"id": 2, "tool": "add", "metadata": null});
        attach_authorization(&mut null_metadata, "Bearer header");
        assert_eq!(null_metadata["metadata"]["authorization"], json!("Bearer header"));

        let mut explicit = json!({"id": 3, "tool": "add", "metadata": {"authorization": "Bearer own"}});
        attach_authorization(&mut explicit, "Bearer header");
        assert_eq!(explicit["metadata"]["authorization"], json!("Bearer own"));

        let mut not_an_object = json!(42);
        attach_authorization(&mut not_an_object, "Bearer header");
        assert_eq!(not_an_object, json!(42));
    }
}
