//! Wire representations of requests and responses
//!
//! Requests arrive as `{id, tool?, uri?, arguments?, metadata?}` objects; responses leave as
//! `{id, status, content?, code?, message?, details?}`. Exactly one of `tool` and `uri` selects
//! the request kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::errors::ErrorCode;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl RequestId {
    /// Assigned to requests that arrive without a correlation id.
    pub fn generate() -> Self {
        Self::String(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for RequestId {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
}

/// Caller identity established by authentication middleware.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub subject: Option<String>,
    pub claims: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ToolCall,
    ResourceRead,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::ResourceRead => "resource_read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Tool(String),
    Resource(String),
}

impl Target {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Tool(_) => RequestKind::ToolCall,
            Self::Resource(_) => RequestKind::ResourceRead,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Tool(name) => name,
            Self::Resource(uri) => uri,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub target: Target,
    pub arguments: Value,
    pub metadata: Metadata,
    pub identity: Option<Identity>,
}

impl Request {
    pub fn tool_call(id: impl Into<RequestId>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            target: Target::Tool(name.into()),
            arguments,
            metadata: Metadata::default(),
            identity: None,
        }
    }

    pub fn resource_read(id: impl Into<RequestId>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: Target::Resource(uri.into()),
            arguments: Value::Null,
            metadata: Metadata::default(),
            identity: None,
        }
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.metadata.authorization = Some(authorization.into());
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.target.kind()
    }
}

#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message is not valid JSON")]
    Parse,
    #[error("{message}")]
    Invalid {
        id: Option<RequestId>,
        message: &'static str,
    },
}

impl DecodeError {
    fn invalid(id: Option<RequestId>, message: &'static str) -> Self {
        Self::Invalid { id, message }
    }

    pub fn into_response(self) -> Response {
        let message = self.to_string();
        let id = match self {
            Self::Parse => None,
            Self::Invalid { id, .. } => id,
        };
        Response::error(id, ErrorCode::InvalidRequest, message)
    }
}

pub fn decode_request(raw: &str) -> Result<Request, DecodeError> {
    let payload: Value = serde_json::from_str(raw).map_err(|_| DecodeError::Parse)?;
    decode_request_value(payload)
}

pub fn decode_request_value(payload: Value) -> Result<Request, DecodeError> {
    if !payload.is_object() {
        return Err(DecodeError::invalid(None, "request must be a JSON object"));
    }

    // keep whatever id is recoverable so even shape errors can be correlated
    let recovered_id = payload
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());

    let envelope: RequestEnvelope = serde_json::from_value(payload)
        .map_err(|_| DecodeError::invalid(recovered_id.clone(), "request has an invalid shape"))?;

    let target = match (envelope.tool, envelope.uri) {
        (Some(tool), None) if !tool.trim().is_empty() => Target::Tool(tool),
        (None, Some(uri)) if !uri.trim().is_empty() => Target::Resource(uri),
        (Some(_), Some(_)) => {
            return Err(DecodeError::invalid(
                recovered_id,
                "request must name either a tool or a uri, not both",
            ))
        }
        _ => {
            return Err(DecodeError::invalid(
                recovered_id,
                "request must name a non-empty tool or uri",
            ))
        }
    };

    Ok(Request {
        id: envelope.id.unwrap_or_else(RequestId::generate),
        target,
        arguments: envelope.arguments.unwrap_or(Value::Null),
        metadata: envelope.metadata.unwrap_or_default(),
        identity: None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
    Resource { resource: ResourceContents },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn resource(uri: impl Into<String>, mime_type: Option<String>, text: impl Into<String>) -> Self {
        Self::Resource {
            resource: ResourceContents {
                uri: uri.into(),
                mime_type,
                text: text.into(),
            },
        }
    }

    /// Pretty JSON rendered as a text item.
    pub fn json(value: &Value) -> Self {
        Self::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Option<RequestId>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Content>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Response {
    pub fn success(id: Option<RequestId>, content: Vec<Content>) -> Self {
        Self {
            id,
            status: Status::Success,
            content: Some(content),
            code: None,
            message: None,
            details: None,
        }
    }

    pub fn error(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::Error,
            content: None,
            code: Some(code),
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Single-line JSON, safe for newline framing.
pub fn encode_response(response: &Response) -> Result<String, serde_json::Error> {
    serde_json::to_string(response)
}

/// Error response for a message that could not be attributed to any request.
pub fn invalid_request_response(message: impl Into<String>) -> Response {
    Response::error(None, ErrorCode::InvalidRequest, message)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_tool_call_with_metadata() {
        let request = decode_request(
            r#"{"id":7,"tool":"add","arguments":{"a":2,"b":3},"metadata":{"authorization":"Bearer abc"}}"#,
        )
        .expect("valid request");

        assert_eq!(request.id, RequestId::Integer(7));
        assert_eq!(request.target, Target::Tool("add".to_string()));
        assert_eq!(request.kind(), RequestKind::ToolCall);
        assert_eq!(request.arguments, json!({"a": 2, "b": 3}));
        assert_eq!(request.metadata.authorization.as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn decodes_resource_read_and_assigns_missing_id() {
        let request = decode_request(r#"{"uri":"greeting://Ada"}"#).expect("valid request");

        assert_eq!(request.kind(), RequestKind::ResourceRead);
        assert_eq!(request.target.name(), "greeting://Ada");
        assert!(matches!(request.id, RequestId::String(ref id) if !id.is_empty()));
        assert_eq!(request.arguments, Value::Null);
    }

    #[test]
    fn rejects_requests_naming_both_targets() {
        let error = decode_request(r#"{"id":"x","tool":"add","uri":"greeting://Ada"}"#)
            .expect_err("ambiguous target");

        let response = error.into_response();
        assert_eq!(response.id, Some(RequestId::from("x")));
        assert_eq!(response.code, Some(ErrorCode::InvalidRequest));
    }

    #[test]
    fn rejects_invalid_json_without_id() {
        let error = decode_request("{").expect_err("parse error");
        assert_eq!(error, DecodeError::Parse);

        let response = error.into_response();
        assert_eq!(response.id, None);
        assert_eq!(response.status, Status::Error);
    }

    #[test]
    fn rejects_non_object_messages() {
        assert!(matches!(
            decode_request("[1,2,3]"),
            Err(DecodeError::Invalid { id: None, .. })
        ));
        assert!(matches!(
            decode_request(r#"{"id":1,"tool":""}"#),
            Err(DecodeError::Invalid { id: Some(RequestId::Integer(1)), .. })
        ));
    }

    #[test]
    fn success_response_serializes_to_wire_shape() {
        let response = Response::success(Some(RequestId::Integer(1)), vec![Content::text("5")]);

        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({"id": 1, "status": "success", "content": [{"type": "text", "text": "5"}]})
        );
    }

    #[test]
    fn error_and_resource_responses_serialize_to_wire_shape() {
        let response = Response::error(None, ErrorCode::NotFound, "unknown tool");
        assert_eq!(
            encode_response(&response).expect("encode"),
            r#"{"id":null,"status":"error","code":"NOT_FOUND","message":"unknown tool"}"#
        );

        let content = Content::resource("greeting://Ada", Some("text/plain".to_string()), "Hello");
        assert_eq!(
            serde_json::to_value(&content).expect("serialize"),
            json!({"type": "resource", "resource": {"uri": "greeting://Ada", "mimeType": "text/plain", "text": "Hello"}})
        );
    }
}
