//! Request pipeline
//!
//! Every request walks `Received → Validating → Authorizing → Executing → Responding → Done`.
//! Any stage can fail into `Errored`, and every failure is turned into an error response, so
//! `Dispatcher::dispatch` always produces exactly one [`Response`].

pub mod audit;
pub mod server;

use std::{fmt, time::Duration};

use serde_json::json;
use thiserror::Error;

use crate::{
    errors::{ErrorCode, HandlerError},
    middleware::Rejection,
    protocol::{RequestId, Response},
    schema::ValidationError,
};

pub use server::{Dispatcher, ServerBuilder, ServerContext, DEFAULT_CALL_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validating,
    Authorizing,
    Executing,
    Responding,
    Done,
    Errored,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Authorizing => "authorizing",
            Self::Executing => "executing",
            Self::Responding => "responding",
            Self::Done => "done",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool `{0}`")]
    ToolNotFound(String),
    #[error("no resource matches `{0}`")]
    ResourceNotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("rejected: {}", .0.message)]
    Rejected(Rejection),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("handler panicked")]
    HandlerPanicked,
    #[error("call timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ToolNotFound(_) | Self::ResourceNotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Rejected(rejection) => rejection.code,
            Self::Handler(_) | Self::HandlerPanicked => ErrorCode::HandlerError,
            Self::Timeout(_) => ErrorCode::Timeout,
        }
    }

    /// Converts into the caller-facing response. Handler internals never leak.
    pub fn into_response(self, id: Option<RequestId>) -> Response {
        let code = self.code();
        match self {
            Self::Validation(err) => Response::error(id, code, err.message).with_details(json!({
                "field": err.field,
                "kind": err.kind,
            })),
            Self::Rejected(rejection) => Response::error(id, code, rejection.message),
            Self::Handler(err) => Response::error(id, code, err.public_message()),
            Self::HandlerPanicked => Response::error(id, code, "tool execution failed"),
            other => Response::error(id, code, other.to_string()),
        }
    }
}
