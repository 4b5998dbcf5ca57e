//! Ordered request interceptors
//!
//! Each layer sees the request after the previous one has forwarded it and may annotate it,
//! pass it on or reject it. The first rejection ends the chain.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};

use crate::{errors::ErrorCode, protocol::Request, task::ScopedTask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: ErrorCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }
}

#[derive(Debug)]
pub enum MiddlewareOutcome {
    Proceed(Request),
    Reject(Rejection),
}

/// A middleware that could not decide. Never shown to the caller.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MiddlewareError(pub String);

impl MiddlewareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, request: Request) -> Result<MiddlewareOutcome, MiddlewareError>;
}

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, middleware: impl Middleware + 'static) {
        self.layers.push(Arc::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Runs every layer in registration order.
    ///
    /// Layers execute in their own task so a panicking layer turns into an
    /// `INTERNAL_ERROR` rejection instead of taking the connection down.
    pub async fn run(&self, mut request: Request) -> MiddlewareOutcome {
        for layer in &self.layers {
            let name = layer.name();
            let request_id = request.id.clone();
            let task = {
                let layer = Arc::clone(layer);
                ScopedTask::spawn(async move { layer.apply(request).await })
            };

            request = match task.await {
                Ok(Ok(MiddlewareOutcome::Proceed(next))) => next,
                Ok(Ok(MiddlewareOutcome::Reject(rejection))) => {
                    warn!(
                        request_id = %request_id,
                        middleware = name,
                        code = %rejection.code,
                        "request rejected by middleware"
                    );
                    return MiddlewareOutcome::Reject(rejection);
                }
                Ok(Err(err)) => {
                    error!(request_id = %request_id, middleware = name, error = %err, "middleware failed");
                    return MiddlewareOutcome::Reject(internal_rejection());
                }
                Err(join_error) => {
                    error!(
                        request_id = %request_id,
                        middleware = name,
                        panicked = join_error.is_panic(),
                        "middleware task did not complete"
                    );
                    return MiddlewareOutcome::Reject(internal_rejection());
                }
            };
        }

        MiddlewareOutcome::Proceed(request)
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|layer| layer.name()))
            .finish()
    }
}

fn internal_rejection() -> Rejection {
    Rejection::new(ErrorCode::InternalError, "internal server error")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Record {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn apply(&self, request: Request) -> Result<MiddlewareOutcome, MiddlewareError> {
            self.log.lock().expect("log lock").push(self.label);
            Ok(MiddlewareOutcome::Proceed(request))
        }
    }

    struct Deny;

    #[async_trait]
    impl Middleware for Deny {
        fn name(&self) -> &'static str {
            "deny"
        }

        async fn apply(&self, _request: Request) -> Result<MiddlewareOutcome, MiddlewareError> {
            Ok(MiddlewareOutcome::Reject(Rejection::unauthorized("no")))
        }
    }

    struct Broken;

    #[async_trait]
    impl Middleware for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn apply(&self, _request: Request) -> Result<MiddlewareOutcome, MiddlewareError> {
            Err(MiddlewareError::new("key store offline"))
        }
    }

    struct Panics;

    #[async_trait]
    impl Middleware for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        async fn apply(&self, _request: Request) -> Result<MiddlewareOutcome, MiddlewareError> {
            panic!("middleware bug");
        }
    }

    fn request() -> Request {
        Request::tool_call(1, "add", json!({"a": 1, "b": 2}))
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Record {
        Record {
            label,
            log: Arc::clone(log),
        }
    }

    #[tokio::test]
    async fn layers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.push(recorder("first", &log));
        chain.push(recorder("second", &log));
        chain.push(recorder("third", &log));

        let outcome = chain.run(request()).await;

        assert!(matches!(outcome, MiddlewareOutcome::Proceed(_)));
        assert_eq!(*log.lock().expect("log lock"), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn rejection_short_circuits_later_layers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.push(recorder("before", &log));
        chain.push(Deny);
        chain.push(recorder("after", &log));

        let outcome = chain.run(request()).await;

        match outcome {
            MiddlewareOutcome::Reject(rejection) => {
                assert_eq!(rejection, Rejection::unauthorized("no"));
            }
            MiddlewareOutcome::Proceed(_) => panic!("request must be rejected"),
        }
        assert_eq!(*log.lock().expect("log lock"), vec!["before"]);
    }

    #[tokio::test]
    async fn failing_or_panicking_layers_become_internal_errors() {
        let layers: [Arc<dyn Middleware>; 2] = [Arc::new(Broken), Arc::new(Panics)];
        for layer in layers {
            let chain = MiddlewareChain {
                layers: vec![layer],
            };

            match chain.run(request()).await {
                MiddlewareOutcome::Reject(rejection) => {
                    assert_eq!(rejection.code, ErrorCode::InternalError);
                }
                MiddlewareOutcome::Proceed(_) => panic!("request must be rejected"),
            }
        }
    }

    #[tokio::test]
    async fn empty_chain_forwards_the_request_unchanged() {
        let chain = MiddlewareChain::new();
        assert!(chain.is_empty());

        match chain.run(request()).await {
            MiddlewareOutcome::Proceed(forwarded) => {
                assert_eq!(forwarded.arguments, json!({"a": 1, "b": 2}));
            }
            MiddlewareOutcome::Reject(_) => panic!("nothing to reject"),
        }
    }
}
