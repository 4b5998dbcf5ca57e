//! Message channels and the serve loop that drives them
//!
//! A transport only moves strings. `serve` reads messages, dispatches each one as an independent
//! task and writes responses back in the order the transport asks for.

pub mod stdio;

use std::collections::VecDeque;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::{
    dispatch::Dispatcher,
    errors::ErrorCode,
    protocol::{encode_response, invalid_request_response, Response},
    task::ScopedTask,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(String),
    /// No more input, but the peer still waits for responses.
    Finished,
    /// The peer is gone. Nothing more can be delivered.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrder {
    /// Responses leave in the order their requests arrived.
    Arrival,
    /// Responses leave as soon as they are ready; callers correlate by id.
    Completion,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// A single message could not be framed. The channel itself is still usable.
    #[error("{0}")]
    Framing(String),
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("peer closed the channel")]
    Closed,
}

#[async_trait]
pub trait Transport: Send {
    /// Next inbound message. Must be cancel safe: dropping the future loses no input.
    async fn receive(&mut self) -> Result<Inbound, TransportError>;

    async fn send(&mut self, message: String) -> Result<(), TransportError>;

    /// Resolves once the peer stops listening.
    async fn closed(&mut self) {
        std::future::pending::<()>().await
    }

    fn response_order(&self) -> ResponseOrder;
}

enum InFlight {
    Ordered(VecDeque<ScopedTask<Response>>),
    Unordered(JoinSet<Response>),
}

impl InFlight {
    fn new(order: ResponseOrder) -> Self {
        match order {
            ResponseOrder::Arrival => Self::Ordered(VecDeque::new()),
            ResponseOrder::Completion => Self::Unordered(JoinSet::new()),
        }
    }

    fn push<F>(&mut self, work: F)
    where
        F: std::future::Future<Output = Response> + Send + 'static,
    {
        match self {
            Self::Ordered(queue) => queue.push_back(ScopedTask::spawn(work)),
            Self::Unordered(set) => {
                set.spawn(work);
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Ordered(queue) => queue.len(),
            Self::Unordered(set) => set.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel safe: an interrupted wait leaves the pending work in place.
    async fn next(&mut self) -> Option<Response> {
        match self {
            Self::Ordered(queue) => {
                let result = queue.front_mut()?.await;
                queue.pop_front();
                Some(settle(result))
            }
            Self::Unordered(set) => set.join_next().await.map(settle),
        }
    }
}

fn settle(result: Result<Response, JoinError>) -> Response {
    result.unwrap_or_else(|join_error| {
        error!(panicked = join_error.is_panic(), "dispatch task did not complete");
        Response::error(None, ErrorCode::InternalError, "internal server error")
    })
}

/// Runs one connection until its input ends and every response is written, or until the peer
/// disconnects. Work still in flight at disconnect is aborted and its responses discarded.
pub async fn serve<T: Transport + ?Sized>(
    transport: &mut T,
    dispatcher: &Dispatcher,
) -> Result<(), TransportError> {
    let mut in_flight = InFlight::new(transport.response_order());

    loop {
        tokio::select! {
            biased;
            Some(response) = in_flight.next(), if !in_flight.is_empty() => {
                deliver(transport, &response).await?;
            }
            inbound = transport.receive() => match inbound {
                Ok(Inbound::Message(raw)) => {
                    let dispatcher = dispatcher.clone();
                    in_flight.push(async move { dispatcher.dispatch_raw(&raw).await });
                }
                Ok(Inbound::Finished) => break,
                Ok(Inbound::Disconnected) => {
                    debug!(in_flight = in_flight.len(), "peer disconnected, aborting in-flight requests");
                    return Ok(());
                }
                Err(TransportError::Framing(reason)) => {
                    warn!(reason = %reason, "dropping unframeable message");
                    in_flight.push(async move { invalid_request_response(reason) });
                }
                Err(err) => return Err(err),
            }
        }
    }

    while !in_flight.is_empty() {
        tokio::select! {
            biased;
            Some(response) = in_flight.next() => {
                deliver(transport, &response).await?;
            }
            _ = transport.closed() => {
                debug!(in_flight = in_flight.len(), "peer stopped listening, aborting in-flight requests");
                return Ok(());
            }
        }
    }

    Ok(())
}

async fn deliver<T: Transport + ?Sized>(
    transport: &mut T,
    response: &Response,
) -> Result<(), TransportError> {
    let encoded = encode_response(response)?;
    transport.send(encoded).await.inspect_err(|err| {
        debug!(error = %err, "failed to deliver response");
    })
}
