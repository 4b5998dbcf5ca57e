//! Transport over one streaming HTTP exchange
//!
//! The request body has already been split into messages; responses are pushed into the
//! response body as NDJSON lines while the client keeps the connection open.

use std::{collections::VecDeque, io};

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::sync::mpsc;

use crate::transport::{Inbound, ResponseOrder, Transport, TransportError};

pub type BodyChunk = Result<Bytes, io::Error>;

pub struct ChannelTransport {
    incoming: VecDeque<String>,
    outgoing: mpsc::Sender<BodyChunk>,
}

impl ChannelTransport {
    pub fn new(messages: impl IntoIterator<Item = String>, outgoing: mpsc::Sender<BodyChunk>) -> Self {
        Self {
            incoming: messages.into_iter().collect(),
            outgoing,
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn receive(&mut self) -> Result<Inbound, TransportError> {
        Ok(self
            .incoming
            .pop_front()
            .map_or(Inbound::Finished, Inbound::Message))
    }

    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        let mut line = message.into_bytes();
        line.push(b'\n');
        self.outgoing
            .send(Ok(Bytes::from(line)))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn closed(&mut self) {
        self.outgoing.closed().await;
    }

    fn response_order(&self) -> ResponseOrder {
        ResponseOrder::Completion
    }
}
