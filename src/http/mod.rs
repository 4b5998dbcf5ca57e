//! Streaming HTTP transport
//!
//! `POST /mcp` takes one request object or an array of them and streams back one NDJSON line
//! per response. `/health` and `/.well-known/mcp` are public metadata endpoints.

pub mod handlers;
pub mod stream;
