//! Error taxonomy shared by the transport adapter, the decoder and the queue.

use thiserror::Error;

/// A response body that could not be turned into the expected domain value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to decode {what} at `{path}`: {message}")]
pub struct ParseError {
    /// Human readable name of the payload being decoded.
    pub what: &'static str,
    /// JSON path of the offending element (`.` for the document root).
    pub path: String,
    pub message: String,
}

/// Failure of one outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No usable bearer token.
    #[error("auth error: {0}")]
    Auth(String),
    /// The request itself was rejected (4xx, including 429). Never retried.
    #[error("client error: http {status}: {body}")]
    Client { status: u16, body: String },
    /// The remote service is failing (5xx). Triggers outage handling.
    #[error("server error: http {status}")]
    Server { status: u16 },
    /// Network failure or timeout.
    #[error("transport error: {0}")]
    Transport(String),
    /// A status the adapter does not know how to classify.
    #[error("unexpected http status {status}")]
    Protocol { status: u16 },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
    /// The queued request was discarded before it was executed.
    #[error("request discarded before execution")]
    Cancelled,
}

impl RequestError {
    pub fn is_server_error(&self) -> bool {
        matches!(self, RequestError::Server { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RequestError::Client { status: 429, .. })
    }
}

/// The request queue is at capacity; the request was shed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("request queue is full ({capacity} entries)")]
pub struct QueueFull {
    pub capacity: usize,
}
