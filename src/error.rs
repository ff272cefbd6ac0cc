//! Error types for the session protocol.

use crate::model::Status;
use std::net::SocketAddr;
use thiserror::Error;

/// Failure to turn a wire line into an envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Required fields are missing or have the wrong shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The envelope is well formed but names a request type we do not serve.
    #[error("invalid request type {0}")]
    UnknownRequestType(String),

    /// A command envelope with a verb we do not serve.
    #[error("invalid verb {0}")]
    UnknownVerb(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::MalformedPayload(e.to_string())
    }
}

/// Failure to render an envelope.
#[derive(Debug, Error)]
#[error("could not encode envelope: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

/// Client-side interpretation errors. These never reach the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid request type")]
    UnknownRequestType,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("invalid array format")]
    InvalidArrayFormat,

    #[error("invalid command verb {0}")]
    InvalidVerb(String),
}

/// Errors raised by the client session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {address} after {attempts} attempt(s): {source}")]
    ConnectionUnavailable {
        address: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("registration rejected ({status}): {reason}")]
    RegistrationRejected { status: Status, reason: String },

    #[error("connection closed by server")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("receive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors reported by connection handlers to the server's error sink.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("connection {peer}: I/O error: {source}")]
    Io {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection {peer}: {source}")]
    Decode {
        peer: SocketAddr,
        #[source]
        source: DecodeError,
    },

    #[error("connection {peer}: could not send response: {source}")]
    Encode {
        peer: SocketAddr,
        #[source]
        source: EncodeError,
    },

    #[error("connection {peer}: closed without bye")]
    ConnectionClosed { peer: SocketAddr },
}
