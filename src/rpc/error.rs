// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for the JSON-RPC connection.
//!
//! Transport and framing failures are terminal for a connection: the reader
//! task stops and every blocked caller is released with an error. Protocol
//! errors and timeouts stay local to the one call that produced them.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// An explicit `error` object returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("server error {code}: {message}")]
pub struct ProtocolError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human readable message supplied by the server.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProtocolError {
    /// Invalid JSON was received by the server.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The request was cancelled by the client.
    pub const REQUEST_CANCELLED: i64 = -32800;

    /// Creates a protocol error without a data payload.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Every way a call on the connection can fail.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The process exited, a pipe closed, or an I/O operation failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The byte stream no longer follows the header/body framing.
    #[error("framing error: {0}")]
    Framing(String),

    /// A payload could not be serialized or parsed as JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with an error object.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A synchronous call saw no reply within its deadline.
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// Method of the request that timed out.
        method: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The dispatcher has stopped and accepts no further calls.
    #[error("connection closed")]
    ConnectionClosed,

    /// A reply arrived but did not have the expected shape.
    #[error("unexpected result for '{method}': {source}")]
    Decode {
        /// Method whose result failed to decode.
        method: String,
        /// Underlying deserialization failure.
        source: serde_json::Error,
    },
}

impl RpcError {
    /// Returns true if the error ends the connection.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Framing(_) | Self::ConnectionClosed
        )
    }

    /// Returns true if the error is a call timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the server error object, if this is a protocol error.
    #[must_use]
    pub const fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
