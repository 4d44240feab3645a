// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC 2.0 message shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::error::ProtocolError;

/// The only protocol version spoken.
pub const JSONRPC_VERSION: &str = "2.0";

fn non_null(params: Value) -> Option<Value> {
    if params.is_null() { None } else { Some(params) }
}

/// Outgoing request: method + id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestMessage {
    /// Builds a request; a `null` params value is left off the wire.
    pub fn new(id: RequestId, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params: non_null(params),
        }
    }
}

/// Reply to a request. Exactly one of `result` and `error` is meaningful.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl ResponseMessage {
    /// Builds an error reply.
    pub fn error(id: RequestId, error: ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(error),
        }
    }
}

/// One-way message with no id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl NotificationMessage {
    /// Builds a notification; a `null` params value is left off the wire.
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: non_null(params),
        }
    }
}

/// Correlation id. We only ever send numbers, but servers may use strings
/// for their own requests.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// An incoming frame, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Server-to-client request.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// Reply to one of our requests.
    Response {
        id: RequestId,
        outcome: Result<Value, ProtocolError>,
    },
    /// Server-to-client notification.
    Notification { method: String, params: Value },
}

impl Message {
    /// Parses and classifies a frame body.
    ///
    /// Returns `Ok(None)` for well-formed JSON that is not a recognizable
    /// message (no method and no id). A response always resolves its caller:
    /// an error object wins over `result`, an unreadable error object becomes
    /// an internal error carrying the raw value as `data`, and a response with
    /// neither field becomes an internal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn parse(body: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        let Value::Object(mut obj) = value else {
            return Ok(None);
        };

        let id = obj
            .remove("id")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<RequestId>(v).ok());
        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);
        let params = obj.remove("params").unwrap_or(Value::Null);

        let message = match (id, method) {
            (Some(id), Some(method)) => Some(Self::Request { id, method, params }),
            (None, Some(method)) => Some(Self::Notification { method, params }),
            (Some(id), None) => {
                let error = obj.remove("error").filter(|v| !v.is_null());
                let outcome = match (error, obj.remove("result")) {
                    (Some(error), _) => Err(protocol_error(error)),
                    (None, Some(result)) => Ok(result),
                    (None, None) => Err(ProtocolError::new(
                        ProtocolError::INTERNAL_ERROR,
                        "response has neither result nor error",
                    )),
                };
                Some(Self::Response { id, outcome })
            }
            (None, None) => None,
        };
        Ok(message)
    }
}

/// Reads a response's error member, keeping unusable shapes as `data`.
fn protocol_error(raw: Value) -> ProtocolError {
    match serde_json::from_value::<ProtocolError>(raw.clone()) {
        Ok(error) => error,
        Err(_) => ProtocolError {
            code: ProtocolError::INTERNAL_ERROR,
            message: "malformed error object in response".to_string(),
            data: Some(raw),
        },
    }
}
