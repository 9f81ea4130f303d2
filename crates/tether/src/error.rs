// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Code used when a failure carries no HTTP status.
pub const UNKNOWN_STATUS_CODE: &str = "HTTP_UNKNOWN";

/// Uniform error shape handed to callers of the request pipeline.
///
/// No transport-layer error type escapes the pipeline; everything is
/// reshaped into `{message, code, details}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
    pub code: String,
    #[serde(default)]
    pub details: Value,
    /// HTTP status of the failed response, when there was one.
    #[serde(skip)]
    status: Option<u16>,
}

/// Optional error fields a server may send in a non-2xx body.
#[derive(Debug, Default, Deserialize)]
struct ServerErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { message: message.into(), code: code.into(), details: Value::Null, status: None }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Build from a non-2xx response. Server-supplied fields win; otherwise
    /// the code is `HTTP_<status>` and details describe the request.
    pub fn from_response(status: u16, body: &[u8], method: &str, url: &str) -> Self {
        let server: ServerErrorBody = serde_json::from_slice(body).unwrap_or_default();
        let message = server
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_status_message(status));
        let code =
            server.code.filter(|c| !c.is_empty()).unwrap_or_else(|| format!("HTTP_{status}"));
        let details = server
            .details
            .unwrap_or_else(|| json!({ "status": status, "url": url, "method": method }));
        Self { message, code, details, status: Some(status) }
    }

    /// Build from a transport failure (connect, timeout, body read).
    pub fn from_transport(err: &reqwest::Error, method: &str, url: &str) -> Self {
        let message = if err.is_timeout() {
            "Request timed out. Please try again.".to_owned()
        } else if err.is_connect() {
            format!("Unable to reach the server: {err}")
        } else {
            format!("Request failed: {err}")
        };
        Self {
            message,
            code: UNKNOWN_STATUS_CODE.to_owned(),
            details: json!({ "status": Value::Null, "url": url, "method": method }),
            status: None,
        }
    }

    /// Build from a 2xx response whose body did not decode.
    pub fn decode(err: &serde_json::Error, url: &str) -> Self {
        Self {
            message: format!("Failed to decode response: {err}"),
            code: "DECODE_ERROR".to_owned(),
            details: json!({ "url": url }),
            status: None,
        }
    }

    /// HTTP status of the failed response, if the failure had one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// The session cannot be recovered locally; the user must log in again.
    pub fn is_session_terminal(&self) -> bool {
        self.code.starts_with("REFRESH_") || self.status() == Some(401)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    pub fn is_server_fault(&self) -> bool {
        self.status().is_some_and(|s| s >= 500)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

fn default_status_message(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_owned)
        .unwrap_or_else(|| "An error occurred while calling the API".to_owned())
}

/// Why a token refresh did not produce a new access token.
///
/// `Clone` because one outcome is fanned out to every queued caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh token stored, or it has expired. No request was sent.
    NotPossible,
    /// The refresh endpoint answered with a non-2xx status.
    Rejected { status: u16, message: String },
    /// The refresh request never completed (connect error, timeout).
    Transport(String),
    /// The refresh endpoint answered 2xx with an unusable body.
    Decode(String),
    /// The new tokens could not be written to storage.
    Storage(String),
    /// The refresh owner went away before the refresh settled.
    Abandoned,
}

impl RefreshError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotPossible => "REFRESH_NOT_POSSIBLE",
            Self::Rejected { .. } => "REFRESH_REJECTED",
            Self::Transport(_) => "REFRESH_FAILED",
            Self::Decode(_) => "REFRESH_INVALID_RESPONSE",
            Self::Storage(_) => "REFRESH_STORAGE_FAILED",
            Self::Abandoned => "REFRESH_ABANDONED",
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPossible => f.write_str("refresh token expired or not available"),
            Self::Rejected { status, message } => {
                write!(f, "refresh rejected ({status}): {message}")
            }
            Self::Transport(message) => write!(f, "refresh request failed: {message}"),
            Self::Decode(message) => write!(f, "refresh response invalid: {message}"),
            Self::Storage(message) => write!(f, "refreshed tokens not stored: {message}"),
            Self::Abandoned => f.write_str("refresh abandoned before completion"),
        }
    }
}

impl std::error::Error for RefreshError {}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        let details = match &err {
            RefreshError::Rejected { status, .. } => json!({ "refreshStatus": status }),
            _ => Value::Null,
        };
        Self { message: err.to_string(), code: err.as_str().to_owned(), details, status: None }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
