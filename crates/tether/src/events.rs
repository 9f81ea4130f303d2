// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed session events and the publish/subscribe bus that carries them.
//!
//! Subscribers get their own `broadcast::Receiver`; a slow subscriber that
//! lags skips the events it missed rather than blocking publishers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 64;

/// Events emitted when the session changes in ways the UI must react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// Tokens were cleared.
    #[serde(rename = "session:logout")]
    Logout { reason: LogoutReason, message: String },
    /// A request was refused with 403.
    #[serde(rename = "session:forbidden")]
    Forbidden { message: String },
    /// A request failed with a 5xx.
    #[serde(rename = "session:server-error")]
    ServerError { status: u16, message: String },
}

/// Why a logout happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// The refresh token is missing, expired, or was refused.
    TokenExpired,
    /// The caller asked to log out.
    UserRequested,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenExpired => "token_expired",
            Self::UserRequested => "user_requested",
        }
    }
}

/// Process-wide session event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        tracing::debug!(?event, "session event");
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
