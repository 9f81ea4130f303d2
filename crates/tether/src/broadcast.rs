// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session broadcaster: side effects for terminal and notable failures.
//!
//! A forced logout clears the token store, tells every subscriber, and sends
//! the user to the login entry point once, after a short delay that lets
//! pending state updates land first. Forbidden and server-error conditions
//! are only announced; they never log out or navigate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::events::{EventBus, LogoutReason, SessionEvent};
use crate::token::TokenStore;

pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";
pub const FORBIDDEN_MESSAGE: &str = "You do not have permission to access this resource.";
pub const SERVER_ERROR_MESSAGE: &str = "The server is having trouble. Please try again later.";

/// Where the user currently is, and how to send them elsewhere.
pub trait Navigator: Send + Sync {
    /// Current location, path plus optional query (e.g. `/settings?tab=2`).
    fn current_path(&self) -> String;
    fn navigate(&self, to: &str);
}

/// Navigator that tracks a location in memory and logs every navigation.
#[derive(Debug)]
pub struct TracingNavigator {
    location: Mutex<String>,
}

impl TracingNavigator {
    pub fn new(initial: impl Into<String>) -> Self {
        Self { location: Mutex::new(initial.into()) }
    }

    pub fn location(&self) -> String {
        self.location.lock().clone()
    }
}

impl Navigator for TracingNavigator {
    fn current_path(&self) -> String {
        self.location()
    }

    fn navigate(&self, to: &str) {
        info!(to, "navigating");
        *self.location.lock() = to.to_owned();
    }
}

/// Publishes session events and performs the forced-logout redirect.
pub struct SessionBroadcaster {
    tokens: Arc<TokenStore>,
    bus: EventBus,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    redirect_delay: Duration,
    redirect_pending: Arc<AtomicBool>,
}

impl SessionBroadcaster {
    pub fn new(
        tokens: Arc<TokenStore>,
        bus: EventBus,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
        redirect_delay: Duration,
    ) -> Self {
        Self {
            tokens,
            bus,
            navigator,
            login_path: login_path.into(),
            redirect_delay,
            redirect_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Clear the session, announce it, and schedule the login redirect.
    pub fn force_logout(&self, reason: LogoutReason) {
        warn!(reason = reason.as_str(), "forcing logout");
        if let Err(e) = self.tokens.clear_tokens() {
            warn!(err = %e, "failed to clear tokens during logout");
        }
        self.bus.publish(SessionEvent::Logout {
            reason,
            message: SESSION_EXPIRED_MESSAGE.to_owned(),
        });
        self.schedule_redirect();
    }

    pub fn forbidden(&self, message: impl Into<String>) {
        self.bus.publish(SessionEvent::Forbidden { message: message.into() });
    }

    pub fn server_error(&self, status: u16, message: impl Into<String>) {
        self.bus.publish(SessionEvent::ServerError { status, message: message.into() });
    }

    fn schedule_redirect(&self) {
        let current = self.navigator.current_path();
        let current_route = current.split(['?', '#']).next().unwrap_or_default();
        if current_route == self.login_path {
            return;
        }
        if self.redirect_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let target = login_redirect_target(&self.login_path, &current);
        let navigator = Arc::clone(&self.navigator);
        let pending = Arc::clone(&self.redirect_pending);
        let delay = self.redirect_delay;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    navigator.navigate(&target);
                    pending.store(false, Ordering::SeqCst);
                });
            }
            Err(_) => {
                navigator.navigate(&target);
                pending.store(false, Ordering::SeqCst);
            }
        }
    }
}

/// `{login_path}?redirect=<current>` with the current location encoded.
pub fn login_redirect_target(login_path: &str, current: &str) -> String {
    format!("{login_path}?redirect={}", encode_component(current))
}

/// Percent-encode everything outside the URI-component unreserved set.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(b as char),
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
