// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight access token refresh.
//!
//! The coordinator is either idle or refreshing. The first caller to need a
//! refresh becomes the owner and issues the one `POST /auth/refresh`; every
//! caller that arrives while it is in flight is queued and settled with the
//! owner's outcome, in arrival order. Refresh tokens are often single-use,
//! so a second concurrent refresh would invalidate the session.
//!
//! On success the token store is updated (rotating the refresh token when
//! the server sent one). On any failure the store is cleared; no stale
//! tokens survive a failed refresh.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::RefreshError;
use crate::token::TokenStore;
use crate::types::{RefreshTokenRequest, RefreshTokenResponse};

/// Path of the refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Maximum refresh error body characters kept in [`RefreshError::Rejected`].
const MAX_ERROR_CHARS: usize = 200;

type Outcome = Result<String, RefreshError>;

enum State {
    Idle,
    Refreshing { waiters: VecDeque<oneshot::Sender<Outcome>> },
}

/// How a caller took part in a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Issued the network call and settled the queue.
    Owner,
    /// Waited for someone else's call.
    Waiter,
}

/// Owns the refresh state machine for one session.
pub struct RefreshCoordinator {
    state: Mutex<State>,
    tokens: Arc<TokenStore>,
    http: reqwest::Client,
    refresh_url: String,
}

impl RefreshCoordinator {
    pub fn new(tokens: Arc<TokenStore>, api_url: &str, timeout: Duration) -> Self {
        crate::ensure_crypto_provider();
        let http = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            state: Mutex::new(State::Idle),
            tokens,
            http,
            refresh_url: format!("{}{REFRESH_PATH}", api_url.trim_end_matches('/')),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(*self.state.lock(), State::Idle)
    }

    /// Callers currently queued behind the in-flight refresh.
    pub fn queued(&self) -> usize {
        match &*self.state.lock() {
            State::Idle => 0,
            State::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Refresh the access token, joining the in-flight refresh if there is
    /// one. Returns the access token current once the refresh settled.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        self.refresh_with_role().await.0
    }

    /// Like [`refresh`](Self::refresh), also reporting whether this caller
    /// owned the network call.
    pub async fn refresh_with_role(&self) -> (Result<String, RefreshError>, Role) {
        let queued = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    Some(rx)
                }
                State::Idle => {
                    *state = State::Refreshing { waiters: VecDeque::new() };
                    None
                }
            }
        };

        if let Some(rx) = queued {
            debug!("refresh in flight, waiting for it to settle");
            let outcome = rx.await.unwrap_or(Err(RefreshError::Abandoned));
            return (outcome, Role::Waiter);
        }

        let mut guard = SettleGuard { coordinator: self, settled: false };
        let outcome = self.perform().await;
        guard.settle(outcome.clone());
        (outcome, Role::Owner)
    }

    async fn perform(&self) -> Outcome {
        let refresh_token = match self.tokens.refresh_token() {
            Some(token) if !self.tokens.is_refresh_token_expired() => token,
            _ => {
                warn!("refresh token expired or not available");
                self.discard_tokens();
                return Err(RefreshError::NotPossible);
            }
        };

        info!("refreshing access token");
        let result = match self.request(refresh_token).await {
            Ok(response) => self.store(response),
            Err(e) => Err(e),
        };
        if let Err(ref e) = result {
            warn!(err = %e, "token refresh failed");
            self.discard_tokens();
        }
        result
    }

    async fn request(&self, refresh_token: String) -> Result<RefreshTokenResponse, RefreshError> {
        let resp = self
            .http
            .post(&self.refresh_url)
            .json(&RefreshTokenRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                message: text.trim().chars().take(MAX_ERROR_CHARS).collect(),
            });
        }

        let body = resp.bytes().await.map_err(|e| RefreshError::Transport(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| RefreshError::Decode(e.to_string()))
    }

    fn store(&self, response: RefreshTokenResponse) -> Outcome {
        if response.access_token.is_empty() {
            return Err(RefreshError::Decode("empty access token".to_owned()));
        }
        if let Some(expires_in) = response.expires_in {
            debug!(expires_in, "server expiry noted; local access duration applies");
        }

        let stored = match response.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            Some(rotated) => {
                info!("tokens refreshed with rotation");
                self.tokens.set_tokens(&response.access_token, rotated)
            }
            None => {
                info!("access token refreshed");
                self.tokens.update_access_token(&response.access_token)
            }
        };
        stored.map_err(|e| RefreshError::Storage(e.to_string()))?;

        Ok(self.tokens.access_token().unwrap_or(response.access_token))
    }

    fn discard_tokens(&self) {
        if let Err(e) = self.tokens.clear_tokens() {
            warn!(err = %e, "failed to clear tokens after refresh failure");
        }
    }

    /// Return to idle and hand `outcome` to every queued caller, oldest first.
    fn settle(&self, outcome: Outcome) {
        let waiters = match std::mem::replace(&mut *self.state.lock(), State::Idle) {
            State::Refreshing { waiters } => waiters,
            State::Idle => VecDeque::new(),
        };
        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), ok = outcome.is_ok(), "settling queued refresh callers");
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Settles the coordinator even if the owning future is dropped mid-flight.
struct SettleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl SettleGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("refresh owner dropped before settling");
            self.coordinator.settle(Err(RefreshError::Abandoned));
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
