// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token store: the access/refresh token pair and their expiries.
//!
//! Expiries are computed locally at write time from fixed durations; the
//! server's `expiresIn` never feeds into them. Policy decisions are
//! delegated to [`crate::policy`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::policy::{self, SessionState, REFRESH_THRESHOLD};
use crate::storage::KeyValueStore;

/// Lifetime assigned to every freshly written access token.
pub const ACCESS_TOKEN_DURATION: Duration = Duration::from_secs(4 * 60 * 60);

/// Lifetime assigned to every freshly written refresh token.
pub const REFRESH_TOKEN_DURATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const ACCESS_TOKEN_EXPIRY_KEY: &str = "access_token_expiry";
pub const REFRESH_TOKEN_EXPIRY_KEY: &str = "refresh_token_expiry";

const ALL_KEYS: [&str; 4] =
    [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, ACCESS_TOKEN_EXPIRY_KEY, REFRESH_TOKEN_EXPIRY_KEY];

/// Complete snapshot of the stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch millis.
    pub access_token_expiry: u64,
    /// Epoch millis.
    pub refresh_token_expiry: u64,
}

/// Reads and writes the token record through a [`KeyValueStore`].
pub struct TokenStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Store a new token pair, stamping both expiries from now.
    ///
    /// If any write fails the record is cleared so no partial pair survives,
    /// and the storage error is returned.
    pub fn set_tokens(&self, access_token: &str, refresh_token: &str) -> anyhow::Result<()> {
        let now = self.now_ms();
        let access_expiry = now + ACCESS_TOKEN_DURATION.as_millis() as u64;
        let refresh_expiry = now + REFRESH_TOKEN_DURATION.as_millis() as u64;

        let result = self.storage.set_many(&[
            (ACCESS_TOKEN_KEY, access_token),
            (REFRESH_TOKEN_KEY, refresh_token),
            (ACCESS_TOKEN_EXPIRY_KEY, &access_expiry.to_string()),
            (REFRESH_TOKEN_EXPIRY_KEY, &refresh_expiry.to_string()),
        ]);
        if let Err(e) = result {
            let _ = self.clear_tokens();
            return Err(e);
        }

        debug!(access_expiry, refresh_expiry, "token pair stored");
        Ok(())
    }

    /// Replace only the access token and its expiry.
    ///
    /// A failed write clears the record, as in [`set_tokens`](Self::set_tokens),
    /// so a new token never pairs with the old expiry.
    pub fn update_access_token(&self, access_token: &str) -> anyhow::Result<()> {
        let access_expiry = self.now_ms() + ACCESS_TOKEN_DURATION.as_millis() as u64;
        let result = self.storage.set_many(&[
            (ACCESS_TOKEN_KEY, access_token),
            (ACCESS_TOKEN_EXPIRY_KEY, &access_expiry.to_string()),
        ]);
        if let Err(e) = result {
            let _ = self.clear_tokens();
            return Err(e);
        }
        debug!(access_expiry, "access token updated");
        Ok(())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_token(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_token(REFRESH_TOKEN_KEY)
    }

    pub fn access_token_expiry(&self) -> Option<u64> {
        policy::parse_expiry(self.storage.get(ACCESS_TOKEN_EXPIRY_KEY).as_deref())
    }

    pub fn refresh_token_expiry(&self) -> Option<u64> {
        policy::parse_expiry(self.storage.get(REFRESH_TOKEN_EXPIRY_KEY).as_deref())
    }

    /// Remove every token field. Safe to call repeatedly.
    pub fn clear_tokens(&self) -> anyhow::Result<()> {
        self.storage.remove_many(&ALL_KEYS)
    }

    pub fn is_access_token_expired(&self) -> bool {
        policy::is_expired(self.access_token_expiry(), self.now_ms())
    }

    pub fn is_refresh_token_expired(&self) -> bool {
        policy::is_expired(self.refresh_token_expiry(), self.now_ms())
    }

    pub fn should_refresh_token(&self) -> bool {
        policy::should_refresh(self.access_token_expiry(), self.now_ms(), REFRESH_THRESHOLD)
    }

    /// Both tokens present and the refresh token still valid.
    ///
    /// Clears the record when it finds a lapsed refresh token, so this check
    /// can mutate storage.
    pub fn is_authenticated(&self) -> bool {
        let state = policy::session_state(
            self.access_token().is_some(),
            self.refresh_token().is_some(),
            self.refresh_token_expiry(),
            self.now_ms(),
        );
        match state {
            SessionState::Active => true,
            SessionState::Anonymous => false,
            SessionState::Lapsed => {
                debug!("refresh token expired, clearing session");
                if let Err(e) = self.clear_tokens() {
                    warn!(err = %e, "failed to clear lapsed session");
                }
                false
            }
        }
    }

    /// The full record, only when all four fields are present and valid.
    pub fn token_record(&self) -> Option<TokenRecord> {
        Some(TokenRecord {
            access_token: self.access_token()?,
            refresh_token: self.refresh_token()?,
            access_token_expiry: self.access_token_expiry()?,
            refresh_token_expiry: self.refresh_token_expiry()?,
        })
    }

    fn read_token(&self, key: &str) -> Option<String> {
        self.storage.get(key).filter(|value| !value.is_empty())
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
