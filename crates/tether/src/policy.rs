// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session policy: pure predicates over stored token metadata.
//!
//! Nothing here touches storage. The token store reads its fields and asks
//! these functions what they mean, which keeps "what the data says" testable
//! apart from "what storage holds". Expiries are epoch milliseconds; a
//! missing expiry always reads as expired.

use std::time::Duration;

/// Refresh the access token once this little time is left before expiry.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// What the stored tokens say about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// One or both tokens are missing.
    Anonymous,
    /// Both tokens present and the refresh token is still valid.
    Active,
    /// Both tokens present but the refresh token has expired. The record
    /// must be cleared.
    Lapsed,
}

/// Parse a stored expiry. Anything that is not a decimal epoch-millis value
/// is treated as absent.
pub fn parse_expiry(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
}

/// True when `now` has reached `expiry`, or when no expiry is known.
pub fn is_expired(expiry_ms: Option<u64>, now_ms: u64) -> bool {
    match expiry_ms {
        Some(expiry) => now_ms >= expiry,
        None => true,
    }
}

/// Time left until `expiry`, saturating at zero. `None` when unknown.
pub fn time_remaining(expiry_ms: Option<u64>, now_ms: u64) -> Option<Duration> {
    expiry_ms.map(|expiry| Duration::from_millis(expiry.saturating_sub(now_ms)))
}

/// True when the time left is at or below `threshold`, or when no expiry is
/// known.
pub fn should_refresh(expiry_ms: Option<u64>, now_ms: u64, threshold: Duration) -> bool {
    match time_remaining(expiry_ms, now_ms) {
        Some(left) => left <= threshold,
        None => true,
    }
}

/// Classify the session from token presence and the refresh-token expiry.
pub fn session_state(
    has_access_token: bool,
    has_refresh_token: bool,
    refresh_expiry_ms: Option<u64>,
    now_ms: u64,
) -> SessionState {
    if !has_access_token || !has_refresh_token {
        return SessionState::Anonymous;
    }
    if is_expired(refresh_expiry_ms, now_ms) {
        SessionState::Lapsed
    } else {
        SessionState::Active
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
