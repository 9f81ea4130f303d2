// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tether: client-side session and token lifecycle manager.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod policy;
pub mod refresh;
pub mod retry;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

#[cfg(test)]
pub mod test_support;

pub use crate::config::SessionConfig;
pub use crate::error::{ApiError, RefreshError};
pub use crate::events::{LogoutReason, SessionEvent};
pub use crate::session::Session;

/// Install the process-wide rustls crypto provider used by reqwest.
///
/// Safe to call repeatedly; only the first call installs.
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
