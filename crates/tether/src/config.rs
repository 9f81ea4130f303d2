// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// File under the state directory holding the persisted token record.
pub const SESSION_FILE: &str = "session.json";

/// Session settings shared by the library and the CLI.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the API, including any path prefix.
    #[arg(long, default_value = "http://localhost:3000/api", env = "TETHER_API_URL")]
    pub api_url: String,

    /// Directory for persisted session state.
    #[arg(long, env = "TETHER_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Timeout for ordinary API requests in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "TETHER_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Timeout for token refresh requests in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "TETHER_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Login entry point users are sent to after a forced logout.
    #[arg(long, default_value = "/login", env = "TETHER_LOGIN_PATH")]
    pub login_path: String,

    /// Delay before the post-logout redirect in milliseconds.
    #[arg(long, default_value_t = 100, env = "TETHER_REDIRECT_DELAY_MS")]
    pub redirect_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api".to_owned(),
            state_dir: None,
            request_timeout_ms: 10_000,
            refresh_timeout_ms: 5_000,
            login_path: "/login".to_owned(),
            redirect_delay_ms: 100,
        }
    }
}

impl SessionConfig {
    /// Config pointed at `api_url` with every other field defaulted.
    pub fn for_api(api_url: impl Into<String>) -> Self {
        Self { api_url: api_url.into(), ..Self::default() }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("--api-url must be an http:// or https:// URL");
        }
        if !self.login_path.starts_with('/') {
            anyhow::bail!("--login-path must start with '/'");
        }
        if self.request_timeout_ms == 0 || self.refresh_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn session_file(&self) -> PathBuf {
        self.state_dir().join(SESSION_FILE)
    }
}

/// Resolve the state directory when none is configured.
///
/// Checks `$XDG_STATE_HOME/tether`, then `$HOME/.local/state/tether`.
pub fn default_state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("tether");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/tether");
    }
    PathBuf::from(".tether")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
