// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session facade: wires the token store, refresh coordinator, broadcaster,
//! and request pipeline together and exposes the auth and user operations.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::broadcast::{Navigator, SessionBroadcaster};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::events::{EventBus, LogoutReason, SessionEvent};
use crate::pipeline::{ApiClient, ApiRequest};
use crate::refresh::RefreshCoordinator;
use crate::storage::KeyValueStore;
use crate::token::{TokenRecord, TokenStore};
use crate::types::{
    ChangePasswordRequest, ChangePasswordResponse, DeleteAccountRequest, DeleteAvatarResponse,
    ForgotPasswordRequest, LoginRequest, LoginResponse, LogoutRequest, RegisterRequest,
    RegisterResponse, ResetPasswordRequest, Theme, UpdateLanguageRequest, UpdateProfileRequest,
    UpdateProfileResponse, UpdateThemeRequest, User, VerifyEmailRequest,
};

pub const LOGGED_OUT_MESSAGE: &str = "You have been logged out.";

/// One authenticated client session.
pub struct Session {
    tokens: Arc<TokenStore>,
    refresher: Arc<RefreshCoordinator>,
    broadcaster: Arc<SessionBroadcaster>,
    api: ApiClient,
}

impl Session {
    pub fn new(
        config: &SessionConfig,
        storage: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_clock(config, storage, Arc::new(SystemClock), navigator)
    }

    pub fn with_clock(
        config: &SessionConfig,
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let tokens = Arc::new(TokenStore::with_clock(storage, clock));
        let refresher = Arc::new(RefreshCoordinator::new(
            Arc::clone(&tokens),
            &config.api_url,
            config.refresh_timeout(),
        ));
        let broadcaster = Arc::new(SessionBroadcaster::new(
            Arc::clone(&tokens),
            EventBus::new(),
            navigator,
            config.login_path.clone(),
            config.redirect_delay(),
        ));
        let api = ApiClient::new(
            &config.api_url,
            config.request_timeout(),
            Arc::clone(&tokens),
            Arc::clone(&refresher),
            Arc::clone(&broadcaster),
        );
        Self { tokens, refresher, broadcaster, api }
    }

    /// The authenticated request pipeline.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.refresher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcaster.bus().subscribe()
    }

    // -- Token state ----------------------------------------------------------

    pub fn access_token(&self) -> Option<String> {
        self.tokens.access_token()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.refresh_token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }

    pub fn should_refresh_token(&self) -> bool {
        self.tokens.should_refresh_token()
    }

    pub fn is_access_token_expired(&self) -> bool {
        self.tokens.is_access_token_expired()
    }

    pub fn token_record(&self) -> Option<TokenRecord> {
        self.tokens.token_record()
    }

    // -- Auth -----------------------------------------------------------------

    /// Exchange credentials for a token pair and store it.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        // Drops a lapsed record so the login call cannot trip a refresh.
        self.tokens.is_authenticated();
        let req = LoginRequest { email: email.to_owned(), password: password.to_owned() };
        let resp: LoginResponse = self.api.post_json("/auth/login", &req).await?;

        self.tokens.set_tokens(&resp.access_token, &resp.refresh_token).map_err(|e| {
            ApiError::new("STORAGE_ERROR", format!("Failed to store tokens: {e:#}"))
        })?;
        info!(user = %resp.user.id, "logged in");
        Ok(resp)
    }

    /// End the session. The server is told on a best-effort basis; local
    /// tokens are always cleared and subscribers always notified.
    pub async fn logout(&self) -> anyhow::Result<()> {
        if let Some(refresh_token) = self.tokens.refresh_token() {
            let req = ApiRequest::post("/auth/logout").with_json(&LogoutRequest { refresh_token })?;
            if let Err(e) = self.api.send(req).await {
                warn!(err = %e, "server logout failed, clearing local session anyway");
            }
        }

        let cleared = self.tokens.clear_tokens();
        self.broadcaster.bus().publish(SessionEvent::Logout {
            reason: LogoutReason::UserRequested,
            message: LOGGED_OUT_MESSAGE.to_owned(),
        });
        info!("logged out");
        cleared
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        self.api.post_json("/auth/register", req).await
    }

    /// `GET /auth/me`.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.api.get_json("/auth/me").await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let body = ForgotPasswordRequest { email: email.to_owned() };
        self.post_unit("/auth/forgot-password", &body).await
    }

    pub async fn reset_password(&self, req: &ResetPasswordRequest) -> Result<(), ApiError> {
        self.post_unit("/auth/reset-password", req).await
    }

    pub async fn verify_email(&self, token: &str) -> Result<(), ApiError> {
        self.post_unit("/auth/verify-email", &VerifyEmailRequest { token: token.to_owned() }).await
    }

    // -- User -----------------------------------------------------------------

    /// `GET /users/me`.
    pub async fn profile(&self) -> Result<User, ApiError> {
        self.api.get_json("/users/me").await
    }

    pub async fn update_profile(
        &self,
        req: &UpdateProfileRequest,
    ) -> Result<UpdateProfileResponse, ApiError> {
        self.api.put_json("/users/me", req).await
    }

    pub async fn change_password(
        &self,
        req: &ChangePasswordRequest,
    ) -> Result<ChangePasswordResponse, ApiError> {
        self.api.put_json("/users/change-password", req).await
    }

    /// Remove the avatar and return the updated user.
    pub async fn delete_avatar(&self) -> Result<DeleteAvatarResponse, ApiError> {
        self.api.send(ApiRequest::delete("/users/avatar")).await?.json()
    }

    pub async fn update_theme(&self, theme: Theme) -> Result<User, ApiError> {
        self.api.patch_json("/users/theme", &UpdateThemeRequest { theme }).await
    }

    pub async fn update_language(&self, language: &str) -> Result<User, ApiError> {
        let body = UpdateLanguageRequest { language: language.to_owned() };
        self.api.patch_json("/users/language", &body).await
    }

    /// Delete the account, confirmed by password. Local tokens are left for
    /// the caller to clear with [`logout`](Self::logout).
    pub async fn delete_account(&self, password: &str) -> Result<(), ApiError> {
        let body = DeleteAccountRequest { password: password.to_owned() };
        self.api.delete_with("/users/delete-account", &body).await
    }

    async fn post_unit<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        self.api.send(ApiRequest::post(path).with_json(body)?).await.map(drop)
    }
}
