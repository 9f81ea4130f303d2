// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request pipeline: authenticated HTTP calls with transparent refresh.
//!
//! Every call goes through [`ApiClient::send`], which refreshes ahead of
//! expiry, attaches the bearer token, retries once after a 401-triggered
//! refresh, and reshapes every failure into an [`ApiError`]. Calls to the
//! refresh endpoint itself bypass all refresh logic and go out without a
//! bearer token.
//!
//! A 401 on a call that went out with a token since replaced by another
//! caller's refresh is replayed without refreshing again. A 401 on a call
//! that carried no token at all is returned as is.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::broadcast::{SessionBroadcaster, FORBIDDEN_MESSAGE, SERVER_ERROR_MESSAGE};
use crate::error::ApiError;
use crate::events::LogoutReason;
use crate::refresh::{RefreshCoordinator, Role, REFRESH_PATH};
use crate::token::TokenStore;

/// One outgoing API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, or an absolute URL.
    pub path: String,
    pub body: Option<Value>,
    /// Set once the call has been replayed after a refresh.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, retried: false }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach any serializable value as the JSON body.
    pub fn with_json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| {
            ApiError::new("ENCODE_ERROR", format!("Failed to encode request body: {e}"))
                .with_details(serde_json::json!({ "path": self.path }))
        })?;
        Ok(self.with_body(value))
    }

    fn targets_refresh(&self) -> bool {
        let route = self.path.split(['?', '#']).next().unwrap_or_default();
        route == REFRESH_PATH || route.ends_with(REFRESH_PATH)
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    url: String,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::decode(&e, &self.url))
    }
}

/// Raw outcome of one dispatch, with the token it carried.
struct Sent {
    status: u16,
    body: Vec<u8>,
    token: Option<String>,
}

/// HTTP client bound to one session.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    refresher: Arc<RefreshCoordinator>,
    broadcaster: Arc<SessionBroadcaster>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        tokens: Arc<TokenStore>,
        refresher: Arc<RefreshCoordinator>,
        broadcaster: Arc<SessionBroadcaster>,
    ) -> Self {
        crate::ensure_crypto_provider();
        let http = reqwest::Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            tokens,
            refresher,
            broadcaster,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request through the full pipeline.
    pub async fn send(&self, mut req: ApiRequest) -> Result<ApiResponse, ApiError> {
        let bypass = req.targets_refresh();
        if !bypass {
            self.refresh_ahead_of_expiry().await?;
        }

        loop {
            let url = self.url(&req.path);
            let sent = self.dispatch(&req, &url).await?;
            if (200..300).contains(&sent.status) {
                return Ok(ApiResponse { status: sent.status, url, body: sent.body });
            }

            let err = ApiError::from_response(sent.status, &sent.body, req.method.as_str(), &url);
            match sent.status {
                401 if bypass => {
                    self.broadcaster.force_logout(LogoutReason::TokenExpired);
                    return Err(err);
                }
                401 if !req.retried => {
                    let current = self.tokens.access_token();
                    if current.is_none() && sent.token.is_none() {
                        // Anonymous call; there is no session to refresh.
                        return Err(err);
                    }
                    if current.is_some() && current != sent.token {
                        debug!(path = %req.path, "401 with a superseded token, retrying");
                    } else {
                        debug!(path = %req.path, "401, refreshing before retry");
                        let (outcome, role) = self.refresher.refresh_with_role().await;
                        if let Err(e) = outcome {
                            if role == Role::Owner {
                                self.broadcaster.force_logout(LogoutReason::TokenExpired);
                            }
                            return Err(e.into());
                        }
                    }
                    req.retried = true;
                }
                401 => {
                    warn!(path = %req.path, "401 after refresh, giving up");
                    return Err(err);
                }
                403 => {
                    self.broadcaster.forbidden(FORBIDDEN_MESSAGE);
                    return Err(err);
                }
                s if s >= 500 => {
                    self.broadcaster.server_error(s, SERVER_ERROR_MESSAGE);
                    return Err(err);
                }
                _ => return Err(err),
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = ApiRequest::post(path).with_json(body)?;
        self.send(req).await?.json()
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = ApiRequest::put(path).with_json(body)?;
        self.send(req).await?.json()
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = ApiRequest::patch(path).with_json(body)?;
        self.send(req).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(path)).await.map(drop)
    }

    /// `DELETE` carrying a JSON body, for endpoints that confirm by payload.
    pub async fn delete_with<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(path).with_json(body)?).await.map(drop)
    }

    /// Refresh before sending when the access token is about to lapse.
    ///
    /// Skipped while a refresh is already in flight; the call then goes out
    /// with the current token and joins the refresh if it comes back 401.
    async fn refresh_ahead_of_expiry(&self) -> Result<(), ApiError> {
        if self.tokens.access_token().is_none()
            || !self.tokens.should_refresh_token()
            || !self.refresher.is_idle()
        {
            return Ok(());
        }

        debug!("access token near expiry, refreshing ahead of request");
        let (outcome, role) = self.refresher.refresh_with_role().await;
        match outcome {
            Ok(_) => Ok(()),
            Err(e) => {
                if role == Role::Owner {
                    self.broadcaster.force_logout(LogoutReason::TokenExpired);
                }
                Err(e.into())
            }
        }
    }

    async fn dispatch(&self, req: &ApiRequest, url: &str) -> Result<Sent, ApiError> {
        let method = req.method.as_str();
        // The refresh endpoint authenticates by body, never by access token.
        let token = if req.targets_refresh() { None } else { self.tokens.access_token() };
        let mut builder = self.http.request(req.method.clone(), url);
        if let Some(ref token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = req.body {
            builder = builder.json(body);
        }

        debug!(method, url, retried = req.retried, "sending request");
        let resp = builder.send().await.map_err(|e| ApiError::from_transport(&e, method, url))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| ApiError::from_transport(&e, method, url))?;
        debug!(method, url, status, "response received");
        Ok(Sent { status, body: body.to_vec(), token })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
