// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mock auth API for integration tests.
//!
//! Serves the auth and user endpoints under `/api` on a random loopback
//! port. Exactly one access token is valid at a time; the refresh endpoint
//! mints the next one.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};

use tether::broadcast::TracingNavigator;
use tether::clock::ManualClock;
use tether::storage::MemoryStore;
use tether::{Session, SessionConfig};

pub const PASSWORD: &str = "hunter2";

/// How the mock answers `POST /auth/refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReply {
    /// New access token only.
    Access,
    /// New access token and a rotated refresh token.
    Rotate,
    /// Fail with this status.
    Reject(u16),
}

pub struct MockApi {
    pub refresh_calls: AtomicU32,
    pub protected_calls: AtomicU32,
    pub logout_calls: AtomicU32,
    pub refresh_reply: Mutex<RefreshReply>,
    pub refresh_delay: Mutex<Duration>,
    /// The one access token the API currently accepts.
    pub valid_token: Mutex<String>,
    /// Refresh tokens presented to the refresh endpoint, in order.
    pub presented: Mutex<Vec<String>>,
    /// Authorization headers seen by protected endpoints, in order.
    pub authorizations: Mutex<Vec<String>>,
    /// Authorization headers seen by the refresh endpoint, in order.
    pub refresh_authorizations: Mutex<Vec<String>>,
    pub account_deleted: AtomicU32,
    minted: AtomicU32,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            refresh_calls: AtomicU32::new(0),
            protected_calls: AtomicU32::new(0),
            logout_calls: AtomicU32::new(0),
            refresh_reply: Mutex::new(RefreshReply::Access),
            refresh_delay: Mutex::new(Duration::ZERO),
            valid_token: Mutex::new("A1".to_owned()),
            presented: Mutex::new(Vec::new()),
            authorizations: Mutex::new(Vec::new()),
            refresh_authorizations: Mutex::new(Vec::new()),
            account_deleted: AtomicU32::new(0),
            minted: AtomicU32::new(1),
        }
    }
}

impl MockApi {
    pub fn refreshes(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn set_reply(&self, reply: RefreshReply) {
        *self.refresh_reply.lock() = reply;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub fn revoke(&self) {
        self.valid_token.lock().clear();
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let valid = self.valid_token.lock().clone();
        !valid.is_empty() && authorization(headers) == format!("Bearer {valid}")
    }

    fn record(&self, headers: &HeaderMap) {
        self.authorizations.lock().push(authorization(headers));
    }
}

fn authorization(headers: &HeaderMap) -> String {
    headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default().to_owned()
}

pub fn user(name: &str) -> Value {
    json!({
        "id": "u-1",
        "email": "ada@example.com",
        "name": name,
        "role": "user",
        "createdAt": "2026-01-01T00:00:00Z",
        "updatedAt": "2026-01-01T00:00:00Z",
    })
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Unauthorized", "code": "UNAUTHORIZED" })))
        .into_response()
}

async fn login(State(api): State<Arc<MockApi>>, Json(body): Json<Value>) -> Response {
    if body["password"] != PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Invalid email or password", "code": "INVALID_CREDENTIALS" })),
        )
            .into_response();
    }
    *api.valid_token.lock() = "A1".to_owned();
    Json(json!({
        "user": user("Ada"),
        "accessToken": "A1",
        "refreshToken": "R1",
        "expiresIn": 3600,
        "tokenType": "Bearer",
    }))
    .into_response()
}

async fn refresh(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    api.refresh_calls.fetch_add(1, Ordering::SeqCst);
    api.refresh_authorizations.lock().push(authorization(&headers));
    api.presented.lock().push(body["refreshToken"].as_str().unwrap_or_default().to_owned());
    let delay = *api.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let reply = *api.refresh_reply.lock();
    let n = api.minted.fetch_add(1, Ordering::SeqCst) + 1;
    let access = format!("A{n}");
    match reply {
        RefreshReply::Reject(status) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED),
            Json(json!({ "message": "Invalid refresh token", "code": "INVALID_REFRESH_TOKEN" })),
        )
            .into_response(),
        RefreshReply::Access => {
            *api.valid_token.lock() = access.clone();
            Json(json!({ "accessToken": access, "expiresIn": 900 })).into_response()
        }
        RefreshReply::Rotate => {
            *api.valid_token.lock() = access.clone();
            Json(json!({ "accessToken": access, "refreshToken": format!("R{n}") }))
                .into_response()
        }
    }
}

async fn logout(State(api): State<Arc<MockApi>>) -> StatusCode {
    api.logout_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}

async fn protected(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    api.protected_calls.fetch_add(1, Ordering::SeqCst);
    api.record(&headers);
    if !api.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "ok": true })).into_response()
}

async fn me(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    if !api.authorized(&headers) {
        return unauthorized();
    }
    Json(user("Ada")).into_response()
}

async fn update_me(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !api.authorized(&headers) {
        return unauthorized();
    }
    let name = body["name"].as_str().unwrap_or("Ada");
    Json(json!({ "user": user(name), "message": "Profile updated" })).into_response()
}

async fn change_password(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !api.authorized(&headers) {
        return unauthorized();
    }
    if body["oldPassword"] != PASSWORD {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "message": "Current password is incorrect",
                "code": "WRONG_PASSWORD",
                "details": { "field": "oldPassword" },
            })),
        )
            .into_response();
    }
    Json(json!({ "message": "Password changed" })).into_response()
}

async fn update_preference(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !api.authorized(&headers) {
        return unauthorized();
    }
    let mut profile = user("Ada");
    for key in ["theme", "language"] {
        if let Some(value) = body.get(key) {
            profile[key] = value.clone();
        }
    }
    Json(profile).into_response()
}

async fn delete_avatar(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    if !api.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "user": user("Ada"), "message": "Avatar removed" })).into_response()
}

async fn delete_account(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !api.authorized(&headers) {
        return unauthorized();
    }
    if body["password"] != PASSWORD {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Password is incorrect", "code": "WRONG_PASSWORD" })),
        )
            .into_response();
    }
    api.account_deleted.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT.into_response()
}

async fn register(Json(body): Json<Value>) -> Response {
    let name = body["name"].as_str().unwrap_or_default();
    (
        StatusCode::CREATED,
        Json(json!({
            "user": user(name),
            "message": "Check your inbox",
            "requiresVerification": true,
        })),
    )
        .into_response()
}

async fn accepted() -> Json<Value> {
    Json(json!({ "message": "ok" }))
}

pub fn router(api: Arc<MockApi>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/auth/register", post(register))
        .route("/api/auth/forgot-password", post(accepted))
        .route("/api/auth/reset-password", post(accepted))
        .route("/api/auth/verify-email", post(accepted))
        .route("/api/users/me", get(me).put(update_me))
        .route("/api/users/change-password", put(change_password))
        .route("/api/users/theme", patch(update_preference))
        .route("/api/users/language", patch(update_preference))
        .route("/api/users/avatar", delete(delete_avatar))
        .route("/api/users/delete-account", delete(delete_account))
        .route("/api/protected", get(protected))
        .route("/api/always-401", get(unauthorized_always))
        .route("/api/forbidden", get(|| async { (StatusCode::FORBIDDEN, "no") }))
        .route("/api/boom", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }))
        .route(
            "/api/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .with_state(api)
}

async fn unauthorized_always(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    api.protected_calls.fetch_add(1, Ordering::SeqCst);
    api.record(&headers);
    unauthorized()
}

/// Spawn the mock API on a random port. Returns it and its `/api` base URL.
pub async fn spawn_api() -> anyhow::Result<(Arc<MockApi>, String)> {
    let api = Arc::new(MockApi::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(Arc::clone(&api));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((api, format!("http://{addr}/api")))
}

pub struct Harness {
    pub session: Session,
    pub clock: ManualClock,
    pub navigator: Arc<TracingNavigator>,
}

/// A session against `base_url` with in-memory storage and a manual clock.
pub fn session(base_url: &str) -> Harness {
    let config = SessionConfig { redirect_delay_ms: 20, ..SessionConfig::for_api(base_url) };
    session_with(&config)
}

pub fn session_with(config: &SessionConfig) -> Harness {
    let clock = ManualClock::new(1_700_000_000_000);
    let navigator = Arc::new(TracingNavigator::new("/dashboard"));
    let session = Session::with_clock(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
        navigator.clone(),
    );
    Harness { session, clock, navigator }
}
