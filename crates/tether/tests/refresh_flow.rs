// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end token refresh behavior of the request pipeline against a
//! mock API.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinSet;

use tether::pipeline::ApiRequest;
use tether::token::{ACCESS_TOKEN_DURATION, REFRESH_TOKEN_DURATION};
use tether::{LogoutReason, SessionEvent};

use support::{session, spawn_api, RefreshReply};

const SECOND: Duration = Duration::from_secs(1);

#[tokio::test]
async fn fresh_token_is_sent_as_bearer() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    let h = session(&base);
    h.session.tokens().set_tokens("A1", "R1")?;

    h.session.api().send(ApiRequest::get("/protected")).await?;

    assert_eq!(*api.authorizations.lock(), vec!["Bearer A1".to_owned()]);
    assert_eq!(api.refreshes(), 0);
    Ok(())
}

#[tokio::test]
async fn expired_access_token_is_refreshed_before_sending() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    let h = session(&base);
    h.session.tokens().set_tokens("A1", "R1")?;
    let refresh_expiry = h.session.tokens().refresh_token_expiry();
    h.clock.advance(ACCESS_TOKEN_DURATION + SECOND);

    h.session.api().send(ApiRequest::get("/protected")).await?;

    assert_eq!(api.refreshes(), 1);
    assert_eq!(*api.authorizations.lock(), vec!["Bearer A2".to_owned()]);
    assert_eq!(h.session.access_token().as_deref(), Some("A2"));
    assert_eq!(h.session.refresh_token().as_deref(), Some("R1"));
    assert_eq!(h.session.tokens().refresh_token_expiry(), refresh_expiry);
    assert!(!h.session.is_access_token_expired());
    Ok(())
}

#[tokio::test]
async fn token_inside_threshold_is_refreshed_ahead_of_expiry() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    let h = session(&base);
    h.session.tokens().set_tokens("A1", "R1")?;
    h.clock.advance(ACCESS_TOKEN_DURATION - Duration::from_secs(60));
    assert!(!h.session.is_access_token_expired());
    assert!(h.session.should_refresh_token());

    h.session.api().send(ApiRequest::get("/protected")).await?;

    assert_eq!(api.refreshes(), 1);
    assert!(!h.session.should_refresh_token());
    Ok(())
}

#[tokio::test]
async fn rotated_refresh_token_replaces_the_old_one() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    api.set_reply(RefreshReply::Rotate);
    let h = session(&base);
    h.session.tokens().set_tokens("A1", "R1")?;
    let old_expiry = h.session.tokens().refresh_token_expiry();
    h.clock.advance(ACCESS_TOKEN_DURATION + SECOND);

    h.session.api().send(ApiRequest::get("/protected")).await?;

    assert_eq!(h.session.refresh_token().as_deref(), Some("R2"));
    assert_eq!(*api.presented.lock(), vec!["R1".to_owned()]);
    assert!(h.session.tokens().refresh_token_expiry() > old_expiry);
    Ok(())
}

#[tokio::test]
async fn concurrent_expired_requests_share_one_refresh() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    api.set_delay(Duration::from_millis(200));
    api.revoke();
    let h = Arc::new(session(&base));
    h.session.tokens().set_tokens("A1", "R1")?;
    h.clock.advance(ACCESS_TOKEN_DURATION + SECOND);

    let mut set = JoinSet::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        set.spawn(async move { h.session.api().send(ApiRequest::get("/protected")).await });
    }
    while let Some(joined) = set.join_next().await {
        assert_eq!(joined??.status(), 200);
    }

    assert_eq!(api.refreshes(), 1);
    assert_eq!(h.session.access_token().as_deref(), Some("A2"));
    assert!(h.session.refresher().is_idle());
    Ok(())
}

#[tokio::test]
async fn failed_refresh_rejects_every_queued_request() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    api.set_delay(Duration::from_millis(200));
    api.set_reply(RefreshReply::Reject(401));
    api.revoke();
    let h = Arc::new(session(&base));
    let mut events = h.session.subscribe();
    h.session.tokens().set_tokens("A1", "R1")?;
    h.clock.advance(ACCESS_TOKEN_DURATION + SECOND);

    let mut set = JoinSet::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        set.spawn(async move { h.session.api().send(ApiRequest::get("/protected")).await });
    }
    while let Some(joined) = set.join_next().await {
        let err = joined?.err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert!(err.is_session_terminal(), "{err}");
    }

    assert_eq!(api.refreshes(), 1);
    assert!(!h.session.is_authenticated());
    assert!(matches!(
        events.recv().await?,
        SessionEvent::Logout { reason: LogoutReason::TokenExpired, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn expired_refresh_token_logs_out_without_calling_refresh() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    let h = session(&base);
    let mut events = h.session.subscribe();
    h.session.tokens().set_tokens("A1", "R1")?;
    h.clock.advance(REFRESH_TOKEN_DURATION + SECOND);

    let err = h.session.api().send(ApiRequest::get("/protected")).await.err();

    assert_eq!(err.map(|e| e.code), Some("REFRESH_NOT_POSSIBLE".to_owned()));
    assert_eq!(api.refreshes(), 0);
    assert_eq!(api.protected_calls.load(Ordering::SeqCst), 0);
    assert!(matches!(events.recv().await?, SessionEvent::Logout { .. }));
    assert_eq!(h.session.access_token(), None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.navigator.location(), "/login?redirect=%2Fdashboard");
    Ok(())
}

#[tokio::test]
async fn unauthorized_response_is_refreshed_and_retried_once() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    api.revoke();
    let h = session(&base);
    h.session.tokens().set_tokens("A1", "R1")?;

    let resp = h.session.api().send(ApiRequest::get("/protected")).await?;

    assert_eq!(resp.status(), 200);
    assert_eq!(api.refreshes(), 1);
    assert_eq!(*api.authorizations.lock(), vec!["Bearer A1".to_owned(), "Bearer A2".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn second_unauthorized_is_surfaced_without_logout() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    let h = session(&base);
    let mut events = h.session.subscribe();
    h.session.tokens().set_tokens("A1", "R1")?;

    let err = h.session.api().send(ApiRequest::get("/always-401")).await.err();

    assert_eq!(err.and_then(|e| e.status()), Some(401));
    assert_eq!(api.refreshes(), 1);
    assert_eq!(api.protected_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.session.access_token().as_deref(), Some("A2"));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    Ok(())
}

#[tokio::test]
async fn rejected_reactive_refresh_forces_logout() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    api.revoke();
    api.set_reply(RefreshReply::Reject(403));
    let h = session(&base);
    let mut events = h.session.subscribe();
    h.session.tokens().set_tokens("A1", "R1")?;

    let err = h.session.api().send(ApiRequest::get("/protected")).await.err();

    let err = err.ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(err.code, "REFRESH_REJECTED");
    assert_eq!(err.details, json!({ "refreshStatus": 403 }));
    assert!(!err.is_forbidden());
    assert_eq!(h.session.refresh_token(), None);
    assert_eq!(
        events.recv().await?,
        SessionEvent::Logout {
            reason: LogoutReason::TokenExpired,
            message: tether::broadcast::SESSION_EXPIRED_MESSAGE.to_owned(),
        }
    );
    Ok(())
}

#[tokio::test]
async fn refresh_endpoint_never_triggers_refresh() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    api.set_reply(RefreshReply::Reject(401));
    let h = session(&base);
    let mut events = h.session.subscribe();
    h.session.tokens().set_tokens("A1", "R1")?;
    h.clock.advance(ACCESS_TOKEN_DURATION + SECOND);

    let req = ApiRequest::post("/auth/refresh").with_json(&json!({ "refreshToken": "R1" }))?;
    let err = h.session.api().send(req).await.err();

    let err = err.ok_or_else(|| anyhow::anyhow!("expected failure"))?;
    assert_eq!(err.code, "INVALID_REFRESH_TOKEN");
    assert_eq!(err.status(), Some(401));
    assert_eq!(api.refreshes(), 1);
    assert!(matches!(events.recv().await?, SessionEvent::Logout { .. }));
    assert_eq!(h.session.access_token(), None);
    Ok(())
}

#[tokio::test]
async fn anonymous_unauthorized_is_returned_as_is() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    let h = session(&base);
    let mut events = h.session.subscribe();

    let err = h.session.api().send(ApiRequest::get("/protected")).await.err();

    assert_eq!(err.map(|e| e.code), Some("UNAUTHORIZED".to_owned()));
    assert_eq!(api.refreshes(), 0);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    Ok(())
}

#[tokio::test]
async fn refresh_endpoint_gets_no_bearer_token() -> anyhow::Result<()> {
    let (api, base) = spawn_api().await?;
    let h = session(&base);
    h.session.tokens().set_tokens("A1", "R1")?;

    let req = ApiRequest::post("/auth/refresh").with_json(&json!({ "refreshToken": "R1" }))?;
    h.session.api().send(req).await?;

    assert_eq!(*api.refresh_authorizations.lock(), vec![String::new()]);
    assert_eq!(*api.presented.lock(), vec!["R1".to_owned()]);
    Ok(())
}
