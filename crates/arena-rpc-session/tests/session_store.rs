//! Integration tests for the session store and origin guard working
//! through the public API only.

use std::time::Duration;

use arena_rpc_session::{OriginGuard, SessionConfig, SessionError, SessionStore};
use serde_json::json;

const TOKEN: &str = "9b2f1c3e-4d5a-4b6c-8d7e-0f1a2b3c4d5e";

#[tokio::test(start_paused = true)]
async fn test_session_configured_expiry_is_honored() {
    let mut store = SessionStore::new(SessionConfig { expiry_minutes: 1 });
    store.set_from_join(&json!({ "session_id": TOKEN })).unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(store.validate_for_request(), Ok(TOKEN));

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(store.validate_for_request(), Err(SessionError::Expired));
    assert!(store.snapshot().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_session_reset_by_new_join_extends_expiry() {
    let mut store = SessionStore::new(SessionConfig { expiry_minutes: 1 });
    store.set(TOKEN).unwrap();
    let first = store.snapshot().unwrap().expires_at;

    tokio::time::advance(Duration::from_secs(45)).await;
    store.set(TOKEN).unwrap();
    let second = store.snapshot().unwrap().expires_at;

    assert_eq!(second - first, Duration::from_secs(45));
}

#[test]
fn test_session_malformed_join_does_not_replace_existing() {
    let mut store = SessionStore::default();
    store.set(TOKEN).unwrap();

    let err = store
        .set_from_join(&json!({ "session_id": "not-a-uuid" }))
        .unwrap_err();
    assert_eq!(err, SessionError::InvalidFormat);
    assert_eq!(store.snapshot().unwrap().token, TOKEN);
}

#[test]
fn test_origin_dev_and_prod_rules() {
    let guard = OriginGuard::default();
    assert!(guard.validate("localhost", true).is_ok());
    assert!(guard.validate("malicious.com", true).is_err());
    assert!(guard.validate("localhost", false).is_err());

    let err = guard.validate("Malicious.com:8443", false).unwrap_err();
    assert_eq!(err.to_string(), "origin rejected: Malicious.com:8443");
}
