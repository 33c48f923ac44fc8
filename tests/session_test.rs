mod common;

use bytewatt_bridge::api::VendorApi;
use bytewatt_bridge::error::BridgeError;
use bytewatt_bridge::session::SessionManager;
use common::{FakeVendorApi, test_config};
use std::sync::Arc;
use std::time::Duration;

fn manager(api: Arc<FakeVendorApi>) -> Arc<SessionManager> {
    let cfg = test_config();
    Arc::new(SessionManager::new(api as Arc<dyn VendorApi>, &cfg.account))
}

#[tokio::test]
async fn concurrent_callers_share_one_login() {
    let api = Arc::new(FakeVendorApi::with_login_delay(Duration::from_millis(50)));
    let mgr = manager(api.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let mgr = mgr.clone();
        handles.push(tokio::spawn(async move { mgr.acquire_session().await }));
    }
    let mut tokens = Vec::new();
    for h in handles {
        let session = h.await.unwrap().unwrap();
        tokens.push(session.token().to_string());
    }

    assert_eq!(FakeVendorApi::count(&api.logins), 1);
    assert_eq!(mgr.login_count(), 1);
    assert!(tokens.iter().all(|t| t == "token-1"));
}

#[tokio::test]
async fn waiters_share_a_failed_login() {
    let api = Arc::new(FakeVendorApi::with_login_delay(Duration::from_millis(50)));
    api.fail_next_login(BridgeError::network("connection reset"));
    let mgr = manager(api.clone());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let mgr = mgr.clone();
        handles.push(tokio::spawn(async move { mgr.acquire_session().await }));
    }
    for h in handles {
        let err = h.await.unwrap().unwrap_err();
        assert!(err.is_transient());
    }
    assert_eq!(FakeVendorApi::count(&api.logins), 1);

    // The next caller tries again
    let session = mgr.acquire_session().await.unwrap();
    assert_eq!(session.token(), "token-2");
}

#[tokio::test]
async fn rejected_token_triggers_exactly_one_reauth() {
    let api = Arc::new(FakeVendorApi::new());
    let mgr = manager(api.clone());

    let first = mgr.acquire_session().await.unwrap();
    api.expire_token();

    let value = mgr
        .with_session(|session| {
            let api = api.clone();
            async move { api.fetch_realtime(session.token()).await }
        })
        .await
        .unwrap();
    assert_eq!(value["soc"], 55.0);
    assert_eq!(FakeVendorApi::count(&api.logins), 2);
    assert_eq!(FakeVendorApi::count(&api.realtime_calls), 2);

    let current = mgr.current().await.unwrap();
    assert_ne!(current.id, first.id);
    assert_eq!(current.token(), "token-2");
}

#[tokio::test]
async fn persistent_rejection_surfaces_auth_error() {
    let api = Arc::new(FakeVendorApi::new());
    let mgr = manager(api.clone());

    let calls = std::sync::atomic::AtomicU32::new(0);
    let err = mgr
        .with_session(|_session| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err::<(), _>(BridgeError::auth("token invalid")) }
        })
        .await
        .unwrap_err();
    assert!(err.is_auth());
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(FakeVendorApi::count(&api.logins), 2);
}

#[tokio::test]
async fn invalidate_forces_a_fresh_token() {
    let api = Arc::new(FakeVendorApi::new());
    let mgr = manager(api.clone());

    let before = mgr.acquire_session().await.unwrap();
    mgr.invalidate().await;
    assert!(mgr.current().await.is_none());
    let after = mgr.acquire_session().await.unwrap();
    assert_ne!(before.token(), after.token());
    assert_eq!(mgr.login_count(), 2);
}

#[tokio::test]
async fn bad_credentials_are_not_transient() {
    let api = Arc::new(FakeVendorApi::new());
    let mut cfg = test_config();
    cfg.account.password = "wrong".to_string();
    let mgr = SessionManager::new(api.clone() as Arc<dyn VendorApi>, &cfg.account);

    let err = mgr.acquire_session().await.unwrap_err();
    assert!(err.is_auth());
    assert!(!err.is_transient());
}
