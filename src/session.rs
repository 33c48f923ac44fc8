//! Vendor session management for the Byte-Watt bridge
//!
//! The [`SessionManager`] owns the bearer token of one account. Logins are
//! single-flight: callers arriving while a login is in progress wait for it
//! and share its outcome instead of issuing their own request. A token
//! rejected by the vendor is dropped and replaced once per operation.
//!
//! The manager also carries the exchange gate that keeps a poll cycle and a
//! settings application from interleaving their vendor calls.

use crate::api::VendorApi;
use crate::config::AccountConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};

/// An authenticated vendor session
pub struct Session {
    /// Local id used to correlate log lines; never sent to the vendor
    pub id: String,
    pub issued_at: DateTime<Utc>,
    token: String,
    issued: Instant,
}

impl Session {
    pub fn new(token: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            token,
            issued: Instant::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn age(&self) -> Duration {
        self.issued.elapsed()
    }

    pub fn is_expired(&self, max_age: Option<Duration>) -> bool {
        max_age.is_some_and(|max| self.age() >= max)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("issued_at", &self.issued_at)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Arc<Session>>,
    last_login_error: Option<LoginFailure>,
}

#[derive(Clone)]
struct LoginFailure {
    transient: bool,
    message: String,
}

impl LoginFailure {
    fn to_error(&self) -> BridgeError {
        if self.transient {
            BridgeError::network(self.message.clone())
        } else {
            BridgeError::auth(self.message.clone())
        }
    }
}

pub struct SessionManager {
    api: Arc<dyn VendorApi>,
    username: String,
    password: String,
    max_age: Option<Duration>,
    slot: Mutex<SessionSlot>,
    /// Completed login attempts; lets waiters detect a login that finished while they queued
    logins: AtomicU64,
    exchange: Mutex<()>,
    logger: StructuredLogger,
}

impl SessionManager {
    pub fn new(api: Arc<dyn VendorApi>, account: &AccountConfig) -> Self {
        Self {
            api,
            username: account.username.clone(),
            password: account.password.clone(),
            max_age: account.session_max_age(),
            slot: Mutex::new(SessionSlot::default()),
            logins: AtomicU64::new(0),
            exchange: Mutex::new(()),
            logger: get_logger_with_context(
                LogContext::new("session").with_account(&account.username),
            ),
        }
    }

    /// Return a valid session, logging in if none is cached or it aged out
    pub async fn acquire_session(&self) -> Result<Arc<Session>> {
        let observed = self.logins.load(Ordering::Acquire);
        let mut slot = self.slot.lock().await;

        if let Some(session) = slot.session.as_ref() {
            if !session.is_expired(self.max_age) {
                return Ok(session.clone());
            }
            self.logger.info(&format!(
                "Session {} reached its maximum age, refreshing",
                session.id
            ));
            slot.session = None;
        }

        // A login completed while we were queued; its failure is ours too
        if self.logins.load(Ordering::Acquire) != observed
            && let Some(failure) = slot.last_login_error.as_ref()
        {
            return Err(failure.to_error());
        }

        let result = self.api.login(&self.username, &self.password).await;
        self.logins.fetch_add(1, Ordering::AcqRel);

        match result {
            Ok(token) => {
                let session = Arc::new(Session::new(token));
                self.logger
                    .info(&format!("Authenticated, session {}", session.id));
                slot.session = Some(session.clone());
                slot.last_login_error = None;
                Ok(session)
            }
            Err(e) => {
                let failure = LoginFailure {
                    transient: e.is_transient(),
                    message: format!("Login failed: {}", e),
                };
                self.logger.error(&failure.message);
                slot.last_login_error = Some(failure.clone());
                Err(failure.to_error())
            }
        }
    }

    /// Run `op` with the current token; on rejection re-authenticate and retry once
    pub async fn with_session<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.acquire_session().await?;
        match op(session.clone()).await {
            Err(e) if e.is_auth() => {
                self.logger.warn(&format!(
                    "Session {} rejected by vendor ({}), re-authenticating",
                    session.id, e
                ));
                self.invalidate_if_current(&session).await;
                let fresh = self.acquire_session().await?;
                op(fresh).await
            }
            other => other,
        }
    }

    /// Drop `stale` unless another caller already replaced it
    async fn invalidate_if_current(&self, stale: &Arc<Session>) {
        let mut slot = self.slot.lock().await;
        if slot
            .session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, stale))
        {
            slot.session = None;
        }
    }

    /// Drop the cached session unconditionally
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(old) = slot.session.take() {
            self.logger.info(&format!("Session {} invalidated", old.id));
        }
        slot.last_login_error = None;
    }

    pub async fn current(&self) -> Option<Arc<Session>> {
        self.slot.lock().await.session.clone()
    }

    /// Number of login requests issued so far
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::Acquire)
    }

    /// Serialize a poll cycle against a settings application
    pub async fn lock_exchange(&self) -> MutexGuard<'_, ()> {
        self.exchange.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry() {
        let session = Session::new("token".to_string());
        assert!(!session.is_expired(None));
        assert!(!session.is_expired(Some(Duration::from_secs(3600))));
        assert!(session.is_expired(Some(Duration::ZERO)));
    }

    #[test]
    fn test_session_debug_hides_token() {
        let session = Session::new("very-secret".to_string());
        let printed = format!("{:?}", session);
        assert!(!printed.contains("very-secret"));
        assert!(printed.contains(&session.id));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = Session::new("t".to_string());
        let b = Session::new("t".to_string());
        assert_ne!(a.id, b.id);
    }
}
