//! Health tracking for the poll loop
//!
//! Status is derived from the consecutive-failure counter alone:
//! zero failures is Healthy, fewer than the threshold is Degraded, and
//! reaching the threshold is Failed. One success resets the counter.

use crate::error::BridgeError;
use crate::logging::{StructuredLogger, get_logger};
use crate::retry::BackoffInterrupt;
use crate::session::SessionManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Diagnostics returned by a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_kind: Option<String>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub summary: String,
}

/// Pure health state machine
#[derive(Debug, Clone)]
pub struct HealthTracker {
    failure_threshold: u32,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_kind: Option<&'static str>,
    total_successes: u64,
    total_failures: u64,
}

impl HealthTracker {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
            last_error_kind: None,
            total_successes: 0,
            total_failures: 0,
        }
    }

    pub fn status(&self) -> HealthStatus {
        match self.consecutive_failures {
            0 => HealthStatus::Healthy,
            n if n < self.failure_threshold => HealthStatus::Degraded,
            _ => HealthStatus::Failed,
        }
    }

    pub fn record_success(&mut self) -> HealthStatus {
        self.consecutive_failures = 0;
        self.total_successes += 1;
        self.last_success = Some(Utc::now());
        self.status()
    }

    pub fn record_failure(&mut self, error: &BridgeError) -> HealthStatus {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.total_failures += 1;
        self.last_error = Some(error.to_string());
        self.last_error_kind = Some(error.kind());
        self.status()
    }

    /// Clear the failure streak; the last error stays for diagnostics
    pub fn reset(&mut self) -> HealthStatus {
        self.consecutive_failures = 0;
        self.status()
    }

    pub fn report(&self) -> HealthReport {
        let status = self.status();
        let summary = match (status, self.last_success, self.last_error.as_deref()) {
            (HealthStatus::Healthy, None, _) => "Waiting for first poll".to_string(),
            (HealthStatus::Healthy, Some(at), _) => {
                format!("Healthy, last successful poll at {}", at.to_rfc3339())
            }
            (HealthStatus::Degraded, _, err) => format!(
                "Degraded: {} consecutive failure(s), last error: {}",
                self.consecutive_failures,
                err.unwrap_or("unknown")
            ),
            (HealthStatus::Failed, at, err) => format!(
                "Failed: {} consecutive failures, last error: {}, last success: {}",
                self.consecutive_failures,
                err.unwrap_or("unknown"),
                at.map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            ),
        };
        HealthReport {
            status,
            consecutive_failures: self.consecutive_failures,
            failure_threshold: self.failure_threshold,
            last_success: self.last_success,
            last_error: self.last_error.clone(),
            last_error_kind: self.last_error_kind.map(|k| k.to_string()),
            total_successes: self.total_successes,
            total_failures: self.total_failures,
            summary,
        }
    }
}

/// Shared health state plus the reconnect lever
pub struct HealthMonitor {
    tracker: Mutex<HealthTracker>,
    session: Arc<SessionManager>,
    interrupt: Arc<BackoffInterrupt>,
    logger: StructuredLogger,
}

impl HealthMonitor {
    pub fn new(
        failure_threshold: u32,
        session: Arc<SessionManager>,
        interrupt: Arc<BackoffInterrupt>,
    ) -> Self {
        Self {
            tracker: Mutex::new(HealthTracker::new(failure_threshold)),
            session,
            interrupt,
            logger: get_logger("health"),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, HealthTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_success(&self) {
        let mut tracker = self.tracker();
        let before = tracker.status();
        let after = tracker.record_success();
        if before != after {
            self.logger
                .info(&format!("Health {} -> {}", before, after));
        }
    }

    pub fn record_failure(&self, error: &BridgeError) {
        let mut tracker = self.tracker();
        let before = tracker.status();
        let after = tracker.record_failure(error);
        if before != after {
            let msg = format!("Health {} -> {}: {}", before, after, error);
            match after {
                HealthStatus::Failed => self.logger.error(&msg),
                _ => self.logger.warn(&msg),
            }
        }
    }

    /// Synchronous snapshot; never touches the network
    pub fn check_health(&self) -> HealthReport {
        self.tracker().report()
    }

    pub fn status(&self) -> HealthStatus {
        self.tracker().status()
    }

    /// Drop the session, clear the failure streak and wake any backoff sleep
    pub async fn force_reconnect(&self) {
        self.logger.info("Forced reconnect requested");
        self.interrupt.trigger();
        {
            let mut tracker = self.tracker();
            tracker.reset();
        }
        self.session.invalidate().await;
    }
}
