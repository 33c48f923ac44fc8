//! Periodic metric collection
//!
//! Every cycle fetches the realtime sample. Every Nth cycle (cycle 0
//! included) also fetches cumulative statistics and today's summary. A
//! statistics problem never fails the cycle: the previous values are kept
//! and the fetch is repeated on the next cycle instead of waiting for the
//! slow cadence.

use crate::api::VendorApi;
use crate::config::PollConfig;
use crate::error::{BridgeError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::metrics::{
    DailyStatistics, EnergyStatistics, Normalized, RealtimeMetrics, StatisticsGuard,
    normalize_daily, normalize_realtime, normalize_statistics,
};
use crate::retry::{BackoffInterrupt, RetryPolicy};
use crate::session::SessionManager;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

/// Values produced by one successful cycle
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub cycle: u64,
    pub realtime: RealtimeMetrics,
    /// Latest accepted statistics, possibly from an earlier cycle
    pub statistics: Option<EnergyStatistics>,
    pub daily: Option<DailyStatistics>,
    /// Statistics were due this cycle
    pub statistics_due: bool,
    /// Statistics and daily summary were both fetched and accepted this cycle
    pub statistics_refreshed: bool,
}

struct PollerState {
    cycle: u64,
    statistics_pending: bool,
    realtime: Option<RealtimeMetrics>,
    guard: StatisticsGuard,
    daily: Option<DailyStatistics>,
}

/// Latest values kept across cycles, readable while a cycle is running
#[derive(Debug, Clone, Default)]
pub struct LatestValues {
    pub realtime: Option<RealtimeMetrics>,
    pub statistics: Option<EnergyStatistics>,
    pub daily: Option<DailyStatistics>,
}

pub struct Poller {
    api: Arc<dyn VendorApi>,
    session: Arc<SessionManager>,
    retry: RetryPolicy,
    interrupt: Arc<BackoffInterrupt>,
    statistics_every: u64,
    state: Mutex<PollerState>,
    latest: std::sync::Mutex<LatestValues>,
    logger: StructuredLogger,
}

impl Poller {
    pub fn new(
        api: Arc<dyn VendorApi>,
        session: Arc<SessionManager>,
        retry: RetryPolicy,
        interrupt: Arc<BackoffInterrupt>,
        config: &PollConfig,
    ) -> Self {
        Self {
            api,
            session,
            retry,
            interrupt,
            statistics_every: u64::from(config.statistics_every.max(1)),
            state: Mutex::new(PollerState {
                cycle: 0,
                statistics_pending: false,
                realtime: None,
                guard: StatisticsGuard::new(config.statistics_tolerance_kwh),
                daily: None,
            }),
            latest: std::sync::Mutex::new(LatestValues::default()),
            logger: get_logger_with_context(LogContext::new("poller")),
        }
    }

    /// Run one poll cycle
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let mut state = self.state.lock().await;
        let _exchange = self.session.lock_exchange().await;

        let cycle = state.cycle;
        state.cycle += 1;
        let statistics_due = state.statistics_pending || cycle % self.statistics_every == 0;
        if statistics_due {
            // Stays set until statistics and daily summary both land
            state.statistics_pending = true;
        }

        let raw = self
            .fetch("Realtime fetch", |api, token| async move {
                api.fetch_realtime(&token).await
            })
            .await?;
        let realtime = match normalize_realtime(&raw) {
            Ok(n) => self.note_fields("realtime", n),
            Err(e) => {
                self.logger.warn(&format!(
                    "Cycle {}: discarding malformed realtime payload, keeping last good values: {}",
                    cycle, e
                ));
                return Err(e);
            }
        };
        state.realtime = Some(realtime.clone());
        self.store_latest(&state);

        let mut statistics_refreshed = false;
        if statistics_due {
            let stats_ok = self.refresh_statistics(&mut state, cycle).await?;
            let daily_ok = self.refresh_daily(&mut state, cycle).await?;
            statistics_refreshed = stats_ok && daily_ok;
            state.statistics_pending = !statistics_refreshed;
            self.store_latest(&state);
        }

        Ok(PollOutcome {
            cycle,
            realtime,
            statistics: state.guard.last().cloned(),
            daily: state.daily.clone(),
            statistics_due,
            statistics_refreshed,
        })
    }

    /// Latest values; never waits for a running cycle
    pub fn latest(&self) -> LatestValues {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_latest(&self, state: &PollerState) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = LatestValues {
            realtime: state.realtime.clone(),
            statistics: state.guard.last().cloned(),
            daily: state.daily.clone(),
        };
    }

    /// Returns Ok(false) for failures that leave the cycle intact
    async fn refresh_statistics(&self, state: &mut PollerState, cycle: u64) -> Result<bool> {
        let fetched = self
            .fetch("Statistics fetch", |api, token| async move {
                api.fetch_statistics(&token).await
            })
            .await;
        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => return self.soft_failure("statistics", cycle, e),
        };
        let stats = match normalize_statistics(&raw) {
            Ok(n) => self.note_fields("statistics", n),
            Err(e) => return self.soft_failure("statistics", cycle, e),
        };
        match state.guard.accept(stats) {
            Ok(_) => Ok(true),
            Err(e) => {
                self.logger.warn(&format!(
                    "Cycle {}: rejecting statistics sample, keeping previous: {}",
                    cycle, e
                ));
                Ok(false)
            }
        }
    }

    async fn refresh_daily(&self, state: &mut PollerState, cycle: u64) -> Result<bool> {
        let fetched = self
            .fetch("Daily summary fetch", |api, token| async move {
                api.fetch_daily(&token).await
            })
            .await;
        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => return self.soft_failure("daily summary", cycle, e),
        };
        match normalize_daily(&raw) {
            Ok(n) => {
                state.daily = Some(self.note_fields("daily", n));
                Ok(true)
            }
            Err(e) => self.soft_failure("daily summary", cycle, e),
        }
    }

    fn soft_failure(&self, what: &str, cycle: u64, error: BridgeError) -> Result<bool> {
        // An interrupted backoff abandons the whole cycle
        if matches!(error, BridgeError::Interrupted { .. }) {
            return Err(error);
        }
        self.logger.warn(&format!(
            "Cycle {}: {} unavailable, keeping previous values and retrying next cycle: {}",
            cycle, what, error
        ));
        Ok(false)
    }

    fn note_fields<T>(&self, what: &str, normalized: Normalized<T>) -> T {
        if !normalized.unmapped.is_empty() {
            self.logger.debug(&format!(
                "Unmapped {} keys: {}",
                what,
                normalized.unmapped.join(", ")
            ));
        }
        if !normalized.invalid.is_empty() {
            self.logger.debug(&format!(
                "Unreadable {} fields: {}",
                what,
                normalized.invalid.join(", ")
            ));
        }
        normalized.metrics
    }

    /// One vendor call with session handling and transient retries
    async fn fetch<F, Fut>(&self, label: &str, call: F) -> Result<serde_json::Value>
    where
        F: Fn(Arc<dyn VendorApi>, String) -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        let call = &call;
        self.retry
            .run(label, &self.interrupt, || {
                self.session.with_session(move |session| {
                    call(self.api.clone(), session.token().to_string())
                })
            })
            .await
    }
}
