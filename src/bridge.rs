//! Composition root for one Byte-Watt account
//!
//! [`Bridge`] wires the session manager, poller, settings synchronizer and
//! health monitor together, drives the poll loop and publishes a
//! [`BridgeSnapshot`] after every cycle and every settings change.

use crate::api::{ByteWattClient, VendorApi};
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::health::{HealthMonitor, HealthReport};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::metrics::{DailyStatistics, EnergyStatistics, RealtimeMetrics};
use crate::poller::{PollOutcome, Poller};
use crate::retry::{BackoffInterrupt, RetryPolicy};
use crate::session::SessionManager;
use crate::settings::{ScheduleSettings, SettingsPatch};
use crate::synchronizer::{ApplyOutcome, SettingsSynchronizer};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};

/// Everything a consumer needs, published on every cycle
#[derive(Debug, Clone, Serialize)]
pub struct BridgeSnapshot {
    pub timestamp: String,
    pub realtime: Option<RealtimeMetrics>,
    pub statistics: Option<EnergyStatistics>,
    pub daily: Option<DailyStatistics>,
    pub settings: Option<ScheduleSettings>,
    pub health: HealthReport,
    pub total_polls: u64,
    pub last_poll_duration_ms: Option<u64>,
    pub poll_interval_ms: u64,
}

pub struct Bridge {
    config: Config,
    session: Arc<SessionManager>,
    poller: Poller,
    synchronizer: SettingsSynchronizer,
    health: HealthMonitor,
    snapshot_tx: watch::Sender<Arc<BridgeSnapshot>>,
    shutdown_tx: watch::Sender<bool>,
    total_polls: AtomicU64,
    last_poll_duration_ms: AtomicU64,
    logger: StructuredLogger,
}

impl Bridge {
    /// Validate the configuration and connect to the vendor cloud over HTTP
    pub fn init(config: Config) -> Result<Arc<Self>> {
        config.validate()?;
        let api: Arc<dyn VendorApi> = Arc::new(ByteWattClient::new(&config.account)?);
        Ok(Self::with_api(config, api))
    }

    /// Build a bridge around any vendor API implementation
    pub fn with_api(config: Config, api: Arc<dyn VendorApi>) -> Arc<Self> {
        let retry = RetryPolicy::from_config(&config.retry);
        let interrupt = Arc::new(BackoffInterrupt::new());
        let session = Arc::new(SessionManager::new(api.clone(), &config.account));
        let poller = Poller::new(
            api.clone(),
            session.clone(),
            retry.clone(),
            interrupt.clone(),
            &config.poll,
        );
        let synchronizer =
            SettingsSynchronizer::new(api, session.clone(), retry, interrupt.clone());
        let health =
            HealthMonitor::new(config.health.failure_threshold, session.clone(), interrupt);

        let initial = Arc::new(BridgeSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            realtime: None,
            statistics: None,
            daily: None,
            settings: None,
            health: health.check_health(),
            total_polls: 0,
            last_poll_duration_ms: None,
            poll_interval_ms: config.poll.interval_ms,
        });
        let (snapshot_tx, _) = watch::channel(initial);
        let (shutdown_tx, _) = watch::channel(false);
        let logger = get_logger_with_context(
            LogContext::new("bridge").with_account(&config.account.username),
        );

        Arc::new(Self {
            config,
            session,
            poller,
            synchronizer,
            health,
            snapshot_tx,
            shutdown_tx,
            total_polls: AtomicU64::new(0),
            last_poll_duration_ms: AtomicU64::new(0),
            logger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Drive the poll loop until [`Bridge::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow_and_update() {
            return Ok(());
        }

        self.logger.info(&format!(
            "Poll loop started, interval {} ms, statistics every {} cycles",
            self.config.poll.interval_ms, self.config.poll.statistics_every
        ));
        let mut ticker = interval(Duration::from_millis(self.config.poll.interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors end up in the health monitor; the loop keeps going
                    let _ = self.tick().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        self.logger.info("Shutdown signal received");
                        break;
                    }
                }
            }
        }

        self.logger.info("Poll loop stopped");
        Ok(())
    }

    /// One poll cycle including health bookkeeping and snapshot publication
    pub async fn tick(&self) -> Result<PollOutcome> {
        let started = Instant::now();
        let result = self.poller.poll_once().await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.total_polls.fetch_add(1, Ordering::Relaxed);
        self.last_poll_duration_ms.store(elapsed_ms, Ordering::Relaxed);

        match &result {
            Ok(outcome) => {
                self.health.record_success();
                if outcome.statistics_due
                    && let Err(e) = self.synchronizer.refresh().await
                {
                    self.logger.warn(&format!("Settings refresh failed: {}", e));
                }
            }
            Err(BridgeError::Interrupted { .. }) => {
                self.logger.info("Poll cycle abandoned for reconnect");
            }
            Err(e) => {
                self.logger.error(&format!("Poll cycle failed: {}", e));
                self.health.record_failure(e);
            }
        }

        self.publish();
        result
    }

    pub async fn apply_settings(&self, patch: SettingsPatch) -> Result<ApplyOutcome> {
        let outcome = self.synchronizer.apply_settings(patch).await;
        if matches!(outcome, Ok(ApplyOutcome::Applied { .. })) {
            self.publish();
        }
        outcome
    }

    pub async fn force_reconnect(&self) {
        self.health.force_reconnect().await;
        self.publish();
    }

    pub fn check_health(&self) -> HealthReport {
        self.health.check_health()
    }

    pub fn confirmed_settings(&self) -> Option<ScheduleSettings> {
        self.synchronizer.confirmed()
    }

    /// Read the vendor settings now instead of waiting for the statistics cadence
    pub async fn refresh_settings(&self) -> Result<ScheduleSettings> {
        let settings = self.synchronizer.refresh().await?;
        self.publish();
        Ok(settings)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<BridgeSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<BridgeSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Resolves once [`Bridge::shutdown`] has been called
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    fn publish(&self) {
        let latest = self.poller.latest();
        let total_polls = self.total_polls.load(Ordering::Relaxed);
        let snapshot = BridgeSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            realtime: latest.realtime,
            statistics: latest.statistics,
            daily: latest.daily,
            settings: self.synchronizer.confirmed(),
            health: self.health.check_health(),
            total_polls,
            last_poll_duration_ms: (total_polls > 0)
                .then(|| self.last_poll_duration_ms.load(Ordering::Relaxed)),
            poll_interval_ms: self.config.poll.interval_ms,
        };
        self.snapshot_tx.send_replace(Arc::new(snapshot));
    }
}
