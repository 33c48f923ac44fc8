//! Retry policy with exponential backoff
//!
//! Poller and settings synchronizer share one [`RetryPolicy`]. Only transient
//! errors (network, timeout) are retried; every other error is returned on
//! the attempt that produced it. Backoff sleeps go through a
//! [`BackoffInterrupt`] so a reconnect request can cut them short.

use crate::config::RetryConfig;
use crate::error::{BridgeError, Result};
use crate::logging::get_logger;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter: bool,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    /// Backoff before retry number `retry` (0 = after the first failure)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.min(32));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor).min(cap_ms);
        if self.jitter && delay_ms > 0 {
            // Equal jitter: keep at least half of the computed delay
            let low = delay_ms / 2;
            Duration::from_millis(rand::thread_rng().gen_range(low..=delay_ms))
        } else {
            Duration::from_millis(delay_ms)
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        interrupt: &BackoffInterrupt,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let logger = get_logger("retry");
        // Reconnects requested from here on cut the next backoff short
        let generation = interrupt.generation();
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        logger.info(&format!("{} succeeded on attempt {}", label, attempt));
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt - 1);
                    logger.warn(&format!(
                        "{} failed (attempt {}/{}): {}; retrying in {} ms",
                        label,
                        attempt,
                        self.max_attempts,
                        e,
                        delay.as_millis()
                    ));
                    interrupt.sleep(delay, generation).await?;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        logger.error(&format!(
                            "{} failed after {} attempts: {}",
                            label, attempt, e
                        ));
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Reconnect generation counter shared by every retry loop
///
/// A trigger is remembered: a backoff that starts after a reconnect was
/// requested during its in-flight call returns immediately.
#[derive(Debug)]
pub struct BackoffInterrupt {
    generation: watch::Sender<u64>,
}

impl Default for BackoffInterrupt {
    fn default() -> Self {
        Self {
            generation: watch::Sender::new(0),
        }
    }
}

impl BackoffInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reconnects requested so far
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Sleep for `duration` unless a reconnect is requested after `since`
    pub async fn sleep(&self, duration: Duration, since: u64) -> Result<()> {
        let mut rx = self.generation.subscribe();
        tokio::select! {
            _ = rx.wait_for(|current| *current != since) => Err(BridgeError::interrupted(
                "Backoff sleep interrupted by reconnect request",
            )),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Interrupt pending backoffs and those of calls already in flight
    pub fn trigger(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }
}
