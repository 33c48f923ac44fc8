#![allow(dead_code)]

use async_trait::async_trait;
use bytewatt_bridge::api::VendorApi;
use bytewatt_bridge::config::Config;
use bytewatt_bridge::error::{BridgeError, Result};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Config with fast retries and small thresholds
pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.account.username = "owner@example.com".to_string();
    cfg.account.password = "secret".to_string();
    cfg.poll.interval_ms = 10;
    cfg.poll.statistics_every = 3;
    cfg.retry.max_attempts = 3;
    cfg.retry.base_delay_ms = 1;
    cfg.retry.max_delay_ms = 5;
    cfg.retry.jitter = false;
    cfg.health.failure_threshold = 3;
    cfg.web.enabled = false;
    cfg
}

pub fn realtime_payload(soc: f64) -> Value {
    json!({
        "soc": soc,
        "pgrid": -150,
        "pload": 420,
        "pbat": 300,
        "ppv": 870,
        "createTime": "2025-06-01 12:00:00"
    })
}

pub fn statistics_payload(solar: f64) -> Value {
    json!({
        "epvT": solar,
        "eout": 800.5,
        "echarge": 900.0,
        "epv2load": 700.0,
        "epvcharge": 650.0,
        "eload": 1500.0,
        "egridCharge": 20.0,
        "einput": 600.0
    })
}

pub fn daily_payload() -> Value {
    json!({
        "epvtoday": 12.4,
        "eload": 9.8,
        "eselfConsumption": 0.8123,
        "carbonNum": 1234.0
    })
}

pub fn settings_payload() -> Value {
    json!({
        "sysSn": "AL2002321010043",
        "timeChaf1": "14:00",
        "timeChae1": "16:00",
        "timeDisf1": "16:00",
        "timeDise1": "06:00",
        "batUseCap": 10,
        "batHighCap": 100,
        "gridCharge": 1,
        "ctrDis": 1
    })
}

#[derive(Default)]
struct Script {
    valid_token: Option<String>,
    realtime: VecDeque<Result<Value>>,
    statistics: VecDeque<Result<Value>>,
    daily: VecDeque<Result<Value>>,
    login: VecDeque<BridgeError>,
    settings: Option<Value>,
    updates: Vec<Value>,
    ignore_updates: bool,
    realtime_delay: Duration,
}

/// In-memory vendor cloud with call counters and scripted responses
pub struct FakeVendorApi {
    pub logins: AtomicU32,
    pub realtime_calls: AtomicU32,
    pub statistics_calls: AtomicU32,
    pub daily_calls: AtomicU32,
    pub settings_reads: AtomicU32,
    pub update_calls: AtomicU32,
    login_delay: Duration,
    script: Mutex<Script>,
}

impl Default for FakeVendorApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVendorApi {
    pub fn new() -> Self {
        Self::with_login_delay(Duration::ZERO)
    }

    pub fn with_login_delay(login_delay: Duration) -> Self {
        Self {
            logins: AtomicU32::new(0),
            realtime_calls: AtomicU32::new(0),
            statistics_calls: AtomicU32::new(0),
            daily_calls: AtomicU32::new(0),
            settings_reads: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
            login_delay,
            script: Mutex::new(Script {
                settings: Some(settings_payload()),
                ..Script::default()
            }),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn queue_realtime(&self, response: Result<Value>) {
        self.script().realtime.push_back(response);
    }

    pub fn queue_statistics(&self, response: Result<Value>) {
        self.script().statistics.push_back(response);
    }

    pub fn queue_daily(&self, response: Result<Value>) {
        self.script().daily.push_back(response);
    }

    pub fn fail_next_login(&self, error: BridgeError) {
        self.script().login.push_back(error);
    }

    /// Hold every realtime response for `delay`
    pub fn delay_realtime(&self, delay: Duration) {
        self.script().realtime_delay = delay;
    }

    /// Make the vendor forget the current token
    pub fn expire_token(&self) {
        self.script().valid_token = None;
    }

    /// Accept updates without changing the stored settings
    pub fn ignore_updates(&self) {
        self.script().ignore_updates = true;
    }

    pub fn set_settings(&self, settings: Value) {
        self.script().settings = Some(settings);
    }

    pub fn updates(&self) -> Vec<Value> {
        self.script().updates.clone()
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    fn check_token(&self, token: &str) -> Result<()> {
        match self.script().valid_token.as_deref() {
            Some(valid) if valid == token => Ok(()),
            _ => Err(BridgeError::auth("token expired")),
        }
    }
}

#[async_trait]
impl VendorApi for FakeVendorApi {
    async fn login(&self, username: &str, password: &str) -> Result<String> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }
        if let Some(err) = self.script().login.pop_front() {
            return Err(err);
        }
        if username != "owner@example.com" || password != "secret" {
            return Err(BridgeError::auth("bad credentials"));
        }
        let token = format!("token-{}", n);
        self.script().valid_token = Some(token.clone());
        Ok(token)
    }

    async fn fetch_realtime(&self, token: &str) -> Result<Value> {
        self.realtime_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(token)?;
        let delay = self.script().realtime_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script()
            .realtime
            .pop_front()
            .unwrap_or_else(|| Ok(realtime_payload(55.0)))
    }

    async fn fetch_statistics(&self, token: &str) -> Result<Value> {
        self.statistics_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(token)?;
        self.script()
            .statistics
            .pop_front()
            .unwrap_or_else(|| Ok(statistics_payload(2500.0)))
    }

    async fn fetch_daily(&self, token: &str) -> Result<Value> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(token)?;
        self.script()
            .daily
            .pop_front()
            .unwrap_or_else(|| Ok(daily_payload()))
    }

    async fn fetch_settings(&self, token: &str) -> Result<Value> {
        self.settings_reads.fetch_add(1, Ordering::SeqCst);
        self.check_token(token)?;
        self.script()
            .settings
            .clone()
            .ok_or_else(|| BridgeError::data("no settings"))
    }

    async fn update_settings(&self, token: &str, payload: &Value) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_token(token)?;
        let mut script = self.script();
        script.updates.push(payload.clone());
        if !script.ignore_updates {
            script.settings = Some(payload.clone());
        }
        Ok(())
    }
}
