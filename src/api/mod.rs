//! Vendor cloud API for Byte-Watt / Neovolt battery systems
//!
//! [`VendorApi`] is the seam between the bridge core and the HTTP transport.
//! Every method returns the unwrapped `data` member of the vendor envelope;
//! normalization into typed metrics happens in [`crate::metrics`] and
//! [`crate::settings`].

use crate::error::Result;
use serde_json::Value;

pub mod client;
pub mod types;

pub use client::ByteWattClient;
pub use types::{Envelope, extract_token};

pub const LOGIN_PATH: &str = "/api/usercenter/cloud/user/login";
pub const REALTIME_PATH: &str = "/api/report/energyStorage/getLastPowerData";
pub const STATISTICS_PATH: &str = "/api/report/energy/getEnergyStatistics";
pub const DAILY_PATH: &str = "/api/stable/home/getSumDataForCustomer";
pub const SETTINGS_READ_PATH: &str = "/api/iterate/sysSet/getChargeConfigInfo";
pub const SETTINGS_UPDATE_PATH: &str = "/api/iterate/sysSet/updateChargeConfigInfo";

/// Operations the bridge needs from the vendor cloud
#[async_trait::async_trait]
pub trait VendorApi: Send + Sync {
    /// Authenticate and return a bearer token
    async fn login(&self, username: &str, password: &str) -> Result<String>;

    /// Latest power-flow sample
    async fn fetch_realtime(&self, token: &str) -> Result<Value>;

    /// Cumulative energy totals since commissioning
    async fn fetch_statistics(&self, token: &str) -> Result<Value>;

    /// Today's summary
    async fn fetch_daily(&self, token: &str) -> Result<Value>;

    /// Full charge/discharge configuration object
    async fn fetch_settings(&self, token: &str) -> Result<Value>;

    /// Replace the charge/discharge configuration object
    async fn update_settings(&self, token: &str, payload: &Value) -> Result<()>;
}
