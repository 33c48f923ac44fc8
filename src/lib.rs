//! # Byte-Watt Bridge - cloud bridge for Byte-Watt home batteries
//!
//! Keeps an authenticated session with the vendor cloud, polls live power
//! flows and cumulative energy statistics on a fixed cadence, and reconciles
//! the battery's charge/discharge schedule with a desired configuration.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `api`: Vendor cloud HTTP client behind the `VendorApi` trait
//! - `session`: Single-flight login and token lifecycle
//! - `retry`: Exponential backoff with jitter and reconnect interruption
//! - `metrics`: Normalization of vendor payloads into typed metrics
//! - `settings`: Schedule settings, patches and validation
//! - `poller`: Periodic metric collection
//! - `synchronizer`: Idempotent settings reconciliation
//! - `health`: Failure tracking and forced reconnect
//! - `bridge`: Composition root and snapshot publication
//! - `web`: HTTP control API

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod retry;
pub mod session;
pub mod settings;
pub mod synchronizer;
pub mod web;

// Re-export commonly used types
pub use bridge::{Bridge, BridgeSnapshot};
pub use config::Config;
pub use error::{BridgeError, Result};
