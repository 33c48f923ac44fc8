//! Reconciliation of desired schedule settings with the vendor
//!
//! The synchronizer keeps the last confirmed remote state together with the
//! raw vendor object it came from. An application validates the patch, merges
//! it onto the confirmed state and only talks to the vendor when something
//! actually changes. The vendor expects the whole configuration object on
//! update, so the last raw object is sent back with the changed keys
//! overwritten. A read-back afterwards becomes the new confirmed state.

use crate::api::VendorApi;
use crate::error::Result;
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::retry::{BackoffInterrupt, RetryPolicy};
use crate::session::SessionManager;
use crate::settings::{ScheduleSettings, SettingsPatch};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

/// Result of [`SettingsSynchronizer::apply_settings`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ApplyOutcome {
    /// Nothing to change; no update was sent
    Unchanged { settings: Option<ScheduleSettings> },
    /// One update was sent and the settings were read back
    Applied {
        changed: Vec<&'static str>,
        clamped: Vec<&'static str>,
        requested: ScheduleSettings,
        confirmed: ScheduleSettings,
        converged: bool,
    },
}

#[derive(Default)]
struct Confirmed {
    settings: Option<ScheduleSettings>,
    raw: Option<Value>,
}

pub struct SettingsSynchronizer {
    api: Arc<dyn VendorApi>,
    session: Arc<SessionManager>,
    retry: RetryPolicy,
    interrupt: Arc<BackoffInterrupt>,
    confirmed: Mutex<Confirmed>,
    /// Copy of the confirmed settings readable during an exchange
    published: std::sync::Mutex<Option<ScheduleSettings>>,
    logger: StructuredLogger,
}

impl SettingsSynchronizer {
    pub fn new(
        api: Arc<dyn VendorApi>,
        session: Arc<SessionManager>,
        retry: RetryPolicy,
        interrupt: Arc<BackoffInterrupt>,
    ) -> Self {
        Self {
            api,
            session,
            retry,
            interrupt,
            confirmed: Mutex::new(Confirmed::default()),
            published: std::sync::Mutex::new(None),
            logger: get_logger_with_context(LogContext::new("settings")),
        }
    }

    /// Last settings confirmed by a vendor read; never waits for an exchange
    pub fn confirmed(&self) -> Option<ScheduleSettings> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn confirm(&self, confirmed: &mut Confirmed, settings: ScheduleSettings, raw: Value) {
        *self.published.lock().unwrap_or_else(PoisonError::into_inner) = Some(settings.clone());
        confirmed.settings = Some(settings);
        confirmed.raw = Some(raw);
    }

    pub async fn apply_settings(&self, patch: SettingsPatch) -> Result<ApplyOutcome> {
        let change = patch.validate()?;
        for field in &change.clamped {
            self.logger
                .warn(&format!("{} outside 1-100, clamped", field));
        }

        let mut confirmed = self.confirmed.lock().await;
        if patch.is_empty() {
            return Ok(ApplyOutcome::Unchanged {
                settings: confirmed.settings.clone(),
            });
        }

        let _exchange = self.session.lock_exchange().await;

        let (current, raw) = match (confirmed.settings.clone(), confirmed.raw.clone()) {
            (Some(settings), Some(raw)) => (settings, raw),
            _ => {
                self.logger
                    .info("No confirmed settings yet, reading baseline");
                let (settings, raw) = self.read_remote().await?;
                self.confirm(&mut confirmed, settings.clone(), raw.clone());
                (settings, raw)
            }
        };

        let desired = change.apply_to(&current);
        let changed = desired.diff(&current);
        if changed.is_empty() {
            self.logger.debug("Requested settings already in place");
            return Ok(ApplyOutcome::Unchanged {
                settings: Some(current),
            });
        }

        self.logger.info(&format!(
            "Updating {}: charge {}-{}, discharge {}-{}, min SOC {}%, cap {}%, grid charging {}",
            changed.join(", "),
            desired.charge_start,
            desired.charge_end,
            desired.discharge_start,
            desired.discharge_end,
            desired.min_soc,
            desired.charge_cap,
            desired.grid_charging
        ));

        let payload = desired.to_vendor(&raw);
        let payload = &payload;
        self.retry
            .run("Settings update", &self.interrupt, || {
                self.session.with_session(move |session| async move {
                    self.api.update_settings(session.token(), payload).await
                })
            })
            .await?;

        let (read_back, read_back_raw) = self.read_remote().await?;
        let converged = read_back == desired;
        if converged {
            self.logger.info("Vendor confirmed the new settings");
        } else {
            self.logger.warn(&format!(
                "Vendor settings differ from the request after update: {}",
                read_back.diff(&desired).join(", ")
            ));
        }
        self.confirm(&mut confirmed, read_back.clone(), read_back_raw);

        Ok(ApplyOutcome::Applied {
            changed,
            clamped: change.clamped,
            requested: desired,
            confirmed: read_back,
            converged,
        })
    }

    /// Re-read the vendor settings so changes made elsewhere become confirmed
    pub async fn refresh(&self) -> Result<ScheduleSettings> {
        let mut confirmed = self.confirmed.lock().await;
        let _exchange = self.session.lock_exchange().await;
        let (settings, raw) = self.read_remote().await?;
        if confirmed.settings.as_ref() != Some(&settings) {
            self.logger.info(&format!(
                "Confirmed settings now charge {}-{}, discharge {}-{}, min SOC {}%, cap {}%",
                settings.charge_start,
                settings.charge_end,
                settings.discharge_start,
                settings.discharge_end,
                settings.min_soc,
                settings.charge_cap
            ));
        }
        self.confirm(&mut confirmed, settings.clone(), raw);
        Ok(settings)
    }

    async fn read_remote(&self) -> Result<(ScheduleSettings, Value)> {
        let raw = self
            .retry
            .run("Settings read", &self.interrupt, || {
                self.session.with_session(move |session| async move {
                    self.api.fetch_settings(session.token()).await
                })
            })
            .await?;
        let settings = ScheduleSettings::from_vendor(&raw)?;
        Ok((settings, raw))
    }
}
