//! Charge/discharge schedule settings
//!
//! [`ScheduleSettings`] is the typed view of the vendor's charge configuration
//! object. [`SettingsPatch`] is partial user intent as it arrives over HTTP;
//! validating it yields a [`SettingsChange`] with canonical times and SOC
//! values clamped into range.

use crate::error::{BridgeError, Result};
use crate::metrics::numeric;
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::fmt;

pub const SOC_MIN: u8 = 1;
pub const SOC_MAX: u8 = 100;

const KEY_CHARGE_START: &str = "timeChaf1";
const KEY_CHARGE_END: &str = "timeChae1";
const KEY_DISCHARGE_START: &str = "timeDisf1";
const KEY_DISCHARGE_END: &str = "timeDise1";
const KEY_MIN_SOC: &str = "batUseCap";
const KEY_CHARGE_CAP: &str = "batHighCap";
const KEY_GRID_CHARGE: &str = "gridCharge";

/// Time of day with minute resolution, rendered as `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    /// Accepts `H:MM`, `HH:MM`, `HH:MM:SS`, `h:MM AM`, `h:MMPM` and `h AM`
    pub fn parse(input: &str) -> Result<Self> {
        const FORMATS: [&str; 4] = ["%H:%M", "%H:%M:%S", "%I:%M %p", "%I:%M%p"];

        let normalized = expand_bare_hour(&input.trim().to_ascii_uppercase());
        if normalized.is_empty() {
            return Err(BridgeError::validation("time", "Time cannot be empty"));
        }

        let mut last_err = None;
        for format in FORMATS {
            match NaiveTime::parse_from_str(&normalized, format) {
                Ok(t) => {
                    return Self::new(t.hour(), t.minute()).ok_or_else(|| {
                        BridgeError::validation("time", format!("Invalid time '{}'", input))
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(BridgeError::from)
            .unwrap_or_else(|| BridgeError::validation("time", "Unrecognized time")))
    }
}

// "7 AM" -> "7:00 AM"
fn expand_bare_hour(s: &str) -> String {
    for suffix in ["AM", "PM"] {
        if let Some(head) = s.strip_suffix(suffix) {
            let head = head.trim_end();
            if !head.is_empty() && !head.contains(':') {
                return format!("{}:00 {}", head, suffix);
            }
        }
    }
    s.to_string()
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0.hour(), self.0.minute())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TimeOfDay::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Confirmed or desired battery schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub charge_start: TimeOfDay,
    pub charge_end: TimeOfDay,
    pub discharge_start: TimeOfDay,
    pub discharge_end: TimeOfDay,
    /// Minimum SOC kept in reserve (%)
    pub min_soc: u8,
    /// Maximum SOC when charging (%)
    pub charge_cap: u8,
    pub grid_charging: bool,
}

impl ScheduleSettings {
    /// Read the schedule out of the vendor configuration object
    pub fn from_vendor(data: &Value) -> Result<Self> {
        let map = data
            .as_object()
            .ok_or_else(|| BridgeError::data("Settings payload is not an object"))?;
        Ok(Self {
            charge_start: vendor_time(map, KEY_CHARGE_START)?,
            charge_end: vendor_time(map, KEY_CHARGE_END)?,
            discharge_start: vendor_time(map, KEY_DISCHARGE_START)?,
            discharge_end: vendor_time(map, KEY_DISCHARGE_END)?,
            min_soc: vendor_percent(map, KEY_MIN_SOC)?,
            charge_cap: vendor_percent(map, KEY_CHARGE_CAP)?,
            grid_charging: vendor_flag(map, KEY_GRID_CHARGE)?,
        })
    }

    /// Overlay the schedule onto the last vendor object, keeping every other key
    pub fn to_vendor(&self, base: &Value) -> Value {
        let mut map = base.as_object().cloned().unwrap_or_default();
        map.insert(KEY_CHARGE_START.into(), json!(self.charge_start.to_string()));
        map.insert(KEY_CHARGE_END.into(), json!(self.charge_end.to_string()));
        map.insert(
            KEY_DISCHARGE_START.into(),
            json!(self.discharge_start.to_string()),
        );
        map.insert(KEY_DISCHARGE_END.into(), json!(self.discharge_end.to_string()));
        map.insert(KEY_MIN_SOC.into(), json!(self.min_soc));
        map.insert(KEY_CHARGE_CAP.into(), json!(self.charge_cap));
        map.insert(KEY_GRID_CHARGE.into(), json!(u8::from(self.grid_charging)));
        Value::Object(map)
    }

    /// Names of the fields that differ from `other`
    pub fn diff(&self, other: &ScheduleSettings) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.charge_start != other.charge_start {
            changed.push("charge_start");
        }
        if self.charge_end != other.charge_end {
            changed.push("charge_end");
        }
        if self.discharge_start != other.discharge_start {
            changed.push("discharge_start");
        }
        if self.discharge_end != other.discharge_end {
            changed.push("discharge_end");
        }
        if self.min_soc != other.min_soc {
            changed.push("min_soc");
        }
        if self.charge_cap != other.charge_cap {
            changed.push("charge_cap");
        }
        if self.grid_charging != other.grid_charging {
            changed.push("grid_charging");
        }
        changed
    }
}

fn vendor_field<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    map.get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| BridgeError::data(format!("Settings payload lacks {}", key)))
}

fn vendor_time(map: &Map<String, Value>, key: &str) -> Result<TimeOfDay> {
    let raw = vendor_field(map, key)?
        .as_str()
        .ok_or_else(|| BridgeError::data(format!("{} is not a string", key)))?;
    TimeOfDay::parse(raw).map_err(|e| BridgeError::data(format!("{}: {}", key, e)))
}

fn vendor_percent(map: &Map<String, Value>, key: &str) -> Result<u8> {
    let v = numeric(vendor_field(map, key)?)
        .ok_or_else(|| BridgeError::data(format!("{} is not numeric", key)))?
        .round();
    if !(0.0..=100.0).contains(&v) {
        return Err(BridgeError::data(format!("{} out of range: {}", key, v)));
    }
    Ok(v as u8)
}

fn vendor_flag(map: &Map<String, Value>, key: &str) -> Result<bool> {
    let value = vendor_field(map, key)?;
    match value {
        Value::Bool(b) => Ok(*b),
        other => numeric(other)
            .map(|n| n != 0.0)
            .ok_or_else(|| BridgeError::data(format!("{} is not a flag", key))),
    }
}

/// Partial settings as requested by a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsPatch {
    pub charge_start: Option<String>,
    pub charge_end: Option<String>,
    pub discharge_start: Option<String>,
    pub discharge_end: Option<String>,
    pub min_soc: Option<f64>,
    pub charge_cap: Option<f64>,
    pub grid_charging: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.charge_start.is_none()
            && self.charge_end.is_none()
            && self.discharge_start.is_none()
            && self.discharge_end.is_none()
            && self.min_soc.is_none()
            && self.charge_cap.is_none()
            && self.grid_charging.is_none()
    }

    /// Check every field; nothing here touches the network
    pub fn validate(&self) -> Result<SettingsChange> {
        let mut clamped = Vec::new();
        Ok(SettingsChange {
            charge_start: patch_time("charge_start", &self.charge_start)?,
            charge_end: patch_time("charge_end", &self.charge_end)?,
            discharge_start: patch_time("discharge_start", &self.discharge_start)?,
            discharge_end: patch_time("discharge_end", &self.discharge_end)?,
            min_soc: patch_soc("min_soc", self.min_soc, &mut clamped)?,
            charge_cap: patch_soc("charge_cap", self.charge_cap, &mut clamped)?,
            grid_charging: self.grid_charging,
            clamped,
        })
    }
}

fn patch_time(field: &'static str, value: &Option<String>) -> Result<Option<TimeOfDay>> {
    value
        .as_deref()
        .map(|raw| {
            TimeOfDay::parse(raw).map_err(|_| {
                BridgeError::validation(field, format!("Unrecognized time '{}'", raw))
            })
        })
        .transpose()
}

fn patch_soc(
    field: &'static str,
    value: Option<f64>,
    clamped: &mut Vec<&'static str>,
) -> Result<Option<u8>> {
    let Some(v) = value else {
        return Ok(None);
    };
    if !v.is_finite() {
        return Err(BridgeError::validation(field, "Must be a finite number"));
    }
    let rounded = v.round();
    let bounded = rounded.clamp(f64::from(SOC_MIN), f64::from(SOC_MAX));
    if bounded != rounded {
        clamped.push(field);
    }
    Ok(Some(bounded as u8))
}

/// Validated patch ready to merge onto a confirmed state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsChange {
    pub charge_start: Option<TimeOfDay>,
    pub charge_end: Option<TimeOfDay>,
    pub discharge_start: Option<TimeOfDay>,
    pub discharge_end: Option<TimeOfDay>,
    pub min_soc: Option<u8>,
    pub charge_cap: Option<u8>,
    pub grid_charging: Option<bool>,
    /// Fields whose value was pulled into range
    pub clamped: Vec<&'static str>,
}

impl SettingsChange {
    pub fn apply_to(&self, base: &ScheduleSettings) -> ScheduleSettings {
        ScheduleSettings {
            charge_start: self.charge_start.unwrap_or(base.charge_start),
            charge_end: self.charge_end.unwrap_or(base.charge_end),
            discharge_start: self.discharge_start.unwrap_or(base.discharge_start),
            discharge_end: self.discharge_end.unwrap_or(base.discharge_end),
            min_soc: self.min_soc.unwrap_or(base.min_soc),
            charge_cap: self.charge_cap.unwrap_or(base.charge_cap),
            grid_charging: self.grid_charging.unwrap_or(base.grid_charging),
        }
    }
}
