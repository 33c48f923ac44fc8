//! Normalization of vendor payloads into typed metrics
//!
//! Each payload kind has a fixed table from vendor key to metric. Keys not in
//! the table are collected as "unmapped" for debug logging. A mapped key that
//! is missing or not numeric leaves that one metric unavailable.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of normalizing one payload
#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub metrics: T,
    /// Vendor keys with no entry in the mapping table
    pub unmapped: Vec<String>,
    /// Mapped keys whose value could not be read as a number
    pub invalid: Vec<String>,
}

/// Latest power-flow sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMetrics {
    /// Grid power in W (positive = import)
    pub grid_power_w: Option<f64>,
    pub load_power_w: Option<f64>,
    /// Battery power in W (positive = discharge)
    pub battery_power_w: Option<f64>,
    pub pv_power_w: Option<f64>,
    pub soc_percent: Option<f64>,
    /// Vendor sample time as reported
    pub sample_time: Option<String>,
}

impl RealtimeMetrics {
    pub fn available_count(&self) -> usize {
        [
            self.grid_power_w,
            self.load_power_w,
            self.battery_power_w,
            self.pv_power_w,
            self.soc_percent,
        ]
        .iter()
        .filter(|v| v.is_some())
        .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RealtimeField {
    GridPower,
    LoadPower,
    BatteryPower,
    PvPower,
    Soc,
    SampleTime,
}

// Short keys first; older gateways report the long names
const REALTIME_KEYS: &[(&str, RealtimeField)] = &[
    ("pgrid", RealtimeField::GridPower),
    ("pload", RealtimeField::LoadPower),
    ("pbat", RealtimeField::BatteryPower),
    ("ppv", RealtimeField::PvPower),
    ("soc", RealtimeField::Soc),
    ("createTime", RealtimeField::SampleTime),
    ("gridConsumption", RealtimeField::GridPower),
    ("houseConsumption", RealtimeField::LoadPower),
    ("battery", RealtimeField::BatteryPower),
    ("pv", RealtimeField::PvPower),
];

/// Cumulative energy totals in kWh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyStatistics {
    pub solar_generation_kwh: Option<f64>,
    pub feed_in_kwh: Option<f64>,
    pub battery_charge_kwh: Option<f64>,
    pub pv_to_load_kwh: Option<f64>,
    pub pv_to_battery_kwh: Option<f64>,
    pub house_consumption_kwh: Option<f64>,
    pub grid_charge_kwh: Option<f64>,
    pub grid_consumption_kwh: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatisticsField {
    SolarGeneration,
    FeedIn,
    BatteryCharge,
    PvToLoad,
    PvToBattery,
    HouseConsumption,
    GridCharge,
    GridConsumption,
}

const STATISTICS_FIELDS: [StatisticsField; 8] = [
    StatisticsField::SolarGeneration,
    StatisticsField::FeedIn,
    StatisticsField::BatteryCharge,
    StatisticsField::PvToLoad,
    StatisticsField::PvToBattery,
    StatisticsField::HouseConsumption,
    StatisticsField::GridCharge,
    StatisticsField::GridConsumption,
];

impl StatisticsField {
    fn name(self) -> &'static str {
        match self {
            Self::SolarGeneration => "solar_generation_kwh",
            Self::FeedIn => "feed_in_kwh",
            Self::BatteryCharge => "battery_charge_kwh",
            Self::PvToLoad => "pv_to_load_kwh",
            Self::PvToBattery => "pv_to_battery_kwh",
            Self::HouseConsumption => "house_consumption_kwh",
            Self::GridCharge => "grid_charge_kwh",
            Self::GridConsumption => "grid_consumption_kwh",
        }
    }
}

const STATISTICS_KEYS: &[(&str, StatisticsField)] = &[
    ("epvT", StatisticsField::SolarGeneration),
    ("eout", StatisticsField::FeedIn),
    ("echarge", StatisticsField::BatteryCharge),
    ("epv2load", StatisticsField::PvToLoad),
    ("epvcharge", StatisticsField::PvToBattery),
    ("eload", StatisticsField::HouseConsumption),
    ("egridCharge", StatisticsField::GridCharge),
    ("einput", StatisticsField::GridConsumption),
];

impl EnergyStatistics {
    fn slot(&mut self, field: StatisticsField) -> &mut Option<f64> {
        match field {
            StatisticsField::SolarGeneration => &mut self.solar_generation_kwh,
            StatisticsField::FeedIn => &mut self.feed_in_kwh,
            StatisticsField::BatteryCharge => &mut self.battery_charge_kwh,
            StatisticsField::PvToLoad => &mut self.pv_to_load_kwh,
            StatisticsField::PvToBattery => &mut self.pv_to_battery_kwh,
            StatisticsField::HouseConsumption => &mut self.house_consumption_kwh,
            StatisticsField::GridCharge => &mut self.grid_charge_kwh,
            StatisticsField::GridConsumption => &mut self.grid_consumption_kwh,
        }
    }

    /// Named view of every counter
    pub fn fields(&self) -> [(&'static str, Option<f64>); 8] {
        [
            ("solar_generation_kwh", self.solar_generation_kwh),
            ("feed_in_kwh", self.feed_in_kwh),
            ("battery_charge_kwh", self.battery_charge_kwh),
            ("pv_to_load_kwh", self.pv_to_load_kwh),
            ("pv_to_battery_kwh", self.pv_to_battery_kwh),
            ("house_consumption_kwh", self.house_consumption_kwh),
            ("grid_charge_kwh", self.grid_charge_kwh),
            ("grid_consumption_kwh", self.grid_consumption_kwh),
        ]
    }
}

/// Today's summary; resets every day so it is not monotonic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyStatistics {
    pub pv_today_kwh: Option<f64>,
    pub pv_total_kwh: Option<f64>,
    pub consumed_today_kwh: Option<f64>,
    pub feed_in_today_kwh: Option<f64>,
    pub grid_import_today_kwh: Option<f64>,
    pub battery_charged_today_kwh: Option<f64>,
    pub battery_discharged_today_kwh: Option<f64>,
    pub self_consumption_pct: Option<f64>,
    pub self_sufficiency_pct: Option<f64>,
    pub trees_planted: Option<f64>,
    pub co2_reduction_tons: Option<f64>,
    pub today_income: Option<f64>,
    pub total_income: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DailyField {
    PvToday,
    PvTotal,
    ConsumedToday,
    FeedInToday,
    GridImportToday,
    BatteryChargedToday,
    BatteryDischargedToday,
    SelfConsumption,
    SelfSufficiency,
    TreesPlanted,
    Co2Reduction,
    TodayIncome,
    TotalIncome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    Identity,
    /// Vendor ratio 0..1 to percent
    Percent,
    KgToTons,
}

const DAILY_KEYS: &[(&str, DailyField, Scale)] = &[
    ("epvtoday", DailyField::PvToday, Scale::Identity),
    ("epvtotal", DailyField::PvTotal, Scale::Identity),
    ("eload", DailyField::ConsumedToday, Scale::Identity),
    ("eoutput", DailyField::FeedInToday, Scale::Identity),
    ("einput", DailyField::GridImportToday, Scale::Identity),
    ("echarge", DailyField::BatteryChargedToday, Scale::Identity),
    ("edischarge", DailyField::BatteryDischargedToday, Scale::Identity),
    ("eselfConsumption", DailyField::SelfConsumption, Scale::Percent),
    ("eselfSufficiency", DailyField::SelfSufficiency, Scale::Percent),
    ("treeNum", DailyField::TreesPlanted, Scale::Identity),
    ("carbonNum", DailyField::Co2Reduction, Scale::KgToTons),
    ("todayIncome", DailyField::TodayIncome, Scale::Identity),
    ("totalIncome", DailyField::TotalIncome, Scale::Identity),
];

impl DailyStatistics {
    fn slot(&mut self, field: DailyField) -> &mut Option<f64> {
        match field {
            DailyField::PvToday => &mut self.pv_today_kwh,
            DailyField::PvTotal => &mut self.pv_total_kwh,
            DailyField::ConsumedToday => &mut self.consumed_today_kwh,
            DailyField::FeedInToday => &mut self.feed_in_today_kwh,
            DailyField::GridImportToday => &mut self.grid_import_today_kwh,
            DailyField::BatteryChargedToday => &mut self.battery_charged_today_kwh,
            DailyField::BatteryDischargedToday => &mut self.battery_discharged_today_kwh,
            DailyField::SelfConsumption => &mut self.self_consumption_pct,
            DailyField::SelfSufficiency => &mut self.self_sufficiency_pct,
            DailyField::TreesPlanted => &mut self.trees_planted,
            DailyField::Co2Reduction => &mut self.co2_reduction_tons,
            DailyField::TodayIncome => &mut self.today_income,
            DailyField::TotalIncome => &mut self.total_income,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Numbers may arrive as JSON numbers or numeric strings
pub fn numeric(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// The vendor wraps per-system data in a list when `sysSn=All` covers one system
fn payload_object<'a>(data: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.as_object())
            .ok_or_else(|| BridgeError::data(format!("{} payload has no object entry", what))),
        Value::Null => Err(BridgeError::data(format!("{} payload is empty", what))),
        _ => Err(BridgeError::data(format!("{} payload is not an object", what))),
    }
}

fn lookup<F: Copy>(table: &[(&str, F)], key: &str) -> Option<F> {
    table.iter().find(|(k, _)| *k == key).map(|(_, f)| *f)
}

pub fn normalize_realtime(data: &Value) -> Result<Normalized<RealtimeMetrics>> {
    let map = payload_object(data, "Realtime")?;
    let mut out = Normalized {
        metrics: RealtimeMetrics::default(),
        unmapped: unmapped_keys(map, |k| lookup(REALTIME_KEYS, k).is_some()),
        invalid: Vec::new(),
    };

    for (key, field) in REALTIME_KEYS {
        let Some(value) = map.get(*key).filter(|v| !v.is_null()) else {
            continue;
        };
        let m = &mut out.metrics;
        let slot = match field {
            RealtimeField::GridPower => &mut m.grid_power_w,
            RealtimeField::LoadPower => &mut m.load_power_w,
            RealtimeField::BatteryPower => &mut m.battery_power_w,
            RealtimeField::PvPower => &mut m.pv_power_w,
            RealtimeField::Soc => &mut m.soc_percent,
            RealtimeField::SampleTime => {
                match value.as_str().filter(|s| !s.is_empty()) {
                    Some(s) => m.sample_time = Some(s.to_string()),
                    None => out.invalid.push(key.to_string()),
                }
                continue;
            }
        };
        if slot.is_some() {
            continue;
        }
        match numeric(value) {
            Some(v) => *slot = Some(v),
            None => out.invalid.push(key.to_string()),
        }
    }

    if out.metrics.available_count() == 0 {
        return Err(BridgeError::data(
            "Realtime payload contains no usable power fields",
        ));
    }
    Ok(out)
}

fn unmapped_keys(map: &Map<String, Value>, known: impl Fn(&str) -> bool) -> Vec<String> {
    map.keys().filter(|k| !known(k.as_str())).cloned().collect()
}

pub fn normalize_statistics(data: &Value) -> Result<Normalized<EnergyStatistics>> {
    let map = payload_object(data, "Statistics")?;
    let mut out = Normalized {
        metrics: EnergyStatistics::default(),
        unmapped: Vec::new(),
        invalid: Vec::new(),
    };
    for (key, value) in map {
        match lookup(STATISTICS_KEYS, key) {
            Some(field) => match numeric(value) {
                Some(v) => *out.metrics.slot(field) = Some(v),
                None if value.is_null() => {}
                None => out.invalid.push(key.clone()),
            },
            None => out.unmapped.push(key.clone()),
        }
    }
    Ok(out)
}

pub fn normalize_daily(data: &Value) -> Result<Normalized<DailyStatistics>> {
    let map = payload_object(data, "Daily")?;
    let mut out = Normalized {
        metrics: DailyStatistics::default(),
        unmapped: Vec::new(),
        invalid: Vec::new(),
    };
    for (key, value) in map {
        let Some((_, field, scale)) = DAILY_KEYS.iter().find(|(k, _, _)| *k == key.as_str())
        else {
            out.unmapped.push(key.clone());
            continue;
        };
        match numeric(value) {
            Some(v) => {
                let scaled = match scale {
                    Scale::Identity => v,
                    Scale::Percent => round2(v * 100.0),
                    Scale::KgToTons => round2(v / 1000.0),
                };
                *out.metrics.slot(*field) = Some(scaled);
            }
            None if value.is_null() => {}
            None => out.invalid.push(key.clone()),
        }
    }
    Ok(out)
}

/// Keeps the highest accepted value of every counter and rejects samples
/// where a counter went backwards by more than the tolerance
///
/// A counter missing from a sample keeps its previous value. A dip within
/// the tolerance is accepted but never lowers the stored counter.
#[derive(Debug, Clone)]
pub struct StatisticsGuard {
    tolerance_kwh: f64,
    last: Option<EnergyStatistics>,
}

impl StatisticsGuard {
    pub fn new(tolerance_kwh: f64) -> Self {
        Self {
            tolerance_kwh: tolerance_kwh.max(0.0),
            last: None,
        }
    }

    pub fn last(&self) -> Option<&EnergyStatistics> {
        self.last.as_ref()
    }

    /// Merge `next` into the stored counters unless one dropped past the tolerance
    pub fn accept(&mut self, mut next: EnergyStatistics) -> Result<&EnergyStatistics> {
        if let Some(prev) = self.last.as_mut() {
            for field in STATISTICS_FIELDS {
                let old = *prev.slot(field);
                let slot = next.slot(field);
                match (old, *slot) {
                    (Some(old), Some(new)) if new < old - self.tolerance_kwh => {
                        return Err(BridgeError::data(format!(
                            "Counter {} went backwards: {} -> {} kWh",
                            field.name(),
                            old,
                            new
                        )));
                    }
                    (Some(old), Some(new)) => *slot = Some(new.max(old)),
                    (Some(old), None) => *slot = Some(old),
                    (None, _) => {}
                }
            }
        }
        Ok(self.last.insert(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_realtime_mapping() {
        let data = json!({
            "soc": 76.5,
            "pgrid": -120,
            "pload": "430.5",
            "pbat": 310,
            "ppv": 860,
            "createTime": "2024-05-01 12:00:00",
            "sysSn": "AL1234",
            "pmeterDc": 0
        });
        let n = normalize_realtime(&data).unwrap();
        assert_eq!(n.metrics.soc_percent, Some(76.5));
        assert_eq!(n.metrics.grid_power_w, Some(-120.0));
        assert_eq!(n.metrics.load_power_w, Some(430.5));
        assert_eq!(n.metrics.battery_power_w, Some(310.0));
        assert_eq!(n.metrics.pv_power_w, Some(860.0));
        assert_eq!(n.metrics.sample_time.as_deref(), Some("2024-05-01 12:00:00"));
        assert_eq!(n.unmapped.len(), 2);
        assert!(n.invalid.is_empty());
    }

    #[test]
    fn test_realtime_single_field_degrades() {
        let n = normalize_realtime(&json!({"soc": 50, "ppv": "n/a"})).unwrap();
        assert_eq!(n.metrics.soc_percent, Some(50.0));
        assert_eq!(n.metrics.pv_power_w, None);
        assert_eq!(n.invalid, vec!["ppv".to_string()]);
    }

    #[test]
    fn test_realtime_legacy_alias_does_not_override() {
        let n = normalize_realtime(&json!({"gridConsumption": 5, "pgrid": 7})).unwrap();
        assert_eq!(n.metrics.grid_power_w, Some(7.0));
        let n = normalize_realtime(&json!({"houseConsumption": 300})).unwrap();
        assert_eq!(n.metrics.load_power_w, Some(300.0));
    }

    #[test]
    fn test_realtime_list_payload() {
        let n = normalize_realtime(&json!([{"soc": 12}])).unwrap();
        assert_eq!(n.metrics.soc_percent, Some(12.0));
    }

    #[test]
    fn test_realtime_malformed() {
        assert!(normalize_realtime(&json!(null)).is_err());
        assert!(normalize_realtime(&json!("oops")).is_err());
        assert!(normalize_realtime(&json!([])).is_err());
        assert!(normalize_realtime(&json!({"sysSn": "AL1"})).is_err());
    }

    #[test]
    fn test_statistics_mapping() {
        let data = json!({
            "epvT": 1520.4, "eout": 300.1, "echarge": 640.0, "epv2load": 700.2,
            "epvcharge": 500.0, "eload": 2100.9, "egridCharge": 12.5, "einput": 980.0,
            "edischarge": 600.0
        });
        let n = normalize_statistics(&data).unwrap();
        assert_eq!(n.metrics.solar_generation_kwh, Some(1520.4));
        assert_eq!(n.metrics.grid_consumption_kwh, Some(980.0));
        assert_eq!(n.unmapped, vec!["edischarge".to_string()]);
    }

    #[test]
    fn test_daily_scaling() {
        let data = json!({
            "epvtoday": 12.3, "eselfConsumption": 0.81234, "eselfSufficiency": 0.5,
            "carbonNum": 1234.0, "treeNum": 3
        });
        let n = normalize_daily(&data).unwrap();
        assert_eq!(n.metrics.pv_today_kwh, Some(12.3));
        assert_eq!(n.metrics.self_consumption_pct, Some(81.23));
        assert_eq!(n.metrics.self_sufficiency_pct, Some(50.0));
        assert_eq!(n.metrics.co2_reduction_tons, Some(1.23));
        assert_eq!(n.metrics.trees_planted, Some(3.0));
    }

    #[test]
    fn test_guard_rejects_regression_beyond_tolerance() {
        let mut guard = StatisticsGuard::new(0.1);
        let first = EnergyStatistics {
            solar_generation_kwh: Some(100.0),
            feed_in_kwh: Some(50.0),
            ..Default::default()
        };
        guard.accept(first).unwrap();

        let jitter = EnergyStatistics {
            solar_generation_kwh: Some(99.95),
            feed_in_kwh: Some(50.5),
            ..Default::default()
        };
        assert!(guard.accept(jitter).is_ok());
        assert_eq!(guard.last().unwrap().solar_generation_kwh, Some(100.0));
        assert_eq!(guard.last().unwrap().feed_in_kwh, Some(50.5));

        let regressed = EnergyStatistics {
            solar_generation_kwh: Some(120.0),
            feed_in_kwh: Some(10.0),
            ..Default::default()
        };
        let err = guard.accept(regressed).unwrap_err();
        assert!(err.to_string().contains("feed_in_kwh"));
        assert_eq!(guard.last().unwrap().solar_generation_kwh, Some(100.0));
        assert_eq!(guard.last().unwrap().feed_in_kwh, Some(50.5));
    }

    #[test]
    fn test_guard_remembers_counter_missing_from_a_sample() {
        let mut guard = StatisticsGuard::new(0.1);
        guard
            .accept(EnergyStatistics {
                solar_generation_kwh: Some(2500.0),
                ..Default::default()
            })
            .unwrap();

        let gap = EnergyStatistics {
            feed_in_kwh: Some(10.0),
            ..Default::default()
        };
        let merged = guard.accept(gap).unwrap();
        assert_eq!(merged.solar_generation_kwh, Some(2500.0));
        assert_eq!(merged.feed_in_kwh, Some(10.0));

        let dropped = EnergyStatistics {
            solar_generation_kwh: Some(5.0),
            feed_in_kwh: Some(10.0),
            ..Default::default()
        };
        assert!(guard.accept(dropped).is_err());
        assert_eq!(guard.last().unwrap().solar_generation_kwh, Some(2500.0));
    }

    #[test]
    fn test_guard_dips_do_not_accumulate() {
        // Every step is a sub-tolerance dip from the previous sample
        let mut guard = StatisticsGuard::new(0.1);
        let mut value = 2500.0;
        let mut rejected = 0;
        for _ in 0..100 {
            let sample = EnergyStatistics {
                solar_generation_kwh: Some(value),
                ..Default::default()
            };
            if guard.accept(sample).is_err() {
                rejected += 1;
            }
            value -= 0.09;
        }
        assert!(rejected > 0);
        assert_eq!(guard.last().unwrap().solar_generation_kwh, Some(2500.0));
    }

    #[test]
    fn test_numeric() {
        assert_eq!(numeric(&json!(1)), Some(1.0));
        assert_eq!(numeric(&json!(" 2.5 ")), Some(2.5));
        assert_eq!(numeric(&json!("NaN")), None);
        assert_eq!(numeric(&json!(true)), None);
    }
}
