#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary text through the time-of-day parser
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = bytewatt_bridge::settings::TimeOfDay::parse(text);
    }

    // Arbitrary JSON through every payload normalizer
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = bytewatt_bridge::metrics::normalize_realtime(&value);
        let _ = bytewatt_bridge::metrics::normalize_statistics(&value);
        let _ = bytewatt_bridge::metrics::normalize_daily(&value);
        let _ = bytewatt_bridge::settings::ScheduleSettings::from_vendor(&value);
    }
});
