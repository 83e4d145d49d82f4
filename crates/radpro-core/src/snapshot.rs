use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::device::DeviceIdentity;

/// Derived metrics of one successful poll cycle. Absent fields could not be
/// computed this cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub ts: DateTime<Utc>,
    pub cycle: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usvh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pulse_count: Option<u64>,
}

impl MetricSnapshot {
    pub fn get(&self, key: &str) -> Option<f64> {
        match key {
            "cps" => self.cps,
            "cpm" => self.cpm,
            "usvh" => self.usvh,
            "pulse_count" => self.pulse_count.map(|count| count as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollStats {
    pub reads_ok: u64,
    pub reads_err: u64,
    pub consecutive_failures: u32,
    pub last_ok_ts: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PollStats {
    /// Seconds since the last successful cycle, if there was one.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_ok_ts
            .map(|ts| (now - ts).num_milliseconds() as f64 / 1000.0)
    }
}

/// What observers see after each cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollerView {
    pub snapshot: Option<MetricSnapshot>,
    pub identity: DeviceIdentity,
    pub stats: PollStats,
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}
