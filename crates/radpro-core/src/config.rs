use std::time::Duration;

use crate::transport::{SerialSettings, SETTLE_DELAY};

/// Endpoint value that asks for port auto-detection.
pub const AUTO_ENDPOINT: &str = "auto";

/// Where the primary radiation signal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateMode {
    /// Difference the lifetime `tubePulseCount` over a sliding window.
    #[default]
    PulseCount,
    /// Read the device-averaged `tubeRate` in CPM.
    DeviceRate,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub endpoint: String,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub sensitivity_interval: Duration,
    pub deviceinfo_interval: Duration,
    pub rate_mode: RateMode,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            endpoint: AUTO_ENDPOINT.to_string(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(500),
            settle_delay: SETTLE_DELAY,
            poll_interval: Duration::from_secs(2),
            sensitivity_interval: Duration::from_secs(3600),
            deviceinfo_interval: Duration::from_secs(600),
            rate_mode: RateMode::PulseCount,
        }
    }
}

impl PollerConfig {
    pub fn is_auto_endpoint(&self) -> bool {
        matches!(
            self.endpoint.trim().to_ascii_lowercase().as_str(),
            AUTO_ENDPOINT | "" | "none"
        )
    }

    pub fn sensitivity_refresh_cycles(&self) -> u64 {
        refresh_cycles(self.sensitivity_interval, self.poll_interval)
    }

    pub fn deviceinfo_refresh_cycles(&self) -> u64 {
        refresh_cycles(self.deviceinfo_interval, self.poll_interval)
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            endpoint: self.endpoint.clone(),
            baud_rate: self.baud_rate,
            timeout: self.timeout,
            settle_delay: self.settle_delay,
        }
    }
}

/// Number of poll cycles between refreshes, never less than one.
pub fn refresh_cycles(refresh: Duration, poll: Duration) -> u64 {
    let poll_ms = poll.as_millis().max(1);
    (refresh.as_millis() / poll_ms).max(1) as u64
}
