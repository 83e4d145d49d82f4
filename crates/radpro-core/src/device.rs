use serde::Serialize;
use tracing::{debug, warn};

/// Identity reported by `GET deviceId`, plus the battery reading.
///
/// The payload looks like `FS2011 (STM32F051C8);Rad Pro 2.0/en;b5706d937087f975b5812810`.
/// Older firmware answers with the bare device id only.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceIdentity {
    pub hardware_id: Option<String>,
    pub software_id: Option<String>,
    pub device_id: Option<String>,
    /// Volts per cell.
    pub battery_voltage: Option<f64>,
}

impl DeviceIdentity {
    /// `FS2011 (STM32F051C8)` -> `FS2011`
    pub fn model(&self) -> Option<String> {
        self.hardware_id
            .as_deref()
            .map(|hw| hw.split('(').next().unwrap_or_default().trim().to_string())
    }

    /// `Rad Pro 2.0/en` -> `2.0`
    pub fn sw_version(&self) -> Option<String> {
        let software = self.software_id.as_deref()?;
        for part in software.split_whitespace() {
            if let Some((version, _)) = part.split_once('/') {
                return Some(version.to_string());
            }
            if part.starts_with(|c: char| c.is_ascii_digit()) {
                return Some(part.to_string());
            }
        }
        Some(software.to_string())
    }

    /// Apply a `deviceId` payload. Returns false when the field count is not
    /// recognised and nothing was changed.
    pub fn apply_device_id(&mut self, raw: &str) -> bool {
        let parts: Vec<&str> = raw.split(';').collect();
        match parts.len() {
            n if n >= 3 => {
                self.hardware_id = Some(parts[0].trim().to_string());
                self.software_id = Some(parts[1].trim().to_string());
                self.device_id = Some(parts[2].trim().to_string());
            }
            1 => {
                self.device_id = Some(raw.trim().to_string());
            }
            n => {
                debug!(fields = n, "unrecognised deviceId payload: {raw}");
                return false;
            }
        }
        debug!(
            hardware = ?self.hardware_id,
            software = ?self.software_id,
            id = ?self.device_id,
            "device info"
        );
        true
    }

    /// Apply a `deviceBatteryVoltage` payload, keeping the old value when it
    /// does not parse.
    pub fn apply_battery_voltage(&mut self, raw: &str) -> bool {
        match raw.trim().parse::<f64>() {
            Ok(volts) => {
                debug!("battery voltage: {volts} V/cell");
                self.battery_voltage = Some(volts);
                true
            }
            Err(_) => {
                warn!("invalid deviceBatteryVoltage: {raw}");
                false
            }
        }
    }

    /// Stable identifier for the device, falling back to the endpoint path.
    pub fn unique_id(&self, endpoint: &str) -> String {
        match self.device_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("radpro_{}", endpoint.replace('/', "_")),
        }
    }
}
