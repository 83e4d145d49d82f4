use std::fmt;

use crate::error::{ConnectionError, TransportError};
use crate::transport::Transport;

pub const KEY_DEVICE_ID: &str = "deviceId";
pub const KEY_BATTERY_VOLTAGE: &str = "deviceBatteryVoltage";
pub const KEY_TUBE_SENSITIVITY: &str = "tubeSensitivity";
pub const KEY_TUBE_PULSE_COUNT: &str = "tubePulseCount";
pub const KEY_TUBE_RATE: &str = "tubeRate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Get(&'a str),
    Set(&'a str, String),
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get(key) => write!(f, "GET {key}"),
            Command::Set(key, value) => write!(f, "SET {key} {value}"),
        }
    }
}

/// GET/SET requests over a line transport. One exchange per call.
pub struct RadProClient<T: Transport> {
    transport: T,
}

impl<T: Transport> RadProClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub async fn open(&mut self) -> Result<(), ConnectionError> {
        self.transport.open().await
    }

    pub async fn close(&mut self) {
        self.transport.close().await
    }

    pub async fn execute(&mut self, command: &Command<'_>) -> Result<Option<String>, TransportError> {
        let response = self
            .transport
            .send_and_receive(&command.to_string())
            .await?;
        Ok(response.into_value())
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<String>, TransportError> {
        self.execute(&Command::Get(key)).await
    }

    pub async fn set(
        &mut self,
        key: &str,
        value: impl fmt::Display,
    ) -> Result<Option<String>, TransportError> {
        self.execute(&Command::Set(key, value.to_string())).await
    }
}
