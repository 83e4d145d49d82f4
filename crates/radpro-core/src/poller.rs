use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{PollerConfig, RateMode};
use crate::device::DeviceIdentity;
use crate::error::{PollError, ProtocolError, SetupError, TransportError};
use crate::protocol::{
    RadProClient, KEY_BATTERY_VOLTAGE, KEY_DEVICE_ID, KEY_TUBE_PULSE_COUNT, KEY_TUBE_RATE,
    KEY_TUBE_SENSITIVITY,
};
use crate::snapshot::{round_to, MetricSnapshot, PollStats, PollerView};
use crate::transport::Transport;
use crate::window::PulseWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Uninitialized,
    Ready,
    Polling,
    Closed,
}

enum RateStrategy {
    PulseDifferencing(PulseWindow),
    DeviceAveraged,
}

impl From<RateMode> for RateStrategy {
    fn from(mode: RateMode) -> Self {
        match mode {
            RateMode::PulseCount => RateStrategy::PulseDifferencing(PulseWindow::default()),
            RateMode::DeviceRate => RateStrategy::DeviceAveraged,
        }
    }
}

/// Drives one Rad Pro device: setup, one cycle per call, close.
///
/// Cycles take `&mut self`, so only one can run at a time. Observers get
/// copies of the latest state through [`Poller::subscribe`].
pub struct Poller<T: Transport> {
    client: RadProClient<T>,
    state: PollerState,
    strategy: RateStrategy,
    identity: DeviceIdentity,
    sensitivity: Option<f64>,
    cycle: u64,
    sensitivity_every: u64,
    deviceinfo_every: u64,
    last_snapshot: Option<MetricSnapshot>,
    stats: PollStats,
    publisher: watch::Sender<PollerView>,
}

impl<T: Transport> Poller<T> {
    pub fn new(transport: T, config: &PollerConfig) -> Self {
        let (publisher, _) = watch::channel(PollerView::default());
        Self {
            client: RadProClient::new(transport),
            state: PollerState::Uninitialized,
            strategy: config.rate_mode.into(),
            identity: DeviceIdentity::default(),
            sensitivity: None,
            cycle: 0,
            sensitivity_every: config.sensitivity_refresh_cycles(),
            deviceinfo_every: config.deviceinfo_refresh_cycles(),
            last_snapshot: None,
            stats: PollStats::default(),
            publisher,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// CPM per µSv/h, as last reported by the device.
    pub fn sensitivity(&self) -> Option<f64> {
        self.sensitivity
    }

    pub fn last_snapshot(&self) -> Option<&MetricSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerView> {
        self.publisher.subscribe()
    }

    pub async fn setup(&mut self) -> Result<&DeviceIdentity, SetupError> {
        match self.state {
            PollerState::Closed => return Err(SetupError::AlreadyClosed),
            PollerState::Ready | PollerState::Polling => return Ok(&self.identity),
            PollerState::Uninitialized => {}
        }

        self.client.open().await?;

        let mut identity = self.identity.clone();
        read_identity(&mut self.client, &mut identity).await?;
        let sensitivity = read_sensitivity(&mut self.client, self.sensitivity).await?;

        self.identity = identity;
        self.sensitivity = sensitivity;
        self.state = PollerState::Ready;
        info!(
            endpoint = %self.client.endpoint(),
            model = ?self.identity.model(),
            version = ?self.identity.sw_version(),
            sensitivity = ?self.sensitivity,
            "device ready"
        );
        self.publish();
        Ok(&self.identity)
    }

    pub async fn poll_once(&mut self) -> Result<MetricSnapshot, PollError> {
        self.poll_once_at(Instant::now()).await
    }

    /// Run one cycle with `now` as the reading time.
    pub async fn poll_once_at(&mut self, now: Instant) -> Result<MetricSnapshot, PollError> {
        match self.state {
            PollerState::Uninitialized => return Err(PollError::NotReady),
            PollerState::Closed => return Err(PollError::Closed),
            PollerState::Ready | PollerState::Polling => {}
        }

        let result = self.run_cycle(now).await;
        match &result {
            Ok(snapshot) => {
                self.state = PollerState::Polling;
                self.stats.reads_ok += 1;
                self.stats.consecutive_failures = 0;
                self.stats.last_ok_ts = Some(snapshot.ts);
                self.last_snapshot = Some(snapshot.clone());
            }
            Err(err) => {
                self.stats.reads_err += 1;
                self.stats.consecutive_failures += 1;
                self.stats.last_error = Some(err.to_string());
                warn!(cycle = self.cycle, "{err}");
            }
        }
        self.publish();
        result
    }

    /// Every read happens before any state is touched, so a failing cycle
    /// leaves the rolling window, sensitivity and identity as they were.
    async fn run_cycle(&mut self, now: Instant) -> Result<MetricSnapshot, PollError> {
        self.cycle += 1;
        let cycle = self.cycle;

        let mut sensitivity = self.sensitivity;
        if cycle % self.sensitivity_every == 0 {
            sensitivity = read_sensitivity(&mut self.client, sensitivity).await?;
        }

        let mut refreshed_identity = None;
        if cycle % self.deviceinfo_every == 0 {
            let mut identity = self.identity.clone();
            read_identity(&mut self.client, &mut identity).await?;
            refreshed_identity = Some(identity);
        }

        let (cps, cpm, pulse_count) = match &mut self.strategy {
            RateStrategy::PulseDifferencing(window) => {
                let count = read_pulse_count(&mut self.client).await?;
                let cps = window.record(count, now);
                (cps, cps.map(|cps| cps * 60.0), Some(count))
            }
            RateStrategy::DeviceAveraged => {
                let cpm = read_rate(&mut self.client).await?;
                let pulse_count = match read_pulse_count(&mut self.client).await {
                    Ok(count) => Some(count),
                    Err(PollError::Protocol(err)) => {
                        warn!("{err}");
                        None
                    }
                    Err(err) => return Err(err),
                };
                (Some(cpm / 60.0), Some(cpm), pulse_count)
            }
        };

        self.sensitivity = sensitivity;
        if let Some(identity) = refreshed_identity {
            self.identity = identity;
        }

        let usvh = match (cpm, sensitivity) {
            (Some(cpm), Some(sensitivity)) if sensitivity > 0.0 => Some(cpm / sensitivity),
            _ => None,
        };
        debug!(cycle, ?cps, ?cpm, ?usvh, ?pulse_count, "cycle complete");

        Ok(MetricSnapshot {
            ts: Utc::now(),
            cycle,
            cps: cps.map(|v| round_to(v, 3)),
            cpm: cpm.map(|v| round_to(v, 1)),
            usvh: usvh.map(|v| round_to(v, 3)),
            pulse_count,
        })
    }

    pub async fn close(&mut self) {
        if self.state == PollerState::Closed {
            return;
        }
        self.client.close().await;
        self.state = PollerState::Closed;
        info!(endpoint = %self.client.endpoint(), "poller closed");
        self.publish();
    }

    fn publish(&self) {
        self.publisher.send_replace(PollerView {
            snapshot: self.last_snapshot.clone(),
            identity: self.identity.clone(),
            stats: self.stats.clone(),
        });
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

async fn read_identity<T: Transport>(
    client: &mut RadProClient<T>,
    identity: &mut DeviceIdentity,
) -> Result<(), TransportError> {
    if let Some(raw) = non_empty(client.get(KEY_DEVICE_ID).await?) {
        identity.apply_device_id(&raw);
    }
    if let Some(raw) = non_empty(client.get(KEY_BATTERY_VOLTAGE).await?) {
        identity.apply_battery_voltage(&raw);
    }
    Ok(())
}

/// Returns the new sensitivity, or `current` when the reply is missing or bad.
async fn read_sensitivity<T: Transport>(
    client: &mut RadProClient<T>,
    current: Option<f64>,
) -> Result<Option<f64>, TransportError> {
    let Some(raw) = non_empty(client.get(KEY_TUBE_SENSITIVITY).await?) else {
        return Ok(current);
    };
    match raw.parse::<f64>() {
        Ok(sensitivity) => {
            debug!("tube sensitivity: {sensitivity} CPM/(µSv/h)");
            Ok(Some(sensitivity))
        }
        Err(_) => {
            warn!("invalid tubeSensitivity: {raw}");
            Ok(current)
        }
    }
}

async fn read_pulse_count<T: Transport>(client: &mut RadProClient<T>) -> Result<u64, PollError> {
    let raw = non_empty(client.get(KEY_TUBE_PULSE_COUNT).await?).ok_or(ProtocolError::NoResponse {
        key: KEY_TUBE_PULSE_COUNT,
    })?;
    debug!("raw tubePulseCount: {raw}");
    raw.parse::<u64>().map_err(|_| {
        ProtocolError::InvalidValue {
            key: KEY_TUBE_PULSE_COUNT,
            value: raw.clone(),
        }
        .into()
    })
}

async fn read_rate<T: Transport>(client: &mut RadProClient<T>) -> Result<f64, PollError> {
    let raw = non_empty(client.get(KEY_TUBE_RATE).await?).ok_or(ProtocolError::NoResponse {
        key: KEY_TUBE_RATE,
    })?;
    match raw.parse::<f64>() {
        Ok(cpm) if cpm.is_finite() && cpm >= 0.0 => Ok(cpm),
        _ => Err(ProtocolError::InvalidValue {
            key: KEY_TUBE_RATE,
            value: raw,
        }
        .into()),
    }
}
