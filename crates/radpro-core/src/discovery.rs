use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::DiscoveryError;
use crate::protocol::{RadProClient, KEY_DEVICE_ID};
use crate::transport::{SerialSettings, SerialTransport, Transport, SETTLE_DELAY};

const PORT_PREFIXES: [&str; 6] = [
    "/dev/ttyACM",
    "/dev/ttyUSB",
    "/dev/cu.usbmodem",
    "/dev/cu.usbserial",
    "/dev/cu.SLAB_USBtoUART",
    "/dev/cu.wchusbserial",
];
const PROBE_READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub endpoint: String,
    pub ok: bool,
    pub device_id: Option<String>,
    pub error: Option<String>,
}

impl ProbeReport {
    fn failed(endpoint: &str, error: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ok: false,
            device_id: None,
            error: Some(error.into()),
        }
    }
}

/// Serial nodes that may host a dosimeter, ACM devices first.
///
/// Falls back to the serialport listing where udev cannot be queried.
pub fn candidate_ports() -> Result<Vec<String>, DiscoveryError> {
    let nodes = match udev_tty_nodes() {
        Ok(nodes) => nodes,
        Err(err) => {
            debug!("udev enumeration unavailable ({err}), listing serial ports instead");
            serialport::available_ports()?
                .into_iter()
                .map(|port| port.port_name)
                .collect()
        }
    };

    Ok(order_candidates(nodes))
}

fn udev_tty_nodes() -> std::io::Result<Vec<String>> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("tty")?;

    Ok(enumerator
        .scan_devices()?
        .filter_map(|device| device.devnode().and_then(Path::to_str).map(str::to_string))
        .collect())
}

pub fn order_candidates(nodes: impl IntoIterator<Item = String>) -> Vec<String> {
    let rank = |node: &str| PORT_PREFIXES.iter().position(|p| node.starts_with(p));
    let mut ports = nodes
        .into_iter()
        .filter(|node| rank(node.as_str()).is_some())
        .collect::<Vec<_>>();
    ports.sort_by(|a, b| rank(a.as_str()).cmp(&rank(b.as_str())).then_with(|| a.cmp(b)));
    ports.dedup();
    ports
}

/// Open, ask for `deviceId`, close. Succeeds on any non-empty answer.
pub async fn probe_transport<T: Transport>(transport: T) -> ProbeReport {
    let endpoint = transport.endpoint().to_string();
    let mut client = RadProClient::new(transport);

    let outcome = match client.open().await {
        Ok(()) => client.get(KEY_DEVICE_ID).await.map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };
    client.close().await;

    match outcome {
        Ok(Some(device_id)) if !device_id.is_empty() => ProbeReport {
            endpoint,
            ok: true,
            device_id: Some(device_id),
            error: None,
        },
        Ok(_) => ProbeReport::failed(&endpoint, "no response from device"),
        Err(err) => ProbeReport::failed(&endpoint, err),
    }
}

pub async fn probe(endpoint: &str, baud_rate: u32, timeout: Duration) -> ProbeReport {
    let transport = SerialTransport::new(SerialSettings {
        endpoint: endpoint.to_string(),
        baud_rate,
        timeout: PROBE_READ_TIMEOUT.min(timeout),
        settle_delay: SETTLE_DELAY,
    });

    match tokio::time::timeout(timeout, probe_transport(transport)).await {
        Ok(report) => report,
        Err(_) => ProbeReport::failed(endpoint, "probe timed out"),
    }
}

/// First port in `ports` that answers like a Rad Pro device.
pub async fn auto_detect(ports: &[String], baud_rate: u32, timeout: Duration) -> Option<ProbeReport> {
    if ports.is_empty() {
        debug!("no serial ports to probe");
        return None;
    }
    debug!(?ports, "auto-detecting Rad Pro device");

    for port in ports {
        let report = probe(port, baud_rate, timeout).await;
        if report.ok {
            info!(port = %port, device_id = ?report.device_id, "found Rad Pro device");
            return Some(report);
        }
        debug!(port = %port, error = ?report.error, "not a Rad Pro device");
    }
    None
}
