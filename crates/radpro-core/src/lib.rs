pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod scheduler;
pub mod snapshot;
pub mod transport;
pub mod window;

#[cfg(test)]
mod fake;

pub use config::{PollerConfig, RateMode};
pub use device::DeviceIdentity;
pub use discovery::{auto_detect, candidate_ports, probe, ProbeReport};
pub use error::{
    ConnectionError, DiscoveryError, FailureKind, PollError, ProtocolError, SetupError,
    TransportError,
};
pub use poller::{Poller, PollerState};
pub use protocol::RadProClient;
pub use scheduler::run_until;
pub use snapshot::{MetricSnapshot, PollStats, PollerView};
pub use transport::{Response, SerialSettings, SerialTransport, Transport};
