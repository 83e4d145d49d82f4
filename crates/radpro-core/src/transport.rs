use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use crate::error::{ConnectionError, FailureKind, TransportError};

/// Success marker that prefixes every positive device reply.
pub const OK_MARKER: &str = "OK";
/// Pause after each exchange so the device can turn around.
pub const SETTLE_DELAY: Duration = Duration::from_millis(50);

const MAX_LINE_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    NoValue,
}

impl Response {
    pub fn into_value(self) -> Option<String> {
        match self {
            Response::Ok(value) => Some(value),
            Response::NoValue => None,
        }
    }
}

/// Decode one response line as read from the wire.
pub fn parse_response(raw: &str) -> Response {
    let line = raw.trim();
    if line.is_empty() || !line.starts_with(OK_MARKER) {
        return Response::NoValue;
    }
    let payload = line.get(OK_MARKER.len() + 1..).unwrap_or_default();
    Response::Ok(payload.trim().to_string())
}

#[async_trait]
pub trait Transport: Send {
    fn endpoint(&self) -> &str;
    async fn open(&mut self) -> Result<(), ConnectionError>;
    async fn send_and_receive(&mut self, line: &str) -> Result<Response, TransportError>;
    async fn close(&mut self);
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub endpoint: String,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub settle_delay: Duration,
}

pub struct SerialTransport {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
    closed: bool,
}

impl SerialTransport {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
            closed: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn open_port(settings: &SerialSettings) -> Result<Box<dyn SerialPort>, ConnectionError> {
        serialport::new(&settings.endpoint, settings.baud_rate)
            .timeout(settings.timeout)
            .open()
            .map_err(|err| ConnectionError::from_serial(&settings.endpoint, &err))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn endpoint(&self) -> &str {
        &self.settings.endpoint
    }

    async fn open(&mut self) -> Result<(), ConnectionError> {
        let settings = self.settings.clone();
        let port = tokio::task::spawn_blocking(move || Self::open_port(&settings))
            .await
            .map_err(|err| ConnectionError {
                endpoint: self.settings.endpoint.clone(),
                kind: FailureKind::Unknown,
                message: err.to_string(),
            })??;
        self.port = Some(port);
        self.closed = false;
        debug!(endpoint = %self.settings.endpoint, baud = self.settings.baud_rate, "serial port opened");
        Ok(())
    }

    async fn send_and_receive(&mut self, line: &str) -> Result<Response, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let port = match self.port.take() {
            Some(port) => port,
            None => {
                debug!(endpoint = %self.settings.endpoint, "reopening serial port");
                let settings = self.settings.clone();
                tokio::task::spawn_blocking(move || Self::open_port(&settings))
                    .await
                    .map_err(|err| TransportError::io(io::Error::other(err)))??
            }
        };

        debug!("TX: {line}");
        let request = line.to_string();
        let timeout = self.settings.timeout;
        let (port, outcome) = tokio::task::spawn_blocking(move || {
            let mut port = port;
            let outcome = exchange_line(&mut port, &request, timeout);
            (port, outcome)
        })
        .await
        .map_err(|err| TransportError::io(io::Error::other(err)))?;

        let raw = match outcome {
            Ok(raw) => raw,
            Err(err) => {
                debug!("serial error: {err}");
                drop(port);
                return Err(TransportError::io(err));
            }
        };
        self.port = Some(port);

        tokio::time::sleep(self.settings.settle_delay).await;

        if raw.is_empty() {
            debug!("RX: (no response)");
        } else {
            debug!("RX: {raw}");
        }
        Ok(parse_response(&raw))
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(endpoint = %self.settings.endpoint, "serial port closed");
        }
        self.closed = true;
    }
}

/// Byte stream a single request/response exchange runs over.
pub trait LinePort: Read + Write {
    /// Drop bytes the device sent that no pending request asked for.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Bound how long the next read may block.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl LinePort for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout).map_err(io::Error::from)
    }
}

/// Write `line` plus a newline, then read back a single line within `timeout`.
///
/// Stale input is discarded before writing. Silence until the deadline is an
/// empty line; a line cut off by the deadline or by end of stream is a
/// `TimedOut` error, so no fragment is ever taken for a reply.
pub fn exchange_line<P>(port: &mut P, line: &str, timeout: Duration) -> io::Result<String>
where
    P: LinePort + ?Sized,
{
    port.discard_input()?;

    let mut request = Vec::with_capacity(line.len() + 1);
    request.extend_from_slice(line.as_bytes());
    request.push(b'\n');
    port.write_all(&request)?;
    port.flush()?;

    let deadline = Instant::now() + timeout;
    let mut received = Vec::with_capacity(64);
    let mut byte = [0_u8; 1];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return unterminated(received);
        }
        port.set_read_timeout(remaining)?;

        match port.read(&mut byte) {
            Ok(0) => return unterminated(received),
            Ok(_) => match byte[0] {
                b'\n' => break,
                b'\r' => {}
                b => {
                    received.push(b);
                    if received.len() > MAX_LINE_BYTES {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("response exceeds {MAX_LINE_BYTES} bytes"),
                        ));
                    }
                }
            },
            Err(err) if err.kind() == io::ErrorKind::TimedOut => return unterminated(received),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    Ok(received
        .into_iter()
        .filter(u8::is_ascii)
        .map(char::from)
        .collect())
}

fn unterminated(received: Vec<u8>) -> io::Result<String> {
    if received.is_empty() {
        return Ok(String::new());
    }
    Err(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("response cut off after {} bytes", received.len()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn bytes(raw: &[u8]) -> Vec<io::Result<u8>> {
        raw.iter().map(|b| Ok(*b)).collect()
    }

    /// Port whose replies only become readable once a request is flushed.
    struct ScriptedPort {
        incoming: VecDeque<io::Result<u8>>,
        replies: VecDeque<Vec<io::Result<u8>>>,
        written: Vec<u8>,
        byte_delay: Duration,
        discards: usize,
    }

    impl ScriptedPort {
        fn scripted(replies: impl IntoIterator<Item = Vec<io::Result<u8>>>) -> Self {
            Self {
                incoming: VecDeque::new(),
                replies: replies.into_iter().collect(),
                written: Vec::new(),
                byte_delay: Duration::ZERO,
                discards: 0,
            }
        }

        fn replying(reply: &[u8]) -> Self {
            Self::scripted([bytes(reply)])
        }

        fn arrive(&mut self, raw: &[u8]) {
            self.incoming.extend(bytes(raw));
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.byte_delay.is_zero() {
                std::thread::sleep(self.byte_delay);
            }
            match self.incoming.pop_front() {
                Some(Ok(b)) => {
                    buf[0] = b;
                    Ok(1)
                }
                Some(Err(err)) => Err(err),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if let Some(reply) = self.replies.pop_front() {
                self.incoming.extend(reply);
            }
            Ok(())
        }
    }

    impl LinePort for ScriptedPort {
        fn discard_input(&mut self) -> io::Result<()> {
            self.discards += 1;
            self.incoming.clear();
            Ok(())
        }

        fn set_read_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }
    }

    const LINE_TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn parses_ok_and_rejects_everything_else() {
        assert_eq!(parse_response("OK 42"), Response::Ok("42".to_string()));
        assert_eq!(parse_response("OK 42\r\n"), Response::Ok("42".to_string()));
        assert_eq!(parse_response("ERR bad key"), Response::NoValue);
        assert_eq!(parse_response(""), Response::NoValue);
        assert_eq!(parse_response("OK"), Response::Ok(String::new()));
    }

    #[test]
    fn keeps_payload_separators_after_marker() {
        assert_eq!(
            parse_response("OK FS2011 (STM32F051C8);Rad Pro 2.0/en;b57"),
            Response::Ok("FS2011 (STM32F051C8);Rad Pro 2.0/en;b57".to_string())
        );
    }

    #[test]
    fn exchange_writes_newline_terminated_request() {
        let mut port = ScriptedPort::replying(b"OK 1234\r\n");
        let raw = exchange_line(&mut port, "GET tubePulseCount", LINE_TIMEOUT).unwrap();
        assert_eq!(port.written, b"GET tubePulseCount\n");
        assert_eq!(raw, "OK 1234");
    }

    #[test]
    fn exchange_timeout_yields_empty_line() {
        let mut port = ScriptedPort::replying(b"");
        let raw = exchange_line(&mut port, "GET deviceId", LINE_TIMEOUT).unwrap();
        assert!(raw.is_empty());
        assert_eq!(parse_response(&raw), Response::NoValue);
    }

    #[test]
    fn exchange_stops_at_first_newline() {
        let mut port = ScriptedPort::replying(b"OK 1\nOK 2\n");
        assert_eq!(exchange_line(&mut port, "GET a", LINE_TIMEOUT).unwrap(), "OK 1");
        assert_eq!(port.incoming.len(), 5);
    }

    #[test]
    fn exchange_propagates_hard_io_errors() {
        let mut port = ScriptedPort::scripted([vec![Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "unplugged",
        ))]]);
        let err = exchange_line(&mut port, "GET deviceId", LINE_TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn exchange_rejects_oversized_lines() {
        let mut port = ScriptedPort::replying(&[b'x'; MAX_LINE_BYTES + 8]);
        let err = exchange_line(&mut port, "GET deviceId", LINE_TIMEOUT).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn line_cut_off_by_timeout_is_an_error() {
        let mut port = ScriptedPort::replying(b"OK 10");

        let err = exchange_line(&mut port, "GET tubePulseCount", LINE_TIMEOUT).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(TransportError::io(err).kind(), FailureKind::Timeout);
    }

    #[test]
    fn tail_of_a_cut_off_line_is_not_read_as_next_reply() {
        // Arrange
        let mut port = ScriptedPort::scripted([bytes(b"OK 10"), bytes(b"OK 1024\n")]);
        assert!(exchange_line(&mut port, "GET tubePulseCount", LINE_TIMEOUT).is_err());
        port.arrive(b"23\n");

        // Act
        let raw = exchange_line(&mut port, "GET tubePulseCount", LINE_TIMEOUT).unwrap();

        // Assert
        assert_eq!(parse_response(&raw), Response::Ok("1024".to_string()));
        assert_eq!(port.discards, 2);
    }

    #[test]
    fn late_reply_is_discarded_before_next_request() {
        // Arrange
        let mut port = ScriptedPort::scripted([Vec::new(), bytes(b"OK 1023\n")]);
        let first = exchange_line(&mut port, "GET tubeSensitivity", LINE_TIMEOUT).unwrap();
        port.arrive(b"OK 153.8\n");

        // Act
        let second = exchange_line(&mut port, "GET tubePulseCount", LINE_TIMEOUT).unwrap();

        // Assert
        assert_eq!(parse_response(&first), Response::NoValue);
        assert_eq!(parse_response(&second), Response::Ok("1023".to_string()));
        assert_eq!(port.written, b"GET tubeSensitivity\nGET tubePulseCount\n");
    }

    #[test]
    fn whole_line_shares_one_deadline() {
        let mut port = ScriptedPort::replying(b"OK 1234567890\n");
        port.byte_delay = Duration::from_millis(10);

        let started = Instant::now();
        let err = exchange_line(&mut port, "GET tubePulseCount", Duration::from_millis(35))
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(!port.incoming.is_empty());
    }

    fn missing_port_settings() -> SerialSettings {
        SerialSettings {
            endpoint: "/dev/radpro-does-not-exist".to_string(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(100),
            settle_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn open_missing_endpoint_is_connection_error() {
        let mut transport = SerialTransport::new(missing_port_settings());
        let err = transport.open().await.unwrap_err();
        assert_eq!(err.endpoint, "/dev/radpro-does-not-exist");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_exchanges() {
        let mut transport = SerialTransport::new(missing_port_settings());
        transport.close().await;
        transport.close().await;
        let err = transport.send_and_receive("GET deviceId").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn lazy_reopen_failure_is_reported_as_transport_error() {
        let mut transport = SerialTransport::new(missing_port_settings());
        let err = transport.send_and_receive("GET deviceId").await.unwrap_err();
        assert!(matches!(err, TransportError::Reopen(_)));
    }
}
