//! In-memory device used by tests to script replies per protocol key.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{ConnectionError, FailureKind, TransportError};
use crate::transport::{Response, Transport};

#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    NoValue,
    Fail,
}

#[derive(Default)]
struct Device {
    steady: HashMap<String, Step>,
    queued: HashMap<String, VecDeque<Step>>,
    requests: Vec<String>,
    refuse_open: bool,
    open: bool,
    close_calls: u32,
}

/// Cloneable handle; every clone drives the same scripted device.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    device: Arc<Mutex<Device>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().expect("scripted device lock")
    }

    /// Answer `OK <value>` for `key` until changed.
    pub fn reply(&self, key: &str, value: &str) -> &Self {
        self.device()
            .steady
            .insert(key.to_string(), Step::Reply(value.to_string()));
        self
    }

    /// Queue a one-shot step for `key`, used before the steady reply.
    pub fn then(&self, key: &str, step: Step) -> &Self {
        self.device()
            .queued
            .entry(key.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn refuse_open(&self) -> &Self {
        self.device().refuse_open = true;
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.device().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.device().requests.clear();
    }

    pub fn is_open(&self) -> bool {
        self.device().open
    }

    pub fn close_calls(&self) -> u32 {
        self.device().close_calls
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn endpoint(&self) -> &str {
        "/dev/scripted"
    }

    async fn open(&mut self) -> Result<(), ConnectionError> {
        let mut device = self.device();
        if device.refuse_open {
            return Err(ConnectionError {
                endpoint: "/dev/scripted".to_string(),
                kind: FailureKind::DeviceMissing,
                message: "no such device".to_string(),
            });
        }
        device.open = true;
        Ok(())
    }

    async fn send_and_receive(&mut self, line: &str) -> Result<Response, TransportError> {
        let mut device = self.device();
        device.requests.push(line.to_string());
        let key = line.split_whitespace().nth(1).unwrap_or_default().to_string();
        let queued = device.queued.get_mut(&key).and_then(VecDeque::pop_front);
        let step = match queued {
            Some(step) => step,
            None => device.steady.get(&key).cloned().unwrap_or(Step::NoValue),
        };

        match step {
            Step::Reply(value) => Ok(Response::Ok(value)),
            Step::NoValue => Ok(Response::NoValue),
            Step::Fail => {
                device.open = false;
                Err(TransportError::io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "scripted failure",
                )))
            }
        }
    }

    async fn close(&mut self) {
        let mut device = self.device();
        device.close_calls += 1;
        device.open = false;
    }
}
