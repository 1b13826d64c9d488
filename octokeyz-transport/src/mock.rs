//! In-memory transport and discovery for tests
//!
//! Input reports are scripted with [`MockTransport::push_input`]; everything
//! the host writes is recorded for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::discovery::DeviceDiscovery;
use crate::error::TransportError;
use crate::types::{matches_any, DeviceDescriptor, DeviceFilter, InputReport};
use crate::{BoxedTransport, Transport};

#[derive(Default)]
struct MockState {
    open: bool,
    exclusive: bool,
    locked_elsewhere: bool,
    open_count: usize,
    close_count: usize,
    inputs: VecDeque<Vec<u8>>,
    fail_next_read: Option<String>,
    fail_when_drained: bool,
    writes: Vec<(u8, Vec<u8>)>,
    fail_writes: Option<String>,
    short_write: Option<usize>,
    features: HashMap<u8, Vec<u8>>,
    feature_requests: Vec<u8>,
}

/// Scripted transport
pub struct MockTransport {
    descriptor: DeviceDescriptor,
    state: Mutex<MockState>,
    input_ready: Condvar,
}

impl MockTransport {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            state: Mutex::new(MockState::default()),
            input_ready: Condvar::new(),
        }
    }

    /// Queue a raw input report (report ID first)
    pub fn push_input(&self, raw: &[u8]) {
        self.state.lock().inputs.push_back(raw.to_vec());
        self.input_ready.notify_all();
    }

    /// Number of queued input reports not yet read
    pub fn pending_inputs(&self) -> usize {
        self.state.lock().inputs.len()
    }

    /// Answer feature report `report_id` with `payload` (report ID excluded)
    pub fn set_feature(&self, report_id: u8, payload: &[u8]) {
        self.state.lock().features.insert(report_id, payload.to_vec());
    }

    /// Make feature report `report_id` fail
    pub fn remove_feature(&self, report_id: u8) {
        self.state.lock().features.remove(&report_id);
    }

    /// Pretend another process holds the exclusive lock
    pub fn set_locked_elsewhere(&self, locked: bool) {
        self.state.lock().locked_elsewhere = locked;
    }

    /// Fail the next read with `reason`
    pub fn fail_next_read(&self, reason: &str) {
        self.state.lock().fail_next_read = Some(reason.to_string());
        self.input_ready.notify_all();
    }

    /// Fail reads once the scripted input is used up, as an unplugged
    /// device would
    pub fn set_fail_when_drained(&self, fail: bool) {
        self.state.lock().fail_when_drained = fail;
        self.input_ready.notify_all();
    }

    /// Fail every write with `reason`, or stop failing with `None`
    pub fn set_fail_writes(&self, reason: Option<&str>) {
        self.state.lock().fail_writes = reason.map(str::to_string);
    }

    /// Accept only `written` bytes of every write, or whole writes with `None`
    pub fn set_short_write(&self, written: Option<usize>) {
        self.state.lock().short_write = written;
    }

    /// Output reports written so far, as `(report_id, payload)`
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Feature report IDs requested so far
    pub fn feature_requests(&self) -> Vec<u8> {
        self.state.lock().feature_requests.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().close_count
    }

    /// Whether the last successful open asked for exclusive access
    pub fn was_exclusive(&self) -> bool {
        self.state.lock().exclusive
    }

    fn path(&self) -> String {
        self.descriptor.path.clone()
    }
}

impl Transport for MockTransport {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&self, exclusive: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.open {
            return Err(TransportError::AlreadyOpen { path: self.path() });
        }
        if exclusive && state.locked_elsewhere {
            return Err(TransportError::Locked { path: self.path() });
        }
        state.open = true;
        state.exclusive = exclusive;
        state.open_count += 1;
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
        drop(state);
        self.input_ready.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn read_report(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<InputReport>, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            if !state.open {
                return Err(TransportError::NotOpen { path: self.path() });
            }
            if let Some(reason) = state.fail_next_read.take() {
                return Err(TransportError::ReadFailed {
                    path: self.path(),
                    reason,
                });
            }
            if let Some(raw) = state.inputs.pop_front() {
                return match InputReport::from_bytes(&raw) {
                    Some(report) => Ok(Some(report)),
                    None => Err(TransportError::ReadFailed {
                        path: self.path(),
                        reason: "empty report".into(),
                    }),
                };
            }
            if state.fail_when_drained {
                return Err(TransportError::ReadFailed {
                    path: self.path(),
                    reason: "device disconnected".into(),
                });
            }

            match deadline {
                Some(deadline) => {
                    if self.input_ready.wait_until(&mut state, deadline).timed_out() {
                        return Ok(None);
                    }
                }
                None => self.input_ready.wait(&mut state),
            }
        }
    }

    fn write_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen { path: self.path() });
        }
        if let Some(ref reason) = state.fail_writes {
            return Err(TransportError::WriteFailed {
                path: self.path(),
                report_id,
                reason: reason.clone(),
            });
        }
        if let Some(written) = state.short_write {
            return Err(TransportError::ShortWrite {
                path: self.path(),
                report_id,
                expected: data.len() + 1,
                written,
            });
        }
        state.writes.push((report_id, data.to_vec()));
        Ok(())
    }

    fn get_feature_report(&self, report_id: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen { path: self.path() });
        }
        state.feature_requests.push(report_id);
        match state.features.get(&report_id) {
            Some(payload) => Ok(payload.iter().take(len).copied().collect()),
            None => Err(TransportError::FeatureReportFailed {
                path: self.path(),
                report_id,
                reason: "broken pipe".into(),
            }),
        }
    }
}

/// Discovery over a fixed set of mock transports
#[derive(Default)]
pub struct MockDiscovery {
    transports: Mutex<Vec<Arc<MockTransport>>>,
    fail: Mutex<Option<String>>,
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a device in
    pub fn add(&self, transport: Arc<MockTransport>) {
        self.transports.lock().push(transport);
    }

    /// Make enumeration fail with `reason`
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.fail.lock() = reason.map(str::to_string);
    }
}

impl DeviceDiscovery for MockDiscovery {
    fn list_devices(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        if let Some(ref reason) = *self.fail.lock() {
            return Err(TransportError::EnumerationFailed(reason.clone()));
        }
        Ok(self
            .transports
            .lock()
            .iter()
            .map(|t| t.descriptor().clone())
            .filter(|d| matches_any(filters, d))
            .collect())
    }

    fn transport_for(&self, device: &DeviceDescriptor) -> Result<BoxedTransport, TransportError> {
        self.transports
            .lock()
            .iter()
            .find(|t| t.descriptor().path == device.path)
            .map(|t| t.clone() as BoxedTransport)
            .ok_or_else(|| TransportError::OpenFailed {
                path: device.path.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
    }
}
