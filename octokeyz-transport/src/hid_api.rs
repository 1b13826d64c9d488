//! hidapi-based discovery and transport for non-Linux platforms
//!
//! The OS HID API gives no advisory lock on the device interface, so
//! exclusive opens contend on a companion lock file instead.

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::discovery::DeviceDiscovery;
use crate::error::TransportError;
use crate::lock::CompanionLock;
use crate::types::{matches_any, DeviceDescriptor, DeviceFilter, InputReport, MAX_REPORT_SIZE};
use crate::{timeout_millis, BoxedTransport, Transport};

/// hidapi device discovery
#[derive(Default)]
pub struct HidApiDiscovery;

impl HidApiDiscovery {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceDiscovery for HidApiDiscovery {
    fn list_devices(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let api = HidApi::new()?;
        let mut devices: Vec<DeviceDescriptor> = Vec::new();

        for device_info in api.device_list() {
            let descriptor = DeviceDescriptor {
                vendor_id: device_info.vendor_id(),
                product_id: device_info.product_id(),
                version: device_info.release_number(),
                manufacturer: device_info
                    .manufacturer_string()
                    .unwrap_or_default()
                    .to_string(),
                product: device_info.product_string().unwrap_or_default().to_string(),
                serial_number: device_info.serial_number().unwrap_or_default().to_string(),
                path: device_info.path().to_string_lossy().to_string(),
            };

            if !matches_any(filters, &descriptor) {
                continue;
            }
            // Composite devices list one entry per top-level collection
            if devices.iter().any(|d| d.path == descriptor.path) {
                continue;
            }

            debug!(
                "Found device: VID={:04X} PID={:04X} path={}",
                descriptor.vendor_id, descriptor.product_id, descriptor.path
            );
            devices.push(descriptor);
        }

        info!("Found {} devices", devices.len());
        Ok(devices)
    }

    fn transport_for(&self, device: &DeviceDescriptor) -> Result<BoxedTransport, TransportError> {
        Ok(Arc::new(HidApiTransport::new(device.clone())))
    }
}

/// Transport over an hidapi device handle
pub struct HidApiTransport {
    descriptor: DeviceDescriptor,
    device: Mutex<Option<HidDevice>>,
    lock: Mutex<Option<CompanionLock>>,
}

impl HidApiTransport {
    /// Create a closed transport for `descriptor`
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            device: Mutex::new(None),
            lock: Mutex::new(None),
        }
    }

    fn path(&self) -> &str {
        &self.descriptor.path
    }

    fn not_open(&self) -> TransportError {
        TransportError::NotOpen {
            path: self.path().to_string(),
        }
    }

    fn open_failed(&self, reason: impl ToString) -> TransportError {
        TransportError::OpenFailed {
            path: self.path().to_string(),
            source: std::io::Error::other(reason.to_string()),
        }
    }
}

impl Transport for HidApiTransport {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&self, exclusive: bool) -> Result<(), TransportError> {
        let mut device = self.device.lock();
        if device.is_some() {
            return Err(TransportError::AlreadyOpen {
                path: self.path().to_string(),
            });
        }

        let lock = if exclusive {
            Some(CompanionLock::acquire(self.path())?)
        } else {
            None
        };

        let path = CString::new(self.path()).map_err(|e| self.open_failed(e))?;
        let opened = HidApi::new()
            .and_then(|api| api.open_path(&path))
            .map_err(|e| self.open_failed(e));
        let opened = match opened {
            Ok(d) => d,
            Err(e) => {
                if let Some(lock) = lock {
                    lock.release();
                }
                return Err(e);
            }
        };

        debug!("Opened {} (exclusive: {})", self.path(), exclusive);
        *device = Some(opened);
        *self.lock.lock() = lock;
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let Some(device) = self.device.lock().take() else {
            return Ok(());
        };
        if let Some(lock) = self.lock.lock().take() {
            lock.release();
        }
        drop(device);
        debug!("Closed {}", self.path());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    fn read_report(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<InputReport>, TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or_else(|| self.not_open())?;

        let mut buf = [0u8; MAX_REPORT_SIZE];
        let n = device
            .read_timeout(&mut buf, timeout_millis(timeout))
            .map_err(|e| TransportError::ReadFailed {
                path: self.path().to_string(),
                reason: e.to_string(),
            })?;

        // hidapi reports a timeout as a zero length read
        Ok(InputReport::from_bytes(&buf[..n]))
    }

    fn write_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or_else(|| self.not_open())?;

        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(report_id);
        buf.extend_from_slice(data);

        let written = device
            .write(&buf)
            .map_err(|e| TransportError::WriteFailed {
                path: self.path().to_string(),
                report_id,
                reason: e.to_string(),
            })?;

        if written != buf.len() {
            return Err(TransportError::ShortWrite {
                path: self.path().to_string(),
                report_id,
                expected: buf.len(),
                written,
            });
        }
        Ok(())
    }

    fn get_feature_report(&self, report_id: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or_else(|| self.not_open())?;

        let mut buf = vec![0u8; len + 1];
        buf[0] = report_id;
        let n = device
            .get_feature_report(&mut buf)
            .map_err(|e| TransportError::FeatureReportFailed {
                path: self.path().to_string(),
                report_id,
                reason: e.to_string(),
            })?;

        let end = n.clamp(1, buf.len());
        Ok(buf[1..end].to_vec())
    }
}
