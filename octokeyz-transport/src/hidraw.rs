//! Linux hidraw transport
//!
//! Reads and writes go straight to the `/dev/hidrawN` character device.
//! Feature reports use the `HIDIOCGFEATURE` ioctl.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::lock::try_lock_exclusive;
use crate::types::{DeviceDescriptor, InputReport, MAX_REPORT_SIZE};
use crate::{timeout_millis, Transport};

// From linux/hidraw.h:
// #define HIDIOCGFEATURE(len) _IOC(_IOC_WRITE|_IOC_READ, 'H', 0x07, len)
const HIDRAW_MAGIC: u8 = b'H';

fn hidiocgfeature(len: usize) -> libc::c_ulong {
    // Direction: 2 bits at 30-31, Size: 14 bits at 16-29, Type: 8 bits at 8-15, Nr: 8 bits at 0-7
    let dir: u32 = 3; // _IOC_WRITE | _IOC_READ
    let size = (len as u32) & 0x3FFF;
    let typ = HIDRAW_MAGIC as u32;
    let nr: u32 = 0x07;
    ((dir << 30) | (size << 16) | (typ << 8) | nr) as libc::c_ulong
}

struct OpenHandle {
    file: Arc<File>,
    locked: bool,
}

/// Transport over a hidraw device node
pub struct HidrawTransport {
    descriptor: DeviceDescriptor,
    handle: RwLock<Option<OpenHandle>>,
}

impl HidrawTransport {
    /// Create a closed transport for `descriptor`
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            handle: RwLock::new(None),
        }
    }

    fn path(&self) -> &str {
        &self.descriptor.path
    }

    /// Shared handle to the open file
    ///
    /// Cloned out of the lock so a blocked reader never holds it.
    fn file(&self) -> Result<Arc<File>, TransportError> {
        self.handle
            .read()
            .as_ref()
            .map(|h| h.file.clone())
            .ok_or_else(|| TransportError::NotOpen {
                path: self.path().to_string(),
            })
    }

    fn read_failed(&self, reason: impl ToString) -> TransportError {
        TransportError::ReadFailed {
            path: self.path().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Transport for HidrawTransport {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&self, exclusive: bool) -> Result<(), TransportError> {
        let mut handle = self.handle.write();
        if handle.is_some() {
            return Err(TransportError::AlreadyOpen {
                path: self.path().to_string(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.path())
            .map_err(|e| TransportError::OpenFailed {
                path: self.path().to_string(),
                source: e,
            })?;

        if exclusive {
            // The file is dropped (and closed) on failure
            try_lock_exclusive(&file, self.path())?;
        }

        debug!("Opened {} (exclusive: {})", self.path(), exclusive);
        *handle = Some(OpenHandle {
            file: Arc::new(file),
            locked: exclusive,
        });
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let Some(handle) = self.handle.write().take() else {
            return Ok(());
        };

        if handle.locked {
            if let Err(e) = handle.file.unlock() {
                warn!("Failed to unlock {}: {}", self.path(), e);
            }
        }
        debug!("Closed {}", self.path());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.read().is_some()
    }

    fn read_report(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<InputReport>, TransportError> {
        let file = self.file()?;

        let mut pollfd = libc::pollfd {
            fd: file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_millis(timeout)) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(self.read_failed(err));
        }
        if ret == 0 {
            return Ok(None);
        }
        if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0
            && pollfd.revents & libc::POLLIN == 0
        {
            return Err(self.read_failed("device disconnected"));
        }

        let mut buf = [0u8; MAX_REPORT_SIZE];
        let n = (&*file).read(&mut buf).map_err(|e| self.read_failed(e))?;
        match InputReport::from_bytes(&buf[..n]) {
            Some(report) => Ok(Some(report)),
            None => Err(self.read_failed("end of file")),
        }
    }

    fn write_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let file = self.file()?;

        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(report_id);
        buf.extend_from_slice(data);

        let written = (&*file)
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
        let file = self.file()?;

        let mut buf = vec![0u8; len + 1];
        buf[0] = report_id;
        let ret = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                hidiocgfeature(buf.len()),
                buf.as_mut_ptr(),
            )
        };
        if ret < 0 {
            return Err(TransportError::FeatureReportFailed {
                path: self.path().to_string(),
                report_id,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }

        // The returned length includes the report ID byte
        let end = (ret as usize).clamp(1, buf.len());
        Ok(buf[1..end].to_vec())
    }
}
