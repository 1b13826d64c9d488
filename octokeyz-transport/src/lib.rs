//! Transport abstraction layer for octokeyz/b8 USB macropads
//!
//! This crate provides a uniform raw-HID interface over the platform's
//! device nodes:
//!
//! - Linux: sysfs enumeration + `/dev/hidraw*` character devices
//! - Other platforms: the OS HID device-interface API through `hidapi`
//!
//! The transport moves opaque reports. It never interprets payloads; that is
//! the job of the keypad codec built on top of it.

pub mod error;
pub mod types;

mod discovery;
mod lock;

#[cfg(target_os = "linux")]
mod hidraw;
#[cfg(target_os = "linux")]
mod sysfs;

#[cfg(not(target_os = "linux"))]
mod hid_api;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use discovery::{default_discovery, list_devices, DeviceDiscovery};
pub use error::TransportError;
pub use types::{matches_any, DeviceDescriptor, DeviceFilter, InputReport, MAX_REPORT_SIZE};

#[cfg(target_os = "linux")]
pub use hidraw::HidrawTransport;
#[cfg(target_os = "linux")]
pub use sysfs::SysfsDiscovery;

#[cfg(not(target_os = "linux"))]
pub use hid_api::{HidApiDiscovery, HidApiTransport};

use std::sync::Arc;
use std::time::Duration;

/// The core transport trait - all backends implement this
///
/// All methods take `&self` so a reader thread and writers can share one
/// transport. Implementations serialize access internally.
pub trait Transport: Send + Sync {
    /// Descriptor of the device this transport talks to
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Open the device node
    ///
    /// With `exclusive`, an advisory lock is taken right after opening. If
    /// another process holds it, this fails with [`TransportError::Locked`]
    /// instead of blocking.
    fn open(&self, exclusive: bool) -> Result<(), TransportError>;

    /// Release the advisory lock, then the device handle
    ///
    /// Closing a closed transport is a no-op.
    fn close(&self) -> Result<(), TransportError>;

    /// Check if the device handle is held
    fn is_open(&self) -> bool;

    /// Read one input report
    ///
    /// # Arguments
    /// * `timeout` - Maximum time to wait, `None` blocks until data arrives
    ///
    /// # Returns
    /// `None` on timeout, `Some(report)` if data was received
    fn read_report(&self, timeout: Option<Duration>) -> Result<Option<InputReport>, TransportError>;

    /// Write one output report
    ///
    /// Fails with [`TransportError::ShortWrite`] unless the OS accepted the
    /// whole report (ID byte included).
    fn write_report(&self, report_id: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Get a feature report
    ///
    /// # Arguments
    /// * `report_id` - Feature report ID
    /// * `len` - Expected payload length (without report ID)
    ///
    /// # Returns
    /// Payload bytes following the report ID, at most `len` of them
    fn get_feature_report(&self, report_id: u8, len: usize) -> Result<Vec<u8>, TransportError>;
}

/// Type alias for a shared transport
pub type BoxedTransport = Arc<dyn Transport>;

/// Convert an optional timeout to the millisecond convention used by
/// `poll(2)` and hidapi (`-1` blocks)
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
        None => -1,
    }
}
