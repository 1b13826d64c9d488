//! Device discovery for octokeyz/b8 keypads

use crate::error::TransportError;
use crate::types::{DeviceDescriptor, DeviceFilter};
use crate::BoxedTransport;

/// Device discovery abstraction
///
/// Enumeration is a one-shot snapshot; there is no hot-plug watching.
pub trait DeviceDiscovery: Send + Sync {
    /// List currently connected devices matching any of `filters`
    fn list_devices(&self, filters: &[DeviceFilter])
        -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Create a transport for a listed device
    ///
    /// The returned transport is closed; callers open it when ready.
    fn transport_for(&self, device: &DeviceDescriptor) -> Result<BoxedTransport, TransportError>;
}

/// Discovery backend for the current platform
pub fn default_discovery() -> Box<dyn DeviceDiscovery> {
    #[cfg(target_os = "linux")]
    {
        Box::new(crate::sysfs::SysfsDiscovery::new())
    }

    #[cfg(not(target_os = "linux"))]
    {
        Box::new(crate::hid_api::HidApiDiscovery::new())
    }
}

/// List matching devices with the platform backend
pub fn list_devices(filters: &[DeviceFilter]) -> Result<Vec<DeviceDescriptor>, TransportError> {
    default_discovery().list_devices(filters)
}
