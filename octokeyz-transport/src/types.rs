//! Common types for transport layer

use serde::Serialize;

/// Maximum size of any report exchanged with the keypad, report ID included
pub const MAX_REPORT_SIZE: usize = 64;

/// Identification of one physical keypad, as found by enumeration
///
/// Nothing is opened while building a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Firmware version (bcdDevice). The upper byte is the interface version.
    pub version: u16,
    /// Manufacturer string (empty if the device reports none)
    pub manufacturer: String,
    /// Product string (empty if the device reports none)
    pub product: String,
    /// Serial number (empty if the device reports none)
    pub serial_number: String,
    /// Device node or OS device-interface path
    pub path: String,
}

impl DeviceDescriptor {
    /// Major interface version (upper byte of the firmware version)
    pub fn version_major(&self) -> u8 {
        (self.version >> 8) as u8
    }

    /// Minor firmware revision (lower byte of the firmware version)
    pub fn version_minor(&self) -> u8 {
        self.version as u8
    }
}

/// Enumeration filter
///
/// Vendor and product ids must always match. Strings are compared only when
/// set, which is needed for devices using shared vendor/product ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl DeviceFilter {
    /// Filter on vendor/product ids only
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            manufacturer: None,
            product: None,
        }
    }

    /// Also require the manufacturer and product strings
    pub fn with_strings(mut self, manufacturer: &str, product: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self.product = Some(product.to_string());
        self
    }

    /// Check a descriptor against this filter
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        if device.vendor_id != self.vendor_id || device.product_id != self.product_id {
            return false;
        }
        if let Some(ref m) = self.manufacturer {
            if *m != device.manufacturer {
                return false;
            }
        }
        if let Some(ref p) = self.product {
            if *p != device.product {
                return false;
            }
        }
        true
    }
}

/// Check a descriptor against a set of filters (any match wins)
pub fn matches_any(filters: &[DeviceFilter], device: &DeviceDescriptor) -> bool {
    filters.iter().any(|f| f.matches(device))
}

/// One input report as delivered by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputReport {
    /// Report ID (first byte on the wire)
    pub id: u8,
    /// Payload following the report ID
    pub data: Vec<u8>,
}

impl InputReport {
    /// Split a raw buffer into report ID and payload
    ///
    /// Returns `None` for an empty buffer.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let (&id, data) = buf.split_first()?;
        Some(Self {
            id,
            data: data.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(vid: u16, pid: u16, manufacturer: &str, product: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            vendor_id: vid,
            product_id: pid,
            version: 0x0101,
            manufacturer: manufacturer.into(),
            product: product.into(),
            serial_number: "A1B2C3".into(),
            path: "/dev/hidraw0".into(),
        }
    }

    #[test]
    fn test_version_bytes() {
        let mut d = descriptor(0x1d50, 0x6184, "rgm.io", "octokeyz");
        d.version = 0x0203;
        assert_eq!(d.version_major(), 0x02);
        assert_eq!(d.version_minor(), 0x03);
    }

    #[test]
    fn test_filter_ids_only() {
        let f = DeviceFilter::new(0x1d50, 0x6184);
        assert!(f.matches(&descriptor(0x1d50, 0x6184, "", "")));
        assert!(!f.matches(&descriptor(0x1d50, 0x6185, "", "")));
        assert!(!f.matches(&descriptor(0x1d51, 0x6184, "", "")));
    }

    #[test]
    fn test_filter_with_strings() {
        // Shared V-USB ids need the strings to tell devices apart
        let f = DeviceFilter::new(0x16c0, 0x05df).with_strings("rgm.io", "b8");
        assert!(f.matches(&descriptor(0x16c0, 0x05df, "rgm.io", "b8")));
        assert!(!f.matches(&descriptor(0x16c0, 0x05df, "someone", "b8")));
        assert!(!f.matches(&descriptor(0x16c0, 0x05df, "rgm.io", "blinkstick")));
    }

    #[test]
    fn test_matches_any() {
        let filters = [
            DeviceFilter::new(0x1d50, 0x6184),
            DeviceFilter::new(0x16c0, 0x05df).with_strings("rgm.io", "b8"),
        ];
        assert!(matches_any(&filters, &descriptor(0x16c0, 0x05df, "rgm.io", "b8")));
        assert!(matches_any(&filters, &descriptor(0x1d50, 0x6184, "", "")));
        assert!(!matches_any(&[], &descriptor(0x1d50, 0x6184, "", "")));
    }

    #[test]
    fn test_input_report_split() {
        let r = InputReport::from_bytes(&[0x01, 0x05]).unwrap();
        assert_eq!(r.id, 1);
        assert_eq!(r.data, vec![0x05]);
        assert!(InputReport::from_bytes(&[]).is_none());
    }
}
