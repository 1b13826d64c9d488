//! Linux device enumeration through sysfs
//!
//! Every USB device shows up as a symlink under `/sys/bus/usb/devices`.
//! Interface entries (names containing `:`) are skipped. A device is kept
//! only if its identification attributes parse and exactly one hidraw node
//! hangs below it at `<dev>/<interface>/<hid>/hidraw/hidrawN`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::discovery::DeviceDiscovery;
use crate::error::TransportError;
use crate::hidraw::HidrawTransport;
use crate::types::{matches_any, DeviceDescriptor, DeviceFilter};
use crate::BoxedTransport;

const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";
const DEV_DIR: &str = "/dev";

/// sysfs-based device discovery
pub struct SysfsDiscovery {
    root: PathBuf,
    dev_dir: PathBuf,
}

impl Default for SysfsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsDiscovery {
    /// Discovery over the live system
    pub fn new() -> Self {
        Self::with_root(SYSFS_USB_DEVICES, DEV_DIR)
    }

    /// Discovery over an alternative tree
    ///
    /// # Arguments
    /// * `root` - Directory holding the per-device symlinks
    /// * `dev_dir` - Directory the hidraw node names are resolved against
    pub fn with_root(root: impl Into<PathBuf>, dev_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dev_dir: dev_dir.into(),
        }
    }

    /// Read every HID-capable USB device, unfiltered
    pub fn scan(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            TransportError::EnumerationFailed(format!("{}: {}", self.root.display(), e))
        })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                TransportError::EnumerationFailed(format!("{}: {}", self.root.display(), e))
            })?;

            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.contains(':') {
                continue;
            }
            match entry.file_type() {
                Ok(t) if t.is_symlink() => {}
                _ => continue,
            }

            if let Some(device) = self.read_device(&entry.path()) {
                trace!("sysfs device {} -> {}", name, device.path);
                devices.push(device);
            }
        }

        // read_dir order is unspecified; keep results stable
        devices.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(devices)
    }

    fn read_device(&self, dir: &Path) -> Option<DeviceDescriptor> {
        let vendor_id = read_hex_u16(dir, "idVendor")?;
        let product_id = read_hex_u16(dir, "idProduct")?;
        let version = read_hex_u16(dir, "bcdDevice")?;

        let node = match find_hidraw_nodes(dir).as_slice() {
            [single] => single.clone(),
            [] => return None,
            many => {
                debug!(
                    "Skipping {}: {} hidraw nodes found",
                    dir.display(),
                    many.len()
                );
                return None;
            }
        };

        Some(DeviceDescriptor {
            vendor_id,
            product_id,
            version,
            manufacturer: read_string(dir, "manufacturer").unwrap_or_default(),
            product: read_string(dir, "product").unwrap_or_default(),
            serial_number: read_string(dir, "serial").unwrap_or_default(),
            path: self.dev_dir.join(node).to_string_lossy().into_owned(),
        })
    }
}

impl DeviceDiscovery for SysfsDiscovery {
    fn list_devices(
        &self,
        filters: &[DeviceFilter],
    ) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let devices: Vec<_> = self
            .scan()?
            .into_iter()
            .filter(|d| matches_any(filters, d))
            .collect();
        debug!("Found {} matching device(s)", devices.len());
        Ok(devices)
    }

    fn transport_for(&self, device: &DeviceDescriptor) -> Result<BoxedTransport, TransportError> {
        Ok(std::sync::Arc::new(HidrawTransport::new(device.clone())))
    }
}

fn read_string(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_hex_u16(dir: &Path, attr: &str) -> Option<u16> {
    u16::from_str_radix(&read_string(dir, attr)?, 16).ok()
}

/// Names of hidraw nodes exactly three levels below `dir`
fn find_hidraw_nodes(dir: &Path) -> Vec<String> {
    let mut nodes = Vec::new();
    for interface in subdirs(dir) {
        for hid in subdirs(&interface) {
            let Ok(entries) = fs::read_dir(hid.join("hidraw")) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if is_hidraw_name(&name) {
                    nodes.push(name);
                }
            }
        }
    }
    nodes
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// `hidraw` followed by at least one digit
fn is_hidraw_name(name: &str) -> bool {
    name.strip_prefix("hidraw")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    struct FakeSysfs {
        _tmp: tempfile::TempDir,
        devices: PathBuf,
        bus: PathBuf,
    }

    impl FakeSysfs {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let devices = tmp.path().join("devices");
            let bus = tmp.path().join("bus");
            fs::create_dir_all(&devices).unwrap();
            fs::create_dir_all(&bus).unwrap();
            Self {
                _tmp: tmp,
                devices,
                bus,
            }
        }

        fn add(&self, name: &str, attrs: &[(&str, &str)], hidraw: &[&str]) {
            let real = self.devices.join(name);
            fs::create_dir_all(&real).unwrap();
            for (k, v) in attrs {
                fs::write(real.join(k), format!("{v}\n")).unwrap();
            }
            for (i, node) in hidraw.iter().enumerate() {
                let dir = real
                    .join(format!("{name}:1.{i}"))
                    .join(format!("0003:1D50:6184.000{i}"))
                    .join("hidraw")
                    .join(node);
                fs::create_dir_all(dir).unwrap();
            }
            symlink(&real, self.bus.join(name)).unwrap();
        }

        fn discovery(&self) -> SysfsDiscovery {
            SysfsDiscovery::with_root(&self.bus, "/dev")
        }
    }

    fn octokeyz_attrs(serial: &'static str) -> Vec<(&'static str, &'static str)> {
        vec![
            ("idVendor", "1d50"),
            ("idProduct", "6184"),
            ("bcdDevice", "0101"),
            ("manufacturer", "rgm.io"),
            ("product", "octokeyz"),
            ("serial", serial),
        ]
    }

    #[test]
    fn test_scan_reads_attributes() {
        let fake = FakeSysfs::new();
        fake.add("1-2", &octokeyz_attrs("A1B2C3"), &["hidraw3"]);

        let devices = fake.discovery().scan().unwrap();
        assert_eq!(devices.len(), 1);
        let d = &devices[0];
        assert_eq!(d.vendor_id, 0x1d50);
        assert_eq!(d.product_id, 0x6184);
        assert_eq!(d.version, 0x0101);
        assert_eq!(d.manufacturer, "rgm.io");
        assert_eq!(d.product, "octokeyz");
        assert_eq!(d.serial_number, "A1B2C3");
        assert_eq!(d.path, "/dev/hidraw3");
    }

    #[test]
    fn test_scan_skips_interfaces_and_plain_dirs() {
        let fake = FakeSysfs::new();
        fake.add("1-2:1.0", &octokeyz_attrs("IFACE"), &["hidraw1"]);

        // Real directory, not a symlink
        let plain = fake.bus.join("1-3");
        fs::create_dir_all(plain.join("1-3:1.0/0003:1D50:6184.0001/hidraw/hidraw2")).unwrap();
        for (k, v) in octokeyz_attrs("PLAIN") {
            fs::write(plain.join(k), v).unwrap();
        }

        assert!(fake.discovery().scan().unwrap().is_empty());
    }

    #[test]
    fn test_scan_requires_exactly_one_hidraw() {
        let fake = FakeSysfs::new();
        fake.add("1-1", &octokeyz_attrs("NONE"), &[]);
        fake.add("1-2", &octokeyz_attrs("TWO"), &["hidraw4", "hidraw5"]);
        fake.add("1-3", &octokeyz_attrs("BADNAME"), &["hidrawx"]);
        fake.add("1-4", &octokeyz_attrs("ONE"), &["hidraw6"]);

        let devices = fake.discovery().scan().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number, "ONE");
    }

    #[test]
    fn test_scan_skips_unparsable_ids_and_defaults_strings() {
        let fake = FakeSysfs::new();
        fake.add(
            "1-1",
            &[("idVendor", "zzzz"), ("idProduct", "6184"), ("bcdDevice", "0101")],
            &["hidraw1"],
        );
        fake.add(
            "1-2",
            &[("idVendor", "1d50"), ("idProduct", "6184"), ("bcdDevice", "0100")],
            &["hidraw2"],
        );

        let devices = fake.discovery().scan().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].manufacturer, "");
        assert_eq!(devices[0].serial_number, "");
        assert_eq!(devices[0].version, 0x0100);
    }

    #[test]
    fn test_list_devices_applies_filters() {
        let fake = FakeSysfs::new();
        fake.add("1-1", &octokeyz_attrs("A"), &["hidraw1"]);
        fake.add(
            "1-2",
            &[
                ("idVendor", "16c0"),
                ("idProduct", "05df"),
                ("bcdDevice", "0100"),
                ("manufacturer", "someone"),
                ("product", "blinkstick"),
            ],
            &["hidraw2"],
        );

        let filters = [
            DeviceFilter::new(0x1d50, 0x6184),
            DeviceFilter::new(0x16c0, 0x05df).with_strings("rgm.io", "b8"),
        ];
        let devices = fake.discovery().list_devices(&filters).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, "/dev/hidraw1");
    }

    #[test]
    fn test_missing_root_is_enumeration_error() {
        let d = SysfsDiscovery::with_root("/nonexistent/sysfs/usb", "/dev");
        assert!(matches!(
            d.list_devices(&[]),
            Err(TransportError::EnumerationFailed(_))
        ));
    }

    #[test]
    fn test_is_hidraw_name() {
        assert!(is_hidraw_name("hidraw0"));
        assert!(is_hidraw_name("hidraw12"));
        assert!(!is_hidraw_name("hidraw"));
        assert!(!is_hidraw_name("hidrawx"));
        assert!(!is_hidraw_name("event3"));
    }
}
