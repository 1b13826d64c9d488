//! Keypad error types

use octokeyz_transport::TransportError;
use thiserror::Error;

use crate::button::ButtonId;

/// Error categories, independent of the context a [`KeypadError`] carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    MoreThanOne,
    Locked,
    IsOpen,
    IsNotOpen,
    OpenFailed,
    EnumerationFailed,
    ReadFailed,
    WriteFailed,
    VersionIncompatible,
    DisplayNotSupported,
    DisplayBadNumberOfLines,
    DisplayDelayNotSupported,
    ButtonInvalid,
    ButtonHandlerInvalid,
    ModifierAlreadyActive,
    AlreadyListening,
}

/// Errors from keypad operations
#[derive(Error, Debug)]
pub enum KeypadError {
    /// No matching device, or none with the requested serial number
    #[error("{}", not_found_message(.serial_number))]
    NotFound { serial_number: Option<String> },

    /// Several devices match and no serial number was given
    #[error("More than one device found, select one by serial number: {}", .serial_numbers.join(", "))]
    MoreThanOne { serial_numbers: Vec<String> },

    #[error("Device is locked by another application: {path}")]
    Locked { path: String },

    #[error("Device is open: {path}")]
    IsOpen { path: String },

    #[error("Device is not open: {path}")]
    IsNotOpen { path: String },

    #[error("Failed to open device: {0}")]
    OpenFailed(#[source] TransportError),

    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(#[source] TransportError),

    #[error("Failed to read from device: {0}")]
    ReadFailed(#[source] TransportError),

    #[error("Failed to write to device: {0}")]
    WriteFailed(#[source] TransportError),

    /// Firmware speaks an interface version this host does not
    #[error("Device firmware version 0x{version:04x} is not compatible (supported major version 0x{supported_major:02x})")]
    VersionIncompatible { version: u16, supported_major: u8 },

    #[error("Device does not support display")]
    DisplayNotSupported,

    #[error("Device reports {lines} display lines, expected {expected}")]
    DisplayBadNumberOfLines { lines: u8, expected: u8 },

    #[error("Device does not support delayed display clear")]
    DisplayDelayNotSupported,

    /// Button or display line index out of range
    #[error("Invalid button: {0}")]
    ButtonInvalid(u8),

    #[error("Invalid handler for {0}")]
    ButtonHandlerInvalid(ButtonId),

    #[error("Modifier activated by more than one button")]
    ModifierAlreadyActive,

    #[error("Device is already listening")]
    AlreadyListening,
}

impl KeypadError {
    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeypadError::NotFound { .. } => ErrorKind::NotFound,
            KeypadError::MoreThanOne { .. } => ErrorKind::MoreThanOne,
            KeypadError::Locked { .. } => ErrorKind::Locked,
            KeypadError::IsOpen { .. } => ErrorKind::IsOpen,
            KeypadError::IsNotOpen { .. } => ErrorKind::IsNotOpen,
            KeypadError::OpenFailed(_) => ErrorKind::OpenFailed,
            KeypadError::EnumerationFailed(_) => ErrorKind::EnumerationFailed,
            KeypadError::ReadFailed(_) => ErrorKind::ReadFailed,
            KeypadError::WriteFailed(_) => ErrorKind::WriteFailed,
            KeypadError::VersionIncompatible { .. } => ErrorKind::VersionIncompatible,
            KeypadError::DisplayNotSupported => ErrorKind::DisplayNotSupported,
            KeypadError::DisplayBadNumberOfLines { .. } => ErrorKind::DisplayBadNumberOfLines,
            KeypadError::DisplayDelayNotSupported => ErrorKind::DisplayDelayNotSupported,
            KeypadError::ButtonInvalid(_) => ErrorKind::ButtonInvalid,
            KeypadError::ButtonHandlerInvalid(_) => ErrorKind::ButtonHandlerInvalid,
            KeypadError::ModifierAlreadyActive => ErrorKind::ModifierAlreadyActive,
            KeypadError::AlreadyListening => ErrorKind::AlreadyListening,
        }
    }
}

impl From<TransportError> for KeypadError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Locked { path } => KeypadError::Locked { path },
            TransportError::AlreadyOpen { path } => KeypadError::IsOpen { path },
            TransportError::NotOpen { path } => KeypadError::IsNotOpen { path },
            TransportError::EnumerationFailed(_) => KeypadError::EnumerationFailed(e),
            TransportError::OpenFailed { .. } | TransportError::CloseFailed { .. } => {
                KeypadError::OpenFailed(e)
            }
            TransportError::ReadFailed { .. } | TransportError::FeatureReportFailed { .. } => {
                KeypadError::ReadFailed(e)
            }
            TransportError::WriteFailed { .. } | TransportError::ShortWrite { .. } => {
                KeypadError::WriteFailed(e)
            }
        }
    }
}

impl From<std::convert::Infallible> for KeypadError {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

fn not_found_message(serial_number: &Option<String>) -> String {
    match serial_number {
        Some(s) => format!("Device not found: serial number {s}"),
        None => "Device not found".to_string(),
    }
}

/// Result type for keypad operations
pub type Result<T> = std::result::Result<T, KeypadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        let plain = KeypadError::NotFound {
            serial_number: None,
        };
        assert_eq!(plain.to_string(), "Device not found");

        let with_serial = KeypadError::NotFound {
            serial_number: Some("A1B2C3".into()),
        };
        assert_eq!(
            with_serial.to_string(),
            "Device not found: serial number A1B2C3"
        );
        assert_eq!(with_serial.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_more_than_one_lists_serials() {
        let err = KeypadError::MoreThanOne {
            serial_numbers: vec!["S1".into(), "S2".into()],
        };
        assert!(err.to_string().ends_with("S1, S2"));
        assert_eq!(err.kind(), ErrorKind::MoreThanOne);
    }

    #[test]
    fn test_transport_error_mapping() {
        let path = || "/dev/hidraw3".to_string();

        let cases = [
            (TransportError::Locked { path: path() }, ErrorKind::Locked),
            (TransportError::AlreadyOpen { path: path() }, ErrorKind::IsOpen),
            (TransportError::NotOpen { path: path() }, ErrorKind::IsNotOpen),
            (
                TransportError::EnumerationFailed("no sysfs".into()),
                ErrorKind::EnumerationFailed,
            ),
            (
                TransportError::ReadFailed {
                    path: path(),
                    reason: "eof".into(),
                },
                ErrorKind::ReadFailed,
            ),
            (
                TransportError::FeatureReportFailed {
                    path: path(),
                    report_id: 2,
                    reason: "pipe".into(),
                },
                ErrorKind::ReadFailed,
            ),
            (
                TransportError::ShortWrite {
                    path: path(),
                    report_id: 2,
                    expected: 24,
                    written: 3,
                },
                ErrorKind::WriteFailed,
            ),
        ];

        for (transport, kind) in cases {
            assert_eq!(KeypadError::from(transport).kind(), kind);
        }
    }

    #[test]
    fn test_version_message() {
        let err = KeypadError::VersionIncompatible {
            version: 0x0201,
            supported_major: 0x01,
        };
        assert_eq!(
            err.to_string(),
            "Device firmware version 0x0201 is not compatible (supported major version 0x01)"
        );
    }
}
