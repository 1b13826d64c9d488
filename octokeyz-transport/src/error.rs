//! Transport error types

use std::io;

use thiserror::Error;

/// Errors that can occur during transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("failed to open device {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("device is locked by another application: {path}")]
    Locked { path: String },

    #[error("device is open: {path}")]
    AlreadyOpen { path: String },

    #[error("device is not open: {path}")]
    NotOpen { path: String },

    #[error("failed to read input report from {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("failed to write output report {report_id} to {path}: {reason}")]
    WriteFailed {
        path: String,
        report_id: u8,
        reason: String,
    },

    #[error("short write of output report {report_id} to {path}: expected {expected} bytes, wrote {written}")]
    ShortWrite {
        path: String,
        report_id: u8,
        expected: usize,
        written: usize,
    },

    #[error("failed to get feature report {report_id} from {path}: {reason}")]
    FeatureReportFailed {
        path: String,
        report_id: u8,
        reason: String,
    },

    #[error("failed to close device {path}: {reason}")]
    CloseFailed { path: String, reason: String },
}

impl TransportError {
    /// Device path the error refers to, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            TransportError::EnumerationFailed(_) => None,
            TransportError::OpenFailed { path, .. }
            | TransportError::Locked { path }
            | TransportError::AlreadyOpen { path }
            | TransportError::NotOpen { path }
            | TransportError::ReadFailed { path, .. }
            | TransportError::WriteFailed { path, .. }
            | TransportError::ShortWrite { path, .. }
            | TransportError::FeatureReportFailed { path, .. }
            | TransportError::CloseFailed { path, .. } => Some(path),
        }
    }

    /// True for failures writing output reports (including short writes)
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            TransportError::WriteFailed { .. } | TransportError::ShortWrite { .. }
        )
    }
}

#[cfg(not(target_os = "linux"))]
impl From<hidapi::HidError> for TransportError {
    fn from(e: hidapi::HidError) -> Self {
        TransportError::EnumerationFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_write_message() {
        let err = TransportError::ShortWrite {
            path: "/dev/hidraw3".into(),
            report_id: 2,
            expected: 24,
            written: 8,
        };
        assert!(err.is_write_failure());
        assert_eq!(err.path(), Some("/dev/hidraw3"));
        assert_eq!(
            err.to_string(),
            "short write of output report 2 to /dev/hidraw3: expected 24 bytes, wrote 8"
        );
    }

    #[test]
    fn test_enumeration_has_no_path() {
        let err = TransportError::EnumerationFailed("no sysfs".into());
        assert_eq!(err.path(), None);
        assert!(!err.is_write_failure());
    }
}
