//! Block devices whose removal forces a shutdown.

use std::path::Path;
use thiserror::Error;

/// Path prefixes of block devices that may be watched.
const SUPPORTED_PREFIXES: &[&str] = &[
    "/dev/sr", "/dev/nvme", "/dev/sd", "/dev/mmc", "/dev/vd", "/dev/xvd", "/dev/hd",
];

/// Prefix of optical drive names (`sr0`, `sr1`, ...).
pub const OPTICAL_PREFIX: &str = "sr";

/// Why a device path was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DevicePathError {
    #[error("The device '{0}' does not exist!")]
    Missing(String),
    #[error("The device '{0}' is not supported!")]
    UnsupportedPrefix(String),
    #[error("The device '{0}' is not directly under /dev!")]
    BadDepth(String),
}

/// A watched block device, identified by its short name (`sda3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDevice {
    name: String,
}

impl TargetDevice {
    /// Validate a device path like `/dev/sda3` without touching the filesystem.
    pub fn from_path(path: &str) -> Result<Self, DevicePathError> {
        if !SUPPORTED_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return Err(DevicePathError::UnsupportedPrefix(path.to_string()));
        }

        if path.matches('/').count() != 2 {
            return Err(DevicePathError::BadDepth(path.to_string()));
        }

        // Prefix and depth checks leave a non-empty name after "/dev/".
        let name = &path["/dev/".len()..];

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Validate a device path and check that it exists.
    pub fn open(path: &str) -> Result<Self, DevicePathError> {
        if !Path::new(path).exists() {
            return Err(DevicePathError::Missing(path.to_string()));
        }
        Self::from_path(path)
    }

    /// Construct directly from a short name.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_optical(&self) -> bool {
        self.name.starts_with(OPTICAL_PREFIX)
    }
}

impl std::fmt::Display for TargetDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/dev/{}", self.name)
    }
}

/// The set of watched devices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSet {
    devices: Vec<TargetDevice>,
}

impl TargetSet {
    pub fn new(devices: Vec<TargetDevice>) -> Self {
        Self { devices }
    }

    pub fn contains(&self, name: &[u8]) -> bool {
        self.devices.iter().any(|d| d.name.as_bytes() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetDevice> {
        self.devices.iter()
    }
}
