//! Firmware file identification and versioning policy.
//!
//! Parses the filename grammar `<device_name>-v<maj>.<min>-sch<n>-<release|
//! preview>[-<timestamp>].bin` into a [`FirmwareDescriptor`] and implements
//! the "is this candidate newer" total ordering the updater uses to decide
//! whether to install it.

use std::path::{Path, PathBuf};

use crate::device_id::DeviceName;

/// Where a [`FirmwareDescriptor`] was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareSource {
    File(PathBuf),
    Device,
}

/// Normalized description of a firmware image, parsed from a file on disk
/// or read back from a live device.
///
/// A descriptor with `error = true` must never be treated as installable;
/// `firmware_version` is present iff `error` is false. A device-sourced
/// descriptor never has `error = true` — [`FirmwareDescriptor::from_device`]
/// takes already-validated fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareDescriptor {
    pub source: FirmwareSource,
    pub device_name: Option<DeviceName>,
    pub firmware_version: Option<(u32, u32)>,
    pub schematic_version: Option<u32>,
    pub is_release: Option<bool>,
    pub timestamp: Option<u64>,
    pub error: bool,
    pub error_string: Option<String>,
}

impl FirmwareDescriptor {
    /// Build a descriptor directly from a live device's register readings.
    /// `is_release` is `None` for older devices that cannot report it.
    pub fn from_device(
        device_name: DeviceName,
        firmware_version: (u32, u32),
        schematic_version: u32,
        is_release: Option<bool>,
    ) -> Self {
        Self {
            source: FirmwareSource::Device,
            device_name: Some(device_name),
            firmware_version: Some(firmware_version),
            schematic_version: Some(schematic_version),
            is_release,
            timestamp: None,
            error: false,
            error_string: None,
        }
    }

    fn errored(path: &Path, message: impl Into<String>) -> Self {
        Self {
            source: FirmwareSource::File(path.to_path_buf()),
            device_name: None,
            firmware_version: None,
            schematic_version: None,
            is_release: None,
            timestamp: None,
            error: true,
            error_string: Some(message.into()),
        }
    }

    /// Parse a firmware filename into a descriptor. Never fails: any
    /// grammar violation yields a descriptor with `error = true` and a
    /// human-readable `error_string` rather than an `Err`.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::parse_filename(path)
    }

    fn parse_filename(path: &Path) -> Self {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Self::errored(path, "filename is not valid UTF-8");
        };

        let Some(stem) = file_name.strip_suffix(".bin") else {
            return Self::errored(path, "filename does not end in .bin");
        };

        let fields: Vec<&str> = stem.split('-').collect();
        if fields.len() < 4 {
            return Self::errored(
                path,
                format!("expected at least 4 dash-separated fields, got {}", fields.len()),
            );
        }

        let device_name = match fields[0].parse::<DeviceName>() {
            Ok(name) => name,
            Err(e) => return Self::errored(path, e.to_string()),
        };

        let version_field = fields[1];
        let Some(version_digits) = version_field.strip_prefix('v') else {
            return Self::errored(path, format!("version field '{version_field}' missing 'v' prefix"));
        };
        let firmware_version = match parse_version(version_digits) {
            Some(v) => v,
            None => return Self::errored(path, format!("invalid version field '{version_field}'")),
        };

        let sch_field = fields[2];
        let Some(sch_digits) = sch_field.strip_prefix("sch") else {
            return Self::errored(path, format!("schematic field '{sch_field}' missing 'sch' prefix"));
        };
        let Some(schematic_version) = parse_all_digits::<u32>(sch_digits) else {
            return Self::errored(path, format!("invalid schematic field '{sch_field}'"));
        };

        let release_field = fields[3];
        let is_release = match release_field {
            "release" => true,
            "preview" => false,
            other => return Self::errored(path, format!("unknown release type '{other}'")),
        };

        let timestamp = match fields.get(4) {
            Some(ts_field) => match parse_all_digits::<u64>(ts_field) {
                Some(ts) => Some(ts),
                None => return Self::errored(path, format!("invalid timestamp field '{ts_field}'")),
            },
            None => None,
        };

        Self {
            source: FirmwareSource::File(path.to_path_buf()),
            device_name: Some(device_name),
            firmware_version: Some(firmware_version),
            schematic_version: Some(schematic_version),
            is_release: Some(is_release),
            timestamp,
            error: false,
            error_string: None,
        }
    }

    /// Path this descriptor was parsed from, if any.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            FirmwareSource::File(path) => Some(path.as_path()),
            FirmwareSource::Device => None,
        }
    }

    /// Reject descriptors whose `error`, `device_name`, or
    /// `schematic_version` don't match the caller's expectations.
    pub fn verify(&self, expected_device_name: DeviceName, expected_schematic: u32) -> bool {
        if self.error {
            return false;
        }
        self.device_name == Some(expected_device_name)
            && self.schematic_version == Some(expected_schematic)
    }
}

fn parse_version(digits: &str) -> Option<(u32, u32)> {
    let (major, minor) = digits.split_once('.')?;
    if major.is_empty() || minor.is_empty() {
        return None;
    }
    if !major.bytes().all(|b| b.is_ascii_digit()) || !minor.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((major.parse().ok()?, minor.parse().ok()?))
}

fn parse_all_digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Total ordering policy deciding whether `candidate` is newer than
/// `reference`. `reference` is the device's current firmware (or another
/// candidate already chosen as the running best); `candidate` is the file
/// under consideration — callers throughout this crate pass arguments in
/// that order (current/reference first, candidate second).
pub fn is_newer(reference: &FirmwareDescriptor, candidate: &FirmwareDescriptor) -> bool {
    if reference.error || candidate.error {
        return false;
    }

    let (Some(ref_version), Some(cand_version)) =
        (reference.firmware_version, candidate.firmware_version)
    else {
        return false;
    };

    if cand_version > ref_version {
        return true;
    }
    if cand_version < ref_version {
        return false;
    }

    if let (Some(ref_release), Some(cand_release)) = (reference.is_release, candidate.is_release) {
        if cand_release && !ref_release {
            return true;
        }
    }

    if let (Some(ref_ts), Some(cand_ts)) = (reference.timestamp, candidate.timestamp) {
        if cand_ts > ref_ts {
            return true;
        }
    }

    false
}
