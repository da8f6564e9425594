//! Per-device install state machine.
//!
//! [`Updater`] owns a single [`FwDevice`] for the lifetime of an
//! `UpdateSession`: staging a file, streaming it over I2C, and classifying
//! the outcome. It never touches the filesystem lock or the notification
//! sink directly — those are composed around it by `UpdateCli`.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use tracing::{info, warn};

use crate::bus::I2cBus;
use crate::bus::FwDevice;
use crate::device_id::DeviceName;
use crate::error::{UpdateError, UpdateResult};
use crate::firmware_file::{self, FirmwareDescriptor};
use crate::packet::PacketBuilder;
use crate::protocol::{VERIFY_REPLY_MAX_RETRIES, VERIFY_REPLY_RETRY_DELAY_MS};

/// Root directory staged firmware binaries are copied into, one
/// subdirectory per device name.
pub const STAGING_ROOT: &str = "/tmp/pt-firmware-updater/bin/";

/// Outcome of [`Updater::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOutcome {
    pub success: bool,
    pub requires_restart: bool,
}

/// Per-device update session. Reads the device's current firmware identity
/// on construction and keeps it around as the "before" version that
/// [`Updater::install`] compares the post-reset read against.
pub struct Updater<B> {
    device: FwDevice<B>,
    device_info: FirmwareDescriptor,
    staging_root: PathBuf,
    staged_path: Option<PathBuf>,
    staged_md5: Option<String>,
}

impl<B: I2cBus> Updater<B> {
    /// Construct an updater, reading the device's current firmware
    /// identity into `device_info`.
    pub fn new(mut device: FwDevice<B>) -> Result<Self, UpdateError> {
        let device_info = device.read_info()?;
        Ok(Self {
            device,
            device_info,
            staging_root: PathBuf::from(STAGING_ROOT),
            staged_path: None,
            staged_md5: None,
        })
    }

    #[cfg(test)]
    fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    pub fn device_info(&self) -> &FirmwareDescriptor {
        &self.device_info
    }

    pub fn has_staged_updates(&self) -> bool {
        match (&self.staged_path, &self.staged_md5) {
            (Some(path), Some(expected)) => {
                path.is_file() && Self::md5_of(path).ok().as_deref() == Some(expected.as_str())
            }
            _ => false,
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.staging_root.join(self.device.device_name().as_str())
    }

    fn md5_of(path: &Path) -> UpdateResult<String> {
        let bytes = fs::read(path)?;
        let mut hasher = Md5::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Validate and copy `file` into the per-device staging directory.
    ///
    /// If `force` is false, rejects a file whose device name or schematic
    /// version doesn't match this device, or that is not strictly newer
    /// than the device's current firmware. If the device still has an
    /// uninstalled upload pending (`read_verify_reply()` already reports
    /// `OK`), fails with [`UpdateError::UpdatePending`] regardless of
    /// `force`.
    pub fn stage(&mut self, file: &FirmwareDescriptor, force: bool) -> UpdateResult<()> {
        let device_name = self.device.device_name();

        if self.upload_already_pending()? {
            warn!(%device_name, "an update is already pending, refusing to stage another");
            return Err(UpdateError::UpdatePending);
        }

        if !force {
            let schematic = self.device_info.schematic_version.unwrap_or_default();
            if !file.verify(device_name, schematic) || !firmware_file::is_newer(&self.device_info, file) {
                return Err(UpdateError::InvalidFirmwareFile(format!(
                    "{:?} is not a valid candidate for {device_name}",
                    file.path()
                )));
            }
        }

        let source_path = file.path().ok_or_else(|| {
            UpdateError::InvalidFirmwareFile("descriptor has no source path to stage".into())
        })?;

        let staging_dir = self.staging_dir();
        fs::create_dir_all(&staging_dir)?;
        let file_name = source_path
            .file_name()
            .ok_or_else(|| UpdateError::InvalidFirmwareFile("source path has no file name".into()))?;
        let dest = staging_dir.join(file_name);
        fs::copy(source_path, &dest)?;

        let digest = Self::md5_of(&dest)?;
        info!(%device_name, path = %dest.display(), md5 = %digest, "staged firmware update");
        self.staged_path = Some(dest);
        self.staged_md5 = Some(digest);
        Ok(())
    }

    /// Whether the device currently reports an uploaded-but-uninstalled
    /// binary. Retries transient read failures, matching the resilience
    /// budget for `read_verify_reply`.
    fn upload_already_pending(&mut self) -> UpdateResult<bool> {
        match self.read_verify_reply_with_retries() {
            Ok(reply) => Ok(PacketBuilder::parse_verify_reply(&reply).unwrap_or(false)),
            Err(_) => Ok(false),
        }
    }

    fn read_verify_reply_with_retries(&mut self) -> UpdateResult<[u8; 8]> {
        let mut last_err = None;
        for attempt in 0..VERIFY_REPLY_MAX_RETRIES {
            match self.device.read_verify_reply() {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < VERIFY_REPLY_MAX_RETRIES {
                        thread::sleep(Duration::from_millis(VERIFY_REPLY_RETRY_DELAY_MS));
                    }
                }
            }
        }
        Err(last_err.expect("loop runs at least once").into())
    }

    /// Drive the install state machine to completion, reporting progress
    /// through `on_progress` (0..=100).
    pub fn install(&mut self, mut on_progress: impl FnMut(u8)) -> UpdateResult<InstallOutcome> {
        let device_name = self.device.device_name();
        let staged_path = self
            .staged_path
            .clone()
            .ok_or_else(|| UpdateError::InvalidFirmwareFile("no staged file to install".into()))?;
        let expected_md5 = self.staged_md5.clone().expect("staged_md5 set with staged_path");

        if Self::md5_of(&staged_path)? != expected_md5 {
            warn!(%device_name, "staged file MD5 no longer matches the digest captured at staging time");
            return Err(UpdateError::CorruptStagedFile);
        }

        let builder = PacketBuilder::new(&staged_path);
        let start_packet = builder.make_start_packet()?;
        self.device.send_init_frame(&start_packet)?;

        let data_packets = builder.make_data_packets()?;
        let total = data_packets.len().max(1);
        info!(%device_name, frames = total, "sending firmware frames");
        for (i, packet) in data_packets.iter().enumerate() {
            self.device.send_data_frame(packet)?;
            let progress = (90 * (i + 1) / total) as u8;
            on_progress(progress);
        }

        let fw_version_before = self.device_info.firmware_version;
        let always_restart = device_name.always_requires_restart();

        let outcome = if always_restart {
            InstallOutcome {
                success: true,
                requires_restart: true,
            }
        } else {
            self.device.reset()?;
            thread::sleep(Duration::from_millis(crate::protocol::POST_RESET_SLEEP_MS));
            self.device_info = self.device.read_info()?;
            let success = match (fw_version_before, self.device_info.firmware_version) {
                (Some(before), Some(after)) => after > before,
                _ => false,
            };
            InstallOutcome {
                success,
                requires_restart: false,
            }
        };

        if outcome.success {
            info!(%device_name, requires_restart = outcome.requires_restart, "install succeeded");
        } else {
            warn!(%device_name, "install completed but version did not advance");
        }

        on_progress(100);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockI2cBus;
    use crate::protocol;
    use std::io::Write;

    fn make_device(name: DeviceName, bus: MockI2cBus) -> FwDevice<MockI2cBus> {
        FwDevice::new(bus, name, Duration::from_millis(0))
    }

    fn firmware_file(dir: &Path, name: &str, data: &[u8]) -> FirmwareDescriptor {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        FirmwareDescriptor::from_file(&path)
    }

    #[test]
    fn stage_rejects_non_newer_file_without_force() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![3]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![0]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![4]);
        let device = make_device(DeviceName::Pt4FoundationPlate, bus);
        let mut updater = Updater::new(device).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = firmware_file(dir.path(), "pt4_foundation_plate-v1.0-sch4-release.bin", &[0u8; 16]);

        let err = updater.stage(&file, false).unwrap_err();
        assert!(matches!(err, UpdateError::InvalidFirmwareFile(_)));
    }

    #[test]
    fn stage_accepts_newer_file_and_copies_into_staging_dir() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![1]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![0]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![4]);
        let device = make_device(DeviceName::Pt4FoundationPlate, bus);

        let staging = tempfile::tempdir().unwrap();
        let mut updater = Updater::new(device).unwrap().with_staging_root(staging.path());

        let source_dir = tempfile::tempdir().unwrap();
        let file = firmware_file(
            source_dir.path(),
            "pt4_foundation_plate-v2.0-sch4-release.bin",
            &[0u8; 300],
        );

        updater.stage(&file, false).unwrap();
        assert!(updater.has_staged_updates());
    }

    #[test]
    fn stage_force_skips_version_checks() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![9]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![9]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![1]);
        let device = make_device(DeviceName::Pt4Hub, bus);

        let staging = tempfile::tempdir().unwrap();
        let mut updater = Updater::new(device).unwrap().with_staging_root(staging.path());

        let source_dir = tempfile::tempdir().unwrap();
        let file = firmware_file(source_dir.path(), "pt4_hub-v0.1-sch99-preview.bin", &[1u8; 8]);

        updater.stage(&file, true).unwrap();
        assert!(updater.has_staged_updates());
    }

    #[test]
    fn stage_rejects_when_upload_already_pending() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![1]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![0]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![4]);
        bus.set_register(protocol::REG_FW_CHECK_OK, PacketBuilder::make_verify_reply(1).to_vec());
        let device = make_device(DeviceName::Pt4FoundationPlate, bus);
        let mut updater = Updater::new(device).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = firmware_file(dir.path(), "pt4_foundation_plate-v2.0-sch4-release.bin", &[0u8; 16]);

        let err = updater.stage(&file, false).unwrap_err();
        assert!(matches!(err, UpdateError::UpdatePending));
    }

    #[test]
    fn install_on_hub_always_reports_requires_restart() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![1]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![0]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![4]);
        let device = make_device(DeviceName::Pt4Hub, bus);

        let staging = tempfile::tempdir().unwrap();
        let mut updater = Updater::new(device).unwrap().with_staging_root(staging.path());

        let source_dir = tempfile::tempdir().unwrap();
        let file = firmware_file(source_dir.path(), "pt4_hub-v2.0-sch4-release.bin", &[7u8; 50]);
        updater.stage(&file, false).unwrap();

        let mut progress_values = vec![];
        let outcome = updater.install(|p| progress_values.push(p)).unwrap();

        assert_eq!(outcome, InstallOutcome { success: true, requires_restart: true });
        assert_eq!(progress_values.last(), Some(&100));
    }

    #[test]
    fn install_on_foundation_plate_resets_and_reverifies() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![1]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![0]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![4]);
        let device = make_device(DeviceName::Pt4FoundationPlate, bus);

        let staging = tempfile::tempdir().unwrap();
        let mut updater = Updater::new(device).unwrap().with_staging_root(staging.path());

        let source_dir = tempfile::tempdir().unwrap();
        let file = firmware_file(
            source_dir.path(),
            "pt4_foundation_plate-v2.0-sch4-release.bin",
            &[7u8; 50],
        );
        updater.stage(&file, false).unwrap();

        // Simulate the post-reset re-read reporting the new version.
        updater.device.bus_mut().set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![2]);

        let outcome = updater.install(|_| {}).unwrap();
        assert_eq!(outcome, InstallOutcome { success: true, requires_restart: false });
    }

    #[test]
    fn install_fails_if_staged_file_changed_after_staging() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![1]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![0]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![4]);
        let device = make_device(DeviceName::Pt4FoundationPlate, bus);

        let staging = tempfile::tempdir().unwrap();
        let mut updater = Updater::new(device).unwrap().with_staging_root(staging.path());

        let source_dir = tempfile::tempdir().unwrap();
        let file = firmware_file(
            source_dir.path(),
            "pt4_foundation_plate-v2.0-sch4-release.bin",
            &[7u8; 50],
        );
        updater.stage(&file, false).unwrap();

        fs::write(updater.staged_path.as_ref().unwrap(), [0u8; 10]).unwrap();

        let err = updater.install(|_| {}).unwrap_err();
        assert!(matches!(err, UpdateError::CorruptStagedFile));
    }
}
