//! Detection and scheduling loop.
//!
//! Polls the known device catalog for newer firmware and delegates actual
//! installation to a `pt4fu-update` child process, one device at a time,
//! sleeping `loop_time` seconds between sweeps.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use pt4fu_common::config::CheckerConfig;
use pt4fu_common::device_id::DeviceName;
use pt4fu_common::error::UpdateError;
use pt4fu_common::firmware_file::{self, FirmwareDescriptor};
use pt4fu_common::lock::Locker;

/// Queries I2C address presence and reads a device's current firmware
/// identity. Abstracted so the scheduler's bookkeeping can be tested
/// without real hardware.
pub trait Prober {
    fn probe(&mut self, device_name: DeviceName) -> bool;

    /// Read the device's current firmware identity, after cross-checking
    /// that the part answering at this address is really `device_name`'s
    /// class. Returns [`UpdateError::InvalidFirmwareDevice`] on a part-name
    /// mismatch, which the caller treats the same as "not present".
    fn read_descriptor(&mut self, device_name: DeviceName) -> Result<FirmwareDescriptor, UpdateError>;
}

/// `Prober` backed by a real Linux I2C bus.
#[cfg(target_os = "linux")]
pub struct LinuxProber {
    bus: u8,
    send_packet_interval: Duration,
}

#[cfg(target_os = "linux")]
impl LinuxProber {
    pub fn new(bus: u8, send_packet_interval: Duration) -> Self {
        Self {
            bus,
            send_packet_interval,
        }
    }
}

#[cfg(target_os = "linux")]
impl Prober for LinuxProber {
    fn probe(&mut self, device_name: DeviceName) -> bool {
        use pt4fu_common::bus::{I2cBus, LinuxI2cBus};
        match LinuxI2cBus::new(self.bus, device_name.i2c_addr()) {
            Ok(mut bus) => bus.probe(device_name.i2c_addr()),
            Err(_) => false,
        }
    }

    fn read_descriptor(&mut self, device_name: DeviceName) -> Result<FirmwareDescriptor, UpdateError> {
        use pt4fu_common::bus::{FwDevice, LinuxI2cBus};
        let bus = LinuxI2cBus::new(self.bus, device_name.i2c_addr())?;
        let mut device = FwDevice::new(bus, device_name, self.send_packet_interval);

        let part_name = device.part_name()?;
        if part_name != device_name.expected_part_name() {
            return Err(UpdateError::InvalidFirmwareDevice(format!(
                "expected {device_name} part name {:?}, found {part_name:?}",
                device_name.expected_part_name()
            )));
        }

        Ok(device.read_info()?)
    }
}

/// Runs `pt4fu-update` for a resolved device + firmware path. Abstracted so
/// tests can assert on invocations without spawning a real process.
pub trait UpdateLauncher {
    async fn run(&mut self, device_name: DeviceName, firmware_path: &Path, notify_user: bool) -> bool;
}

/// Invokes the real `pt4fu-update` binary and awaits it to completion.
pub struct ProcessUpdateLauncher {
    pub binary_path: PathBuf,
}

impl UpdateLauncher for ProcessUpdateLauncher {
    async fn run(&mut self, device_name: DeviceName, firmware_path: &Path, notify_user: bool) -> bool {
        let mut command = tokio::process::Command::new(&self.binary_path);
        command
            .arg(device_name.as_str())
            .arg("--path")
            .arg(firmware_path);
        if notify_user {
            command.arg("--notify-user");
        }

        info!(?command, "running pt4fu-update");
        match command.status().await {
            Ok(status) => status.success(),
            Err(e) => {
                warn!("failed to launch pt4fu-update: {e}");
                false
            }
        }
    }
}

/// Per-device bookkeeping the scheduler keeps between sweeps.
#[derive(Default)]
struct DeviceSession {
    notified_this_session: bool,
    seen_firmware_paths: HashSet<PathBuf>,
}

/// Detection and scheduling loop.
pub struct Scheduler<P, L> {
    config: CheckerConfig,
    locker: Locker,
    prober: P,
    launcher: L,
    sessions: HashMap<DeviceName, DeviceSession>,
    /// Polling cadence for [`Scheduler::wait_for_portal_ready`]. 1 Hz in
    /// production; tests shrink this so S7-style scenarios don't take real
    /// minutes to run.
    portal_poll_interval: Duration,
}

impl<P: Prober, L: UpdateLauncher> Scheduler<P, L> {
    pub fn new(config: CheckerConfig, prober: P, launcher: L) -> Self {
        Self {
            config,
            locker: Locker::new(),
            prober,
            launcher,
            sessions: HashMap::new(),
            portal_poll_interval: Duration::from_secs(1),
        }
    }

    #[cfg(test)]
    fn with_portal_poll_interval(mut self, interval: Duration) -> Self {
        self.portal_poll_interval = interval;
        self
    }

    /// Wait for the `pt-os-web-portal` ready breadcrumb, polling at 1 Hz,
    /// up to `wait_timeout` seconds (extendable to `max_wait_timeout` by
    /// the presence of the extend-timeout breadcrumb). Skipped entirely
    /// when `force` is set by the caller before invoking `run`.
    pub async fn wait_for_portal_ready(&self) {
        let ready = &self.config.ready_breadcrumb;
        let extend = &self.config.extend_timeout_breadcrumb;

        let mut waited = 0u64;
        loop {
            if ready.exists() {
                info!("pt-os-web-portal reported ready after {waited}s");
                return;
            }

            let using_extended = extend.exists();
            let budget = if using_extended {
                self.config.max_wait_timeout_secs
            } else {
                self.config.wait_timeout_secs
            };

            if waited > budget {
                info!("portal-ready wait timed out after {waited}s");
                return;
            }

            tokio::time::sleep(self.portal_poll_interval).await;
            waited += 1;
        }
    }

    /// Run one sweep over the device catalog.
    pub async fn run_once(&mut self) {
        for device_name in DeviceName::ALL {
            if let Err(e) = self.check_device(device_name).await {
                warn!("{device_name} error: {e}");
            }
        }
    }

    async fn check_device(&mut self, device_name: DeviceName) -> Result<(), UpdateError> {
        if !self.prober.probe(device_name) {
            self.sessions.remove(&device_name);
            return Ok(());
        }

        let session = self.sessions.entry(device_name).or_default();
        if session.notified_this_session {
            return Ok(());
        }

        match self.locker.is_locked(device_name) {
            Ok(true) => {
                debug!("{device_name} is locked, skipping this sweep");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                warn!("{device_name} lock probe failed: {e}");
                return Ok(());
            }
        }

        let current = match self.prober.read_descriptor(device_name) {
            Ok(descriptor) => descriptor,
            Err(UpdateError::InvalidFirmwareDevice(reason)) => {
                debug!("{device_name}: {reason}, treating as not present");
                self.sessions.remove(&device_name);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let firmware_dir = self.config.firmware_root.join(device_name.as_str());
        let Some(candidate) = self.find_latest_firmware(device_name, &firmware_dir, &current) else {
            return Ok(());
        };

        let Some(path) = candidate.path().map(Path::to_path_buf) else {
            return Ok(());
        };

        // The forced flow skips user interaction entirely: no prompt, no
        // notification of the outcome either.
        let _succeeded = self
            .launcher
            .run(device_name, &path, !self.config.force)
            .await;
        // Marked unconditionally, win or lose: a device is only ever
        // launched once per session regardless of outcome, matching the
        // at-most-once notification guarantee — a persistently failing
        // install must not re-prompt the user every sweep.
        if let Some(session) = self.sessions.get_mut(&device_name) {
            session.notified_this_session = true;
        }
        Ok(())
    }

    fn find_latest_firmware(
        &mut self,
        device_name: DeviceName,
        firmware_dir: &Path,
        current: &FirmwareDescriptor,
    ) -> Option<FirmwareDescriptor> {
        let entries = std::fs::read_dir(firmware_dir).ok()?;
        let session = self.sessions.entry(device_name).or_default();

        let mut best: Option<FirmwareDescriptor> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            if session.seen_firmware_paths.contains(&path) {
                continue;
            }
            session.seen_firmware_paths.insert(path.clone());

            let candidate = FirmwareDescriptor::from_file(&path);
            let schematic = current.schematic_version.unwrap_or_default();
            if !candidate.verify(device_name, schematic) {
                continue;
            }
            if !firmware_file::is_newer(current, &candidate) {
                continue;
            }
            let better_than_best = match &best {
                Some(b) => firmware_file::is_newer(b, &candidate),
                None => true,
            };
            if better_than_best {
                best = Some(candidate);
            }
        }
        best
    }

    /// Run the full loop: wait for the portal if not forced, then sweep
    /// repeatedly, sleeping `loop_time` between sweeps. A forced run does
    /// exactly one sweep and returns.
    pub async fn run(&mut self) {
        if !self.config.force {
            self.wait_for_portal_ready().await;
        }

        loop {
            self.run_once().await;

            if self.config.force {
                return;
            }

            tokio::time::sleep(Duration::from_secs(self.config.loop_time_secs)).await;
        }
    }
}
