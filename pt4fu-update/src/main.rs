mod notify_sink;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pt4fu_common::bus::{BusError, FwDevice, I2cBus};
use pt4fu_common::config::UpdateConfig;
use pt4fu_common::device_id::DeviceName;
use pt4fu_common::error::{FatalError, UpdateError};
use pt4fu_common::firmware_file::{self, FirmwareDescriptor};
use pt4fu_common::lock::Locker;
use pt4fu_common::notify::{Notifier, UpdateStatus};
use pt4fu_common::updater::Updater;

use notify_sink::DesktopNotificationSink;

/// On-demand single-device firmware updater.
///
/// Stages and installs one firmware file on one peripheral device over
/// I2C, the way `pt4fu-checkd` invokes this binary per detected device, or
/// as run directly by a developer against a specific `--path`.
#[derive(Parser)]
#[command(name = "pt4fu-update")]
#[command(about = "pi-top [4] peripheral firmware updater", long_about = None)]
#[command(version)]
struct Cli {
    /// Device to update.
    device: DeviceName,

    /// Skip the "is this candidate newer" check and install regardless.
    #[arg(short, long)]
    force: bool,

    /// Seconds to wait after each register write while streaming the update.
    #[arg(short, long, default_value_t = 0.1)]
    interval: f64,

    /// Firmware file to install. Omit to auto-discover the newest valid
    /// candidate under the firmware root.
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Prompt the user and report progress via desktop notifications.
    #[arg(short, long)]
    notify_user: bool,

    /// I2C bus number to use.
    #[arg(long)]
    i2c_bus: Option<u8>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "pt4fu_update=info",
        1 => "pt4fu_update=debug,pt4fu_common=debug",
        _ => "pt4fu_update=trace,pt4fu_common=trace",
    }
}

#[cfg(target_os = "linux")]
fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli) {
        Ok(success) => std::process::exit(if success { 0 } else { 1 }),
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// Find the newest firmware file under `firmware_root/<device>/` that is a
/// valid, strictly newer candidate for `current`. Mirrors
/// `pt4fu-checkd::scheduler::Scheduler::find_latest_firmware`, minus the
/// seen-paths bookkeeping a single one-shot invocation has no use for.
fn find_latest_firmware(
    device_name: DeviceName,
    firmware_dir: &Path,
    current: &FirmwareDescriptor,
) -> Option<FirmwareDescriptor> {
    let entries = std::fs::read_dir(firmware_dir).ok()?;
    let schematic = current.schematic_version.unwrap_or_default();

    let mut best: Option<FirmwareDescriptor> = None;
    for entry in entries.flatten() {
        let candidate = FirmwareDescriptor::from_file(entry.path());
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

/// Runs the update. Returns `Ok(true)` for success or a benign skip (no
/// candidate firmware, user declined the prompt, update already pending),
/// `Ok(false)` only when the install itself ran and failed.
#[cfg(target_os = "linux")]
fn run(cli: Cli) -> Result<bool> {
    use pt4fu_common::bus::LinuxI2cBus;

    info!("pt4fu-update - pi-top [4] peripheral firmware updater");
    info!("Version: {}", pt4fu_common::VERSION);

    if !pt4fu_common::host::is_supported_host() {
        info!("this program only runs on a pi-top [4]; nothing to do here");
        return Ok(true);
    }
    if !pt4fu_common::host::is_root() {
        return Err(FatalError::Unsupported(
            "pt4fu-update requires root privileges; run as root using 'sudo'".into(),
        )
        .into());
    }

    let config = UpdateConfig {
        force: cli.force,
        send_packet_interval_ms: (cli.interval * 1000.0).round() as u64,
        path: cli.path.clone(),
        notify_user: cli.notify_user,
        i2c_bus: cli.i2c_bus.unwrap_or(pt4fu_common::config::DEFAULT_I2C_BUS),
    };

    let device_name = cli.device;
    let send_packet_interval = std::time::Duration::from_millis(config.send_packet_interval_ms);

    let mut probe_bus = LinuxI2cBus::new(config.i2c_bus, device_name.i2c_addr())
        .context("failed to open I2C bus")?;
    if !probe_bus.probe(device_name.i2c_addr()) {
        return Err(UpdateError::Bus(BusError::NotResponding(device_name.i2c_addr())).into());
    }

    let bus = LinuxI2cBus::new(config.i2c_bus, device_name.i2c_addr())
        .context("failed to open I2C bus")?;
    let mut device = FwDevice::new(bus, device_name, send_packet_interval);

    let part_name = device.part_name().context("failed to read device part name")?;
    if part_name != device_name.expected_part_name() {
        return Err(UpdateError::InvalidFirmwareDevice(format!(
            "expected {device_name} part name {:?}, found {part_name:?}",
            device_name.expected_part_name()
        ))
        .into());
    }

    let mut updater = Updater::new(device).context("failed to read device firmware identity")?;

    let candidate = match &config.path {
        Some(path) => {
            if !path.is_file() {
                return Err(FatalError::FirmwareNotFound(path.clone()).into());
            }
            FirmwareDescriptor::from_file(path)
        }
        None => {
            let firmware_dir = PathBuf::from(pt4fu_common::config::DEFAULT_FIRMWARE_ROOT)
                .join(device_name.as_str());
            match find_latest_firmware(device_name, &firmware_dir, updater.device_info()) {
                Some(candidate) => candidate,
                None => {
                    info!(%device_name, "no newer firmware candidate found");
                    return Ok(true);
                }
            }
        }
    };

    match updater.stage(&candidate, config.force) {
        Ok(()) => {}
        Err(UpdateError::InvalidFirmwareFile(_)) => {
            info!(%device_name, "skipping update: no valid candidate firmware");
            return Ok(true);
        }
        Err(UpdateError::UpdatePending) => {
            info!(%device_name, "skipping update: an update is already pending");
            return Ok(true);
        }
        Err(e) => return Err(e).context("failed to stage firmware update"),
    }

    let mut notifier = config
        .notify_user
        .then(|| Notifier::new(DesktopNotificationSink));

    if let Some(notifier) = notifier.as_mut() {
        if !notifier.prompt_accepted(device_name) {
            info!(%device_name, "user declined the update, exiting");
            return Ok(true);
        }
        notifier.emit(device_name, UpdateStatus::Ongoing);
    }

    let locker = Locker::new();
    let (success, requires_restart) = {
        let _lock = locker
            .acquire(device_name)
            .context("failed to acquire device lock")?;
        let outcome = updater
            .install(|progress| debug!(%device_name, progress, "install progress"))
            .context("failed to install firmware update")?;
        (outcome.success, outcome.requires_restart)
    };

    if success {
        info!(%device_name, "operation finished successfully");
        if requires_restart && device_name == DeviceName::Pt4Hub {
            info!("restart your pi-top to apply changes");
        } else {
            info!("disconnect and reconnect your device to apply changes");
        }
    } else {
        warn!(%device_name, "a problem was encountered while attempting to upgrade; please reboot and try again");
    }

    if let Some(notifier) = notifier.as_mut() {
        let status = match (success, requires_restart) {
            (true, true) => UpdateStatus::SuccessRequiresRestart,
            (true, false) => UpdateStatus::Success,
            (false, _) => UpdateStatus::Failure,
        };
        notifier.emit(device_name, status);
    }

    Ok(success)
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("pt4fu-update requires Linux for I2C device access");
    std::process::exit(1);
}
