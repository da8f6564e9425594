pub mod scheduler;
pub mod signals;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pt4fu_common::config::CheckerConfig;
use pt4fu_common::error::FatalError;

use scheduler::{ProcessUpdateLauncher, Scheduler};

/// pi-top [4] peripheral firmware update checker daemon.
///
/// Periodically probes known device addresses for newer firmware and
/// triggers `pt4fu-update` to install it, one device at a time.
#[derive(Parser)]
#[command(name = "pt4fu-checkd")]
#[command(about = "pi-top [4] peripheral firmware update checker", long_about = None)]
#[command(version)]
struct Cli {
    /// Run a single detection sweep and exit, skipping the portal-ready wait.
    #[arg(long)]
    force: bool,

    /// Seconds between sweeps (1-300).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=300))]
    loop_time: Option<u64>,

    /// Seconds to wait for the portal-ready breadcrumb before proceeding anyway (0-999).
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=999))]
    wait_timeout: Option<u64>,

    /// Extended wait budget once the extend-timeout breadcrumb appears (0-9999).
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=9999))]
    max_wait_timeout: Option<u64>,

    /// I2C bus number to probe devices on.
    #[arg(long)]
    i2c_bus: Option<u8>,

    /// Root directory to scan for candidate firmware files.
    #[arg(long)]
    firmware_root: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "pt4fu_checkd=info",
        1 => "pt4fu_checkd=debug,pt4fu_common=debug",
        _ => "pt4fu_checkd=trace,pt4fu_common=trace",
    }
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

#[cfg(target_os = "linux")]
async fn run(cli: Cli) -> Result<()> {
    info!("pt4fu-checkd - pi-top [4] peripheral firmware update checker");
    info!("Version: {}", pt4fu_common::VERSION);

    if !pt4fu_common::host::is_supported_host() {
        info!("this program only runs on a pi-top [4]; nothing to do here");
        return Ok(());
    }
    if !pt4fu_common::host::is_root() {
        return Err(FatalError::Unsupported(
            "pt4fu-checkd requires root privileges; run as root using 'sudo'".into(),
        )
        .into());
    }

    let mut config = CheckerConfig {
        force: cli.force,
        ..CheckerConfig::default()
    };
    if let Some(loop_time) = cli.loop_time {
        config.loop_time_secs = loop_time;
    }
    if let Some(wait_timeout) = cli.wait_timeout {
        config.wait_timeout_secs = wait_timeout;
    }
    if let Some(max_wait_timeout) = cli.max_wait_timeout {
        config.max_wait_timeout_secs = max_wait_timeout;
    }
    if let Some(i2c_bus) = cli.i2c_bus {
        config.i2c_bus = i2c_bus;
    }
    if let Some(firmware_root) = cli.firmware_root {
        config.firmware_root = firmware_root;
    }
    config
        .validate()
        .context("invalid configuration")?;

    info!(
        i2c_bus = config.i2c_bus,
        firmware_root = %config.firmware_root.display(),
        force = config.force,
        "starting detection loop"
    );

    let send_packet_interval = std::time::Duration::from_millis(config.send_packet_interval_ms);
    let prober = scheduler::LinuxProber::new(config.i2c_bus, send_packet_interval);
    let launcher = ProcessUpdateLauncher {
        binary_path: PathBuf::from("/usr/bin/pt4fu-update"),
    };
    let mut scheduler = Scheduler::new(config, prober, launcher);

    tokio::select! {
        _ = scheduler.run() => {
            info!("detection loop exited");
        }
        _ = signals::wait_for_signal() => {
            info!("signal received, shutting down");
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("pt4fu-checkd requires Linux for I2C device access");
    std::process::exit(1);
}
