//! Scheduler and updater runtime configuration.
//!
//! There is no configuration file: every value here is supplied on the
//! command line (or left at its default), the way the original checker and
//! updater scripts took only CLI flags. This module just centralizes the
//! defaults and the range validation `clap` can't express directly.

use std::path::PathBuf;

/// Default I2C bus number (Raspberry Pi I2C bus 1).
pub const DEFAULT_I2C_BUS: u8 = 1;

/// Default root directory scanned for available firmware files.
pub const DEFAULT_FIRMWARE_ROOT: &str = "/lib/firmware/pi-top/";

/// Default delay inserted between consecutive register writes while
/// streaming an update.
pub const DEFAULT_SEND_PACKET_INTERVAL_MS: u64 = 100;

/// Default scheduler sweep interval in seconds.
pub const DEFAULT_LOOP_TIME_SECS: u64 = 60;

/// Default budget, in seconds, the scheduler waits for the portal-ready
/// breadcrumb before giving up and running anyway.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 60;

/// Default extended wait budget once the "extend-timeout" breadcrumb is
/// observed.
pub const DEFAULT_MAX_WAIT_TIMEOUT_SECS: u64 = 600;

/// Path of the breadcrumb whose presence means the portal has finished its
/// own firmware-related setup and the checker may proceed.
pub const PORTAL_READY_BREADCRUMB: &str =
    "/tmp/.com.pi-top.pt-os-web-portal.pt-firmware-updater.ready";

/// Path of the breadcrumb whose presence extends the wait budget from
/// `wait_timeout` to `max_wait_timeout`.
pub const PORTAL_EXTEND_TIMEOUT_BREADCRUMB: &str =
    "/tmp/.com.pi-top.pt-os-web-portal.pt-firmware-updater.extend-timeout";

/// Host identifier this system is expected to run on; anything else exits
/// cleanly with a diagnostic rather than failing.
pub const SUPPORTED_HOST_IDENTIFIER: &str = "pi-top [4]";

/// Shared runtime configuration for the scheduler (`pt4fu-checkd`).
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerConfig {
    pub i2c_bus: u8,
    pub force: bool,
    pub loop_time_secs: u64,
    pub wait_timeout_secs: u64,
    pub max_wait_timeout_secs: u64,
    pub firmware_root: PathBuf,
    pub send_packet_interval_ms: u64,
    /// Path of the portal-ready breadcrumb. Overridable so tests can point it
    /// at a tempdir instead of the real `/tmp` well-known path.
    pub ready_breadcrumb: PathBuf,
    /// Path of the extend-timeout breadcrumb. Overridable for the same reason.
    pub extend_timeout_breadcrumb: PathBuf,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            i2c_bus: DEFAULT_I2C_BUS,
            force: false,
            loop_time_secs: DEFAULT_LOOP_TIME_SECS,
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            max_wait_timeout_secs: DEFAULT_MAX_WAIT_TIMEOUT_SECS,
            firmware_root: PathBuf::from(DEFAULT_FIRMWARE_ROOT),
            send_packet_interval_ms: DEFAULT_SEND_PACKET_INTERVAL_MS,
            ready_breadcrumb: PathBuf::from(PORTAL_READY_BREADCRUMB),
            extend_timeout_breadcrumb: PathBuf::from(PORTAL_EXTEND_TIMEOUT_BREADCRUMB),
        }
    }
}

impl CheckerConfig {
    /// Validate value ranges `clap` leaves unchecked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=300).contains(&self.loop_time_secs) {
            return Err(ConfigError::InvalidValue(format!(
                "loop-time {} is out of range (expected 1-300)",
                self.loop_time_secs
            )));
        }
        if self.wait_timeout_secs > 999 {
            return Err(ConfigError::InvalidValue(format!(
                "wait-timeout {} is out of range (expected 0-999)",
                self.wait_timeout_secs
            )));
        }
        if self.max_wait_timeout_secs > 9999 {
            return Err(ConfigError::InvalidValue(format!(
                "max-wait-timeout {} is out of range (expected 0-9999)",
                self.max_wait_timeout_secs
            )));
        }
        if self.max_wait_timeout_secs < self.wait_timeout_secs {
            return Err(ConfigError::InvalidValue(format!(
                "max-wait-timeout {} must be >= wait-timeout {}",
                self.max_wait_timeout_secs, self.wait_timeout_secs
            )));
        }
        Ok(())
    }
}

/// Runtime configuration for a single `pt4fu-update` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateConfig {
    pub i2c_bus: u8,
    pub force: bool,
    pub send_packet_interval_ms: u64,
    pub path: Option<PathBuf>,
    pub notify_user: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            i2c_bus: DEFAULT_I2C_BUS,
            force: false,
            send_packet_interval_ms: DEFAULT_SEND_PACKET_INTERVAL_MS,
            path: None,
            notify_user: false,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}
