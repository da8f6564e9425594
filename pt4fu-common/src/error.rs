//! Error taxonomy shared by the scheduler and update-CLI binaries.
//!
//! [`UpdateError`] is the error type returned by [`crate::updater::Updater`]'s
//! staging and install paths; it follows the taxonomy of error kinds this
//! system distinguishes (see module docs on `updater`), not a generic
//! catch-all. [`FatalError`] covers the small set of conditions that abort a
//! binary before any device work starts.

use crate::bus::BusError;

/// Errors returned while staging or installing a firmware update for one
/// device.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Filename parse failed, device/schematic mismatch, or the candidate is
    /// not newer than what is currently installed.
    #[error("invalid firmware file: {0}")]
    InvalidFirmwareFile(String),

    /// The device already has an uploaded-but-uninstalled binary pending.
    #[error("an update is already pending for this device")]
    UpdatePending,

    /// Probing at the expected address found a device of a different class.
    #[error("unexpected device class: {0}")]
    InvalidFirmwareDevice(String),

    /// An I2C read/write failure.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// The staged file's MD5 no longer matches the digest captured at
    /// staging time.
    #[error("staged firmware file is corrupt (MD5 mismatch)")]
    CorruptStagedFile,

    /// The verify-reply's embedded CRC did not match its payload.
    #[error("verify reply failed CRC-16/Kermit check")]
    CrcMismatch,

    /// The verify-reply did not start with the expected sync byte, or was
    /// otherwise not shaped like a frame.
    #[error("malformed verify reply: {0}")]
    MalformedReply(String),

    /// Filesystem error while staging or reading firmware files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type used throughout the update engine.
pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Conditions fatal to a whole binary invocation, checked before any device
/// work begins.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    /// Not running as uid 0, or not on a supported host identifier.
    #[error("unsupported environment: {0}")]
    Unsupported(String),

    /// The named firmware path does not exist or is not a file.
    #[error("firmware path not found: {0}")]
    FirmwareNotFound(std::path::PathBuf),

    /// Underlying I/O failure unrelated to a specific device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
