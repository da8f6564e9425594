//! I2C register map and timing constants for the pi-top [4] peripheral
//! firmware update protocol.
//!
//! This module defines the register addresses [`crate::bus::FwDevice`] talks
//! to and the frame-size/retry/timing constants [`crate::frame`],
//! [`crate::packet`], and [`crate::updater`] share.

// ============================================================================
// Register Addresses
// ============================================================================

/// Begin a firmware upgrade: write the init frame here.
pub const REG_FW_UPGRADE_START: u8 = 0x01;

/// Upload one data frame of the firmware image.
pub const REG_FW_UPGRADE_PACKET: u8 = 0x02;

/// Read the 8-byte verify reply for the most recent upload.
pub const REG_FW_CHECK_OK: u8 = 0x03;

/// Firmware version, major byte.
pub const REG_MCU_SOFT_VERS_MAJOR: u8 = 0xE0;

/// Firmware version, minor byte.
pub const REG_MCU_SOFT_VERS_MINOR: u8 = 0xE1;

/// Schematic revision, major byte (the "schematic version" firmware is matched to).
pub const REG_SCH_REV_MAJOR: u8 = 0xE2;

/// Schematic revision, minor byte.
pub const REG_SCH_REV_MINOR: u8 = 0xE3;

/// Board revision.
pub const REG_BRD_REV: u8 = 0xE4;

/// Device identifier string, used to cross-check that the address holds the
/// device class the caller expects.
pub const REG_PART_NAME: u8 = 0xE5;

/// Device part number.
pub const REG_PART_NUMBER: u8 = 0xE6;

/// Fixed frame payload size used by the packet builder (256 bytes per data frame).
pub const FRAME_LENGTH: usize = 256;

/// Default delay inserted after each register write to respect the
/// microcontroller's processing budget.
pub const DEFAULT_SEND_PACKET_INTERVAL_MS: u64 = 100;

/// Sleep issued after a device reset before re-reading its firmware version.
pub const POST_RESET_SLEEP_MS: u64 = 2_000;

/// Number of retry attempts for a transiently-failing verify-reply read.
pub const VERIFY_REPLY_MAX_RETRIES: usize = 5;

/// Delay between verify-reply read retries.
pub const VERIFY_REPLY_RETRY_DELAY_MS: u64 = 100;
