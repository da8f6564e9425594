//! Frame construction for the I2C firmware update wire protocol.
//!
//! A frame is `0x8A` ‖ big-endian total length ‖ `0x01` ‖ register class
//! (`0xA1` init, `0xA2` data) ‖ payload ‖ little-endian CRC-16/Kermit of
//! everything before the CRC. This module builds the two frame kinds the
//! protocol uses; [`crate::packet`] drives it to split a whole firmware
//! image into a start frame and a sequence of data frames.

use crc::{Crc, CRC_16_KERMIT};

/// Sync byte that opens every frame.
pub const SYNC: u8 = 0x8A;

/// Protocol version byte, present in every frame.
pub const PROTOCOL_BYTE: u8 = 0x01;

/// Register class for the start (init) frame.
pub const CLASS_INIT: u8 = 0xA1;

/// Register class for a data frame.
pub const CLASS_DATA: u8 = 0xA2;

const KERMIT: Crc<u16> = Crc::<u16>::new(&CRC_16_KERMIT);

/// Compute the CRC-16/Kermit checksum of `data`.
pub fn crc16_kermit(data: &[u8]) -> u16 {
    KERMIT.checksum(data)
}

/// Build the init (start) frame.
///
/// `frame_size` is the fixed data-frame payload size ([`crate::protocol::FRAME_LENGTH`]
/// in normal use); per the wire protocol the length prefix reports `7 +
/// frame_size`, not this frame's own byte count — the device reads that
/// value as a hint of the data-frame size to expect, not a self-describing
/// length.
pub fn init_frame(
    fw_size: u32,
    frame_size: u16,
    total_frames: u16,
    last_frame_size: u16,
    fw_checksum: u32,
    reserved: u16,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&fw_size.to_be_bytes());
    body.extend_from_slice(&frame_size.to_be_bytes());
    body.extend_from_slice(&total_frames.to_be_bytes());
    body.extend_from_slice(&last_frame_size.to_be_bytes());
    body.extend_from_slice(&fw_checksum.to_be_bytes());
    body.extend_from_slice(&reserved.to_be_bytes());

    let length: u16 = 7u32
        .checked_add(frame_size as u32)
        .and_then(|v| u16::try_from(v).ok())
        .expect("frame_size too large for init frame length prefix");

    build_frame(length, CLASS_INIT, &body)
}

/// Build a data frame carrying the 1-based `frame_number` and its bytes.
pub fn fw_frame(frame_number: u16, frame_bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + frame_bytes.len());
    body.extend_from_slice(&frame_number.to_be_bytes());
    body.extend_from_slice(frame_bytes);

    let length: u16 = 9u32
        .checked_add(frame_bytes.len() as u32)
        .and_then(|v| u16::try_from(v).ok())
        .expect("frame_bytes too large for data frame length prefix");

    build_frame(length, CLASS_DATA, &body)
}

fn build_frame(length: u16, class: u8, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + body.len() + 2);
    frame.push(SYNC);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(PROTOCOL_BYTE);
    frame.push(class);
    frame.extend_from_slice(body);

    let crc = crc16_kermit(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}
