//! Splits a firmware binary into wire frames and parses the device's reply.
//!
//! [`PacketBuilder`] holds a path to a staged binary; it never mutates it,
//! it only reads it to build the start packet and the sequence of data
//! packets [`crate::updater::Updater`] streams to the device.

use std::path::{Path, PathBuf};

use crate::error::{UpdateError, UpdateResult};
use crate::frame::{self, crc16_kermit};
use crate::protocol::FRAME_LENGTH;

pub struct PacketBuilder {
    path: PathBuf,
}

impl PacketBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> UpdateResult<Vec<u8>> {
        std::fs::read(&self.path).map_err(UpdateError::Io)
    }

    /// Split the file into `FRAME_LENGTH`-byte chunks; the last chunk may be
    /// shorter.
    pub fn frames(&self) -> UpdateResult<Vec<Vec<u8>>> {
        let data = self.read_file()?;
        Ok(data.chunks(FRAME_LENGTH).map(|c| c.to_vec()).collect())
    }

    /// Sum of the unsigned byte values of the entire file, masked to 32
    /// bits.
    pub fn firmware_checksum(&self) -> UpdateResult<u32> {
        let data = self.read_file()?;
        let sum: u64 = data.iter().map(|&b| b as u64).sum();
        Ok((sum & 0xFFFF_FFFF) as u32)
    }

    /// Build the single start packet describing the whole transfer.
    pub fn make_start_packet(&self) -> UpdateResult<Vec<u8>> {
        let data = self.read_file()?;
        let frames = self.frames()?;
        let total_frames = frames.len() as u16;
        let last_frame_len = frames.last().map(|f| f.len()).unwrap_or(0) as u16;
        let checksum = self.firmware_checksum()?;

        Ok(frame::init_frame(
            data.len() as u32,
            FRAME_LENGTH as u16,
            total_frames,
            last_frame_len,
            checksum,
            0,
        ))
    }

    /// Build the sequence of data packets, numbered 1-based.
    pub fn make_data_packets(&self) -> UpdateResult<Vec<Vec<u8>>> {
        let frames = self.frames()?;
        Ok(frames
            .iter()
            .enumerate()
            .map(|(i, chunk)| frame::fw_frame((i + 1) as u16, chunk))
            .collect())
    }

    /// Parse the 8-byte verify reply read from `FW_CHECK_OK`. Returns
    /// `Ok(true)` iff the device reports the firmware as accepted.
    pub fn parse_verify_reply(raw: &[u8; 8]) -> UpdateResult<bool> {
        if raw[0] != frame::SYNC {
            return Err(UpdateError::MalformedReply(format!(
                "expected sync byte 0x{:02X}, got 0x{:02X}",
                frame::SYNC,
                raw[0]
            )));
        }

        let (without_crc, crc_bytes) = raw.split_at(6);
        let expected_crc = crc16_kermit(without_crc);
        let actual_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        if actual_crc != expected_crc {
            return Err(UpdateError::CrcMismatch);
        }

        // Prefix is sync(1) + length(2) + protocol(1) + class(1) = 5 bytes;
        // trailer is the 2-byte CRC; the single byte left is the body.
        let body = without_crc[5];
        Ok(body == 1)
    }

    /// Build a verify reply with the given body value, for testing against
    /// [`PacketBuilder::parse_verify_reply`].
    #[cfg(any(test, feature = "test-support"))]
    pub fn make_verify_reply(body: u8) -> [u8; 8] {
        let length: u16 = 3;
        let mut frame = vec![frame::SYNC];
        frame.extend_from_slice(&length.to_be_bytes());
        frame.push(frame::PROTOCOL_BYTE);
        frame.push(0xA3);
        frame.push(body);
        let crc = crc16_kermit(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        let mut out = [0u8; 8];
        out.copy_from_slice(&frame);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn firmware_checksum_sums_bytes_masked_to_32_bits() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        let builder = PacketBuilder::new(file.path());
        assert_eq!(builder.firmware_checksum().unwrap(), 10);
    }

    #[test]
    fn frames_splits_into_256_byte_chunks_with_short_tail() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0xAAu8; 256 * 3 + 37];
        file.write_all(&data).unwrap();
        let builder = PacketBuilder::new(file.path());

        let frames = builder.frames().unwrap();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].len(), 256);
        assert_eq!(frames[3].len(), 37);
    }

    #[test]
    fn make_data_packets_count_equals_ceil_filesize_over_256() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0x42u8; 1000];
        file.write_all(&data).unwrap();
        let builder = PacketBuilder::new(file.path());

        let packets = builder.make_data_packets().unwrap();
        assert_eq!(packets.len(), data.len().div_ceil(256));
    }

    #[test]
    fn make_start_packet_reports_total_frames_and_checksum() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0x01u8; 256 * 2];
        file.write_all(&data).unwrap();
        let builder = PacketBuilder::new(file.path());

        let packet = builder.make_start_packet().unwrap();
        assert_eq!(packet[0], frame::SYNC);
        assert_eq!(packet[4], frame::CLASS_INIT);
    }

    #[test]
    fn parse_verify_reply_accepts_body_one() {
        let reply = PacketBuilder::make_verify_reply(1);
        assert!(PacketBuilder::parse_verify_reply(&reply).unwrap());
    }

    #[test]
    fn parse_verify_reply_rejects_body_zero() {
        let reply = PacketBuilder::make_verify_reply(0);
        assert!(!PacketBuilder::parse_verify_reply(&reply).unwrap());
    }

    #[test]
    fn parse_verify_reply_detects_bad_sync_byte() {
        let mut reply = PacketBuilder::make_verify_reply(1);
        reply[0] = 0x00;
        assert!(PacketBuilder::parse_verify_reply(&reply).is_err());
    }

    #[test]
    fn parse_verify_reply_detects_crc_mismatch() {
        let mut reply = PacketBuilder::make_verify_reply(1);
        reply[7] ^= 0xFF;
        let err = PacketBuilder::parse_verify_reply(&reply).unwrap_err();
        assert!(matches!(err, UpdateError::CrcMismatch));
    }

    #[test]
    fn missing_file_raises_io_error() {
        let builder = PacketBuilder::new("/nonexistent/path/fw.bin");
        assert!(builder.frames().is_err());
    }
}
