//! Typed device facade over the raw I2C byte transport.
//!
//! [`I2cBus`] is the abstracted external collaborator: a byte-level
//! `write`/`read`/`probe` capability the rest of this crate never implements
//! directly against hardware. [`LinuxI2cBus`] is the only implementation
//! that talks to real silicon, built on `i2cdev`; [`FwDevice`] is the thin
//! register-level facade the updater is written against, generic over any
//! `I2cBus` so tests can substitute a fake.

use std::thread;
use std::time::Duration;

use crate::device_id::DeviceName;
use crate::firmware_file::FirmwareDescriptor;
use crate::protocol;

/// Number of retry attempts for transient I2C errors.
const MAX_RETRIES: usize = 3;

/// Delay between retry attempts.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Byte-level I2C capability. Register addresses and payloads are opaque to
/// this trait; [`FwDevice`] is the layer that knows what they mean.
pub trait I2cBus {
    /// Write `data` to `register`.
    fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError>;

    /// Read `len` bytes from `register`.
    fn read(&mut self, register: u8, len: usize) -> Result<Vec<u8>, BusError>;

    /// Probe whether a device acknowledges at `addr` on this physical bus.
    fn probe(&mut self, addr: u8) -> bool;
}

/// Errors from the I2C transport.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to open I2C bus {bus}: {source}")]
    Open {
        bus: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read register 0x{register:02X}: {source}")]
    Read {
        register: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write register 0x{register:02X}: {source}")]
    Write {
        register: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("device at address 0x{0:02X} is not responding")]
    NotResponding(u8),
}

/// `I2cBus` implementation backed by a real Linux I2C character device.
#[cfg(target_os = "linux")]
pub struct LinuxI2cBus {
    bus: u8,
    addr: u8,
    device: i2cdev::linux::LinuxI2CDevice,
}

#[cfg(target_os = "linux")]
impl LinuxI2cBus {
    /// Open `/dev/i2c-<bus>` and bind it to slave address `addr`.
    pub fn new(bus: u8, addr: u8) -> Result<Self, BusError> {
        let path = format!("/dev/i2c-{bus}");
        let device = i2cdev::linux::LinuxI2CDevice::new(&path, addr as u16).map_err(|e| {
            BusError::Open {
                bus,
                source: std::io::Error::other(e.to_string()),
            }
        })?;
        Ok(Self { bus, addr, device })
    }

    fn retry<T>(&mut self, mut op: impl FnMut(&mut Self) -> Result<T, BusError>) -> Result<T, BusError> {
        let mut last_err = None;
        for attempt in 0..=MAX_RETRIES {
            match op(self) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                    if attempt < MAX_RETRIES {
                        thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }
        Err(last_err.expect("retry called with MAX_RETRIES underflow"))
    }
}

#[cfg(target_os = "linux")]
impl I2cBus for LinuxI2cBus {
    fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError> {
        self.retry(|this| {
            let mut buf = Vec::with_capacity(1 + data.len());
            buf.push(register);
            buf.extend_from_slice(data);
            i2cdev::core::I2CDevice::write(&mut this.device, &buf).map_err(|e| BusError::Write {
                register,
                source: std::io::Error::other(e.to_string()),
            })
        })
    }

    fn read(&mut self, register: u8, len: usize) -> Result<Vec<u8>, BusError> {
        self.retry(|this| {
            i2cdev::core::I2CDevice::write(&mut this.device, &[register]).map_err(|e| {
                BusError::Read {
                    register,
                    source: std::io::Error::other(e.to_string()),
                }
            })?;
            let mut buf = vec![0u8; len];
            i2cdev::core::I2CDevice::read(&mut this.device, &mut buf).map_err(|e| {
                BusError::Read {
                    register,
                    source: std::io::Error::other(e.to_string()),
                }
            })?;
            Ok(buf)
        })
    }

    fn probe(&mut self, addr: u8) -> bool {
        match i2cdev::linux::LinuxI2CDevice::new(format!("/dev/i2c-{}", self.bus), addr as u16) {
            Ok(mut probe_device) => i2cdev::core::I2CDevice::write(&mut probe_device, &[0]).is_ok(),
            Err(_) => false,
        }
    }
}

/// Register the reset command is written to. Not part of the register table
/// the rest of the update protocol uses — a reset is a single-byte command
/// to a dedicated register the hub/foundation/expansion-plate microcontrollers
/// all expose, distinct from the DFU registers.
const REG_DEVICE_RESET: u8 = 0x30;

/// Thin register-level facade the updater is written against. Knows only
/// the four operations the update engine needs: send the two frame kinds,
/// read the verify reply, and read the device's current identity/version.
pub struct FwDevice<B> {
    bus: B,
    device_name: DeviceName,
    send_packet_interval: Duration,
}

impl<B: I2cBus> FwDevice<B> {
    pub fn new(bus: B, device_name: DeviceName, send_packet_interval: Duration) -> Self {
        Self {
            bus,
            device_name,
            send_packet_interval,
        }
    }

    pub fn device_name(&self) -> DeviceName {
        self.device_name
    }

    /// Direct access to the underlying bus, for tests that need to mutate
    /// mock register state mid-session.
    #[cfg(test)]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Read the device's current identity into a [`FirmwareDescriptor`].
    /// `is_release` is always `None` — a live device cannot report it, only
    /// a firmware filename can.
    pub fn read_info(&mut self) -> Result<FirmwareDescriptor, BusError> {
        let major = self.bus.read(protocol::REG_MCU_SOFT_VERS_MAJOR, 1)?[0] as u32;
        let minor = self.bus.read(protocol::REG_MCU_SOFT_VERS_MINOR, 1)?[0] as u32;
        let schematic = self.bus.read(protocol::REG_SCH_REV_MAJOR, 1)?[0] as u32;
        Ok(FirmwareDescriptor::from_device(
            self.device_name,
            (major, minor),
            schematic,
            None,
        ))
    }

    /// Confirm the part at this address is really the expected device
    /// class, by checking the device name register.
    pub fn part_name(&mut self) -> Result<Vec<u8>, BusError> {
        self.bus.read(protocol::REG_PART_NAME, 2)
    }

    /// Send the init (start) frame and sleep `send_packet_interval`.
    pub fn send_init_frame(&mut self, frame: &[u8]) -> Result<(), BusError> {
        self.bus.write(protocol::REG_FW_UPGRADE_START, frame)?;
        thread::sleep(self.send_packet_interval);
        Ok(())
    }

    /// Send one data frame and sleep `send_packet_interval`.
    pub fn send_data_frame(&mut self, frame: &[u8]) -> Result<(), BusError> {
        self.bus.write(protocol::REG_FW_UPGRADE_PACKET, frame)?;
        thread::sleep(self.send_packet_interval);
        Ok(())
    }

    /// Read the 8-byte verify reply.
    pub fn read_verify_reply(&mut self) -> Result<[u8; 8], BusError> {
        let bytes = self.bus.read(protocol::REG_FW_CHECK_OK, 8)?;
        let mut reply = [0u8; 8];
        reply.copy_from_slice(&bytes[..8]);
        Ok(reply)
    }

    /// Issue a device reset (used for every device except hub/expansion
    /// plate, which skip it per the install state machine).
    pub fn reset(&mut self) -> Result<(), BusError> {
        self.bus.write(REG_DEVICE_RESET, &[0x01])
    }

    /// Whether an I2C address currently has a device responding.
    pub fn probe(bus: &mut B, addr: u8) -> bool {
        bus.probe(addr)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    /// In-memory `I2cBus` used by unit tests that don't touch hardware.
    #[derive(Default)]
    pub struct MockI2cBus {
        pub registers: HashMap<u8, Vec<u8>>,
        pub writes: Vec<(u8, Vec<u8>)>,
        pub present_addrs: Vec<u8>,
        pub fail_register: Option<u8>,
    }

    impl MockI2cBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_register(&mut self, register: u8, value: Vec<u8>) {
            self.registers.insert(register, value);
        }
    }

    impl I2cBus for MockI2cBus {
        fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError> {
            if self.fail_register == Some(register) {
                return Err(BusError::Write {
                    register,
                    source: std::io::Error::other("injected failure"),
                });
            }
            self.writes.push((register, data.to_vec()));
            Ok(())
        }

        fn read(&mut self, register: u8, len: usize) -> Result<Vec<u8>, BusError> {
            if self.fail_register == Some(register) {
                return Err(BusError::Read {
                    register,
                    source: std::io::Error::other("injected failure"),
                });
            }
            match self.registers.get(&register) {
                Some(bytes) => Ok(bytes[..len.min(bytes.len())].to_vec()),
                None => Ok(vec![0u8; len]),
            }
        }

        fn probe(&mut self, addr: u8) -> bool {
            self.present_addrs.contains(&addr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockI2cBus;
    use super::*;

    fn device(bus: MockI2cBus) -> FwDevice<MockI2cBus> {
        FwDevice::new(bus, DeviceName::Pt4FoundationPlate, Duration::from_millis(0))
    }

    #[test]
    fn read_info_builds_descriptor_from_registers() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MAJOR, vec![2]);
        bus.set_register(protocol::REG_MCU_SOFT_VERS_MINOR, vec![3]);
        bus.set_register(protocol::REG_SCH_REV_MAJOR, vec![4]);
        let mut dev = device(bus);

        let info = dev.read_info().unwrap();
        assert!(!info.error);
        assert_eq!(info.firmware_version, Some((2, 3)));
        assert_eq!(info.schematic_version, Some(4));
        assert_eq!(info.is_release, None);
    }

    #[test]
    fn send_init_frame_writes_to_upgrade_start_register() {
        let mut dev = device(MockI2cBus::new());
        dev.send_init_frame(&[1, 2, 3]).unwrap();
        assert_eq!(
            dev.bus.writes,
            vec![(protocol::REG_FW_UPGRADE_START, vec![1, 2, 3])]
        );
    }

    #[test]
    fn send_data_frame_writes_to_upgrade_packet_register() {
        let mut dev = device(MockI2cBus::new());
        dev.send_data_frame(&[9, 9]).unwrap();
        assert_eq!(
            dev.bus.writes,
            vec![(protocol::REG_FW_UPGRADE_PACKET, vec![9, 9])]
        );
    }

    #[test]
    fn read_verify_reply_returns_eight_bytes() {
        let mut bus = MockI2cBus::new();
        bus.set_register(protocol::REG_FW_CHECK_OK, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let mut dev = device(bus);
        assert_eq!(dev.read_verify_reply().unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn bus_error_propagates_from_write() {
        let mut bus = MockI2cBus::new();
        bus.fail_register = Some(protocol::REG_FW_UPGRADE_START);
        let mut dev = device(bus);
        assert!(dev.send_init_frame(&[0]).is_err());
    }

    #[test]
    fn probe_reflects_mock_presence() {
        let mut bus = MockI2cBus::new();
        bus.present_addrs.push(0x10);
        assert!(FwDevice::probe(&mut bus, 0x10));
        assert!(!FwDevice::probe(&mut bus, 0x11));
    }
}
