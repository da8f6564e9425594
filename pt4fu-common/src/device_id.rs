//! Closed enumeration of peripheral device identities.
//!
//! Filename parsing and probing both need a fixed universe of device names,
//! so this is a plain closed `enum` rather than a dynamic class lookup.

use std::fmt;
use std::str::FromStr;

/// Identity of a pi-top [4] peripheral microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceName {
    Pt4Hub,
    Pt4FoundationPlate,
    Pt4ExpansionPlate,
}

impl DeviceName {
    /// All known device identities, in probe order.
    pub const ALL: [DeviceName; 3] = [
        DeviceName::Pt4Hub,
        DeviceName::Pt4FoundationPlate,
        DeviceName::Pt4ExpansionPlate,
    ];

    /// The fixed I2C address this device class is expected at.
    pub fn i2c_addr(self) -> u8 {
        match self {
            DeviceName::Pt4Hub => 0x10,
            DeviceName::Pt4FoundationPlate => 0x11,
            DeviceName::Pt4ExpansionPlate => 0x12,
        }
    }

    /// Device-local name as used in filenames and firmware directories
    /// (`<device_name>-v...`, `/<FIRMWARE_ROOT>/<device_name>/`).
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceName::Pt4Hub => "pt4_hub",
            DeviceName::Pt4FoundationPlate => "pt4_foundation_plate",
            DeviceName::Pt4ExpansionPlate => "pt4_expansion_plate",
        }
    }

    /// Human-readable name used in user-facing notifications.
    pub fn friendly_name(self) -> &'static str {
        match self {
            DeviceName::Pt4Hub => "pi-top [4] Hub",
            DeviceName::Pt4FoundationPlate => "pi-top [4] Foundation Plate",
            DeviceName::Pt4ExpansionPlate => "pi-top [4] Expansion Plate",
        }
    }

    /// The 2-byte identifier expected back from the `PART_NAME` register.
    /// Used to tell "no device at this address" apart from "a device of a
    /// different class is answering at this address" before trusting any
    /// other register read.
    pub fn expected_part_name(self) -> [u8; 2] {
        match self {
            DeviceName::Pt4Hub => *b"HB",
            DeviceName::Pt4FoundationPlate => *b"FP",
            DeviceName::Pt4ExpansionPlate => *b"EP",
        }
    }

    /// Whether a successful install on this device skips the reset/verify
    /// cycle and always reports `requires_restart=true` (hub and expansion
    /// plate, per the install state machine's `ClassifyOutcome` step).
    pub fn always_requires_restart(self) -> bool {
        matches!(self, DeviceName::Pt4Hub | DeviceName::Pt4ExpansionPlate)
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known device.
#[derive(Debug, thiserror::Error)]
#[error("unknown device name: {0}")]
pub struct UnknownDeviceName(pub String);

impl FromStr for DeviceName {
    type Err = UnknownDeviceName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pt4_hub" => Ok(DeviceName::Pt4Hub),
            "pt4_foundation_plate" => Ok(DeviceName::Pt4FoundationPlate),
            "pt4_expansion_plate" => Ok(DeviceName::Pt4ExpansionPlate),
            other => Err(UnknownDeviceName(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        for device in DeviceName::ALL {
            let parsed: DeviceName = device.as_str().parse().unwrap();
            assert_eq!(parsed, device);
            assert_eq!(device.to_string(), device.as_str());
        }
    }

    #[test]
    fn rejects_unknown_names() {
        assert!("pt4_unknown_widget".parse::<DeviceName>().is_err());
    }

    #[test]
    fn hub_and_expansion_plate_always_require_restart() {
        assert!(DeviceName::Pt4Hub.always_requires_restart());
        assert!(DeviceName::Pt4ExpansionPlate.always_requires_restart());
        assert!(!DeviceName::Pt4FoundationPlate.always_requires_restart());
    }

    #[test]
    fn expected_part_names_are_distinct() {
        let tags: Vec<[u8; 2]> = DeviceName::ALL.iter().map(|d| d.expected_part_name()).collect();
        assert_eq!(tags[0], *b"HB");
        assert_eq!(tags[1], *b"FP");
        assert_eq!(tags[2], *b"EP");
        assert_ne!(tags[0], tags[1]);
        assert_ne!(tags[1], tags[2]);
        assert_ne!(tags[0], tags[2]);
    }
}
