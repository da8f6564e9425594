//! Host-environment preconditions checked before any device work begins.
//!
//! Both `pt4fu-checkd` and `pt4fu-update` run this pair of checks first: is
//! this actually a pi-top [4], and are we root. An unsupported host is not
//! an error — the binary exits 0 with a diagnostic; not running as root is.

use std::path::Path;

use crate::config::SUPPORTED_HOST_IDENTIFIER;

/// Path the device tree exposes the board model string at on Linux.
const DEVICE_TREE_MODEL_PATH: &str = "/proc/device-tree/model";

/// Read the board model string, trimming the NUL terminator the device
/// tree model property is null-padded with.
pub fn current_host_identifier() -> Option<String> {
    current_host_identifier_at(Path::new(DEVICE_TREE_MODEL_PATH))
}

fn current_host_identifier_at(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let trimmed = raw.trim_end_matches('\0').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Whether the current host is the one supported board.
pub fn is_supported_host() -> bool {
    current_host_identifier().as_deref() == Some(SUPPORTED_HOST_IDENTIFIER)
}

/// Whether the calling process holds uid 0.
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_and_trims_nul_padded_model_string() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"pi-top [4]\0\0\0").unwrap();
        assert_eq!(
            current_host_identifier_at(file.path()),
            Some("pi-top [4]".to_string())
        );
    }

    #[test]
    fn missing_file_yields_none() {
        assert_eq!(current_host_identifier_at(Path::new("/nonexistent")), None);
    }

    #[test]
    fn blank_file_yields_none() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(current_host_identifier_at(file.path()), None);
    }
}
