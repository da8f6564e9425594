//! Shared protocol, device, and update-engine types for the pi-top [4]
//! peripheral firmware updater daemon and CLI.

pub mod bus;
pub mod config;
pub mod device_id;
pub mod error;
pub mod firmware_file;
pub mod frame;
pub mod host;
pub mod lock;
pub mod notify;
pub mod packet;
pub mod protocol;
pub mod updater;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
