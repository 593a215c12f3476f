//! The runtime of a `MICO` device: it provisions the Wi-Fi credentials,
//! persists the configuration record and drives the device lifecycle.
//!
//! This crate provides APIs to:
//!
//! - Load, update and commit the configuration record kept in a flash
//!   partition.
//! - Run the provisioning state machine, which receives credentials over
//!   the air through `EasyLink` or `AirKiss`, falls back to a soft access
//!   point or rolls back to the previous network.
//! - Serve the local configuration server, which reports and updates the
//!   configuration and receives firmware images.
//! - Announce the configuration service over `mDNS`.
//! - Dispatch the Wi-Fi driver notifications to registered callbacks.
//! - Serialize power transitions and feed a hardware watchdog while the
//!   registered tasks are alive.
//!
//! The hardware is reached through the [`platform`] and [`flash`] traits,
//! so the same runtime drives a real device or a simulated one.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// `mDNS` announcement of the configuration service.
pub mod bonjour;
/// Product constants and runtime options.
pub mod config;
/// Provisioning state machine.
pub mod easylink;
/// Error handling.
pub mod error;
/// Flash partitions.
pub mod flash;
/// Liveness checkpoints feeding the watchdog.
pub mod monitor;
/// Notification dispatch.
pub mod notification;
/// Hardware collaborators.
pub mod platform;
/// Power transitions.
pub mod power;
/// Local configuration server.
pub mod server;
/// Configuration store.
pub mod store;
/// System boot and lifecycle.
pub mod system;

mod ota;

#[cfg(test)]
mod tests;

pub use config::{ProvisioningMode, SystemOptions};
pub use easylink::{ConfigDelegate, DefaultDelegate, ProvisioningHandle, ProvisioningOutcome};
pub use error::{Error, ErrorKind, Result};
pub use system::{Platform, System};
