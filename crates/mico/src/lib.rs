//! The data model shared by a `MICO` device runtime and the peers that
//! provision it.
//!
//! This crate provides APIs to:
//!
//! - Describe the configuration record a device persists in flash, together
//!   with the boot table consumed by the bootloader after an OTA upgrade.
//!   The record is encoded into a self-validating flash image.
//! - Parse the extra data delivered by the second stage of an `EasyLink`
//!   session, which carries an authentication blob, the session identifier
//!   and an optional static IP configuration.
//! - Describe the notifications raised by a Wi-Fi driver and consumed by the
//!   provisioning machinery.
//! - Build the join and soft access point parameters handed to a Wi-Fi
//!   driver.
//! - Build the `mDNS` TXT record a device publishes while it can be
//!   configured.
//! - Encode and decode the JSON messages exchanged with the local
//!   configuration server.
//! - Compute the `CRC16` protecting firmware images.
//!
//! No function in this crate performs I/O, so it can be compiled for both
//! `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// `mDNS` service description and TXT record of a configurable device.
pub mod bonjour;
/// Checksums protecting firmware images.
pub mod checksum;
/// The persisted configuration record.
pub mod config;
/// Static device description.
pub mod device;
/// `EasyLink` extra data parsing.
pub mod easylink;
/// Notifications raised by the Wi-Fi driver and the system.
pub mod events;
/// Messages exchanged with the local configuration server.
pub mod message;
/// Parameters handed to a Wi-Fi driver.
pub mod wlan;

// Truncates a string to at most `max` bytes without splitting a character,
// the way fixed-size configuration fields are filled.
pub(crate) fn truncated(value: &str, max: usize) -> alloc::string::String {
    if value.len() <= max {
        return value.into();
    }

    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].into()
}
