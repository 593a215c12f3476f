use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::device::DeviceInfo;
use crate::wlan::{Interface, mac_suffix};

/// Service type advertised by a configurable device.
pub const SERVICE_TYPE: &str = "_easylink_config._tcp.local.";

const fn flag(value: bool) -> &'static str {
    if value { "T" } else { "F" }
}

/// TXT record of the configuration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtRecord {
    device: DeviceInfo,
    rf_version: String,
    mac: String,
    config_server: bool,
    interface: Interface,
    identifier: u32,
}

impl TxtRecord {
    /// Creates a [`TxtRecord`] for the given interface.
    ///
    /// `mac` is the formatted station MAC address and `config_server`
    /// tells peers whether the local configuration server is reachable.
    #[must_use]
    pub fn new(
        device: DeviceInfo,
        rf_version: &str,
        mac: &str,
        config_server: bool,
        interface: Interface,
    ) -> Self {
        Self {
            device,
            rf_version: rf_version.into(),
            mac: mac.into(),
            config_server,
            interface,
            identifier: 0,
        }
    }

    /// Sets the session identifier.
    #[must_use]
    pub const fn identifier(mut self, identifier: u32) -> Self {
        self.identifier = identifier;
        self
    }

    /// Returns the session identifier.
    #[must_use]
    pub const fn session_identifier(&self) -> u32 {
        self.identifier
    }

    /// Returns the record properties, in publication order.
    #[must_use]
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        alloc::vec![
            ("FW", self.device.firmware().into()),
            ("HD", self.device.hardware().into()),
            ("PO", self.device.protocol_name().into()),
            ("RF", self.rf_version.clone()),
            ("MAC", self.mac.clone()),
            ("OS", self.device.os().into()),
            ("MD", self.device.model_name().into()),
            ("MF", self.device.manufacturer_name().into()),
            ("FTC", flag(self.config_server).into()),
            (
                "wlan unconfigured",
                flag(self.interface == Interface::SoftAp).into(),
            ),
            ("ID", self.identifier.to_string()),
        ]
    }
}

/// Instance name of the configuration service, `MODEL(XXXXXX)`.
#[must_use]
pub fn instance_name(device: &DeviceInfo, mac: &[u8; 6]) -> String {
    format!("{}({})", device.model_name(), mac_suffix(mac))
}

/// Host name of the configuration service.
///
/// Characters not allowed in a host label are replaced by `-`.
#[must_use]
pub fn host_name(device: &DeviceInfo, mac: &[u8; 6]) -> String {
    let label: String = format!("{}-{}", device.model_name(), mac_suffix(mac))
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{label}.local.")
}

#[cfg(test)]
mod tests {
    use crate::device::DeviceInfo;
    use crate::wlan::Interface;

    use super::{TxtRecord, host_name, instance_name};

    const DEVICE: DeviceInfo = DeviceInfo::new("MiCOKit 3165", "MXCHIP Inc.")
        .firmware_revision("MICOKIT_3165@001")
        .hardware_revision("3165")
        .protocol("com.mxchip.basic")
        .os_version("31620002.044");

    const MAC: [u8; 6] = [0xC8, 0x93, 0x46, 0x0A, 0xBC, 0x1F];

    #[test]
    fn names() {
        assert_eq!(instance_name(&DEVICE, &MAC), "MiCOKit 3165(0ABC1F)");
        assert_eq!(host_name(&DEVICE, &MAC), "MiCOKit-3165-0ABC1F.local.");
    }

    #[test]
    fn station_record() {
        let record = TxtRecord::new(DEVICE, "wifi-1.0", "C8:93:46:0A:BC:1F", true, Interface::Station)
            .identifier(305_419_896);
        let properties = record.properties();

        let keys: alloc::vec::Vec<_> = properties.iter().map(|(key, _)| *key).collect();
        assert_eq!(
            keys,
            ["FW", "HD", "PO", "RF", "MAC", "OS", "MD", "MF", "FTC", "wlan unconfigured", "ID"]
        );
        assert_eq!(properties[8].1, "T");
        assert_eq!(properties[9].1, "F");
        assert_eq!(properties[10].1, "305419896");
    }

    #[test]
    fn soft_ap_record() {
        let record = TxtRecord::new(DEVICE, "wifi-1.0", "C8:93:46:0A:BC:1F", false, Interface::SoftAp);
        let properties = record.properties();

        assert_eq!(properties[8].1, "F");
        assert_eq!(properties[9].1, "T");
        assert_eq!(properties[10].1, "0");
        assert_eq!(record.session_identifier(), 0);
    }
}
