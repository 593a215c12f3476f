use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::config::{
    ConfigState, MAX_IP_LEN, MAX_KEY_LEN, MAX_NAME_LEN, MAX_SSID_LEN, RuntimeStatus, SecurityType,
    SystemConfig,
};
use crate::device::DeviceInfo;
use crate::truncated;

/// Device section of a [`ConfigReport`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct DeviceSection<'a> {
    name: &'a str,
    model: &'static str,
    manufacturer: &'static str,
    firmware: &'static str,
    hardware: &'static str,
    protocol: &'static str,
    os: &'static str,
    rf: &'a str,
    mac: &'a str,
}

/// Wi-Fi section of a [`ConfigReport`].
///
/// Keys are never reported.
#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct WlanSection<'a> {
    ssid: &'a str,
    dhcp: bool,
    ip: &'a str,
    netmask: &'a str,
    gateway: &'a str,
    dns1: &'a str,
    #[serde(rename = "RF_POWER_SAVE")]
    rf_power_save: bool,
    #[serde(rename = "MCU_POWER_SAVE")]
    mcu_power_save: bool,
    configured: bool,
}

/// Runtime section of a [`ConfigReport`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct StatusSection<'a> {
    ip: &'a str,
    netmask: &'a str,
    gateway: &'a str,
    dns1: &'a str,
}

/// Body returned by the read-config operation of the configuration server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ConfigReport<'a> {
    device: DeviceSection<'a>,
    wlan: WlanSection<'a>,
    status: StatusSection<'a>,
}

impl<'a> ConfigReport<'a> {
    /// Creates a [`ConfigReport`] describing the device.
    #[must_use]
    pub fn new(device: &DeviceInfo, config: &'a SystemConfig, status: &'a RuntimeStatus) -> Self {
        Self {
            device: DeviceSection {
                name: &config.name,
                model: device.model_name(),
                manufacturer: device.manufacturer_name(),
                firmware: device.firmware(),
                hardware: device.hardware(),
                protocol: device.protocol_name(),
                os: device.os(),
                rf: &status.rf_version,
                mac: &status.mac,
            },
            wlan: WlanSection {
                ssid: &config.ssid,
                dhcp: config.dhcp_enable,
                ip: &config.local_ip,
                netmask: &config.netmask,
                gateway: &config.gateway,
                dns1: &config.dns_server,
                rf_power_save: config.rf_power_save,
                mcu_power_save: config.mcu_power_save,
                configured: config.configured == ConfigState::AllConfigured,
            },
            status: StatusSection {
                ip: &status.local_ip,
                netmask: &status.netmask,
                gateway: &status.gateway,
                dns1: &status.dns_server,
            },
        }
    }

    /// Serializes the report into a JSON body.
    ///
    /// # Errors
    ///
    /// Fails when the report cannot be serialized.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Body accepted by the write-config operations of the configuration
/// server.
///
/// Every field is optional, missing fields keep their current value and
/// unknown fields are ignored.
#[derive(Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ConfigUpdate {
    /// Device name.
    pub name: Option<String>,
    /// Wi-Fi SSID.
    pub ssid: Option<String>,
    /// Wi-Fi passphrase.
    pub password: Option<String>,
    /// DHCP enable flag.
    pub dhcp: Option<bool>,
    /// Session identifier.
    pub identifier: Option<u32>,
    /// Static local IP address.
    pub ip: Option<String>,
    /// Static netmask.
    pub netmask: Option<String>,
    /// Static gateway.
    pub gateway: Option<String>,
    /// Static DNS server.
    pub dns1: Option<String>,
    /// Radio power save.
    #[serde(rename = "RF_POWER_SAVE")]
    pub rf_power_save: Option<bool>,
    /// MCU power save.
    #[serde(rename = "MCU_POWER_SAVE")]
    pub mcu_power_save: Option<bool>,
}

impl core::fmt::Debug for ConfigUpdate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfigUpdate")
            .field("name", &self.name)
            .field("ssid", &self.ssid)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("dhcp", &self.dhcp)
            .field("identifier", &self.identifier)
            .field("ip", &self.ip)
            .field("netmask", &self.netmask)
            .field("gateway", &self.gateway)
            .field("dns1", &self.dns1)
            .field("rf_power_save", &self.rf_power_save)
            .field("mcu_power_save", &self.mcu_power_save)
            .finish()
    }
}

/// Outcome of [`ConfigUpdate::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    /// A persisted setting changed and takes effect only after a reset.
    pub need_reboot: bool,
    /// Session identifier carried by the update.
    pub identifier: Option<u32>,
}

fn replace<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        return false;
    }
    *field = value;
    true
}

impl ConfigUpdate {
    /// Parses a JSON body.
    ///
    /// # Errors
    ///
    /// Fails when the body is not a JSON object with the expected field
    /// types.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Applies the update to a system configuration.
    ///
    /// A new SSID discards the access point learned by the previous join
    /// and a new passphrase replaces both keys, so the next join detects
    /// the security type again.
    pub fn apply(&self, config: &mut SystemConfig) -> Applied {
        let mut changed = false;

        if let Some(name) = &self.name {
            changed |= replace(&mut config.name, truncated(name, MAX_NAME_LEN));
        }

        if let Some(ssid) = &self.ssid {
            changed |= replace(&mut config.ssid, truncated(ssid, MAX_SSID_LEN));
            config.channel = 0;
            config.bssid = [0; 6];
            config.security = SecurityType::Auto;
            config.key.clone_from(&config.user_key);
        }

        if let Some(password) = &self.password {
            let password = truncated(password, MAX_KEY_LEN);
            changed |= replace(&mut config.user_key, password);
            config.key.clone_from(&config.user_key);
            config.security = SecurityType::Auto;
        }

        if let Some(dhcp) = self.dhcp {
            changed |= replace(&mut config.dhcp_enable, dhcp);
        }

        for (value, field) in [
            (&self.ip, &mut config.local_ip),
            (&self.netmask, &mut config.netmask),
            (&self.gateway, &mut config.gateway),
            (&self.dns1, &mut config.dns_server),
        ] {
            if let Some(value) = value {
                changed |= replace(field, truncated(value, MAX_IP_LEN));
            }
        }

        if let Some(rf_power_save) = self.rf_power_save {
            changed |= replace(&mut config.rf_power_save, rf_power_save);
        }

        if let Some(mcu_power_save) = self.mcu_power_save {
            changed |= replace(&mut config.mcu_power_save, mcu_power_save);
        }

        Applied {
            need_reboot: changed,
            identifier: self.identifier,
        }
    }
}
