use alloc::format;
use alloc::string::String;

use core::time::Duration;

use crate::config::{SecurityType, SystemConfig};

/// Interval between two join retries performed by the driver.
pub const JOIN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Soft access point address.
pub const SOFT_AP_ADDRESS: &str = "10.10.10.1";
/// Soft access point netmask.
pub const SOFT_AP_NETMASK: &str = "255.255.255.0";
/// Soft access point SSID prefix.
pub const SOFT_AP_SSID_PREFIX: &str = "EasyLink_";

/// A Wi-Fi interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Station interface, joined to an access point.
    Station,
    /// Soft access point interface.
    SoftAp,
}

/// Mechanism the driver uses to receive credentials over the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMethod {
    /// `EasyLink` combined with its `Plus` variant.
    EasyLinkPlus,
    /// `AirKiss` one-touch pairing.
    AirKiss,
}

/// DHCP role of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpMode {
    /// Static address.
    Disabled,
    /// Address obtained from a DHCP server.
    Client,
    /// The interface serves addresses.
    Server,
}

/// Address configuration of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpSettings {
    /// DHCP role.
    pub dhcp: DhcpMode,
    /// Local address, ignored by a DHCP client.
    pub local_ip: String,
    /// Netmask, ignored by a DHCP client.
    pub netmask: String,
    /// Gateway, ignored by a DHCP client.
    pub gateway: String,
    /// DNS server, ignored by a DHCP client.
    pub dns_server: String,
}

impl IpSettings {
    fn from_config(config: &SystemConfig) -> Self {
        Self {
            dhcp: if config.dhcp_enable {
                DhcpMode::Client
            } else {
                DhcpMode::Disabled
            },
            local_ip: config.local_ip.clone(),
            netmask: config.netmask.clone(),
            gateway: config.gateway.clone(),
            dns_server: config.dns_server.clone(),
        }
    }
}

/// Parameters of a station join.
#[derive(Clone, PartialEq, Eq)]
pub struct JoinParams {
    /// SSID.
    pub ssid: String,
    /// BSSID, only known for a fast join.
    pub bssid: Option<[u8; 6]>,
    /// Channel, zero lets the driver scan.
    pub channel: u8,
    /// Security type.
    pub security: SecurityType,
    /// Key handed to the driver.
    pub key: String,
    /// Address configuration.
    pub ip: IpSettings,
    /// Interval between join retries.
    pub retry_interval: Duration,
}

impl JoinParams {
    /// Builds the parameters of a normal join.
    ///
    /// The driver detects the security type and uses the key entered by the
    /// user.
    #[must_use]
    pub fn normal(config: &SystemConfig) -> Self {
        Self {
            ssid: config.ssid.clone(),
            bssid: None,
            channel: 0,
            security: SecurityType::Auto,
            key: config.user_key.clone(),
            ip: IpSettings::from_config(config),
            retry_interval: JOIN_RETRY_INTERVAL,
        }
    }

    /// Builds the parameters of a fast join.
    ///
    /// The access point learned by a previous join is reused together with
    /// the key derived by the driver, skipping the scan.
    #[must_use]
    pub fn fast(config: &SystemConfig) -> Self {
        Self {
            ssid: config.ssid.clone(),
            bssid: Some(config.bssid),
            channel: config.channel,
            security: config.security,
            key: config.key.clone(),
            ip: IpSettings::from_config(config),
            retry_interval: JOIN_RETRY_INTERVAL,
        }
    }

    /// Whether the parameters reuse a previously learned access point.
    #[must_use]
    pub const fn is_fast(&self) -> bool {
        self.bssid.is_some()
    }
}

impl core::fmt::Debug for JoinParams {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JoinParams")
            .field("ssid", &self.ssid)
            .field("bssid", &self.bssid)
            .field("channel", &self.channel)
            .field("security", &self.security)
            .field("ip", &self.ip)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}

/// Parameters of a soft access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftApConfig {
    /// SSID.
    pub ssid: String,
    /// Key, empty for an open network.
    pub key: String,
    /// Address configuration.
    pub ip: IpSettings,
}

impl SoftApConfig {
    /// Builds the open access point used as provisioning fallback.
    ///
    /// Its SSID ends with the last three bytes of the station MAC address.
    #[must_use]
    pub fn easylink(mac: &[u8; 6]) -> Self {
        Self {
            ssid: format!("{SOFT_AP_SSID_PREFIX}{}", mac_suffix(mac)),
            key: String::new(),
            ip: IpSettings {
                dhcp: DhcpMode::Server,
                local_ip: SOFT_AP_ADDRESS.into(),
                netmask: SOFT_AP_NETMASK.into(),
                gateway: SOFT_AP_ADDRESS.into(),
                dns_server: String::new(),
            },
        }
    }
}

/// Formats a MAC address as `AA:BB:CC:DD:EE:FF`.
#[must_use]
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Formats the last three bytes of a MAC address as upper-case hex.
#[must_use]
pub fn mac_suffix(mac: &[u8; 6]) -> String {
    format!("{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5])
}
