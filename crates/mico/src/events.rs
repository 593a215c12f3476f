use alloc::string::String;
use alloc::vec::Vec;

use crate::config::SecurityType;

/// Change of a Wi-Fi interface state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WifiEvent {
    /// The station joined an access point.
    StationUp,
    /// The station left its access point.
    StationDown,
    /// The soft access point is up.
    ApUp,
    /// The soft access point is down.
    ApDown,
}

/// Wi-Fi credentials delivered by the first stage of a discovery session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Network SSID.
    pub ssid: String,
    /// Network passphrase.
    pub key: String,
}

impl Credentials {
    /// Creates [`Credentials`].
    #[must_use]
    pub fn new(ssid: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            key: key.into(),
        }
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Address configuration reported once DHCP completes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpStatus {
    /// Local IP address.
    pub local_ip: String,
    /// Netmask.
    pub netmask: String,
    /// Gateway.
    pub gateway: String,
    /// DNS server.
    pub dns_server: String,
}

/// Access point parameters learned by the driver after a join.
#[derive(Clone, PartialEq, Eq)]
pub struct ApInfo {
    /// SSID.
    pub ssid: String,
    /// BSSID.
    pub bssid: [u8; 6],
    /// Channel.
    pub channel: u8,
    /// Security type.
    pub security: SecurityType,
    /// Derived key.
    pub key: String,
}

impl core::fmt::Debug for ApInfo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApInfo")
            .field("ssid", &self.ssid)
            .field("bssid", &self.bssid)
            .field("channel", &self.channel)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

/// An access point found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    /// SSID.
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i16,
}

/// A notification dispatched through the notification center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A scan finished.
    ScanCompleted(Vec<ScanRecord>),
    /// A Wi-Fi interface changed state.
    WifiStatusChanged(WifiEvent),
    /// The driver learned new access point parameters.
    WifiParametersChanged(ApInfo),
    /// DHCP assigned an address.
    DhcpCompleted(IpStatus),
    /// The first stage of a discovery session ended.
    ///
    /// `None` means the discovery failed or timed out.
    EasyLinkCompleted(Option<Credentials>),
    /// The second stage of a discovery session delivered its payload.
    EasyLinkExtraData(Vec<u8>),
    /// The system is about to reset or power down.
    SystemWillPowerOff,
    /// A join attempt failed with the given driver code.
    WifiConnectFailed(i32),
    /// The Wi-Fi driver hit an unrecoverable fault.
    WifiFatalError,
    /// A task overflowed its stack.
    StackOverflow(String),
}

/// The type of a [`Notification`], used as subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// See [`Notification::ScanCompleted`].
    ScanCompleted,
    /// See [`Notification::WifiStatusChanged`].
    WifiStatusChanged,
    /// See [`Notification::WifiParametersChanged`].
    WifiParametersChanged,
    /// See [`Notification::DhcpCompleted`].
    DhcpCompleted,
    /// See [`Notification::EasyLinkCompleted`].
    EasyLinkCompleted,
    /// See [`Notification::EasyLinkExtraData`].
    EasyLinkExtraData,
    /// See [`Notification::SystemWillPowerOff`].
    SystemWillPowerOff,
    /// See [`Notification::WifiConnectFailed`].
    WifiConnectFailed,
    /// See [`Notification::WifiFatalError`].
    WifiFatalError,
    /// See [`Notification::StackOverflow`].
    StackOverflow,
}

impl Notification {
    /// Returns the [`NotificationKind`] of this notification.
    #[must_use]
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::ScanCompleted(_) => NotificationKind::ScanCompleted,
            Self::WifiStatusChanged(_) => NotificationKind::WifiStatusChanged,
            Self::WifiParametersChanged(_) => NotificationKind::WifiParametersChanged,
            Self::DhcpCompleted(_) => NotificationKind::DhcpCompleted,
            Self::EasyLinkCompleted(_) => NotificationKind::EasyLinkCompleted,
            Self::EasyLinkExtraData(_) => NotificationKind::EasyLinkExtraData,
            Self::SystemWillPowerOff => NotificationKind::SystemWillPowerOff,
            Self::WifiConnectFailed(_) => NotificationKind::WifiConnectFailed,
            Self::WifiFatalError => NotificationKind::WifiFatalError,
            Self::StackOverflow(_) => NotificationKind::StackOverflow,
        }
    }
}
