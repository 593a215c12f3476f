use std::time::Duration;

use mico::device::DeviceInfo;
use mico::wlan::DiscoveryMethod;

/// Product model.
pub const MODEL: &str = "MiCOKit-LPC5410x";
/// Product manufacturer.
pub const MANUFACTURER: &str = "MXCHIP Inc.";
/// Application firmware revision.
pub const FIRMWARE_REVISION: &str = "MICO_BASIC_1_0";
/// Board revision.
pub const HARDWARE_REVISION: &str = "LPC5410x_1";
/// Application protocol.
pub const PROTOCOL: &str = "com.mxchip.basic";
/// Operating system version.
pub const OS_VERSION: &str = concat!("mico-system-", env!("CARGO_PKG_VERSION"));
/// Device name written by a factory reset.
pub const DEFAULT_NAME: &str = "MiCOKit LPC5410x";

/// Version of the configuration defaults.
///
/// A stored record with a different seed is discarded on boot.
pub const CONFIG_SEED: u32 = 1;

/// Default configuration server port.
pub const CONFIG_SERVER_PORT: u16 = 8000;
/// Maximum number of clients served at once by the configuration server.
pub const MAX_CONFIG_CLIENTS: usize = 5;

/// Default timeout of a discovery session.
pub const EASYLINK_TIMEOUT: Duration = Duration::from_secs(60);
/// Default time given to a join before provisioning restarts.
pub const CONNECT_WLAN_TIMEOUT: Duration = Duration::from_secs(20);
/// Default number of provisioning attempts.
pub const MAX_PROVISIONING_ATTEMPTS: u8 = 5;
/// Time the station advertisement stays up after provisioning exits.
pub const STATION_ADVERTISEMENT_LINGER: Duration = Duration::from_secs(60);
/// Time between accepting a configuration from the soft access point and
/// joining the new network.
pub const SOFT_AP_JOIN_DELAY: Duration = Duration::from_secs(1);

/// Time given to subscribers between the power-off notification and the
/// power transition.
pub const POWER_OFF_DELAY: Duration = Duration::from_millis(500);

/// Maximum number of liveness checkpoints.
pub const MAX_SYSTEM_MONITORS: usize = 5;
/// Default period of the system monitor.
pub const SYSTEM_MONITOR_PERIOD: Duration = Duration::from_secs(2);
/// Permitted delay of the checkpoint owned by the system itself.
pub const SYSTEM_CHECKPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of subscribers of a single notification kind.
pub const MAX_SUBSCRIBERS_PER_KIND: usize = 8;

/// Flash layout: configuration partition address.
pub const CONFIG_PARTITION_START: u32 = 0x0000_4000;
/// Flash layout: configuration partition size.
pub const CONFIG_PARTITION_SIZE: usize = 8 * 1024;
/// Flash layout: application partition address.
pub const APPLICATION_PARTITION_START: u32 = 0x0000_8000;
/// Flash layout: application and OTA partition size.
pub const IMAGE_PARTITION_SIZE: usize = 512 * 1024;
/// Flash layout: OTA partition address.
pub const OTA_PARTITION_START: u32 = 0x0008_8000;

/// Provisioning strategy compiled into a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningMode {
    /// `EasyLink` discovery, rolling back to the previous network on
    /// failure.
    EasyLink,
    /// `EasyLink` discovery, falling back to a soft access point on
    /// failure.
    EasyLinkWithSoftAp,
    /// Soft access point only.
    SoftAp,
    /// `AirKiss` discovery, rolling back to the previous network on
    /// failure.
    AirKiss,
}

impl ProvisioningMode {
    /// Returns the discovery method, `None` when discovery is skipped.
    #[must_use]
    pub const fn discovery_method(self) -> Option<DiscoveryMethod> {
        match self {
            Self::EasyLink | Self::EasyLinkWithSoftAp => Some(DiscoveryMethod::EasyLinkPlus),
            Self::AirKiss => Some(DiscoveryMethod::AirKiss),
            Self::SoftAp => None,
        }
    }

    /// Whether a failed provisioning falls back to a soft access point.
    #[must_use]
    pub const fn falls_back_to_soft_ap(self) -> bool {
        matches!(self, Self::EasyLinkWithSoftAp | Self::SoftAp)
    }
}

/// Runtime options of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemOptions {
    // Provisioning strategy.
    pub(crate) mode: ProvisioningMode,
    // Timeout handed to the discovery mechanism.
    pub(crate) easylink_timeout: Duration,
    // Time given to a join before provisioning restarts.
    pub(crate) connect_timeout: Duration,
    // Maximum number of provisioning attempts.
    pub(crate) max_attempts: u8,
    // Whether the configuration server runs.
    pub(crate) config_server: bool,
    // Configuration server port.
    pub(crate) port: u16,
    // Whether the system monitor runs.
    pub(crate) monitor: bool,
    // System monitor period.
    pub(crate) monitor_period: Duration,
    // Size of the application data stored in the configuration record.
    pub(crate) app_data_size: usize,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemOptions {
    /// Creates [`SystemOptions`] with the default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: ProvisioningMode::EasyLinkWithSoftAp,
            easylink_timeout: EASYLINK_TIMEOUT,
            connect_timeout: CONNECT_WLAN_TIMEOUT,
            max_attempts: MAX_PROVISIONING_ATTEMPTS,
            config_server: true,
            port: CONFIG_SERVER_PORT,
            monitor: true,
            monitor_period: SYSTEM_MONITOR_PERIOD,
            app_data_size: 0,
        }
    }

    /// Sets the provisioning mode.
    #[must_use]
    #[inline]
    pub const fn mode(mut self, mode: ProvisioningMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the timeout handed to the discovery mechanism.
    #[must_use]
    #[inline]
    pub const fn easylink_timeout(mut self, timeout: Duration) -> Self {
        self.easylink_timeout = timeout;
        self
    }

    /// Sets the time given to a join before provisioning restarts.
    #[must_use]
    #[inline]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the maximum number of provisioning attempts.
    ///
    /// Zero is treated as one.
    #[must_use]
    #[inline]
    pub const fn max_attempts(mut self, max_attempts: u8) -> Self {
        self.max_attempts = if max_attempts == 0 { 1 } else { max_attempts };
        self
    }

    /// Disables the configuration server.
    #[must_use]
    #[inline]
    pub const fn disable_config_server(mut self) -> Self {
        self.config_server = false;
        self
    }

    /// Sets the configuration server port.
    ///
    /// Zero lets the operating system choose a port.
    #[must_use]
    #[inline]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Disables the system monitor.
    #[must_use]
    #[inline]
    pub const fn disable_monitor(mut self) -> Self {
        self.monitor = false;
        self
    }

    /// Sets the system monitor period.
    #[must_use]
    #[inline]
    pub const fn monitor_period(mut self, period: Duration) -> Self {
        self.monitor_period = period;
        self
    }

    /// Sets the size of the application data.
    #[must_use]
    #[inline]
    pub const fn app_data_size(mut self, size: usize) -> Self {
        self.app_data_size = size;
        self
    }

    /// Returns the provisioning mode.
    #[must_use]
    pub const fn provisioning_mode(&self) -> ProvisioningMode {
        self.mode
    }

    /// Whether the configuration server is enabled.
    #[must_use]
    pub const fn config_server_enabled(&self) -> bool {
        self.config_server
    }
}

/// Returns the [`DeviceInfo`] built from the product constants.
#[must_use]
pub const fn device_info() -> DeviceInfo {
    DeviceInfo::new(MODEL, MANUFACTURER)
        .firmware_revision(FIRMWARE_REVISION)
        .hardware_revision(HARDWARE_REVISION)
        .protocol(PROTOCOL)
        .os_version(OS_VERSION)
}
