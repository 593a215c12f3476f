use std::time::Duration;

use mico::wlan::{DiscoveryMethod, JoinParams, SoftApConfig};

use crate::error::Result;

/// Commands accepted by the Wi-Fi driver.
///
/// Every command returns once the driver accepted it. The outcome is
/// reported later through the notification center.
pub trait WifiDriver: Send + Sync {
    /// Returns the station MAC address.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot be queried.
    fn mac_address(&self) -> Result<[u8; 6]>;

    /// Returns the driver firmware version.
    ///
    /// # Errors
    ///
    /// Fails when the driver cannot be queried.
    fn rf_version(&self) -> Result<String>;

    /// Starts receiving credentials over the air.
    ///
    /// The driver gives up after `timeout` and reports a failed
    /// [`mico::events::Notification::EasyLinkCompleted`].
    ///
    /// # Errors
    ///
    /// Fails when the discovery cannot start.
    fn start_discovery(&self, method: DiscoveryMethod, timeout: Duration) -> Result<()>;

    /// Stops a running discovery.
    ///
    /// # Errors
    ///
    /// Fails when the driver rejects the command.
    fn stop_discovery(&self) -> Result<()>;

    /// Joins an access point as station.
    ///
    /// # Errors
    ///
    /// Fails when the driver rejects the parameters.
    fn connect(&self, params: &JoinParams) -> Result<()>;

    /// Starts a soft access point.
    ///
    /// # Errors
    ///
    /// Fails when the access point cannot start.
    fn start_soft_ap(&self, config: &SoftApConfig) -> Result<()>;

    /// Stops the soft access point.
    ///
    /// # Errors
    ///
    /// Fails when the driver rejects the command.
    fn suspend_soft_ap(&self) -> Result<()>;

    /// Powers the radio off.
    ///
    /// # Errors
    ///
    /// Fails when the driver rejects the command.
    fn power_off(&self) -> Result<()>;

    /// Enables or disables radio power save.
    ///
    /// # Errors
    ///
    /// Fails when the driver rejects the command.
    fn set_power_save(&self, enabled: bool) -> Result<()>;
}

/// Power control of the whole device.
pub trait SystemControl: Send + Sync {
    /// Resets the device.
    fn reboot(&self);

    /// Enters deep sleep until an external wake-up.
    fn standby(&self);
}

/// A hardware watchdog.
pub trait Watchdog: Send + Sync {
    /// Arms the watchdog.
    ///
    /// # Errors
    ///
    /// Fails when the watchdog cannot be armed.
    fn initialize(&self, timeout: Duration) -> Result<()>;

    /// Restarts the watchdog countdown.
    fn reload(&self);
}
