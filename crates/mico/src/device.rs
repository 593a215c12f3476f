/// Static description of a device, published in `mDNS` TXT records and
/// configuration reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    // Product model.
    model: &'static str,
    // Product manufacturer.
    manufacturer: &'static str,
    // Application firmware revision.
    firmware_revision: &'static str,
    // Board revision.
    hardware_revision: &'static str,
    // Protocol spoken by the application.
    protocol: &'static str,
    // Operating system version.
    os_version: &'static str,
}

impl DeviceInfo {
    /// Creates a [`DeviceInfo`] from a model and a manufacturer.
    ///
    /// Every revision starts empty.
    #[must_use]
    pub const fn new(model: &'static str, manufacturer: &'static str) -> Self {
        Self {
            model,
            manufacturer,
            firmware_revision: "",
            hardware_revision: "",
            protocol: "",
            os_version: "",
        }
    }

    /// Sets the firmware revision.
    #[must_use]
    pub const fn firmware_revision(mut self, firmware_revision: &'static str) -> Self {
        self.firmware_revision = firmware_revision;
        self
    }

    /// Sets the hardware revision.
    #[must_use]
    pub const fn hardware_revision(mut self, hardware_revision: &'static str) -> Self {
        self.hardware_revision = hardware_revision;
        self
    }

    /// Sets the application protocol.
    #[must_use]
    pub const fn protocol(mut self, protocol: &'static str) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the operating system version.
    #[must_use]
    pub const fn os_version(mut self, os_version: &'static str) -> Self {
        self.os_version = os_version;
        self
    }

    /// Returns the model.
    #[must_use]
    pub const fn model_name(&self) -> &'static str {
        self.model
    }

    /// Returns the manufacturer.
    #[must_use]
    pub const fn manufacturer_name(&self) -> &'static str {
        self.manufacturer
    }

    /// Returns the firmware revision.
    #[must_use]
    pub const fn firmware(&self) -> &'static str {
        self.firmware_revision
    }

    /// Returns the hardware revision.
    #[must_use]
    pub const fn hardware(&self) -> &'static str {
        self.hardware_revision
    }

    /// Returns the application protocol.
    #[must_use]
    pub const fn protocol_name(&self) -> &'static str {
        self.protocol
    }

    /// Returns the operating system version.
    #[must_use]
    pub const fn os(&self) -> &'static str {
        self.os_version
    }
}
