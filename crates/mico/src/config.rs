use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crc::{CRC_32_ISCSI, Crc};

use serde::{Deserialize, Serialize};

use crate::truncated;

/// Maximum length of a Wi-Fi SSID, in bytes.
pub const MAX_SSID_LEN: usize = 32;
/// Maximum length of a Wi-Fi key, in bytes.
pub const MAX_KEY_LEN: usize = 64;
/// Maximum length of a device name, in bytes.
pub const MAX_NAME_LEN: usize = 32;
/// Maximum length of a dotted-decimal IP address string, in bytes.
pub const MAX_IP_LEN: usize = 16;

// Marks the start of a configuration image ("MICO" in ASCII).
const IMAGE_MAGIC: u32 = 0x4D49_434F;
// Magic plus payload length.
const IMAGE_HEADER_LEN: usize = 8;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Provisioning state of a device.
///
/// The state only moves forward, from [`ConfigState::Unconfigured`] to
/// [`ConfigState::AllConfigured`]. Going back requires an explicit
/// reconfiguration request or a restore to factory defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigState {
    /// All settings are in their factory state.
    #[default]
    Unconfigured,
    /// The Wi-Fi settings must be provisioned again, the remaining settings
    /// are kept.
    WlanUnconfigured,
    /// The device joins the configured network on boot.
    AllConfigured,
}

impl ConfigState {
    /// Whether the provisioning state machine must run on boot.
    #[must_use]
    pub const fn needs_provisioning(self) -> bool {
        matches!(self, Self::Unconfigured | Self::WlanUnconfigured)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        next.rank() >= self.rank()
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Unconfigured => 0,
            Self::WlanUnconfigured => 1,
            Self::AllConfigured => 2,
        }
    }
}

/// Instructs the next provisioning run to skip discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EasyLinkBypass {
    /// Run the provisioning state machine normally.
    #[default]
    No,
    /// Join the stored network directly.
    Bypass,
    /// Go straight to the soft access point fallback.
    SoftApBypass,
}

/// Wi-Fi security type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecurityType {
    /// Open network.
    None,
    /// WEP.
    Wep,
    /// WPA with TKIP.
    WpaTkip,
    /// WPA with AES.
    WpaAes,
    /// WPA2 with TKIP.
    Wpa2Tkip,
    /// WPA2 with AES.
    Wpa2Aes,
    /// WPA2 with both TKIP and AES.
    Wpa2Mixed,
    /// Detected by the driver when joining.
    #[default]
    Auto,
}

/// Kind of image described by a [`BootTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    /// Application firmware.
    Application,
    /// Bootloader.
    Bootloader,
    /// Boot table.
    BootTable,
    /// Wi-Fi driver firmware.
    Driver,
}

impl ImageType {
    /// Returns the byte stored in the boot table for this image type.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Application => b'A',
            Self::Bootloader => b'B',
            Self::BootTable => b'P',
            Self::Driver => b'D',
        }
    }

    /// Parses an image type from its boot table byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'A' => Some(Self::Application),
            b'B' => Some(Self::Bootloader),
            b'P' => Some(Self::BootTable),
            b'D' => Some(Self::Driver),
            _ => None,
        }
    }
}

/// Boot table byte marking an image as pending upgrade.
pub const UPGRADE_PENDING: u8 = b'U';

/// Describes a firmware image waiting to be installed by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BootTable {
    /// Flash address of the image.
    pub start_address: u32,
    /// Image length in bytes.
    pub length: u32,
    /// Image version.
    pub version: [u8; 8],
    /// Image type byte, see [`ImageType`].
    pub image_type: u8,
    /// Upgrade type byte, see [`UPGRADE_PENDING`].
    pub upgrade_type: u8,
    /// `CRC16` of the image.
    pub crc: u16,
    /// Reserved bytes.
    pub reserved: [u8; 4],
}

impl BootTable {
    /// Creates the boot table of an application image waiting to be
    /// upgraded.
    #[must_use]
    pub const fn upgrade(start_address: u32, length: u32, crc: u16) -> Self {
        Self {
            start_address,
            length,
            version: [0; 8],
            image_type: ImageType::Application.as_byte(),
            upgrade_type: UPGRADE_PENDING,
            crc,
            reserved: [0; 4],
        }
    }

    /// Whether an upgrade is pending.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.upgrade_type == UPGRADE_PENDING
    }
}

/// The system part of the configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Device name.
    pub name: String,
    /// Wi-Fi SSID.
    pub ssid: String,
    /// Wi-Fi key as entered by the user.
    pub user_key: String,
    /// Wi-Fi key derived by the driver after a successful join.
    pub key: String,
    /// Access point BSSID.
    pub bssid: [u8; 6],
    /// Wi-Fi channel, zero means any channel.
    pub channel: u8,
    /// Wi-Fi security type.
    pub security: SecurityType,
    /// Radio power save.
    pub rf_power_save: bool,
    /// MCU power save.
    pub mcu_power_save: bool,
    /// Obtain the IP configuration through DHCP.
    pub dhcp_enable: bool,
    /// Static local IP address.
    pub local_ip: String,
    /// Static netmask.
    pub netmask: String,
    /// Static gateway.
    pub gateway: String,
    /// Static DNS server.
    pub dns_server: String,
    /// Provisioning state.
    pub configured: ConfigState,
    /// Provisioning bypass flag.
    pub easylink_bypass: EasyLinkBypass,
    /// Version of the configuration defaults.
    pub seed: u32,
}

impl SystemConfig {
    /// Creates the factory configuration.
    #[must_use]
    pub fn factory(name: &str, seed: u32) -> Self {
        Self {
            name: truncated(name, MAX_NAME_LEN),
            ssid: String::new(),
            user_key: String::new(),
            key: String::new(),
            bssid: [0; 6],
            channel: 0,
            security: SecurityType::Auto,
            rf_power_save: false,
            mcu_power_save: false,
            dhcp_enable: true,
            local_ip: String::new(),
            netmask: String::new(),
            gateway: String::new(),
            dns_server: String::new(),
            configured: ConfigState::Unconfigured,
            easylink_bypass: EasyLinkBypass::No,
            seed,
        }
    }

    /// Stores new Wi-Fi credentials.
    ///
    /// Both keys are replaced by the given one and the parameters learned
    /// by a previous join are cleared, so the next join detects them again.
    pub fn set_credentials(&mut self, ssid: &str, key: &str) {
        self.ssid = truncated(ssid, MAX_SSID_LEN);
        self.user_key = truncated(key, MAX_KEY_LEN);
        self.key.clone_from(&self.user_key);
        self.bssid = [0; 6];
        self.channel = 0;
        self.security = SecurityType::Auto;
    }

    /// Sets a static IP configuration and disables DHCP.
    pub fn set_static_ip(&mut self, local_ip: &str, netmask: &str, gateway: &str, dns: &str) {
        self.dhcp_enable = false;
        self.local_ip = truncated(local_ip, MAX_IP_LEN);
        self.netmask = truncated(netmask, MAX_IP_LEN);
        self.gateway = truncated(gateway, MAX_IP_LEN);
        self.dns_server = truncated(dns, MAX_IP_LEN);
    }

    /// Sets the device name.
    pub fn set_name(&mut self, name: &str) {
        self.name = truncated(name, MAX_NAME_LEN);
    }

    /// Moves the provisioning state forward.
    ///
    /// Returns `false` and leaves the state untouched when `next` would move
    /// the state backwards.
    pub fn advance(&mut self, next: ConfigState) -> bool {
        if !self.configured.can_advance_to(next) {
            return false;
        }
        self.configured = next;
        true
    }

    /// Requests a new Wi-Fi provisioning while keeping the other settings.
    ///
    /// A fully configured device moves back to
    /// [`ConfigState::WlanUnconfigured`], any other state is kept.
    pub fn request_reconfiguration(&mut self) {
        if self.configured == ConfigState::AllConfigured {
            self.configured = ConfigState::WlanUnconfigured;
        }
    }
}

/// Network status observed at runtime, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeStatus {
    /// Current local IP address.
    pub local_ip: String,
    /// Current netmask.
    pub netmask: String,
    /// Current gateway.
    pub gateway: String,
    /// Current DNS server.
    pub dns_server: String,
    /// Station MAC address, formatted as `AA:BB:CC:DD:EE:FF`.
    pub mac: String,
    /// Wi-Fi driver version.
    pub rf_version: String,
}

/// Errors produced by the configuration image codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    /// The image does not start with the expected magic.
    BadMagic,
    /// The image is shorter than its header declares.
    Truncated,
    /// The payload checksum does not match or the payload is malformed.
    Corrupted,
    /// The record could not be encoded.
    Encode,
    /// The encoded record does not fit its partition.
    TooLarge,
}

impl core::fmt::Display for ImageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::BadMagic => "configuration image magic not found",
            Self::Truncated => "configuration image truncated",
            Self::Corrupted => "configuration image corrupted",
            Self::Encode => "configuration record cannot be encoded",
            Self::TooLarge => "configuration image exceeds its partition",
        })
    }
}

impl core::error::Error for ImageError {}

/// The record persisted in the configuration partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRecord {
    /// Pending OTA image.
    pub boot_table: BootTable,
    /// System configuration.
    pub system: SystemConfig,
    /// Application data, opaque to the system.
    pub app_config: Vec<u8>,
}

impl ConfigurationRecord {
    /// Creates a factory record with `app_data_size` zeroed application
    /// bytes.
    #[must_use]
    pub fn factory(name: &str, seed: u32, app_data_size: usize) -> Self {
        Self {
            boot_table: BootTable::default(),
            system: SystemConfig::factory(name, seed),
            app_config: vec![0; app_data_size],
        }
    }

    /// Resets the system configuration and the application data to their
    /// factory state, keeping the boot table.
    pub fn restore_defaults(&mut self) {
        let name = core::mem::take(&mut self.system.name);
        self.system = SystemConfig::factory(&name, self.system.seed);
        self.app_config.fill(0);
    }

    /// Encodes the record into a flash image.
    ///
    /// The image is a little-endian magic, the payload length and a
    /// `postcard` payload terminated by its `CRC32`.
    ///
    /// # Errors
    ///
    /// [`ImageError::Encode`] when the record cannot be serialized.
    pub fn to_image(&self) -> Result<Vec<u8>, ImageError> {
        let payload =
            postcard::to_allocvec_crc32(self, CRC32.digest()).map_err(|_| ImageError::Encode)?;
        let length = u32::try_from(payload.len()).map_err(|_| ImageError::TooLarge)?;

        let mut image = Vec::with_capacity(IMAGE_HEADER_LEN + payload.len());
        image.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
        image.extend_from_slice(&length.to_le_bytes());
        image.extend_from_slice(&payload);
        Ok(image)
    }

    /// Decodes a record from a flash image.
    ///
    /// Bytes following the payload are ignored, so a whole partition can be
    /// passed.
    ///
    /// # Errors
    ///
    /// An [`ImageError`] when the image is erased, truncated or corrupted.
    pub fn from_image(image: &[u8]) -> Result<Self, ImageError> {
        let Some((header, rest)) = image.split_at_checked(IMAGE_HEADER_LEN) else {
            return Err(ImageError::Truncated);
        };

        let (magic, length) = header.split_at(4);
        if magic != IMAGE_MAGIC.to_le_bytes() {
            return Err(ImageError::BadMagic);
        }

        let mut length_bytes = [0; 4];
        length_bytes.copy_from_slice(length);
        let length = u32::from_le_bytes(length_bytes) as usize;

        let payload = rest.get(..length).ok_or(ImageError::Truncated)?;
        postcard::from_bytes_crc32(payload, CRC32.digest()).map_err(|_| ImageError::Corrupted)
    }
}
