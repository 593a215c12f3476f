use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};

use mico::bonjour::{SERVICE_TYPE, TxtRecord, host_name, instance_name};
use mico::device::DeviceInfo;
use mico::wlan::{Interface, format_mac};

use tracing::{debug, info};

use crate::error::Result;

/// A configuration service announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Service instance name.
    pub instance_name: String,
    /// Host name.
    pub host_name: String,
    /// Configuration server port.
    pub port: u16,
    /// TXT record.
    pub txt: TxtRecord,
}

impl Advertisement {
    /// Creates the [`Advertisement`] of a device on an interface.
    #[must_use]
    pub fn new(
        device: DeviceInfo,
        mac: &[u8; 6],
        rf_version: &str,
        port: u16,
        config_server: bool,
        interface: Interface,
    ) -> Self {
        Self {
            instance_name: instance_name(&device, mac),
            host_name: host_name(&device, mac),
            port,
            txt: TxtRecord::new(
                device,
                rf_version,
                &format_mac(mac),
                config_server,
                interface,
            ),
        }
    }

    /// Sets the session identifier published in the TXT record.
    #[must_use]
    pub fn identifier(mut self, identifier: u32) -> Self {
        self.txt = self.txt.identifier(identifier);
        self
    }
}

/// Publishes the configuration service on an interface.
pub trait Advertiser: Send + Sync {
    /// Starts announcing the service on an interface.
    ///
    /// # Errors
    ///
    /// Fails when the announcement cannot be published.
    fn start(&self, interface: Interface, advertisement: &Advertisement) -> Result<()>;

    /// Replaces the announcement of an interface without withdrawing it.
    ///
    /// # Errors
    ///
    /// Fails when the announcement cannot be published.
    fn update(&self, interface: Interface, advertisement: &Advertisement) -> Result<()>;

    /// Withdraws the announcement of an interface.
    ///
    /// Suspending an interface which is not announced does nothing.
    ///
    /// # Errors
    ///
    /// Fails when the announcement cannot be withdrawn.
    fn suspend(&self, interface: Interface) -> Result<()>;
}

/// An [`Advertiser`] over `mDNS`.
///
/// A host has a single network stack, so one service is published: the
/// soft access point announcement while it exists, the station one
/// otherwise.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    announcements: Mutex<HashMap<Interface, Advertisement>>,
    published: Mutex<Option<String>>,
}

impl MdnsAdvertiser {
    /// Creates a [`MdnsAdvertiser`].
    ///
    /// # Errors
    ///
    /// Fails when the `mDNS` daemon cannot start.
    pub fn new() -> Result<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            announcements: Mutex::new(HashMap::new()),
            published: Mutex::new(None),
        })
    }

    fn announcements(&self) -> MutexGuard<'_, HashMap<Interface, Advertisement>> {
        self.announcements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) -> Result<()> {
        let current = {
            let announcements = self.announcements();
            announcements
                .get(&Interface::SoftAp)
                .or_else(|| announcements.get(&Interface::Station))
                .cloned()
        };

        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(advertisement) = current else {
            if let Some(fullname) = published.take() {
                let _ = self.daemon.unregister(&fullname)?;
                info!("Service `{fullname}` withdrawn");
            }
            return Ok(());
        };

        let properties = advertisement.txt.properties();
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &advertisement.instance_name,
            &advertisement.host_name,
            "",
            advertisement.port,
            &properties[..],
        )?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        if published.as_ref().is_some_and(|name| *name != fullname) {
            if let Some(previous) = published.take() {
                let _ = self.daemon.unregister(&previous)?;
            }
        }

        self.daemon.register(service)?;
        debug!(
            "Service `{fullname}` published, identifier {}",
            advertisement.txt.session_identifier()
        );
        *published = Some(fullname);

        Ok(())
    }

    /// Withdraws every announcement and stops the `mDNS` daemon.
    ///
    /// # Errors
    ///
    /// Fails when the daemon cannot be stopped.
    pub fn shutdown(&self) -> Result<()> {
        self.announcements().clear();
        self.publish()?;
        let _ = self.daemon.shutdown()?;
        Ok(())
    }
}

impl Advertiser for MdnsAdvertiser {
    fn start(&self, interface: Interface, advertisement: &Advertisement) -> Result<()> {
        info!(
            "Announcing `{}` on the {interface:?} interface",
            advertisement.instance_name
        );
        let _ = self
            .announcements()
            .insert(interface, advertisement.clone());
        self.publish()
    }

    fn update(&self, interface: Interface, advertisement: &Advertisement) -> Result<()> {
        let _ = self
            .announcements()
            .insert(interface, advertisement.clone());
        self.publish()
    }

    fn suspend(&self, interface: Interface) -> Result<()> {
        if self.announcements().remove(&interface).is_none() {
            return Ok(());
        }
        info!("Announcement on the {interface:?} interface suspended");
        self.publish()
    }
}

#[cfg(test)]
mod tests {
    use mico::wlan::Interface;

    use crate::config::device_info;

    use super::Advertisement;

    const MAC: [u8; 6] = [0xC8, 0x93, 0x46, 0x0A, 0x1B, 0x2C];

    #[test]
    fn advertisement() {
        let advertisement =
            Advertisement::new(device_info(), &MAC, "RF 1.0", 8000, true, Interface::Station)
                .identifier(42);

        assert_eq!(advertisement.instance_name, "MiCOKit-LPC5410x(0A1B2C)");
        assert_eq!(advertisement.host_name, "MiCOKit-LPC5410x-0A1B2C.local.");
        assert_eq!(advertisement.port, 8000);

        let properties = advertisement.txt.properties();
        let value = |key: &str| {
            properties
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(value("MAC"), Some("C8:93:46:0A:1B:2C"));
        assert_eq!(value("ID"), Some("42"));
        assert_eq!(value("FTC"), Some("T"));
        assert_eq!(value("wlan unconfigured"), Some("F"));
    }
}
