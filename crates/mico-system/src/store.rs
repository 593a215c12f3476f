use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mico::config::{ConfigState, ConfigurationRecord, RuntimeStatus, SystemConfig};

use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::flash::{Flash, Partition};

struct StoreState {
    initialized: bool,
    record: ConfigurationRecord,
    status: RuntimeStatus,
}

/// The configuration record shared by every component.
///
/// A single exclusive mutex serializes reads, updates and commits, so a
/// committed image never mixes fields of two different updates.
pub struct ConfigStore {
    flash: Arc<dyn Flash>,
    default_name: &'static str,
    seed: u32,
    state: Mutex<StoreState>,
}

impl ConfigStore {
    /// Creates an uninitialized [`ConfigStore`] over the configuration
    /// partition of `flash`.
    ///
    /// `default_name` and `seed` describe the factory record.
    pub fn new(flash: Arc<dyn Flash>, default_name: &'static str, seed: u32) -> Self {
        Self {
            flash,
            default_name,
            seed,
            state: Mutex::new(StoreState {
                initialized: false,
                record: ConfigurationRecord::factory(default_name, seed, 0),
                status: RuntimeStatus::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads the record from flash.
    ///
    /// An erased, corrupted or foreign image is replaced by the factory
    /// record, which stays in RAM until the next commit. Calling `init`
    /// again discards the current record and loads it again.
    ///
    /// # Errors
    ///
    /// Fails when the configuration partition cannot be read.
    pub fn init(&self, app_data_size: usize) -> Result<()> {
        let info = self.flash.partition(Partition::Config).ok_or_else(|| {
            Error::new(ErrorKind::Flash, "The device has no configuration partition")
        })?;

        let mut image = vec![0; info.size];
        self.flash.read(Partition::Config, 0, &mut image)?;

        let record = match ConfigurationRecord::from_image(&image) {
            Ok(record) if record.system.seed == self.seed => {
                debug!("Configuration loaded, state `{:?}`", record.system.configured);
                Some(record)
            }
            Ok(record) => {
                warn!(
                    "Configuration seed {} differs from {}, restoring defaults",
                    record.system.seed, self.seed
                );
                None
            }
            Err(e) => {
                warn!("No valid configuration in flash ({e}), using defaults");
                None
            }
        };

        let mut record = record.unwrap_or_else(|| {
            ConfigurationRecord::factory(self.default_name, self.seed, app_data_size)
        });
        record.app_config.resize(app_data_size, 0);

        let mut state = self.state();
        state.record = record;
        state.status = RuntimeStatus::default();
        state.initialized = true;

        Ok(())
    }

    /// Takes the store lock.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotInitialized`] before [`ConfigStore::init`].
    pub fn lock(&self) -> Result<StoreGuard<'_>> {
        let state = self.state();
        if !state.initialized {
            return Err(Error::new(
                ErrorKind::NotInitialized,
                "The configuration store is not initialized",
            ));
        }

        Ok(StoreGuard {
            flash: self.flash.as_ref(),
            state,
        })
    }

    /// Returns a copy of the record.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotInitialized`] before [`ConfigStore::init`].
    pub fn read(&self) -> Result<ConfigurationRecord> {
        self.lock().map(|guard| guard.record().clone())
    }

    /// Returns a copy of the runtime status.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotInitialized`] before [`ConfigStore::init`].
    pub fn status(&self) -> Result<RuntimeStatus> {
        self.lock().map(|guard| guard.status().clone())
    }

    /// Writes the record to flash.
    ///
    /// # Errors
    ///
    /// Fails when the store is not initialized or the flash write fails.
    pub fn commit(&self) -> Result<()> {
        self.lock()?.commit()
    }
}

/// Exclusive access to the record, released on drop.
pub struct StoreGuard<'a> {
    flash: &'a dyn Flash,
    state: MutexGuard<'a, StoreState>,
}

impl StoreGuard<'_> {
    /// Returns the record.
    #[must_use]
    pub fn record(&self) -> &ConfigurationRecord {
        &self.state.record
    }

    /// Returns the record for modification.
    pub fn record_mut(&mut self) -> &mut ConfigurationRecord {
        &mut self.state.record
    }

    /// Returns the system configuration.
    #[must_use]
    pub fn system(&self) -> &SystemConfig {
        &self.state.record.system
    }

    /// Returns the system configuration for modification.
    pub fn system_mut(&mut self) -> &mut SystemConfig {
        &mut self.state.record.system
    }

    /// Returns the runtime status.
    #[must_use]
    pub fn status(&self) -> &RuntimeStatus {
        &self.state.status
    }

    /// Returns the runtime status for modification.
    pub fn status_mut(&mut self) -> &mut RuntimeStatus {
        &mut self.state.status
    }

    /// Resets the system configuration and the application data to their
    /// factory state.
    ///
    /// The boot table is kept. Nothing is written until
    /// [`StoreGuard::commit`].
    pub fn restore_defaults(&mut self) {
        self.state.record.restore_defaults();
        info!("Configuration restored to defaults");
    }

    /// Writes the whole record to flash in one pass.
    ///
    /// On failure the record in RAM stays authoritative and nothing is
    /// retried.
    ///
    /// # Errors
    ///
    /// Fails when the record cannot be encoded, does not fit the
    /// partition, or the flash rejects the erase or the write.
    pub fn commit(&self) -> Result<()> {
        let image = self.state.record.to_image()?;

        let size = self
            .flash
            .partition(Partition::Config)
            .map_or(0, |info| info.size);
        if image.len() > size {
            return Err(Error::new(
                ErrorKind::Flash,
                format!(
                    "Configuration image of {} bytes exceeds the partition of {size} bytes",
                    image.len()
                ),
            ));
        }

        self.flash
            .erase(Partition::Config)
            .and_then(|()| self.flash.write(Partition::Config, 0, &image))
            .inspect_err(|e| error!("Configuration commit failed: {e}"))?;

        debug!(
            "Configuration committed, state `{:?}`",
            self.state.record.system.configured
        );

        Ok(())
    }

    /// Whether the device has to go through provisioning.
    #[must_use]
    pub fn needs_provisioning(&self) -> bool {
        self.system().configured.needs_provisioning()
    }

    /// Whether the device completed provisioning at least once.
    #[must_use]
    pub fn was_configured(&self) -> bool {
        self.system().configured != ConfigState::Unconfigured
    }
}
