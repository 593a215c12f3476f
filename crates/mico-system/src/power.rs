use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use mico::config::EasyLinkBypass;
use mico::events::Notification;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::POWER_OFF_DELAY;
use crate::error::Result;
use crate::notification::NotificationCenter;
use crate::platform::{SystemControl, WifiDriver};
use crate::store::ConfigStore;

/// Power state requested to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Nothing to do.
    #[default]
    Normal,
    /// Reset the device.
    SoftwareReset,
    /// Power the radio off.
    WlanPowerdown,
    /// Power the radio off and enter deep sleep.
    Standby,
}

/// Serializes power transitions.
///
/// Any component requests a transition; a single task applies it, after
/// committing pending configuration changes and warning the subscribers
/// of [`Notification::SystemWillPowerOff`].
#[derive(Default)]
pub struct PowerDaemon {
    requested: Mutex<PowerState>,
    needs_update: AtomicBool,
    notify: Notify,
}

impl PowerDaemon {
    /// Creates a [`PowerDaemon`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a power transition.
    ///
    /// A request replaces a previous one not yet applied.
    pub fn request_transition(&self, state: PowerState) {
        *self.requested.lock().unwrap_or_else(PoisonError::into_inner) = state;
        debug!("Power transition `{state:?}` requested");
        self.notify.notify_one();
    }

    /// Marks the configuration as changed, so it is committed before the
    /// next transition.
    pub fn mark_dirty(&self) {
        self.needs_update.store(true, Ordering::SeqCst);
    }

    /// Whether a commit is pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.needs_update.load(Ordering::SeqCst)
    }

    /// Handles a click of the `EasyLink` button: the device provisions the
    /// network again after a reset.
    ///
    /// # Errors
    ///
    /// [`crate::error::ErrorKind::NotInitialized`] when the store is not
    /// initialized.
    pub fn easylink_button_clicked(&self, store: &ConfigStore) -> Result<()> {
        info!("EasyLink button clicked");
        {
            let mut guard = store.lock()?;
            let system = guard.system_mut();
            system.easylink_bypass = EasyLinkBypass::No;
            system.request_reconfiguration();
        }
        self.mark_dirty();
        self.request_transition(PowerState::SoftwareReset);
        Ok(())
    }

    /// Handles a long press of the `EasyLink` button: the configuration is
    /// restored to defaults and the device resets.
    ///
    /// # Errors
    ///
    /// Fails when the store is not initialized or the commit fails.
    pub fn easylink_button_long_pressed(&self, store: &ConfigStore) -> Result<()> {
        warn!("EasyLink button long pressed, restoring defaults");
        {
            let mut guard = store.lock()?;
            guard.restore_defaults();
            guard.commit()?;
        }
        self.request_transition(PowerState::SoftwareReset);
        Ok(())
    }

    /// Handles a click of the standby button.
    pub fn standby_button_clicked(&self) {
        info!("Standby button clicked");
        self.request_transition(PowerState::Standby);
    }

    fn take_request(&self) -> PowerState {
        std::mem::take(&mut *self.requested.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Applies requested transitions until `token` is cancelled.
    pub async fn run(
        &self,
        store: &ConfigStore,
        notifications: &NotificationCenter,
        wifi: &dyn WifiDriver,
        control: &dyn SystemControl,
        token: CancellationToken,
    ) {
        debug!("Power daemon started");

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = self.notify.notified() => {}
            }

            let state = self.take_request();

            if self.needs_update.swap(false, Ordering::SeqCst) {
                if let Err(e) = store.commit() {
                    error!("Pending configuration not committed: {e}");
                }
            }

            if state == PowerState::Normal {
                continue;
            }

            info!("Power transition `{state:?}`");
            notifications.dispatch(&Notification::SystemWillPowerOff);
            tokio::time::sleep(POWER_OFF_DELAY).await;

            match state {
                PowerState::Normal => {}
                PowerState::SoftwareReset => control.reboot(),
                PowerState::WlanPowerdown => {
                    if let Err(e) = wifi.power_off() {
                        error!("Impossible to power the radio off: {e}");
                    }
                }
                PowerState::Standby => {
                    if let Err(e) = wifi.power_off() {
                        error!("Impossible to power the radio off: {e}");
                    }
                    control.standby();
                }
            }
        }

        debug!("Power daemon stopped");
    }
}
