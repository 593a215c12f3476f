use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use crate::config::{MAX_SYSTEM_MONITORS, SYSTEM_CHECKPOINT_TIMEOUT};
use crate::error::{Error, ErrorKind, Result};
use crate::platform::Watchdog;

// Margin added to the monitor period when arming the watchdog.
const WATCHDOG_MARGIN: Duration = Duration::from_secs(1);

struct Entry {
    name: &'static str,
    last_update: Instant,
    max_delay: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_update) > self.max_delay
    }
}

/// A registered liveness checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorHandle(usize);

/// Reloads the hardware watchdog while every checkpoint is alive.
///
/// Once a checkpoint misses its deadline the watchdog is no longer
/// reloaded, and the device resets.
pub struct SystemMonitor {
    entries: Mutex<Vec<Entry>>,
    period: Duration,
}

impl SystemMonitor {
    /// Creates a [`SystemMonitor`] checking its entries every `period`.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(MAX_SYSTEM_MONITORS)),
            period,
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a checkpoint which must be updated at least every
    /// `max_delay`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ResourceExhausted`] when every slot is taken.
    pub fn register(&self, name: &'static str, max_delay: Duration) -> Result<MonitorHandle> {
        let mut entries = self.entries();
        if entries.len() >= MAX_SYSTEM_MONITORS {
            return Err(Error::new(
                ErrorKind::ResourceExhausted,
                format!("No monitor slot left for `{name}`"),
            ));
        }

        entries.push(Entry {
            name,
            last_update: Instant::now(),
            max_delay,
        });
        debug!("Monitor `{name}` registered, maximum delay {max_delay:?}");

        Ok(MonitorHandle(entries.len() - 1))
    }

    /// Refreshes a checkpoint and sets its next permitted delay.
    ///
    /// An expired checkpoint cannot be refreshed and `false` is returned.
    pub fn update(&self, handle: MonitorHandle, max_delay: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(handle.0) else {
            return false;
        };

        if entry.is_expired(now) {
            return false;
        }

        entry.last_update = now;
        entry.max_delay = max_delay;
        true
    }

    fn expired(&self) -> Option<&'static str> {
        let now = Instant::now();
        self.entries()
            .iter()
            .find(|entry| entry.is_expired(now))
            .map(|entry| entry.name)
    }

    /// Checks the checkpoints every period, reloading the watchdog while
    /// they are all alive.
    ///
    /// # Errors
    ///
    /// Fails when the watchdog cannot be armed, or with
    /// [`ErrorKind::Fatal`] once a checkpoint expires.
    pub async fn run(&self, watchdog: &dyn Watchdog, token: CancellationToken) -> Result<()> {
        watchdog.initialize(self.period + WATCHDOG_MARGIN)?;

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            if let Some(name) = self.expired() {
                error!("Monitor `{name}` expired, the watchdog is no longer reloaded");
                return Err(Error::new(
                    ErrorKind::Fatal,
                    format!("Monitor `{name}` expired"),
                ));
            }

            watchdog.reload();
        }
    }

    /// Keeps the checkpoint of the system itself alive until `token` is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ResourceExhausted`] when the checkpoint cannot be
    /// registered.
    pub async fn system_checkpoint(&self, token: CancellationToken) -> Result<()> {
        let handle = self.register("System", SYSTEM_CHECKPOINT_TIMEOUT)?;

        loop {
            tokio::select! {
                () = token.cancelled() => return Ok(()),
                () = tokio::time::sleep(SYSTEM_CHECKPOINT_TIMEOUT / 2) => {}
            }
            let _ = self.update(handle, SYSTEM_CHECKPOINT_TIMEOUT);
        }
    }
}
