use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;

use mico::events::{Notification, NotificationKind};

use tracing::{debug, error};

use crate::config::MAX_SUBSCRIBERS_PER_KIND;
use crate::error::{Error, ErrorKind, Result};

type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Identifies a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Delivers notifications to the callbacks registered for their kind.
///
/// Dispatch is synchronous: every callback runs on the dispatching thread,
/// in registration order, before [`NotificationCenter::dispatch`] returns.
/// Callbacks may register or remove subscriptions while running.
pub struct NotificationCenter {
    subscribers: Mutex<HashMap<NotificationKind, Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationCenter {
    /// Creates a [`NotificationCenter`] accepting
    /// [`MAX_SUBSCRIBERS_PER_KIND`] callbacks per kind.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(MAX_SUBSCRIBERS_PER_KIND)
    }

    /// Creates a [`NotificationCenter`] accepting `capacity` callbacks per
    /// kind.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<NotificationKind, Vec<(SubscriptionId, Callback)>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a callback for a notification kind.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ResourceExhausted`] when the kind already has the
    /// maximum number of callbacks.
    pub fn register<F>(&self, kind: NotificationKind, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers();
        let list = subscribers.entry(kind).or_default();

        if list.len() >= self.capacity {
            error!("No room left for a `{kind:?}` subscriber");
            return Err(Error::new(
                ErrorKind::ResourceExhausted,
                format!("`{kind:?}` already has {} subscribers", self.capacity),
            ));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        list.push((id, Arc::new(callback)));
        debug!("Registered `{kind:?}` subscriber {}", id.0);

        Ok(id)
    }

    /// Removes a callback.
    ///
    /// Removing an unknown subscription does nothing.
    pub fn remove(&self, kind: NotificationKind, id: SubscriptionId) {
        if let Some(list) = self.subscribers().get_mut(&kind) {
            list.retain(|(subscription, _)| *subscription != id);
        }
    }

    /// Removes every callback registered for a kind.
    pub fn remove_all(&self, kind: NotificationKind) {
        let _ = self.subscribers().remove(&kind);
    }

    /// Returns the number of callbacks registered for a kind.
    #[must_use]
    pub fn subscriber_count(&self, kind: NotificationKind) -> usize {
        self.subscribers().get(&kind).map_or(0, Vec::len)
    }

    /// Delivers a notification to every callback registered for its kind.
    pub fn dispatch(&self, notification: &Notification) {
        let callbacks: Vec<Callback> = self
            .subscribers()
            .get(&notification.kind())
            .map(|list| list.iter().map(|(_, callback)| Arc::clone(callback)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(notification);
        }
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mico::events::{Notification, NotificationKind, WifiEvent};

    use crate::error::ErrorKind;

    use super::NotificationCenter;

    const STATION_UP: Notification = Notification::WifiStatusChanged(WifiEvent::StationUp);

    #[test]
    fn dispatch_order() {
        let center = NotificationCenter::new();
        let trace = Arc::new(Mutex::new(Vec::new()));

        for name in ["A", "B", "C"] {
            let trace = Arc::clone(&trace);
            center
                .register(NotificationKind::WifiStatusChanged, move |_| {
                    trace.lock().unwrap().push(format!("{name} begin"));
                    trace.lock().unwrap().push(format!("{name} end"));
                })
                .unwrap();
        }

        for _ in 0..10 {
            trace.lock().unwrap().clear();
            center.dispatch(&STATION_UP);
            assert_eq!(
                *trace.lock().unwrap(),
                ["A begin", "A end", "B begin", "B end", "C begin", "C end"]
            );
        }

        // Other kinds are not delivered.
        trace.lock().unwrap().clear();
        center.dispatch(&Notification::WifiFatalError);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[test]
    fn capacity() {
        let center = NotificationCenter::with_capacity(2);
        center.register(NotificationKind::DhcpCompleted, |_| {}).unwrap();
        center.register(NotificationKind::DhcpCompleted, |_| {}).unwrap();

        let error = center
            .register(NotificationKind::DhcpCompleted, |_| {})
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ResourceExhausted);

        // Capacity is per kind.
        center.register(NotificationKind::ScanCompleted, |_| {}).unwrap();
    }

    #[test]
    fn remove_is_idempotent() {
        let center = NotificationCenter::new();
        let calls = Arc::new(Mutex::new(0));

        let counter = Arc::clone(&calls);
        let id = center
            .register(NotificationKind::WifiStatusChanged, move |_| {
                *counter.lock().unwrap() += 1;
            })
            .unwrap();

        center.remove(NotificationKind::WifiStatusChanged, id);
        center.remove(NotificationKind::WifiStatusChanged, id);
        center.remove(NotificationKind::StackOverflow, id);
        center.remove_all(NotificationKind::ScanCompleted);

        center.dispatch(&STATION_UP);
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(center.subscriber_count(NotificationKind::WifiStatusChanged), 0);
    }

    #[test]
    fn remove_all() {
        let center = NotificationCenter::new();
        for _ in 0..3 {
            center.register(NotificationKind::WifiStatusChanged, |_| {}).unwrap();
        }
        center.remove_all(NotificationKind::WifiStatusChanged);
        assert_eq!(center.subscriber_count(NotificationKind::WifiStatusChanged), 0);
    }

    #[test]
    fn callback_can_unsubscribe() {
        let center = Arc::new(NotificationCenter::new());
        let calls = Arc::new(Mutex::new(0));
        let id = Arc::new(Mutex::new(None));

        let inner_center = Arc::clone(&center);
        let inner_calls = Arc::clone(&calls);
        let inner_id = Arc::clone(&id);
        let registered = center
            .register(NotificationKind::WifiStatusChanged, move |_| {
                *inner_calls.lock().unwrap() += 1;
                if let Some(id) = *inner_id.lock().unwrap() {
                    inner_center.remove(NotificationKind::WifiStatusChanged, id);
                }
            })
            .unwrap();
        *id.lock().unwrap() = Some(registered);

        center.dispatch(&STATION_UP);
        center.dispatch(&STATION_UP);
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
