use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use mico::config::{ConfigState, EasyLinkBypass, SystemConfig};
use mico::easylink::parse_extra_data;
use mico::events::{Credentials, Notification, NotificationKind, WifiEvent};
use mico::wlan::{DiscoveryMethod, Interface, JoinParams, SoftApConfig};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::config::STATION_ADVERTISEMENT_LINGER;
use crate::error::{Error, ErrorKind, Result};
use crate::notification::{NotificationCenter, SubscriptionId};
use crate::system::Context;

/// Hooks through which an application follows provisioning.
///
/// Every method does nothing by default.
pub trait ConfigDelegate: Send + Sync {
    /// Provisioning is about to start.
    fn config_will_start(&self) {}

    /// Provisioning is about to stop.
    fn config_will_stop(&self) {}

    /// Credentials were received over the air.
    fn easylink_succeeded(&self) {}

    /// The soft access point is about to start.
    fn soft_ap_will_start(&self) {}

    /// Checks the authentication data sent by the provisioning peer.
    ///
    /// # Errors
    ///
    /// An error rejects the data and fails the session.
    fn received_auth_data(&self, _auth: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// A [`ConfigDelegate`] accepting everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDelegate;

impl ConfigDelegate for DefaultDelegate {}

/// How a provisioning task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// The stored network was joined without provisioning.
    Bypassed,
    /// New credentials were received and the network joined.
    Connected,
    /// The network was configured through the soft access point.
    SoftApConnected,
    /// Provisioning failed and the previous network was joined again.
    RolledBack,
    /// Provisioning failed on a device never configured, the radio is off.
    PoweredDown,
    /// The task was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    Succeeded,
    Failed,
}

struct SessionState {
    stage: Stage,
    connected: bool,
    signals: usize,
}

// The binary semaphore of one provisioning attempt.
struct Session {
    state: Mutex<SessionState>,
    notify: Notify,
}

impl Session {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                stage: Stage::Pending,
                connected: false,
                signals: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Decides the session once, later decisions are ignored.
    fn finish(&self, success: bool) {
        let mut state = self.state();
        if state.stage != Stage::Pending {
            return;
        }
        state.stage = if success { Stage::Succeeded } else { Stage::Failed };
        state.signals += 1;
        self.notify.notify_one();
    }

    fn is_decided(&self) -> bool {
        self.state().stage != Stage::Pending
    }

    fn connected(&self) {
        self.state().connected = true;
        self.notify.notify_one();
    }

    async fn stage(&self) -> Stage {
        loop {
            let notified = self.notify.notified();
            let stage = self.state().stage;
            if stage != Stage::Pending {
                return stage;
            }
            notified.await;
        }
    }

    async fn wait_connected(&self) {
        loop {
            let notified = self.notify.notified();
            if self.state().connected {
                return;
            }
            notified.await;
        }
    }
}

// State shared between the task and its notification callbacks.
struct Shared {
    session: Mutex<Arc<Session>>,
    method: Option<DiscoveryMethod>,
}

impl Shared {
    fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // Attempts never share a session.
    fn renew(&self) -> Arc<Session> {
        let session = Arc::new(Session::new());
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&session);
        session
    }
}

// Removes the provisioning callbacks and releases the single instance slot.
struct Registration {
    context: Arc<Context>,
    subscriptions: Vec<(NotificationKind, SubscriptionId)>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        for (kind, id) in self.subscriptions.drain(..) {
            self.context.notifications.remove(kind, id);
        }
        self.context.provisioning.store(false, Ordering::SeqCst);
        debug!("Provisioning callbacks removed");
    }
}

/// A running provisioning task.
pub struct ProvisioningHandle {
    token: CancellationToken,
    task: JoinHandle<ProvisioningOutcome>,
    shared: Arc<Shared>,
}

impl ProvisioningHandle {
    /// Cancels the task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Number of times the current session was decided.
    #[must_use]
    pub fn session_signals(&self) -> usize {
        self.shared.session().state().signals
    }

    /// Waits for the task to end.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Fatal`] when the task panicked.
    pub async fn join(self) -> Result<ProvisioningOutcome> {
        self.task
            .await
            .map_err(|e| Error::new(ErrorKind::Fatal, format!("Provisioning task failed: {e}")))
    }
}

fn on_status(context: &Context, shared: &Shared, event: WifiEvent) {
    match event {
        WifiEvent::StationUp => {
            context.update_advertisement(Interface::Station);
            match context.store.lock() {
                Ok(mut guard) => {
                    let _ = guard.system_mut().advance(ConfigState::AllConfigured);
                    if let Err(e) = guard.commit() {
                        error!("Configured state not committed: {e}");
                    }
                }
                Err(e) => error!("Configured state not stored: {e}"),
            }
            shared.session().connected();
        }
        WifiEvent::ApDown => context.suspend_advertisement(Interface::SoftAp),
        WifiEvent::StationDown | WifiEvent::ApUp => {}
    }
}

fn on_credentials(context: &Context, shared: &Shared, credentials: Option<&Credentials>) {
    let session = shared.session();
    if session.is_decided() {
        debug!("Credentials ignored, the session is already decided");
        return;
    }
    let Some(credentials) = credentials else {
        warn!("No credentials received");
        session.finish(false);
        return;
    };

    info!("Credentials received for `{}`", credentials.ssid);
    match context.store.lock() {
        Ok(mut guard) => guard
            .system_mut()
            .set_credentials(&credentials.ssid, &credentials.key),
        Err(e) => {
            error!("Credentials not stored: {e}");
            session.finish(false);
            return;
        }
    }

    // Discovery methods without a second stage complete here.
    if shared.method == Some(DiscoveryMethod::AirKiss) {
        session.finish(true);
    }
}

fn on_extra_data(context: &Context, shared: &Shared, data: &[u8]) {
    let session = shared.session();
    if session.is_decided() {
        debug!("Extra data ignored, the session is already decided");
        return;
    }

    let extra = match parse_extra_data(data) {
        Ok(extra) => extra,
        Err(e) => {
            warn!("Malformed extra data: {e}");
            session.finish(false);
            return;
        }
    };

    if let Err(e) = context.delegate.received_auth_data(extra.auth) {
        warn!("Authentication data rejected: {e}");
        session.finish(false);
        return;
    }

    context.set_identifier(extra.identifier);

    match context.store.lock() {
        Ok(mut guard) => {
            let system = guard.system_mut();
            if let Some(ip) = &extra.static_ip {
                system.set_static_ip(&ip.local_ip, &ip.netmask, &ip.gateway, &ip.dns_server);
                info!("Static address {} received", ip.local_ip);
            } else {
                system.dhcp_enable = true;
            }
        }
        Err(e) => {
            error!("Extra data not stored: {e}");
            session.finish(false);
            return;
        }
    }

    debug!("Session identifier {}", extra.identifier);
    session.finish(true);
}

fn register(
    notifications: &NotificationCenter,
    context: &Weak<Context>,
    shared: &Arc<Shared>,
) -> Result<Vec<(NotificationKind, SubscriptionId)>> {
    let mut subscriptions = Vec::with_capacity(3);

    let callback_context = Weak::clone(context);
    let callback_shared = Arc::clone(shared);
    let registered = notifications.register(NotificationKind::WifiStatusChanged, move |n| {
        if let (Some(context), Notification::WifiStatusChanged(event)) =
            (callback_context.upgrade(), n)
        {
            on_status(&context, &callback_shared, *event);
        }
    });
    subscriptions.push((NotificationKind::WifiStatusChanged, registered));

    let callback_context = Weak::clone(context);
    let callback_shared = Arc::clone(shared);
    let registered = notifications.register(NotificationKind::EasyLinkCompleted, move |n| {
        if let (Some(context), Notification::EasyLinkCompleted(credentials)) =
            (callback_context.upgrade(), n)
        {
            on_credentials(&context, &callback_shared, credentials.as_ref());
        }
    });
    subscriptions.push((NotificationKind::EasyLinkCompleted, registered));

    let callback_context = Weak::clone(context);
    let callback_shared = Arc::clone(shared);
    let registered = notifications.register(NotificationKind::EasyLinkExtraData, move |n| {
        if let (Some(context), Notification::EasyLinkExtraData(data)) =
            (callback_context.upgrade(), n)
        {
            on_extra_data(&context, &callback_shared, data);
        }
    });
    subscriptions.push((NotificationKind::EasyLinkExtraData, registered));

    // Keep what was registered so the caller can remove it on failure.
    let mut registered = Vec::with_capacity(3);
    let mut failure = None;
    for (kind, result) in subscriptions {
        match result {
            Ok(id) => registered.push((kind, id)),
            Err(e) => failure = Some(e),
        }
    }

    match failure {
        None => Ok(registered),
        Some(e) => {
            for (kind, id) in registered {
                notifications.remove(kind, id);
            }
            Err(e)
        }
    }
}

/// Starts the provisioning task.
///
/// # Errors
///
/// [`ErrorKind::ResourceExhausted`] while another provisioning task runs or
/// when the notification callbacks cannot be registered.
pub(crate) fn start(context: &Arc<Context>) -> Result<ProvisioningHandle> {
    if context
        .provisioning
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(Error::new(
            ErrorKind::ResourceExhausted,
            "A provisioning task is already running",
        ));
    }

    let shared = Arc::new(Shared {
        session: Mutex::new(Arc::new(Session::new())),
        method: context.options.mode.discovery_method(),
    });

    let subscriptions = match register(&context.notifications, &Arc::downgrade(context), &shared)
    {
        Ok(subscriptions) => subscriptions,
        Err(e) => {
            context.provisioning.store(false, Ordering::SeqCst);
            return Err(e);
        }
    };

    let registration = Registration {
        context: Arc::clone(context),
        subscriptions,
    };

    let token = context.shutdown.child_token();
    let task = tokio::spawn(run(
        Arc::clone(context),
        Arc::clone(&shared),
        token.clone(),
        registration,
    ));

    Ok(ProvisioningHandle {
        token,
        task,
        shared,
    })
}

async fn run(
    context: Arc<Context>,
    shared: Arc<Shared>,
    token: CancellationToken,
    registration: Registration,
) -> ProvisioningOutcome {
    info!("Provisioning started");

    if context.options.config_server {
        context.advertise(Interface::Station);
    }

    let outcome = provision(&context, &shared, &token).await;

    match outcome {
        ProvisioningOutcome::Cancelled => warn!("Provisioning cancelled"),
        outcome => info!("Provisioning ended: {outcome:?}"),
    }

    context.delegate.config_will_stop();

    let linger = Arc::clone(&context);
    let _ = tokio::spawn(async move {
        tokio::select! {
            () = linger.shutdown.cancelled() => {}
            () = tokio::time::sleep(STATION_ADVERTISEMENT_LINGER) => {
                linger.suspend_advertisement(Interface::Station);
            }
        }
    });

    drop(registration);
    outcome
}

// Runs `future` unless the task is cancelled first.
async fn or_cancelled<T>(
    token: &CancellationToken,
    future: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        () = token.cancelled() => None,
        value = future => Some(value),
    }
}

async fn provision(
    context: &Context,
    shared: &Shared,
    token: &CancellationToken,
) -> ProvisioningOutcome {
    let (bypass, snapshot) = match context.store.lock() {
        Ok(mut guard) => {
            let bypass = guard.system().easylink_bypass;
            if bypass != EasyLinkBypass::No {
                guard.system_mut().easylink_bypass = EasyLinkBypass::No;
                if let Err(e) = guard.commit() {
                    error!("Bypass flag not cleared: {e}");
                }
            }
            (bypass, guard.system().clone())
        }
        Err(e) => {
            error!("Provisioning without configuration: {e}");
            return ProvisioningOutcome::PoweredDown;
        }
    };

    if bypass == EasyLinkBypass::Bypass {
        info!("Provisioning bypassed, joining `{}`", snapshot.ssid);
        context.connect(&JoinParams::fast(&snapshot));
        return ProvisioningOutcome::Bypassed;
    }

    context.delegate.config_will_start();

    if bypass == EasyLinkBypass::SoftApBypass {
        info!("Provisioning through the soft access point requested");
        return soft_ap(context, shared, token, &snapshot).await;
    }

    let Some(method) = shared.method else {
        return soft_ap(context, shared, token, &snapshot).await;
    };

    let attempts = context.options.max_attempts;
    for attempt in 1..=attempts {
        let session = shared.renew();
        info!("Discovery with {method:?}, attempt {attempt} of {attempts}");

        if let Err(e) = context
            .wifi
            .start_discovery(method, context.options.easylink_timeout)
        {
            error!("Discovery not started: {e}");
            session.finish(false);
        }

        let Some(stage) = or_cancelled(token, session.stage()).await else {
            let _ = context.wifi.stop_discovery();
            return ProvisioningOutcome::Cancelled;
        };

        if stage == Stage::Failed {
            warn!("Discovery failed");
            return fail(context, shared, token, &snapshot).await;
        }

        context.delegate.easylink_succeeded();

        let params = match context.store.lock() {
            Ok(mut guard) => {
                let _ = guard.system_mut().advance(ConfigState::WlanUnconfigured);
                if let Err(e) = guard.commit() {
                    error!("Received credentials not committed: {e}");
                }
                Some(JoinParams::normal(guard.system()))
            }
            Err(e) => {
                error!("Received credentials lost: {e}");
                None
            }
        };
        let Some(params) = params else {
            return fail(context, shared, token, &snapshot).await;
        };
        context.connect(&params);

        let connect_timeout = context.options.connect_timeout;
        match or_cancelled(
            token,
            tokio::time::timeout(connect_timeout, session.wait_connected()),
        )
        .await
        {
            None => return ProvisioningOutcome::Cancelled,
            Some(Ok(())) => return ProvisioningOutcome::Connected,
            Some(Err(_)) => warn!(
                "`{}` not joined within {connect_timeout:?}, restarting discovery",
                params.ssid
            ),
        }
    }

    error!("Provisioning failed after {attempts} attempts");
    fail(context, shared, token, &snapshot).await
}

async fn fail(
    context: &Context,
    shared: &Shared,
    token: &CancellationToken,
    snapshot: &SystemConfig,
) -> ProvisioningOutcome {
    if context.options.mode.falls_back_to_soft_ap() {
        soft_ap(context, shared, token, snapshot).await
    } else {
        roll_back(context, snapshot)
    }
}

async fn soft_ap(
    context: &Context,
    shared: &Shared,
    token: &CancellationToken,
    snapshot: &SystemConfig,
) -> ProvisioningOutcome {
    context.delegate.soft_ap_will_start();

    let session = shared.renew();
    let config = SoftApConfig::easylink(&context.mac());
    info!("Starting the soft access point `{}`", config.ssid);

    if let Err(e) = context.wifi.start_soft_ap(&config) {
        error!("Soft access point not started: {e}");
        return roll_back(context, snapshot);
    }
    context.advertise(Interface::SoftAp);

    match or_cancelled(token, session.wait_connected()).await {
        Some(()) => ProvisioningOutcome::SoftApConnected,
        None => ProvisioningOutcome::Cancelled,
    }
}

fn roll_back(context: &Context, snapshot: &SystemConfig) -> ProvisioningOutcome {
    let mut guard = match context.store.lock() {
        Ok(guard) => guard,
        Err(e) => {
            error!("Roll back impossible: {e}");
            return ProvisioningOutcome::PoweredDown;
        }
    };

    *guard.system_mut() = snapshot.clone();

    if snapshot.configured == ConfigState::Unconfigured {
        // Received credentials were committed before the join was tried.
        if let Err(e) = guard.commit() {
            error!("Factory configuration not committed: {e}");
        }
        drop(guard);
        warn!("No previous network, powering the radio off");
        if let Err(e) = context.wifi.power_off() {
            error!("Radio not powered off: {e}");
        }
        return ProvisioningOutcome::PoweredDown;
    }

    guard.system_mut().configured = ConfigState::AllConfigured;
    if let Err(e) = guard.commit() {
        error!("Previous configuration not committed: {e}");
    }
    let params = JoinParams::normal(guard.system());
    drop(guard);

    info!("Rolling back to `{}`", params.ssid);
    context.connect(&params);
    ProvisioningOutcome::RolledBack
}
