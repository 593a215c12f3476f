use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use mico::config::{ConfigState, ConfigurationRecord, RuntimeStatus};
use mico::device::DeviceInfo;
use mico::events::{ApInfo, Notification, NotificationKind, WifiEvent};
use mico::wlan::{Interface, JoinParams, format_mac};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tracing::{debug, error, info, warn};

use crate::bonjour::{Advertisement, Advertiser};
use crate::config::{CONFIG_SEED, DEFAULT_NAME, SystemOptions};
use crate::easylink::{self, ConfigDelegate, ProvisioningHandle};
use crate::error::{Error, ErrorKind, Result};
use crate::flash::Flash;
use crate::monitor::SystemMonitor;
use crate::notification::{NotificationCenter, SubscriptionId};
use crate::platform::{SystemControl, Watchdog, WifiDriver};
use crate::power::PowerDaemon;
use crate::server::{self, ServerHandle};
use crate::store::ConfigStore;

/// The collaborators a [`System`] drives.
#[derive(Clone)]
pub struct Platform {
    /// Flash holding the configuration and the firmware images.
    pub flash: Arc<dyn Flash>,
    /// Wi-Fi driver.
    pub wifi: Arc<dyn WifiDriver>,
    /// Device power control.
    pub control: Arc<dyn SystemControl>,
    /// Hardware watchdog.
    pub watchdog: Arc<dyn Watchdog>,
    /// Service advertisement.
    pub advertiser: Arc<dyn Advertiser>,
    /// Notification center the driver dispatches on.
    pub notifications: Arc<NotificationCenter>,
}

// Shared by every task of the system.
pub(crate) struct Context {
    pub(crate) options: SystemOptions,
    pub(crate) device: DeviceInfo,
    pub(crate) store: ConfigStore,
    pub(crate) notifications: Arc<NotificationCenter>,
    pub(crate) power: PowerDaemon,
    pub(crate) monitor: SystemMonitor,
    pub(crate) flash: Arc<dyn Flash>,
    pub(crate) wifi: Arc<dyn WifiDriver>,
    pub(crate) control: Arc<dyn SystemControl>,
    pub(crate) watchdog: Arc<dyn Watchdog>,
    pub(crate) advertiser: Arc<dyn Advertiser>,
    pub(crate) delegate: Arc<dyn ConfigDelegate>,
    // Station MAC address, known once the network started.
    mac: OnceLock<[u8; 6]>,
    // Radio firmware version.
    rf_version: OnceLock<String>,
    // Port the configuration server is bound to.
    port: AtomicU16,
    // Session identifier received from the provisioning peer.
    identifier: AtomicU32,
    // Set while a provisioning task runs.
    pub(crate) provisioning: AtomicBool,
    pub(crate) shutdown: CancellationToken,
}

impl Context {
    pub(crate) fn new(
        options: SystemOptions,
        device: DeviceInfo,
        platform: Platform,
        delegate: Arc<dyn ConfigDelegate>,
    ) -> Self {
        Self {
            options,
            device,
            store: ConfigStore::new(Arc::clone(&platform.flash), DEFAULT_NAME, CONFIG_SEED),
            notifications: platform.notifications,
            power: PowerDaemon::new(),
            monitor: SystemMonitor::new(options.monitor_period),
            flash: platform.flash,
            wifi: platform.wifi,
            control: platform.control,
            watchdog: platform.watchdog,
            advertiser: platform.advertiser,
            delegate,
            mac: OnceLock::new(),
            rf_version: OnceLock::new(),
            port: AtomicU16::new(options.port),
            identifier: AtomicU32::new(0),
            provisioning: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn mac(&self) -> [u8; 6] {
        self.mac.get().copied().unwrap_or_default()
    }

    pub(crate) fn identifier(&self) -> u32 {
        self.identifier.load(Ordering::SeqCst)
    }

    pub(crate) fn set_identifier(&self, identifier: u32) {
        self.identifier.store(identifier, Ordering::SeqCst);
    }

    pub(crate) fn advertisement(&self, interface: Interface) -> Advertisement {
        Advertisement::new(
            self.device,
            &self.mac(),
            self.rf_version.get().map_or("", String::as_str),
            self.port.load(Ordering::SeqCst),
            self.options.config_server,
            interface,
        )
        .identifier(self.identifier())
    }

    pub(crate) fn advertise(&self, interface: Interface) {
        if let Err(e) = self
            .advertiser
            .start(interface, &self.advertisement(interface))
        {
            error!("Impossible to announce the {interface:?} interface: {e}");
        }
    }

    pub(crate) fn update_advertisement(&self, interface: Interface) {
        if let Err(e) = self
            .advertiser
            .update(interface, &self.advertisement(interface))
        {
            error!("Impossible to update the {interface:?} announcement: {e}");
        }
    }

    pub(crate) fn suspend_advertisement(&self, interface: Interface) {
        if let Err(e) = self.advertiser.suspend(interface) {
            error!("Impossible to suspend the {interface:?} announcement: {e}");
        }
    }

    pub(crate) fn connect(&self, params: &JoinParams) {
        info!(
            "Joining `{}`{}",
            params.ssid,
            if params.is_fast() { " (fast)" } else { "" }
        );
        if let Err(e) = self.wifi.connect(params) {
            error!("Join of `{}` rejected: {e}", params.ssid);
        }
    }

    // Registers the handlers the system keeps for its whole life. Nothing
    // stays registered when one of them is refused.
    pub(crate) fn register_handlers(self: &Arc<Self>) -> Result<Vec<(NotificationKind, SubscriptionId)>> {
        let mut subscriptions = Vec::new();
        if let Err(e) = self.subscribe_handlers(&mut subscriptions) {
            for (kind, id) in subscriptions {
                self.notifications.remove(kind, id);
            }
            return Err(e);
        }
        Ok(subscriptions)
    }

    fn subscribe_handlers(
        self: &Arc<Self>,
        subscriptions: &mut Vec<(NotificationKind, SubscriptionId)>,
    ) -> Result<()> {
        let context = Arc::downgrade(self);
        subscriptions.push((
            NotificationKind::DhcpCompleted,
            self.notifications
                .register(NotificationKind::DhcpCompleted, move |notification| {
                    if let (Some(context), Notification::DhcpCompleted(ip)) =
                        (context.upgrade(), notification)
                    {
                        info!("IP address {} assigned", ip.local_ip);
                        match context.store.lock() {
                            Ok(mut guard) => {
                                let status = guard.status_mut();
                                status.local_ip.clone_from(&ip.local_ip);
                                status.netmask.clone_from(&ip.netmask);
                                status.gateway.clone_from(&ip.gateway);
                                status.dns_server.clone_from(&ip.dns_server);
                            }
                            Err(e) => error!("IP status not stored: {e}"),
                        }
                    }
                })?,
        ));

        subscriptions.push((
            NotificationKind::WifiConnectFailed,
            self.notifications
                .register(NotificationKind::WifiConnectFailed, |notification| {
                    if let Notification::WifiConnectFailed(code) = notification {
                        warn!("Wi-Fi join failed with code {code}");
                    }
                })?,
        ));

        subscriptions.push((
            NotificationKind::WifiStatusChanged,
            self.notifications
                .register(NotificationKind::WifiStatusChanged, |notification| {
                    if let Notification::WifiStatusChanged(event) = notification {
                        match event {
                            WifiEvent::StationUp => info!("Station up"),
                            WifiEvent::StationDown => warn!("Station down"),
                            WifiEvent::ApUp => info!("Soft access point up"),
                            WifiEvent::ApDown => info!("Soft access point down"),
                        }
                    }
                })?,
        ));

        for kind in [NotificationKind::WifiFatalError, NotificationKind::StackOverflow] {
            let context: Weak<Self> = Arc::downgrade(self);
            subscriptions.push((
                kind,
                self.notifications.register(kind, move |notification| {
                    match notification {
                        Notification::StackOverflow(task) => {
                            error!("Stack overflow in `{task}`, resetting");
                        }
                        _ => error!("Wi-Fi driver fatal error, resetting"),
                    }
                    if let Some(context) = context.upgrade() {
                        context.control.reboot();
                    }
                })?,
            ));
        }

        let context = Arc::downgrade(self);
        subscriptions.push((
            NotificationKind::WifiParametersChanged,
            self.notifications.register(
                NotificationKind::WifiParametersChanged,
                move |notification| {
                    if let (Some(context), Notification::WifiParametersChanged(ap)) =
                        (context.upgrade(), notification)
                    {
                        context.store_parameters(ap);
                    }
                },
            )?,
        ));

        Ok(())
    }

    fn store_parameters(&self, ap: &ApInfo) {
        let mut guard = match self.store.lock() {
            Ok(guard) => guard,
            Err(e) => {
                error!("Wi-Fi parameters not stored: {e}");
                return;
            }
        };

        let system = guard.system();
        if system.ssid == ap.ssid
            && system.bssid == ap.bssid
            && system.channel == ap.channel
            && system.security == ap.security
            && system.key == ap.key
        {
            return;
        }

        let system = guard.system_mut();
        system.ssid.clone_from(&ap.ssid);
        system.bssid = ap.bssid;
        system.channel = ap.channel;
        system.security = ap.security;
        system.key.clone_from(&ap.key);

        match guard.commit() {
            Ok(()) => debug!(
                "Parameters of `{}` stored, channel {}, BSSID {}",
                ap.ssid,
                ap.channel,
                format_mac(&ap.bssid)
            ),
            Err(e) => error!("Wi-Fi parameters not committed: {e}"),
        }
    }

    pub(crate) fn start_network(&self) -> Result<()> {
        let mac = self.wifi.mac_address()?;
        let rf_version = self.wifi.rf_version()?;
        let _ = self.mac.set(mac);
        let _ = self.rf_version.set(rf_version.clone());

        let rf_power_save = {
            let mut guard = self.store.lock()?;
            let status = guard.status_mut();
            status.mac = format_mac(&mac);
            status.rf_version = rf_version;
            guard.system().rf_power_save
        };

        self.wifi.set_power_save(rf_power_save)?;
        info!("Network started, MAC {}", format_mac(&mac));

        Ok(())
    }
}

/// A running system.
pub struct System {
    context: Arc<Context>,
    subscriptions: Vec<(NotificationKind, SubscriptionId)>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    server: Mutex<Option<ServerHandle>>,
    provisioning: Mutex<Option<ProvisioningHandle>>,
}

impl System {
    /// Boots the system.
    ///
    /// The configuration is loaded, the power daemon, the system
    /// notification handlers, the monitor and the network are started,
    /// then the configuration server. A device which is not configured
    /// starts provisioning, a configured one joins its network.
    ///
    /// # Errors
    ///
    /// Fails when a step of the boot fails. Tasks started by the previous
    /// steps are stopped.
    pub async fn start(
        options: SystemOptions,
        device: DeviceInfo,
        platform: Platform,
        delegate: Arc<dyn ConfigDelegate>,
    ) -> Result<Self> {
        let context = Arc::new(Context::new(options, device, platform, delegate));

        let mut system = Self {
            context: Arc::clone(&context),
            subscriptions: Vec::new(),
            tasks: Mutex::new(Vec::new()),
            server: Mutex::new(None),
            provisioning: Mutex::new(None),
        };

        if let Err(e) = system.boot().await {
            error!("Boot failed: {e}");
            system.shutdown().await;
            return Err(e);
        }

        Ok(system)
    }

    async fn boot(&mut self) -> Result<()> {
        let context = Arc::clone(&self.context);

        context.store.init(context.options.app_data_size)?;
        let configured = context.store.lock()?.system().configured;
        info!("Configuration loaded, state `{configured:?}`");

        self.spawn({
            let context = Arc::clone(&context);
            async move {
                context
                    .power
                    .run(
                        &context.store,
                        &context.notifications,
                        context.wifi.as_ref(),
                        context.control.as_ref(),
                        context.shutdown.child_token(),
                    )
                    .await;
            }
        });

        self.subscriptions = context.register_handlers()?;

        if context.options.monitor {
            self.spawn({
                let context = Arc::clone(&context);
                async move {
                    if let Err(e) = context
                        .monitor
                        .run(context.watchdog.as_ref(), context.shutdown.child_token())
                        .await
                    {
                        error!("System monitor stopped: {e}");
                    }
                }
            });
            self.spawn({
                let context = Arc::clone(&context);
                async move {
                    if let Err(e) = context
                        .monitor
                        .system_checkpoint(context.shutdown.child_token())
                        .await
                    {
                        error!("System checkpoint not registered: {e}");
                    }
                }
            });
        }

        context.start_network()?;

        if context.options.config_server {
            let server = server::start(&context).await?;
            context.port.store(server.local_addr().port(), Ordering::SeqCst);
            *self.server.lock().unwrap_or_else(PoisonError::into_inner) = Some(server);
        }

        if configured.needs_provisioning() {
            let handle = easylink::start(&context)?;
            *self
                .provisioning
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        } else {
            let params = JoinParams::fast(context.store.lock()?.system());
            context.connect(&params);
            if context.options.config_server {
                context.advertise(Interface::Station);
            }
        }

        Ok(())
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tokio::spawn(future));
    }

    /// Returns the configuration store.
    #[must_use]
    pub fn store(&self) -> &ConfigStore {
        &self.context.store
    }

    /// Returns a copy of the configuration record.
    ///
    /// # Errors
    ///
    /// Fails when the store is not initialized.
    pub fn record(&self) -> Result<ConfigurationRecord> {
        self.context.store.read()
    }

    /// Returns a copy of the runtime status.
    ///
    /// # Errors
    ///
    /// Fails when the store is not initialized.
    pub fn status(&self) -> Result<RuntimeStatus> {
        self.context.store.status()
    }

    /// Returns the notification center.
    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.context.notifications
    }

    /// Returns the power daemon.
    #[must_use]
    pub fn power(&self) -> &PowerDaemon {
        &self.context.power
    }

    /// Returns the system monitor, where application tasks register their
    /// checkpoints.
    #[must_use]
    pub fn monitor(&self) -> &SystemMonitor {
        &self.context.monitor
    }

    /// Returns the address of the configuration server, `None` when it
    /// does not run.
    #[must_use]
    pub fn server_address(&self) -> Option<std::net::SocketAddr> {
        self.server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(ServerHandle::local_addr)
    }

    /// Returns the current session identifier.
    #[must_use]
    pub fn session_identifier(&self) -> u32 {
        self.context.identifier()
    }

    /// Takes the handle of the provisioning started at boot.
    pub fn take_provisioning(&self) -> Option<ProvisioningHandle> {
        self.provisioning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Starts provisioning on demand.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ResourceExhausted`] while a provisioning runs.
    pub fn start_provisioning(&self) -> Result<ProvisioningHandle> {
        if self.context.shutdown.is_cancelled() {
            return Err(Error::new(ErrorKind::NotInitialized, "The system is stopped"));
        }
        easylink::start(&self.context)
    }

    /// Whether the device completed provisioning.
    ///
    /// # Errors
    ///
    /// Fails when the store is not initialized.
    pub fn is_configured(&self) -> Result<bool> {
        Ok(self.context.store.lock()?.system().configured == ConfigState::AllConfigured)
    }

    /// Stops every task and waits for them.
    pub async fn shutdown(&self) {
        info!("System shutting down");
        self.context.shutdown.cancel();

        for (kind, id) in &self.subscriptions {
            self.context.notifications.remove(*kind, *id);
        }

        let server = self
            .server
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(server) = server {
            server.stop().await;
        }

        let provisioning = self.take_provisioning();
        if let Some(provisioning) = provisioning {
            if let Err(e) = provisioning.join().await {
                error!("Provisioning task failed: {e}");
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(e) = task.await {
                error!("System task failed: {e}");
            }
        }
    }
}
