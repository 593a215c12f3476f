use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mico::config::{ConfigState, ConfigurationRecord, EasyLinkBypass};
use mico::events::{Credentials, Notification, NotificationKind, WifiEvent};
use mico::wlan::{DiscoveryMethod, Interface, JoinParams, SoftApConfig};

use serde_json::Value;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::bonjour::{Advertisement, Advertiser};
use crate::config::{CONFIG_SEED, DEFAULT_NAME, ProvisioningMode, SystemOptions, device_info};
use crate::easylink::{DefaultDelegate, ProvisioningOutcome};
use crate::error::{Error, ErrorKind, Result};
use crate::flash::{Flash, MemoryFlash, Partition};
use crate::notification::NotificationCenter;
use crate::platform::{SystemControl, Watchdog, WifiDriver};
use crate::store::ConfigStore;
use crate::system::{Context, Platform, System};

const WAIT: Duration = Duration::from_secs(600);

const MAC: [u8; 6] = [0xC8, 0x93, 0x46, 0x0A, 0x1B, 0x2C];

// Calls received by a mock, observable while they arrive.
pub(crate) struct Recorder<T> {
    calls: watch::Sender<Vec<T>>,
}

impl<T: Clone> Recorder<T> {
    fn new() -> Self {
        Self {
            calls: watch::channel(Vec::new()).0,
        }
    }

    fn record(&self, call: T) {
        self.calls.send_modify(|calls| calls.push(call));
    }

    fn calls(&self) -> Vec<T> {
        self.calls.borrow().clone()
    }

    async fn wait_for(&self, mut predicate: impl FnMut(&[T]) -> bool) {
        let mut receiver = self.calls.subscribe();
        let waited = tokio::time::timeout(WAIT, receiver.wait_for(|calls| predicate(calls))).await;
        assert!(
            matches!(waited, Ok(Ok(_))),
            "expected call never received"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WifiCall {
    StartDiscovery(DiscoveryMethod),
    StopDiscovery,
    Connect(JoinParams),
    StartSoftAp(SoftApConfig),
    SuspendSoftAp,
    PowerOff,
    PowerSave(bool),
}

pub(crate) struct MockWifi {
    recorder: Recorder<WifiCall>,
    reject_soft_ap: AtomicBool,
}

impl MockWifi {
    pub(crate) fn new() -> Self {
        Self {
            recorder: Recorder::new(),
            reject_soft_ap: AtomicBool::new(false),
        }
    }

    pub(crate) fn reject_soft_ap(&self) {
        self.reject_soft_ap.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<WifiCall> {
        self.recorder.calls()
    }

    pub(crate) async fn wait_for(&self, predicate: impl FnMut(&[WifiCall]) -> bool) {
        self.recorder.wait_for(predicate).await;
    }

    pub(crate) fn discoveries(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, WifiCall::StartDiscovery(_)))
            .count()
    }

    pub(crate) fn joins(&self) -> Vec<JoinParams> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                WifiCall::Connect(params) => Some(params),
                _ => None,
            })
            .collect()
    }
}

impl WifiDriver for MockWifi {
    fn mac_address(&self) -> Result<[u8; 6]> {
        Ok(MAC)
    }

    fn rf_version(&self) -> Result<String> {
        Ok("wl0: Mock 7.10.323".into())
    }

    fn start_discovery(&self, method: DiscoveryMethod, _timeout: Duration) -> Result<()> {
        self.recorder.record(WifiCall::StartDiscovery(method));
        Ok(())
    }

    fn stop_discovery(&self) -> Result<()> {
        self.recorder.record(WifiCall::StopDiscovery);
        Ok(())
    }

    fn connect(&self, params: &JoinParams) -> Result<()> {
        self.recorder.record(WifiCall::Connect(params.clone()));
        Ok(())
    }

    fn start_soft_ap(&self, config: &SoftApConfig) -> Result<()> {
        if self.reject_soft_ap.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Param, "soft access point rejected"));
        }
        self.recorder.record(WifiCall::StartSoftAp(config.clone()));
        Ok(())
    }

    fn suspend_soft_ap(&self) -> Result<()> {
        self.recorder.record(WifiCall::SuspendSoftAp);
        Ok(())
    }

    fn power_off(&self) -> Result<()> {
        self.recorder.record(WifiCall::PowerOff);
        Ok(())
    }

    fn set_power_save(&self, enabled: bool) -> Result<()> {
        self.recorder.record(WifiCall::PowerSave(enabled));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlCall {
    Reboot,
    Standby,
}

pub(crate) struct MockControl {
    recorder: Recorder<ControlCall>,
}

impl MockControl {
    pub(crate) fn new() -> Self {
        Self {
            recorder: Recorder::new(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<ControlCall> {
        self.recorder.calls()
    }

    pub(crate) async fn wait_for(&self, predicate: impl FnMut(&[ControlCall]) -> bool) {
        self.recorder.wait_for(predicate).await;
    }
}

impl SystemControl for MockControl {
    fn reboot(&self) {
        self.recorder.record(ControlCall::Reboot);
    }

    fn standby(&self) {
        self.recorder.record(ControlCall::Standby);
    }
}

pub(crate) struct MockWatchdog {
    timeout: Mutex<Option<Duration>>,
    reloads: AtomicUsize,
}

impl MockWatchdog {
    pub(crate) fn new() -> Self {
        Self {
            timeout: Mutex::new(None),
            reloads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock().unwrap()
    }

    pub(crate) fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl Watchdog for MockWatchdog {
    fn initialize(&self, timeout: Duration) -> Result<()> {
        *self.timeout.lock().unwrap() = Some(timeout);
        Ok(())
    }

    fn reload(&self) {
        let _ = self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AdvertiserCall {
    Start(Interface, Advertisement),
    Update(Interface, Advertisement),
    Suspend(Interface),
}

pub(crate) struct MockAdvertiser {
    recorder: Recorder<AdvertiserCall>,
}

impl MockAdvertiser {
    fn new() -> Self {
        Self {
            recorder: Recorder::new(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<AdvertiserCall> {
        self.recorder.calls()
    }
}

impl Advertiser for MockAdvertiser {
    fn start(&self, interface: Interface, advertisement: &Advertisement) -> Result<()> {
        self.recorder
            .record(AdvertiserCall::Start(interface, advertisement.clone()));
        Ok(())
    }

    fn update(&self, interface: Interface, advertisement: &Advertisement) -> Result<()> {
        self.recorder
            .record(AdvertiserCall::Update(interface, advertisement.clone()));
        Ok(())
    }

    fn suspend(&self, interface: Interface) -> Result<()> {
        self.recorder.record(AdvertiserCall::Suspend(interface));
        Ok(())
    }
}

pub(crate) struct Mocks {
    pub(crate) flash: Arc<MemoryFlash>,
    pub(crate) wifi: Arc<MockWifi>,
    pub(crate) control: Arc<MockControl>,
    pub(crate) watchdog: Arc<MockWatchdog>,
    pub(crate) advertiser: Arc<MockAdvertiser>,
    pub(crate) notifications: Arc<NotificationCenter>,
}

impl Mocks {
    pub(crate) fn new() -> Self {
        Self::with_flash(MemoryFlash::new())
    }

    pub(crate) fn with_flash(flash: MemoryFlash) -> Self {
        Self {
            flash: Arc::new(flash),
            wifi: Arc::new(MockWifi::new()),
            control: Arc::new(MockControl::new()),
            watchdog: Arc::new(MockWatchdog::new()),
            advertiser: Arc::new(MockAdvertiser::new()),
            notifications: Arc::new(NotificationCenter::new()),
        }
    }

    pub(crate) fn platform(&self) -> Platform {
        Platform {
            flash: Arc::clone(&self.flash) as Arc<dyn Flash>,
            wifi: Arc::clone(&self.wifi) as Arc<dyn WifiDriver>,
            control: Arc::clone(&self.control) as Arc<dyn SystemControl>,
            watchdog: Arc::clone(&self.watchdog) as Arc<dyn Watchdog>,
            advertiser: Arc::clone(&self.advertiser) as Arc<dyn Advertiser>,
            notifications: Arc::clone(&self.notifications),
        }
    }

    pub(crate) fn context(&self) -> Arc<Context> {
        Arc::new(Context::new(
            SystemOptions::new(),
            device_info(),
            self.platform(),
            Arc::new(DefaultDelegate),
        ))
    }

    // Stores a record before the system boots.
    pub(crate) fn seed(&self, update: impl FnOnce(&mut ConfigurationRecord)) {
        let store = ConfigStore::new(
            Arc::clone(&self.flash) as Arc<dyn Flash>,
            DEFAULT_NAME,
            CONFIG_SEED,
        );
        store.init(0).unwrap();
        let mut guard = store.lock().unwrap();
        update(guard.record_mut());
        guard.commit().unwrap();
    }

    // Reads the record committed to flash.
    pub(crate) fn stored(&self) -> ConfigurationRecord {
        let store = ConfigStore::new(
            Arc::clone(&self.flash) as Arc<dyn Flash>,
            DEFAULT_NAME,
            CONFIG_SEED,
        );
        store.init(0).unwrap();
        store.read().unwrap()
    }

    pub(crate) async fn start(&self, options: SystemOptions) -> System {
        System::start(options, device_info(), self.platform(), Arc::new(DefaultDelegate))
            .await
            .unwrap()
    }

    pub(crate) fn dispatch(&self, notification: Notification) {
        self.notifications.dispatch(&notification);
    }
}

fn options(mode: ProvisioningMode) -> SystemOptions {
    SystemOptions::new().mode(mode).port(0).disable_monitor()
}

fn extra_data(auth: &[u8], identifier: u32) -> Vec<u8> {
    let mut data = auth.to_vec();
    data.push(b'#');
    data.extend_from_slice(&identifier.to_le_bytes());
    data
}

fn configured(record: &mut ConfigurationRecord, ssid: &str) {
    record.system.set_credentials(ssid, "previous-key");
    record.system.bssid = [0x02, 0, 0, 0, 0, 0x01];
    record.system.channel = 6;
    record.system.configured = ConfigState::AllConfigured;
}

#[tokio::test(start_paused = true)]
async fn easylink_provisioning() {
    let mocks = Mocks::new();
    let system = mocks.start(options(ProvisioningMode::EasyLinkWithSoftAp)).await;
    let provisioning = system.take_provisioning().unwrap();

    mocks
        .wifi
        .wait_for(|calls| calls.contains(&WifiCall::StartDiscovery(DiscoveryMethod::EasyLinkPlus)))
        .await;

    mocks.dispatch(Notification::EasyLinkCompleted(Some(Credentials::new(
        "TestNet", "secret",
    ))));
    mocks.dispatch(Notification::EasyLinkExtraData(extra_data(b"auth", 0x0102_0304)));

    mocks
        .wifi
        .wait_for(|calls| {
            calls
                .iter()
                .any(|call| matches!(call, WifiCall::Connect(params) if params.ssid == "TestNet"))
        })
        .await;

    // Credentials are committed before the join.
    let stored = mocks.stored();
    assert_eq!(stored.system.configured, ConfigState::WlanUnconfigured);
    assert_eq!(stored.system.user_key, "secret");

    mocks.dispatch(Notification::WifiStatusChanged(WifiEvent::StationUp));

    assert_eq!(provisioning.join().await.unwrap(), ProvisioningOutcome::Connected);

    let stored = mocks.stored();
    assert_eq!(stored.system.configured, ConfigState::AllConfigured);
    assert_eq!(stored.system.ssid, "TestNet");
    assert!(stored.system.dhcp_enable);
    assert!(system.is_configured().unwrap());
    assert_eq!(system.session_identifier(), 0x0102_0304);

    // Provisioning callbacks are gone, the system ones remain.
    assert_eq!(
        mocks
            .notifications
            .subscriber_count(NotificationKind::EasyLinkCompleted),
        0
    );
    assert_eq!(
        mocks
            .notifications
            .subscriber_count(NotificationKind::EasyLinkExtraData),
        0
    );
    assert_eq!(
        mocks
            .notifications
            .subscriber_count(NotificationKind::WifiStatusChanged),
        1
    );

    // The station announcement carries the new identifier.
    let update = mocks.advertiser.calls().into_iter().find_map(|call| match call {
        AdvertiserCall::Update(Interface::Station, advertisement) => Some(advertisement),
        _ => None,
    });
    let advertisement = update.unwrap();
    assert_eq!(advertisement.txt.session_identifier(), 0x0102_0304);
    assert_eq!(advertisement.port, system.server_address().unwrap().port());
    assert!(
        advertisement
            .txt
            .properties()
            .contains(&("MAC", "C8:93:46:0A:1B:2C".into()))
    );

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn join_timeout_restarts_discovery() {
    let mocks = Mocks::new();
    let system = mocks
        .start(
            options(ProvisioningMode::EasyLink)
                .max_attempts(3)
                .connect_timeout(Duration::from_secs(3)),
        )
        .await;
    let provisioning = system.take_provisioning().unwrap();

    for attempt in 1..=3 {
        mocks
            .wifi
            .wait_for(|calls| {
                calls
                    .iter()
                    .filter(|call| matches!(call, WifiCall::StartDiscovery(_)))
                    .count()
                    == attempt
            })
            .await;
        mocks.dispatch(Notification::EasyLinkCompleted(Some(Credentials::new(
            "Unreachable",
            "secret",
        ))));
        mocks.dispatch(Notification::EasyLinkExtraData(extra_data(b"", attempt as u32)));
    }

    // Never configured, nothing to roll back to.
    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::PoweredDown
    );
    assert_eq!(mocks.wifi.discoveries(), 3);
    assert_eq!(mocks.wifi.joins().len(), 3);
    assert!(mocks.wifi.calls().contains(&WifiCall::PowerOff));

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unverified_credentials_are_not_kept() {
    let mocks = Mocks::new();
    let options = options(ProvisioningMode::EasyLink)
        .max_attempts(1)
        .connect_timeout(Duration::from_secs(3));

    let system = mocks.start(options).await;
    let provisioning = system.take_provisioning().unwrap();

    mocks
        .wifi
        .wait_for(|calls| calls.contains(&WifiCall::StartDiscovery(DiscoveryMethod::EasyLinkPlus)))
        .await;
    mocks.dispatch(Notification::EasyLinkCompleted(Some(Credentials::new(
        "WrongNet", "secret",
    ))));
    mocks.dispatch(Notification::EasyLinkExtraData(extra_data(b"", 1)));

    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::PoweredDown
    );

    // Flash agrees with memory: back to the factory configuration.
    let stored = mocks.stored();
    assert_eq!(stored.system.configured, ConfigState::Unconfigured);
    assert!(stored.system.ssid.is_empty());
    assert!(stored.system.user_key.is_empty());
    assert_eq!(stored.system, system.record().unwrap().system);
    system.shutdown().await;

    // After a reboot a failed discovery has nothing to roll back to.
    let system = mocks.start(options).await;
    let provisioning = system.take_provisioning().unwrap();

    mocks
        .wifi
        .wait_for(|calls| {
            calls
                .iter()
                .filter(|call| matches!(call, WifiCall::StartDiscovery(_)))
                .count()
                == 2
        })
        .await;
    mocks.dispatch(Notification::EasyLinkCompleted(None));

    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::PoweredDown
    );
    assert_eq!(mocks.wifi.joins().len(), 1);
    assert_eq!(mocks.stored().system.configured, ConfigState::Unconfigured);
    assert!(!system.is_configured().unwrap());

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn malformed_extra_data_decides_once() {
    let mocks = Mocks::new();
    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    let provisioning = system.take_provisioning().unwrap();

    mocks
        .wifi
        .wait_for(|calls| calls.contains(&WifiCall::StartDiscovery(DiscoveryMethod::EasyLinkPlus)))
        .await;

    mocks.dispatch(Notification::EasyLinkCompleted(Some(Credentials::new(
        "TestNet", "secret",
    ))));
    mocks.dispatch(Notification::EasyLinkExtraData(b"no delimiter".to_vec()));
    mocks.dispatch(Notification::EasyLinkExtraData(extra_data(b"auth", 7)));
    assert_eq!(provisioning.session_signals(), 1);

    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::PoweredDown
    );
    assert_eq!(mocks.wifi.discoveries(), 1);
    assert!(mocks.wifi.joins().is_empty());
    assert_eq!(system.session_identifier(), 0);

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_discovery_rolls_back() {
    let mocks = Mocks::new();
    mocks.seed(|record| {
        configured(record, "Home");
        record.system.request_reconfiguration();
    });

    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    let provisioning = system.take_provisioning().unwrap();

    mocks
        .wifi
        .wait_for(|calls| calls.contains(&WifiCall::StartDiscovery(DiscoveryMethod::EasyLinkPlus)))
        .await;
    mocks.dispatch(Notification::EasyLinkCompleted(None));

    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::RolledBack
    );

    let stored = mocks.stored();
    assert_eq!(stored.system.configured, ConfigState::AllConfigured);
    assert_eq!(stored.system.ssid, "Home");

    let joins = mocks.wifi.joins();
    let join = joins.last().unwrap();
    assert_eq!(join.ssid, "Home");
    assert!(!join.is_fast());

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_discovery_falls_back_to_soft_ap() {
    let mocks = Mocks::new();
    let system = mocks
        .start(options(ProvisioningMode::EasyLinkWithSoftAp).max_attempts(1))
        .await;
    let provisioning = system.take_provisioning().unwrap();

    mocks
        .wifi
        .wait_for(|calls| calls.contains(&WifiCall::StartDiscovery(DiscoveryMethod::EasyLinkPlus)))
        .await;
    mocks.dispatch(Notification::EasyLinkCompleted(None));

    mocks
        .wifi
        .wait_for(|calls| calls.iter().any(|call| matches!(call, WifiCall::StartSoftAp(_))))
        .await;
    assert!(
        mocks
            .wifi
            .calls()
            .contains(&WifiCall::StartSoftAp(SoftApConfig::easylink(&MAC)))
    );
    assert!(mocks.advertiser.calls().iter().any(|call| matches!(
        call,
        AdvertiserCall::Start(Interface::SoftAp, advertisement)
            if advertisement.txt.properties().contains(&("wlan unconfigured", "T".into()))
    )));

    // A client configured the station through the access point.
    {
        let mut guard = system.store().lock().unwrap();
        guard.system_mut().set_credentials("Configured", "key");
    }
    mocks.dispatch(Notification::WifiStatusChanged(WifiEvent::StationUp));
    mocks.dispatch(Notification::WifiStatusChanged(WifiEvent::ApDown));

    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::SoftApConnected
    );
    assert_eq!(mocks.stored().system.configured, ConfigState::AllConfigured);
    assert!(
        mocks
            .advertiser
            .calls()
            .contains(&AdvertiserCall::Suspend(Interface::SoftAp))
    );

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rejected_soft_ap_rolls_back() {
    let mocks = Mocks::new();
    mocks.seed(|record| {
        configured(record, "Home");
        record.system.request_reconfiguration();
    });
    mocks.wifi.reject_soft_ap();

    let system = mocks.start(options(ProvisioningMode::SoftAp)).await;
    let provisioning = system.take_provisioning().unwrap();

    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::RolledBack
    );
    assert_eq!(mocks.wifi.discoveries(), 0);
    assert_eq!(mocks.wifi.joins().last().unwrap().ssid, "Home");

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bypass_joins_stored_network() {
    let mocks = Mocks::new();
    mocks.seed(|record| {
        configured(record, "Home");
        record.system.request_reconfiguration();
        record.system.easylink_bypass = EasyLinkBypass::Bypass;
    });

    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    let provisioning = system.take_provisioning().unwrap();

    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::Bypassed
    );
    assert_eq!(mocks.wifi.discoveries(), 0);

    let joins = mocks.wifi.joins();
    assert_eq!(joins.len(), 1);
    assert!(joins[0].is_fast());
    assert_eq!(joins[0].channel, 6);

    // The bypass applies to a single boot.
    assert_eq!(mocks.stored().system.easylink_bypass, EasyLinkBypass::No);

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn configured_device_joins_on_boot() {
    let mocks = Mocks::new();
    mocks.seed(|record| configured(record, "Home"));

    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    assert!(system.take_provisioning().is_none());

    let joins = mocks.wifi.joins();
    assert_eq!(joins.len(), 1);
    assert!(joins[0].is_fast());
    assert!(mocks.wifi.calls().contains(&WifiCall::PowerSave(false)));
    assert!(matches!(
        mocks.advertiser.calls().first(),
        Some(AdvertiserCall::Start(Interface::Station, _))
    ));

    let status = system.status().unwrap();
    assert_eq!(status.mac, "C8:93:46:0A:1B:2C");

    system.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn single_provisioning_task() {
    let mocks = Mocks::new();
    let system = mocks.start(options(ProvisioningMode::SoftAp)).await;
    let provisioning = system.take_provisioning().unwrap();

    mocks
        .wifi
        .wait_for(|calls| calls.iter().any(|call| matches!(call, WifiCall::StartSoftAp(_))))
        .await;

    let error = system.start_provisioning().err().unwrap();
    assert_eq!(error.kind(), ErrorKind::ResourceExhausted);

    provisioning.cancel();
    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::Cancelled
    );

    // The slot is free again.
    let provisioning = system.start_provisioning().unwrap();
    provisioning.cancel();
    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::Cancelled
    );

    system.shutdown().await;
    assert_eq!(
        system.start_provisioning().err().unwrap().kind(),
        ErrorKind::NotInitialized
    );
}

#[test]
fn refused_system_handlers_are_removed() {
    let mut mocks = Mocks::new();
    mocks.notifications = Arc::new(NotificationCenter::with_capacity(1));
    let _ = mocks
        .notifications
        .register(NotificationKind::WifiStatusChanged, |_| {})
        .unwrap();

    let context = mocks.context();
    assert_eq!(
        context.register_handlers().err().unwrap().kind(),
        ErrorKind::ResourceExhausted
    );

    for kind in [
        NotificationKind::DhcpCompleted,
        NotificationKind::WifiConnectFailed,
        NotificationKind::WifiFatalError,
        NotificationKind::StackOverflow,
        NotificationKind::WifiParametersChanged,
    ] {
        assert_eq!(mocks.notifications.subscriber_count(kind), 0);
    }
    assert_eq!(
        mocks
            .notifications
            .subscriber_count(NotificationKind::WifiStatusChanged),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn fatal_notifications_reset() {
    let mocks = Mocks::new();
    mocks.seed(|record| configured(record, "Home"));
    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;

    mocks.dispatch(Notification::StackOverflow("app".into()));
    assert_eq!(mocks.control.calls(), [ControlCall::Reboot]);

    system.shutdown().await;
}

async fn request(
    address: SocketAddr,
    method: &str,
    path: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(("127.0.0.1", address.port()))
        .await
        .unwrap();

    let mut head = format!(
        "{method} {path} HTTP/1.1\r\nHost: device\r\nConnection: close\r\nContent-Length: {}\r\n",
        body.len()
    );
    if let Some(content_type) = content_type {
        head.push_str(&format!("Content-Type: {content_type}\r\n"));
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await.unwrap();

    let split = response
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .unwrap();
    let head = std::str::from_utf8(&response[..split]).unwrap();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();

    (status, response[split + 4..].to_vec())
}

#[tokio::test]
async fn read_configuration() {
    let mocks = Mocks::new();
    mocks.seed(|record| configured(record, "Home"));
    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    let address = system.server_address().unwrap();

    mocks.dispatch(Notification::DhcpCompleted(mico::events::IpStatus {
        local_ip: "192.168.1.30".into(),
        netmask: "255.255.255.0".into(),
        gateway: "192.168.1.1".into(),
        dns_server: "192.168.1.1".into(),
    }));

    let (status, body) = request(address, "GET", "/config-read", None, b"").await;
    assert_eq!(status, 200);

    let report: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["DEVICE"]["NAME"], DEFAULT_NAME);
    assert_eq!(report["DEVICE"]["MAC"], "C8:93:46:0A:1B:2C");
    assert_eq!(report["WLAN"]["SSID"], "Home");
    assert_eq!(report["WLAN"]["CONFIGURED"], true);
    assert_eq!(report["STATUS"]["IP"], "192.168.1.30");
    assert!(report["WLAN"].get("PASSWORD").is_none());

    let (status, _) = request(address, "GET", "/missing", None, b"").await;
    assert_eq!(status, 404);

    system.shutdown().await;
}

#[tokio::test]
async fn write_configuration() {
    let mocks = Mocks::new();
    mocks.seed(|record| configured(record, "Home"));
    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    let address = system.server_address().unwrap();

    let (status, _) = request(address, "POST", "/config-write", None, b"{not json").await;
    assert_eq!(status, 400);
    assert!(mocks.control.calls().is_empty());

    let (status, _) = request(
        address,
        "POST",
        "/config-write",
        Some("application/json"),
        br#"{"NAME":"Kitchen","IDENTIFIER":99}"#,
    )
    .await;
    assert_eq!(status, 200);

    let stored = mocks.stored();
    assert_eq!(stored.system.name, "Kitchen");
    assert_eq!(stored.system.configured, ConfigState::AllConfigured);
    assert_eq!(system.session_identifier(), 99);

    // A changed setting needs a reset to take effect.
    mocks
        .control
        .wait_for(|calls| calls.contains(&ControlCall::Reboot))
        .await;

    system.shutdown().await;
}

#[tokio::test]
async fn write_configuration_from_soft_ap() {
    let mocks = Mocks::new();
    let system = mocks.start(options(ProvisioningMode::SoftAp)).await;
    let provisioning = system.take_provisioning().unwrap();
    let address = system.server_address().unwrap();

    mocks
        .wifi
        .wait_for(|calls| calls.iter().any(|call| matches!(call, WifiCall::StartSoftAp(_))))
        .await;

    let (status, _) = request(
        address,
        "POST",
        "/config-write-uap",
        Some("application/json"),
        br#"{"SSID":"Uap","PASSWORD":"secret"}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(mocks.stored().system.ssid, "Uap");

    mocks
        .wifi
        .wait_for(|calls| {
            calls.contains(&WifiCall::SuspendSoftAp)
                && calls
                    .iter()
                    .any(|call| matches!(call, WifiCall::Connect(params) if params.ssid == "Uap"))
        })
        .await;

    mocks.dispatch(Notification::WifiStatusChanged(WifiEvent::StationUp));
    assert_eq!(
        provisioning.join().await.unwrap(),
        ProvisioningOutcome::SoftApConnected
    );

    let stored = mocks.stored();
    assert_eq!(stored.system.configured, ConfigState::AllConfigured);
    assert_eq!(stored.system.user_key, "secret");
    assert!(mocks.control.calls().is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn firmware_upload() {
    let mocks = Mocks::new();
    mocks.seed(|record| configured(record, "Home"));
    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    let address = system.server_address().unwrap();

    let image: Vec<u8> = (0..20_000u32).map(|i| (i % 253) as u8).collect();

    let (status, _) = request(address, "POST", "/OTA", Some("application/json"), b"image").await;
    assert_eq!(status, 415);
    assert!(!mocks.stored().boot_table.is_pending());

    let (status, _) = request(
        address,
        "POST",
        "/OTA",
        Some("application/ota-stream"),
        &image,
    )
    .await;
    assert_eq!(status, 200);

    let stored = mocks.stored();
    assert!(stored.boot_table.is_pending());
    assert_eq!(stored.boot_table.length, 20_000);
    assert_eq!(stored.boot_table.crc, mico::checksum::crc16(&image));
    assert_eq!(
        &mocks.flash.contents(Partition::OtaTemp).unwrap()[..image.len()],
        &image[..]
    );

    mocks
        .control
        .wait_for(|calls| calls.contains(&ControlCall::Reboot))
        .await;

    system.shutdown().await;
}

#[tokio::test]
async fn firmware_upload_without_ota_partition() {
    let layout: Vec<_> = crate::flash::DEFAULT_LAYOUT
        .iter()
        .copied()
        .filter(|(partition, _)| *partition != Partition::OtaTemp)
        .collect();
    let mocks = Mocks::with_flash(MemoryFlash::with_layout(&layout));
    mocks.seed(|record| configured(record, "Home"));
    let system = mocks.start(options(ProvisioningMode::EasyLink)).await;
    let address = system.server_address().unwrap();

    let (status, _) = request(
        address,
        "POST",
        "/OTA",
        Some("application/ota-stream"),
        b"image",
    )
    .await;
    assert_eq!(status, 404);

    system.shutdown().await;
}
