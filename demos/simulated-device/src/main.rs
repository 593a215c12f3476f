use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::{Parser, ValueEnum};

use mico::config::SecurityType;
use mico::events::{ApInfo, Credentials, IpStatus, Notification, WifiEvent};
use mico::wlan::{DiscoveryMethod, JoinParams, SoftApConfig};

use mico_system::bonjour::{Advertiser, MdnsAdvertiser};
use mico_system::config::device_info;
use mico_system::flash::FileFlash;
use mico_system::notification::NotificationCenter;
use mico_system::platform::{SystemControl, Watchdog, WifiDriver};
use mico_system::{DefaultDelegate, Error, Platform, ProvisioningMode, Result, System, SystemOptions};

use tokio::sync::Notify;

use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

// Time the simulated radio takes to answer a command.
const RADIO_DELAY: Duration = Duration::from_millis(300);

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Easylink,
    EasylinkSoftAp,
    SoftAp,
    Airkiss,
}

impl From<Mode> for ProvisioningMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Easylink => Self::EasyLink,
            Mode::EasylinkSoftAp => Self::EasyLinkWithSoftAp,
            Mode::SoftAp => Self::SoftAp,
            Mode::Airkiss => Self::AirKiss,
        }
    }
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the flash partitions.
    #[arg(long, default_value = "device-flash")]
    flash: PathBuf,

    /// Configuration server port.
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Provisioning mode.
    #[arg(long, value_enum, default_value_t = Mode::EasylinkSoftAp)]
    mode: Mode,

    /// SSID sent by the simulated provisioning peer. Without it every
    /// discovery times out.
    #[arg(long)]
    ssid: Option<String>,

    /// Passphrase sent by the simulated provisioning peer.
    #[arg(long, default_value = "")]
    password: String,

    /// Session identifier sent by the simulated provisioning peer.
    #[arg(long, default_value_t = 1)]
    identifier: u32,

    /// Restores the factory configuration before booting.
    #[arg(long)]
    factory_reset: bool,

    /// Logs debug messages.
    #[arg(short, long)]
    verbose: bool,
}

// A radio answering every command through the notification center.
struct SimulatedWifi {
    notifications: Arc<NotificationCenter>,
    peer: Option<Credentials>,
    identifier: u32,
    associated: Mutex<Option<String>>,
}

impl SimulatedWifi {
    fn later(&self, delay: Duration, notifications: Vec<Notification>) {
        let center = Arc::clone(&self.notifications);
        let _ = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for notification in &notifications {
                center.dispatch(notification);
            }
        });
    }
}

impl WifiDriver for SimulatedWifi {
    fn mac_address(&self) -> Result<[u8; 6]> {
        Ok([0xC8, 0x93, 0x46, 0x0A, 0x1B, 0x2C])
    }

    fn rf_version(&self) -> Result<String> {
        Ok("simulated-radio 1.0".into())
    }

    fn start_discovery(&self, method: DiscoveryMethod, timeout: Duration) -> Result<()> {
        info!("Listening for {method:?} frames");
        let Some(credentials) = self.peer.clone() else {
            self.later(timeout, vec![Notification::EasyLinkCompleted(None)]);
            return Ok(());
        };

        let mut extra = b"simulated".to_vec();
        extra.push(b'#');
        extra.extend_from_slice(&self.identifier.to_le_bytes());

        let mut notifications = vec![Notification::EasyLinkCompleted(Some(credentials))];
        if method == DiscoveryMethod::EasyLinkPlus {
            notifications.push(Notification::EasyLinkExtraData(extra));
        }
        self.later(RADIO_DELAY, notifications);
        Ok(())
    }

    fn stop_discovery(&self) -> Result<()> {
        Ok(())
    }

    fn connect(&self, params: &JoinParams) -> Result<()> {
        if params.ssid.is_empty() {
            self.later(RADIO_DELAY, vec![Notification::WifiConnectFailed(-1)]);
            return Ok(());
        }

        *self
            .associated
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(params.ssid.clone());

        self.later(
            RADIO_DELAY,
            vec![
                Notification::WifiStatusChanged(WifiEvent::StationUp),
                Notification::WifiParametersChanged(ApInfo {
                    ssid: params.ssid.clone(),
                    bssid: [0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
                    channel: 6,
                    security: SecurityType::Wpa2Aes,
                    key: params.key.clone(),
                }),
                Notification::DhcpCompleted(IpStatus {
                    local_ip: "192.168.1.30".into(),
                    netmask: "255.255.255.0".into(),
                    gateway: "192.168.1.1".into(),
                    dns_server: "192.168.1.1".into(),
                }),
            ],
        );
        Ok(())
    }

    fn start_soft_ap(&self, config: &SoftApConfig) -> Result<()> {
        info!("Soft access point `{}` up", config.ssid);
        self.later(
            RADIO_DELAY,
            vec![Notification::WifiStatusChanged(WifiEvent::ApUp)],
        );
        Ok(())
    }

    fn suspend_soft_ap(&self) -> Result<()> {
        self.later(
            RADIO_DELAY,
            vec![Notification::WifiStatusChanged(WifiEvent::ApDown)],
        );
        Ok(())
    }

    fn power_off(&self) -> Result<()> {
        let associated = self
            .associated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if associated.is_some() {
            self.later(
                Duration::ZERO,
                vec![Notification::WifiStatusChanged(WifiEvent::StationDown)],
            );
        }
        info!("Radio off");
        Ok(())
    }

    fn set_power_save(&self, enabled: bool) -> Result<()> {
        info!("Radio power save {}", if enabled { "on" } else { "off" });
        Ok(())
    }
}

// Reboots restart the system in place, standby stops the process.
#[derive(Default)]
struct SimulatedControl {
    restart: Notify,
    standby: AtomicBool,
}

impl SystemControl for SimulatedControl {
    fn reboot(&self) {
        warn!("Device reset");
        self.restart.notify_one();
    }

    fn standby(&self) {
        warn!("Device in standby");
        self.standby.store(true, Ordering::SeqCst);
        self.restart.notify_one();
    }
}

struct SimulatedWatchdog;

impl Watchdog for SimulatedWatchdog {
    fn initialize(&self, timeout: Duration) -> Result<()> {
        info!("Watchdog armed with {timeout:?}");
        Ok(())
    }

    fn reload(&self) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        })
        .init();

    let notifications = Arc::new(NotificationCenter::new());
    let control = Arc::new(SimulatedControl::default());
    let advertiser = Arc::new(MdnsAdvertiser::new()?);

    let platform = Platform {
        flash: Arc::new(FileFlash::new(&cli.flash)?),
        wifi: Arc::new(SimulatedWifi {
            notifications: Arc::clone(&notifications),
            peer: cli
                .ssid
                .as_ref()
                .map(|ssid| Credentials::new(ssid.as_str(), cli.password.as_str())),
            identifier: cli.identifier,
            associated: Mutex::new(None),
        }),
        control: Arc::clone(&control) as Arc<dyn SystemControl>,
        watchdog: Arc::new(SimulatedWatchdog),
        advertiser: Arc::clone(&advertiser) as Arc<dyn Advertiser>,
        notifications,
    };

    let options = SystemOptions::new()
        .mode(cli.mode.into())
        .port(cli.port);

    let mut factory_reset = cli.factory_reset;

    loop {
        let system = System::start(
            options,
            device_info(),
            platform.clone(),
            Arc::new(DefaultDelegate),
        )
        .await?;

        if factory_reset {
            factory_reset = false;
            system
                .power()
                .easylink_button_long_pressed(system.store())?;
        }

        let stop = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(Error::from)?;
                true
            }
            () = control.restart.notified() => control.standby.load(Ordering::SeqCst),
        };

        system.shutdown().await;

        if stop {
            break;
        }
        info!("Booting again");
    }

    advertiser.shutdown()
}
