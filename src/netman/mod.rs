//! Client for the host's NetworkManager D-Bus service.
//!
//! Every query reflects the live state of the service; nothing is cached
//! across calls, since other system components may reconfigure devices at
//! any time.

mod proxies;

use crate::{config::NetmanConfig, error::Error};
use log::{debug, warn};
use proxies::{
    AccessPointProxy, ActiveConnectionProxy, DeviceProxy, NetworkManagerProxy,
    SettingsConnectionProxy, WirelessDeviceProxy,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use zbus::{
    Connection,
    zvariant::{ObjectPath, OwnedObjectPath, Value},
};

const NM_DEVICE_TYPE_WIFI: u32 = 2;
const NM_DEVICE_STATE_ACTIVATED: u32 = 100;
const NM_ACTIVE_CONNECTION_STATE_ACTIVATED: u32 = 2;
const NM_ACTIVE_CONNECTION_STATE_DEACTIVATED: u32 = 4;
const NM_802_11_AP_FLAGS_PRIVACY: u32 = 0x1;

const ACTIVATION_POLL_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Wifi,
    Other(u32),
}

/// A network device as reported by NetworkManager at query time.
#[derive(Clone, Debug)]
pub struct Device {
    pub path: OwnedObjectPath,
    pub interface: String,
    pub kind: DeviceKind,
    pub managed: bool,
}

impl Device {
    pub fn is_wifi(&self) -> bool {
        self.kind == DeviceKind::Wifi
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    Open,
    Wep,
    Wpa,
    Wpa2,
}

impl std::fmt::Display for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Security::Open => write!(f, "open"),
            Security::Wep => write!(f, "wep"),
            Security::Wpa => write!(f, "wpa"),
            Security::Wpa2 => write!(f, "wpa2"),
        }
    }
}

/// One user-facing network entry. Multiple access points broadcasting the
/// same name collapse into a single record.
#[derive(Clone, Debug)]
pub struct Ssid {
    pub name: String,
    pub strength: u8,
    pub security: Security,
}

/// Access point object path to owning device object path.
pub type ApToDevice = HashMap<String, String>;

/// Network name to the strongest access point broadcasting it.
pub type SsidToAp = HashMap<String, String>;

/// Raw per-access-point scan result before deduplication.
struct ApScan {
    name: String,
    strength: u8,
    security: Security,
    ap_path: String,
    device_path: String,
}

/// Pure filter over an already enumerated device list.
pub fn wifi_devices(devices: Vec<Device>) -> Vec<Device> {
    devices.into_iter().filter(Device::is_wifi).collect()
}

fn security_from_flags(flags: u32, wpa_flags: u32, rsn_flags: u32) -> Security {
    if rsn_flags != 0 {
        Security::Wpa2
    } else if wpa_flags != 0 {
        Security::Wpa
    } else if flags & NM_802_11_AP_FLAGS_PRIVACY != 0 {
        Security::Wep
    } else {
        Security::Open
    }
}

/// Collapse scan results by network name, keeping the strongest signal per
/// name. The ap-to-device map retains every scanned access point so a
/// resolved target can always be traced back to its owning device.
fn dedupe_ssids(scans: Vec<ApScan>) -> (Vec<Ssid>, ApToDevice, SsidToAp) {
    let mut best: HashMap<String, (u8, Security, String)> = HashMap::new();
    let mut ap_to_device = ApToDevice::new();

    for scan in scans {
        ap_to_device.insert(scan.ap_path.clone(), scan.device_path);

        match best.get(&scan.name) {
            Some((strength, _, _)) if *strength >= scan.strength => {}
            _ => {
                best.insert(scan.name, (scan.strength, scan.security, scan.ap_path));
            }
        }
    }

    let mut ssid_to_ap = SsidToAp::new();
    let mut ssids: Vec<Ssid> = best
        .into_iter()
        .map(|(name, (strength, security, ap_path))| {
            ssid_to_ap.insert(name.clone(), ap_path);
            Ssid {
                name,
                strength,
                security,
            }
        })
        .collect();
    ssids.sort_by(|a, b| a.name.cmp(&b.name));

    (ssids, ap_to_device, ssid_to_ap)
}

/// Resolve a chosen network name to a concrete (access point, device) pair.
/// Fails before any request is issued when the name is unknown.
fn resolve_target(
    name: &str,
    ap_to_device: &ApToDevice,
    ssid_to_ap: &SsidToAp,
) -> Result<(String, String), Error> {
    let ap_path = ssid_to_ap
        .get(name)
        .ok_or_else(|| Error::NotFound(format!("network \"{name}\"")))?;
    let device_path = ap_to_device
        .get(ap_path)
        .ok_or_else(|| Error::NotFound(format!("device for access point {ap_path}")))?;

    Ok((ap_path.clone(), device_path.clone()))
}

#[derive(Clone)]
pub struct NetworkClient {
    connection: Connection,
    connect_timeout: Duration,
}

impl NetworkClient {
    pub async fn new(config: &NetmanConfig) -> Result<Self, Error> {
        let connection = Connection::system().await?;

        Ok(NetworkClient {
            connection,
            connect_timeout: config.connect_timeout,
        })
    }

    /// Enumerate all network devices known to the management service.
    pub async fn get_devices(&self) -> Result<Vec<Device>, Error> {
        let nm = NetworkManagerProxy::new(&self.connection).await?;

        let mut devices = Vec::new();
        for path in nm.get_devices().await? {
            let device = self.device_proxy(&path).await?;

            let kind = match device.device_type().await? {
                NM_DEVICE_TYPE_WIFI => DeviceKind::Wifi,
                other => DeviceKind::Other(other),
            };

            devices.push(Device {
                interface: device.interface().await?,
                managed: device.managed().await?,
                kind,
                path,
            });
        }

        Ok(devices)
    }

    /// Scan visible access points across all wifi devices and deduplicate
    /// them by network name.
    pub async fn ssids(&self) -> Result<(Vec<Ssid>, ApToDevice, SsidToAp), Error> {
        let devices = wifi_devices(self.get_devices().await?);

        let mut scans = Vec::new();
        for device in &devices {
            let wireless = WirelessDeviceProxy::builder(&self.connection)
                .path(device.path.clone())?
                .build()
                .await?;

            // A failed scan request is not fatal, the last scan results are
            // still readable.
            if let Err(e) = wireless.request_scan(HashMap::new()).await {
                debug!("scan request on {} failed: {e}", device.interface);
            }

            for ap_path in wireless.get_access_points().await? {
                let ap = AccessPointProxy::builder(&self.connection)
                    .path(ap_path.clone())?
                    .build()
                    .await?;

                let raw_ssid = ap.ssid().await?;
                if raw_ssid.is_empty() {
                    continue;
                }

                scans.push(ApScan {
                    name: String::from_utf8_lossy(&raw_ssid).into_owned(),
                    strength: ap.strength().await?,
                    security: security_from_flags(
                        ap.flags().await?,
                        ap.wpa_flags().await?,
                        ap.rsn_flags().await?,
                    ),
                    ap_path: ap_path.to_string(),
                    device_path: device.path.to_string(),
                });
            }
        }

        Ok(dedupe_ssids(scans))
    }

    /// Connect to the named network, blocking until the management service
    /// reports success or failure or the bounded timeout elapses. A failed
    /// attempt removes the transient profile it created.
    pub async fn connect_ap(
        &self,
        name: &str,
        passphrase: &str,
        ap_to_device: &ApToDevice,
        ssid_to_ap: &SsidToAp,
    ) -> Result<(), Error> {
        let (ap_path, device_path) = resolve_target(name, ap_to_device, ssid_to_ap)?;

        let device = ObjectPath::try_from(device_path.as_str())
            .map_err(|e| Error::Transport(format!("invalid device path {device_path}: {e}")))?;
        let specific_object = ObjectPath::try_from(ap_path.as_str())
            .map_err(|e| Error::Transport(format!("invalid access point path {ap_path}: {e}")))?;

        let mut connection_section = HashMap::new();
        connection_section.insert("id", Value::from(name));
        connection_section.insert("type", Value::from("802-11-wireless"));

        let mut wireless_section = HashMap::new();
        wireless_section.insert("ssid", Value::from(name.as_bytes().to_vec()));
        wireless_section.insert("mode", Value::from("infrastructure"));

        let mut settings = HashMap::new();
        if !passphrase.is_empty() {
            wireless_section.insert("security", Value::from("802-11-wireless-security"));

            let mut security_section = HashMap::new();
            security_section.insert("key-mgmt", Value::from("wpa-psk"));
            security_section.insert("psk", Value::from(passphrase));
            settings.insert("802-11-wireless-security", security_section);
        }
        settings.insert("connection", connection_section);
        settings.insert("802-11-wireless", wireless_section);

        let nm = NetworkManagerProxy::new(&self.connection).await?;
        let (profile_path, active_path) = nm
            .add_and_activate_connection(settings, &device, &specific_object)
            .await?;

        debug!("activating connection to \"{name}\" via {active_path}");

        match self.wait_for_activation(&active_path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.delete_profile(&profile_path).await;
                Err(e)
            }
        }
    }

    /// True iff at least one wifi device reports an active connection.
    pub async fn connected_wifi(&self, wifi_devices: &[Device]) -> Result<bool, Error> {
        for device in wifi_devices {
            let proxy = self.device_proxy(&device.path).await?;
            if proxy.state().await? == NM_DEVICE_STATE_ACTIVATED {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Tear down active connections on all wifi devices. Failures on
    /// individual devices are collected without aborting the rest.
    pub async fn disconnect_wifi(&self, wifi_devices: &[Device]) -> Result<(), Error> {
        let mut failures = Vec::new();

        for device in wifi_devices {
            let result = match self.device_proxy(&device.path).await {
                Ok(proxy) => proxy.disconnect().await.map_err(Error::from),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("disconnect of {} failed: {e}", device.interface);
                failures.push(format!("{}: {e}", device.interface));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Transport(format!(
                "disconnect failed on: {}",
                failures.join(", ")
            )))
        }
    }

    /// Live managed flag per wifi interface.
    pub async fn wifis_managed(
        &self,
        wifi_devices: &[Device],
    ) -> Result<HashMap<String, bool>, Error> {
        let mut managed = HashMap::new();
        for device in wifi_devices {
            let proxy = self.device_proxy(&device.path).await?;
            managed.insert(device.interface.clone(), proxy.managed().await?);
        }
        Ok(managed)
    }

    /// Toggle whether the management service controls one interface.
    pub async fn set_iface_managed(
        &self,
        interface: &str,
        managed: bool,
        wifi_devices: &[Device],
    ) -> Result<(), Error> {
        let device = wifi_devices
            .iter()
            .find(|d| d.interface == interface)
            .ok_or_else(|| Error::NotFound(format!("wifi interface \"{interface}\"")))?;

        let proxy = self.device_proxy(&device.path).await?;
        proxy.set_managed(managed).await?;
        Ok(())
    }

    async fn device_proxy(&self, path: &OwnedObjectPath) -> Result<DeviceProxy<'_>, Error> {
        Ok(DeviceProxy::builder(&self.connection)
            .path(path.clone())?
            .build()
            .await?)
    }

    async fn wait_for_activation(&self, active_path: &OwnedObjectPath) -> Result<(), Error> {
        let active = ActiveConnectionProxy::builder(&self.connection)
            .path(active_path.clone())?
            .build()
            .await?;

        let deadline = Instant::now() + self.connect_timeout;
        loop {
            // The active connection object disappears once the attempt is
            // torn down, a read error counts as failure.
            let state = active
                .state()
                .await
                .map_err(|e| Error::Transport(format!("connection attempt failed: {e}")))?;

            match state {
                NM_ACTIVE_CONNECTION_STATE_ACTIVATED => return Ok(()),
                NM_ACTIVE_CONNECTION_STATE_DEACTIVATED => {
                    return Err(Error::Transport(
                        "connection attempt was deactivated by the service".to_string(),
                    ));
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                return Err(Error::Transport(format!(
                    "connection attempt timed out after {:?}",
                    self.connect_timeout
                )));
            }

            sleep(ACTIVATION_POLL_DELAY).await;
        }
    }

    async fn delete_profile(&self, profile_path: &OwnedObjectPath) {
        let deleted = async {
            SettingsConnectionProxy::builder(&self.connection)
                .path(profile_path.clone())?
                .build()
                .await?
                .delete()
                .await
        }
        .await;

        if let Err(e) = deleted {
            warn!("removing transient profile {profile_path} failed: {e}");
        }
    }
}
