//! D-Bus proxies for the org.freedesktop.NetworkManager objects this
//! daemon talks to. Only the members the client actually uses are bound.

use std::collections::HashMap;
use zbus::{
    Result, proxy,
    zvariant::{ObjectPath, OwnedObjectPath, Value},
};

#[proxy(
    interface = "org.freedesktop.NetworkManager",
    default_service = "org.freedesktop.NetworkManager",
    default_path = "/org/freedesktop/NetworkManager"
)]
pub trait NetworkManager {
    /// Object paths of all network devices known to the service.
    fn get_devices(&self) -> Result<Vec<OwnedObjectPath>>;

    /// Create a connection profile from partial settings and activate it on
    /// `device` against `specific_object` (the target access point).
    /// Returns the created profile path and the active connection path.
    fn add_and_activate_connection(
        &self,
        connection: HashMap<&str, HashMap<&str, Value<'_>>>,
        device: &ObjectPath<'_>,
        specific_object: &ObjectPath<'_>,
    ) -> Result<(OwnedObjectPath, OwnedObjectPath)>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait Device {
    /// Tear down the device's active connection.
    fn disconnect(&self) -> Result<()>;

    /// NM_DEVICE_TYPE_* (2 = wifi).
    #[zbus(property)]
    fn device_type(&self) -> Result<u32>;

    /// Kernel interface name, e.g. "wlan0".
    #[zbus(property)]
    fn interface(&self) -> Result<String>;

    /// Whether NetworkManager currently controls this device.
    #[zbus(property)]
    fn managed(&self) -> Result<bool>;

    #[zbus(property)]
    fn set_managed(&self, managed: bool) -> Result<()>;

    /// NM_DEVICE_STATE_* (100 = activated).
    #[zbus(property)]
    fn state(&self) -> Result<u32>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.Device.Wireless",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait WirelessDevice {
    /// Access points visible on the device as of the last scan.
    fn get_access_points(&self) -> Result<Vec<OwnedObjectPath>>;

    fn request_scan(&self, options: HashMap<&str, Value<'_>>) -> Result<()>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.AccessPoint",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait AccessPoint {
    /// SSID as raw bytes (may not be valid UTF-8).
    #[zbus(property)]
    fn ssid(&self) -> Result<Vec<u8>>;

    /// Signal strength as percentage (0-100).
    #[zbus(property)]
    fn strength(&self) -> Result<u8>;

    /// General capability flags (bit 0 = privacy/WEP).
    #[zbus(property)]
    fn flags(&self) -> Result<u32>;

    /// WPA security flags.
    #[zbus(property)]
    fn wpa_flags(&self) -> Result<u32>;

    /// RSN/WPA2 security flags.
    #[zbus(property)]
    fn rsn_flags(&self) -> Result<u32>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.Connection.Active",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait ActiveConnection {
    /// NM_ACTIVE_CONNECTION_STATE_* (2 = activated, 4 = deactivated).
    #[zbus(property)]
    fn state(&self) -> Result<u32>;
}

#[proxy(
    interface = "org.freedesktop.NetworkManager.Settings.Connection",
    default_service = "org.freedesktop.NetworkManager"
)]
pub trait SettingsConnection {
    /// Remove the stored connection profile.
    fn delete(&self) -> Result<()>;
}
