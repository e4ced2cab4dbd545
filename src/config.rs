use anyhow::{Context, Result};
use std::{env, path::PathBuf, sync::OnceLock, time::Duration};

/// Application configuration loaded from environment variables at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Captive portal and operational status server configuration
    pub server: ServerConfig,

    /// Local AP daemon client configuration
    pub wifi_ap: WifiApConfig,

    /// NetworkManager client configuration
    pub netman: NetmanConfig,

    /// Filesystem paths
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub management_address: String,
    pub operational_address: String,
}

#[derive(Clone, Debug)]
pub struct WifiApConfig {
    pub socket_path: PathBuf,
    pub poll_retries: u32,
    pub poll_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct NetmanConfig {
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub flag_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl AppConfig {
    /// Get or load the application configuration.
    ///
    /// # Panics
    /// Panics if configuration loading fails. This is intentional as the
    /// daemon cannot function without valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG
            .get_or_init(|| Self::load().expect("failed to load application configuration"))
    }

    fn load() -> Result<Self> {
        Ok(Self {
            server: ServerConfig::load()?,
            wifi_ap: WifiApConfig::load()?,
            netman: NetmanConfig::load()?,
            paths: PathConfig::load()?,
        })
    }
}

impl ServerConfig {
    fn load() -> Result<Self> {
        let management_address =
            env::var("MANAGEMENT_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let operational_address =
            env::var("OPERATIONAL_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        Ok(Self {
            management_address,
            operational_address,
        })
    }
}

impl WifiApConfig {
    fn load() -> Result<Self> {
        let socket_path = env::var("WIFI_AP_SOCKET")
            .unwrap_or_else(|_| "/var/snap/wifi-ap/current/sockets/control".to_string())
            .into();

        let poll_retries = env::var("WIFI_AP_POLL_RETRIES")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .context("failed to parse WIFI_AP_POLL_RETRIES: invalid format")?;

        let poll_delay_ms = env::var("WIFI_AP_POLL_DELAY_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse::<u64>()
            .context("failed to parse WIFI_AP_POLL_DELAY_MS: invalid format")?;

        Ok(Self {
            socket_path,
            poll_retries,
            poll_delay: Duration::from_millis(poll_delay_ms),
        })
    }
}

impl NetmanConfig {
    fn load() -> Result<Self> {
        let connect_timeout_secs = env::var("NM_CONNECT_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("failed to parse NM_CONNECT_TIMEOUT_SECS: invalid format")?;

        Ok(Self {
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let flag_dir = env::var("SNAP_COMMON")
            .unwrap_or_else(|_| std::env::temp_dir().display().to_string())
            .into();

        let static_dir = env::var("STATIC_DIR")
            .unwrap_or_else(|_| "static".to_string())
            .into();

        Ok(Self {
            flag_dir,
            static_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_environment() {
        let config = AppConfig::load().expect("default config should load");
        assert_eq!(config.wifi_ap.poll_retries, 10);
        assert_eq!(config.wifi_ap.poll_delay, Duration::from_millis(500));
        assert_eq!(config.netman.connect_timeout, Duration::from_secs(30));
        assert!(config.server.management_address.ends_with(":8080"));
        assert!(config.server.operational_address.ends_with(":8081"));
    }
}
