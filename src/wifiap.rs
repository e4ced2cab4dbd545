//! Client for the local wifi-ap daemon.
//!
//! The daemon exposes its configuration as an open key/value map over a
//! unix socket. Writes are acknowledged synchronously; toggling the AP on
//! or off is verified by polling the status endpoint until the reported
//! active flag matches, since the configuration write and the actual AP
//! activation are decoupled in the daemon.

use crate::{
    config::WifiApConfig,
    error::Error,
    socket_client::{self, RawResponse},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::{path::PathBuf, time::Duration};
use tokio::time::sleep;

const CONFIGURATION_PATH: &str = "/v1/configuration";
const STATUS_PATH: &str = "/v1/status";

/// Transport over which requests to the daemon are sent. Swappable so tests
/// can substitute canned responses for the unix socket.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&self, path: &str) -> Result<RawResponse, Error>;
    async fn post(&self, path: &str, body: String) -> Result<RawResponse, Error>;
}

/// Production transport over the daemon's control socket.
pub struct UnixSocketTransport {
    socket_path: PathBuf,
}

impl Transport for UnixSocketTransport {
    async fn get(&self, path: &str) -> Result<RawResponse, Error> {
        socket_client::get(&self.socket_path, path).await
    }

    async fn post(&self, path: &str, body: String) -> Result<RawResponse, Error> {
        socket_client::post(&self.socket_path, path, body).await
    }
}

/// Response envelope common to all daemon endpoints.
#[derive(Deserialize)]
struct Envelope {
    result: Value,
    status: String,
    #[serde(rename = "status-code")]
    status_code: u16,
}

pub struct Client<T: Transport> {
    transport: T,
    poll_retries: u32,
    poll_delay: Duration,
}

impl Client<UnixSocketTransport> {
    pub fn from_config(config: &WifiApConfig) -> Self {
        Client::new(
            UnixSocketTransport {
                socket_path: config.socket_path.clone(),
            },
            config.poll_retries,
            config.poll_delay,
        )
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, poll_retries: u32, poll_delay: Duration) -> Self {
        Client {
            transport,
            poll_retries,
            poll_delay,
        }
    }

    /// Read the full daemon configuration. The map is returned as-is; the
    /// daemon's schema is a superset unknown in full to this client.
    pub async fn show(&self) -> Result<Map<String, Value>, Error> {
        let result = decode(self.transport.get(CONFIGURATION_PATH).await?)?;

        match result {
            Value::Object(map) => Ok(map),
            other => Err(Error::Transport(format!(
                "configuration is not an object: {other}"
            ))),
        }
    }

    /// Turn the AP on and wait until the daemon reports it active.
    pub async fn enable(&self) -> Result<(), Error> {
        self.write_configuration(json!({"disabled": "false"}))
            .await?;
        self.wait_for_ap_active(true).await
    }

    /// Turn the AP off and wait until the daemon reports it inactive.
    pub async fn disable(&self) -> Result<(), Error> {
        self.write_configuration(json!({"disabled": "true"}))
            .await?;
        self.wait_for_ap_active(false).await
    }

    /// Whether the AP is enabled in the daemon configuration.
    pub async fn enabled(&self) -> Result<bool, Error> {
        let config = self.show().await?;
        let disabled = config
            .get("disabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(!disabled)
    }

    pub async fn set_ssid(&self, ssid: &str) -> Result<(), Error> {
        self.write_configuration(json!({"wifi.ssid": ssid})).await
    }

    /// Set the AP passphrase. The daemon requires the security mode to be
    /// written alongside the passphrase.
    pub async fn set_passphrase(&self, passphrase: &str) -> Result<(), Error> {
        self.write_configuration(json!({
            "wifi.security": "wpa2",
            "wifi.security-passphrase": passphrase,
        }))
        .await
    }

    async fn write_configuration(&self, changes: Value) -> Result<(), Error> {
        let body = serde_json::to_string(&changes)
            .map_err(|e| Error::Transport(format!("encode configuration failed: {e}")))?;

        decode(self.transport.post(CONFIGURATION_PATH, body).await?).map(|_| ())
    }

    async fn wait_for_ap_active(&self, expected: bool) -> Result<(), Error> {
        // A failed status read consumes an attempt like a mismatching one;
        // only exhaustion of the budget surfaces an error.
        let mut last_error = None;
        for attempt in 0..self.poll_retries {
            if attempt > 0 {
                sleep(self.poll_delay).await;
            }

            match self.transport.get(STATUS_PATH).await.and_then(decode) {
                Ok(result) => {
                    if result.get("ap.active").and_then(Value::as_bool) == Some(expected) {
                        return Ok(());
                    }
                    last_error = None;
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => e,
            None => Error::Transport(format!(
                "AP did not reach active={expected} after {} status polls",
                self.poll_retries
            )),
        })
    }
}

fn decode(raw: RawResponse) -> Result<Value, Error> {
    if !raw.status.is_success() {
        return Err(Error::Transport(format!(
            "daemon returned HTTP {}",
            raw.status
        )));
    }

    let envelope: Envelope = serde_json::from_str(&raw.body)
        .map_err(|e| Error::Transport(format!("decode response envelope failed: {e}")))?;

    if envelope.status != "OK" || !(200..300).contains(&envelope.status_code) {
        return Err(Error::Transport(format!(
            "daemon returned status {} ({})",
            envelope.status, envelope.status_code
        )));
    }

    Ok(envelope.result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::StatusCode;
    use std::sync::Mutex;

    const SHOW_BODY: &str = r#"{"result":{
        "debug":false,
        "dhcp.lease-time": "12h",
        "dhcp.range-start": "10.0.60.2",
        "dhcp.range-stop": "10.0.60.199",
        "disabled": true,
        "share.disabled": false,
        "share-network-interface": "tun0",
        "wifi-address": "10.0.60.1",
        "wifi.channel": "6",
        "wifi.hostapd-driver": "nl80211",
        "wifi.interface": "wlan0",
        "wifi.interface-mode": "direct",
        "wifi.netmask": "255.255.255.0",
        "wifi.operation-mode": "g",
        "wifi.security": "wpa2",
        "wifi.security-passphrase": "passphrase123",
        "wifi.ssid": "AP"},"status":"OK","status-code":200,"type":"sync"}"#;

    const EMPTY_OK: &str = r#"{"result":{},"status":"OK","status-code":200,"type":"sync"}"#;

    fn ok(body: &str) -> Result<RawResponse, Error> {
        Ok(RawResponse {
            status: StatusCode::OK,
            body: body.to_string(),
        })
    }

    fn client<T: Transport>(transport: T) -> Client<T> {
        Client::new(transport, 3, Duration::ZERO)
    }

    fn parse_changes(body: &str) -> Map<String, Value> {
        serde_json::from_str::<Value>(body)
            .expect("request body is not json")
            .as_object()
            .expect("request body is not an object")
            .clone()
    }

    struct ShowTransport;

    impl Transport for ShowTransport {
        async fn get(&self, path: &str) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/configuration");
            ok(SHOW_BODY)
        }

        async fn post(&self, path: &str, _body: String) -> Result<RawResponse, Error> {
            panic!("unexpected POST to {path}");
        }
    }

    #[tokio::test]
    async fn show_round_trips_full_configuration() {
        let config = client(ShowTransport).show().await.expect("show failed");

        assert_eq!(config.len(), 17);
        assert_eq!(config["debug"], Value::Bool(false));
        assert_eq!(config["dhcp.lease-time"], "12h");
        assert_eq!(config["dhcp.range-start"], "10.0.60.2");
        assert_eq!(config["dhcp.range-stop"], "10.0.60.199");
        assert_eq!(config["disabled"], Value::Bool(true));
        assert_eq!(config["share.disabled"], Value::Bool(false));
        assert_eq!(config["share-network-interface"], "tun0");
        assert_eq!(config["wifi-address"], "10.0.60.1");
        assert_eq!(config["wifi.channel"], "6");
        assert_eq!(config["wifi.hostapd-driver"], "nl80211");
        assert_eq!(config["wifi.interface"], "wlan0");
        assert_eq!(config["wifi.interface-mode"], "direct");
        assert_eq!(config["wifi.netmask"], "255.255.255.0");
        assert_eq!(config["wifi.operation-mode"], "g");
        assert_eq!(config["wifi.security"], "wpa2");
        assert_eq!(config["wifi.security-passphrase"], "passphrase123");
        assert_eq!(config["wifi.ssid"], "AP");
    }

    struct ToggleTransport {
        expected_disabled: &'static str,
        reported_active: bool,
    }

    impl Transport for ToggleTransport {
        async fn get(&self, path: &str) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/status");
            ok(&format!(
                r#"{{"result":{{"ap.active": {}}},"status":"OK","status-code":200,"type":"sync"}}"#,
                self.reported_active
            ))
        }

        async fn post(&self, path: &str, body: String) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/configuration");
            let changes = parse_changes(&body);
            assert_eq!(changes.len(), 1);
            assert_eq!(changes["disabled"], self.expected_disabled);
            ok(EMPTY_OK)
        }
    }

    #[tokio::test]
    async fn enable_writes_disabled_false_and_polls_status() {
        let transport = ToggleTransport {
            expected_disabled: "false",
            reported_active: true,
        };
        client(transport).enable().await.expect("enable failed");
    }

    #[tokio::test]
    async fn disable_writes_disabled_true_and_polls_status() {
        let transport = ToggleTransport {
            expected_disabled: "true",
            reported_active: false,
        };
        client(transport).disable().await.expect("disable failed");
    }

    // Status endpoint that fails on its first read and recovers afterwards.
    struct FlakyStatusTransport {
        calls: Mutex<u32>,
    }

    impl Transport for FlakyStatusTransport {
        async fn get(&self, path: &str) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/status");
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Err(Error::Transport("status endpoint unavailable".to_string()))
            } else {
                ok(r#"{"result":{"ap.active": true},"status":"OK","status-code":200,"type":"sync"}"#)
            }
        }

        async fn post(&self, path: &str, _body: String) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/configuration");
            ok(EMPTY_OK)
        }
    }

    #[tokio::test]
    async fn enable_retries_status_poll_after_transport_error() {
        let transport = FlakyStatusTransport {
            calls: Mutex::new(0),
        };
        client(transport).enable().await.expect("enable failed");
    }

    #[tokio::test]
    async fn enable_surfaces_last_poll_error_after_budget() {
        struct DownStatusTransport;

        impl Transport for DownStatusTransport {
            async fn get(&self, path: &str) -> Result<RawResponse, Error> {
                assert_eq!(path, "/v1/status");
                Err(Error::Transport("status endpoint unavailable".to_string()))
            }

            async fn post(&self, _path: &str, _body: String) -> Result<RawResponse, Error> {
                ok(EMPTY_OK)
            }
        }

        let err = client(DownStatusTransport).enable().await.unwrap_err();
        assert!(err.to_string().contains("status endpoint unavailable"));
    }

    #[tokio::test]
    async fn enable_exhausts_poll_budget_when_ap_stays_down() {
        let transport = ToggleTransport {
            expected_disabled: "false",
            reported_active: false,
        };
        let err = client(transport).enable().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    struct EnabledTransport {
        disabled: bool,
    }

    impl Transport for EnabledTransport {
        async fn get(&self, path: &str) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/configuration");
            ok(&format!(
                r#"{{"result":{{"disabled": {}}},"status":"OK","status-code":200,"type":"sync"}}"#,
                self.disabled
            ))
        }

        async fn post(&self, path: &str, _body: String) -> Result<RawResponse, Error> {
            panic!("unexpected POST to {path}");
        }
    }

    #[tokio::test]
    async fn enabled_negates_the_disabled_key() {
        let enabled = client(EnabledTransport { disabled: false })
            .enabled()
            .await
            .expect("enabled failed");
        assert!(enabled);

        let enabled = client(EnabledTransport { disabled: true })
            .enabled()
            .await
            .expect("enabled failed");
        assert!(!enabled);
    }

    struct WriteTransport {
        expected: Vec<(&'static str, &'static str)>,
    }

    impl Transport for WriteTransport {
        async fn get(&self, path: &str) -> Result<RawResponse, Error> {
            panic!("unexpected GET to {path}");
        }

        async fn post(&self, path: &str, body: String) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/configuration");
            let changes = parse_changes(&body);
            assert_eq!(changes.len(), self.expected.len());
            for (key, value) in &self.expected {
                assert_eq!(changes[*key], *value);
            }
            ok(EMPTY_OK)
        }
    }

    #[tokio::test]
    async fn set_ssid_writes_the_ssid_key() {
        let transport = WriteTransport {
            expected: vec![("wifi.ssid", "MySsid")],
        };
        client(transport)
            .set_ssid("MySsid")
            .await
            .expect("set_ssid failed");
    }

    #[tokio::test]
    async fn set_passphrase_writes_passphrase_and_security_mode() {
        let transport = WriteTransport {
            expected: vec![
                ("wifi.security", "wpa2"),
                ("wifi.security-passphrase", "passphrase123"),
            ],
        };
        client(transport)
            .set_passphrase("passphrase123")
            .await
            .expect("set_passphrase failed");
    }

    // In-memory daemon that applies configuration writes, for toggle
    // round-trip coverage across both endpoints.
    struct FakeDaemon {
        disabled: Mutex<bool>,
    }

    impl Transport for FakeDaemon {
        async fn get(&self, path: &str) -> Result<RawResponse, Error> {
            let disabled = *self.disabled.lock().unwrap();
            match path {
                "/v1/configuration" => ok(&format!(
                    r#"{{"result":{{"disabled": {disabled}}},"status":"OK","status-code":200,"type":"sync"}}"#
                )),
                "/v1/status" => ok(&format!(
                    r#"{{"result":{{"ap.active": {}}},"status":"OK","status-code":200,"type":"sync"}}"#,
                    !disabled
                )),
                other => panic!("unexpected GET to {other}"),
            }
        }

        async fn post(&self, path: &str, body: String) -> Result<RawResponse, Error> {
            assert_eq!(path, "/v1/configuration");
            let changes = parse_changes(&body);
            if let Some(value) = changes.get("disabled") {
                *self.disabled.lock().unwrap() = *value == "true";
            }
            ok(EMPTY_OK)
        }
    }

    #[tokio::test]
    async fn enable_then_enabled_reports_true() {
        let daemon = client(FakeDaemon {
            disabled: Mutex::new(true),
        });

        daemon.enable().await.expect("enable failed");
        assert!(daemon.enabled().await.expect("enabled failed"));

        daemon.disable().await.expect("disable failed");
        assert!(!daemon.enabled().await.expect("enabled failed"));
    }

    #[tokio::test]
    async fn non_ok_status_is_a_transport_error() {
        struct FailingTransport;

        impl Transport for FailingTransport {
            async fn get(&self, _path: &str) -> Result<RawResponse, Error> {
                ok(r#"{"result":{},"status":"Bad Request","status-code":400,"type":"error"}"#)
            }

            async fn post(&self, _path: &str, _body: String) -> Result<RawResponse, Error> {
                panic!("unexpected POST");
            }
        }

        let err = client(FailingTransport).show().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
