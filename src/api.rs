//! Captive-portal and operational status handlers, plus the server
//! factories handed to the mode manager.

use crate::{
    config::{AppConfig, NetmanConfig},
    error::Error,
    netman::{NetworkClient, Ssid, wifi_devices},
};
use actix_files::Files;
use actix_web::{App, HttpResponse, HttpServer, Responder, dev::Server, web};
use log::{debug, error};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ConnectForm {
    ssid: String,
    passphrase: Option<String>,
}

/// Per-service handler state. Network clients are created per request so
/// every page reflects the live service state.
#[derive(Clone)]
pub struct Api {
    pub netman_config: NetmanConfig,
}

impl Api {
    /// List visible networks as a selection form.
    pub async fn ssids_page(config: web::Data<Api>) -> impl Responder {
        debug!("ssids_page() called");

        let page = async {
            let client = NetworkClient::new(&config.netman_config).await?;
            let (ssids, _, _) = client.ssids().await?;
            Ok::<_, Error>(render_ssids_page(&ssids))
        }
        .await;

        match page {
            Ok(html) => html_response(html),
            Err(e) => {
                error!("listing networks failed: {e}");
                HttpResponse::InternalServerError().body(format!("{e}"))
            }
        }
    }

    /// Read the submitted network name and credential and try to join.
    pub async fn connect(form: web::Form<ConnectForm>, config: web::Data<Api>) -> impl Responder {
        let ssid = form.ssid.trim();
        if ssid.is_empty() {
            error!("connect request without a network name");
            return HttpResponse::BadRequest().body("no network selected");
        }

        debug!("connecting to {ssid}...");

        let outcome = async {
            let client = NetworkClient::new(&config.netman_config).await?;
            let (_, ap_to_device, ssid_to_ap) = client.ssids().await?;
            client
                .connect_ap(
                    ssid,
                    form.passphrase.as_deref().unwrap_or(""),
                    &ap_to_device,
                    &ssid_to_ap,
                )
                .await
        }
        .await;

        match outcome {
            Ok(()) => html_response(render_connect_result(ssid, None)),
            Err(e @ Error::NotFound(_)) => {
                error!("connect to {ssid} failed: {e}");
                HttpResponse::NotFound().body(format!("{e}"))
            }
            Err(e) => {
                error!("connect to {ssid} failed: {e}");
                html_response(render_connect_result(ssid, Some(&e.to_string())))
            }
        }
    }

    /// Operational page: upstream connection state plus a disconnect action.
    pub async fn status_page(config: web::Data<Api>) -> impl Responder {
        debug!("status_page() called");

        let page = async {
            let client = NetworkClient::new(&config.netman_config).await?;
            let wifi = wifi_devices(client.get_devices().await?);
            let connected = client.connected_wifi(&wifi).await?;
            Ok::<_, Error>(render_status_page(connected))
        }
        .await;

        match page {
            Ok(html) => html_response(html),
            Err(e) => {
                error!("reading connection status failed: {e}");
                HttpResponse::InternalServerError().body(format!("{e}"))
            }
        }
    }

    /// Tear down upstream connections on all wifi devices.
    pub async fn disconnect(config: web::Data<Api>) -> impl Responder {
        debug!("disconnect() called");

        let outcome = async {
            let client = NetworkClient::new(&config.netman_config).await?;
            let wifi = wifi_devices(client.get_devices().await?);
            client.disconnect_wifi(&wifi).await
        }
        .await;

        match outcome {
            Ok(()) => html_response("<p>Disconnected.</p>".to_string()),
            Err(e) => {
                error!("disconnect failed: {e}");
                HttpResponse::InternalServerError().body(format!("{e}"))
            }
        }
    }
}

/// Bound, ready-to-run captive-portal server.
pub fn management_server(config: &AppConfig) -> anyhow::Result<Server> {
    let api = Api {
        netman_config: config.netman.clone(),
    };
    let static_dir = config.paths.static_dir.clone();

    let server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(api.clone()))
            .route("/", web::get().to(Api::ssids_page))
            .route("/connect", web::post().to(Api::connect));

        if static_dir.is_dir() {
            app = app.service(Files::new("/static", &static_dir));
        }

        app
    })
    .bind(&config.server.management_address)?
    .disable_signals()
    .run();

    Ok(server)
}

/// Bound, ready-to-run operational status server.
pub fn operational_server(config: &AppConfig) -> anyhow::Result<Server> {
    let api = Api {
        netman_config: config.netman.clone(),
    };

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(api.clone()))
            .route("/", web::get().to(Api::status_page))
            .route("/disconnect", web::post().to(Api::disconnect))
    })
    .bind(&config.server.operational_address)?
    .disable_signals()
    .run();

    Ok(server)
}

fn html_response(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn render_ssids_page(ssids: &[Ssid]) -> String {
    let mut rows = String::new();
    for ssid in ssids {
        let name = escape_html(&ssid.name);
        rows.push_str(&format!(
            "<input type='radio' name='ssid' value='{name}'>{name} ({}%, {})<br>\n",
            ssid.strength, ssid.security
        ));
    }

    format!(
        "<h1>Choose a network</h1>\n\
         <form method='post' action='/connect'>\n{rows}\
         <label>Passphrase: <input type='password' name='passphrase'></label><br>\n\
         <input type='submit' value='Connect'>\n</form>\n"
    )
}

fn render_connect_result(ssid: &str, failure: Option<&str>) -> String {
    let ssid = escape_html(ssid);
    match failure {
        None => format!("<p>Connected to {ssid}. This access point is shutting down.</p>"),
        Some(reason) => format!(
            "<p>Could not connect to {ssid}: {}</p><p><a href='/'>Try again</a></p>",
            escape_html(reason)
        ),
    }
}

fn render_status_page(connected: bool) -> String {
    let state = if connected {
        "Device is connected to an external wifi network."
    } else {
        "Device is not connected."
    };

    format!(
        "<p>{state}</p>\n\
         <form method='post' action='/disconnect'>\n\
         <input type='submit' value='Disconnect'>\n</form>\n"
    )
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
