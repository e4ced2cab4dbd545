use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Env, Target};
use log::{error, info};
use std::{
    io::Write,
    sync::Arc,
};
use wifi_connect::{
    api,
    config::AppConfig,
    error::Error,
    netman::{NetworkClient, wifi_devices},
    server_manager::{ModeEvent, ServerModeManager},
    utils, wifiap,
};

const MIN_PASSPHRASE_LEN: usize = 13;
const MANUAL_MODE_FLAG: &str = "manualMode";

#[derive(Parser)]
#[command(name = "wifi-connect", about = "Connectivity orchestration for headless devices", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Disable automatic state management, leaving the system as-is
    Stop,
    /// Re-enable automatic state management
    Start,
    /// Show the AP daemon configuration
    ShowAp,
    /// Set the AP ssid (causes AP restart if it is up)
    Ssid { ssid: String },
    /// Set the AP passphrase (causes AP restart if it is up)
    Passphrase { passphrase: String },
    /// List all network devices
    GetDevices,
    /// List wifi-capable network devices
    GetWifiDevices,
    /// List visible network names
    GetSsids,
    /// Report whether any wifi device is connected
    CheckConnected,
    /// Tear down active connections on all wifi devices
    DisconnectWifi,
    /// Report the managed flag of each wifi device
    WifisManaged,
    /// Hand an interface back to the network management service
    ManageIface { interface: String },
    /// Take an interface away from the network management service
    UnmanageIface { interface: String },
    /// Interactively pick a network and join it
    Connect,
    /// Run one of the two services until interrupted
    Server {
        #[arg(value_enum)]
        mode: ServerModeArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ServerModeArg {
    Management,
    Operational,
}

#[actix_web::main]
async fn main() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    if let Err(e) = run(Cli::parse()).await {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::get();
    let flag_file = config.paths.flag_dir.join(MANUAL_MODE_FLAG);

    match cli.command {
        Command::Stop => {
            utils::write_flag_file(&flag_file)?;
            println!(
                "Entering MANUAL mode. wifi-connect has stopped managing state. \
                 Use 'start' to restore normal operations"
            );
        }
        Command::Start => {
            utils::remove_flag_file(&flag_file)?;
            println!("Entering NORMAL mode.");
        }
        Command::ShowAp => {
            let ap = wifiap::Client::from_config(&config.wifi_ap);
            let configuration = ap.show().await?;
            utils::print_map_sorted(&configuration);
        }
        Command::Ssid { ssid } => {
            let ap = wifiap::Client::from_config(&config.wifi_ap);
            ap.set_ssid(&ssid).await?;
        }
        Command::Passphrase { passphrase } => {
            if passphrase.len() < MIN_PASSPHRASE_LEN {
                return Err(Error::Validation(format!(
                    "passphrase must be at least {MIN_PASSPHRASE_LEN} chars long"
                ))
                .into());
            }
            let ap = wifiap::Client::from_config(&config.wifi_ap);
            ap.set_passphrase(&passphrase).await?;
        }
        Command::GetDevices => {
            let client = NetworkClient::new(&config.netman).await?;
            for device in client.get_devices().await? {
                println!("{} ({:?}, managed: {})", device.interface, device.kind, device.managed);
            }
        }
        Command::GetWifiDevices => {
            let client = NetworkClient::new(&config.netman).await?;
            for device in wifi_devices(client.get_devices().await?) {
                println!("{} (managed: {})", device.interface, device.managed);
            }
        }
        Command::GetSsids => {
            let client = NetworkClient::new(&config.netman).await?;
            let (ssids, _, _) = client.ssids().await?;
            let names: Vec<&str> = ssids.iter().map(|s| s.name.trim()).collect();
            if !names.is_empty() {
                println!("{}", names.join(","));
            }
        }
        Command::CheckConnected => {
            let client = NetworkClient::new(&config.netman).await?;
            let wifi = wifi_devices(client.get_devices().await?);
            if client.connected_wifi(&wifi).await? {
                println!("Device is connected to external wifi AP");
            } else {
                println!("Device is not connected to external wifi AP");
            }
        }
        Command::DisconnectWifi => {
            let client = NetworkClient::new(&config.netman).await?;
            let wifi = wifi_devices(client.get_devices().await?);
            client.disconnect_wifi(&wifi).await?;
        }
        Command::WifisManaged => {
            let client = NetworkClient::new(&config.netman).await?;
            let wifi = wifi_devices(client.get_devices().await?);
            for (interface, managed) in client.wifis_managed(&wifi).await? {
                println!("{interface}: {managed}");
            }
        }
        Command::ManageIface { interface } => {
            set_iface_managed(config, &interface, true).await?;
        }
        Command::UnmanageIface { interface } => {
            set_iface_managed(config, &interface, false).await?;
        }
        Command::Connect => {
            connect_interactive(config).await?;
        }
        Command::Server { mode } => {
            run_server(config, mode).await?;
        }
    }

    Ok(())
}

async fn set_iface_managed(config: &AppConfig, interface: &str, managed: bool) -> Result<()> {
    let client = NetworkClient::new(&config.netman).await?;
    let wifi = wifi_devices(client.get_devices().await?);
    client.set_iface_managed(interface, managed, &wifi).await?;
    Ok(())
}

async fn connect_interactive(config: &AppConfig) -> Result<()> {
    let client = NetworkClient::new(&config.netman).await?;
    let (ssids, ap_to_device, ssid_to_ap) = client.ssids().await?;

    for ssid in &ssids {
        println!("    {}", ssid.name);
    }

    let ssid = prompt("Connect to network. Enter SSID: ")?;
    let passphrase = prompt("Enter passphrase: ")?;

    client
        .connect_ap(&ssid, &passphrase, &ap_to_device, &ssid_to_ap)
        .await?;
    println!("Connected to {ssid}");
    Ok(())
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    std::io::stdout().flush().context("failed to flush stdout")?;

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read input")?;
    Ok(line.trim().to_string())
}

async fn run_server(config: &'static AppConfig, mode: ServerModeArg) -> Result<()> {
    let manager = ServerModeManager::new(
        Arc::new(move || api::management_server(config)),
        Arc::new(move || api::operational_server(config)),
    );
    let mut events = manager.subscribe();

    match mode {
        ServerModeArg::Management => manager.start_management_server()?,
        ServerModeArg::Operational => manager.start_operational_server()?,
    }

    match events.recv().await {
        Ok(ModeEvent::Started(kind)) => info!("{kind} server running, ctrl-c to stop"),
        Ok(ModeEvent::StartFailed(_, e)) => bail!("could not start server: {e}"),
        Ok(other) => bail!("unexpected server event: {other:?}"),
        Err(e) => bail!("server event channel closed: {e}"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    info!("shutting down");

    match mode {
        ServerModeArg::Management => manager.shutdown_management_server().await?,
        ServerModeArg::Operational => manager.shutdown_operational_server().await?,
    }

    Ok(())
}
