pub mod api;
pub mod config;
pub mod error;
pub mod netman;
pub mod server_manager;
pub mod socket_client;
pub mod utils;
pub mod wifiap;
