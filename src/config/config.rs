use parking_lot::RwLock;
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use super::{cli::CliConfig, types::LogLevel};
use crate::gateway::{DispatcherSettings, PoolSettings};
use crate::net::RelaySettings;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceLock<Arc<RwLock<Config>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub service: String,
    pub registry_file: PathBuf,
    pub refresh_interval: Duration,
    pub dispatcher: DispatcherSettings,
    pub log_level: LogLevel,
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Parses CLI/ENV. Exits with usage on bad input.
    pub fn init() {
        CliConfig::init();

        let next = Self::from_cli(CliConfig::snapshot());
        if let Some(handle) = ROOT_CONFIG.get() {
            *handle.write() = next;
        } else {
            let _ = ROOT_CONFIG.set(Arc::new(RwLock::new(next)));
        }
    }

    pub fn snapshot() -> Config {
        Self::handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    fn from_cli(cli: CliConfig) -> Self {
        let dispatcher = DispatcherSettings {
            pool: PoolSettings {
                max_idle: cli.max_idle,
                connect_timeout: cli.connect_timeout,
                max_active: cli.max_active,
            },
            relay: RelaySettings {
                idle_timeout: cli.idle_timeout,
                ..RelaySettings::default()
            },
            evict_after: cli.evict_after,
        };

        Config {
            listen_addr: cli.listen_addr,
            service: cli.service,
            registry_file: cli.registry_file_location,
            refresh_interval: cli.refresh_interval,
            dispatcher,
            log_level: cli.log_level,
        }
    }

    fn handle() -> Arc<RwLock<Config>> {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init() first")
            .clone()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
