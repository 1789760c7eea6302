use clap::Parser;
use parking_lot::RwLock;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static CLI_CONFIG: OnceLock<Arc<RwLock<CliConfig>>> = OnceLock::new();

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub listen_addr: SocketAddr,
    pub service: String,
    pub registry_file_location: PathBuf,
    pub refresh_interval: Duration,
    pub connect_timeout: Duration,
    pub max_idle: usize,
    pub max_active: Option<usize>,
    pub idle_timeout: Option<Duration>,
    pub evict_after: Option<u32>,
    pub log_level: LogLevel,
}

impl CliConfig {
    pub fn init() {
        CLI_CONFIG.get_or_init(|| {
            let cfg = Self::from_args(Args::parse());
            Arc::new(RwLock::new(cfg))
        });
    }

    pub fn snapshot() -> CliConfig {
        handle().read().clone()
    }
}

// -----------------------------------------------------------------------------
// ----- CliConfig: Private ----------------------------------------------------

impl CliConfig {
    fn from_args(args: Args) -> Self {
        Self {
            listen_addr: SocketAddr::from((args.host, args.listen_port)),
            service: args.service,
            registry_file_location: args.registry_file,
            refresh_interval: args.refresh_interval,
            connect_timeout: args.connect_timeout,
            max_idle: args.max_idle,
            max_active: args.max_active,
            idle_timeout: args.idle_timeout,
            evict_after: args.evict_after,
            log_level: args.log_level,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "fwdproxy", version, about = "TCP forward proxy for a discovered service")]
struct Args {
    #[arg(short = 'l', long = "listen-port", env = "FWDPROXY_PORT", default_value_t = 8080)]
    listen_port: u16,

    // IPv4 or IPv6 literal to bind.
    #[arg(short = 'H', long = "host", env = "FWDPROXY_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    // Service name looked up in the registry. Required.
    #[arg(short = 's', long = "service", env = "FWDPROXY_SERVICE")]
    service: String,

    #[arg(long = "registry", env = "FWDPROXY_REGISTRY_FILE", default_value = "registry.toml")]
    registry_file: PathBuf,

    #[arg(long, env = "FWDPROXY_REFRESH_INTERVAL", default_value = "15s", value_parser = humantime::parse_duration)]
    refresh_interval: Duration,

    #[arg(long, env = "FWDPROXY_CONNECT_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    connect_timeout: Duration,

    #[arg(long, env = "FWDPROXY_MAX_IDLE", default_value_t = 30)]
    max_idle: usize,

    // Unset: no cap on connections open to one endpoint.
    #[arg(long, env = "FWDPROXY_MAX_ACTIVE")]
    max_active: Option<usize>,

    // Unset: sessions may stay silent indefinitely.
    #[arg(long, env = "FWDPROXY_IDLE_TIMEOUT", value_parser = humantime::parse_duration)]
    idle_timeout: Option<Duration>,

    // Unset: pools are never evicted.
    #[arg(long, env = "FWDPROXY_EVICT_AFTER")]
    evict_after: Option<u32>,

    #[arg(long = "log", env = "FWDPROXY_LOG", default_value = "info")]
    log_level: LogLevel,
}

// -----------------------------------------------------------------------------
// ----- Private Utils ---------------------------------------------------------

fn handle() -> Arc<RwLock<CliConfig>> {
    CLI_CONFIG
        .get()
        .expect("config not initialized; call Config::init() first")
        .clone()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
