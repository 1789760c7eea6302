use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use fwdproxy::analytics::format_stats;
use fwdproxy::{Config, Dispatcher, EndpointDirectory, FileRegistry, ProxyError};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "fwdproxy";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    setup();
    run_forever().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init();

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run_forever() -> Result<(), ProxyError> {
    let config = Config::snapshot();

    let registry = Arc::new(FileRegistry::new(&config.registry_file));
    let directory = Arc::new(EndpointDirectory::new(
        config.service.clone(),
        registry,
        config.refresh_interval,
    ));
    directory.start();

    let dispatcher = Arc::new(Dispatcher::new(directory.clone(), config.dispatcher.clone()));
    if let Err(err) = dispatcher.listen(config.listen_addr) {
        error!("{APP_NAME} cannot start: {err}");
        directory.stop().await;
        return Err(err);
    }

    let accept = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.accept().await })
    };

    if let Err(err) = signal::ctrl_c().await {
        error!("cannot listen for shutdown signal: {err}");
    }
    info!("{APP_NAME} shutting down");

    dispatcher.close();
    match accept.await {
        Ok(res) => res?,
        Err(err) => error!("accept loop ended abnormally: {err}"),
    }
    directory.stop().await;

    info!("{}", format_stats(dispatcher.stats()));
    Ok(())
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
