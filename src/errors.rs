use std::{net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::discovery::Endpoint;

// -----------------------------------------------------------------------------
// ----- RegistryError ---------------------------------------------------------

/// A failed registry query. Never fatal: the directory keeps its last
/// successful snapshot.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("read error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

// -----------------------------------------------------------------------------
// ----- DialError -------------------------------------------------------------

/// Failure to obtain an outbound connection from one endpoint's pool.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("connect to {endpoint} timed out after {after:?}")]
    Timeout { endpoint: Endpoint, after: Duration },

    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: Endpoint,
        source: std::io::Error,
    },

    #[error("endpoint {endpoint} already has {limit} open connections")]
    Saturated { endpoint: Endpoint, limit: usize },
}

impl DialError {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            DialError::Timeout { endpoint, .. }
            | DialError::Connect { endpoint, .. }
            | DialError::Saturated { endpoint, .. } => endpoint,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ProxyError ------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("cannot listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("dispatcher is not listening; call listen() first")]
    NotListening,

    #[error("no reachable endpoint for service '{service}' ({attempted} tried)")]
    NoReachableEndpoint { service: String, attempted: usize },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
