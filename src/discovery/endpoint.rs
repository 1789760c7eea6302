use std::{fmt, sync::Arc};

// -----------------------------------------------------------------------------
// ----- Endpoint --------------------------------------------------------------

/// One backend address in `host:port` form. Opaque to everything but the dialer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint(Arc<str>);

// -----------------------------------------------------------------------------
// ----- Endpoint: Static ------------------------------------------------------

impl Endpoint {
    pub fn new(hostport: impl Into<String>) -> Self {
        Endpoint(Arc::from(hostport.into()))
    }

    /// Joins host and port, bracketing IPv6 literals (`[::1]:80`).
    pub fn from_host_port(host: &str, port: u16) -> Self {
        let host = host.trim();
        if host.contains(':') && !host.starts_with('[') {
            Self::new(format!("[{host}]:{port}"))
        } else {
            Self::new(format!("{host}:{port}"))
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Endpoint: Public ------------------------------------------------------

impl Endpoint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.to_string())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
