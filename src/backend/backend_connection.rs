use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpStream, sync::OwnedSemaphorePermit, time};

use crate::discovery::Endpoint;
use crate::errors::DialError;

// -----------------------------------------------------------------------------
// ----- BackendConnection -----------------------------------------------------

/// One outbound socket to a backend. When the pool caps open connections the
/// permit rides along, so it is released exactly when the socket is dropped.
#[derive(Debug)]
pub struct BackendConnection {
    endpoint: Endpoint,
    stream: TcpStream,
    permit: Option<OwnedSemaphorePermit>,
}

// -----------------------------------------------------------------------------
// ----- BackendConnection: Static ---------------------------------------------

impl BackendConnection {
    pub async fn connect(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Result<Self, DialError> {
        let stream = time::timeout(connect_timeout, TcpStream::connect(endpoint.as_str()))
            .await
            .map_err(|_| DialError::Timeout {
                endpoint: endpoint.clone(),
                after: connect_timeout,
            })?
            .map_err(|e| DialError::Connect {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        let _ = stream.set_nodelay(true);

        Ok(Self {
            endpoint: endpoint.clone(),
            stream,
            permit,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- BackendConnection: Public ---------------------------------------------

impl BackendConnection {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Hand the socket to the relay. Keep the permit alive for as long as the
    /// socket is open.
    pub fn into_parts(self) -> (TcpStream, Option<OwnedSemaphorePermit>) {
        (self.stream, self.permit)
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
