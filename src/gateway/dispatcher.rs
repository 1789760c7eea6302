use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream},
    sync::watch,
    time,
};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::pool::{GatewayPools, PoolSettings};
use super::session::{GatewaySession, SessionState};
use crate::analytics::{DispatcherSnapshot, DispatcherStats};
use crate::backend::BackendConnection;
use crate::discovery::EndpointDirectory;
use crate::errors::ProxyError;
use crate::net::{RelayReport, RelaySettings, relay};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const LISTEN_BACKLOG: u32 = 1024;
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

// -----------------------------------------------------------------------------
// ----- DispatcherSettings ----------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DispatcherSettings {
    pub pool: PoolSettings,
    pub relay: RelaySettings,
    /// Drop an endpoint's pool after it is missing from this many observed
    /// directory generations in a row. `None` keeps pools forever.
    pub evict_after: Option<u32>,
}

// -----------------------------------------------------------------------------
// ----- Dispatcher ------------------------------------------------------------

/// Accepts clients, picks a backend for each and relays between them.
#[derive(Debug)]
pub struct Dispatcher {
    directory: Arc<EndpointDirectory>,
    pools: GatewayPools,
    relay: RelaySettings,
    evict_after: Option<u32>,
    seen_generation: AtomicU64,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    stats: DispatcherStats,
}

// -----------------------------------------------------------------------------
// ----- Dispatcher: Static ----------------------------------------------------

impl Dispatcher {
    pub fn new(directory: Arc<EndpointDirectory>, settings: DispatcherSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            directory,
            pools: GatewayPools::new(settings.pool),
            relay: settings.relay,
            evict_after: settings.evict_after,
            seen_generation: AtomicU64::new(0),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            shutdown,
            stats: DispatcherStats::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Dispatcher: Public ----------------------------------------------------

impl Dispatcher {
    pub fn service(&self) -> &str {
        self.directory.service()
    }

    pub fn pools(&self) -> &GatewayPools {
        &self.pools
    }

    pub fn stats(&self) -> DispatcherSnapshot {
        self.stats.snapshot()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Bind the listening socket. A failure here is fatal for the process.
    pub fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, ProxyError> {
        let listen_err = |source| ProxyError::Listen { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        let socket = socket.map_err(listen_err)?;

        socket.set_reuseaddr(true).map_err(listen_err)?;
        socket.bind(addr).map_err(listen_err)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(listen_err)?;
        let bound = listener.local_addr().map_err(listen_err)?;

        info!("listening on {bound} for service '{}'", self.service());

        *self.listener.lock() = Some(listener);
        *self.local_addr.lock() = Some(bound);
        Ok(bound)
    }

    /// Accept until `close` is called. Every client gets its own task; this
    /// loop never waits on a session.
    pub async fn accept(self: &Arc<Self>) -> Result<(), ProxyError> {
        // closed before this loop ever ran
        if *self.shutdown.borrow() {
            return Ok(());
        }

        let listener = self.listener.lock().take().ok_or(ProxyError::NotListening)?;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(&mut shutdown) => {
                    info!("accept loop for '{}' shutting down", self.service());
                    break;
                }

                accept_res = listener.accept() => {
                    let (stream, peer) = match accept_res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            time::sleep(ACCEPT_ERROR_PAUSE).await;
                            continue;
                        }
                    };

                    let _ = stream.set_nodelay(true);

                    let dispatcher = Arc::clone(self);
                    tokio::spawn(async move {
                        let _ = dispatcher.handle_session(stream, peer).await;
                    });
                }
            }
        }

        Ok(())
    }

    /// Stop accepting and close the listening socket. In-flight sessions are
    /// left to finish on their own.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
        drop(self.listener.lock().take());
    }

    /// Try every endpoint of the current snapshot once, in random order, and
    /// return the first connection that comes up.
    pub async fn select_outbound(&self) -> Result<BackendConnection, ProxyError> {
        let (generation, mut endpoints) = self.directory.snapshot_with_generation();
        self.retire_stale_pools(generation, &endpoints);

        endpoints.sort();
        endpoints.dedup();
        endpoints.shuffle(&mut rand::rng());

        for endpoint in &endpoints {
            let pool = self.pools.get_or_create(endpoint);
            match pool.acquire().await {
                Ok(conn) => return Ok(conn),
                Err(err) => warn!("{err}; trying next endpoint"),
            }
        }

        Err(ProxyError::NoReachableEndpoint {
            service: self.service().to_string(),
            attempted: endpoints.len(),
        })
    }

    /// Serve one client from selection to full close. Returning means both
    /// sockets are closed.
    pub async fn handle_session(
        &self,
        inbound: TcpStream,
        peer: SocketAddr,
    ) -> Result<RelayReport, ProxyError> {
        let id = self.stats.inc_accepted();
        let span = info_span!("session", id, %peer);

        self.run_session(GatewaySession::new(id, peer), inbound)
            .instrument(span)
            .await
    }
}

// -----------------------------------------------------------------------------
// ----- Dispatcher: Private ---------------------------------------------------

impl Dispatcher {
    async fn run_session(
        &self,
        mut session: GatewaySession,
        inbound: TcpStream,
    ) -> Result<RelayReport, ProxyError> {
        let _active = self.stats.track_active();

        session.advance(SessionState::Selecting);
        let backend = match self.select_outbound().await {
            Ok(backend) => backend,
            Err(err) => {
                self.stats.inc_rejected();
                warn!("closing client {}: {err}", session.peer());
                drop(inbound);
                session.advance(SessionState::Closed);
                return Err(err);
            }
        };

        let endpoint = backend.endpoint().clone();
        debug!("client {} -> {endpoint}", session.peer());

        // The permit, if any, must outlive the outbound socket.
        let (outbound, _permit) = backend.into_parts();

        session.advance(SessionState::Relaying);
        let report = relay(inbound, outbound, &self.relay, |first| {
            session.advance(SessionState::Draining(first));
        })
        .await;
        session.advance(SessionState::Closed);

        self.stats
            .record_relayed(report.upstream_bytes, report.downstream_bytes);
        info!(
            "session {} with {endpoint} closed: {} bytes up, {} bytes down",
            session.id(),
            report.upstream_bytes,
            report.downstream_bytes
        );

        Ok(report)
    }

    fn retire_stale_pools(&self, generation: u64, listed: &[crate::discovery::Endpoint]) {
        let Some(evict_after) = self.evict_after else {
            return;
        };

        let seen = self.seen_generation.load(Ordering::Acquire);
        if generation <= seen {
            return;
        }
        if self
            .seen_generation
            .compare_exchange(seen, generation, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let retired = self.pools.retire_absent(listed, evict_after);
        if retired > 0 {
            debug!("retired {retired} pools at directory generation {generation}");
        }
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
