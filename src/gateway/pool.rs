use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info};

use crate::backend::BackendConnection;
use crate::discovery::Endpoint;
use crate::errors::DialError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_MAX_IDLE: usize = 30;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// -----------------------------------------------------------------------------
// ----- PoolSettings ----------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Upper bound on cached idle connections per endpoint.
    pub max_idle: usize,
    pub connect_timeout: Duration,
    /// Upper bound on idle + in-use connections per endpoint. `None` = uncapped.
    pub max_active: Option<usize>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_active: None,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- GatewayPools ----------------------------------------------------------

/// Endpoint -> pool registry. The map lock only covers lookup and creation;
/// dials happen on the returned `Arc<EndpointPool>` after it is released.
#[derive(Debug)]
pub struct GatewayPools {
    settings: PoolSettings,
    pools: parking_lot::Mutex<HashMap<Endpoint, PoolEntry>>,
}

#[derive(Debug)]
struct PoolEntry {
    pool: Arc<EndpointPool>,
    missed_snapshots: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub endpoint: Endpoint,
    pub idle: usize,
    pub max_idle: usize,
    pub max_active: Option<usize>,
    pub dials: u64,
    pub dial_failures: u64,
    pub reuses: u64,
}

impl GatewayPools {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            pools: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, endpoint: &Endpoint) -> Option<Arc<EndpointPool>> {
        self.pools.lock().get(endpoint).map(|e| e.pool.clone())
    }

    pub fn get_or_create(&self, endpoint: &Endpoint) -> Arc<EndpointPool> {
        let mut pools = self.pools.lock();
        pools
            .entry(endpoint.clone())
            .or_insert_with(|| PoolEntry {
                pool: Arc::new(EndpointPool::new(endpoint.clone(), &self.settings)),
                missed_snapshots: 0,
            })
            .pool
            .clone()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record one directory snapshot: entries listed in it are reset, the rest
    /// age by one. Entries that reach `evict_after` are dropped along with
    /// their idle connections. Returns how many were dropped.
    pub fn retire_absent(&self, listed: &[Endpoint], evict_after: u32) -> usize {
        let mut pools = self.pools.lock();
        let before = pools.len();

        pools.retain(|endpoint, entry| {
            if listed.contains(endpoint) {
                entry.missed_snapshots = 0;
                return true;
            }
            entry.missed_snapshots += 1;
            if entry.missed_snapshots >= evict_after {
                info!("evicting pool for {endpoint}: absent from {evict_after} snapshots");
                return false;
            }
            true
        });

        before - pools.len()
    }

    pub async fn snapshot(&self) -> Vec<PoolStats> {
        let pools: Vec<Arc<EndpointPool>> =
            self.pools.lock().values().map(|e| e.pool.clone()).collect();

        let mut stats = Vec::with_capacity(pools.len());
        for pool in pools {
            stats.push(pool.stats().await);
        }
        stats.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        stats
    }
}

// -----------------------------------------------------------------------------
// ----- EndpointPool ----------------------------------------------------------

/// Idle-connection cache for one endpoint.
#[derive(Debug)]
pub struct EndpointPool {
    endpoint: Endpoint,
    idle: Mutex<VecDeque<BackendConnection>>,
    active: Option<Arc<Semaphore>>,
    max_idle: usize,
    max_active: Option<usize>,
    connect_timeout: Duration,
    dials: AtomicU64,
    dial_failures: AtomicU64,
    reuses: AtomicU64,
}

impl EndpointPool {
    pub fn new(endpoint: Endpoint, settings: &PoolSettings) -> Self {
        let max_active = settings.max_active.map(|m| m.max(1));
        Self {
            endpoint,
            idle: Mutex::new(VecDeque::with_capacity(settings.max_idle)),
            active: max_active.map(|m| Arc::new(Semaphore::new(m))),
            max_idle: settings.max_idle,
            max_active,
            connect_timeout: settings.connect_timeout,
            dials: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Cached connection if there is one, otherwise a fresh dial bounded by
    /// the connect timeout.
    pub async fn acquire(&self) -> Result<BackendConnection, DialError> {
        if let Some(conn) = self.idle.lock().await.pop_front() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            return Ok(conn);
        }

        let permit = match (&self.active, self.max_active) {
            (Some(sem), Some(limit)) => {
                Some(sem.clone().try_acquire_owned().map_err(|_| DialError::Saturated {
                    endpoint: self.endpoint.clone(),
                    limit,
                })?)
            }
            _ => None,
        };

        self.dials.fetch_add(1, Ordering::Relaxed);
        BackendConnection::connect(&self.endpoint, self.connect_timeout, permit)
            .await
            .inspect_err(|_| {
                self.dial_failures.fetch_add(1, Ordering::Relaxed);
            })
    }

    /// Cache a known-healthy connection for reuse, or close it if the idle
    /// cache is full. Returns whether it was kept.
    pub async fn release(&self, conn: BackendConnection) -> bool {
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push_back(conn);
            return true;
        }
        drop(idle);

        debug!("idle cache for {} is full; closing connection", self.endpoint);
        drop(conn);
        false
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            endpoint: self.endpoint.clone(),
            idle: self.idle.lock().await.len(),
            max_idle: self.max_idle,
            max_active: self.max_active,
            dials: self.dials.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
