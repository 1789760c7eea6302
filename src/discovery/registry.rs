use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::errors::RegistryError;

// -----------------------------------------------------------------------------
// ----- Registry --------------------------------------------------------------

/// The external source of truth for which instances serve a service.
#[async_trait]
pub trait Registry: Send + Sync + fmt::Debug {
    /// All live records for `service`. Zero records is a valid answer.
    async fn query(&self, service: &str) -> Result<Vec<EndpointRecord>, RegistryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub host: String,
    pub port: u16,
}

impl EndpointRecord {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- StaticRegistry --------------------------------------------------------

/// In-memory registry. Records can be swapped at runtime and queries can be
/// made to fail, which is how embedders and tests drive the directory.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    inner: RwLock<StaticState>,
    queries: AtomicU64,
}

#[derive(Debug, Default)]
struct StaticState {
    by_service: HashMap<String, Vec<EndpointRecord>>,
    failure: Option<String>,
}

// -----------------------------------------------------------------------------
// ----- StaticRegistry: Public ------------------------------------------------

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_records(&self, service: &str, records: Vec<EndpointRecord>) {
        self.inner
            .write()
            .by_service
            .insert(service.to_string(), records);
    }

    pub fn insert(&self, service: &str, record: EndpointRecord) {
        self.inner
            .write()
            .by_service
            .entry(service.to_string())
            .or_default()
            .push(record);
    }

    /// Every query fails with `reason` until `recover` is called.
    pub fn fail_with(&self, reason: impl Into<String>) {
        self.inner.write().failure = Some(reason.into());
    }

    pub fn recover(&self) {
        self.inner.write().failure = None;
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Registry for StaticRegistry {
    async fn query(&self, service: &str) -> Result<Vec<EndpointRecord>, RegistryError> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let guard = self.inner.read();
        if let Some(reason) = guard.failure.as_ref() {
            return Err(RegistryError::Unavailable(reason.clone()));
        }

        Ok(guard.by_service.get(service).cloned().unwrap_or_default())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
