use parking_lot::{Mutex, RwLock};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex as AsyncMutex, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{Endpoint, Registry};
use crate::errors::RegistryError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

// -----------------------------------------------------------------------------
// ----- EndpointDirectory -----------------------------------------------------

/// Last known good endpoint list for one service, refreshed in the background.
///
/// A failed poll never touches the stored list, so readers keep working on
/// stale data instead of an empty one. The ticker is the only retry policy.
#[derive(Debug)]
pub struct EndpointDirectory {
    service: String,
    registry: Arc<dyn Registry>,
    interval: Duration,
    current: RwLock<Snapshot>,
    // One registry query at a time, so a slow older answer cannot land
    // after a newer one.
    refreshing: AsyncMutex<()>,
    refresher: Mutex<Option<Refresher>>,
}

#[derive(Debug, Default)]
struct Snapshot {
    endpoints: Vec<Endpoint>,
    generation: u64,
}

#[derive(Debug)]
struct Refresher {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

// -----------------------------------------------------------------------------
// ----- EndpointDirectory: Static ---------------------------------------------

impl EndpointDirectory {
    pub fn new(service: impl Into<String>, registry: Arc<dyn Registry>, interval: Duration) -> Self {
        Self {
            service: service.into(),
            registry,
            interval,
            current: RwLock::new(Snapshot::default()),
            refreshing: AsyncMutex::new(()),
            refresher: Mutex::new(None),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- EndpointDirectory: Public ---------------------------------------------

impl EndpointDirectory {
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Independent copy of the current list; callers may shuffle it freely.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.current.read().endpoints.clone()
    }

    /// Same as `snapshot`, paired with the generation it was taken from.
    pub fn snapshot_with_generation(&self) -> (u64, Vec<Endpoint>) {
        let guard = self.current.read();
        (guard.generation, guard.endpoints.clone())
    }

    /// Bumped on every successful refresh; 0 means never refreshed.
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Poll the registry once. On failure the stored snapshot is untouched.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let _refreshing = self.refreshing.lock().await;
        let records = self.registry.query(&self.service).await?;

        let endpoints: Vec<Endpoint> = records
            .iter()
            .map(|r| Endpoint::from_host_port(&r.host, r.port))
            .collect();
        let count = endpoints.len();

        let mut guard = self.current.write();
        guard.endpoints = endpoints;
        guard.generation += 1;

        Ok(count)
    }

    /// Refresh now, then every `interval`, until `stop`. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut refresher = self.refresher.lock();
        if refresher.is_some() {
            return;
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let directory = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(directory.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop_rx) => break,
                    _ = ticker.tick() => directory.refresh_logged().await,
                }
            }

            debug!("directory refresh loop for '{}' stopped", directory.service);
        });

        *refresher = Some(Refresher { stop, task });
    }

    /// Stop the refresh loop and wait for an in-flight poll to finish.
    pub async fn stop(&self) {
        let Some(refresher) = self.refresher.lock().take() else {
            return;
        };

        let _ = refresher.stop.send(true);
        if let Err(err) = refresher.task.await {
            warn!("directory refresh task for '{}' ended abnormally: {err}", self.service);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- EndpointDirectory: Private --------------------------------------------

impl EndpointDirectory {
    async fn refresh_logged(&self) {
        match self.refresh().await {
            Ok(count) => info!("service '{}' resolved to {count} endpoints", self.service),
            Err(err) => warn!(
                "cannot query registry for '{}'; keeping previous endpoints: {err}",
                self.service
            ),
        }
    }
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{EndpointRecord, StaticRegistry};
    use rand::seq::SliceRandom;

    fn registry_with(n: u16) -> Arc<StaticRegistry> {
        let registry = Arc::new(StaticRegistry::new());
        let records = (0..n).map(|i| EndpointRecord::new("10.0.0.1", 7000 + i)).collect();
        registry.set_records("billing", records);
        registry
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_snapshots_are_independent_copies() {
        let registry = registry_with(16);
        let directory = Arc::new(EndpointDirectory::new(
            "billing",
            registry,
            DEFAULT_REFRESH_INTERVAL,
        ));
        directory.refresh().await.unwrap();
        let original = directory.snapshot();

        let shufflers: Vec<_> = (0..2)
            .map(|_| {
                let directory = directory.clone();
                tokio::spawn(async move {
                    for _ in 0..500 {
                        let mut mine = directory.snapshot();
                        mine.shuffle(&mut rand::rng());
                        mine.truncate(3);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let reader = {
            let directory = directory.clone();
            let original = original.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    assert_eq!(directory.snapshot(), original);
                    tokio::task::yield_now().await;
                }
            })
        };

        for shuffler in shufflers {
            shuffler.await.unwrap();
        }
        reader.await.unwrap();

        assert_eq!(directory.snapshot(), original);
        assert_eq!(original.len(), 16);
    }

    /// First query is slow and answers with the old list; later ones are fast.
    #[derive(Debug, Default)]
    struct SlowFirstRegistry {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Registry for SlowFirstRegistry {
        async fn query(&self, _service: &str) -> Result<Vec<EndpointRecord>, RegistryError> {
            use std::sync::atomic::Ordering;
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                time::sleep(Duration::from_millis(100)).await;
                Ok(vec![EndpointRecord::new("10.0.0.1", 7000)])
            } else {
                Ok(vec![EndpointRecord::new("10.0.0.2", 7000)])
            }
        }
    }

    #[tokio::test]
    async fn overlapping_refreshes_keep_the_newest_answer() {
        let directory = EndpointDirectory::new(
            "billing",
            Arc::new(SlowFirstRegistry::default()),
            DEFAULT_REFRESH_INTERVAL,
        );

        let (slow, fast) = tokio::join!(directory.refresh(), async {
            time::sleep(Duration::from_millis(10)).await;
            directory.refresh().await
        });
        slow.unwrap();
        fast.unwrap();

        assert_eq!(
            directory.snapshot(),
            vec![Endpoint::from_host_port("10.0.0.2", 7000)]
        );
        assert_eq!(directory.generation(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_good() {
        let registry = registry_with(2);
        let directory =
            EndpointDirectory::new("billing", registry.clone(), DEFAULT_REFRESH_INTERVAL);

        assert_eq!(directory.refresh().await.unwrap(), 2);
        let before = directory.snapshot_with_generation();

        registry.fail_with("table throttled");
        assert!(directory.refresh().await.is_err());

        assert_eq!(directory.snapshot_with_generation(), before);
        assert_eq!(directory.generation(), 1);
    }

    #[tokio::test]
    async fn successful_refresh_replaces_the_list() {
        let registry = registry_with(3);
        let directory =
            EndpointDirectory::new("billing", registry.clone(), DEFAULT_REFRESH_INTERVAL);
        directory.refresh().await.unwrap();

        registry.set_records("billing", vec![]);
        assert_eq!(directory.refresh().await.unwrap(), 0);
        assert!(directory.snapshot().is_empty());
        assert_eq!(directory.generation(), 2);
    }

    #[tokio::test]
    async fn start_refreshes_immediately_and_stop_ends_the_loop() {
        let registry = registry_with(1);
        let directory = Arc::new(EndpointDirectory::new(
            "billing",
            registry.clone(),
            Duration::from_millis(20),
        ));

        directory.start();
        directory.start();

        for _ in 0..100 {
            if registry.query_count() >= 3 {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.query_count() >= 3);
        assert_eq!(directory.snapshot().len(), 1);

        directory.stop().await;
        let after_stop = registry.query_count();
        time::sleep(Duration::from_millis(80)).await;
        assert_eq!(registry.query_count(), after_stop);

        // second stop has nothing left to join
        directory.stop().await;
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
