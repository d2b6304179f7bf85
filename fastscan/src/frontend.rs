//! Frontend (tuner + demultiplexer) ownership.
//!
//! A scan holds its frontend exclusively for its whole duration. Each
//! frontend is guarded by a single-permit semaphore; the permit lives in a
//! [`FrontendGuard`] and is returned when the guard is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{debug, info};
use tokio::sync::{broadcast, OwnedSemaphorePermit, RwLock, Semaphore};

use crate::error::{Result, ScanError};
use crate::source::{LiveSectionSource, TableSpec};

/// Capacity of each per-PID section feed.
const SECTION_FEED_CAPACITY: usize = 256;

/// One registered frontend.
struct Frontend {
    /// Exclusive ownership.
    semaphore: Arc<Semaphore>,
    /// Section feeds by PID.
    feeds: Arc<Mutex<HashMap<u16, broadcast::Sender<Bytes>>>>,
}

impl Frontend {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            feeds: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Get the section feed of a PID, creating it on first use.
fn section_feed(
    feeds: &Mutex<HashMap<u16, broadcast::Sender<Bytes>>>,
    pid: u16,
) -> broadcast::Sender<Bytes> {
    let mut feeds = match feeds.lock() {
        Ok(feeds) => feeds,
        Err(poisoned) => poisoned.into_inner(),
    };
    feeds
        .entry(pid)
        .or_insert_with(|| broadcast::channel(SECTION_FEED_CAPACITY).0)
        .clone()
}

/// Registry of the frontends available to scans.
#[derive(Default)]
pub struct FrontendPool {
    frontends: RwLock<HashMap<u32, Frontend>>,
}

impl FrontendPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a frontend. Registering an existing id is a no-op.
    pub async fn register(&self, id: u32) {
        let mut frontends = self.frontends.write().await;
        if !frontends.contains_key(&id) {
            info!("Registered frontend {}", id);
            frontends.insert(id, Frontend::new());
        }
    }

    /// Sender side of a frontend's section feed for `pid`.
    ///
    /// The demultiplexer publishes every section it filters on `pid` here.
    pub async fn section_sender(&self, id: u32, pid: u16) -> Option<broadcast::Sender<Bytes>> {
        let frontends = self.frontends.read().await;
        frontends.get(&id).map(|fe| section_feed(&fe.feeds, pid))
    }

    /// Acquire a frontend exclusively.
    ///
    /// Fails with `ResourceUnavailable` if the id is unknown or the frontend
    /// is already held.
    pub async fn acquire(&self, id: u32) -> Result<FrontendGuard> {
        let frontends = self.frontends.read().await;
        let frontend = frontends.get(&id).ok_or(ScanError::ResourceUnavailable(id))?;

        let permit = frontend
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ScanError::ResourceUnavailable(id))?;

        debug!("Frontend {} acquired", id);
        Ok(FrontendGuard {
            id,
            permit: Some(permit),
            feeds: Arc::clone(&frontend.feeds),
        })
    }

    /// Returns true if the frontend is currently held.
    pub async fn is_held(&self, id: u32) -> bool {
        let frontends = self.frontends.read().await;
        frontends
            .get(&id)
            .map(|fe| fe.semaphore.available_permits() == 0)
            .unwrap_or(false)
    }
}

/// Exclusive hold on a frontend; released on drop.
pub struct FrontendGuard {
    id: u32,
    permit: Option<OwnedSemaphorePermit>,
    feeds: Arc<Mutex<HashMap<u16, broadcast::Sender<Bytes>>>>,
}

impl FrontendGuard {
    /// Frontend id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Subscribe to the sections of the given tables.
    ///
    /// Every `TableSpec` is expected to share the same PID; the first one selects
    /// the feed.
    pub fn subscribe(&self, specs: Vec<TableSpec>) -> LiveSectionSource {
        let pid = specs.first().map(|spec| spec.pid).unwrap_or_default();
        let receiver = section_feed(&self.feeds, pid).subscribe();
        LiveSectionSource::new(receiver, specs)
    }
}

impl Drop for FrontendGuard {
    fn drop(&mut self) {
        if self.permit.take().is_some() {
            debug!("Frontend {} released", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastscan_protocol::table_id;

    #[tokio::test]
    async fn test_exclusive_acquire() {
        let pool = FrontendPool::new();
        pool.register(0).await;

        let guard = pool.acquire(0).await.unwrap();
        assert_eq!(guard.id(), 0);
        assert!(pool.is_held(0).await);
        assert!(matches!(
            pool.acquire(0).await,
            Err(ScanError::ResourceUnavailable(0))
        ));

        drop(guard);
        assert!(!pool.is_held(0).await);
        assert!(pool.acquire(0).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_frontend() {
        let pool = FrontendPool::new();
        assert!(matches!(
            pool.acquire(3).await,
            Err(ScanError::ResourceUnavailable(3))
        ));
        assert!(pool.section_sender(3, 900).await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_by_pid() {
        let pool = FrontendPool::new();
        pool.register(1).await;
        let guard = pool.acquire(1).await.unwrap();

        let mut source = guard.subscribe(vec![TableSpec::new(900, table_id::NETWORK)]);
        let other_pid = pool.section_sender(1, 901).await.unwrap();
        let sender = pool.section_sender(1, 900).await.unwrap();

        assert!(other_pid.send(Bytes::from_static(&[0xBC, 0x02])).is_err());
        sender.send(Bytes::from_static(&[0xBC, 0x01])).unwrap();
        assert_eq!(&source.recv().await.unwrap()[..], &[0xBC, 0x01]);
    }
}
