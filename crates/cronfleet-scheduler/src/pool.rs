//! Named pools of reusable backend connections.
//!
//! A [`ResourcePool`] hands out [`Lease`] guards. Dropping a lease returns its
//! connection to the pool, so every exit path of a borrower releases. Each
//! lease is tagged with the [`UnitOfWork`] that borrowed it; reclaiming a unit
//! restores the capacity of everything that unit still holds, and those stale
//! leases discard their connection on drop instead of handing it back.
//! A borrower that finds its connection broken calls [`Lease::discard`] so
//! the connection is closed rather than handed to the next borrower.
//!
//! Exhaustion is reported immediately as [`PoolError::Exhausted`]; callers
//! never wait for a connection.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PoolError;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Opens new connections for a pool on demand.
#[async_trait]
pub trait ResourceFactory<R>: Send + Sync {
    async fn create(&self) -> Result<R, PoolError>;
}

/// One logical unit of work (a tick, a dispatch bucket) that borrows
/// connections and is accountable for returning them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitOfWork(u64);

impl UnitOfWork {
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub borrowed: usize,
    pub idle: usize,
}

struct PoolState<R> {
    idle: Vec<R>,
    /// Outstanding lease id -> borrowing unit.
    leases: HashMap<u64, UnitOfWork>,
    next_lease: u64,
}

pub struct ResourcePool<R> {
    name: String,
    capacity: usize,
    factory: Arc<dyn ResourceFactory<R>>,
    state: Mutex<PoolState<R>>,
}

impl<R: Send + 'static> ResourcePool<R> {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        factory: Arc<dyn ResourceFactory<R>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            capacity,
            factory,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                leases: HashMap::new(),
                next_lease: 1,
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrow a connection on behalf of `unit`.
    ///
    /// Reuses an idle connection when one exists, otherwise opens a new one
    /// through the factory.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] if every slot is borrowed, or
    /// [`PoolError::Connect`] if a new connection could not be opened. A
    /// failed open does not consume a slot.
    pub async fn acquire(self: &Arc<Self>, unit: UnitOfWork) -> Result<Lease<R>, PoolError> {
        let (lease_id, idle) = {
            let mut state = self.lock();
            if state.leases.len() >= self.capacity {
                return Err(PoolError::Exhausted {
                    pool: self.name.clone(),
                    capacity: self.capacity,
                });
            }
            let lease_id = state.next_lease;
            state.next_lease += 1;
            state.leases.insert(lease_id, unit);
            (lease_id, state.idle.pop())
        };

        let resource = match idle {
            Some(resource) => resource,
            None => match self.factory.create().await {
                Ok(resource) => resource,
                Err(e) => {
                    self.lock().leases.remove(&lease_id);
                    return Err(e);
                }
            },
        };

        Ok(Lease {
            pool: Arc::clone(self),
            lease_id,
            resource: Some(resource),
        })
    }

    /// Forcibly return every connection still borrowed by `unit`.
    ///
    /// Returns the number of leases reclaimed.
    pub fn reclaim(&self, unit: UnitOfWork) -> usize {
        let mut state = self.lock();
        let before = state.leases.len();
        state.leases.retain(|_, owner| *owner != unit);
        before - state.leases.len()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            capacity: self.capacity,
            borrowed: state.leases.len(),
            idle: state.idle.len(),
        }
    }

    fn release(&self, lease_id: u64, resource: R) {
        let mut state = self.lock();
        if state.leases.remove(&lease_id).is_some() {
            state.idle.push(resource);
        } else {
            // Already reclaimed; its slot was handed back, so the
            // connection itself is dropped.
            tracing::debug!(pool = %self.name, lease_id, "pool: discarding reclaimed connection");
        }
    }

    fn forget(&self, lease_id: u64) {
        if self.lock().leases.remove(&lease_id).is_some() {
            tracing::debug!(pool = %self.name, lease_id, "pool: discarded broken connection");
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A borrowed connection. Dropping it releases the connection.
pub struct Lease<R: Send + 'static> {
    pool: Arc<ResourcePool<R>>,
    lease_id: u64,
    resource: Option<R>,
}

impl<R: Send + 'static> Lease<R> {
    /// Give the slot back without returning the connection to the idle
    /// list. The connection is dropped and a later borrow opens a new one.
    pub fn discard(mut self) {
        if self.resource.take().is_some() {
            self.pool.forget(self.lease_id);
        }
    }
}

impl<R: Send + 'static> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.resource
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease resource taken before drop"))
    }
}

impl<R: Send + 'static> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource
            .as_mut()
            .unwrap_or_else(|| unreachable!("lease resource taken before drop"))
    }
}

impl<R: Send + 'static> Drop for Lease<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.release(self.lease_id, resource);
        }
    }
}

/// Type-erased view of a pool for group-wide reclaim and reporting.
pub trait Reclaim: Send + Sync {
    fn name(&self) -> &str;
    fn reclaim(&self, unit: UnitOfWork) -> usize;
    fn stats(&self) -> PoolStats;
}

impl<R: Send + 'static> Reclaim for ResourcePool<R> {
    fn name(&self) -> &str {
        ResourcePool::name(self)
    }

    fn reclaim(&self, unit: UnitOfWork) -> usize {
        ResourcePool::reclaim(self, unit)
    }

    fn stats(&self) -> PoolStats {
        ResourcePool::stats(self)
    }
}

/// Every named pool in the process.
#[derive(Default, Clone)]
pub struct PoolGroup {
    pools: Vec<Arc<dyn Reclaim>>,
}

impl PoolGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pool: Arc<dyn Reclaim>) {
        self.pools.push(pool);
    }

    /// Reclaim everything `unit` still holds across all pools.
    ///
    /// Called at the end of every tick and dispatch bucket. A non-zero
    /// result means some borrower forgot to release and is logged.
    pub fn reclaim_all(&self, unit: UnitOfWork) -> usize {
        let mut total = 0;
        for pool in &self.pools {
            let reclaimed = pool.reclaim(unit);
            if reclaimed > 0 {
                tracing::warn!(
                    pool = pool.name(),
                    reclaimed,
                    "pool: reclaimed connections still borrowed at end of unit of work"
                );
            }
            total += reclaimed;
        }
        total
    }

    #[must_use]
    pub fn stats(&self) -> Vec<(String, PoolStats)> {
        self.pools
            .iter()
            .map(|p| (p.name().to_string(), p.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Counter {
        opened: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ResourceFactory<usize> for Counter {
        async fn create(&self) -> Result<usize, PoolError> {
            if self.fail {
                return Err(PoolError::Connect {
                    pool: "test".to_string(),
                    reason: "refused".to_string(),
                });
            }
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn pool(capacity: usize, fail: bool) -> (Arc<ResourcePool<usize>>, Arc<Counter>) {
        let factory = Arc::new(Counter {
            opened: AtomicUsize::new(0),
            fail,
        });
        let pool = ResourcePool::new("test", capacity, factory.clone() as Arc<dyn ResourceFactory<usize>>);
        (pool, factory)
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        let (pool, factory) = pool(2, false);
        let unit = UnitOfWork::new();

        let first = pool.acquire(unit).await.unwrap();
        assert_eq!(*first, 0);
        drop(first);

        let again = pool.acquire(unit).await.unwrap();
        assert_eq!(*again, 0);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_errors_immediately() {
        let (pool, _) = pool(1, false);
        let unit = UnitOfWork::new();

        let _held = pool.acquire(unit).await.unwrap();
        let err = pool.acquire(unit).await.err().expect("exhausted");
        assert!(matches!(err, PoolError::Exhausted { capacity: 1, .. }));
    }

    #[tokio::test]
    async fn failed_open_does_not_leak_a_slot() {
        let (pool, _) = pool(1, true);
        let unit = UnitOfWork::new();

        assert!(matches!(
            pool.acquire(unit).await,
            Err(PoolError::Connect { .. })
        ));
        assert_eq!(pool.stats().borrowed, 0);
    }

    #[tokio::test]
    async fn reclaim_restores_capacity_for_one_unit_only() {
        let (pool, _) = pool(2, false);
        let leaky = UnitOfWork::new();
        let other = UnitOfWork::new();

        let forgotten = pool.acquire(leaky).await.unwrap();
        let kept = pool.acquire(other).await.unwrap();
        assert_eq!(pool.stats().borrowed, 2);

        assert_eq!(pool.reclaim(leaky), 1);
        assert_eq!(pool.stats().borrowed, 1);

        // The reclaimed lease drops its connection instead of returning it.
        drop(forgotten);
        assert_eq!(pool.stats().idle, 0);

        drop(kept);
        assert_eq!(pool.stats(), PoolStats { capacity: 2, borrowed: 0, idle: 1 });
    }

    #[tokio::test]
    async fn group_reclaims_across_pools() {
        let (a, _) = pool(1, false);
        let (b, _) = pool(1, false);
        let mut group = PoolGroup::new();
        group.register(a.clone());
        group.register(b.clone());

        let unit = UnitOfWork::new();
        let _la = a.acquire(unit).await.unwrap();
        let _lb = b.acquire(unit).await.unwrap();

        assert_eq!(group.reclaim_all(unit), 2);
        assert!(a.acquire(UnitOfWork::new()).await.is_ok());
    }

    #[tokio::test]
    async fn discarded_connection_is_not_reused() {
        let (pool, factory) = pool(1, false);
        let unit = UnitOfWork::new();

        let broken = pool.acquire(unit).await.unwrap();
        assert_eq!(*broken, 0);
        broken.discard();
        assert_eq!(pool.stats(), PoolStats { capacity: 1, borrowed: 0, idle: 0 });

        let fresh = pool.acquire(unit).await.unwrap();
        assert_eq!(*fresh, 1);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn units_are_distinct() {
        assert_ne!(UnitOfWork::new(), UnitOfWork::new());
    }
}
