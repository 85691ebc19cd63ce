//! # Version Pool
//!
//! A bounded, lazily grown set of live instances for one version. Owns the
//! version's compiled module and hands out exclusive checkouts.
//!
//! ## Acquire
//!
//! 1. Under the shared lock, scan every instance circularly from a random
//!    starting index and take the first one that is free.
//! 2. Otherwise reserve a capacity slot, instantiate a new context, lock it,
//!    and append it under the exclusive lock.
//! 3. Otherwise fail with `Error::Exhausted`. Acquire never waits for another
//!    holder to release.
//!
//! Instances are never evicted; the pool only grows, up to `max_instances`.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use rand::Rng;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::instance::InstanceGuard;
use crate::instance::InstanceId;
use crate::instance::LiveInstance;
use crate::runtime::ModuleRuntime;

#[derive(Debug)]
pub enum Error {
    /// Every instance is held and the pool is at capacity.
    Exhausted { version: String, max_instances: usize },
    Instantiate(crate::runtime::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { version, max_instances } => write!(
                f,
                "Pool exhausted: all {} instances of {} are busy",
                max_instances, version
            ),
            Self::Instantiate(e) => write!(f, "Instantiation failed: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::runtime::Error> for Error {
    fn from(e: crate::runtime::Error) -> Self {
        Self::Instantiate(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Picks the index the free-instance scan starts from.
///
/// Must return a value in `0..len`; `len` is never zero.
pub trait ScanStart: Send + Sync + 'static {
    fn start(&self, len: usize) -> usize;
}

/// Uniformly random scan start, so no instance is systematically favoured.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomStart;

impl ScanStart for RandomStart {
    fn start(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// Pool of interchangeable instances for a single version.
pub struct VersionPool<R: ModuleRuntime> {
    version: Arc<str>,
    runtime: Arc<R>,
    module: R::Module,
    config: Arc<R::Config>,
    instances: RwLock<Vec<LiveInstance<R::Instance>>>,
    /// Instances appended plus instantiations in flight. Never exceeds `max_instances`.
    reserved: AtomicUsize,
    max_instances: usize,
    scan: Arc<dyn ScanStart>,
    next_id: AtomicU64,
}

impl<R: ModuleRuntime> VersionPool<R> {
    /// Creates an empty pool. Nothing is instantiated until the first acquire.
    pub fn new(
        version: impl Into<Arc<str>>,
        runtime: Arc<R>,
        module: R::Module,
        config: Arc<R::Config>,
        max_instances: usize,
    ) -> Self {
        Self {
            version: version.into(),
            runtime,
            module,
            config,
            instances: RwLock::new(Vec::new()),
            reserved: AtomicUsize::new(0),
            max_instances,
            scan: Arc::new(RandomStart),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replaces the scan start strategy.
    pub fn with_scan_start(mut self, scan: Arc<dyn ScanStart>) -> Self {
        self.scan = scan;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    pub fn module(&self) -> &R::Module {
        &self.module
    }

    /// Number of instances created so far, held or free.
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns an exclusively held instance, reusing a free one or growing the
    /// pool. Fails immediately with `Error::Exhausted` when neither is possible.
    ///
    /// `cancel` is forwarded to instantiation; a cancelled growth leaves the
    /// pool untouched.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<InstanceGuard<R::Instance>> {
        if let Some(guard) = self.try_reuse().await {
            tracing::debug!(version = %self.version, instance = %guard.id(), "reusing free instance");
            return Ok(guard);
        }

        let Some(reservation) = self.reserve() else {
            tracing::warn!(
                version = %self.version,
                max_instances = self.max_instances,
                "pool exhausted"
            );
            return Err(Error::Exhausted {
                version: self.version.to_string(),
                max_instances: self.max_instances,
            });
        };

        let inner = match self.runtime.instantiate(&self.module, &self.config, cancel).await {
            Ok(inner) => inner,
            Err(e) => {
                tracing::warn!(version = %self.version, error = %e, "instantiation failed");
                return Err(Error::Instantiate(e));
            }
        };

        let id = InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let live = LiveInstance::new(id, Arc::clone(&self.version), inner);
        let guard = live.acquire().await;

        // Only a fully built, already held instance ever becomes visible.
        let mut instances = self.instances.write().await;
        instances.push(live);
        reservation.commit();
        tracing::info!(
            version = %self.version,
            instance = %id,
            size = instances.len(),
            max_instances = self.max_instances,
            "pool grew"
        );

        Ok(guard)
    }

    async fn try_reuse(&self) -> Option<InstanceGuard<R::Instance>> {
        let instances = self.instances.read().await;
        let len = instances.len();
        if len == 0 {
            return None;
        }

        let start = self.scan.start(len) % len;
        (0..len).find_map(|offset| instances[(start + offset) % len].try_acquire())
    }

    fn reserve(&self) -> Option<Reservation<'_>> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_instances).then_some(n + 1)
            })
            .ok()
            .map(|_| Reservation {
                reserved: &self.reserved,
                committed: false,
            })
    }
}

/// One capacity slot claimed for an instantiation in flight. Handed back on
/// drop unless the new instance made it into the pool.
struct Reservation<'a> {
    reserved: &'a AtomicUsize,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
