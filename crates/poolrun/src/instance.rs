//! # Instance Handle
//!
//! Wraps one live execution context together with an exclusive-access lock.
//! A handle is either Free or Held; holding it is represented by an
//! `InstanceGuard`, and dropping the guard is the only way back to Free.

use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::OwnedMutexGuard;

/// Strong type for instance identifiers. Unique within one pool.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

/// A pooled execution context behind an exclusive lock.
///
/// The inner value is only reachable through an `InstanceGuard`, so at most one
/// caller can drive it at any instant.
pub struct LiveInstance<I> {
    id: InstanceId,
    version: Arc<str>,
    slot: Arc<Mutex<I>>,
}

impl<I> LiveInstance<I> {
    pub fn new(id: InstanceId, version: Arc<str>, inner: I) -> Self {
        Self {
            id,
            version,
            slot: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Waits for the lock. Only used by the creator of a brand-new instance,
    /// where it can never contend.
    pub(crate) async fn acquire(&self) -> InstanceGuard<I> {
        let guard = Arc::clone(&self.slot).lock_owned().await;
        self.guard(guard)
    }

    /// Transitions Free to Held without waiting. Returns `None` if the
    /// instance is already held.
    pub fn try_acquire(&self) -> Option<InstanceGuard<I>> {
        let guard = Arc::clone(&self.slot).try_lock_owned().ok()?;
        Some(self.guard(guard))
    }

    fn guard(&self, guard: OwnedMutexGuard<I>) -> InstanceGuard<I> {
        InstanceGuard {
            id: self.id,
            version: Arc::clone(&self.version),
            guard,
        }
    }
}

/// Exclusive checkout of a live instance.
///
/// Dereferences to the instance itself. The instance returns to its pool when
/// the guard is released or dropped, whichever comes first, so every exit path
/// (early return, error, task cancellation, unwinding) releases exactly once.
pub struct InstanceGuard<I> {
    id: InstanceId,
    version: Arc<str>,
    guard: OwnedMutexGuard<I>,
}

impl<I> InstanceGuard<I> {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the instance to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl<I> Drop for InstanceGuard<I> {
    fn drop(&mut self) {
        tracing::debug!(version = %self.version, instance = %self.id, "instance released");
    }
}

impl<I> Deref for InstanceGuard<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.guard
    }
}

impl<I> DerefMut for InstanceGuard<I> {
    fn deref_mut(&mut self) -> &mut I {
        &mut self.guard
    }
}

impl<I> std::fmt::Debug for InstanceGuard<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("id", &self.id)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
