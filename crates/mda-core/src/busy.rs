//! Busy guard: at most one in-flight mutation per guard scope.
//!
//! A [`BusyGuard`] is a shared flag. [`BusyGuard::try_acquire`] performs an
//! atomic compare-and-swap and hands back a [`BusyPermit`] on success; the
//! flag is cleared when the permit is dropped, on success, failure, panic or
//! cancellation alike. A second caller never waits: it sees `None` and the
//! caller reports `IsBusy`.
//!
//! Guards are cheap to clone and every clone shares the same flag. Drivers
//! choose the scope by sharing: one guard cloned into every endpoint of a
//! device gives device-wide exclusivity, a fresh guard per endpoint gives
//! per-axis exclusivity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared exclusivity flag.
#[derive(Debug, Clone, Default)]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl BusyGuard {
    /// Create a new, idle guard scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a permit for this scope is alive.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the scope. Returns `None` if it is already claimed.
    pub fn try_acquire(&self) -> Option<BusyPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    /// True when `other` shares this guard's flag.
    pub fn same_scope(&self, other: &BusyGuard) -> bool {
        Arc::ptr_eq(&self.busy, &other.busy)
    }
}

/// RAII claim on a [`BusyGuard`] scope. Releases the scope on drop.
///
/// Permits are `Send + 'static`, so a permit can travel into a spawned task
/// and keep the scope claimed for as long as that task runs.
#[derive(Debug)]
#[must_use = "the busy scope is released as soon as the permit is dropped"]
pub struct BusyPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
