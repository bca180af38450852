//! Per-punk mutual exclusion.
//!
//! Mutating operations on one punk never interleave and never queue: the
//! second caller is rejected immediately so it can surface a precondition
//! failure before any wallet traffic happens.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use punks_core::PunkId;

#[derive(Default)]
pub struct PunkLocks {
    inner: Mutex<HashMap<PunkId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of one mutating operation on one punk.
pub struct PunkGuard {
    _guard: OwnedMutexGuard<()>,
}

impl PunkLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the punk's lock without waiting. `None` means another
    /// operation on the same punk is in flight.
    pub fn try_acquire(&self, punk_id: &PunkId) -> Option<PunkGuard> {
        let lock = {
            let mut map = self.inner.lock().expect("punk lock registry poisoned");
            map.entry(*punk_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok().map(|guard| PunkGuard { _guard: guard })
    }
}
