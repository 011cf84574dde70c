//! Per-sponsor exclusive locks for accumulator writes within this process.
//!
//! A sponsor's entry lives only while someone holds or waits for its lock.

use crate::domain::ParticipantId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<ParticipantId, Arc<AsyncMutex<()>>>>>;

fn registry(inner: &Registry) -> MutexGuard<'_, HashMap<ParticipantId, Arc<AsyncMutex<()>>>> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SponsorLocks {
    inner: Registry,
}

/// Held lock on one sponsor. Dropping it releases the lock and forgets the sponsor's
/// entry when nobody else is waiting.
#[derive(Debug)]
pub struct SponsorGuard {
    guard: Option<OwnedMutexGuard<()>>,
    sponsor: ParticipantId,
    inner: Registry,
}

impl Drop for SponsorGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = registry(&self.inner);
        if map
            .get(&self.sponsor)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.sponsor);
        }
    }
}

impl SponsorLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `sponsor`'s accumulator.
    pub async fn acquire(&self, sponsor: &ParticipantId) -> SponsorGuard {
        let lock = registry(&self.inner)
            .entry(sponsor.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        SponsorGuard {
            guard: Some(lock.lock_owned().await),
            sponsor: sponsor.clone(),
            inner: self.inner.clone(),
        }
    }

    /// Sponsors currently locked or waited on.
    pub fn tracked(&self) -> usize {
        registry(&self.inner).len()
    }
}
