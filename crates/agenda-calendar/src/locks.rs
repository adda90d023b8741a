//! In-process locks serializing sync work.
//!
//! `sync` and `unsync` hold the owner's user lock for reading and the
//! appointment's mutex for the whole read-decide-call-write sequence.
//! `disconnect` takes the user lock for writing. Always acquire the user lock
//! first.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type Registry<L> = Mutex<HashMap<String, Arc<L>>>;

#[derive(Default)]
pub struct SyncLocks {
    appointments: Registry<tokio::sync::Mutex<()>>,
    users: Registry<RwLock<()>>,
}

/// Fetch or create the lock for `key`, dropping entries nobody holds.
fn entry<L: Default>(registry: &Registry<L>, key: &str) -> Arc<L> {
    let mut map = registry.lock();
    // Holders and waiters keep a clone, so a count of one means idle.
    map.retain(|k, lock| k == key || Arc::strong_count(lock) > 1);
    map.entry(key.to_string()).or_default().clone()
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_appointment(&self, appointment_id: &str) -> OwnedMutexGuard<()> {
        entry(&self.appointments, appointment_id).lock_owned().await
    }

    pub async fn read_user(&self, user_id: &str) -> OwnedRwLockReadGuard<()> {
        entry(&self.users, user_id).read_owned().await
    }

    pub async fn write_user(&self, user_id: &str) -> OwnedRwLockWriteGuard<()> {
        entry(&self.users, user_id).write_owned().await
    }

    /// Number of tracked lock entries, idle ones included.
    pub fn tracked(&self) -> usize {
        self.appointments.lock().len() + self.users.lock().len()
    }
}
