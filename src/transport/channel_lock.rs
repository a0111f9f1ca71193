//! Per-channel mutual exclusion for `open_channel`.
//!
//! Restarting a channel cancels the existing engine request and opens a new
//! one; two concurrent opens for the same channel must not interleave that
//! dance. Entries are created lazily and garbage-collected once the last
//! holder or waiter releases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::ChannelId;

struct LockEntry {
    mutex: Arc<AsyncMutex<()>>,
    waiters: usize,
}

type LockMap = Arc<Mutex<HashMap<ChannelId, LockEntry>>>;

/// Lazily-populated table of per-channel mutexes.
pub(crate) struct ChannelLocker {
    locks: LockMap,
}

impl ChannelLocker {
    pub(crate) fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire the mutex for `channel_id`, creating it if absent.
    pub(crate) async fn lock(&self, channel_id: ChannelId) -> ChannelGuard {
        let mutex = {
            let mut locks = self.locks.lock().expect("channel lock table poisoned");
            let entry = locks.entry(channel_id).or_insert_with(|| LockEntry {
                mutex: Arc::new(AsyncMutex::new(())),
                waiters: 0,
            });
            entry.waiters += 1;
            Arc::clone(&entry.mutex)
        };

        let guard = mutex.lock_owned().await;
        ChannelGuard {
            locks: Arc::clone(&self.locks),
            channel_id,
            guard: Some(guard),
        }
    }
}

/// Releases the per-channel mutex and garbage-collects the entry when no
/// other holder or waiter remains.
pub(crate) struct ChannelGuard {
    locks: LockMap,
    channel_id: ChannelId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        // Release the mutex before touching the table so a queued waiter is
        // never blocked on the table lock while we hold its mutex.
        self.guard.take();

        let mut locks = self.locks.lock().expect("channel lock table poisoned");
        if let Some(entry) = locks.get_mut(&self.channel_id) {
            entry.waiters -= 1;
            if entry.waiters == 0 {
                locks.remove(&self.channel_id);
            }
        }
    }
}
