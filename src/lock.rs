//! Per-object name locking.
//!
//! Sharded shared/exclusive locks keyed by object unique-name. Unlock is
//! explicit rather than guard-based: the send path acquires a shared lock
//! that the stream completion callback releases, which may happen on a
//! different task than the acquisition.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::Notify;

const LOCK_SHARDS: usize = 16;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock (multiple readers).
    Shared,
    /// Exclusive lock (single writer).
    Exclusive,
}

#[derive(Debug, Default)]
struct LockEntry {
    readers: u32,
    writer: bool,
}

impl LockEntry {
    fn can_acquire(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.writer,
            LockMode::Exclusive => !self.writer && self.readers == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.readers += 1,
            LockMode::Exclusive => self.writer = true,
        }
    }

    fn is_free(&self) -> bool {
        !self.writer && self.readers == 0
    }
}

struct Shard {
    entries: Mutex<HashMap<String, LockEntry>>,
    notify: Notify,
}

/// Sharded name locker.
pub struct NameLocker {
    shards: Vec<Shard>,
}

impl NameLocker {
    pub fn new() -> Self {
        let shards = (0..LOCK_SHARDS)
            .map(|_| Shard {
                entries: Mutex::new(HashMap::new()),
                notify: Notify::new(),
            })
            .collect();
        Self { shards }
    }

    fn shard(&self, name: &str) -> &Shard {
        let h = crc32fast::hash(name.as_bytes()) as usize;
        &self.shards[h % LOCK_SHARDS]
    }

    /// Acquire a lock, waiting until it can be granted.
    pub async fn lock(&self, name: &str, mode: LockMode) {
        let shard = self.shard(name);
        loop {
            let notified = shard.notify.notified();
            tokio::pin!(notified);
            // register for notification before the attempt, so an unlock
            // between a failed attempt and the await is not missed
            notified.as_mut().enable();
            {
                let mut entries = shard.entries.lock();
                let entry = entries.entry(name.to_string()).or_default();
                if entry.can_acquire(mode) {
                    entry.grant(mode);
                    return;
                }
            }
            notified.await;
        }
    }

    /// Release a previously acquired lock.
    pub fn unlock(&self, name: &str, mode: LockMode) {
        let shard = self.shard(name);
        {
            let mut entries = shard.entries.lock();
            let entry = entries
                .get_mut(name)
                .unwrap_or_else(|| panic!("unlock of unheld lock: {}", name));
            match mode {
                LockMode::Shared => {
                    debug_assert!(entry.readers > 0);
                    entry.readers = entry.readers.saturating_sub(1);
                }
                LockMode::Exclusive => {
                    debug_assert!(entry.writer);
                    entry.writer = false;
                }
            }
            if entry.is_free() {
                entries.remove(name);
            }
        }
        shard.notify.notify_waiters();
    }
}

impl Default for NameLocker {
    fn default() -> Self {
        Self::new()
    }
}
