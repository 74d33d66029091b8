//! Sharded table of in-flight objects awaiting peer acknowledgement.
//!
//! Invariant: a key is present iff the object was handed to the stream
//! layer and its ack has not arrived. Sharding matches the LOM home-hash
//! fanout, so jogger inserts and receive-ack deletes rarely contend on the
//! same shard. Shard mutexes are never held across await points.

use crate::storage::{Lom, ACK_SHARDS};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Shard {
    q: Mutex<HashMap<String, Arc<Lom>>>,
}

/// The ack table.
pub struct AckTable {
    shards: Vec<Shard>,
}

impl AckTable {
    pub fn new() -> Self {
        let shards = (0..ACK_SHARDS)
            .map(|_| Shard {
                q: Mutex::new(HashMap::new()),
            })
            .collect();
        Self { shards }
    }

    /// Record an object as in flight. Called before the send is queued.
    pub fn insert(&self, lom: Arc<Lom>) {
        let (_, idx) = lom.hkey();
        self.shards[idx].q.lock().insert(lom.uname(), lom);
    }

    /// Drop an entry; returns it when present.
    pub fn remove(&self, idx: usize, uname: &str) -> Option<Arc<Lom>> {
        self.shards[idx].q.lock().remove(uname)
    }

    /// Total number of in-flight objects.
    pub fn pending(&self) -> usize {
        self.shards.iter().map(|s| s.q.lock().len()).sum()
    }

    /// One pending entry, for progress logging.
    pub fn any_pending(&self) -> Option<Arc<Lom>> {
        for shard in &self.shards {
            if let Some(lom) = shard.q.lock().values().next() {
                return Some(Arc::clone(lom));
            }
        }
        None
    }

    /// Snapshot of one shard's entries.
    pub fn shard_entries(&self, idx: usize) -> Vec<(String, Arc<Lom>)> {
        self.shards[idx]
            .q
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Empty every shard (start of a new run).
    pub fn reset(&self) {
        for shard in &self.shards {
            shard.q.lock().clear();
        }
    }
}

impl Default for AckTable {
    fn default() -> Self {
        Self::new()
    }
}
