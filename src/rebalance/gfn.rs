//! Get-from-neighbor recent-keys filter.
//!
//! A counting Bloom filter over object unique-names. The read path inserts
//! keys it served to neighbors during rebalance; the jogger consults (and
//! erases) them to suppress redundant sends. The filter is advisory: a
//! false positive only costs a lost send opportunity, which the retransmit
//! path repairs.

use std::sync::atomic::{AtomicU8, Ordering};

const FILTER_SLOTS: usize = 1 << 16;
const PROBES: u32 = 4;

/// Concurrency-safe approximate set with deletion.
pub struct GfnFilter {
    counters: Box<[AtomicU8]>,
}

impl GfnFilter {
    pub fn new() -> Self {
        let counters = (0..FILTER_SLOTS).map(|_| AtomicU8::new(0)).collect();
        Self { counters }
    }

    fn slots(key: &str) -> [usize; PROBES as usize] {
        let h1 = crc32fast::hash(key.as_bytes());
        let mut hasher = crc32fast::Hasher::new_with_initial(0x9e37_79b9);
        hasher.update(key.as_bytes());
        let h2 = hasher.finalize() | 1;

        let mut slots = [0usize; PROBES as usize];
        for (i, slot) in slots.iter_mut().enumerate() {
            *slot = (h1.wrapping_add(h2.wrapping_mul(i as u32)) as usize) % FILTER_SLOTS;
        }
        slots
    }

    pub fn insert(&self, key: &str) {
        for slot in Self::slots(key) {
            // Saturate rather than wrap; a saturated counter is never
            // decremented, trading deletions for correctness of lookups.
            let _ = self.counters[slot].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                (c < u8::MAX).then_some(c + 1)
            });
        }
    }

    pub fn lookup(&self, key: &str) -> bool {
        Self::slots(key)
            .iter()
            .all(|&slot| self.counters[slot].load(Ordering::Relaxed) > 0)
    }

    pub fn delete(&self, key: &str) {
        for slot in Self::slots(key) {
            let _ = self.counters[slot].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                (c > 0 && c < u8::MAX).then_some(c - 1)
            });
        }
    }

    /// Drop all entries.
    pub fn reset(&self) {
        for counter in self.counters.iter() {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for GfnFilter {
    fn default() -> Self {
        Self::new()
    }
}
