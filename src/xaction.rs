//! Long-running activity lifecycle.
//!
//! An [`Xaction`] names one run of a background activity and carries its
//! cancellation state. Cancellation propagates by polling: every loop in
//! the rebalance core checks [`Xaction::aborted`] at iteration boundaries,
//! no task is interrupted.

use crate::types::{RebId, SmapVersion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Kind of activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XactKind {
    /// Cluster-wide rebalance.
    GlobalReb,
    /// Intra-node resilver.
    LocalReb,
}

impl XactKind {
    pub fn name(&self) -> &'static str {
        match self {
            XactKind::GlobalReb => "rebalance",
            XactKind::LocalReb => "resilver",
        }
    }
}

/// A named long-running activity with run/abort/finish lifecycle.
#[derive(Debug)]
pub struct Xaction {
    pub id: String,
    pub kind: XactKind,
    /// Cluster map version this run was started against.
    pub smap_version: SmapVersion,
    /// Rebalance generation id (zero for resilver).
    pub reb_id: RebId,
    /// Optional single-bucket scope.
    pub bucket: Option<String>,
    aborted: AtomicBool,
    finished: AtomicBool,
}

impl Xaction {
    pub fn new(kind: XactKind, smap_version: SmapVersion, reb_id: RebId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            smap_version,
            reb_id,
            bucket: None,
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn with_bucket(mut self, bucket: Option<String>) -> Self {
        self.bucket = bucket;
        self
    }

    /// Request cancellation. Idempotent.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Mark the activity finished. Idempotent.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Sleep for `dur`, then report whether the activity was aborted.
    pub async fn aborted_after(&self, dur: Duration) -> bool {
        tokio::time::sleep(dur).await;
        self.aborted()
    }
}

impl std::fmt::Display for Xaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[g{},v{}]", self.kind.name(), self.reb_id, self.smap_version)?;
        if let Some(ref b) = self.bucket {
            write!(f, "[{}]", b)?;
        }
        Ok(())
    }
}
