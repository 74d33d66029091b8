//! Versioned cluster membership.
//!
//! A [`ClusterMap`] is immutable once published: readers hold an
//! `Arc<ClusterMap>` and never observe partial updates. The
//! [`MembershipOwner`] tracks the latest map for the node; the rebalance
//! coordinator additionally snapshots the map it was invoked with and
//! compares versions at loop boundaries.

use crate::types::{SmapVersion, TargetId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One storage target as seen by its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: TargetId,
    /// Network endpoint for intra-cluster traffic.
    pub addr: String,
}

/// An immutable, versioned view of the cluster's targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMap {
    pub version: SmapVersion,
    pub targets: BTreeMap<TargetId, TargetInfo>,
}

impl ClusterMap {
    pub fn new(version: SmapVersion) -> Self {
        Self {
            version,
            targets: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, info: TargetInfo) -> Self {
        self.targets.insert(info.id.clone(), info);
        self
    }

    pub fn target(&self, id: &TargetId) -> Option<&TargetInfo> {
        self.targets.get(id)
    }

    pub fn count_targets(&self) -> usize {
        self.targets.len()
    }

    /// All targets except `not`.
    pub fn others<'a>(&'a self, not: &'a TargetId) -> impl Iterator<Item = &'a TargetInfo> {
        self.targets.values().filter(move |t| &t.id != not)
    }

    /// A copy of this map with a bumped version.
    pub fn bumped(&self, version: SmapVersion) -> Self {
        let mut next = self.clone();
        next.version = version;
        next
    }
}

/// Holder of the latest published cluster map.
pub struct MembershipOwner {
    current: RwLock<Arc<ClusterMap>>,
}

impl MembershipOwner {
    pub fn new(initial: Arc<ClusterMap>) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    pub fn get(&self) -> Arc<ClusterMap> {
        Arc::clone(&self.current.read())
    }

    /// Publish a newer map. Older versions are ignored.
    pub fn put(&self, map: Arc<ClusterMap>) {
        let mut cur = self.current.write();
        if map.version > cur.version {
            *cur = map;
        }
    }

    pub fn version(&self) -> SmapVersion {
        self.current.read().version
    }
}
