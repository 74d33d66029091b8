//! scree - cluster rebalance engine for a distributed object-storage target.
//!
//! When cluster membership changes, every target redistributes its local
//! objects so that each object ends up on the node chosen by the
//! consistent-hash placement function. scree implements that core: the
//! staged coordinator, per-mountpath joggers, peer-to-peer object streams
//! with per-object acknowledgements and retransmission, and the local
//! "resilver" variant that reorganizes objects across mountpaths within
//! one node.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     RebalanceManager                         │
//! │  init → traverse → (ec-namespace) → wait-ack → fin → done    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Joggers: per-mountpath walkers  │  Receive: objects + acks  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Ack table │ GFN filter │ Stream bundles │ Broadcast polling │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Cluster map / HRW placement  │  Object store / mountpaths   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use scree::cluster::{ClusterMap, LoopbackControlPlane, TargetInfo};
//! use scree::config::ScreeConfig;
//! use scree::rebalance::RebalanceManager;
//! use scree::transport::LoopbackTransport;
//! use scree::TargetCtx;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> scree::Result<()> {
//!     let config = Arc::new(ScreeConfig::development("t1", "/tmp/scree/conf"));
//!     let smap = Arc::new(ClusterMap::new(1).with_target(TargetInfo {
//!         id: config.node.id.clone(),
//!         addr: "127.0.0.1:9010".to_string(),
//!     }));
//!     let ctx = TargetCtx::new(config, Arc::clone(&smap));
//!     ctx.mountpaths.add("/tmp/scree/disk1")?;
//!
//!     let transport = Arc::new(LoopbackTransport::new());
//!     let control = LoopbackControlPlane::new();
//!     let manager = RebalanceManager::new(Arc::clone(&ctx), transport, control.clone());
//!     control.register(ctx, &manager);
//!
//!     manager.run_rebalance(smap, 1, None).await
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod lock;
pub mod observability;
pub mod rebalance;
pub mod stats;
pub mod storage;
pub mod transport;
pub mod types;
pub mod xaction;

// Re-exports
pub use error::{Result, ScreeError};
pub use types::*;

use cluster::membership::{ClusterMap, MembershipOwner};
use config::ScreeConfig;
use stats::TargetStats;
use storage::{MountpathRegistry, ObjectStore};
use std::sync::Arc;

/// Per-target runtime context shared by the rebalance core.
pub struct TargetCtx {
    /// This target's daemon id.
    pub tid: TargetId,
    pub config: Arc<ScreeConfig>,
    /// Holder of the latest published cluster map.
    pub smap_owner: Arc<MembershipOwner>,
    pub mountpaths: Arc<MountpathRegistry>,
    pub store: Arc<ObjectStore>,
    pub buckets: Arc<BucketRegistry>,
    pub stats: Arc<TargetStats>,
}

impl TargetCtx {
    /// Assemble a context around an initial cluster map.
    pub fn new(config: Arc<ScreeConfig>, smap: Arc<ClusterMap>) -> Arc<Self> {
        let mountpaths = Arc::new(MountpathRegistry::new());
        let store = Arc::new(ObjectStore::new(Arc::clone(&mountpaths)));
        Arc::new(Self {
            tid: config.node.id.clone(),
            config,
            smap_owner: Arc::new(MembershipOwner::new(smap)),
            mountpaths,
            store,
            buckets: Arc::new(BucketRegistry::new()),
            stats: Arc::new(TargetStats::new()),
        })
    }
}
