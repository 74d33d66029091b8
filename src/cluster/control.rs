//! Peer control plane: status polling, pings, HEAD probes, EC inventory.
//!
//! The rebalance coordinator talks to its peers through [`ControlPlane`];
//! the broadcast-polling helper evaluates predicates over the returned
//! [`RebStatus`] payloads. [`LoopbackControlPlane`] wires in-process
//! targets together for single-process clusters and tests.

use crate::error::{Result, ScreeError};
use crate::rebalance::ec::EcRecord;
use crate::rebalance::stage::Stage;
use crate::rebalance::RebalanceManager;
use crate::stats::RebStatsSnapshot;
use crate::types::{Provider, RebId, SmapVersion, TargetId};
use crate::TargetCtx;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::membership::TargetInfo;

/// Rebalance status of one target, as reported to peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebStatus {
    pub target: TargetId,
    pub stage: Stage,
    pub reb_id: RebId,
    pub smap_version: SmapVersion,
    pub aborted: bool,
    pub running: bool,
    pub stats_delta: RebStatsSnapshot,
}

/// Peer-facing control operations consumed by the rebalance core.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Liveness probe.
    async fn ping(&self, tsi: &TargetInfo) -> Result<()>;

    /// Fetch the peer's rebalance status.
    async fn reb_status(&self, tsi: &TargetInfo) -> Result<RebStatus>;

    /// Lightweight existence probe for one object at the peer.
    async fn head_object(
        &self,
        tsi: &TargetInfo,
        bucket: &str,
        name: &str,
        provider: Provider,
    ) -> Result<bool>;

    /// Fetch the peer's local EC slice/replica inventory.
    async fn ec_inventory(&self, tsi: &TargetInfo) -> Result<Vec<EcRecord>>;
}

struct PeerHandle {
    ctx: Arc<TargetCtx>,
    manager: Weak<RebalanceManager>,
}

/// In-process control plane over registered targets.
#[derive(Default)]
pub struct LoopbackControlPlane {
    peers: RwLock<HashMap<TargetId, PeerHandle>>,
}

impl LoopbackControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, ctx: Arc<TargetCtx>, manager: &Arc<RebalanceManager>) {
        self.peers.write().insert(
            ctx.tid.clone(),
            PeerHandle {
                ctx,
                manager: Arc::downgrade(manager),
            },
        );
    }

    fn manager_of(&self, tid: &TargetId) -> Result<Arc<RebalanceManager>> {
        let peers = self.peers.read();
        peers
            .get(tid)
            .and_then(|h| h.manager.upgrade())
            .ok_or_else(|| ScreeError::PeerUnreachable(tid.to_string()))
    }

    fn ctx_of(&self, tid: &TargetId) -> Result<Arc<TargetCtx>> {
        let peers = self.peers.read();
        peers
            .get(tid)
            .map(|h| Arc::clone(&h.ctx))
            .ok_or_else(|| ScreeError::PeerUnreachable(tid.to_string()))
    }
}

#[async_trait]
impl ControlPlane for LoopbackControlPlane {
    async fn ping(&self, tsi: &TargetInfo) -> Result<()> {
        self.ctx_of(&tsi.id).map(|_| ())
    }

    async fn reb_status(&self, tsi: &TargetInfo) -> Result<RebStatus> {
        Ok(self.manager_of(&tsi.id)?.status())
    }

    async fn head_object(
        &self,
        tsi: &TargetInfo,
        bucket: &str,
        name: &str,
        provider: Provider,
    ) -> Result<bool> {
        let ctx = self.ctx_of(&tsi.id)?;
        let lom = ctx.store.init(bucket, name, provider)?;
        Ok(ctx.store.exists(&lom))
    }

    async fn ec_inventory(&self, tsi: &TargetInfo) -> Result<Vec<EcRecord>> {
        let ctx = self.ctx_of(&tsi.id)?;
        crate::rebalance::ec::collect_local_inventory(&ctx)
    }
}
