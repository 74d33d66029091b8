//! Per-mountpath traversal and transmission.
//!
//! One jogger runs per `(mountpath, provider)` pair. The walk is unsorted;
//! per entry the jogger resolves the home target, skips objects already in
//! place or recently served to neighbors, and hands misplaced objects to
//! the object stream. With a multiplier above one, sends run as bounded
//! concurrent tasks; send errors are logged and the walk continues.

use crate::cluster::membership::TargetInfo;
use crate::cluster::placement::hrw_target;
use crate::error::{Result, ScreeError};
use crate::lock::LockMode;
use crate::storage::{Lom, Mountpath, Walk};
use crate::transport::{SendPayload, TransportHeader};
use crate::types::{ObjectAttrs, Provider, SmapVersion};
use crate::xaction::Xaction;

use super::RebalanceManager;
use crate::cluster::membership::ClusterMap;

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

pub(crate) struct RebJogger {
    m: Arc<RebalanceManager>,
    xact: Arc<Xaction>,
    smap: Arc<ClusterMap>,
    mpath: Arc<Mountpath>,
    provider: Provider,
    ver: SmapVersion,
    sema: Option<Arc<Semaphore>>,
}

impl RebJogger {
    pub(crate) fn new(
        m: Arc<RebalanceManager>,
        xact: Arc<Xaction>,
        smap: Arc<ClusterMap>,
        mpath: Arc<Mountpath>,
        provider: Provider,
        multiplier: u8,
    ) -> Self {
        let ver = smap.version;
        let sema = (multiplier > 1).then(|| Arc::new(Semaphore::new(multiplier as usize)));
        Self {
            m,
            xact,
            smap,
            mpath,
            provider,
            ver,
            sema,
        }
    }

    pub(crate) async fn jog(self) {
        let root = self.mpath.objects_root(self.provider);
        let walk = match Walk::new(&root) {
            Ok(walk) => walk,
            Err(e) => {
                error!(target = %self.m.ctx.tid, root = %root.display(), error = %e, "failed to traverse");
                return;
            }
        };
        for entry in walk {
            let fqn = match entry {
                Ok(fqn) => fqn,
                Err(e) => {
                    if self.xact.aborted() || self.xact.finished() {
                        info!(root = %root.display(), "aborting traversal");
                    } else {
                        error!(target = %self.m.ctx.tid, root = %root.display(), error = %e, "traversal error");
                    }
                    break;
                }
            };
            if let ControlFlow::Break(()) = self.visit(fqn).await {
                break;
            }
        }
    }

    async fn visit(&self, fqn: PathBuf) -> ControlFlow<()> {
        if self.xact.aborted() || self.xact.finished() {
            info!(mpath = %self.mpath, "aborting traversal");
            return ControlFlow::Break(());
        }
        let store = &self.m.ctx.store;
        let mut lom = match store.init_fqn(&fqn) {
            Ok(lom) => lom,
            Err(e) => {
                // not every filesystem entry is an object
                trace!(fqn = %fqn.display(), error = %e, "skipping");
                return ControlFlow::Continue(());
            }
        };
        let uname = lom.uname();
        let home = match hrw_target(&uname, &self.smap) {
            Ok(home) => home,
            Err(e) => {
                error!(error = %e, object = %lom, "placement failed, stopping traversal");
                return ControlFlow::Break(());
            }
        };
        if home == self.m.ctx.tid {
            return ControlFlow::Continue(());
        }

        // a newer cluster map voids this run
        let nver = self.m.ctx.smap_owner.version();
        if nver > self.ver {
            self.xact.abort();
            error!(
                "{}: cluster map v{} < v{}, path {}",
                self.xact, self.ver, nver, self.mpath
            );
            return ControlFlow::Break(());
        }

        // skip objects already served via get-from-neighbor; probabilistic
        // false positives only cost a send that retransmit will repair
        if self.m.gfn.lookup(&uname) {
            self.m.gfn.delete(&uname);
            return ControlFlow::Continue(());
        }

        if let Err(e) = store.load(&mut lom) {
            trace!(object = %lom, error = %e, "load failed, skipping");
            return ControlFlow::Continue(());
        }
        let Some(tsi) = self.smap.target(&home).cloned() else {
            warn!(object = %lom, home = %home, "home target missing from map");
            return ControlFlow::Continue(());
        };
        debug!("{} {} => {}", lom, self.m.ctx.tid, tsi.id);

        match &self.sema {
            None => {
                if let Err(e) = send_object(&self.m, lom, &tsi).await {
                    debug!(error = %e, "send failed");
                }
            }
            Some(sema) => {
                let Ok(permit) = Arc::clone(sema).acquire_owned().await else {
                    return ControlFlow::Break(());
                };
                let m = Arc::clone(&self.m);
                let tsi = tsi.clone();
                tokio::spawn(async move {
                    let res = send_object(&m, lom, &tsi).await;
                    drop(permit);
                    if let Err(e) = res {
                        warn!(error = %e, "send failed");
                    }
                });
            }
        }
        ControlFlow::Continue(())
    }
}

/// Transmit one object to its home target.
///
/// The shared lock taken here is released by the stream completion
/// callback on success, and inline on every failure path. The ack-table
/// entry is inserted before the send so a fast ack can never miss it.
/// Returns false when the object vanished or turned out to be a replica.
pub(crate) async fn send_object(
    m: &Arc<RebalanceManager>,
    mut lom: Lom,
    tsi: &TargetInfo,
) -> Result<bool> {
    let store = &m.ctx.store;
    let uname = lom.uname();
    store.lock(&uname, LockMode::Shared).await;

    let queued: Result<bool> = async {
        store.load(&mut lom)?;
        if !store.exists(&lom) || lom.is_copy {
            return Ok(false);
        }
        let cksum = store.cksum_compute_if_missing(&mut lom)?;
        let file = store.open(&lom)?;
        let bundle = m
            .streams
            .read()
            .clone()
            .ok_or_else(|| ScreeError::StreamClosed("rebalance".to_string()))?;

        let hdr = TransportHeader {
            bucket: lom.bucket.clone(),
            name: lom.name.clone(),
            provider: lom.provider,
            opaque: m.ctx.tid.to_string(),
            attrs: ObjectAttrs {
                size: lom.attrs.size,
                atime_ns: lom.attrs.atime_ns,
                version: lom.attrs.version,
                cksum: Some(cksum),
            },
        };

        // pin as pending-acknowledgement before handing to the stream
        let lom = Arc::new(lom);
        m.acks.insert(Arc::clone(&lom));

        let cb_m = Arc::clone(m);
        let cb_lom = Arc::clone(&lom);
        let cb = Box::new(move |hdr: &TransportHeader, res: Result<u64>| {
            cb_m.ctx.store.unlock(&cb_lom.uname(), LockMode::Shared);
            match res {
                Err(e) => {
                    error!(target = %cb_m.ctx.tid, object = %cb_lom, error = %e, "failed to send");
                }
                Ok(size) => {
                    debug_assert_eq!(size, cb_lom.attrs.size, "{}", cb_lom);
                    cb_m.ctx.stats.add_tx(hdr.attrs.size);
                }
            }
        });

        if let Err(e) = bundle
            .send(hdr, SendPayload::File(file), Some(cb), &tsi.id)
            .await
        {
            let (_, idx) = lom.hkey();
            m.acks.remove(idx, &lom.uname());
            return Err(e);
        }
        Ok(true)
    }
    .await;

    match queued {
        Ok(true) => Ok(true),
        Ok(false) => {
            store.unlock(&uname, LockMode::Shared);
            Ok(false)
        }
        Err(e) => {
            store.unlock(&uname, LockMode::Shared);
            debug!(object = %uname, error = %e, "send not queued");
            Err(e)
        }
    }
}
