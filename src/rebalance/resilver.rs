//! Resilver: intra-node redistribution across mountpaths.
//!
//! Used when only the local mountpath set changed. Joggers walk every
//! mountpath and relocate objects whose home mountpath moved; no streams
//! or acks are involved. With `skip_glob_misplaced` set, objects that no
//! longer belong to this node at all are left for global rebalance.

use crate::cluster::placement::hrw_target;
use crate::error::Result;
use crate::lock::LockMode;
use crate::observability;
use crate::storage::marker::{create_marker, remove_marker};
use crate::storage::Walk;
use crate::types::Provider;
use crate::xaction::{XactKind, Xaction};
use crate::TargetCtx;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, trace, warn};

const COPY_BUF_SIZE: usize = 128 * 1024;

/// Counters reported by one resilver run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResilverStats {
    /// Objects relocated to their home mountpath.
    pub moved: u64,
    /// Source copies removed after relocation.
    pub removed: u64,
}

/// Run a resilver over all mountpaths, optionally scoped to one native
/// bucket.
pub async fn run_resilver(
    ctx: Arc<TargetCtx>,
    skip_glob_misplaced: bool,
    bucket: Option<String>,
) -> Result<ResilverStats> {
    let paths = ctx.mountpaths.available();
    let marker = match create_marker(&ctx.config.node.conf_dir, XactKind::LocalReb) {
        Ok(path) => Some(path),
        Err(e) => {
            error!(target = %ctx.tid, error = %e, "failed to create in-progress marker");
            None
        }
    };
    let xact = Arc::new(
        Xaction::new(XactKind::LocalReb, ctx.smap_owner.version(), 0)
            .with_bucket(bucket.clone()),
    );
    info!(target = %ctx.tid, "{}", xact);

    let moved = Arc::new(AtomicU64::new(0));
    let removed = Arc::new(AtomicU64::new(0));
    let mut joggers = JoinSet::new();
    for mpath in &paths {
        let roots: Vec<PathBuf> = match &bucket {
            // special case: one native bucket only
            Some(b) => vec![mpath.objects_root(Provider::Native).join(b)],
            None => vec![
                mpath.objects_root(Provider::Native),
                mpath.objects_root(Provider::Cloud),
            ],
        };
        for root in roots {
            let jogger = ResilverJogger {
                ctx: Arc::clone(&ctx),
                xact: Arc::clone(&xact),
                root,
                skip_glob_misplaced,
                moved: Arc::clone(&moved),
                removed: Arc::clone(&removed),
            };
            joggers.spawn(jogger.jog());
        }
    }
    while joggers.join_next().await.is_some() {}

    if marker.is_some() && !xact.aborted() {
        if let Err(e) = remove_marker(&ctx.config.node.conf_dir, XactKind::LocalReb) {
            error!(target = %ctx.tid, error = %e, "failed to remove in-progress marker");
        }
    }
    xact.finish();

    let stats = ResilverStats {
        moved: moved.load(Ordering::Relaxed),
        removed: removed.load(Ordering::Relaxed),
    };
    info!(target = %ctx.tid, moved = stats.moved, removed = stats.removed, "resilver done");
    Ok(stats)
}

struct ResilverJogger {
    ctx: Arc<TargetCtx>,
    xact: Arc<Xaction>,
    root: PathBuf,
    skip_glob_misplaced: bool,
    moved: Arc<AtomicU64>,
    removed: Arc<AtomicU64>,
}

impl ResilverJogger {
    async fn jog(self) {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let walk = match Walk::new(&self.root) {
            Ok(walk) => walk,
            Err(e) => {
                error!(target = %self.ctx.tid, root = %self.root.display(), error = %e, "failed to traverse");
                return;
            }
        };
        for entry in walk {
            let fqn = match entry {
                Ok(fqn) => fqn,
                Err(e) => {
                    if self.xact.aborted() {
                        info!(root = %self.root.display(), "aborting traversal");
                    } else {
                        error!(target = %self.ctx.tid, root = %self.root.display(), error = %e, "traversal error");
                    }
                    break;
                }
            };
            if self.xact.aborted() {
                info!(root = %self.root.display(), "aborting traversal");
                break;
            }
            self.visit(fqn, &mut buf).await;
        }
    }

    async fn visit(&self, fqn: PathBuf, buf: &mut [u8]) {
        let store = &self.ctx.store;
        let mut lom = match store.init_fqn(&fqn) {
            Ok(lom) => lom,
            Err(_) => return,
        };
        let uname = lom.uname();

        // optionally leave globally-misplaced objects to global rebalance
        if self.skip_glob_misplaced {
            let smap = self.ctx.smap_owner.get();
            if let Ok(home) = hrw_target(&uname, &smap) {
                if home != self.ctx.tid {
                    return;
                }
            }
        }
        if store.load(&mut lom).is_err() {
            return;
        }
        // replica copies are pinned to their mountpath
        if lom.is_copy {
            return;
        }
        // skip those that are not locally misplaced
        match store.is_hrw(&lom) {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                trace!(object = %lom, error = %e, "skipping");
                return;
            }
        }

        match store.copy_local(&lom, buf) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(object = %lom, error = %e, "relocation failed");
                return;
            }
        }
        self.moved.fetch_add(1, Ordering::Relaxed);
        observability::record_resilver_move();

        if lom.has_copies() {
            return;
        }
        // misplaced with no replicas: remove the source right away
        store.lock(&uname, LockMode::Exclusive).await;
        match store.remove(&lom) {
            Ok(()) => {
                self.removed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(object = %lom, error = %e, "source removal failed"),
        }
        store.unlock(&uname, LockMode::Exclusive);
    }
}
