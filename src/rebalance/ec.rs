//! EC namespace scrub.
//!
//! When any bucket has erasure coding enabled, the coordinator reconciles
//! the cluster-wide EC namespace before moving data: each target collects
//! its local slice/replica inventory, fetches every peer's inventory
//! through the control plane, and merges them into a global view. EC
//! metadata lives under each mountpath's `ec/` tree as
//! `<bucket>/<object>.s<N>` (slice N) or `<bucket>/<object>.r` (replica).

use crate::cluster::control::ControlPlane;
use crate::cluster::membership::ClusterMap;
use crate::error::{Result, ScreeError};
use crate::storage::Walk;
use crate::types::TargetId;
use crate::xaction::Xaction;
use crate::TargetCtx;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Role of one EC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EcSlice {
    /// Data or parity slice with its index.
    Slice(u16),
    /// Full replica.
    Replica,
}

/// One EC slice or replica present on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcRecord {
    pub bucket: String,
    pub name: String,
    pub slice: EcSlice,
    pub size: u64,
}

/// Reconciled cluster-wide EC namespace.
#[derive(Debug, Default)]
pub struct EcView {
    /// `bucket/name` to every known slice/replica and its holder.
    pub objects: HashMap<String, Vec<(TargetId, EcRecord)>>,
}

impl EcView {
    fn merge(&mut self, tid: TargetId, records: Vec<EcRecord>) {
        for record in records {
            let key = format!("{}/{}", record.bucket, record.name);
            self.objects.entry(key).or_default().push((tid.clone(), record));
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn record_count(&self) -> usize {
        self.objects.values().map(|v| v.len()).sum()
    }
}

/// Collect this node's EC inventory from every mountpath.
pub fn collect_local_inventory(ctx: &Arc<TargetCtx>) -> Result<Vec<EcRecord>> {
    let mut records = Vec::new();
    for mpath in ctx.mountpaths.available() {
        let root = mpath.ec_root();
        for entry in Walk::new(&root)? {
            let fqn = entry?;
            let Ok(rel) = fqn.strip_prefix(&root) else {
                continue;
            };
            let mut comps = rel.iter().map(|c| c.to_string_lossy().into_owned());
            let Some(bucket) = comps.next() else { continue };
            let rest = comps.collect::<Vec<_>>().join("/");
            let Some((name, slice)) = parse_slice_name(&rest) else {
                trace!(fqn = %fqn.display(), "not an EC record, skipping");
                continue;
            };
            let size = std::fs::metadata(&fqn).map(|m| m.len()).unwrap_or(0);
            records.push(EcRecord {
                bucket,
                name: name.to_string(),
                slice,
                size,
            });
        }
    }
    Ok(records)
}

fn parse_slice_name(rest: &str) -> Option<(&str, EcSlice)> {
    let (name, suffix) = rest.rsplit_once('.')?;
    if name.is_empty() {
        return None;
    }
    if suffix == "r" {
        return Some((name, EcSlice::Replica));
    }
    let idx = suffix.strip_prefix('s')?.parse::<u16>().ok()?;
    Some((name, EcSlice::Slice(idx)))
}

/// The EC namespace scrubber.
pub struct EcScrubber {
    ctx: Arc<TargetCtx>,
    control: Arc<dyn ControlPlane>,
    xact: Arc<Xaction>,
}

impl EcScrubber {
    pub fn new(ctx: Arc<TargetCtx>, control: Arc<dyn ControlPlane>, xact: Arc<Xaction>) -> Self {
        Self { ctx, control, xact }
    }

    /// Collect local inventory, fetch every peer's, merge.
    ///
    /// Any failure fails the whole scrub; the coordinator treats it as a
    /// non-abort error for the run.
    pub async fn run(&self, smap: &Arc<ClusterMap>) -> Result<EcView> {
        let mut view = EcView::default();
        let local = collect_local_inventory(&self.ctx)
            .map_err(|e| ScreeError::EcScrub(format!("local inventory: {}", e)))?;
        view.merge(self.ctx.tid.clone(), local);

        for tsi in smap.others(&self.ctx.tid) {
            if self.xact.aborted() {
                return Err(ScreeError::Aborted(format!("{}", self.xact)));
            }
            let records = self
                .control
                .ec_inventory(tsi)
                .await
                .map_err(|e| ScreeError::EcScrub(format!("inventory from {}: {}", tsi.id, e)))?;
            view.merge(tsi.id.clone(), records);
        }
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScreeConfig;
    use crate::types::TargetId;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_slice_name() {
        assert_eq!(parse_slice_name("obj.s3"), Some(("obj", EcSlice::Slice(3))));
        assert_eq!(parse_slice_name("obj.r"), Some(("obj", EcSlice::Replica)));
        assert_eq!(
            parse_slice_name("a.tar.s12"),
            Some(("a.tar", EcSlice::Slice(12)))
        );
        assert_eq!(parse_slice_name("obj"), None);
        assert_eq!(parse_slice_name("obj.sx"), None);
        assert_eq!(parse_slice_name(".s1"), None);
    }

    #[test]
    fn test_collect_local_inventory() {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(ScreeConfig::development("t1", tmp.path().join("conf")));
        let smap = Arc::new(
            crate::cluster::ClusterMap::new(1).with_target(crate::cluster::TargetInfo {
                id: TargetId::from("t1"),
                addr: String::new(),
            }),
        );
        let ctx = TargetCtx::new(config, smap);
        let mp = ctx.mountpaths.add(tmp.path().join("m0")).unwrap();

        let dir = mp.ec_root().join("media");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("video.s0"), b"slice0").unwrap();
        fs::write(dir.join("video.s1"), b"slice1").unwrap();
        fs::write(dir.join("thumb.r"), b"replica").unwrap();
        fs::write(dir.join("junk"), b"ignored").unwrap();

        let mut records = collect_local_inventory(&ctx).unwrap();
        records.sort_by(|a, b| (a.name.clone(), format!("{:?}", a.slice)).cmp(&(b.name.clone(), format!("{:?}", b.slice))));
        assert_eq!(records.len(), 3);
        assert!(records
            .iter()
            .any(|r| r.name == "thumb" && r.slice == EcSlice::Replica));
        assert!(records
            .iter()
            .any(|r| r.name == "video" && r.slice == EcSlice::Slice(1) && r.size == 6));
    }

    #[test]
    fn test_view_merge() {
        let mut view = EcView::default();
        let rec = |name: &str, slice| EcRecord {
            bucket: "b".to_string(),
            name: name.to_string(),
            slice,
            size: 1,
        };
        view.merge(TargetId::from("t1"), vec![rec("o", EcSlice::Slice(0))]);
        view.merge(TargetId::from("t2"), vec![rec("o", EcSlice::Slice(1)), rec("p", EcSlice::Replica)]);

        assert_eq!(view.object_count(), 2);
        assert_eq!(view.record_count(), 3);
        assert_eq!(view.objects["b/o"].len(), 2);
    }
}
