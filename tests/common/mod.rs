//! Common test utilities: an in-process cluster of rebalance targets.

use scree::cluster::{hrw_target, ClusterMap, LoopbackControlPlane, TargetInfo};
use scree::config::ScreeConfig;
use scree::rebalance::RebalanceManager;
use scree::transport::LoopbackTransport;
use scree::types::{Provider, TargetId};
use scree::TargetCtx;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestTarget {
    pub tmp: TempDir,
    pub ctx: Arc<TargetCtx>,
    pub manager: Arc<RebalanceManager>,
}

/// A cluster of in-process targets wired over the loopback transport and
/// control plane.
pub struct TestCluster {
    pub transport: Arc<LoopbackTransport>,
    pub control: Arc<LoopbackControlPlane>,
    pub targets: Vec<TestTarget>,
    pub smap: Arc<ClusterMap>,
}

impl TestCluster {
    pub async fn new(targets: usize, mpaths: usize) -> Self {
        Self::new_with(targets, mpaths, |_| {}).await
    }

    pub async fn new_with(
        targets: usize,
        mpaths: usize,
        tune: impl Fn(&mut ScreeConfig),
    ) -> Self {
        let mut smap = ClusterMap::new(1);
        for i in 0..targets {
            smap = smap.with_target(TargetInfo {
                id: TargetId::from(format!("t{}", i + 1).as_str()),
                addr: format!("127.0.0.1:90{:02}", i + 1),
            });
        }
        let smap = Arc::new(smap);

        let transport = Arc::new(LoopbackTransport::new());
        let control = LoopbackControlPlane::new();
        let mut cluster_targets = Vec::new();
        for i in 0..targets {
            let tmp = TempDir::new().expect("tempdir");
            let mut config =
                ScreeConfig::development(format!("t{}", i + 1), tmp.path().join("conf"));
            tune(&mut config);
            config.validate().expect("test config");

            let ctx = TargetCtx::new(Arc::new(config), Arc::clone(&smap));
            for m in 0..mpaths {
                ctx.mountpaths
                    .add(tmp.path().join(format!("disk{}", m)))
                    .expect("mountpath");
            }
            let manager = RebalanceManager::new(
                Arc::clone(&ctx),
                Arc::clone(&transport) as Arc<dyn scree::transport::Transport>,
                Arc::clone(&control) as Arc<dyn scree::cluster::ControlPlane>,
            );
            control.register(Arc::clone(&ctx), &manager);
            cluster_targets.push(TestTarget { tmp, ctx, manager });
        }

        Self {
            transport,
            control,
            targets: cluster_targets,
            smap,
        }
    }

    pub fn tid(&self, idx: usize) -> TargetId {
        self.targets[idx].ctx.tid.clone()
    }

    /// Store an object on target `idx` (at that node's home mountpath).
    pub fn put(&self, idx: usize, bucket: &str, name: &str, data: &[u8]) {
        self.targets[idx]
            .ctx
            .store
            .put(bucket, name, Provider::Native, data)
            .expect("seed object");
    }

    /// Indices of the targets currently holding `bucket/name`.
    pub fn holders(&self, bucket: &str, name: &str) -> Vec<usize> {
        self.targets
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.ctx
                    .store
                    .init(bucket, name, Provider::Native)
                    .map(|lom| t.ctx.store.exists(&lom))
                    .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// The home target of `bucket/name` under `smap`.
    pub fn home_of(&self, smap: &ClusterMap, bucket: &str, name: &str) -> TargetId {
        let uname = format!("{}/{}/{}", Provider::Native.tree(), bucket, name);
        hrw_target(&uname, smap).expect("placement")
    }

    /// The `skip`-th generated object name homed at `home`.
    pub fn name_homed_at(&self, home: &TargetId, bucket: &str, skip: usize) -> String {
        let mut seen = 0;
        for i in 0..100_000 {
            let name = format!("obj-{}", i);
            if self.home_of(&self.smap, bucket, &name) == *home {
                if seen == skip {
                    return name;
                }
                seen += 1;
            }
        }
        panic!("no name homed at {}", home);
    }

    /// `count` distinct object names NOT homed at `not_home`.
    pub fn names_not_homed_at(&self, not_home: &TargetId, bucket: &str, count: usize) -> Vec<String> {
        let mut names = Vec::new();
        for i in 0..100_000 {
            if names.len() == count {
                break;
            }
            let name = format!("obj-{}", i);
            if self.home_of(&self.smap, bucket, &name) != *not_home {
                names.push(name);
            }
        }
        assert_eq!(names.len(), count, "not enough names");
        names
    }

    /// Publish a cluster map to every target's membership owner.
    pub fn publish(&self, smap: &Arc<ClusterMap>) {
        for t in &self.targets {
            t.ctx.smap_owner.put(Arc::clone(smap));
        }
    }

    /// Run one rebalance generation on every target concurrently.
    pub async fn run_all(&self, smap: &Arc<ClusterMap>, reb_id: i64) -> Vec<scree::Result<()>> {
        let mut handles = Vec::new();
        for t in &self.targets {
            let manager = Arc::clone(&t.manager);
            let smap = Arc::clone(smap);
            handles.push(tokio::spawn(async move {
                manager.run_rebalance(smap, reb_id, None).await
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("run task"));
        }
        results
    }
}
