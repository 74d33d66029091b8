//! Cluster rebalance coordinator.
//!
//! Upon a membership change every target runs [`RebalanceManager::run_rebalance`]
//! with the new cluster map and a fresh generation id. The run advances
//! through linear stages (init, traverse, wait-ack, fin, fin-streams),
//! streaming misplaced objects to their home targets while the always-live
//! receive handlers persist incoming objects and acknowledge them back to
//! the sender. Peers coordinate only through broadcast status polling; no
//! stage transition is driven remotely.

pub mod ack_table;
pub mod ec;
pub mod gfn;
pub mod jogger;
pub mod receive;
pub mod resilver;
pub mod stage;

pub use resilver::{run_resilver, ResilverStats};
pub use stage::Stage;

use crate::cluster::control::{ControlPlane, RebStatus};
use crate::cluster::membership::ClusterMap;
use crate::cluster::placement::hrw_target;
use crate::error::{Result, ScreeError};
use crate::observability;
use crate::stats::RebStatsSnapshot;
use crate::storage::marker::{create_marker, remove_marker};
use crate::storage::Mountpath;
use crate::transport::{BundleArgs, StreamBundle, Transport, ACK_STREAM, OBJECT_STREAM};
use crate::types::{RebId, SmapVersion, TargetId};
use crate::xaction::{XactKind, Xaction};
use crate::TargetCtx;

use ack_table::AckTable;
use ec::EcScrubber;
use gfn::GfnFilter;
use receive::{AckReceiver, ObjReceiver};
use stage::StageCell;

use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The per-target rebalance coordinator.
///
/// One instance lives for the process lifetime; its receive handlers are
/// registered at construction and stay live across runs.
pub struct RebalanceManager {
    pub(crate) ctx: Arc<TargetCtx>,
    transport: Arc<dyn Transport>,
    control: Arc<dyn ControlPlane>,
    pub(crate) gfn: GfnFilter,
    pub(crate) acks: AckTable,
    /// Membership snapshot published at Init, taken down with the streams.
    pub(crate) smap: RwLock<Option<Arc<ClusterMap>>>,
    pub(crate) streams: RwLock<Option<Arc<dyn StreamBundle>>>,
    pub(crate) ack_streams: RwLock<Option<Arc<dyn StreamBundle>>>,
    pub(crate) stage: StageCell,
    reb_id: AtomicI64,
    pub(crate) laterx: AtomicBool,
    sema: Arc<Semaphore>,
    run_permit: Mutex<Option<OwnedSemaphorePermit>>,
    begin_stats: Mutex<Option<RebStatsSnapshot>>,
    pub(crate) cur_xact: Mutex<Option<Arc<Xaction>>>,
    retransmitted: AtomicU64,
}

struct RunArgs {
    smap: Arc<ClusterMap>,
    xact: Arc<Xaction>,
    paths: Vec<Arc<Mountpath>>,
    marker: Option<PathBuf>,
}

/// Outcome of run admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SerializeOutcome {
    Admitted,
    NewerSmap,
    AlreadyRunning,
}

/// Predicate evaluated by broadcast polling.
#[derive(Debug, Clone, Copy)]
enum SyncCheck {
    /// Liveness ping with quick retries.
    Ping,
    /// Peer can receive: stage at least Traverse for this generation.
    RxReady,
    /// Peer is finishing or at least draining acks.
    WaitFinExtended,
    /// Peer reached the given stage.
    AtStage(Stage),
}

impl RebalanceManager {
    /// Create the coordinator and register its stream receive handlers.
    pub fn new(
        ctx: Arc<TargetCtx>,
        transport: Arc<dyn Transport>,
        control: Arc<dyn ControlPlane>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            ctx,
            transport,
            control,
            gfn: GfnFilter::new(),
            acks: AckTable::new(),
            smap: RwLock::new(None),
            streams: RwLock::new(None),
            ack_streams: RwLock::new(None),
            stage: StageCell::new(),
            reb_id: AtomicI64::new(0),
            laterx: AtomicBool::new(false),
            sema: Arc::new(Semaphore::new(1)),
            run_permit: Mutex::new(None),
            begin_stats: Mutex::new(None),
            cur_xact: Mutex::new(None),
            retransmitted: AtomicU64::new(0),
        });
        let tid = manager.ctx.tid.clone();
        manager.transport.register(
            &tid,
            OBJECT_STREAM,
            Arc::new(ObjReceiver(Arc::downgrade(&manager))),
        );
        manager.transport.register(
            &tid,
            ACK_STREAM,
            Arc::new(AckReceiver(Arc::downgrade(&manager))),
        );
        manager
    }

    fn loghdr(&self, reb_id: RebId, ver: SmapVersion) -> String {
        format!("{}[g{},v{},{}]", self.ctx.tid, reb_id, ver, self.stage.load())
    }

    /// The membership snapshot published at Init, if any.
    pub fn smap_snapshot(&self) -> Option<Arc<ClusterMap>> {
        self.smap.read().clone()
    }

    /// The current (or last) run's activity handle.
    pub fn current_xaction(&self) -> Option<Arc<Xaction>> {
        self.cur_xact.lock().clone()
    }

    /// Abort the current run, if one is active.
    pub fn abort_run(&self) {
        if let Some(xact) = self.cur_xact.lock().as_ref() {
            xact.abort();
        }
    }

    /// Total objects resent by the retransmit path.
    pub fn retransmit_count(&self) -> u64 {
        self.retransmitted.load(Ordering::Relaxed)
    }

    /// Number of transmitted objects still awaiting acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.acks.pending()
    }

    /// Record that the read path served `uname` to a neighbor, so the
    /// traversal can suppress the redundant shipment.
    pub fn gfn_served(&self, uname: &str) {
        self.gfn.insert(uname);
    }

    /// Status payload served to peers.
    pub fn status(&self) -> RebStatus {
        let xact = self.cur_xact.lock().clone();
        let (aborted, running) = xact
            .as_ref()
            .map(|x| (x.aborted(), !x.finished()))
            .unwrap_or((false, false));
        let begin = *self.begin_stats.lock();
        let stats_delta = begin
            .map(|b| self.ctx.stats.snapshot().delta_since(&b))
            .unwrap_or_default();
        let smap_version = self
            .smap
            .read()
            .as_ref()
            .map(|s| s.version)
            .unwrap_or_else(|| self.ctx.smap_owner.version());
        RebStatus {
            target: self.ctx.tid.clone(),
            stage: self.stage.load(),
            reb_id: self.reb_id.load(Ordering::SeqCst),
            smap_version,
            aborted,
            running,
            stats_delta,
        }
    }

    /// Run one cluster rebalance against `smap` with generation `reb_id`.
    ///
    /// Idempotent with respect to the generation id: a repeated call with
    /// the same id returns immediately. A rejected admission (newer map,
    /// already running) is logged and returns `Ok`.
    pub async fn run_rebalance(
        self: &Arc<Self>,
        smap: Arc<ClusterMap>,
        reb_id: RebId,
        bucket: Option<String>,
    ) -> Result<()> {
        // 1. check that the other targets are up and running
        let err_cnt = self.bcast(&smap, reb_id, SyncCheck::Ping, None).await;
        if err_cnt > 0 {
            return Err(ScreeError::PeerUnreachable(format!(
                "{}: {} of {} peers failed the precheck ping",
                self.loghdr(reb_id, smap.version),
                err_cnt,
                smap.count_targets().saturating_sub(1)
            )));
        }

        // 2. serialize: one rebalance at a time past this point
        match self.serialize(&smap, reb_id).await {
            SerializeOutcome::Admitted => {}
            SerializeOutcome::NewerSmap | SerializeOutcome::AlreadyRunning => return Ok(()),
        }

        // 3. snapshot the available mountpaths
        let paths = self.ctx.mountpaths.available();

        let args = match self.init(Arc::clone(&smap), reb_id, bucket, paths).await {
            Ok(args) => args,
            Err(e) => {
                error!(target = %self.ctx.tid, error = %e, "rebalance init failed");
                if let Some(xact) = self.cur_xact.lock().as_ref() {
                    xact.finish();
                }
                self.stage.store(Stage::Inactive);
                *self.run_permit.lock() = None;
                return Err(e);
            }
        };

        let mut err_cnt = 0;
        match self.sync_and_run(&args).await {
            Ok(()) => err_cnt = self.wait_ack(&args).await,
            Err(e) => warn!("{}: {}", self.loghdr(reb_id, smap.version), e),
        }
        self.stage.store(Stage::Fin);
        while err_cnt != 0 && !args.xact.aborted() {
            err_cnt = self
                .bcast(&args.smap, reb_id, SyncCheck::WaitFinExtended, Some(&args.xact))
                .await;
        }
        self.fini(&args).await;
        Ok(())
    }

    async fn serialize(&self, smap: &Arc<ClusterMap>, reb_id: RebId) -> SerializeOutcome {
        let sleep = self.ctx.config.timeout.cplane_operation;
        let ver = smap.version;
        let mut permit: Option<OwnedSemaphorePermit> = None;
        loop {
            if permit.is_none() {
                permit = Arc::clone(&self.sema).try_acquire_owned().ok();
            }
            let loghdr = self.loghdr(reb_id, ver);
            // vs newer cluster map
            let nver = self.ctx.smap_owner.version();
            if nver > ver {
                warn!("{}: seeing newer cluster map v{}, not running", loghdr, nver);
                return SerializeOutcome::NewerSmap;
            }
            if self.reb_id.load(Ordering::SeqCst) == reb_id {
                warn!("{}: g{} is already running", loghdr, reb_id);
                return SerializeOutcome::AlreadyRunning;
            }
            // vs the current xaction
            let other = self.cur_xact.lock().clone();
            match other {
                None => {
                    if let Some(p) = permit.take() {
                        *self.run_permit.lock() = Some(p);
                        return SerializeOutcome::Admitted;
                    }
                    warn!("{}: waiting for the previous run to release", loghdr);
                }
                Some(xact) => {
                    if let Some(p) = permit.take() {
                        debug_assert!(xact.finished());
                        *self.run_permit.lock() = Some(p);
                        return SerializeOutcome::Admitted;
                    }
                    if xact.smap_version < ver && !xact.finished() {
                        xact.abort();
                        warn!("{}: aborting older run [{}]", loghdr, xact);
                    }
                }
            }
            tokio::time::sleep(sleep).await;
        }
    }

    async fn init(
        &self,
        smap: Arc<ClusterMap>,
        reb_id: RebId,
        bucket: Option<String>,
        paths: Vec<Arc<Mountpath>>,
    ) -> Result<RunArgs> {
        self.stage.store(Stage::Init);
        let xact = Arc::new(Xaction::new(XactKind::GlobalReb, smap.version, reb_id).with_bucket(bucket));
        *self.cur_xact.lock() = Some(Arc::clone(&xact));

        *self.begin_stats.lock() = Some(self.ctx.stats.snapshot());
        self.begin_streams(&smap).await?;
        self.gfn.reset();
        self.acks.reset();

        let marker = match create_marker(&self.ctx.config.node.conf_dir, XactKind::GlobalReb) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(target = %self.ctx.tid, error = %e, "failed to create in-progress marker");
                None
            }
        };

        // ready: receive handlers unblock on this publication
        *self.smap.write() = Some(Arc::clone(&smap));
        self.reb_id.store(reb_id, Ordering::SeqCst);
        info!("{}: {}", self.loghdr(reb_id, smap.version), xact);

        Ok(RunArgs {
            smap,
            xact,
            paths,
            marker,
        })
    }

    async fn begin_streams(&self, smap: &Arc<ClusterMap>) -> Result<()> {
        debug_assert_eq!(self.stage.load(), Stage::Init);
        let config = &self.ctx.config.rebalance;
        let mut multiplier = config.multiplier;
        if multiplier == 0 {
            multiplier = 1;
        } else if multiplier > 8 {
            warn!(target = %self.ctx.tid, multiplier, "stream multiplier misconfigured, clamping to 8");
            multiplier = 8;
        }

        let obj_args = BundleArgs::new(OBJECT_STREAM)
            .with_compression(config.compression)
            .with_multiplier(multiplier)
            .with_manual_resync();
        let streams = self
            .transport
            .open_bundle(&self.ctx.tid, Arc::clone(smap), obj_args)
            .await?;
        *self.streams.write() = Some(streams);

        // acks ride a separate bundle with default transport arguments
        let ack_args = BundleArgs::new(ACK_STREAM).with_manual_resync();
        let acks = self
            .transport
            .open_bundle(&self.ctx.tid, Arc::clone(smap), ack_args)
            .await?;
        *self.ack_streams.write() = Some(acks);

        self.laterx.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn end_streams(&self) {
        if self.stage.transition(Stage::Fin, Stage::FinStreams) {
            let streams = self.streams.write().take();
            let acks = self.ack_streams.write().take();
            if let Some(bundle) = streams {
                bundle.close(true).await;
            }
            if let Some(bundle) = acks {
                bundle.close(true).await;
            }
            *self.smap.write() = None;
        }
    }

    async fn sync_and_run(self: &Arc<Self>, args: &RunArgs) -> Result<()> {
        self.stage.store(Stage::Traverse);
        let loghdr = self.loghdr(args.xact.reb_id, args.smap.version);
        info!("{}: poll targets for stage {}", loghdr, Stage::Traverse);

        if self.ctx.buckets.ec_used() {
            self.run_ec(args).await?;
            if args.xact.aborted() {
                return Err(ScreeError::Aborted(loghdr));
            }
        }
        self.run_joggers(args).await
    }

    /// EC namespace sub-phase: scrub local inventory, exchange with peers,
    /// reconcile, then hold at the EcNamespace stage until all peers reach it.
    async fn run_ec(self: &Arc<Self>, args: &RunArgs) -> Result<()> {
        let scrubber = EcScrubber::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.control),
            Arc::clone(&args.xact),
        );
        let view = scrubber.run(&args.smap).await?;
        info!(
            objects = view.object_count(),
            records = view.record_count(),
            "{}: EC namespace reconciled",
            self.loghdr(args.xact.reb_id, args.smap.version)
        );

        self.stage.store(Stage::EcNamespace);
        let err_cnt = self
            .bcast(
                &args.smap,
                args.xact.reb_id,
                SyncCheck::AtStage(Stage::EcNamespace),
                Some(&args.xact),
            )
            .await;
        if err_cnt > 0 {
            warn!(
                lagging = err_cnt,
                "{}: peers lagging behind the EC namespace stage",
                self.loghdr(args.xact.reb_id, args.smap.version)
            );
        }
        Ok(())
    }

    async fn run_joggers(self: &Arc<Self>, args: &RunArgs) -> Result<()> {
        let multiplier = self.ctx.config.rebalance.multiplier;
        let _ = self
            .bcast(&args.smap, args.xact.reb_id, SyncCheck::RxReady, Some(&args.xact))
            .await; // timeouts ignored
        if args.xact.aborted() {
            return Err(ScreeError::Aborted(self.loghdr(args.xact.reb_id, args.smap.version)));
        }

        let mut joggers = JoinSet::new();
        for provider in [crate::types::Provider::Native, crate::types::Provider::Cloud] {
            for mpath in &args.paths {
                let jogger = jogger::RebJogger::new(
                    Arc::clone(self),
                    Arc::clone(&args.xact),
                    Arc::clone(&args.smap),
                    Arc::clone(mpath),
                    provider,
                    multiplier,
                );
                joggers.spawn(jogger.jog());
            }
        }
        while joggers.join_next().await.is_some() {}

        if args.xact.aborted() {
            return Err(ScreeError::Aborted(self.loghdr(args.xact.reb_id, args.smap.version)));
        }
        Ok(())
    }

    async fn wait_ack(self: &Arc<Self>, args: &RunArgs) -> usize {
        self.stage.store(Stage::WaitAck);
        let config = &self.ctx.config;
        let sleep = config.timeout.cplane_operation;
        let targets = args.smap.count_targets() as u32;
        let maxwt = (config.rebalance.dest_retry_time
            + Duration::from_secs(60) * (targets / 10))
            .min(config.rebalance.dest_retry_time * 2);
        let reb_id = args.xact.reb_id;
        let mut err_cnt = 0;

        loop {
            let mut curwt = Duration::ZERO;
            let mut cnt = 0;
            // poll for no more than maxwt, tracking cumulative time in curwt
            while curwt < maxwt {
                cnt = self.acks.pending();
                if cnt == 0 {
                    info!("{}: received all acks", self.loghdr(reb_id, args.smap.version));
                    break;
                }
                if let Some(lom) = self.acks.any_pending() {
                    if let Ok(tsi) = hrw_target(&lom.uname(), &args.smap) {
                        info!("waiting for {} ack from {}", lom, tsi);
                    }
                }
                warn!("{}: waiting for {} acks", self.loghdr(reb_id, args.smap.version), cnt);
                if args.xact.aborted_after(sleep).await {
                    info!("{}: abort", self.loghdr(reb_id, args.smap.version));
                    return err_cnt;
                }
                curwt += sleep;
            }
            if cnt > 0 {
                warn!(
                    "{}: timed out waiting for {} acks",
                    self.loghdr(reb_id, args.smap.version),
                    cnt
                );
            }
            if args.xact.aborted() {
                return err_cnt;
            }

            // locally migrated objects are kept at the source, so a grown
            // mountpath set only warrants a warning here
            let avail = self.ctx.mountpaths.count();
            if avail > args.paths.len() {
                warn!(
                    "{}: mountpath changes detected ({}, {})",
                    self.loghdr(reb_id, args.smap.version),
                    avail,
                    args.paths.len()
                );
            }

            // synchronize
            info!(
                "{}: poll targets for stage {} or {}",
                self.loghdr(reb_id, args.smap.version),
                Stage::Fin,
                Stage::WaitAck
            );
            err_cnt = self
                .bcast(&args.smap, reb_id, SyncCheck::WaitFinExtended, Some(&args.xact))
                .await;
            if args.xact.aborted() {
                return err_cnt;
            }

            // retransmit if needed
            let cnt = self.retransmit(args).await;
            if cnt == 0 || args.xact.aborted() {
                break;
            }
            warn!(
                "{}: retransmitted {}, more waiting",
                self.loghdr(reb_id, args.smap.version),
                cnt
            );
        }
        err_cnt
    }

    async fn fini(&self, args: &RunArgs) {
        let sleep = self.ctx.config.timeout.cplane_operation;
        let max_quiet = self.ctx.config.rebalance.quiet_rounds;
        let reb_id = args.xact.reb_id;

        // quiescence: consecutive quiet intervals with no late receives
        let mut quiescent = 0;
        let mut aborted = args.xact.aborted();
        while quiescent < max_quiet && !aborted {
            if self.laterx.swap(false, Ordering::SeqCst) {
                quiescent = 0;
            } else {
                quiescent += 1;
            }
            aborted = args.xact.aborted_after(sleep).await;
        }

        if !aborted {
            if args.marker.is_some() {
                if let Err(e) = remove_marker(&self.ctx.config.node.conf_dir, XactKind::GlobalReb) {
                    error!(
                        "{}: failed to remove in-progress marker: {}",
                        self.loghdr(reb_id, args.smap.version),
                        e
                    );
                }
            }
        }
        self.end_streams().await;
        self.gfn.reset();
        if !args.xact.finished() {
            args.xact.finish();
        }

        let begin = *self.begin_stats.lock();
        if let Some(begin) = begin {
            let delta = self.ctx.stats.snapshot().delta_since(&begin);
            match serde_json::to_string(&delta) {
                Ok(json) => info!("{}: {}", self.loghdr(reb_id, args.smap.version), json),
                Err(e) => debug!(error = %e, "stats delta serialization"),
            }
        }
        self.stage.store(Stage::Done);
        // admit the next run
        *self.run_permit.lock() = None;
    }

    async fn retransmit(self: &Arc<Self>, args: &RunArgs) -> usize {
        let check_abort = || {
            if args.xact.aborted() {
                return true;
            }
            let cur = self.ctx.smap_owner.version();
            if cur != args.smap.version {
                args.xact.abort();
                return true;
            }
            false
        };
        if check_abort() {
            return 0;
        }
        let reb_id = args.xact.reb_id;
        let mut cnt = 0;

        for idx in 0..self.acks.shard_count() {
            for (uname, stale) in self.acks.shard_entries(idx) {
                let mut lom = match self
                    .ctx
                    .store
                    .init(&stale.bucket, &stale.name, stale.provider)
                {
                    Ok(lom) => lom,
                    Err(e) => {
                        error!(
                            "{}: failed loading {}: {}",
                            self.loghdr(reb_id, args.smap.version),
                            uname,
                            e
                        );
                        self.acks.remove(idx, &uname);
                        continue;
                    }
                };
                if self.ctx.store.load(&mut lom).is_err() || !self.ctx.store.exists(&lom) {
                    warn!(
                        "{}: {} does not exist",
                        self.loghdr(reb_id, args.smap.version),
                        lom
                    );
                    self.acks.remove(idx, &uname);
                    continue;
                }
                let home = match hrw_target(&uname, &args.smap) {
                    Ok(t) => t,
                    Err(e) => {
                        error!(error = %e, object = %lom, "placement failed, dropping");
                        self.acks.remove(idx, &uname);
                        continue;
                    }
                };
                let Some(tsi) = args.smap.target(&home).cloned() else {
                    self.acks.remove(idx, &uname);
                    continue;
                };

                let present = self
                    .control
                    .head_object(&tsi, &lom.bucket, &lom.name, lom.provider)
                    .await
                    .unwrap_or(false);
                if present {
                    debug!(
                        "{}: HEAD ok {} at {}",
                        self.loghdr(reb_id, args.smap.version),
                        lom,
                        tsi.id
                    );
                    self.acks.remove(idx, &uname);
                    continue;
                }

                match jogger::send_object(self, lom, &tsi).await {
                    Ok(true) => {
                        warn!(
                            "{}: resending {} => {}",
                            self.loghdr(reb_id, args.smap.version),
                            uname,
                            tsi.id
                        );
                        cnt += 1;
                        self.retransmitted.fetch_add(1, Ordering::Relaxed);
                        observability::record_reb_retransmit();
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!(
                            "{}: failed resending {} => {}: {}",
                            self.loghdr(reb_id, args.smap.version),
                            uname,
                            tsi.id,
                            e
                        );
                    }
                }
                if check_abort() {
                    return 0;
                }
            }
            if check_abort() {
                return 0;
            }
        }
        cnt
    }

    async fn bcast(
        &self,
        smap: &Arc<ClusterMap>,
        reb_id: RebId,
        check: SyncCheck,
        xact: Option<&Arc<Xaction>>,
    ) -> usize {
        let futs: Vec<_> = smap
            .others(&self.ctx.tid)
            .map(|tsi| self.check_peer(tsi, reb_id, check, xact))
            .collect();
        futures::future::join_all(futs)
            .await
            .into_iter()
            .filter(|ok| !ok)
            .count()
    }

    async fn check_peer(
        &self,
        tsi: &crate::cluster::membership::TargetInfo,
        reb_id: RebId,
        check: SyncCheck,
        xact: Option<&Arc<Xaction>>,
    ) -> bool {
        let sleep = self.ctx.config.timeout.cplane_operation;
        match check {
            SyncCheck::Ping => {
                for attempt in 0..3 {
                    if self.control.ping(tsi).await.is_ok() {
                        return true;
                    }
                    debug!(peer = %tsi.id, attempt, "ping failed");
                    tokio::time::sleep(sleep).await;
                }
                false
            }
            SyncCheck::RxReady | SyncCheck::WaitFinExtended | SyncCheck::AtStage(_) => {
                let maxwt = self.ctx.config.rebalance.dest_retry_time;
                let mut curwt = Duration::ZERO;
                while curwt < maxwt {
                    if let Some(x) = xact {
                        if x.aborted() {
                            return false;
                        }
                    }
                    match self.control.reb_status(tsi).await {
                        Ok(status) => {
                            let caught_up = status.reb_id >= reb_id;
                            let ok = match check {
                                SyncCheck::RxReady => caught_up && status.stage >= Stage::Traverse,
                                SyncCheck::WaitFinExtended => {
                                    caught_up && status.stage >= Stage::WaitAck
                                }
                                SyncCheck::AtStage(min) => caught_up && status.stage >= min,
                                SyncCheck::Ping => unreachable!(),
                            };
                            if ok {
                                return true;
                            }
                            debug!(
                                peer = %tsi.id,
                                stage = %status.stage,
                                peer_g = status.reb_id,
                                "peer not ready"
                            );
                        }
                        Err(e) => debug!(peer = %tsi.id, error = %e, "status poll failed"),
                    }
                    tokio::time::sleep(sleep).await;
                    curwt += sleep;
                }
                false
            }
        }
    }
}
