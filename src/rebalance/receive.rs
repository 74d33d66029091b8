//! Stream receive handlers: objects and acknowledgements.
//!
//! Both handlers are registered at manager construction and stay live
//! across runs; arrivals that outpace Init wait for the membership
//! snapshot publication, bounded by `min(dest_retry_time, send_file/3)`.

use crate::lock::LockMode;
use crate::transport::{ReceiveHandler, SendPayload, TransportHeader};
use crate::types::TargetId;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::stage::Stage;
use super::RebalanceManager;

/// Object-stream receiver.
pub(crate) struct ObjReceiver(pub(crate) Weak<RebalanceManager>);

#[async_trait]
impl ReceiveHandler for ObjReceiver {
    async fn receive(&self, hdr: TransportHeader, payload: Bytes) {
        if let Some(m) = self.0.upgrade() {
            m.recv_obj(hdr, payload).await;
        }
    }
}

/// Ack-stream receiver.
pub(crate) struct AckReceiver(pub(crate) Weak<RebalanceManager>);

#[async_trait]
impl ReceiveHandler for AckReceiver {
    async fn receive(&self, hdr: TransportHeader, _payload: Bytes) {
        if let Some(m) = self.0.upgrade() {
            m.recv_ack(hdr).await;
        }
    }
}

impl RebalanceManager {
    pub(crate) async fn recv_obj(self: &Arc<Self>, hdr: TransportHeader, payload: Bytes) {
        let config = &self.ctx.config;
        let sleep = config.timeout.cplane_operation;

        let mut smap = self.smap.read().clone();
        if smap.is_none() {
            // arrival before Init completed: wait for the snapshot
            let maxwt = config
                .rebalance
                .dest_retry_time
                .min(config.timeout.send_file / 3);
            warn!(target = %self.ctx.tid, "waiting to start...");
            let mut curwt = Duration::ZERO;
            while curwt < maxwt {
                tokio::time::sleep(sleep).await;
                curwt += sleep;
                smap = self.smap.read().clone();
                if smap.is_some() {
                    break;
                }
            }
        }
        let Some(smap) = smap else {
            error!(
                target = %self.ctx.tid,
                "timed out waiting to start, dropping {}/{}",
                hdr.bucket,
                hdr.name
            );
            return;
        };
        let sender = smap.target(&TargetId::from(hdr.opaque.as_str())).cloned();

        let mut lom = match self.ctx.store.init(&hdr.bucket, &hdr.name, hdr.provider) {
            Ok(lom) => lom,
            Err(e) => {
                error!(target = %self.ctx.tid, error = %e, "dropping {}/{}", hdr.bucket, hdr.name);
                return;
            }
        };
        let running = self
            .cur_xact
            .lock()
            .as_ref()
            .map(|x| !x.finished() && !x.aborted())
            .unwrap_or(false);
        if !running {
            // drop the payload on the floor
            return;
        }

        let stage = self.stage.load();
        if stage >= Stage::Fin {
            self.laterx.store(true, Ordering::SeqCst);
            if stage > Stage::Fin {
                error!(
                    target = %self.ctx.tid,
                    from = %hdr.opaque,
                    object = %lom,
                    %stage,
                    "late receive"
                );
            } else {
                warn!(
                    target = %self.ctx.tid,
                    from = %hdr.opaque,
                    object = %lom,
                    %stage,
                    "late receive"
                );
            }
        } else if stage < Stage::Traverse {
            error!(
                target = %self.ctx.tid,
                from = %hdr.opaque,
                object = %lom,
                %stage,
                "early receive"
            );
        }

        lom.attrs.atime_ns = hdr.attrs.atime_ns;
        lom.attrs.version = hdr.attrs.version;
        lom.attrs.cksum = hdr.attrs.cksum.clone();
        lom.attrs.size = hdr.attrs.size;

        let uname = lom.uname();
        self.ctx.store.lock(&uname, LockMode::Exclusive).await;
        let put = self.ctx.store.put_migrated(&mut lom, &payload);
        self.ctx.store.unlock(&uname, LockMode::Exclusive);
        if let Err(e) = put {
            error!(target = %self.ctx.tid, object = %lom, error = %e, "migrated put failed");
            return;
        }
        debug!(target = %self.ctx.tid, from = %hdr.opaque, object = %lom, "received");
        self.ctx.stats.add_rx(hdr.attrs.size);

        // ack back to the sender
        let Some(tsi) = sender else {
            return;
        };
        let stage = self.stage.load();
        if stage < Stage::FinStreams && stage != Stage::Inactive {
            let mut ack_hdr = hdr;
            ack_hdr.opaque = self.ctx.tid.to_string();
            ack_hdr.attrs.size = 0;
            let bundle = self.ack_streams.read().clone();
            if let Some(bundle) = bundle {
                if let Err(e) = bundle.send(ack_hdr, SendPayload::Empty, None, &tsi.id).await {
                    error!(target = %self.ctx.tid, error = %e, "ack send failed");
                }
            }
        }
    }

    pub(crate) async fn recv_ack(&self, hdr: TransportHeader) {
        let lom = match self.ctx.store.init(&hdr.bucket, &hdr.name, hdr.provider) {
            Ok(lom) => lom,
            Err(e) => {
                error!(target = %self.ctx.tid, error = %e, "dropping ack for {}/{}", hdr.bucket, hdr.name);
                return;
            }
        };
        debug!(target = %self.ctx.tid, from = %hdr.opaque, object = %lom, "ack");

        let (_, idx) = lom.hkey();
        let uname = lom.uname();
        self.acks.remove(idx, &uname);

        // the peer persisted the object; the local copy is now redundant
        self.ctx.store.lock(&uname, LockMode::Exclusive).await;
        if let Err(e) = self.ctx.store.remove(&lom) {
            error!(target = %self.ctx.tid, object = %lom, error = %e, "error removing");
        }
        self.ctx.store.unlock(&uname, LockMode::Exclusive);
    }
}
