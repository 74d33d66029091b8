//! In-process transport for single-process clusters and tests.
//!
//! Delivery runs through one worker task per destination, which preserves
//! per-destination ordering. An optional drop filter simulates wire loss:
//! a dropped message is counted as sent (its completion fires) but never
//! reaches the receiver.

use crate::cluster::membership::ClusterMap;
use crate::error::{Result, ScreeError};
use crate::types::TargetId;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{
    BundleArgs, ReceiveHandler, SendCompletion, SendPayload, StreamBundle, Transport,
    TransportHeader,
};

const QUEUE_CAP: usize = 64;

/// Returns true to drop the message: `(stream-name, destination, header)`.
pub type DropFilter = Box<dyn Fn(&str, &TargetId, &TransportHeader) -> bool + Send + Sync>;

type HandlerMap = HashMap<(TargetId, String), Arc<dyn ReceiveHandler>>;

#[derive(Default)]
struct Wire {
    handlers: RwLock<HandlerMap>,
    fault: RwLock<Option<DropFilter>>,
}

impl Wire {
    fn handler(&self, tid: &TargetId, trname: &str) -> Option<Arc<dyn ReceiveHandler>> {
        self.handlers
            .read()
            .get(&(tid.clone(), trname.to_string()))
            .cloned()
    }

    fn should_drop(&self, trname: &str, dst: &TargetId, hdr: &TransportHeader) -> bool {
        self.fault
            .read()
            .as_ref()
            .map(|f| f(trname, dst, hdr))
            .unwrap_or(false)
    }
}

/// Shared in-process wire.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    wire: Arc<Wire>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a drop filter (fault injection).
    pub fn set_fault(&self, filter: DropFilter) {
        *self.wire.fault.write() = Some(filter);
    }

    /// Remove the drop filter.
    pub fn clear_fault(&self) {
        *self.wire.fault.write() = None;
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn register(&self, tid: &TargetId, trname: &str, handler: Arc<dyn ReceiveHandler>) {
        self.wire
            .handlers
            .write()
            .insert((tid.clone(), trname.to_string()), handler);
    }

    async fn open_bundle(
        &self,
        self_id: &TargetId,
        smap: Arc<ClusterMap>,
        args: BundleArgs,
    ) -> Result<Arc<dyn StreamBundle>> {
        let mut senders = HashMap::new();
        let mut workers = Vec::new();
        for tsi in smap.others(self_id) {
            let (tx, rx) = mpsc::channel::<QueuedSend>(QUEUE_CAP);
            senders.insert(tsi.id.clone(), tx);
            workers.push(tokio::spawn(deliver(
                Arc::clone(&self.wire),
                args.trname.clone(),
                tsi.id.clone(),
                rx,
            )));
        }
        Ok(Arc::new(LoopbackBundle {
            trname: args.trname,
            senders: Mutex::new(Some(senders)),
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        }))
    }
}

struct QueuedSend {
    hdr: TransportHeader,
    payload: SendPayload,
    cb: Option<SendCompletion>,
}

async fn deliver(
    wire: Arc<Wire>,
    trname: String,
    dst: TargetId,
    mut rx: mpsc::Receiver<QueuedSend>,
) {
    while let Some(send) = rx.recv().await {
        let QueuedSend { hdr, payload, cb } = send;
        let bytes = match read_payload(payload) {
            Ok(b) => b,
            Err(e) => {
                if let Some(cb) = cb {
                    cb(&hdr, Err(e));
                }
                continue;
            }
        };
        let size = bytes.len() as u64;
        if !wire.should_drop(&trname, &dst, &hdr) {
            match wire.handler(&dst, &trname) {
                Some(handler) => handler.receive(hdr.clone(), bytes).await,
                None => warn!(stream = %trname, dst = %dst, "no receive handler registered"),
            }
        }
        if let Some(cb) = cb {
            cb(&hdr, Ok(size));
        }
    }
}

fn read_payload(payload: SendPayload) -> Result<Bytes> {
    match payload {
        SendPayload::Empty => Ok(Bytes::new()),
        SendPayload::Bytes(b) => Ok(b),
        SendPayload::File(mut f) => {
            let mut buf = Vec::new();
            f.read_to_end(&mut buf)?;
            Ok(Bytes::from(buf))
        }
    }
}

struct LoopbackBundle {
    trname: String,
    senders: Mutex<Option<HashMap<TargetId, mpsc::Sender<QueuedSend>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

#[async_trait]
impl StreamBundle for LoopbackBundle {
    async fn send(
        &self,
        hdr: TransportHeader,
        payload: SendPayload,
        cb: Option<SendCompletion>,
        dst: &TargetId,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScreeError::StreamClosed(self.trname.clone()));
        }
        let tx = {
            let senders = self.senders.lock();
            senders
                .as_ref()
                .and_then(|m| m.get(dst).cloned())
                .ok_or_else(|| ScreeError::UnknownTarget(dst.to_string()))?
        };
        tx.send(QueuedSend { hdr, payload, cb })
            .await
            .map_err(|_| ScreeError::StreamClosed(self.trname.clone()))
    }

    async fn close(&self, graceful: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the senders lets each worker drain its queue and exit.
        self.senders.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if graceful {
                let _ = worker.await;
            } else {
                worker.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::membership::TargetInfo;
    use crate::types::{ObjectAttrs, Provider};
    use std::sync::atomic::AtomicUsize;

    struct Collector {
        got: Mutex<Vec<(TransportHeader, Bytes)>>,
    }

    #[async_trait]
    impl ReceiveHandler for Collector {
        async fn receive(&self, hdr: TransportHeader, payload: Bytes) {
            self.got.lock().push((hdr, payload));
        }
    }

    fn two_target_map() -> Arc<ClusterMap> {
        Arc::new(
            ClusterMap::new(1)
                .with_target(TargetInfo {
                    id: TargetId::from("a"),
                    addr: String::new(),
                })
                .with_target(TargetInfo {
                    id: TargetId::from("b"),
                    addr: String::new(),
                }),
        )
    }

    fn hdr(name: &str) -> TransportHeader {
        TransportHeader {
            bucket: "bck".to_string(),
            name: name.to_string(),
            provider: Provider::Native,
            opaque: "a".to_string(),
            attrs: ObjectAttrs::default(),
        }
    }

    #[tokio::test]
    async fn test_ordered_delivery_and_completion() {
        let wire = LoopbackTransport::new();
        let collector = Arc::new(Collector {
            got: Mutex::new(Vec::new()),
        });
        wire.register(&TargetId::from("b"), "s", collector.clone());

        let bundle = wire
            .open_bundle(&TargetId::from("a"), two_target_map(), BundleArgs::new("s"))
            .await
            .unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let fired = Arc::clone(&fired);
            bundle
                .send(
                    hdr(&format!("o{}", i)),
                    SendPayload::Bytes(Bytes::from(vec![i as u8])),
                    Some(Box::new(move |_, res| {
                        assert_eq!(res.unwrap(), 1);
                        fired.fetch_add(1, Ordering::SeqCst);
                    })),
                    &TargetId::from("b"),
                )
                .await
                .unwrap();
        }
        bundle.close(true).await;

        assert_eq!(fired.load(Ordering::SeqCst), 10);
        let got = collector.got.lock();
        assert_eq!(got.len(), 10);
        for (i, (h, _)) in got.iter().enumerate() {
            assert_eq!(h.name, format!("o{}", i));
        }
    }

    #[tokio::test]
    async fn test_drop_filter_suppresses_delivery_not_completion() {
        let wire = LoopbackTransport::new();
        let collector = Arc::new(Collector {
            got: Mutex::new(Vec::new()),
        });
        wire.register(&TargetId::from("b"), "s", collector.clone());
        wire.set_fault(Box::new(|_, _, hdr| hdr.name == "lost"));

        let bundle = wire
            .open_bundle(&TargetId::from("a"), two_target_map(), BundleArgs::new("s"))
            .await
            .unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        for name in ["kept", "lost"] {
            let fired = Arc::clone(&fired);
            bundle
                .send(
                    hdr(name),
                    SendPayload::Empty,
                    Some(Box::new(move |_, _| {
                        fired.fetch_add(1, Ordering::SeqCst);
                    })),
                    &TargetId::from("b"),
                )
                .await
                .unwrap();
        }
        bundle.close(true).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        let got = collector.got.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0.name, "kept");
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let wire = LoopbackTransport::new();
        let bundle = wire
            .open_bundle(&TargetId::from("a"), two_target_map(), BundleArgs::new("s"))
            .await
            .unwrap();
        bundle.close(true).await;

        let err = bundle
            .send(hdr("late"), SendPayload::Empty, None, &TargetId::from("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScreeError::StreamClosed(_)));
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let wire = LoopbackTransport::new();
        let bundle = wire
            .open_bundle(&TargetId::from("a"), two_target_map(), BundleArgs::new("s"))
            .await
            .unwrap();
        let err = bundle
            .send(hdr("x"), SendPayload::Empty, None, &TargetId::from("zzz"))
            .await
            .unwrap_err();
        assert!(matches!(err, ScreeError::UnknownTarget(_)));
        bundle.close(true).await;
    }
}
