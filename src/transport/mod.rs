//! Stream-bundle transport contract.
//!
//! A stream bundle is a multiplexed session from one target to a set of
//! peers. The bundle guarantees in-order delivery per destination and
//! fires the completion callback exactly once per accepted send.

pub mod loopback;

pub use loopback::LoopbackTransport;

use crate::cluster::membership::ClusterMap;
use crate::config::Compression;
use crate::error::Result;
use crate::types::{ObjectAttrs, Provider, TargetId};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::sync::Arc;

/// Stream name of the object bundle.
pub const OBJECT_STREAM: &str = "rebalance";
/// Stream name of the acknowledgement bundle.
pub const ACK_STREAM: &str = "reb-ack";

/// Wire-level message header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportHeader {
    pub bucket: String,
    pub name: String,
    pub provider: Provider,
    /// Sender daemon id.
    pub opaque: String,
    pub attrs: ObjectAttrs,
}

/// Payload of one send.
pub enum SendPayload {
    /// Header-only message (acknowledgements).
    Empty,
    /// Object content, read at transmit time.
    File(File),
    /// In-memory content.
    Bytes(Bytes),
}

/// Per-send completion callback; receives the header and the number of
/// payload bytes transmitted.
pub type SendCompletion = Box<dyn FnOnce(&TransportHeader, Result<u64>) + Send>;

/// Arguments for opening a stream bundle.
#[derive(Debug, Clone)]
pub struct BundleArgs {
    pub trname: String,
    pub compression: Compression,
    /// Streams per destination, in [1,8].
    pub multiplier: u8,
    /// When set, the bundle keeps the membership snapshot it was opened
    /// with for its whole lifetime instead of tracking updates.
    pub manual_resync: bool,
}

impl BundleArgs {
    pub fn new(trname: &str) -> Self {
        Self {
            trname: trname.to_string(),
            compression: Compression::None,
            multiplier: 1,
            manual_resync: false,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_multiplier(mut self, multiplier: u8) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_manual_resync(mut self) -> Self {
        self.manual_resync = true;
        self
    }
}

/// Receiver side of a named stream.
#[async_trait]
pub trait ReceiveHandler: Send + Sync {
    async fn receive(&self, hdr: TransportHeader, payload: Bytes);
}

/// Transport endpoint factory.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register the receive handler for `(target, stream-name)`. Handlers
    /// stay live for the process lifetime; re-registration replaces.
    fn register(&self, tid: &TargetId, trname: &str, handler: Arc<dyn ReceiveHandler>);

    /// Open a bundle from `self_id` to every target of `smap`.
    async fn open_bundle(
        &self,
        self_id: &TargetId,
        smap: Arc<ClusterMap>,
        args: BundleArgs,
    ) -> Result<Arc<dyn StreamBundle>>;
}

/// An open stream bundle.
#[async_trait]
pub trait StreamBundle: Send + Sync {
    /// Queue one message to `dst`. Blocks when the per-destination queue is
    /// full. When the send is accepted, `cb` fires exactly once after
    /// transmission.
    async fn send(
        &self,
        hdr: TransportHeader,
        payload: SendPayload,
        cb: Option<SendCompletion>,
        dst: &TargetId,
    ) -> Result<()>;

    /// Close the bundle; graceful close drains queued sends first.
    async fn close(&self, graceful: bool);
}
