//! Error types for the scree rebalance engine.
//!
//! This module provides a unified error type [`ScreeError`] for all scree
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Membership**: stale or changed cluster maps, unknown targets
//! - **Placement**: HRW resolution failures
//! - **Storage**: object load/put/remove and mountpath errors
//! - **Transport**: stream bundle and peer communication errors
//! - **Run control**: aborts and admission rejections
//! - **Configuration**: invalid settings

use std::io;
use thiserror::Error;

/// Main error type for scree operations.
#[derive(Error, Debug)]
pub enum ScreeError {
    // Membership errors
    #[error("Newer cluster map observed: v{seen} > v{ours}")]
    MembershipChanged { seen: u64, ours: u64 },

    #[error("Target not in cluster map: {0}")]
    UnknownTarget(String),

    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    // Placement errors
    #[error("Placement failed: {0}")]
    PlacementFailed(String),

    // Storage errors
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Not an object path: {0}")]
    InvalidObjectPath(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("No mountpaths available")]
    NoMountpaths,

    // Transport errors
    #[error("Stream bundle closed: {0}")]
    StreamClosed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    // Run control
    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("Rebalance rejected: {0}")]
    Rejected(String),

    #[error("EC namespace scrub failed: {0}")]
    EcScrub(String),

    // Configuration errors
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScreeError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScreeError::PeerUnreachable(_)
                | ScreeError::SendFailed(_)
                | ScreeError::Rejected(_)
        )
    }

    /// Check if error represents run abortion (including membership change).
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            ScreeError::Aborted(_) | ScreeError::MembershipChanged { .. }
        )
    }
}

impl From<serde_json::Error> for ScreeError {
    fn from(e: serde_json::Error) -> Self {
        ScreeError::Serialization(e.to_string())
    }
}

/// Result type alias for scree operations.
pub type Result<T> = std::result::Result<T, ScreeError>;
