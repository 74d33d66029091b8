//! Rebalance stages.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Target-local rebalance stage.
///
/// Stages are linear; only the coordinator advances them. Receive handlers
/// and the retransmit path read the stage concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u32)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Inactive = 0,
    Init = 1,
    Traverse = 2,
    EcNamespace = 3,
    WaitAck = 4,
    Fin = 5,
    FinStreams = 6,
    Done = 7,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Inactive => "<inactive>",
            Stage::Init => "<init>",
            Stage::Traverse => "<traverse>",
            Stage::EcNamespace => "<ec-namespace>",
            Stage::WaitAck => "<wack>",
            Stage::Fin => "<fin>",
            Stage::FinStreams => "<fin-streams>",
            Stage::Done => "<done>",
        }
    }

    fn from_u32(v: u32) -> Stage {
        match v {
            1 => Stage::Init,
            2 => Stage::Traverse,
            3 => Stage::EcNamespace,
            4 => Stage::WaitAck,
            5 => Stage::Fin,
            6 => Stage::FinStreams,
            7 => Stage::Done,
            _ => Stage::Inactive,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomic stage cell.
#[derive(Debug)]
pub struct StageCell(AtomicU32);

impl StageCell {
    pub fn new() -> Self {
        Self(AtomicU32::new(Stage::Inactive as u32))
    }

    pub fn load(&self) -> Stage {
        Stage::from_u32(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, stage: Stage) {
        self.0.store(stage as u32, Ordering::SeqCst);
    }

    /// Compare-and-swap; returns whether the transition happened.
    pub fn transition(&self, from: Stage, to: Stage) -> bool {
        self.0
            .compare_exchange(from as u32, to as u32, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for StageCell {
    fn default() -> Self {
        Self::new()
    }
}
