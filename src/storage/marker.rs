//! On-disk "in progress" markers.
//!
//! A marker is a zero-length file in the node's conf directory, created at
//! Init and removed at Fin on success. Its presence at startup means the
//! previous process died mid-run, and the caller should repeat the
//! corresponding rebalance.

use crate::error::Result;
use crate::xaction::XactKind;
use std::fs;
use std::path::{Path, PathBuf};

const GLOBAL_REB_MARKER: &str = ".rebalance_in_progress";
const LOCAL_REB_MARKER: &str = ".resilver_in_progress";

/// Path of the marker for the given activity kind.
pub fn marker_path(conf_dir: &Path, kind: XactKind) -> PathBuf {
    let name = match kind {
        XactKind::GlobalReb => GLOBAL_REB_MARKER,
        XactKind::LocalReb => LOCAL_REB_MARKER,
    };
    conf_dir.join(name)
}

/// Create the marker file.
pub fn create_marker(conf_dir: &Path, kind: XactKind) -> Result<PathBuf> {
    fs::create_dir_all(conf_dir)?;
    let path = marker_path(conf_dir, kind);
    fs::File::create(&path)?;
    Ok(path)
}

/// Remove the marker file.
pub fn remove_marker(conf_dir: &Path, kind: XactKind) -> Result<()> {
    fs::remove_file(marker_path(conf_dir, kind))?;
    Ok(())
}

/// Whether a previous run of this kind was interrupted.
pub fn was_interrupted(conf_dir: &Path, kind: XactKind) -> bool {
    marker_path(conf_dir, kind).exists()
}
