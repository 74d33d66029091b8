//! Mountpath management.
//!
//! A mountpath is one local storage root. Each mountpath carries a content
//! tree per provider plus an `ec/` tree for erasure-coding metadata.

use crate::error::{Result, ScreeError};
use crate::types::Provider;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory name of the EC metadata tree under a mountpath.
pub const EC_TREE: &str = "ec";

/// One local storage root.
#[derive(Debug)]
pub struct Mountpath {
    /// Stable identifier (the canonical path string).
    pub id: String,
    pub path: PathBuf,
}

impl Mountpath {
    /// Root of the given provider's object tree.
    pub fn objects_root(&self, provider: Provider) -> PathBuf {
        self.path.join(provider.tree())
    }

    /// Root of the EC metadata tree.
    pub fn ec_root(&self) -> PathBuf {
        self.path.join(EC_TREE)
    }

    /// Fully-qualified path of an object on this mountpath.
    pub fn fqn(&self, provider: Provider, bucket: &str, name: &str) -> PathBuf {
        self.objects_root(provider).join(bucket).join(name)
    }
}

impl std::fmt::Display for Mountpath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Registry of the node's available mountpaths.
#[derive(Debug, Default)]
pub struct MountpathRegistry {
    paths: RwLock<Vec<Arc<Mountpath>>>,
}

impl MountpathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a storage root, creating its content trees.
    pub fn add(&self, path: impl Into<PathBuf>) -> Result<Arc<Mountpath>> {
        let path = path.into();
        for tree in [Provider::Native.tree(), Provider::Cloud.tree(), EC_TREE] {
            fs::create_dir_all(path.join(tree))?;
        }
        let mp = Arc::new(Mountpath {
            id: path.to_string_lossy().into_owned(),
            path,
        });
        let mut paths = self.paths.write();
        if paths.iter().any(|p| p.id == mp.id) {
            return Err(ScreeError::Internal(format!(
                "mountpath already registered: {}",
                mp.id
            )));
        }
        paths.push(Arc::clone(&mp));
        Ok(mp)
    }

    /// Snapshot of the currently available mountpaths.
    pub fn available(&self) -> Vec<Arc<Mountpath>> {
        self.paths.read().clone()
    }

    pub fn count(&self) -> usize {
        self.paths.read().len()
    }

    /// The mountpath whose root is a prefix of `fqn`, if any.
    pub fn resolve(&self, fqn: &Path) -> Option<Arc<Mountpath>> {
        self.paths
            .read()
            .iter()
            .find(|mp| fqn.starts_with(&mp.path))
            .cloned()
    }
}
