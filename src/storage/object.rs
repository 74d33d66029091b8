//! Local object store and the per-object locator (LOM).
//!
//! Object content lives at `<mountpath>/<provider>/<bucket>/<name>`;
//! metadata rides in a JSON sidecar next to the content file. Writes go
//! through a work file and rename, so readers never observe a partial
//! object and an aborted run leaves nothing half-written.

use crate::cluster::placement;
use crate::error::{Result, ScreeError};
use crate::lock::{LockMode, NameLocker};
use crate::storage::mountpath::{Mountpath, MountpathRegistry, EC_TREE};
use crate::types::{Checksum, ObjectAttrs, Provider};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Metadata sidecar suffix.
const META_SUFFIX: &str = ".meta.json";
/// Work-file infix; files carrying it are in-flight writes, not objects.
const WORK_INFIX: &str = ".work.";

/// Number of ack-table shards; must match the LOM home-hash fanout.
pub const ACK_SHARDS: usize = 64;

/// Locator of one local object.
#[derive(Debug, Clone)]
pub struct Lom {
    pub bucket: String,
    pub name: String,
    pub provider: Provider,
    pub mpath: Arc<Mountpath>,
    pub fqn: PathBuf,
    pub attrs: ObjectAttrs,
    /// Fully-qualified paths of local replica copies.
    pub copies: Vec<PathBuf>,
    /// Whether this locator points at a replica copy rather than the object.
    pub is_copy: bool,
}

impl Lom {
    /// Unique name of the object within the node: `provider/bucket/name`.
    pub fn uname(&self) -> String {
        format!("{}/{}/{}", self.provider.tree(), self.bucket, self.name)
    }

    /// 16-bit home hash and the derived ack-shard index.
    pub fn hkey(&self) -> (u16, usize) {
        let h = (crc32fast::hash(self.uname().as_bytes()) & 0xffff) as u16;
        (h, h as usize & (ACK_SHARDS - 1))
    }

    pub fn has_copies(&self) -> bool {
        !self.copies.is_empty()
    }
}

impl std::fmt::Display for Lom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

/// On-disk metadata sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectMeta {
    size: u64,
    atime_ns: i64,
    version: u64,
    cksum: Option<Checksum>,
    #[serde(default)]
    copies: Vec<PathBuf>,
    #[serde(default)]
    is_copy: bool,
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn meta_path(fqn: &Path) -> PathBuf {
    let mut s = fqn.as_os_str().to_os_string();
    s.push(META_SUFFIX);
    PathBuf::from(s)
}

/// Filesystem-backed object store.
pub struct ObjectStore {
    mountpaths: Arc<MountpathRegistry>,
    locker: NameLocker,
}

impl ObjectStore {
    pub fn new(mountpaths: Arc<MountpathRegistry>) -> Self {
        Self {
            mountpaths,
            locker: NameLocker::new(),
        }
    }

    /// Build a locator for `(bucket, name, provider)` at its home mountpath.
    pub fn init(&self, bucket: &str, name: &str, provider: Provider) -> Result<Lom> {
        if bucket.is_empty() || name.is_empty() {
            return Err(ScreeError::InvalidObjectPath(format!(
                "{}/{}/{}",
                provider, bucket, name
            )));
        }
        let uname = format!("{}/{}/{}", provider.tree(), bucket, name);
        let paths = self.mountpaths.available();
        if paths.is_empty() {
            return Err(ScreeError::NoMountpaths);
        }
        let ids: Vec<String> = paths.iter().map(|m| m.id.clone()).collect();
        let idx = placement::hrw_mountpath(&uname, &ids)?;
        let mpath = Arc::clone(&paths[idx]);
        let fqn = mpath.fqn(provider, bucket, name);
        Ok(Lom {
            bucket: bucket.to_string(),
            name: name.to_string(),
            provider,
            mpath,
            fqn,
            attrs: ObjectAttrs::default(),
            copies: Vec::new(),
            is_copy: false,
        })
    }

    /// Build a locator from a fully-qualified path found by a walker.
    ///
    /// Fails for anything that is not an object: metadata sidecars, work
    /// files, EC metadata, paths outside every mountpath.
    pub fn init_fqn(&self, fqn: &Path) -> Result<Lom> {
        let err = || ScreeError::InvalidObjectPath(fqn.display().to_string());
        let mpath = self.mountpaths.resolve(fqn).ok_or_else(err)?;
        let rel = fqn.strip_prefix(&mpath.path).map_err(|_| err())?;

        let mut comps = rel.iter().map(|c| c.to_string_lossy());
        let tree = comps.next().ok_or_else(err)?;
        if tree == EC_TREE {
            return Err(err());
        }
        let provider = Provider::from_tree(&tree).ok_or_else(err)?;
        let bucket = comps.next().ok_or_else(err)?.into_owned();
        let name = comps.collect::<Vec<_>>().join("/");
        if bucket.is_empty() || name.is_empty() {
            return Err(err());
        }
        if name.ends_with(META_SUFFIX) || name.contains(WORK_INFIX) {
            return Err(err());
        }

        Ok(Lom {
            bucket,
            name,
            provider,
            fqn: fqn.to_path_buf(),
            mpath,
            attrs: ObjectAttrs::default(),
            copies: Vec::new(),
            is_copy: false,
        })
    }

    /// Load the object's attributes from disk.
    pub fn load(&self, lom: &mut Lom) -> Result<()> {
        let md = fs::metadata(&lom.fqn).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScreeError::ObjectNotFound(lom.uname())
            } else {
                e.into()
            }
        })?;
        lom.attrs.size = md.len();

        match fs::read(meta_path(&lom.fqn)) {
            Ok(raw) => {
                let meta: ObjectMeta = serde_json::from_slice(&raw)?;
                lom.attrs.size = meta.size;
                lom.attrs.atime_ns = meta.atime_ns;
                lom.attrs.version = meta.version;
                lom.attrs.cksum = meta.cksum;
                lom.copies = meta.copies;
                lom.is_copy = meta.is_copy;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                lom.attrs.atime_ns = md
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos() as i64)
                    .unwrap_or(0);
                lom.attrs.version = 1;
                lom.attrs.cksum = None;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    pub fn exists(&self, lom: &Lom) -> bool {
        lom.fqn.is_file()
    }

    /// Open the object's content for reading.
    pub fn open(&self, lom: &Lom) -> Result<File> {
        File::open(&lom.fqn).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScreeError::ObjectNotFound(lom.uname())
            } else {
                e.into()
            }
        })
    }

    /// Compute and persist the checksum if the object does not carry one.
    pub fn cksum_compute_if_missing(&self, lom: &mut Lom) -> Result<Checksum> {
        if let Some(ref cksum) = lom.attrs.cksum {
            return Ok(cksum.clone());
        }
        let data = fs::read(&lom.fqn)?;
        let cksum = Checksum::crc32(&data);
        lom.attrs.cksum = Some(cksum.clone());
        self.save_metadata(lom)?;
        Ok(cksum)
    }

    /// Persist the locator's metadata sidecar.
    pub fn save_metadata(&self, lom: &Lom) -> Result<()> {
        let meta = ObjectMeta {
            size: lom.attrs.size,
            atime_ns: lom.attrs.atime_ns,
            version: lom.attrs.version,
            cksum: lom.attrs.cksum.clone(),
            copies: lom.copies.clone(),
            is_copy: lom.is_copy,
        };
        fs::write(meta_path(&lom.fqn), serde_json::to_vec(&meta)?)?;
        Ok(())
    }

    /// Store a new object at its home mountpath.
    pub fn put(&self, bucket: &str, name: &str, provider: Provider, data: &[u8]) -> Result<Lom> {
        let mut lom = self.init(bucket, name, provider)?;
        lom.attrs = ObjectAttrs {
            size: data.len() as u64,
            atime_ns: now_ns(),
            version: 1,
            cksum: Some(Checksum::crc32(data)),
        };
        self.write_content(&lom, data)?;
        self.save_metadata(&lom)?;
        Ok(lom)
    }

    /// Persist an object received from a peer.
    ///
    /// The locator's attributes come from the transport header; the payload
    /// is verified against the header checksum before the work file is
    /// renamed into place. On mismatch the partial file is removed.
    pub fn put_migrated(&self, lom: &mut Lom, data: &[u8]) -> Result<()> {
        if let Some(ref expected) = lom.attrs.cksum {
            let actual = Checksum::crc32(data);
            if &actual != expected {
                return Err(ScreeError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        } else {
            lom.attrs.cksum = Some(Checksum::crc32(data));
        }
        lom.attrs.size = data.len() as u64;
        self.write_content(lom, data)?;
        self.save_metadata(lom)?;
        Ok(())
    }

    fn work_path(fqn: &Path) -> PathBuf {
        let nonce: u32 = rand::thread_rng().gen();
        let mut s = fqn.as_os_str().to_os_string();
        s.push(format!("{}{:08x}", WORK_INFIX, nonce));
        PathBuf::from(s)
    }

    fn write_content(&self, lom: &Lom, data: &[u8]) -> Result<()> {
        if let Some(parent) = lom.fqn.parent() {
            fs::create_dir_all(parent)?;
        }
        let work = Self::work_path(&lom.fqn);
        let res = (|| -> Result<()> {
            let mut file = File::create(&work)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&work, &lom.fqn)?;
            Ok(())
        })();
        if res.is_err() {
            let _ = fs::remove_file(&work);
        }
        res
    }

    /// Remove the object's content and metadata.
    pub fn remove(&self, lom: &Lom) -> Result<()> {
        fs::remove_file(&lom.fqn).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScreeError::ObjectNotFound(lom.uname())
            } else {
                ScreeError::from(e)
            }
        })?;
        if let Err(e) = fs::remove_file(meta_path(&lom.fqn)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(object = %lom, error = %e, "failed to remove metadata sidecar");
            }
        }
        Ok(())
    }

    /// Whether the object sits at its home mountpath.
    pub fn is_hrw(&self, lom: &Lom) -> Result<bool> {
        let paths = self.mountpaths.available();
        let ids: Vec<String> = paths.iter().map(|m| m.id.clone()).collect();
        let idx = placement::hrw_mountpath(&lom.uname(), &ids)?;
        Ok(paths[idx].id == lom.mpath.id)
    }

    /// Copy the object to its home mountpath, local-only, without touching
    /// cluster-visible state. Returns false when already in place.
    pub fn copy_local(&self, lom: &Lom, buf: &mut [u8]) -> Result<bool> {
        let paths = self.mountpaths.available();
        let ids: Vec<String> = paths.iter().map(|m| m.id.clone()).collect();
        let idx = placement::hrw_mountpath(&lom.uname(), &ids)?;
        let dst_mp = Arc::clone(&paths[idx]);
        let dst_fqn = dst_mp.fqn(lom.provider, &lom.bucket, &lom.name);
        if dst_fqn == lom.fqn {
            return Ok(false);
        }
        if let Some(parent) = dst_fqn.parent() {
            fs::create_dir_all(parent)?;
        }

        let work = Self::work_path(&dst_fqn);
        let res = (|| -> Result<()> {
            let mut src = self.open(lom)?;
            let mut dst = File::create(&work)?;
            loop {
                let n = src.read(buf)?;
                if n == 0 {
                    break;
                }
                dst.write_all(&buf[..n])?;
            }
            dst.sync_all()?;
            fs::rename(&work, &dst_fqn)?;
            Ok(())
        })();
        if res.is_err() {
            let _ = fs::remove_file(&work);
            return res.map(|_| false);
        }

        let relocated = Lom {
            fqn: dst_fqn,
            mpath: dst_mp,
            copies: Vec::new(),
            is_copy: false,
            ..lom.clone()
        };
        self.save_metadata(&relocated)?;
        Ok(true)
    }

    /// Write a replica copy of the object onto another mountpath and record
    /// it in the object's metadata.
    pub fn add_copy(&self, lom: &mut Lom, dst: &Arc<Mountpath>) -> Result<PathBuf> {
        let dst_fqn = dst.fqn(lom.provider, &lom.bucket, &lom.name);
        if dst_fqn == lom.fqn {
            return Err(ScreeError::Internal(format!(
                "copy destination equals source: {}",
                lom
            )));
        }
        let data = fs::read(&lom.fqn)?;
        let replica = Lom {
            fqn: dst_fqn.clone(),
            mpath: Arc::clone(dst),
            copies: Vec::new(),
            is_copy: true,
            ..lom.clone()
        };
        self.write_content(&replica, &data)?;
        self.save_metadata(&replica)?;

        lom.copies.push(dst_fqn.clone());
        self.save_metadata(lom)?;
        Ok(dst_fqn)
    }

    /// Acquire the object lock in the given mode.
    pub async fn lock(&self, uname: &str, mode: LockMode) {
        self.locker.lock(uname, mode).await;
    }

    /// Release the object lock.
    pub fn unlock(&self, uname: &str, mode: LockMode) {
        self.locker.unlock(uname, mode);
    }
}
