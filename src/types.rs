//! Core type definitions for the scree rebalance engine.
//!
//! # Key Types
//!
//! - [`TargetId`]: stable daemon identifier of a storage target
//! - [`Provider`]: object backing (AIS-native vs cloud-cached)
//! - [`ObjectAttrs`]: the wire-level attributes shipped with every object
//! - [`Checksum`]: checksum type + value pair
//!
//! # Type Aliases
//!
//! - [`RebId`] = `i64`: rebalance generation id (independent of the map version)
//! - [`SmapVersion`] = `u64`: cluster map version

use serde::{Deserialize, Serialize};

/// Rebalance generation id, assigned per invocation.
pub type RebId = i64;

/// Cluster map version (monotonically increasing).
pub type SmapVersion = u64;

/// Stable daemon identifier of a storage target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Object backing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Native object, owned by this cluster.
    Native,
    /// Cloud-backed object cached locally.
    Cloud,
}

impl Provider {
    /// Directory name of this provider's content tree under a mountpath.
    pub fn tree(&self) -> &'static str {
        match self {
            Provider::Native => "native",
            Provider::Cloud => "cloud",
        }
    }

    pub fn from_tree(s: &str) -> Option<Self> {
        match s {
            "native" => Some(Provider::Native),
            "cloud" => Some(Provider::Cloud),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tree())
    }
}

/// Checksum kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    Crc32,
}

impl std::fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumKind::Crc32 => f.write_str("crc32"),
        }
    }
}

/// A checksum: type plus hex-encoded value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub value: String,
}

impl Checksum {
    /// Compute the crc32 checksum of a byte slice.
    pub fn crc32(data: &[u8]) -> Self {
        Self {
            kind: ChecksumKind::Crc32,
            value: format!("{:08x}", crc32fast::hash(data)),
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Wire-level object attributes carried in every transport header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectAttrs {
    /// Object size in bytes.
    pub size: u64,
    /// Access time, nanoseconds since the epoch.
    pub atime_ns: i64,
    /// Object version.
    pub version: u64,
    /// Checksum, when known.
    pub cksum: Option<Checksum>,
}

impl Default for ObjectAttrs {
    fn default() -> Self {
        Self {
            size: 0,
            atime_ns: 0,
            version: 1,
            cksum: None,
        }
    }
}

/// Properties of a bucket relevant to rebalance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketProps {
    pub provider: Provider,
    /// Whether erasure coding is enabled for this bucket.
    pub ec_enabled: bool,
}

impl Default for BucketProps {
    fn default() -> Self {
        Self {
            provider: Provider::Native,
            ec_enabled: false,
        }
    }
}

/// Registry of bucket properties.
///
/// Bucket creation and removal are handled elsewhere; rebalance only
/// consults properties.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: parking_lot::RwLock<std::collections::HashMap<String, BucketProps>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, props: BucketProps) {
        self.buckets.write().insert(name.into(), props);
    }

    /// Look up bucket properties, defaulting for unknown buckets.
    pub fn props(&self, name: &str) -> BucketProps {
        self.buckets.read().get(name).copied().unwrap_or_default()
    }

    /// Whether any registered bucket has erasure coding enabled.
    pub fn ec_used(&self) -> bool {
        self.buckets.read().values().any(|p| p.ec_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_crc32() {
        let a = Checksum::crc32(b"hello");
        let b = Checksum::crc32(b"hello");
        let c = Checksum::crc32(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.kind, ChecksumKind::Crc32);
    }

    #[test]
    fn test_provider_tree_roundtrip() {
        for p in [Provider::Native, Provider::Cloud] {
            assert_eq!(Provider::from_tree(p.tree()), Some(p));
        }
        assert_eq!(Provider::from_tree("work"), None);
    }

    #[test]
    fn test_bucket_registry_defaults() {
        let reg = BucketRegistry::new();
        assert!(!reg.ec_used());
        assert!(!reg.props("unknown").ec_enabled);

        reg.register(
            "media",
            BucketProps {
                provider: Provider::Native,
                ec_enabled: true,
            },
        );
        assert!(reg.ec_used());
        assert!(reg.props("media").ec_enabled);
    }
}
