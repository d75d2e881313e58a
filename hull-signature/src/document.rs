//! Signature document data model.
//!
//! Two layers can be present. The platform layer signs a map of
//! architecture to binary hash, produced once per release by whoever built
//! the Hull runtime binaries. The application layer signs the script's own
//! files and manifest, produced by whoever packaged the application. A
//! document with no `binary_hash` field is the legacy single-layer form —
//! application fields only, no platform section.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEntry {
    pub hash: String,
    pub canary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformLayer {
    pub platforms: BTreeMap<String, PlatformEntry>,
    pub public_key: String,
    pub signature: String,
}

/// A parsed signature document, before any cryptographic check has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDocument {
    pub binary_hash: Option<String>,
    /// Opaque build metadata, carried as a canonical JSON span — this
    /// crate never needs to interpret its contents, only hash and sign it.
    pub build: Option<String>,
    /// path -> sha256 hex, for every file the signer included.
    pub files: BTreeMap<String, String>,
    /// Opaque canonical JSON span of the manifest that was in force at
    /// signing time, or `None` when the document declared `null`/omitted it.
    pub manifest: Option<String>,
    pub platform: Option<PlatformLayer>,
    pub public_key: String,
    pub signature: String,
    pub trampoline_hash: Option<String>,
}

impl SignatureDocument {
    pub fn is_legacy(&self) -> bool {
        self.binary_hash.is_none() && self.platform.is_none()
    }
}
