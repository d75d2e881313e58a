//! Manifest extraction and kernel-enforced sandbox application — the
//! pipeline that runs once, after script load and before the event loop
//! starts accepting connections.

pub mod applier;
pub mod manifest;

pub use applier::{apply_sandbox, SandboxOutcome};
pub use manifest::{extract_manifest, Manifest, SharedManifest};
