//! Six-stage verification pipeline.
//!
//! 1. The caller-supplied developer public key must be well-formed.
//! 2. A signature document must exist next to the entry point
//!    (`package.sig`, falling back to the legacy `hull.sig` name).
//! 3. The document's declared `public_key` must match the one supplied.
//! 4. If a platform layer is present, its key must match the
//!    compile-time-embedded platform key and its signature must verify.
//! 5. The application layer's signature must verify against the
//!    developer key.
//! 6. Every file the document lists must be present with a matching
//!    SHA-256, and no embedded file may go unlisted.
//!
//! Any single stage failing rejects the whole document — there is no
//! partial-trust result.

use crate::canonical::{canonical_nested_map, canonical_object, canonical_string_map, CanonicalValue};
use crate::document::{PlatformLayer, SignatureDocument};
use crate::parser::parse_document;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hull_core::HullError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Compile-time-embedded platform public key. All-zeros is a placeholder
/// that skips platform-layer verification rather than rejecting every
/// document outright — a release build bakes the real key in here.
const EMBEDDED_PLATFORM_PUBLIC_KEY: [u8; 32] = [0u8; 32];

pub struct VerifiedDocument {
    pub document: SignatureDocument,
    pub platform_verified: bool,
}

fn decode_pubkey(hex_str: &str, what: &str) -> Result<VerifyingKey, HullError> {
    let bytes = hex::decode(hex_str).map_err(|e| HullError::invalid_argument(format!("{what}: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| HullError::invalid_argument(format!("{what} must be 32 bytes (64 hex chars)")))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| HullError::invalid_argument(format!("{what}: {e}")))
}

fn decode_signature(hex_str: &str, what: &str) -> Result<Signature, HullError> {
    let bytes = hex::decode(hex_str).map_err(|e| HullError::invalid_argument(format!("{what}: {e}")))?;
    let arr: [u8; 64] = bytes
        .try_into()
        .map_err(|_| HullError::invalid_argument(format!("{what} must be 64 bytes (128 hex chars)")))?;
    Ok(Signature::from_bytes(&arr))
}

/// Stage 1: the developer public key supplied at the CLI/config boundary
/// must be a well-formed 32-byte Ed25519 key.
pub fn read_dev_public_key(hex_str: &str) -> Result<VerifyingKey, HullError> {
    if hex_str.len() != 64 {
        return Err(HullError::invalid_argument("developer public key must be 64 hex characters"));
    }
    decode_pubkey(hex_str, "developer public key")
}

/// Stage 2: locate and parse the signature document adjacent to the entry
/// point.
pub fn read_signature_document(entry_point: &Path) -> Result<SignatureDocument, HullError> {
    let dir = entry_point.parent().unwrap_or_else(|| Path::new("."));
    for name in ["package.sig", "hull.sig"] {
        let candidate = dir.join(name);
        if let Ok(raw) = std::fs::read_to_string(&candidate) {
            return parse_document(&raw);
        }
    }
    Err(HullError::IntegrityFailure(format!(
        "no signature document found next to {}",
        entry_point.display()
    )))
}

/// The bytes Ed25519 actually signs: the canonical payload with `signature`
/// and `public_key` themselves excluded, per spec.md §6 — both layers sign
/// over everything *except* their own signing identity.
fn application_payload(doc: &SignatureDocument) -> String {
    let files_canonical = canonical_string_map(&doc.files);
    canonical_object(&[
        ("binary_hash", doc.binary_hash.as_deref().map(CanonicalValue::Str)),
        ("build", doc.build.as_deref().map(CanonicalValue::Raw)),
        ("files", Some(CanonicalValue::Raw(&files_canonical))),
        ("manifest", doc.manifest.as_deref().map(CanonicalValue::Raw)),
        ("trampoline_hash", doc.trampoline_hash.as_deref().map(CanonicalValue::Str)),
    ])
}

fn platform_payload(platform: &PlatformLayer) -> String {
    let platforms_canonical = canonical_nested_map(platform.platforms.iter().map(|(arch, entry)| {
        (
            arch.as_str(),
            canonical_object(&[
                ("canary", Some(CanonicalValue::Str(&entry.canary))),
                ("hash", Some(CanonicalValue::Str(&entry.hash))),
            ]),
        )
    }));
    canonical_object(&[("platforms", Some(CanonicalValue::Raw(&platforms_canonical)))])
}

/// Run stages 3-6 against an already-read document and an already-decoded
/// developer key. Split out from [`verify_document`] so stages can be
/// exercised without touching the filesystem.
fn verify_parsed(
    dev_key: &VerifyingKey,
    dev_public_key_hex: &str,
    document: SignatureDocument,
    asset_bytes: &BTreeMap<String, Vec<u8>>,
) -> Result<VerifiedDocument, HullError> {
    if document.public_key != dev_public_key_hex {
        return Err(HullError::IntegrityFailure(
            "signature document public_key does not match the supplied developer key".into(),
        ));
    }

    let mut platform_verified = false;
    if let Some(platform) = &document.platform {
        if EMBEDDED_PLATFORM_PUBLIC_KEY != [0u8; 32] {
            let embedded_hex = hex::encode(EMBEDDED_PLATFORM_PUBLIC_KEY);
            if platform.public_key != embedded_hex {
                return Err(HullError::IntegrityFailure(
                    "platform layer public_key does not match the embedded platform key".into(),
                ));
            }
            let key = VerifyingKey::from_bytes(&EMBEDDED_PLATFORM_PUBLIC_KEY)
                .map_err(|e| HullError::IntegrityFailure(format!("embedded platform key: {e}")))?;
            let sig = decode_signature(&platform.signature, "platform signature")?;
            let payload = platform_payload(platform);
            key.verify(payload.as_bytes(), &sig)
                .map_err(|_| HullError::IntegrityFailure("platform layer signature verification failed".into()))?;
            platform_verified = true;
        }
    }

    let app_sig = decode_signature(&document.signature, "application signature")?;
    let app_payload = application_payload(&document);
    dev_key
        .verify(app_payload.as_bytes(), &app_sig)
        .map_err(|_| HullError::IntegrityFailure("application signature verification failed".into()))?;

    for (path, expected_hash) in &document.files {
        let bytes = asset_bytes
            .get(path)
            .ok_or_else(|| HullError::IntegrityFailure(format!("signed file '{path}' is missing from the package")))?;
        let actual = hex::encode(Sha256::digest(bytes));
        if &actual != expected_hash {
            return Err(HullError::IntegrityFailure(format!("file '{path}' hash mismatch")));
        }
    }
    for path in asset_bytes.keys() {
        if !document.files.contains_key(path) {
            return Err(HullError::IntegrityFailure(format!(
                "embedded file '{path}' is not listed in the signature document"
            )));
        }
    }

    Ok(VerifiedDocument { document, platform_verified })
}

/// Run the full pipeline: read the developer key, locate and parse the
/// document, then run stages 3-6 against the supplied asset bytes.
pub fn verify_document(
    dev_public_key_hex: &str,
    entry_point: &Path,
    asset_bytes: &BTreeMap<String, Vec<u8>>,
) -> Result<VerifiedDocument, HullError> {
    let dev_key = read_dev_public_key(dev_public_key_hex)?;
    let document = read_signature_document(entry_point)?;
    verify_parsed(&dev_key, dev_public_key_hex, document, asset_bytes)
}

/// Optional extra check the CLI startup path runs once it has computed the
/// running executable's own SHA-256: does it match what the document says
/// this package was built against.
pub fn verify_binary_hash(document: &SignatureDocument, actual_sha256_hex: &str) -> Result<(), HullError> {
    match &document.binary_hash {
        Some(expected) if expected != actual_sha256_hex => Err(HullError::IntegrityFailure(
            "binary_hash does not match the running executable".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn dev_signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn signed_document(files: BTreeMap<String, String>) -> (SigningKey, SignatureDocument) {
        let key = dev_signing_key();
        let public_key = hex::encode(key.verifying_key().to_bytes());
        let mut doc = SignatureDocument {
            binary_hash: None,
            build: None,
            files,
            manifest: None,
            platform: None,
            public_key,
            signature: String::new(),
            trampoline_hash: None,
        };
        let payload = application_payload(&doc);
        let sig = key.sign(payload.as_bytes());
        doc.signature = hex::encode(sig.to_bytes());
        (key, doc)
    }

    fn file_map(contents: &[(&str, &[u8])]) -> (BTreeMap<String, String>, BTreeMap<String, Vec<u8>>) {
        let mut files = BTreeMap::new();
        let mut assets = BTreeMap::new();
        for (path, bytes) in contents {
            files.insert(path.to_string(), hex::encode(Sha256::digest(bytes)));
            assets.insert(path.to_string(), bytes.to_vec());
        }
        (files, assets)
    }

    #[test]
    fn verifies_a_correctly_signed_legacy_document() {
        let (files, assets) = file_map(&[("index.lua", b"return 1")]);
        let (key, doc) = signed_document(files);
        let pk_hex = hex::encode(key.verifying_key().to_bytes());
        let verified = verify_parsed(&key.verifying_key(), &pk_hex, doc, &assets).unwrap();
        assert!(!verified.platform_verified);
    }

    #[test]
    fn rejects_public_key_mismatch() {
        let (files, assets) = file_map(&[("index.lua", b"return 1")]);
        let (key, doc) = signed_document(files);
        let other_key = SigningKey::from_bytes(&[9u8; 32]);
        let other_hex = hex::encode(other_key.verifying_key().to_bytes());
        let result = verify_parsed(&key.verifying_key(), &other_hex, doc, &assets);
        assert!(matches!(result, Err(HullError::IntegrityFailure(_))));
    }

    #[test]
    fn rejects_tampered_file_contents() {
        let (files, mut assets) = file_map(&[("index.lua", b"return 1")]);
        let (key, doc) = signed_document(files);
        let pk_hex = hex::encode(key.verifying_key().to_bytes());
        assets.insert("index.lua".to_string(), b"return 2".to_vec());
        let result = verify_parsed(&key.verifying_key(), &pk_hex, doc, &assets);
        assert!(matches!(result, Err(HullError::IntegrityFailure(_))));
    }

    #[test]
    fn rejects_missing_signed_file() {
        let (files, _assets) = file_map(&[("index.lua", b"return 1")]);
        let (key, doc) = signed_document(files);
        let pk_hex = hex::encode(key.verifying_key().to_bytes());
        let result = verify_parsed(&key.verifying_key(), &pk_hex, doc, &BTreeMap::new());
        assert!(matches!(result, Err(HullError::IntegrityFailure(_))));
    }

    #[test]
    fn rejects_unlisted_embedded_file() {
        let (files, mut assets) = file_map(&[("index.lua", b"return 1")]);
        let (key, doc) = signed_document(files);
        let pk_hex = hex::encode(key.verifying_key().to_bytes());
        assets.insert("sneaky.lua".to_string(), b"os.execute('rm -rf /')".to_vec());
        let result = verify_parsed(&key.verifying_key(), &pk_hex, doc, &assets);
        assert!(matches!(result, Err(HullError::IntegrityFailure(_))));
    }

    #[test]
    fn rejects_tampered_signature() {
        let (files, assets) = file_map(&[("index.lua", b"return 1")]);
        let (key, mut doc) = signed_document(files);
        let pk_hex = hex::encode(key.verifying_key().to_bytes());
        let mut sig_bytes = hex::decode(&doc.signature).unwrap();
        sig_bytes[0] ^= 0xff;
        doc.signature = hex::encode(sig_bytes);
        let result = verify_parsed(&key.verifying_key(), &pk_hex, doc, &assets);
        assert!(matches!(result, Err(HullError::IntegrityFailure(_))));
    }

    #[test]
    fn binary_hash_mismatch_is_rejected_when_declared() {
        let doc = SignatureDocument {
            binary_hash: Some("expected".to_string()),
            build: None,
            files: BTreeMap::new(),
            manifest: None,
            platform: None,
            public_key: String::new(),
            signature: String::new(),
            trampoline_hash: None,
        };
        assert!(verify_binary_hash(&doc, "actual").is_err());
        assert!(verify_binary_hash(&doc, "expected").is_ok());
    }

    #[test]
    fn binary_hash_absent_is_not_checked() {
        let doc = SignatureDocument {
            binary_hash: None,
            build: None,
            files: BTreeMap::new(),
            manifest: None,
            platform: None,
            public_key: String::new(),
            signature: String::new(),
            trampoline_hash: None,
        };
        assert!(verify_binary_hash(&doc, "anything").is_ok());
    }

    #[test]
    fn read_dev_public_key_rejects_wrong_length() {
        assert!(read_dev_public_key("deadbeef").is_err());
    }
}
