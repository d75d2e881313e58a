//! A targeted, depth-aware scanner for the fixed signature document
//! schema. Deliberately not a general JSON parser — the document has eight
//! known top-level keys and two small fixed-shape nested objects
//! (`files`, `platform`), and a scanner that only understands those shapes
//! has far less surface than a generic recursive-descent parser would.

use crate::document::{PlatformEntry, PlatformLayer, SignatureDocument};
use crate::scan::{extract_balanced, extract_literal, extract_string, for_each_top_level_entry};
use hull_core::HullError;
use std::collections::BTreeMap;

fn skip_value(input: &[u8], idx: usize) -> Result<usize, HullError> {
    match input.get(idx) {
        Some(b'"') => extract_string(input, idx).map(|(_, end)| end),
        Some(b'{') | Some(b'[') => extract_balanced(input, idx).map(|(_, end)| end),
        _ => Ok(extract_literal(input, idx).1),
    }
}

fn parse_string_map(input: &[u8], idx: usize) -> Result<(BTreeMap<String, String>, usize), HullError> {
    let mut out = BTreeMap::new();
    let end = for_each_top_level_entry(input, idx, |key, inner, vidx| {
        let (value, vend) = extract_string(inner, vidx)?;
        out.insert(key.to_string(), value);
        Ok(vend)
    })?;
    Ok((out, end))
}

fn parse_platform_entry(input: &[u8], idx: usize) -> Result<(PlatformEntry, usize), HullError> {
    let mut hash = None;
    let mut canary = None;
    let end = for_each_top_level_entry(input, idx, |key, inner, vidx| match key {
        "hash" => {
            let (s, end) = extract_string(inner, vidx)?;
            hash = Some(s);
            Ok(end)
        }
        "canary" => {
            let (s, end) = extract_string(inner, vidx)?;
            canary = Some(s);
            Ok(end)
        }
        _ => skip_value(inner, vidx),
    })?;
    Ok((
        PlatformEntry {
            hash: hash.ok_or_else(|| HullError::invalid_argument("platform entry missing 'hash'"))?,
            canary: canary.ok_or_else(|| HullError::invalid_argument("platform entry missing 'canary'"))?,
        },
        end,
    ))
}

fn parse_platform_layer(input: &[u8], idx: usize) -> Result<(PlatformLayer, usize), HullError> {
    let mut platforms = BTreeMap::new();
    let mut public_key = None;
    let mut signature = None;
    let end = for_each_top_level_entry(input, idx, |key, inner, vidx| match key {
        "platforms" => for_each_top_level_entry(inner, vidx, |arch, inner2, vidx2| {
            let (entry, end) = parse_platform_entry(inner2, vidx2)?;
            platforms.insert(arch.to_string(), entry);
            Ok(end)
        }),
        "public_key" => {
            let (s, end) = extract_string(inner, vidx)?;
            public_key = Some(s);
            Ok(end)
        }
        "signature" => {
            let (s, end) = extract_string(inner, vidx)?;
            signature = Some(s);
            Ok(end)
        }
        _ => skip_value(inner, vidx),
    })?;
    Ok((
        PlatformLayer {
            platforms,
            public_key: public_key.ok_or_else(|| HullError::invalid_argument("platform layer missing 'public_key'"))?,
            signature: signature.ok_or_else(|| HullError::invalid_argument("platform layer missing 'signature'"))?,
        },
        end,
    ))
}

/// Parse a signature document's raw text into its typed form. Unknown
/// top-level keys are tolerated and skipped (forward compatibility with a
/// future field this crate doesn't know about yet); the eight known keys
/// are matched by name regardless of what order they appear in.
pub fn parse_document(raw: &str) -> Result<SignatureDocument, HullError> {
    let bytes = raw.as_bytes();
    let mut binary_hash = None;
    let mut build = None;
    let mut files = BTreeMap::new();
    let mut manifest = None;
    let mut platform = None;
    let mut public_key = None;
    let mut signature = None;
    let mut trampoline_hash = None;

    for_each_top_level_entry(bytes, 0, |key, input, idx| match key {
        "binary_hash" => {
            let (s, end) = extract_string(input, idx)?;
            binary_hash = Some(s);
            Ok(end)
        }
        "build" => {
            if input.get(idx) == Some(&b'"') {
                let (s, end) = extract_string(input, idx)?;
                build = Some(s);
                Ok(end)
            } else {
                let end = skip_value(input, idx)?;
                build = Some(std::str::from_utf8(&input[idx..end]).unwrap_or("").to_string());
                Ok(end)
            }
        }
        "files" => {
            let (parsed, end) = parse_string_map(input, idx)?;
            files = parsed;
            Ok(end)
        }
        "manifest" => {
            let end = skip_value(input, idx)?;
            let span = std::str::from_utf8(&input[idx..end]).unwrap_or("");
            if span != "null" {
                manifest = Some(span.to_string());
            }
            Ok(end)
        }
        "platform" => {
            if input.get(idx) == Some(&b'{') {
                let (layer, end) = parse_platform_layer(input, idx)?;
                platform = Some(layer);
                Ok(end)
            } else {
                skip_value(input, idx)
            }
        }
        "public_key" => {
            let (s, end) = extract_string(input, idx)?;
            public_key = Some(s);
            Ok(end)
        }
        "signature" => {
            let (s, end) = extract_string(input, idx)?;
            signature = Some(s);
            Ok(end)
        }
        "trampoline_hash" => {
            let (s, end) = extract_string(input, idx)?;
            trampoline_hash = Some(s);
            Ok(end)
        }
        _ => skip_value(input, idx),
    })?;

    Ok(SignatureDocument {
        binary_hash,
        build,
        files,
        manifest,
        platform,
        public_key: public_key.ok_or_else(|| HullError::invalid_argument("signature document missing 'public_key'"))?,
        signature: signature.ok_or_else(|| HullError::invalid_argument("signature document missing 'signature'"))?,
        trampoline_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_single_layer_document() {
        let raw = r#"{
            "files": {"index.lua": "abc123"},
            "manifest": null,
            "public_key": "deadbeef",
            "signature": "cafebabe"
        }"#;
        let doc = parse_document(raw).unwrap();
        assert!(doc.is_legacy());
        assert_eq!(doc.files.get("index.lua"), Some(&"abc123".to_string()));
        assert!(doc.manifest.is_none());
        assert_eq!(doc.public_key, "deadbeef");
    }

    #[test]
    fn parses_dual_layer_document_with_platform_section() {
        let raw = r#"{
            "binary_hash": "bin-hash",
            "files": {"a.lua": "h1", "b.lua": "h2"},
            "platform": {
                "platforms": {
                    "linux-x64": {"hash": "lh", "canary": "lc"},
                    "darwin-arm64": {"hash": "dh", "canary": "dc"}
                },
                "public_key": "platformkey",
                "signature": "platformsig"
            },
            "public_key": "appkey",
            "signature": "appsig",
            "trampoline_hash": "tramp"
        }"#;
        let doc = parse_document(raw).unwrap();
        assert!(!doc.is_legacy());
        assert_eq!(doc.binary_hash.as_deref(), Some("bin-hash"));
        let platform = doc.platform.unwrap();
        assert_eq!(platform.platforms.len(), 2);
        assert_eq!(platform.platforms["linux-x64"].hash, "lh");
        assert_eq!(platform.public_key, "platformkey");
    }

    #[test]
    fn unknown_top_level_keys_are_skipped_without_error() {
        let raw = r#"{
            "future_field": {"nested": [1, 2, 3]},
            "files": {},
            "public_key": "k",
            "signature": "s"
        }"#;
        let doc = parse_document(raw).unwrap();
        assert_eq!(doc.public_key, "k");
    }

    #[test]
    fn missing_required_key_is_an_error() {
        let raw = r#"{"files": {}}"#;
        assert!(parse_document(raw).is_err());
    }

    #[test]
    fn malformed_document_is_rejected() {
        let raw = r#"{"public_key": "k", "signature": "#;
        assert!(parse_document(raw).is_err());
    }
}
