//! Canonical JSON encoding: the exact byte sequence Ed25519 signs over.
//! Lexicographic key order, no insignificant whitespace. A signer that
//! serializes any other way produces a signature that will never verify
//! here — which is the point; canonical form is part of the contract, not
//! an implementation detail.

fn escape_string(value: &str, out: &mut String) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// A field's value in a canonical object: either a plain string (escaped)
/// or an already-canonical raw span (nested object/array/number/bool/null
/// we're just passing through verbatim).
pub enum CanonicalValue<'a> {
    Raw(&'a str),
    Str(&'a str),
}

/// Build a canonical object from `fields` in the order given — callers are
/// responsible for listing fields in lexicographic key order. A `None`
/// value omits the field entirely, matching how an absent optional field
/// is indistinguishable from one that was never declared.
pub fn canonical_object(fields: &[(&str, Option<CanonicalValue<'_>>)]) -> String {
    let mut out = String::from("{");
    let mut first = true;
    for (key, value) in fields {
        let Some(value) = value else { continue };
        if !first {
            out.push(',');
        }
        first = false;
        escape_string(key, &mut out);
        out.push(':');
        match value {
            CanonicalValue::Raw(s) => out.push_str(s),
            CanonicalValue::Str(s) => escape_string(s, &mut out),
        }
    }
    out.push('}');
    out
}

/// Canonical encoding of a `path -> sha256 hex` map. `BTreeMap` iteration
/// is already lexicographic by key, so no extra sort is needed here.
pub fn canonical_string_map(map: &std::collections::BTreeMap<String, String>) -> String {
    let mut out = String::from("{");
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        escape_string(key, &mut out);
        out.push(':');
        escape_string(value, &mut out);
    }
    out.push('}');
    out
}

/// Canonical encoding of a map whose values are themselves canonical
/// object spans (e.g. the platform layer's `arch -> {hash, canary}`).
/// Entries are sorted by key before encoding since the caller may hand
/// them in arbitrary order.
pub fn canonical_nested_map<'a>(entries: impl Iterator<Item = (&'a str, String)>) -> String {
    let mut pairs: Vec<(&str, String)> = entries.collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let mut out = String::from("{");
    for (i, (key, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        escape_string(key, &mut out);
        out.push(':');
        out.push_str(value);
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn canonical_object_omits_none_fields_and_keeps_given_order() {
        let out = canonical_object(&[
            ("a", Some(CanonicalValue::Str("x"))),
            ("b", None),
            ("c", Some(CanonicalValue::Raw("42"))),
        ]);
        assert_eq!(out, r#"{"a":"x","c":42}"#);
    }

    #[test]
    fn canonical_string_map_sorts_by_key() {
        let mut map = BTreeMap::new();
        map.insert("b.lua".to_string(), "hash2".to_string());
        map.insert("a.lua".to_string(), "hash1".to_string());
        let out = canonical_string_map(&map);
        assert_eq!(out, r#"{"a.lua":"hash1","b.lua":"hash2"}"#);
    }

    #[test]
    fn escapes_control_characters_and_quotes() {
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), "a\"b\nc".to_string());
        let out = canonical_string_map(&map);
        assert_eq!(out, r#"{"k":"a\"b\nc"}"#);
    }

    #[test]
    fn canonical_nested_map_sorts_even_when_given_out_of_order() {
        let entries = vec![("linux-x64", "1".to_string()), ("darwin-arm64", "2".to_string())];
        let out = canonical_nested_map(entries.into_iter());
        assert_eq!(out, r#"{"darwin-arm64":2,"linux-x64":1}"#);
    }
}
