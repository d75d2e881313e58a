//! Route and middleware pattern matching. Both are the same shape — a
//! method, a pattern, and a handler — per spec.md §4.8 ("middleware is a
//! parallel sequence with the same shape" as routes).

use mlua::RegistryKey;

/// One registered route or middleware entry, in the order it was declared.
/// Registration order is the only ordering guarantee: ties among matching
/// patterns are broken by whichever was registered first.
pub struct Entry {
    pub method: String,
    pub pattern: String,
    pub handler: RegistryKey,
}

/// `*` matches any method; otherwise an exact, case-sensitive match (HTTP
/// methods are conventionally upper-case; scripts are expected to register
/// them that way).
pub fn method_matches(registered: &str, method: &str) -> bool {
    registered == "*" || registered == method
}

/// Three pattern shapes: exact, prefix (`/*` suffix matches anything
/// beyond the literal prefix), and `:name` segment bindings. Returns the
/// bound parameters on a match, `None` otherwise.
pub fn pattern_matches(pattern: &str, path: &str) -> Option<Vec<(String, String)>> {
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return if path.starts_with(prefix) { Some(Vec::new()) } else { None };
    }

    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = Vec::new();
    for (p, s) in pattern_segments.iter().zip(path_segments.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            params.push((name.to_string(), s.to_string()));
        } else if p != s {
            return None;
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_method_matches_anything() {
        assert!(method_matches("*", "GET"));
        assert!(method_matches("*", "POST"));
    }

    #[test]
    fn exact_method_must_match() {
        assert!(method_matches("GET", "GET"));
        assert!(!method_matches("GET", "POST"));
    }

    #[test]
    fn exact_pattern_matches_identical_path_only() {
        assert!(pattern_matches("/health", "/health").is_some());
        assert!(pattern_matches("/health", "/healthy").is_none());
    }

    #[test]
    fn prefix_pattern_matches_anything_beyond_the_prefix() {
        assert!(pattern_matches("/static/*", "/static/css/app.css").is_some());
        assert!(pattern_matches("/static/*", "/other").is_none());
    }

    #[test]
    fn param_segments_bind_and_match_any_literal_value() {
        let params = pattern_matches("/orgs/:org_id/docs/:doc_id", "/orgs/acme/docs/42").unwrap();
        assert_eq!(params, vec![("org_id".to_string(), "acme".to_string()), ("doc_id".to_string(), "42".to_string())]);
    }

    #[test]
    fn param_pattern_requires_matching_segment_count() {
        assert!(pattern_matches("/orgs/:org_id", "/orgs/acme/extra").is_none());
    }
}
