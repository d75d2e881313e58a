//! The environment capability. A name absent from the manifest's `env`
//! list reads back as unset, even if the OS environment defines it.

use hull_sandbox::Manifest;

/// Linear scan over the allowlist (bounded to ≤32 entries by the
/// manifest extractor — a hash lookup buys nothing at that size).
pub fn get(manifest: &Manifest, name: &str) -> Option<String> {
    if !manifest.is_env_allowed(name) {
        return None;
    }
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_name_reads_as_absent_even_if_set() {
        std::env::set_var("HULL_TEST_ENV_PROBE", "value");
        let manifest = Manifest::default();
        assert_eq!(get(&manifest, "HULL_TEST_ENV_PROBE"), None);
        std::env::remove_var("HULL_TEST_ENV_PROBE");
    }

    #[test]
    fn declared_name_reads_through() {
        std::env::set_var("HULL_TEST_ENV_PROBE2", "value");
        let manifest = Manifest {
            env: vec!["HULL_TEST_ENV_PROBE2".to_string()],
            present: true,
            ..Default::default()
        };
        assert_eq!(get(&manifest, "HULL_TEST_ENV_PROBE2"), Some("value".to_string()));
        std::env::remove_var("HULL_TEST_ENV_PROBE2");
    }
}
