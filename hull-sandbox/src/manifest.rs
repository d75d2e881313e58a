//! The manifest: an immutable snapshot of a script's declared capability
//! footprint, extracted once after script load and referenced — read-only,
//! via `Arc` — by the sandbox applier and by every capability that enforces
//! an allowlist.

use hull_core::HullError;
use std::sync::Arc;
use tracing::warn;

/// Lists beyond this many entries are silently truncated at extraction
/// time (a warning is logged); the environment cap matches spec.md's
/// explicit `env: ≤32`, the others are sized generously for a single local
/// application without being unbounded.
pub const MAX_FS_ENTRIES: usize = 64;
pub const MAX_ENV_ENTRIES: usize = 32;
pub const MAX_HOST_ENTRIES: usize = 64;

/// The script's declared capability footprint. Built once from interpreter
/// state after load; never mutated afterward.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub fs_read: Vec<String>,
    pub fs_write: Vec<String>,
    pub env: Vec<String>,
    pub hosts: Vec<String>,
    /// `false` if no manifest table was declared at all — a declared
    /// policy (sandbox off, no-op) rather than a bug; see
    /// [`Manifest::absent`].
    pub present: bool,
}

impl Manifest {
    /// The manifest used when the script declared none at all.
    pub fn absent() -> Self {
        Manifest {
            present: false,
            ..Default::default()
        }
    }

    pub fn is_env_allowed(&self, name: &str) -> bool {
        self.env.iter().any(|n| n == name)
    }

    /// Case-insensitive exact match, per spec.md §8's testable property for
    /// outbound HTTP host allow-listing.
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }
}

fn push_bounded(out: &mut Vec<String>, value: String, cap: usize, field: &str) {
    if out.len() < cap {
        out.push(value);
    } else {
        warn!(field, cap, "manifest list truncated at declared bound");
    }
}

fn read_string_list(table: &mlua::Table, key: &str, cap: usize) -> Result<Vec<String>, HullError> {
    let mut out = Vec::new();
    let Ok(list) = table.get::<_, mlua::Table>(key) else {
        return Ok(out);
    };
    for pair in list.sequence_values::<String>() {
        let value = pair.map_err(|e| HullError::invalid_argument(format!("manifest.{key}: {e}")))?;
        push_bounded(&mut out, value, cap, key);
    }
    Ok(out)
}

/// Read the global `manifest` table out of interpreter state.
///
/// Absence of any top-level `manifest` global produces `present = false`
/// and leaves the sandbox off — see spec.md §4.5.
pub fn extract_manifest(lua: &mlua::Lua) -> Result<Manifest, HullError> {
    let globals = lua.globals();
    let manifest_value: mlua::Value = globals
        .get("manifest")
        .map_err(|e| HullError::invalid_argument(e.to_string()))?;

    let mlua::Value::Table(manifest_table) = manifest_value else {
        return Ok(Manifest::absent());
    };

    let mut fs_read = Vec::new();
    let mut fs_write = Vec::new();

    if let Ok(fs_table) = manifest_table.get::<_, mlua::Table>("fs") {
        fs_read = read_string_list(&fs_table, "read", MAX_FS_ENTRIES)?;
        fs_write = read_string_list(&fs_table, "write", MAX_FS_ENTRIES)?;
    }

    let env = read_string_list(&manifest_table, "env", MAX_ENV_ENTRIES)?;
    let hosts = read_string_list(&manifest_table, "hosts", MAX_HOST_ENTRIES)?;

    Ok(Manifest {
        fs_read,
        fs_write,
        env,
        hosts,
        present: true,
    })
}

/// Shared, reference-counted handle to the extracted manifest, as every
/// capability binding and the sandbox applier holds it.
pub type SharedManifest = Arc<Manifest>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_manifest_has_present_false() {
        let m = Manifest::absent();
        assert!(!m.present);
        assert!(m.fs_read.is_empty());
    }

    #[test]
    fn host_allow_list_is_case_insensitive() {
        let m = Manifest {
            hosts: vec!["Api.Example.com".to_string()],
            present: true,
            ..Default::default()
        };
        assert!(m.is_host_allowed("api.example.com"));
        assert!(m.is_host_allowed("API.EXAMPLE.COM"));
        assert!(!m.is_host_allowed("other.example.com"));
    }

    #[test]
    fn env_allow_list_exact_match_only() {
        let m = Manifest {
            env: vec!["PATH".to_string()],
            present: true,
            ..Default::default()
        };
        assert!(m.is_env_allowed("PATH"));
        assert!(!m.is_env_allowed("path"));
    }

    #[test]
    fn extract_manifest_reads_declared_table() {
        let lua = mlua::Lua::new();
        lua.load(
            r#"
            manifest = {
                fs = { read = {"data/"}, write = {"uploads/"} },
                env = {"API_KEY"},
                hosts = {"api.example.com"},
            }
            "#,
        )
        .exec()
        .unwrap();
        let manifest = extract_manifest(&lua).unwrap();
        assert!(manifest.present);
        assert_eq!(manifest.fs_read, vec!["data/".to_string()]);
        assert_eq!(manifest.fs_write, vec!["uploads/".to_string()]);
        assert_eq!(manifest.env, vec!["API_KEY".to_string()]);
        assert_eq!(manifest.hosts, vec!["api.example.com".to_string()]);
    }

    #[test]
    fn extract_manifest_absent_when_no_global() {
        let lua = mlua::Lua::new();
        let manifest = extract_manifest(&lua).unwrap();
        assert!(!manifest.present);
    }

    #[test]
    fn extract_manifest_truncates_beyond_cap() {
        let lua = mlua::Lua::new();
        let entries: Vec<String> = (0..40).map(|i| format!("\"VAR_{i}\"")).collect();
        let script = format!(
            "manifest = {{ env = {{ {} }} }}",
            entries.join(", ")
        );
        lua.load(&script).exec().unwrap();
        let manifest = extract_manifest(&lua).unwrap();
        assert_eq!(manifest.env.len(), MAX_ENV_ENTRIES);
    }
}
