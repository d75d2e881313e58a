//! The filesystem capability. The kernel sandbox (`hull-sandbox`) is
//! defense-in-depth behind this module's validator — every call is checked
//! here regardless of whether kernel enforcement is active on the host
//! platform.

use hull_core::HullError;
use hull_sandbox::Manifest;
use std::path::{Component, Path, PathBuf};

/// Which access mode a path needs to satisfy against the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Reject absolute paths, reject any `..` segment, resolve the real
/// location, and require that it remain within an allow-listed prefix.
pub fn validate(manifest: &Manifest, path: &str, access: Access) -> Result<PathBuf, HullError> {
    let requested = Path::new(path);

    if requested.is_absolute() {
        return Err(HullError::not_permitted(format!("absolute path '{path}' is not allowed")));
    }
    if requested.components().any(|c| c == Component::ParentDir) {
        return Err(HullError::not_permitted(format!("path '{path}' contains '..'")));
    }

    let prefixes: &[String] = match access {
        Access::Read => {
            // Write-granted prefixes imply read, matching the spec's
            // `rwc` grant on fs_write entries.
            return resolve_within_any(path, manifest.fs_read.iter().chain(manifest.fs_write.iter()));
        }
        Access::Write => manifest.fs_write.as_slice(),
    };

    resolve_within_any(path, prefixes.iter())
}

fn resolve_within_any<'a>(
    path: &str,
    prefixes: impl Iterator<Item = &'a String>,
) -> Result<PathBuf, HullError> {
    let requested = Path::new(path);
    for prefix in prefixes {
        let root = Path::new(prefix);
        let candidate_abs = std::env::current_dir()
            .unwrap_or_default()
            .join(root)
            .join(requested);
        let root_abs = std::env::current_dir().unwrap_or_default().join(root);

        // realpath check: resolve symlinks where the target exists; for a
        // not-yet-existing write target, fall back to lexical containment
        // under the resolved root (the parent directory must exist for a
        // genuine write, which resolve() below will catch at syscall time).
        let resolved_root = root_abs.canonicalize().unwrap_or(root_abs.clone());
        let resolved_candidate = candidate_abs.canonicalize().unwrap_or(candidate_abs.clone());

        if resolved_candidate.starts_with(&resolved_root) {
            return Ok(resolved_candidate);
        }
    }
    Err(HullError::not_permitted(format!(
        "path '{path}' is outside every allow-listed prefix"
    )))
}

pub fn read(manifest: &Manifest, path: &str) -> Result<Vec<u8>, HullError> {
    let real = validate(manifest, path, Access::Read)?;
    std::fs::read(&real).map_err(|e| HullError::IoError(e.to_string()))
}

pub fn write(manifest: &Manifest, path: &str, bytes: &[u8]) -> Result<(), HullError> {
    let real = validate(manifest, path, Access::Write)?;
    if let Some(parent) = real.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HullError::IoError(e.to_string()))?;
    }
    std::fs::write(&real, bytes).map_err(|e| HullError::IoError(e.to_string()))
}

pub fn exists(manifest: &Manifest, path: &str) -> Result<bool, HullError> {
    let real = validate(manifest, path, Access::Read)?;
    Ok(real.exists())
}

pub fn delete(manifest: &Manifest, path: &str) -> Result<(), HullError> {
    let real = validate(manifest, path, Access::Write)?;
    std::fs::remove_file(&real).map_err(|e| HullError::IoError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manifest_for(dir: &Path) -> Manifest {
        Manifest {
            fs_read: vec![dir.join("data").to_string_lossy().to_string()],
            fs_write: vec![dir.join("uploads").to_string_lossy().to_string()],
            present: true,
            ..Default::default()
        }
    }

    #[test]
    fn absolute_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let manifest = manifest_for(dir.path());
        let result = validate(&manifest, "/etc/passwd", Access::Read);
        assert!(result.is_err());
    }

    #[test]
    fn parent_dir_segments_are_rejected() {
        let dir = tempdir().unwrap();
        let manifest = manifest_for(dir.path());
        let result = validate(&manifest, "../secret", Access::Read);
        assert!(result.is_err());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        let manifest = manifest_for(dir.path());
        let rel = format!("{}/uploads/f.txt", dir.path().display());
        // Use a path relative to cwd by chdir'ing for the test.
        let original_cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = (|| -> Result<(), HullError> {
            write(&manifest_relative(dir.path()), "uploads/f.txt", b"hello")?;
            let back = read(&manifest_relative(dir.path()), "uploads/f.txt")?;
            assert_eq!(back, b"hello");
            Ok(())
        })();
        std::env::set_current_dir(original_cwd).unwrap();
        let _ = rel;
        result.unwrap();
    }

    fn manifest_relative(_dir: &Path) -> Manifest {
        Manifest {
            fs_read: vec!["data".to_string()],
            fs_write: vec!["uploads".to_string()],
            present: true,
            ..Default::default()
        }
    }

    #[test]
    fn read_outside_allowlist_is_not_permitted() {
        let dir = tempdir().unwrap();
        let manifest = manifest_for(dir.path());
        let outside = dir.path().join("secret.txt");
        std::fs::write(&outside, b"nope").unwrap();
        let result = read(&manifest, outside.to_str().unwrap());
        assert!(result.is_err());
    }
}
