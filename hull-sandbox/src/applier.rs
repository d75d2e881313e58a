//! Translate a [`Manifest`] into a kernel-enforced filesystem view and
//! syscall pledge set, and seal it.
//!
//! On Linux this is `landlock` (unveil-equivalent: restrict-and-seal a path
//! allowlist) plus `extrasafe` (pledge-equivalent: restrict-and-seal a
//! syscall family allowlist). On any other target there is no kernel
//! primitive to reach for; the applier logs that enforcement reduces to the
//! capability layer's validators, exactly as spec.md §4.6 describes, and
//! returns success so startup proceeds.

use crate::manifest::Manifest;
use hull_core::HullError;
use tracing::{info, warn};

/// Outcome of applying the sandbox, surfaced so the caller can decide
/// whether to log a warning about reduced enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxOutcome {
    /// Kernel-enforced restriction applied and sealed.
    Enforced,
    /// No kernel primitive on this platform; capability-layer validators
    /// are the only enforcement.
    NoOp,
}

/// Apply the sandbox given the manifest and the path to the SQLite
/// database file (always granted read+write+create regardless of the
/// manifest, since the DB handle is a host-owned resource, not a
/// script-declared one).
pub fn apply_sandbox(manifest: &Manifest, db_path: &std::path::Path) -> Result<SandboxOutcome, HullError> {
    if !manifest.present {
        info!("no manifest declared; sandbox left off as a declared policy");
        return Ok(SandboxOutcome::NoOp);
    }
    imp::apply(manifest, db_path)
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;
    use extrasafe::builtins::{BasicCapabilities, Networking, SystemIO};
    use extrasafe::SafetyContext;
    use landlock::{
        Access, AccessFs, PathBeneath, PathFd, Ruleset, RulesetAttr, RulesetCreatedAttr,
        RulesetStatus, ABI,
    };

    pub fn apply(manifest: &Manifest, db_path: &std::path::Path) -> Result<SandboxOutcome, HullError> {
        let abi = ABI::V5;
        let access_all = AccessFs::from_all(abi);

        let mut ruleset = Ruleset::default()
            .handle_access(access_all)
            .map_err(|e| HullError::NotPermitted(format!("landlock handle_access: {e}")))?
            .create()
            .map_err(|e| HullError::NotPermitted(format!("landlock create: {e}")))?;

        for path in &manifest.fs_read {
            ruleset = add_rule(ruleset, path, AccessFs::from_read(abi))?;
        }
        for path in &manifest.fs_write {
            ruleset = add_rule(ruleset, path, access_all)?;
        }
        ruleset = add_rule(ruleset, &db_path.to_string_lossy(), access_all)?;

        let status = ruleset
            .restrict_self()
            .map_err(|e| HullError::NotPermitted(format!("landlock restrict_self: {e}")))?;
        if status.ruleset == RulesetStatus::NotEnforced {
            warn!("landlock not enforced by this kernel; falling back to capability validators");
        }

        let mut ctx = SafetyContext::new()
            .enable(BasicCapabilities)
            .map_err(|e| HullError::NotPermitted(format!("pledge basics: {e}")))?
            .enable(
                SystemIO::nothing()
                    .allow_read()
                    .allow_write()
                    .allow_open()
                    .allow_metadata()
                    .allow_close(),
            )
            .map_err(|e| HullError::NotPermitted(format!("pledge io: {e}")))?;

        if !manifest.hosts.is_empty() {
            ctx = ctx
                .enable(Networking::nothing().allow_connect().allow_start_tcp_clients())
                .map_err(|e| HullError::NotPermitted(format!("pledge net: {e}")))?;
        }

        ctx.apply_to_current_thread()
            .map_err(|e| HullError::NotPermitted(format!("pledge apply: {e}")))?;

        info!("sandbox applied and sealed");
        Ok(SandboxOutcome::Enforced)
    }

    fn add_rule(
        ruleset: landlock::RulesetCreated,
        path: &str,
        access: AccessFs,
    ) -> Result<landlock::RulesetCreated, HullError> {
        let fd = PathFd::new(path)
            .map_err(|e| HullError::NotPermitted(format!("unveil path '{path}': {e}")))?;
        ruleset
            .add_rule(PathBeneath::new(fd, access))
            .map_err(|e| HullError::NotPermitted(format!("unveil rule for '{path}': {e}")))
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::*;

    pub fn apply(_manifest: &Manifest, _db_path: &std::path::Path) -> Result<SandboxOutcome, HullError> {
        warn!("no kernel sandbox primitive on this platform; enforcement reduces to capability validators");
        Ok(SandboxOutcome::NoOp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_manifest_is_a_noop() {
        let manifest = Manifest::absent();
        let outcome = apply_sandbox(&manifest, std::path::Path::new("/tmp/hull-test.db")).unwrap();
        assert_eq!(outcome, SandboxOutcome::NoOp);
    }
}
