//! The process-wide configuration record.
//!
//! Precedence is CLI flag, then `HULL_*` environment variable, then a
//! built-in default — the same explicit-argument-over-environment-over-default
//! order the base's config loader uses, just without a YAML layer underneath
//! it: Hull's configuration surface is the CLI flags in `spec.md` §6 and
//! nothing else.

use crate::HullError;
use std::str::FromStr;

/// `-l` log level, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl FromStr for LogLevel {
    type Err = HullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(HullError::invalid_argument(format!(
                "unrecognized log level '{other}'"
            ))),
        }
    }
}

impl LogLevel {
    /// The `tracing`/`EnvFilter` directive this level maps to. `fatal` has
    /// no tracing equivalent, so it degrades to `error` (nothing below
    /// error is ever emitted at that level).
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

/// A byte size parsed from a CLI flag, accepting an optional `k|m|g` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeValue(pub u64);

impl FromStr for SizeValue {
    type Err = HullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HullError::invalid_argument("empty size value"));
        }
        let (digits, multiplier) = match s.as_bytes()[s.len() - 1] {
            b'k' | b'K' => (&s[..s.len() - 1], 1024u64),
            b'm' | b'M' => (&s[..s.len() - 1], 1024 * 1024),
            b'g' | b'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
            _ => (s, 1),
        };
        let base: u64 = digits
            .parse()
            .map_err(|_| HullError::invalid_argument(format!("invalid size value '{s}'")))?;
        let total = base
            .checked_mul(multiplier)
            .ok_or_else(|| HullError::invalid_argument(format!("size value '{s}' overflows")))?;
        Ok(SizeValue(total))
    }
}

/// Immutable, fully validated process configuration, assembled once at
/// startup and never mutated afterward (see `hull-cli`'s loader for the
/// flag/env merge that produces one of these).
#[derive(Debug, Clone)]
pub struct HullConfig {
    pub port: u16,
    pub bind_addr: String,
    pub db_path: std::path::PathBuf,
    pub max_heap_bytes: Option<u64>,
    pub max_process_memory_bytes: Option<u64>,
    pub max_stack_bytes: Option<u64>,
    /// Instructions the interpreter runs before its cooperative-preemption
    /// hook fires; `None` disables the gas check entirely.
    pub instruction_gas: Option<u64>,
    /// Hard cap on an inbound request body, enforced by the body factory
    /// before it reads a byte beyond the cap (spec.md §2/§8). Not exposed
    /// as a CLI flag — the ≤1 MiB figure is a design constant, not an
    /// operator-tunable one — but lives on the config record rather than
    /// a bare literal in the server loop so tests can shrink it.
    pub max_request_body_bytes: u64,
    pub log_level: LogLevel,
    pub entry_point: Option<std::path::PathBuf>,
}

/// The ≤1 MiB request body ceiling spec.md §2 designs around.
pub const DEFAULT_MAX_REQUEST_BODY_BYTES: u64 = 1024 * 1024;

impl Default for HullConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_addr: "127.0.0.1".to_string(),
            db_path: std::path::PathBuf::from("hull.db"),
            max_heap_bytes: None,
            max_process_memory_bytes: None,
            max_stack_bytes: None,
            instruction_gas: None,
            max_request_body_bytes: DEFAULT_MAX_REQUEST_BODY_BYTES,
            log_level: LogLevel::Info,
            entry_point: None,
        }
    }
}

impl HullConfig {
    /// Validate the 1–65535 port constraint explicitly, rather than
    /// relying on `u16`'s range alone — port 0 is syntactically a valid
    /// `u16` but not a valid bind port for this system.
    pub fn validate(&self) -> Result<(), HullError> {
        if self.port == 0 {
            return Err(HullError::invalid_argument("port must be 1-65535"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_value_parses_suffixes() {
        assert_eq!("512".parse::<SizeValue>().unwrap().0, 512);
        assert_eq!("4k".parse::<SizeValue>().unwrap().0, 4096);
        assert_eq!("16m".parse::<SizeValue>().unwrap().0, 16 * 1024 * 1024);
        assert_eq!("1g".parse::<SizeValue>().unwrap().0, 1024 * 1024 * 1024);
        assert_eq!("2M".parse::<SizeValue>().unwrap().0, 2 * 1024 * 1024);
    }

    #[test]
    fn size_value_rejects_garbage() {
        assert!("".parse::<SizeValue>().is_err());
        assert!("abc".parse::<SizeValue>().is_err());
    }

    #[test]
    fn log_level_parses_known_values() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn config_rejects_port_zero() {
        let mut cfg = HullConfig::default();
        cfg.port = 0;
        assert!(cfg.validate().is_err());
    }
}
