//! The error taxonomy every Hull crate maps into.
//!
//! Capability primitives never let this type cross the script boundary —
//! they surface a single negative sentinel (see `hull-capability`) and log
//! a [`HullError`] at the call site. At the process boundary (CLI startup,
//! signature verification, sandbox application) a [`HullError`] becomes the
//! last thing logged before `std::process::exit(1)`.

use std::fmt;

/// The seven fail-with categories from the capability/runtime trust
/// boundary. Each carries enough context to log a useful line; none of it
/// is ever echoed back to an HTTP client (see `hull-runtime`'s dispatcher,
/// which turns any of these into a bare status code).
#[derive(thiserror::Error)]
pub enum HullError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of budget: {0}")]
    OutOfBudget(String),

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl fmt::Debug for HullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl HullError {
    /// The taxonomy category name, as used in structured log fields.
    pub fn category(&self) -> &'static str {
        match self {
            HullError::InvalidArgument(_) => "InvalidArgument",
            HullError::OutOfBudget(_) => "OutOfBudget",
            HullError::NotPermitted(_) => "NotPermitted",
            HullError::IntegrityFailure(_) => "IntegrityFailure",
            HullError::RuntimeError(_) => "RuntimeError",
            HullError::IoError(_) => "IOError",
            HullError::Timeout(_) => "Timeout",
        }
    }

    pub fn not_permitted(msg: impl Into<String>) -> Self {
        HullError::NotPermitted(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        HullError::InvalidArgument(msg.into())
    }
}

impl From<std::io::Error> for HullError {
    fn from(err: std::io::Error) -> Self {
        HullError::IoError(err.to_string())
    }
}

/// Generate `From<E> for HullError` implementations that map error types to
/// a specific `HullError` variant, mirroring how capability-specific error
/// types (e.g. `rusqlite::Error`) collapse into the shared taxonomy.
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::HullError {
                fn from(err: $err_ty) -> Self {
                    $crate::HullError::$variant(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_match_taxonomy() {
        assert_eq!(HullError::invalid_argument("x").category(), "InvalidArgument");
        assert_eq!(HullError::not_permitted("x").category(), "NotPermitted");
    }

    #[test]
    fn display_includes_category_and_message() {
        let err = HullError::IntegrityFailure("file hash mismatch".into());
        assert_eq!(err.to_string(), "integrity failure: file hash mismatch");
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: HullError = io_err.into();
        assert_eq!(err.category(), "IOError");
    }
}
