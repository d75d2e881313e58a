//! Shared primitives used by every Hull crate: the tracked allocator, the
//! runtime-neutral value model, the error taxonomy, the config record, and
//! logging init. Nothing in here performs an effect — that's
//! `hull-capability`'s job.

pub mod alloc;
pub mod config;
pub mod error;
pub mod logging;
pub mod value;

pub use alloc::{Arena, OutOfBudget, TrackedAllocator};
pub use config::{HullConfig, LogLevel, SizeValue, DEFAULT_MAX_REQUEST_BODY_BYTES};
pub use error::HullError;
pub use logging::init_tracing;
pub use value::{Column, RowControl, Value, STACK_ROW_COLUMNS};
