//! Small error type for the handful of fallible conversions that live in
//! this crate (enum parsing from persisted strings). Subsystem-specific
//! error hierarchies (lease, transport, storage, orchestrator, ...) live in
//! `kagan-runtime::errors` next to the code that raises them, following the
//! teacher's per-subsystem `thiserror` enum split.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("invalid enum value for {field}: {value}")]
    InvalidEnumValue { field: &'static str, value: String },
}
