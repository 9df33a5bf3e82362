//! Error taxonomy for the autolock engine.
//!
//! Only genuinely exceptional conditions surface as errors. An empty
//! correlation overlap scores a zero coefficient, and detection-threshold
//! misses (unstable jitter, insufficient margin) are normal loop
//! continuations; neither appears here.

use thiserror::Error;

use crate::hardware::HardwareError;

/// Failures surfaced by the locking engine to its host.
#[derive(Debug, Error)]
pub enum LockError {
    /// A hardware acquisition or lock-wait failed; the current attempt is
    /// aborted and the supervisor falls back to a safe sweeping state.
    #[error(transparent)]
    Hardware(#[from] HardwareError),

    /// The requested reference-line key is not in the catalog. Rejected at
    /// the API boundary, before any hardware activity.
    #[error("no reference line named {0:?} in the catalog")]
    CatalogMiss(String),

    /// The centering controller exhausted its offset-retry ladder without
    /// ever seeing the line. Reported once; not retried automatically.
    #[error("offset search exhausted without locating the reference line")]
    SearchExhausted,

    /// A reference line violates its invariants (empty trace, non-monotonic
    /// grid, or a lock region outside the trace).
    #[error("malformed reference line: {0}")]
    MalformedReference(String),
}
