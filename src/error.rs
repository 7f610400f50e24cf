//! Error types surfaced by the cache.
//!
//! The cache itself only ever fails in four ways: a bounded lock wait timed
//! out, the generation ring was asked for a generation number that cannot
//! exist, or a caller-supplied loader failed. Cleanup sweeps never surface
//! errors to callers — anomalies encountered there are logged and skipped.

use std::time::Duration;

/// An error produced while looking up, inserting, or maintaining cached
/// values.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A bounded lock acquisition (the manager mutex or an index's
    /// reader-writer lock) did not succeed within its time budget.
    #[error("lock not acquired within {waited:?}")]
    LockTimeout {
        /// The bound that was exceeded.
        waited: Duration,
    },

    /// The monotonic generation counter would have wrapped past its valid
    /// range. Treated as fatal for the affected operation rather than
    /// silently wrapping, since a wrapped generation could alias a live
    /// bag.
    #[error("generation counter overflowed")]
    BagNumberOverflow,

    /// A generation number outside `[oldest, current]`, or negative, was
    /// used to index the bag ring.
    #[error("invalid generation number: {0}")]
    BagNumberInvalid(i64),

    /// A caller-supplied loader failed. The inner error is opaque and is
    /// not interpreted by the cache.
    #[error("loader failed: {0}")]
    LoaderFailure(#[from] LoaderError),
}

/// The error type returned by a loader callback.
///
/// Loaders are user-supplied and may fail for any reason (I/O, deserialize
/// errors, an upstream service being down); the cache never inspects the
/// cause, only forwards it.
pub type LoaderError = anyhow::Error;

/// Convenience alias for fallible loader results.
///
/// `Ok(None)` means "no value exists for this key" (not an error); `Err`
/// means the loader itself failed. Either way nothing is inserted into the
/// cache.
pub type LoaderResult<T> = Result<Option<T>, LoaderError>;
