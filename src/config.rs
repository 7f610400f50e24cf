//! Configuration for the cache.
//!
//! # Examples
//!
//! ```
//! use lifespan_cache::config::CacheConfig;
//! use core::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! let config = CacheConfig {
//!     capacity: NonZeroUsize::new(10_000).unwrap(),
//!     min_age: Duration::from_secs(5),
//!     max_age: Duration::from_secs(60 * 60),
//!     validity: None,
//! };
//! ```

use core::num::NonZeroUsize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The longest `max_age` the Lifespan Manager will honor. Larger values are
/// silently clamped, since the generation ring's time slice degrades (and
/// the ring can no longer distinguish recently-touched items from stale
/// ones) well before this bound.
pub const MAX_AGE_CEILING: Duration = Duration::from_secs(12 * 60 * 60);

/// Configuration for a [`Cache`](crate::cache::Cache).
///
/// `capacity` is the soft item-count target the Lifespan Manager aims to
/// stay near; `min_age` is the floor below which an item is never evicted
/// purely for capacity pressure; `max_age` is the ceiling above which an
/// item is evicted regardless of capacity pressure (clamped to
/// [`MAX_AGE_CEILING`]).
#[derive(Clone)]
pub struct CacheConfig {
    /// Target number of live, attached items.
    pub capacity: NonZeroUsize,
    /// Minimum residency time before an item becomes eligible for
    /// capacity-driven eviction.
    pub min_age: Duration,
    /// Maximum residency time before an item is evicted outright.
    pub max_age: Duration,
    /// Optional predicate consulted during maintenance sweeps; when it
    /// returns `false` the entire cache is cleared on the next check.
    pub validity: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl CacheConfig {
    /// Returns `max_age` clamped to [`MAX_AGE_CEILING`].
    pub fn clamped_max_age(&self) -> Duration {
        self.max_age.min(MAX_AGE_CEILING)
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("capacity", &self.capacity)
            .field("min_age", &self.min_age)
            .field("max_age", &self.max_age)
            .field("validity", &self.validity.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_max_age_to_ceiling() {
        let config = CacheConfig {
            capacity: NonZeroUsize::new(10).unwrap(),
            min_age: Duration::from_secs(1),
            max_age: Duration::from_secs(24 * 60 * 60),
            validity: None,
        };
        assert_eq!(config.clamped_max_age(), MAX_AGE_CEILING);
    }

    #[test]
    fn leaves_small_max_age_untouched() {
        let config = CacheConfig {
            capacity: NonZeroUsize::new(10).unwrap(),
            min_age: Duration::from_secs(1),
            max_age: Duration::from_secs(60),
            validity: None,
        };
        assert_eq!(config.clamped_max_age(), Duration::from_secs(60));
    }
}
