//! Random pacing between loop ticks.

use rand::Rng;
use tokio::time::Duration;

/// Returns a delay in milliseconds drawn uniformly from `[min, max]`.
///
/// Callers validate `min <= max` before a task starts; a collapsed or inverted
/// range yields `min`.
pub fn next(min: u64, max: u64) -> u64 {
    next_with(&mut rand::thread_rng(), min, max)
}

/// Same as [`next`] with an explicit RNG.
pub fn next_with<R: Rng + ?Sized>(rng: &mut R, min: u64, max: u64) -> u64 {
    if min >= max {
        return min;
    }
    rng.gen_range(min..=max)
}

/// [`next`] as a `Duration`.
pub fn next_duration(min_ms: u64, max_ms: u64) -> Duration {
    Duration::from_millis(next(min_ms, max_ms))
}
