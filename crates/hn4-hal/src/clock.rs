//! Monotonic nanosecond clock.

use std::time::Instant;
use std::sync::OnceLock;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first call to this function in the process
/// lifetime. Monotonic, never goes backwards.
#[must_use]
pub fn monotonic_ns() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
