//! Deterministic PRNG for non-cryptographic, statistical use only:
//! UUID filler bits, vector-sanitation retries, and allocator probing.
//!
//! Seeded from uninitialized-stack entropy XOR the monotonic clock, then
//! advanced with a 64-bit LCG under relaxed memory order. Global atomic
//! seed, matching the concurrency model in `spec.md` §5.

use std::sync::atomic::{AtomicU64, Ordering};

const LCG_MUL: u64 = 6364136223846793005;
const LCG_INC: u64 = 1442695040888963407;

/// Reads a few bytes of whatever happens to be sitting in an
/// uninitialized stack slot. This is not used for anything
/// security-sensitive; it is one more mixing input into the seed.
#[must_use]
pub fn stack_entropy_seed() -> u64 {
    let slot: std::mem::MaybeUninit<u64> = std::mem::MaybeUninit::uninit();
    // SAFETY: we only read the bits as an opaque u64 for entropy mixing;
    // the value is never treated as initialized data of any other type,
    // and u64 has no validity invariants beyond its size.
    let raw = unsafe { slot.assume_init() };
    raw ^ (&slot as *const _ as u64)
}

/// A deterministic linear-congruential generator behind an atomic word,
/// safe to share across threads.
#[derive(Debug)]
pub struct Prng {
    state: AtomicU64,
}

impl Prng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed | 1),
        }
    }

    /// Advance the generator and return the next 64-bit value.
    pub fn next_u64(&self) -> u64 {
        let mut cur = self.state.load(Ordering::Relaxed);
        loop {
            let next = cur.wrapping_mul(LCG_MUL).wrapping_add(LCG_INC);
            match self
                .state
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Uniform value in `[0, bound)`. `bound == 0` returns 0.
    pub fn next_below(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        self.next_u64() % bound
    }
}
