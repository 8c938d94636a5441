//! Engine-wide tunables, loadable from the environment the way the
//! teacher's runtime-mode config reads `GLIBC_RUST_*` variables.

/// Maximum orbit-index retries before the allocator gives up on the flux
/// region and falls back to the horizon allocator.
pub const ALLOC_MAX_RETRIES: u32 = 12;

/// Above this many consecutive failed probes the retry loop is abandoned
/// even if `ALLOC_MAX_RETRIES` has not yet been reached — a horizon
/// sentinel, not a hard cap, so callers can distinguish "exhausted the
/// budget" from "gave up early because the trend was clearly hopeless".
pub const ALLOC_HORIZON_SENTINEL: u32 = 15;

/// Flux-region occupancy, in percent, above which new allocations are
/// steered to the horizon allocator and `RUNTIME_SATURATED` is set.
pub const SATURATION_THRESHOLD_PCT: u8 = 95;

/// Row-lock shard count for the parity engine.
pub const HELIX_SHARD_COUNT: u32 = 64;

/// Hard ceiling on member devices in a parity array.
pub const HN4_MAX_ARRAY_DEVICES: usize = 16;

/// Default stripe unit, in sectors, for a newly formatted parity array.
pub const DEFAULT_STRIPE_UNIT_SECTORS: u32 = 128;

/// Chronicle region reservation at format time.
pub const CHRONICLE_RESERVE_BYTES: u64 = 10 * 1024 * 1024;

/// Default locality-probe budget for a single trajectory search before
/// declaring `EventHorizon`.
pub const DEFAULT_PROBE_BUDGET: u32 = 20;

/// Width, in hops, of the AI-profile per-accelerator strict-locality
/// window.
pub const AI_STRICT_LOCALITY_HOPS: u64 = 8;

/// Runtime-overridable knobs, read once at [`HalHandle`](hn4_hal::HalHandle)
/// construction time the way the teacher's config layer reads environment
/// overrides into a process-wide struct.
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub alloc_max_retries: u32,
    pub alloc_horizon_sentinel: u32,
    pub saturation_threshold_pct: u8,
    pub probe_budget: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            alloc_max_retries: ALLOC_MAX_RETRIES,
            alloc_horizon_sentinel: ALLOC_HORIZON_SENTINEL,
            saturation_threshold_pct: SATURATION_THRESHOLD_PCT,
            probe_budget: DEFAULT_PROBE_BUDGET,
        }
    }
}

impl Tunables {
    /// Overlay `HN4_*` environment variables onto the defaults. Unparsable
    /// or absent variables silently fall back rather than failing engine
    /// bring-up.
    #[must_use]
    pub fn from_env() -> Self {
        let mut t = Self::default();
        if let Some(v) = env_u32("HN4_ALLOC_MAX_RETRIES") {
            t.alloc_max_retries = v;
        }
        if let Some(v) = env_u32("HN4_ALLOC_HORIZON_SENTINEL") {
            t.alloc_horizon_sentinel = v;
        }
        if let Some(v) = env_u32("HN4_SATURATION_THRESHOLD_PCT") {
            t.saturation_threshold_pct = v.min(100) as u8;
        }
        if let Some(v) = env_u32("HN4_PROBE_BUDGET") {
            t.probe_budget = v;
        }
        t
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse().ok()
}
