//! The Void/Ballistic allocator: a modular-arithmetic block placer that
//! scatters blocks across the flux ring via `(G, V, N, M, K)` coordinates
//! (`spec.md` §4.6).

use std::sync::atomic::{AtomicU64, Ordering};

use hn4_hal::{prng::Prng, DeviceType, HalHandle};

use crate::bitmap::{ArmoredBitmap, QualityMask};
use crate::diag::EngineStats;
use crate::error::{HnError, Info, TransientError, ValidationError};
use crate::profile;
use crate::tunables::{Tunables, AI_STRICT_LOCALITY_HOPS};
use crate::types::FormatProfile;

/// Gravity-assist escape constant, mixed into `V` once `K >= 4`; an
/// arbitrary odd 64-bit constant, chosen only to decorrelate from `V`
/// itself (any fixed odd constant works, per the trajectory's own
/// determinism requirement).
const GRAVITY_ASSIST_MAGIC: u64 = 0x9E37_79B9_7F4A_7C15;

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Triangle numbers `{0,1,3,6,10,15,21,28,...}`, `T(k) = k(k+1)/2`.
fn triangle(k: u32) -> u64 {
    let k = u64::from(k);
    k * (k + 1) / 2
}

/// Extended-Euclid modular inverse, used only by the reversibility
/// property tests (`N = pos * V^-1 mod Phi`).
#[must_use]
pub fn mod_inverse(v: u64, phi: u64) -> Option<u64> {
    if phi <= 1 {
        return None;
    }
    let (mut old_r, mut r) = (v as i128, phi as i128);
    let (mut old_s, mut s) = (1i128, 0i128);
    while r != 0 {
        let q = old_r / r;
        let (nr, ns) = (old_r - q * r, old_s - q * s);
        old_r = r;
        r = nr;
        old_s = s;
        s = ns;
    }
    if old_r != 1 {
        return None;
    }
    Some((((old_s % phi as i128) + phi as i128) % phi as i128) as u64)
}

/// Fix `V` up to `spec.md`'s vector-sanitation rules: nonzero, odd, and
/// coprime with `phi`. Falls back to rejection-sampling within
/// `[1, phi)` if successor-walking the odd numbers doesn't converge
/// within `retry_budget` steps.
#[must_use]
pub fn sanitize_velocity(mut v: u64, phi: u64, prng: &Prng, retry_budget: u32) -> u64 {
    if phi <= 1 {
        return 1;
    }
    if v == 0 {
        v = 1;
    }
    if v % 2 == 0 {
        v |= 1;
    }
    v %= phi.max(1);
    if v == 0 {
        v = 1;
    }
    let mut tries = 0;
    while gcd(v, phi) != 1 && tries < retry_budget {
        v = (v + 2) % phi;
        if v % 2 == 0 {
            v = v.wrapping_add(1) % phi;
        }
        if v == 0 {
            v = 1;
        }
        tries += 1;
    }
    if gcd(v, phi) != 1 {
        for _ in 0..retry_budget.max(32) {
            let candidate = 1 + prng.next_below(phi.saturating_sub(1).max(1));
            let candidate = candidate | 1;
            if candidate < phi && candidate != 0 && gcd(candidate, phi) == 1 {
                v = candidate;
                break;
            }
        }
    }
    v
}

/// A point in the trajectory's logical coordinate space.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryParams {
    pub gravity_center: u64,
    pub velocity: u64,
    pub logical_n: u64,
    pub fractal_scale: u8,
    pub orbit_index: u32,
}

/// `calc_trajectory_lba`: the core of §4.6. `phi` is the *effective*
/// ring size — already reduced to the accelerator window if AI affinity
/// applies. Returns `None` on `phi == 0` (`LBA_INVALID` sentinel) or a
/// fractal scale whose unit size `S = 2^M` is not strictly smaller than
/// `phi`.
#[must_use]
pub fn calc_trajectory_lba(
    p: TrajectoryParams,
    phi: u64,
    flux_start: u64,
    device_type: DeviceType,
    fmt_profile: FormatProfile,
) -> Option<u64> {
    if phi == 0 {
        return None;
    }
    let s: u64 = 1u64 << p.fractal_scale.min(63);
    if s >= phi {
        return None;
    }

    let entropy = p.gravity_center % s;
    let g_aligned = p.gravity_center - entropy;
    let cluster_idx = (p.logical_n >> 4) % phi;

    let v_for_stride = if p.orbit_index >= 4 {
        p.velocity.rotate_left(17) ^ GRAVITY_ASSIST_MAGIC
    } else {
        p.velocity
    };
    let stride_offset = cluster_idx.wrapping_mul(v_for_stride % phi) % phi;

    let base = (g_aligned.wrapping_add(entropy.wrapping_mul(s))) % phi;

    let mut theta = triangle(p.orbit_index);
    if profile::suppresses_theta(fmt_profile, device_type) {
        theta = 0;
    }

    let physical_offset = base
        .wrapping_add(stride_offset.wrapping_mul(s))
        .wrapping_add(theta)
        .wrapping_add(entropy)
        % phi;

    Some(flux_start + physical_offset)
}

/// The accelerator-window view of the flux ring: either the full global
/// pool or a restricted `[lba_start, lba_start+lba_len)` slice.
struct AffinityWindow {
    start: u64,
    len: u64,
}

fn resolve_affinity_window(
    hal: &HalHandle,
    fmt_profile: FormatProfile,
    global_flux_start: u64,
    global_flux_len: u64,
) -> AffinityWindow {
    if fmt_profile != FormatProfile::Ai || hal.topology_is_empty() {
        return AffinityWindow {
            start: global_flux_start,
            len: global_flux_len,
        };
    }
    let id = hn4_hal::accel::get_context();
    if id.is_none() {
        return AffinityWindow {
            start: global_flux_start,
            len: global_flux_len,
        };
    }
    match hal.topology_window(id) {
        Some((start, len)) => AffinityWindow { start, len },
        None => AffinityWindow {
            start: global_flux_start,
            len: global_flux_len,
        },
    }
}

/// `all 8 hops (G+0..G+7)` must remain inside the window for the
/// candidate to pass strict locality.
fn passes_strict_locality(window: &AffinityWindow, g: u64) -> bool {
    match g.checked_add(AI_STRICT_LOCALITY_HOPS - 1) {
        Some(last) => g >= window.start && last < window.start + window.len,
        None => false,
    }
}

/// Owns the flux/horizon geometry for one volume and drives allocation.
#[derive(Debug)]
pub struct Allocator {
    pub flux_start: u64,
    pub flux_len: u64,
    pub horizon_start: u64,
    pub horizon_len: u64,
    pub profile: FormatProfile,
    pub device_type: DeviceType,
    horizon_head: AtomicU64,
}

impl Allocator {
    #[must_use]
    pub fn new(
        flux_start: u64,
        flux_len: u64,
        horizon_start: u64,
        horizon_len: u64,
        profile: FormatProfile,
        device_type: DeviceType,
    ) -> Self {
        Self {
            flux_start,
            flux_len,
            horizon_start,
            horizon_len,
            profile,
            device_type,
            horizon_head: AtomicU64::new(0),
        }
    }

    fn forces_rail(&self, contiguous: bool) -> bool {
        contiguous || profile::forces_rail_mode(self.profile, self.device_type)
    }

    fn occupancy_pct(&self, used_blocks: u64, total_blocks: u64) -> u8 {
        if total_blocks == 0 {
            return 0;
        }
        ((used_blocks * 100) / total_blocks) as u8
    }

    /// Choose a new `(G, V)` pair for a new anchor.
    pub fn alloc_genesis(
        &self,
        hal: &HalHandle,
        bitmap: &ArmoredBitmap,
        tunables: &Tunables,
        contiguous: bool,
    ) -> Result<(u64, u64), HnError> {
        let window = resolve_affinity_window(hal, self.profile, self.flux_start, self.flux_len);
        if window.len == 0 {
            return Err(TransientError::EventHorizon.into());
        }

        let affinity_active = self.profile == FormatProfile::Ai && !hal.topology_is_empty();

        let v = if self.forces_rail(contiguous) {
            1
        } else {
            sanitize_velocity(hal.prng().next_u64(), window.len, hal.prng(), 32)
        };

        for _probe in 0..tunables.probe_budget {
            let candidate_g = window.start + hal.prng().next_below(window.len);
            if affinity_active && !passes_strict_locality(&window, candidate_g) {
                continue;
            }
            let local_idx = candidate_g.saturating_sub(self.flux_start);
            if local_idx < bitmap.total_blocks() {
                let mut bm = bitmap.clone();
                if let Ok((occupied, _)) = bm.test(local_idx) {
                    if !occupied {
                        return Ok((candidate_g, v));
                    }
                }
            }
        }
        Err(TransientError::EventHorizon.into())
    }

    /// Allocate the next physical block for an existing anchor at
    /// logical index `n`.
    pub fn alloc_block(
        &self,
        hal: &HalHandle,
        bitmap: &mut ArmoredBitmap,
        qmask: &QualityMask,
        gravity_center: u64,
        velocity: u64,
        fractal_scale: u16,
        logical_n: u64,
        tunables: &Tunables,
        stats: &EngineStats,
    ) -> Result<(u64, u32, Info), HnError> {
        let window = resolve_affinity_window(hal, self.profile, self.flux_start, self.flux_len);
        if window.len == 0 {
            return Err(TransientError::EventHorizon.into());
        }
        let affinity_active = self.profile == FormatProfile::Ai && !hal.topology_is_empty();
        let m = fractal_scale as u8;
        let max_k = if self.profile == FormatProfile::Pico {
            0
        } else {
            tunables.alloc_max_retries
        };

        for k in 0..=max_k {
            let p = TrajectoryParams {
                gravity_center,
                velocity,
                logical_n,
                fractal_scale: m,
                orbit_index: k,
            };
            let Some(lba) = calc_trajectory_lba(p, window.len, window.start, self.device_type, self.profile)
            else {
                continue;
            };
            if affinity_active && !passes_strict_locality(&window, lba) {
                continue;
            }
            let local_idx = lba.saturating_sub(self.flux_start);
            if local_idx >= qmask.as_bytes().len() as u64 * 4 {
                continue;
            }
            if qmask.quality(local_idx).is_toxic() {
                continue;
            }
            let (occupied, heal_info) = bitmap.test(local_idx)?;
            if heal_info == Info::Healed {
                stats.record_heal();
            }
            if occupied {
                continue;
            }
            let set_info = bitmap.set(local_idx)?;
            if set_info == Info::Healed {
                stats.record_heal();
            }

            let occ_pct = self.occupancy_pct(bitmap.used_blocks(), bitmap.total_blocks());
            let info = if occ_pct >= tunables.saturation_threshold_pct && m == 0 {
                stats.record_horizon_fallback();
                Info::HorizonFallback
            } else {
                Info::None
            };
            return Ok((lba, k, info));
        }

        if m == 0 {
            let lba = self.alloc_horizon()?;
            return Ok((lba, max_k, Info::HorizonFallback));
        }
        Err(TransientError::GravityCollapse.into())
    }

    /// Monotonic append into the horizon ring.
    pub fn alloc_horizon(&self) -> Result<u64, HnError> {
        loop {
            let old = self.horizon_head.load(Ordering::Acquire);
            if old >= self.horizon_len {
                return Err(ValidationError::Enospc.into());
            }
            if self
                .horizon_head
                .compare_exchange(old, old + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(self.horizon_start + old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hn4_hal::caps::{DeviceType as HalDeviceType, HalCaps, HwCapFlags};

    fn test_hal() -> HalHandle {
        HalHandle::init(HalCaps {
            device_type: HalDeviceType::Ssd,
            sector_size: 4096,
            capacity_sectors: 1 << 20,
            flags: HwCapFlags::STRICT_FLUSH,
            zone_size_blocks: 0,
            zone_count: 0,
        })
    }

    #[test]
    fn trajectory_is_deterministic() {
        let p = TrajectoryParams {
            gravity_center: 5,
            velocity: 3,
            logical_n: 160,
            fractal_scale: 0,
            orbit_index: 0,
        };
        let a = calc_trajectory_lba(p, 64, 1000, DeviceType::Ssd, FormatProfile::Generic);
        let b = calc_trajectory_lba(p, 64, 1000, DeviceType::Ssd, FormatProfile::Generic);
        assert_eq!(a, b);
        assert!(a.unwrap() >= 1000 && a.unwrap() < 1064);
    }

    #[test]
    fn phi_zero_is_invalid() {
        let p = TrajectoryParams {
            gravity_center: 0,
            velocity: 1,
            logical_n: 0,
            fractal_scale: 0,
            orbit_index: 0,
        };
        assert!(calc_trajectory_lba(p, 0, 1000, DeviceType::Ssd, FormatProfile::Generic).is_none());
    }

    #[test]
    fn bijection_over_one_period() {
        let phi = 64u64;
        let v = 3u64; // coprime with 64
        let mut seen = std::collections::HashSet::new();
        for n in 0..phi {
            let p = TrajectoryParams {
                gravity_center: 0,
                velocity: v,
                logical_n: n * 16,
                fractal_scale: 0,
                orbit_index: 0,
            };
            let lba = calc_trajectory_lba(p, phi, 0, DeviceType::Ssd, FormatProfile::Generic).unwrap();
            assert!(lba < phi);
            assert!(seen.insert(lba), "collision at n={n}");
        }
        assert_eq!(seen.len(), phi as usize);
    }

    #[test]
    fn theta_suppressed_on_hdd() {
        let p = TrajectoryParams {
            gravity_center: 10,
            velocity: 3,
            logical_n: 0,
            fractal_scale: 0,
            orbit_index: 0,
        };
        let p2 = TrajectoryParams {
            orbit_index: 2,
            ..p
        };
        let hdd_a = calc_trajectory_lba(p, 1000, 0, DeviceType::Hdd, FormatProfile::Generic).unwrap();
        let hdd_b = calc_trajectory_lba(p2, 1000, 0, DeviceType::Hdd, FormatProfile::Generic).unwrap();
        assert_eq!(hdd_a, hdd_b);

        let ssd_a = calc_trajectory_lba(p, 1000, 0, DeviceType::Ssd, FormatProfile::Generic).unwrap();
        let ssd_b = calc_trajectory_lba(p2, 1000, 0, DeviceType::Ssd, FormatProfile::Generic).unwrap();
        assert_ne!(ssd_a, ssd_b);
    }

    #[test]
    fn mod_inverse_round_trips() {
        let phi = 64u64;
        let v = 3u64;
        let inv = mod_inverse(v, phi).unwrap();
        assert_eq!((v * inv) % phi, 1);
    }

    #[test]
    fn sanitize_velocity_always_returns_coprime_odd() {
        let hal = test_hal();
        let phi = 100u64;
        for seed in [0u64, 2, 4, 50, 99] {
            let v = sanitize_velocity(seed, phi, hal.prng(), 16);
            assert_eq!(v % 2, 1);
            assert_eq!(gcd(v, phi), 1);
        }
    }

    #[test]
    fn horizon_ring_is_monotonic_and_bounded() {
        let alloc = Allocator::new(0, 10, 1000, 4, FormatProfile::Generic, DeviceType::Ssd);
        assert_eq!(alloc.alloc_horizon().unwrap(), 1000);
        assert_eq!(alloc.alloc_horizon().unwrap(), 1001);
        assert_eq!(alloc.alloc_horizon().unwrap(), 1002);
        assert_eq!(alloc.alloc_horizon().unwrap(), 1003);
        assert!(matches!(
            alloc.alloc_horizon().unwrap_err(),
            HnError::Validation(ValidationError::Enospc)
        ));
    }

    #[test]
    fn alloc_block_finds_free_slot() {
        let hal = test_hal();
        let alloc = Allocator::new(0, 64, 900, 16, FormatProfile::Generic, DeviceType::Ssd);
        let mut bitmap = ArmoredBitmap::new(64);
        let qmask = QualityMask::new(64);
        let stats = EngineStats::new();
        let tunables = Tunables::default();
        let (lba, _k, info) = alloc
            .alloc_block(&hal, &mut bitmap, &qmask, 0, 3, 0, 0, &tunables, &stats)
            .unwrap();
        assert!(lba < 64);
        assert_eq!(info, Info::None);
        let (occupied, _) = bitmap.test(lba).unwrap();
        assert!(occupied);
    }
}
