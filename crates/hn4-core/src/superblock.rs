//! Four-mirror superblock quorum: mount, self-heal, and unmount
//! (`spec.md` §4.3). Mirrors live at fixed LBAs N/E/W/S; a mount is only
//! refused outright if no mirror parses at all.

use hn4_hal::device::{IoOp, IoRequest, MemoryDevice};
use hn4_hal::sync_io::{self, DEFAULT_TIMEOUT};
use hn4_hal::HalHandle;

use crate::diag::EngineStats;
use crate::error::{FatalError, HnError, TransientError, ValidationError};
use crate::types::{StateFlags, Superblock, SB_SIZE};

/// Compass-point mirror identity, also the mirror's rewrite order on
/// unmount (`spec.md` §2.3: N, then E, then W, then S, flushing between
/// each so a crash mid-unmount never loses quorum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    North,
    East,
    West,
    South,
}

pub const MIRROR_ORDER: [Mirror; 4] = [Mirror::North, Mirror::East, Mirror::West, Mirror::South];

/// Mirror LBAs are fixed offsets from the start of the device; South is
/// optional (`SOUTH_SB_PRESENT` in `state_flags` says whether it exists).
#[must_use]
pub fn mirror_lba(mirror: Mirror, sb_size_sectors: u64) -> u64 {
    match mirror {
        Mirror::North => 0,
        Mirror::East => sb_size_sectors,
        Mirror::West => sb_size_sectors * 2,
        Mirror::South => sb_size_sectors * 3,
    }
}

fn read_mirror(
    hal: &HalHandle,
    device: &MemoryDevice,
    lba: u64,
    sb_size_sectors: u64,
) -> Result<Option<Superblock>, HnError> {
    let req = IoRequest::new(IoOp::Read, lba, Vec::new(), sb_size_sectors as u32);
    let res = sync_io::sync_submit(hal, device, req, DEFAULT_TIMEOUT).map_err(HnError::from)?;
    if !res.ok || res.buf.len() < SB_SIZE {
        return Ok(None);
    }
    Ok(Superblock::from_bytes(&res.buf))
}

/// Mount: the six-step algorithm of `spec.md` §4.3, verbatim:
/// 1. read N/E/W (and S if present) mirrors; validate magic/endian
///    tag/CRC32 (done by [`read_mirror`]).
/// 2. among valid copies, choose the one with the highest
///    `copy_generation`; any mismatch among the valid copies sets
///    `DEGRADED` on the winner.
/// 3. self-heal: rewrite weaker or missing mirrors from the winner.
/// 4. verify geometry invariants; reject with `GEOMETRY` on violation.
/// 5. if `wormhole_mount` is requested without HW `STRICT_FLUSH` →
///    reject with `HW_IO`.
pub fn mount(
    hal: &HalHandle,
    device: &MemoryDevice,
    sb_size_sectors: u64,
    wormhole_mount: bool,
    stats: &EngineStats,
) -> Result<Superblock, HnError> {
    let mut survivors: Vec<(Mirror, Superblock)> = Vec::new();
    for &m in &MIRROR_ORDER {
        let lba = mirror_lba(m, sb_size_sectors);
        if let Some(sb) = read_mirror(hal, device, lba, sb_size_sectors)? {
            survivors.push((m, sb));
        }
    }
    if survivors.is_empty() {
        return Err(FatalError::Uninitialized.into());
    }

    let winner_generation = survivors
        .iter()
        .map(|(_, sb)| sb.copy_generation)
        .max()
        .expect("non-empty survivors");
    let agreeing: Vec<&(Mirror, Superblock)> = survivors
        .iter()
        .filter(|(_, sb)| sb.copy_generation == winner_generation)
        .collect();

    let mut winner = agreeing[0].1.clone();
    if agreeing.len() < survivors.len() {
        winner.state_flags = winner.state_flags | StateFlags::DEGRADED;
    }

    for &m in &MIRROR_ORDER {
        let lba = mirror_lba(m, sb_size_sectors);
        let needs_rewrite = match survivors.iter().find(|(mm, _)| *mm == m) {
            None => true,
            Some((_, sb)) => sb.copy_generation != winner_generation,
        };
        if needs_rewrite {
            write_mirror(hal, device, lba, &winner)?;
            stats.record_heal();
        }
    }

    if !winner.regions.is_valid(winner.total_capacity_sectors) {
        return Err(ValidationError::Geometry.into());
    }

    if wormhole_mount && !hal.caps().supports_strict_flush() {
        return Err(TransientError::HwIo.into());
    }

    Ok(winner)
}

fn write_mirror(
    hal: &HalHandle,
    device: &MemoryDevice,
    lba: u64,
    sb: &Superblock,
) -> Result<(), HnError> {
    let bytes = sb.to_bytes();
    let sectors = (bytes.len() as u64).div_ceil(u64::from(device.sector_size));
    sync_io::sync_write_then_flush(hal, device, lba, bytes, sectors as u32)
        .map_err(HnError::from)
}

/// Unmount sequence (`spec.md` §2.3): flush, bump `copy_generation`, then
/// rewrite N, E, W, S in order, flushing between each so a crash mid-way
/// leaves at least N (and any already-rewritten mirrors) consistent and
/// a later mount's quorum vote still picks correctly.
pub fn unmount(
    hal: &HalHandle,
    device: &MemoryDevice,
    sb_size_sectors: u64,
    sb: &mut Superblock,
) -> Result<(), HnError> {
    sb.copy_generation += 1;
    for &m in &MIRROR_ORDER {
        if m == Mirror::South && !sb.state_flags.contains(crate::types::StateFlags::SOUTH_SB_PRESENT) {
            continue;
        }
        let lba = mirror_lba(m, sb_size_sectors);
        write_mirror(hal, device, lba, sb)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CompatFlags, FormatProfile, MountIntentFlags, RegionLayout, StateFlags, SB_ENDIAN_TAG,
        SB_MAGIC,
    };
    use hn4_hal::caps::{DeviceType, HalCaps, HwCapFlags};

    fn test_hal() -> HalHandle {
        HalHandle::init(HalCaps {
            device_type: DeviceType::Ssd,
            sector_size: 512,
            capacity_sectors: 1 << 16,
            flags: HwCapFlags::STRICT_FLUSH,
            zone_size_blocks: 0,
            zone_count: 0,
        })
    }

    fn sb_size_sectors() -> u64 {
        (SB_SIZE as u64).div_ceil(512)
    }

    fn sample_sb(generation: u64) -> Superblock {
        Superblock {
            magic: SB_MAGIC,
            endian_tag: SB_ENDIAN_TAG,
            version: (1, 0, 0),
            profile: FormatProfile::Generic,
            block_size: 4096,
            sector_size: 512,
            volume_uuid: 42,
            volume_label: [0u8; 32],
            total_capacity_sectors: 1 << 16,
            generation_ts_ns: 0,
            last_mount_time_ns: 0,
            copy_generation: generation,
            compat_flags: CompatFlags::empty(),
            state_flags: StateFlags::VALID | StateFlags::CLEAN,
            device_type: DeviceType::Ssd,
            hw_caps_snapshot: 0,
            mount_intent_flags: MountIntentFlags::empty(),
            regions: RegionLayout {
                epoch_start: 1,
                cortex_start: 10,
                bitmap_start: 100,
                qmask_start: 110,
                flux_start: 120,
                horizon_start: 900,
                chronicle_start: 950,
            },
            journal_head_lba: 950,
            epoch_ring_index: 0,
        }
    }

    #[test]
    fn mount_requires_at_least_one_mirror() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 1 << 16);
        let stats = EngineStats::new();
        let err = mount(&hal, &device, sb_size_sectors(), false, &stats).unwrap_err();
        assert!(matches!(
            err,
            HnError::Fatal(FatalError::Uninitialized)
        ));
    }

    #[test]
    fn mount_heals_a_stale_mirror() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 1 << 16);
        let stats = EngineStats::new();

        let winner = sample_sb(5);
        let stale = sample_sb(1);
        write_mirror(&hal, &device, mirror_lba(Mirror::North, sb_size_sectors()), &winner).unwrap();
        write_mirror(&hal, &device, mirror_lba(Mirror::East, sb_size_sectors()), &winner).unwrap();
        write_mirror(&hal, &device, mirror_lba(Mirror::West, sb_size_sectors()), &winner).unwrap();
        write_mirror(&hal, &device, mirror_lba(Mirror::South, sb_size_sectors()), &stale).unwrap();

        let mounted = mount(&hal, &device, sb_size_sectors(), false, &stats).unwrap();
        assert_eq!(mounted.copy_generation, 5);
        assert!(mounted.state_flags.contains(StateFlags::DEGRADED));
        assert_eq!(stats.snapshot().heals, 1);

        let healed = read_mirror(&hal, &device, mirror_lba(Mirror::South, sb_size_sectors()), sb_size_sectors())
            .unwrap()
            .unwrap();
        assert_eq!(healed.copy_generation, 5);
    }

    #[test]
    fn mount_rejects_wormhole_request_without_strict_flush() {
        let hal = HalHandle::init(HalCaps {
            device_type: DeviceType::Ssd,
            sector_size: 512,
            capacity_sectors: 1 << 16,
            flags: HwCapFlags::empty(),
            zone_size_blocks: 0,
            zone_count: 0,
        });
        let device = MemoryDevice::new(512, 1 << 16);
        let stats = EngineStats::new();
        write_mirror(&hal, &device, mirror_lba(Mirror::North, sb_size_sectors()), &sample_sb(0)).unwrap();

        let err = mount(&hal, &device, sb_size_sectors(), true, &stats).unwrap_err();
        assert!(matches!(
            err,
            HnError::Transient(TransientError::HwIo)
        ));
    }

    #[test]
    fn unmount_bumps_generation_and_rewrites_all_mirrors() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 1 << 16);
        let mut sb = sample_sb(0);
        sb.state_flags = sb.state_flags | StateFlags::SOUTH_SB_PRESENT;
        unmount(&hal, &device, sb_size_sectors(), &mut sb).unwrap();
        assert_eq!(sb.copy_generation, 1);
        let north = read_mirror(&hal, &device, mirror_lba(Mirror::North, sb_size_sectors()), sb_size_sectors())
            .unwrap()
            .unwrap();
        assert_eq!(north.copy_generation, 1);
    }
}
