//! Genesis: the format sequence that lays a fresh HN4 volume onto a raw
//! device (`spec.md` §4.4). Runs once; every step either fully commits
//! or the volume is left unmounted and safe to re-format.

use hn4_hal::device::MemoryDevice;
use hn4_hal::sync_io;
use hn4_hal::HalHandle;

use crate::diag::EngineStats;
use crate::error::{HnError, ValidationError};
use crate::profile;
use crate::superblock::{self, Mirror, MIRROR_ORDER};
use crate::tunables::CHRONICLE_RESERVE_BYTES;
use crate::types::{
    Anchor, CompatFlags, DataClass, FormatProfile, MountIntentFlags, Permissions, RegionLayout,
    StateFlags, Superblock, ANCHOR_SIZE, ROOT_SEED_ID, SB_ENDIAN_TAG, SB_MAGIC, SB_SIZE,
};
use crate::uuid::generate_uuid_v7;

/// A virtual-overlay capacity must still clear this floor even though it
/// exceeds the backing HAL's physical capacity (`spec.md` §4.4 step 2).
const MIN_VIRTUAL_OVERLAY_BYTES: u64 = 100 * 1024 * 1024;

/// Caller-supplied format request.
#[derive(Debug, Clone)]
pub struct FormatParams {
    pub profile: FormatProfile,
    pub volume_label: [u8; 32],
    /// Extra permission bits ORed into the root anchor; must be a subset
    /// of [`crate::types::PERM_VALID_MASK`].
    pub root_perms_or: u32,
    pub wormhole: bool,
    /// Caller-requested capacity, in sectors. `None` uses the HAL's own
    /// capacity. A value above the HAL's physical capacity is a virtual
    /// overlay and must still represent at least 100 MiB.
    pub override_capacity_sectors: Option<u64>,
    /// Stamp an existing volume's id onto this one instead of minting a
    /// fresh UUIDv7 (cloning a volume's identity).
    pub clone_uuid: Option<u128>,
    /// Stamp a caller-chosen id verbatim, taking priority over `clone_uuid`.
    pub specific_uuid: Option<u128>,
}

fn effective_block_size(requested_profile_default: u32, sector_size: u32) -> u32 {
    // Block size must be a multiple of sector size; upscale if the
    // profile default would otherwise be smaller than one sector.
    requested_profile_default.max(sector_size)
}

/// Run the full format sequence and return the freshly written root
/// superblock (generation 0, not yet mounted).
pub fn format(
    hal: &HalHandle,
    device: &MemoryDevice,
    params: FormatParams,
    stats: &EngineStats,
) -> Result<Superblock, HnError> {
    // 1. validate params
    if params.root_perms_or & !crate::types::PERM_VALID_MASK != 0 {
        return Err(ValidationError::InvalidArgument.into());
    }

    // 2. query HAL caps / compute effective capacity: min(HAL, override),
    // except a virtual overlay (override > HAL physical capacity) is
    // allowed provided the overlay is at least 100 MiB.
    let caps = hal.caps();
    let physical_capacity_sectors = caps.capacity_sectors;
    let (reported_capacity_sectors, virtual_overlay) = match params.override_capacity_sectors {
        None => (physical_capacity_sectors, false),
        Some(v) if v <= physical_capacity_sectors => (v, false),
        Some(v) => {
            let overlay_bytes = v * u64::from(caps.sector_size);
            if overlay_bytes < MIN_VIRTUAL_OVERLAY_BYTES {
                return Err(ValidationError::Geometry.into());
            }
            (v, true)
        }
    };
    let capacity_bytes = reported_capacity_sectors * u64::from(caps.sector_size);

    // 3. profile rejections
    profile::validate_profile_geometry(
        params.profile,
        caps.device_type,
        caps.sector_size,
        capacity_bytes,
    )?;

    // 4. block-size selection, upscaled to at least one sector
    let block_size = effective_block_size(params.profile.default_block_size(), caps.sector_size);

    // 5. ZNS zone alignment: block size must divide the zone size evenly
    if caps.device_type == hn4_hal::DeviceType::Zns {
        let zone_bytes = caps.zone_size_blocks * u64::from(caps.sector_size);
        if zone_bytes == 0 || zone_bytes % u64::from(block_size) != 0 {
            return Err(ValidationError::AlignmentFail.into());
        }
    }

    // 6. WORMHOLE/STRICT_FLUSH gating: WORMHOLE (no-journal-barrier mode)
    // requires the device to honor STRICT_FLUSH, else a crash mid-write
    // cannot be distinguished from a torn write.
    if params.wormhole && !caps.supports_strict_flush() {
        return Err(ValidationError::InvalidArgument.into());
    }

    // 7. region LBA computation, sector-addressed, with a fixed chronicle
    // reservation carved from the tail of the device. Regions are laid
    // out against the HAL's physical capacity regardless of any virtual
    // overlay above it; only the reported `total_capacity_sectors` in the
    // superblock reflects the overlay.
    let sb_size_sectors = (SB_SIZE as u64).div_ceil(u64::from(caps.sector_size));
    let total_sectors = physical_capacity_sectors;
    let chronicle_sectors = CHRONICLE_RESERVE_BYTES.div_ceil(u64::from(caps.sector_size));
    if chronicle_sectors * 2 >= total_sectors {
        return Err(ValidationError::ProfileMismatch.into());
    }
    let epoch_start = sb_size_sectors * 4; // past the four superblock mirrors
    let cortex_start = epoch_start + 8;
    let bitmap_start = cortex_start + 8;
    let total_blocks = (total_sectors * u64::from(caps.sector_size)) / u64::from(block_size);
    let bitmap_bytes = total_blocks.div_ceil(64) * crate::bitmap::ARMORED_WORD_SIZE as u64;
    let bitmap_sectors = bitmap_bytes.div_ceil(u64::from(caps.sector_size));
    let qmask_start = bitmap_start + bitmap_sectors.max(1);
    let qmask_sectors = total_blocks.div_ceil(4).div_ceil(u64::from(caps.sector_size));
    let flux_start = qmask_start + qmask_sectors.max(1);
    let chronicle_start = total_sectors - chronicle_sectors;
    let horizon_start = flux_start + (chronicle_start - flux_start) * 9 / 10;

    let regions = RegionLayout {
        epoch_start,
        cortex_start,
        bitmap_start,
        qmask_start,
        flux_start,
        horizon_start,
        chronicle_start,
    };
    if !regions.is_valid(total_sectors) {
        return Err(ValidationError::Geometry.into());
    }

    // 8. metadata zeroing: everything before flux_start, chunked at
    // sector (not block) granularity since region boundaries are
    // sector-addressed and need not be block-size multiples.
    let metadata_bytes = flux_start * u64::from(caps.sector_size);
    sync_io::sync_io_large_zero(
        hal,
        device,
        0,
        metadata_bytes,
        caps.sector_size,
        caps.sector_size,
    )
    .map_err(HnError::from)?;

    // 9. Q-mask pattern fill (0xAA bytes = all-silver) across the qmask
    // region, overwriting the zero-fill from step 8. The bitmap region
    // stays all-zero: no blocks allocated yet.
    let qmask_byte_count = (qmask_sectors * u64::from(caps.sector_size)) as usize;
    let qmask_buf = vec![crate::bitmap::QMASK_FILL_BYTE; qmask_byte_count];
    sync_io::sync_write_then_flush(hal, device, qmask_start, qmask_buf, qmask_sectors as u32)
        .map_err(HnError::from)?;

    // 10. root anchor write, with its full contract checks.
    let now_ns = hn4_hal::clock::monotonic_ns();
    let volume_uuid = params
        .specific_uuid
        .or(params.clone_uuid)
        .unwrap_or_else(|| generate_uuid_v7(now_ns / 1_000_000, hal.prng()));
    let root_perms =
        Permissions(Permissions::READ.0 | Permissions::WRITE.0 | Permissions::SOVEREIGN.0 | params.root_perms_or);
    let root_anchor = Anchor {
        seed_id: ROOT_SEED_ID,
        public_id: volume_uuid,
        gravity_center: 0,
        mass: 0,
        orbit_vector: 1,
        data_class: DataClass::VALID | DataClass::STATIC,
        permissions: root_perms,
        write_gen: 0,
        create_clock_sec: (now_ns / 1_000_000_000) as u32,
        mod_clock_ns: now_ns,
        fractal_scale: 0,
        inline_buffer: [0u8; 28],
    };
    let anchor_bytes = root_anchor.to_bytes();
    let mut cortex_buf = anchor_bytes.to_vec();
    cortex_buf.resize((caps.sector_size as usize).max(ANCHOR_SIZE), 0);
    sync_io::sync_write_then_flush(hal, device, cortex_start, cortex_buf, 1)
        .map_err(HnError::from)?;

    // 11. four-mirror superblock write sequence.
    let mut sb = Superblock {
        magic: SB_MAGIC,
        endian_tag: SB_ENDIAN_TAG,
        version: (1, 0, 0),
        profile: params.profile,
        block_size,
        sector_size: caps.sector_size,
        volume_uuid,
        volume_label: params.volume_label,
        total_capacity_sectors: reported_capacity_sectors,
        generation_ts_ns: now_ns,
        last_mount_time_ns: 0,
        copy_generation: 0,
        compat_flags: CompatFlags::empty(),
        state_flags: if virtual_overlay {
            StateFlags::VALID | StateFlags::CLEAN | StateFlags::METADATA_ZEROED | StateFlags::VIRTUAL_OVERLAY
        } else {
            StateFlags::VALID | StateFlags::CLEAN | StateFlags::METADATA_ZEROED
        },
        device_type: caps.device_type,
        hw_caps_snapshot: caps.flags.0,
        mount_intent_flags: if params.wormhole {
            MountIntentFlags::WORMHOLE
        } else {
            MountIntentFlags::empty()
        },
        regions,
        journal_head_lba: chronicle_start,
        epoch_ring_index: 0,
    };
    if virtual_overlay {
        sb.mount_intent_flags = sb.mount_intent_flags | MountIntentFlags::VIRTUAL;
    }

    for &m in &MIRROR_ORDER {
        if m == Mirror::South {
            continue; // South mirror is optional; genesis writes only N/E/W.
        }
        let lba = superblock::mirror_lba(m, sb_size_sectors);
        let bytes = sb.to_bytes();
        sync_io::sync_write_then_flush(hal, device, lba, bytes, sb_size_sectors as u32)
            .map_err(HnError::from)?;
    }
    stats.record_chronicle_append();

    Ok(sb)
}
