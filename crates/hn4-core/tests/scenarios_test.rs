//! End-to-end scenarios spanning format, mount, the allocator, and the
//! parity engine together, as opposed to the inline `#[cfg(test)]`
//! modules that each exercise one module in isolation.

use std::sync::Arc;

use hn4_core::allocator::Allocator;
use hn4_core::chronicle::Chronicle;
use hn4_core::diag::EngineStats;
use hn4_core::error::{HnError, TransientError};
use hn4_core::format::FormatParams;
use hn4_core::helix::{parity_columns, ArrayMode, DeviceArray};
use hn4_core::tunables::Tunables;
use hn4_core::types::{ChronicleOp, FormatProfile, Permissions, SB_MAGIC};
use hn4_core::Volume;
use hn4_hal::accel::{self, AcceleratorId};
use hn4_hal::caps::{DeviceType, HalCaps, HwCapFlags};
use hn4_hal::device::{IoOp, IoRequest, MemoryDevice};
use hn4_hal::sync_io::{self, DEFAULT_TIMEOUT};
use hn4_hal::HalHandle;

fn test_hal(device_type: DeviceType, sector_size: u32, capacity_sectors: u64) -> HalHandle {
    HalHandle::init(HalCaps {
        device_type,
        sector_size,
        capacity_sectors,
        flags: HwCapFlags::STRICT_FLUSH,
        zone_size_blocks: 0,
        zone_count: 0,
    })
}

/// Scenario 1: Format Generic 128MiB/4KiB sector+block. SB North magic is
/// `HYDRA_N4` little-endian at offset 0; the Q-mask region starts all
/// `0xAA`; the byte right at the flux region boundary is still zero
/// (untouched by the Q-mask fill); the root anchor round-trips with
/// `SOVEREIGN` set and an `inline_buffer` that starts unset (genesis
/// writes no inline payload, only the bit layout spec.md calls out).
#[test]
fn format_generic_128mib_4kib_matches_on_disk_layout() {
    let capacity_sectors = (128 * 1024 * 1024) / 4096;
    let hal = test_hal(DeviceType::Ssd, 4096, capacity_sectors);
    let device = Arc::new(MemoryDevice::new(4096, capacity_sectors));
    let stats = EngineStats::new();
    let params = FormatParams {
        profile: FormatProfile::Generic,
        volume_label: [0u8; 32],
        root_perms_or: 0,
        wormhole: false,
        override_capacity_sectors: None,
        clone_uuid: None,
        specific_uuid: None,
    };
    let sb = Volume::format(&hal, &device, params, &stats).unwrap();

    let raw = device.sectors.lock();
    assert_eq!(&raw[0..8], &SB_MAGIC.to_le_bytes());

    let qmask_offset = sb.regions.qmask_start as usize * 4096;
    assert_eq!(raw[qmask_offset], 0xAA);

    let flux_byte_offset = sb.regions.flux_start as usize * 4096;
    assert_eq!(raw[flux_byte_offset], 0);
    drop(raw);

    let hal2 = test_hal(DeviceType::Ssd, 4096, capacity_sectors);
    let volume = Volume::mount(hal2, Arc::clone(&device), false).unwrap();
    let root = volume.open_root();
    let snap = volume.anchor_snapshot(&root).unwrap();
    assert!(snap.permissions.contains(Permissions::SOVEREIGN));
    assert_eq!(snap.seed_id, u128::MAX);
}

/// Scenario 2 and 5 (combined): a fresh 4-drive parity array seeded via
/// the write-intent path, then D0 and P both fail. A read of D0's
/// logical column must still recover the original byte through Case B
/// (Q-based single-drive reconstruction), and the write-intent entry
/// left behind in the chronicle records the row as a `WORMHOLE` op
/// against the written LBA.
#[test]
fn parity_write_hole_journal_then_two_drive_degraded_read_recovers() {
    let hal = test_hal(DeviceType::Ssd, 512, 1 << 18);
    let mut array = DeviceArray::new(ArrayMode::Parity);
    for _ in 0..4 {
        array
            .add_device(Arc::new(MemoryDevice::new(512, 1 << 18)))
            .unwrap();
    }
    let stats = EngineStats::new();
    let chronicle_device = Arc::new(MemoryDevice::new(512, 64));
    let mut chronicle = Chronicle::new(0, 32, 512);

    let (p_col, _q_col) = parity_columns(0, 4);
    array
        .write_parity_column(&hal, &mut chronicle, &chronicle_device, 0, 0, vec![0xCC; 512], &stats)
        .unwrap();

    let head_minus_one_req = IoRequest::new(IoOp::Read, 0, Vec::new(), 1);
    let res = sync_io::sync_submit(&hal, &chronicle_device, head_minus_one_req, DEFAULT_TIMEOUT).unwrap();
    let entry = hn4_core::types::ChronicleEntry::from_bytes(&res.buf).unwrap();
    assert_eq!(entry.op_code, ChronicleOp::Wormhole);
    assert_eq!(entry.new_lba, 0);

    let data_cols = hn4_core::helix::data_columns(0, 4);
    let dead_data = data_cols[0];
    array.mark_offline(dead_data);
    array.mark_offline(p_col);

    let recovered = array.read_parity_column(&hal, 0, 0, &stats).unwrap();
    assert_eq!(recovered, vec![0xCC; 512]);
}

/// Scenario 4: AI-profile strict locality confines genesis placement to
/// the accelerator's topology window, and the window exhausting itself
/// surfaces `EVENT_HORIZON` rather than silently spilling into the
/// global flux pool.
#[test]
fn ai_strict_locality_confines_genesis_to_topology_window() {
    let hal = test_hal(DeviceType::Ssd, 512, 1 << 20);
    hal.set_topology_window(AcceleratorId(0x10DE), 2000, 64);
    accel::set_context(AcceleratorId(0x10DE));

    let alloc = Allocator::new(0, 1 << 16, 1 << 16, 16, FormatProfile::Ai, DeviceType::Ssd);
    let bitmap = hn4_core::bitmap::ArmoredBitmap::new(1 << 16);
    let tunables = Tunables::default();

    for _ in 0..20 {
        let (g, _v) = alloc
            .alloc_genesis(&hal, &bitmap, &tunables, false)
            .unwrap();
        assert!((2000..2064).contains(&g));
    }

    accel::set_context(AcceleratorId::NONE);
}

/// A window just wide enough for one strict-locality-valid position
/// (`len == AI_STRICT_LOCALITY_HOPS`) surfaces `EVENT_HORIZON` once that
/// one position is occupied, instead of spilling outside the window.
#[test]
fn ai_strict_locality_exhausted_window_returns_event_horizon() {
    let hal = test_hal(DeviceType::Ssd, 512, 1 << 20);
    hal.set_topology_window(AcceleratorId(0x10DE), 2000, 8);
    accel::set_context(AcceleratorId(0x10DE));

    let alloc = Allocator::new(0, 1 << 16, 1 << 16, 16, FormatProfile::Ai, DeviceType::Ssd);
    let mut bitmap = hn4_core::bitmap::ArmoredBitmap::new(1 << 16);
    bitmap.set(2000).unwrap();
    let tunables = Tunables {
        probe_budget: 32,
        ..Tunables::default()
    };

    let err = alloc.alloc_genesis(&hal, &bitmap, &tunables, false).unwrap_err();
    assert!(matches!(
        err,
        HnError::Transient(TransientError::EventHorizon)
    ));

    accel::set_context(AcceleratorId::NONE);
}
