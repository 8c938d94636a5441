//! HN4 on-disk layout: superblock quorum, chronicle, ballistic
//! allocator, Helix parity, and the [`Volume`] facade that ties them
//! together into one mountable engine instance.

pub mod allocator;
pub mod bitmap;
pub mod chronicle;
pub mod crc;
pub mod diag;
pub mod error;
pub mod format;
pub mod gf256;
pub mod helix;
pub mod profile;
pub mod superblock;
pub mod tunables;
pub mod types;
pub mod uuid;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use hn4_hal::device::MemoryDevice;
use hn4_hal::HalHandle;

use allocator::Allocator;
use bitmap::{ArmoredBitmap, QualityMask};
use chronicle::Chronicle;
use diag::EngineStats;
use error::{FatalError, HnError, Info, ValidationError};
use format::FormatParams;
use tunables::Tunables;
use types::{
    Anchor, DataClass, Permissions, Superblock, ANCHOR_SIZE, ROOT_SEED_ID, SB_SIZE,
};

pub use format::format as format_volume;

/// A reference-counted borrow on one anchor. Dropping the last `AnchorRef`
/// for the volume lets [`Volume::remove_device`] proceed; holding one open
/// blocks it (`spec.md` §9's ownership note, via the teacher's arena
/// generation-counter pattern).
pub struct AnchorRef {
    pub seed_id: u128,
    _pin: Arc<()>,
}

#[derive(Debug)]
struct MountedState {
    sb: Superblock,
    bitmap: ArmoredBitmap,
    qmask: QualityMask,
    chronicle: Chronicle,
    anchors: HashMap<u128, Anchor>,
    read_only: bool,
}

/// The mountable HN4 engine instance: exclusively owns the in-memory
/// mirrors of the superblock, bitmap, quality mask and cortex (anchor
/// table), and drives the allocator and chronicle against one backing
/// device (`spec.md` §3's ownership model).
#[derive(Debug)]
pub struct Volume {
    hal: HalHandle,
    device: Arc<MemoryDevice>,
    state: RwLock<MountedState>,
    allocator: Allocator,
    stats: EngineStats,
    tunables: Tunables,
    global_pin: Arc<()>,
}

impl Volume {
    /// Run genesis on a raw device and leave it ready for [`Self::mount`].
    /// Does not itself construct a live `Volume` — the spec's property
    /// "Format followed by Mount returns OK" models these as two calls.
    pub fn format(
        hal: &HalHandle,
        device: &MemoryDevice,
        params: FormatParams,
        stats: &EngineStats,
    ) -> Result<Superblock, HnError> {
        format::format(hal, device, params, stats)
    }

    /// Mount a previously formatted device: quorum-vote the superblock
    /// mirrors, reconstruct the in-memory bitmap/quality-mask mirrors
    /// from their on-disk regions, and recover the chronicle.
    /// `wormhole_mount` requests the no-journal-barrier mount mode; it is
    /// rejected with `HW_IO` unless the HAL honors `STRICT_FLUSH`.
    pub fn mount(hal: HalHandle, device: Arc<MemoryDevice>, wormhole_mount: bool) -> Result<Self, HnError> {
        let stats = EngineStats::new();
        let sb_size_sectors = (SB_SIZE as u64).div_ceil(u64::from(hal.caps().sector_size));
        let sb = superblock::mount(&hal, &device, sb_size_sectors, wormhole_mount, &stats)?;
        // No caller-facing "mount read-only" request exists yet; a fresh
        // mount is always writable.
        let read_only = false;

        let total_blocks =
            (sb.total_capacity_sectors * u64::from(sb.sector_size)) / u64::from(sb.block_size);

        let bitmap_bytes = (sb.regions.qmask_start - sb.regions.bitmap_start)
            * u64::from(sb.sector_size);
        let bitmap_buf = read_region(&hal, &device, sb.regions.bitmap_start, bitmap_bytes)?;
        let bitmap = ArmoredBitmap::from_bytes(&bitmap_buf, total_blocks);

        let qmask_bytes =
            (sb.regions.flux_start - sb.regions.qmask_start) * u64::from(sb.sector_size);
        let qmask_buf = read_region(&hal, &device, sb.regions.qmask_start, qmask_bytes)?;
        let qmask = QualityMask::from_bytes(qmask_buf);

        let chronicle_len = sb.total_capacity_sectors - sb.regions.chronicle_start;
        let mut chronicle = Chronicle::new(sb.regions.chronicle_start, chronicle_len, sb.sector_size);
        chronicle.set_read_only(read_only);
        chronicle.recover(&hal, &device)?;

        let root_anchor = read_root_anchor(&hal, &device, sb.regions.cortex_start, sb.sector_size)?;
        let mut anchors = HashMap::new();
        anchors.insert(ROOT_SEED_ID, root_anchor);

        let allocator = Allocator::new(
            sb.regions.flux_start,
            sb.regions.horizon_start - sb.regions.flux_start,
            sb.regions.horizon_start,
            sb.regions.chronicle_start - sb.regions.horizon_start,
            sb.profile,
            sb.device_type,
        );

        Ok(Self {
            hal,
            device,
            state: RwLock::new(MountedState {
                sb,
                bitmap,
                qmask,
                chronicle,
                anchors,
                read_only,
            }),
            allocator,
            stats,
            tunables: Tunables::from_env(),
            global_pin: Arc::new(()),
        })
    }

    /// Unmount: bump `copy_generation` and rewrite all mirrors.
    pub fn unmount(&self) -> Result<(), HnError> {
        let mut state = self.state.write();
        if state.read_only {
            return Err(ValidationError::AccessDenied.into());
        }
        let sb_size_sectors = (SB_SIZE as u64).div_ceil(u64::from(state.sb.sector_size));
        superblock::unmount(&self.hal, &self.device, sb_size_sectors, &mut state.sb)
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.state.read().read_only
    }

    #[must_use]
    pub fn stats(&self) -> diag::StatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn superblock(&self) -> Superblock {
        self.state.read().sb.clone()
    }

    /// Borrow the root anchor.
    pub fn open_root(&self) -> AnchorRef {
        AnchorRef {
            seed_id: ROOT_SEED_ID,
            _pin: Arc::clone(&self.global_pin),
        }
    }

    /// Create a new anchor: places its `(gravity_center, velocity)` via
    /// the ballistic allocator and inserts it into the in-memory cortex.
    /// The caller is responsible for persisting the cortex region on the
    /// next flush/unmount; this mirrors the way anchors in the original
    /// engine are mutated in memory and only rewritten in bulk.
    pub fn create_anchor(
        &self,
        permissions: Permissions,
        fractal_scale: u16,
        contiguous: bool,
    ) -> Result<AnchorRef, HnError> {
        let mut state = self.state.write();
        if state.read_only {
            return Err(ValidationError::AccessDenied.into());
        }
        let (gravity_center, velocity) =
            self.allocator
                .alloc_genesis(&self.hal, &state.bitmap, &self.tunables, contiguous)?;

        let now_ns = hn4_hal::clock::monotonic_ns();
        let seed_id = uuid::generate_uuid_v7(now_ns / 1_000_000, self.hal.prng());
        let anchor = Anchor {
            seed_id,
            public_id: uuid::generate_uuid_v7(now_ns / 1_000_000, self.hal.prng()),
            gravity_center,
            mass: 0,
            orbit_vector: velocity,
            data_class: DataClass::VALID,
            permissions,
            write_gen: 0,
            create_clock_sec: (now_ns / 1_000_000_000) as u32,
            mod_clock_ns: now_ns,
            fractal_scale,
            inline_buffer: [0u8; 28],
        };
        state.anchors.insert(seed_id, anchor);
        Ok(AnchorRef {
            seed_id,
            _pin: Arc::clone(&self.global_pin),
        })
    }

    /// Open an existing anchor by its seed id, pinning it against
    /// concurrent device-pool teardown.
    pub fn open_anchor(&self, seed_id: u128) -> Result<AnchorRef, HnError> {
        let state = self.state.read();
        if !state.anchors.contains_key(&seed_id) {
            return Err(ValidationError::NotFound.into());
        }
        Ok(AnchorRef {
            seed_id,
            _pin: Arc::clone(&self.global_pin),
        })
    }

    #[must_use]
    pub fn anchor_snapshot(&self, anchor: &AnchorRef) -> Option<Anchor> {
        self.state.read().anchors.get(&anchor.seed_id).copied()
    }

    /// Allocate the next physical block for `anchor` at logical index
    /// `logical_n`, advancing its `mass`/`write_gen`/`mod_clock` on
    /// success.
    pub fn alloc_block(
        &self,
        anchor: &AnchorRef,
        logical_n: u64,
    ) -> Result<(u64, u32, Info), HnError> {
        let mut state = self.state.write();
        if state.read_only {
            return Err(ValidationError::AccessDenied.into());
        }
        let a = *state
            .anchors
            .get(&anchor.seed_id)
            .ok_or(ValidationError::NotFound)?;
        if a.data_class.contains(DataClass::TOMBSTONE) {
            return Err(ValidationError::Tombstone.into());
        }
        let block_size = state.sb.block_size;
        let MountedState { bitmap, qmask, .. } = &mut *state;
        let (lba, k, info) = self.allocator.alloc_block(
            &self.hal,
            bitmap,
            &*qmask,
            a.gravity_center,
            a.velocity(),
            a.fractal_scale,
            logical_n,
            &self.tunables,
            &self.stats,
        )?;
        if info == Info::HorizonFallback {
            state.sb.state_flags = state.sb.state_flags | types::StateFlags::RUNTIME_SATURATED;
        }
        if let Some(entry) = state.anchors.get_mut(&anchor.seed_id) {
            entry.mass += u64::from(block_size);
            entry.write_gen += 1;
            entry.mod_clock_ns = hn4_hal::clock::monotonic_ns();
        }
        Ok((lba, k, info))
    }

    /// Tombstone an anchor. The physical cortex/flux slots are reclaimed
    /// only once the tombstone's generation outlives all snapshots
    /// (`spec.md` §3); this call only flips the in-memory bit.
    pub fn delete_anchor(&self, anchor: &AnchorRef) -> Result<(), HnError> {
        let mut state = self.state.write();
        if state.read_only {
            return Err(ValidationError::AccessDenied.into());
        }
        if anchor.seed_id == ROOT_SEED_ID {
            return Err(ValidationError::AccessDenied.into());
        }
        let a = state
            .anchors
            .get_mut(&anchor.seed_id)
            .ok_or(ValidationError::NotFound)?;
        a.data_class = a.data_class.set(DataClass::TOMBSTONE);
        Ok(())
    }

    /// Append one chronicle entry outside of a parity RMW (e.g. a
    /// standalone snapshot/fork marker).
    pub fn chronicle_append(&self, entry: types::ChronicleEntry) -> Result<(), HnError> {
        let mut state = self.state.write();
        if state.read_only {
            return Err(ValidationError::AccessDenied.into());
        }
        state
            .chronicle
            .append(&self.hal, &self.device, entry, &self.stats)
    }

    /// Remove the backing device from the pool. Refuses while any
    /// `AnchorRef` is outstanding beyond the volume's own bookkeeping
    /// handle (`spec.md` §9).
    pub fn remove_device(&self) -> Result<(), HnError> {
        if Arc::strong_count(&self.global_pin) > 1 {
            return Err(ValidationError::AccessDenied.into());
        }
        Ok(())
    }
}

fn read_region(
    hal: &HalHandle,
    device: &MemoryDevice,
    start_lba: u64,
    total_bytes: u64,
) -> Result<Vec<u8>, HnError> {
    let sector_size = u64::from(device.sector_size);
    let length_sectors = total_bytes.div_ceil(sector_size);
    let req = hn4_hal::device::IoRequest::new(
        hn4_hal::device::IoOp::Read,
        start_lba,
        Vec::new(),
        length_sectors as u32,
    );
    let res = hn4_hal::sync_io::sync_submit(hal, device, req, hn4_hal::sync_io::DEFAULT_TIMEOUT)
        .map_err(HnError::from)?;
    if !res.ok {
        return Err(FatalError::InternalFault.into());
    }
    Ok(res.buf)
}

fn read_root_anchor(
    hal: &HalHandle,
    device: &MemoryDevice,
    cortex_start: u64,
    sector_size: u32,
) -> Result<Anchor, HnError> {
    let buf = read_region(hal, device, cortex_start, u64::from(sector_size).max(ANCHOR_SIZE as u64))?;
    let mut fixed = [0u8; ANCHOR_SIZE];
    fixed.copy_from_slice(&buf[..ANCHOR_SIZE]);
    Anchor::from_bytes(&fixed).ok_or_else(|| FatalError::Uninitialized.into())
}
