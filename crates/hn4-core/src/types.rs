//! The HN4 on-disk data model: superblock, anchor, armored bitmap word,
//! epoch header, chronicle entry, and the data-block header. All layouts
//! here are little-endian on media; in-memory fields are host-endian,
//! and [`crate::wire`] is the only place the conversion happens.

use crate::crc::crc32;

pub const SB_MAGIC: u64 = 0x4859_4452_415F_4E34; // "HYDRA_N4"
pub const SB_ENDIAN_TAG: u32 = 0x1122_3344;
pub const SB_SIZE: usize = 8192;
pub const CHRONICLE_MAGIC: u64 = 0x4E4F_5243_4849_4C43; // "NORCHILC"
pub const HAL_ALLOC_MAGIC: u32 = 0x484E_3421;
pub const BLOCK_HEADER_MAGIC: u32 = 0x484E_3442; // "HN4B"
pub const ROOT_SEED_ID: u128 = u128::MAX;

/// On-disk format profile, each with distinct default block sizes and
/// hardware constraints (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatProfile {
    Pico,
    Generic,
    Usb,
    Gaming,
    Ai,
    Archive,
    System,
    HyperCloud,
}

impl FormatProfile {
    #[must_use]
    pub fn default_block_size(self) -> u32 {
        match self {
            FormatProfile::Pico => 512,
            FormatProfile::Generic | FormatProfile::Usb => 4096,
            FormatProfile::Gaming | FormatProfile::HyperCloud => 16384,
            FormatProfile::Ai => 65536,
            FormatProfile::Archive => 1_048_576,
            FormatProfile::System => 4096,
        }
    }

    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            FormatProfile::Pico => 0,
            FormatProfile::Generic => 1,
            FormatProfile::Usb => 2,
            FormatProfile::Gaming => 3,
            FormatProfile::Ai => 4,
            FormatProfile::Archive => 5,
            FormatProfile::System => 6,
            FormatProfile::HyperCloud => 7,
        }
    }

    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => FormatProfile::Pico,
            1 => FormatProfile::Generic,
            2 => FormatProfile::Usb,
            3 => FormatProfile::Gaming,
            4 => FormatProfile::Ai,
            5 => FormatProfile::Archive,
            6 => FormatProfile::System,
            7 => FormatProfile::HyperCloud,
            _ => return None,
        })
    }
}

macro_rules! flagset {
    ($name:ident: $ty:ty { $($flag:ident = $bit:expr),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $flag: $name = $name(1 << $bit);)*

            #[must_use]
            pub const fn empty() -> Self { Self(0) }
            #[must_use]
            pub const fn contains(&self, o: Self) -> bool { (self.0 & o.0) == o.0 && o.0 != 0 }
            #[must_use]
            pub const fn set(self, o: Self) -> Self { Self(self.0 | o.0) }
            #[must_use]
            pub const fn clear(self, o: Self) -> Self { Self(self.0 & !o.0) }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self { self.set(rhs) }
        }
    };
}

flagset!(StateFlags: u32 {
    VALID = 0,
    CLEAN = 1,
    DEGRADED = 2,
    RUNTIME_SATURATED = 3,
    METADATA_ZEROED = 4,
    SOUTH_SB_PRESENT = 5,
    WORMHOLE = 6,
    VIRTUAL_OVERLAY = 7,
    DIRTY = 8,
});

flagset!(CompatFlags: u32 {
    HUGE_CAPACITY = 0,
});

flagset!(MountIntentFlags: u32 {
    WORMHOLE = 0,
    VIRTUAL = 1,
});

flagset!(DataClass: u64 {
    VALID = 0,
    TOMBSTONE = 1,
    STATIC = 2,
});

flagset!(Permissions: u32 {
    READ = 0,
    WRITE = 1,
    EXEC = 2,
    APPEND = 3,
    IMMUTABLE = 4,
    SOVEREIGN = 5,
    ENCRYPTED = 6,
});

/// Mask of permission bits a caller is allowed to OR into the root anchor
/// at format time (`spec.md` §4.4's `root_perms_or`).
pub const PERM_VALID_MASK: u32 = Permissions::READ.0
    | Permissions::WRITE.0
    | Permissions::EXEC.0
    | Permissions::APPEND.0
    | Permissions::ENCRYPTED.0;

/// Region start LBAs, in the strict order `spec.md` §3 requires.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionLayout {
    pub epoch_start: u64,
    pub cortex_start: u64,
    pub bitmap_start: u64,
    pub qmask_start: u64,
    pub flux_start: u64,
    pub horizon_start: u64,
    pub chronicle_start: u64,
}

impl RegionLayout {
    /// `epoch_start < cortex_start < bitmap_start < qmask_start <
    /// flux_start <= horizon_start <= chronicle_start < total_capacity`.
    #[must_use]
    pub fn is_valid(&self, total_capacity: u64) -> bool {
        self.epoch_start < self.cortex_start
            && self.cortex_start < self.bitmap_start
            && self.bitmap_start < self.qmask_start
            && self.qmask_start < self.flux_start
            && self.flux_start <= self.horizon_start
            && self.horizon_start <= self.chronicle_start
            && self.chronicle_start < total_capacity
    }
}

/// The four-mirror superblock, fixed at [`SB_SIZE`] bytes on media.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub magic: u64,
    pub endian_tag: u32,
    pub version: (u16, u16, u16),
    pub profile: FormatProfile,
    pub block_size: u32,
    pub sector_size: u32,
    pub volume_uuid: u128,
    pub volume_label: [u8; 32],
    pub total_capacity_sectors: u64,
    pub generation_ts_ns: u64,
    pub last_mount_time_ns: u64,
    pub copy_generation: u64,
    pub compat_flags: CompatFlags,
    pub state_flags: StateFlags,
    pub device_type: hn4_hal::DeviceType,
    pub hw_caps_snapshot: u32,
    pub mount_intent_flags: MountIntentFlags,
    pub regions: RegionLayout,
    pub journal_head_lba: u64,
    pub epoch_ring_index: u64,
}

fn device_type_code(t: hn4_hal::DeviceType) -> u8 {
    match t {
        hn4_hal::DeviceType::Ssd => 0,
        hn4_hal::DeviceType::Hdd => 1,
        hn4_hal::DeviceType::Zns => 2,
        hn4_hal::DeviceType::Nvm => 3,
    }
}

fn device_type_from_code(c: u8) -> Option<hn4_hal::DeviceType> {
    Some(match c {
        0 => hn4_hal::DeviceType::Ssd,
        1 => hn4_hal::DeviceType::Hdd,
        2 => hn4_hal::DeviceType::Zns,
        3 => hn4_hal::DeviceType::Nvm,
        _ => return None,
    })
}

impl Superblock {
    /// Serialize to exactly [`SB_SIZE`] bytes, little-endian, with a
    /// trailing CRC32 over everything preceding the checksum field.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SB_SIZE);
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.extend_from_slice(&self.endian_tag.to_le_bytes());
        buf.extend_from_slice(&self.version.0.to_le_bytes());
        buf.extend_from_slice(&self.version.1.to_le_bytes());
        buf.extend_from_slice(&self.version.2.to_le_bytes());
        buf.extend_from_slice(&self.profile.code().to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.sector_size.to_le_bytes());
        buf.extend_from_slice(&self.volume_uuid.to_le_bytes());
        buf.extend_from_slice(&self.volume_label);
        buf.extend_from_slice(&self.total_capacity_sectors.to_le_bytes());
        buf.extend_from_slice(&self.generation_ts_ns.to_le_bytes());
        buf.extend_from_slice(&self.last_mount_time_ns.to_le_bytes());
        buf.extend_from_slice(&self.copy_generation.to_le_bytes());
        buf.extend_from_slice(&self.compat_flags.0.to_le_bytes());
        buf.extend_from_slice(&self.state_flags.0.to_le_bytes());
        buf.push(device_type_code(self.device_type));
        buf.extend_from_slice(&self.hw_caps_snapshot.to_le_bytes());
        buf.extend_from_slice(&self.mount_intent_flags.0.to_le_bytes());
        for lba in [
            self.regions.epoch_start,
            self.regions.cortex_start,
            self.regions.bitmap_start,
            self.regions.qmask_start,
            self.regions.flux_start,
            self.regions.horizon_start,
            self.regions.chronicle_start,
        ] {
            buf.extend_from_slice(&lba.to_le_bytes());
        }
        buf.extend_from_slice(&self.journal_head_lba.to_le_bytes());
        buf.extend_from_slice(&self.epoch_ring_index.to_le_bytes());

        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf.resize(SB_SIZE, 0);
        buf
    }

    /// Parse from exactly [`SB_SIZE`] bytes, validating magic, endian tag
    /// and the trailing CRC32.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < SB_SIZE {
            return None;
        }
        let mut o = 0usize;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let v = <$ty>::from_le_bytes(buf[o..o + N].try_into().ok()?);
                o += N;
                v
            }};
        }

        let magic: u64 = take!(u64);
        if magic != SB_MAGIC {
            return None;
        }
        let endian_tag: u32 = take!(u32);
        if endian_tag != SB_ENDIAN_TAG {
            return None;
        }
        let major: u16 = take!(u16);
        let minor: u16 = take!(u16);
        let patch: u16 = take!(u16);
        let profile_code: u16 = take!(u16);
        let profile = FormatProfile::from_code(profile_code)?;
        let block_size: u32 = take!(u32);
        let sector_size: u32 = take!(u32);
        let volume_uuid: u128 = take!(u128);
        let mut volume_label = [0u8; 32];
        volume_label.copy_from_slice(&buf[o..o + 32]);
        o += 32;
        let total_capacity_sectors: u64 = take!(u64);
        let generation_ts_ns: u64 = take!(u64);
        let last_mount_time_ns: u64 = take!(u64);
        let copy_generation: u64 = take!(u64);
        let compat_flags = CompatFlags(take!(u32));
        let state_flags = StateFlags(take!(u32));
        let device_type = device_type_from_code(buf[o])?;
        o += 1;
        let hw_caps_snapshot: u32 = take!(u32);
        let mount_intent_flags = MountIntentFlags(take!(u32));
        let mut lbas = [0u64; 7];
        for slot in &mut lbas {
            *slot = take!(u64);
        }
        let journal_head_lba: u64 = take!(u64);
        let epoch_ring_index: u64 = take!(u64);

        let crc_stored: u32 = take!(u32);
        let crc_computed = crc32(&buf[..o - 4]);
        if crc_stored != crc_computed {
            return None;
        }

        Some(Superblock {
            magic,
            endian_tag,
            version: (major, minor, patch),
            profile,
            block_size,
            sector_size,
            volume_uuid,
            volume_label,
            total_capacity_sectors,
            generation_ts_ns,
            last_mount_time_ns,
            copy_generation,
            compat_flags,
            state_flags,
            device_type,
            hw_caps_snapshot,
            mount_intent_flags,
            regions: RegionLayout {
                epoch_start: lbas[0],
                cortex_start: lbas[1],
                bitmap_start: lbas[2],
                qmask_start: lbas[3],
                flux_start: lbas[4],
                horizon_start: lbas[5],
                chronicle_start: lbas[6],
            },
            journal_head_lba,
            epoch_ring_index,
        })
    }
}

/// Fixed 128-byte anchor: a file-like metadata record and its ballistic
/// placement parameters.
#[derive(Debug, Clone, Copy)]
pub struct Anchor {
    pub seed_id: u128,
    pub public_id: u128,
    pub gravity_center: u64,
    pub mass: u64,
    pub orbit_vector: u64, // stored as u48 (velocity V), upper 16 bits unused
    pub data_class: DataClass,
    pub permissions: Permissions,
    pub write_gen: u32,
    pub create_clock_sec: u32,
    pub mod_clock_ns: u64,
    pub fractal_scale: u16,
    pub inline_buffer: [u8; 28],
}

pub const ANCHOR_SIZE: usize = 128;

impl Anchor {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.data_class.contains(DataClass::VALID)
    }

    #[must_use]
    pub fn velocity(&self) -> u64 {
        self.orbit_vector & 0xFFFF_FFFF_FFFF
    }

    /// Serialize to exactly [`ANCHOR_SIZE`] bytes. The checksum is a
    /// split CRC: `crc(head_bytes) then crc(inline_buffer)`, i.e. one
    /// running CRC32 fed the head fields and then the inline buffer.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ANCHOR_SIZE] {
        let mut buf = [0u8; ANCHOR_SIZE];
        let mut o = 0usize;
        macro_rules! put {
            ($v:expr) => {{
                let bytes = $v.to_le_bytes();
                buf[o..o + bytes.len()].copy_from_slice(&bytes);
                o += bytes.len();
            }};
        }
        put!(self.seed_id);
        put!(self.public_id);
        put!(self.gravity_center);
        put!(self.mass);
        put!(self.orbit_vector & 0xFFFF_FFFF_FFFF);
        put!(self.data_class.0);
        put!(self.permissions.0);
        put!(self.write_gen);
        put!(self.create_clock_sec);
        put!(self.mod_clock_ns);
        put!(self.fractal_scale);
        buf[o..o + 28].copy_from_slice(&self.inline_buffer);
        o += 28;

        // Split CRC per spec.md §3: CRC over {head bytes} then {inline
        // buffer}. Since the inline buffer sits immediately after the
        // head fields in this wire layout, that is just CRC32 over the
        // contiguous range covering both.
        let full_crc = crc32(&buf[..o]);
        buf[ANCHOR_SIZE - 4..].copy_from_slice(&full_crc.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8; ANCHOR_SIZE]) -> Option<Self> {
        let mut o = 0usize;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let v = <$ty>::from_le_bytes(buf[o..o + N].try_into().ok()?);
                o += N;
                v
            }};
        }
        let seed_id: u128 = take!(u128);
        let public_id: u128 = take!(u128);
        let gravity_center: u64 = take!(u64);
        let mass: u64 = take!(u64);
        let orbit_vector: u64 = take!(u64);
        let data_class = DataClass(take!(u64));
        let permissions = Permissions(take!(u32));
        let write_gen: u32 = take!(u32);
        let create_clock_sec: u32 = take!(u32);
        let mod_clock_ns: u64 = take!(u64);
        let fractal_scale: u16 = take!(u16);
        let mut inline_buffer = [0u8; 28];
        inline_buffer.copy_from_slice(&buf[o..o + 28]);
        o += 28;

        let expected = crc32(&buf[..o]);
        let stored = u32::from_le_bytes(buf[ANCHOR_SIZE - 4..].try_into().ok()?);
        if expected != stored {
            return None;
        }

        Some(Anchor {
            seed_id,
            public_id,
            gravity_center,
            mass,
            orbit_vector,
            data_class,
            permissions,
            write_gen,
            create_clock_sec,
            mod_clock_ns,
            fractal_scale,
            inline_buffer,
        })
    }
}

/// One epoch-ring entry header.
#[derive(Debug, Clone, Copy)]
pub struct EpochHeader {
    pub epoch_id: u64,
    pub prev_epoch_crc: u32,
    pub own_crc: u32,
}

/// Chronicle op codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ChronicleOp {
    Snapshot = 0,
    Fork = 1,
    Wormhole = 2,
}

/// One chronicle (audit + write-intent) entry, one per sector.
#[derive(Debug, Clone, Copy)]
pub struct ChronicleEntry {
    pub magic: u64,
    pub op_code: ChronicleOp,
    pub old_lba: u64,
    pub new_lba: u64,
    pub payload_tag: u64,
    pub timestamp_ns: u64,
    pub prev_sector_crc: u32,
}

impl ChronicleEntry {
    pub const WIRE_SIZE: usize = 8 + 2 + 8 + 8 + 8 + 8 + 4;

    #[must_use]
    pub fn to_bytes(&self, sector_size: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(sector_size);
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.extend_from_slice(&(self.op_code as u16).to_le_bytes());
        buf.extend_from_slice(&self.old_lba.to_le_bytes());
        buf.extend_from_slice(&self.new_lba.to_le_bytes());
        buf.extend_from_slice(&self.payload_tag.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        buf.extend_from_slice(&self.prev_sector_crc.to_le_bytes());
        buf.resize(sector_size, 0);
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        let mut o = 0usize;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let v = <$ty>::from_le_bytes(buf[o..o + N].try_into().ok()?);
                o += N;
                v
            }};
        }
        let magic: u64 = take!(u64);
        let op_raw: u16 = take!(u16);
        let op_code = match op_raw {
            0 => ChronicleOp::Snapshot,
            1 => ChronicleOp::Fork,
            2 => ChronicleOp::Wormhole,
            _ => return None,
        };
        let old_lba: u64 = take!(u64);
        let new_lba: u64 = take!(u64);
        let payload_tag: u64 = take!(u64);
        let timestamp_ns: u64 = take!(u64);
        let prev_sector_crc: u32 = take!(u32);
        Some(ChronicleEntry {
            magic,
            op_code,
            old_lba,
            new_lba,
            payload_tag,
            timestamp_ns,
            prev_sector_crc,
        })
    }
}

/// Header prefixing every data block (`spec.md` §6).
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub magic: u32,
    pub flags: u32,
    pub anchor_seed_id: u128,
    pub logical_index: u64,
    pub data_crc: u32,
    pub header_crc: u32,
}

impl BlockHeader {
    pub const WIRE_SIZE: usize = 4 + 4 + 16 + 8 + 4 + 4;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        let mut o = 0;
        buf[o..o + 4].copy_from_slice(&self.magic.to_le_bytes());
        o += 4;
        buf[o..o + 4].copy_from_slice(&self.flags.to_le_bytes());
        o += 4;
        buf[o..o + 16].copy_from_slice(&self.anchor_seed_id.to_le_bytes());
        o += 16;
        buf[o..o + 8].copy_from_slice(&self.logical_index.to_le_bytes());
        o += 8;
        buf[o..o + 4].copy_from_slice(&self.data_crc.to_le_bytes());
        o += 4;
        let header_crc = crc32(&buf[..o]);
        buf[o..o + 4].copy_from_slice(&header_crc.to_le_bytes());
        buf
    }

    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
        let flags = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let anchor_seed_id = u128::from_le_bytes(buf[8..24].try_into().ok()?);
        let logical_index = u64::from_le_bytes(buf[24..32].try_into().ok()?);
        let data_crc = u32::from_le_bytes(buf[32..36].try_into().ok()?);
        let header_crc = u32::from_le_bytes(buf[36..40].try_into().ok()?);
        let expected = crc32(&buf[..36]);
        if expected != header_crc {
            return None;
        }
        Some(BlockHeader {
            magic,
            flags,
            anchor_seed_id,
            logical_index,
            data_crc,
            header_crc,
        })
    }
}
