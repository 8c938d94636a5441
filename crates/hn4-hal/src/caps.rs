//! Device capability description and gating.

/// Minimal `bitflags`-shaped macro so the crate does not take on the
/// `bitflags` dependency for a handful of constants; the teacher's own
/// `ext4_flag_field!`-style macros use the same hand-rolled-flag-struct
/// idiom for small fixed flag sets.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $val:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $flag: $name = $name($val);)*

            #[must_use]
            pub const fn empty() -> Self {
                Self(0)
            }

            #[must_use]
            pub const fn contains(&self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

/// Physical substrate backing a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Hdd,
    Ssd,
    Zns,
    Nvm,
}

bitflags_like! {
    /// Hardware capability flags snapshotted at mount/format time.
    pub struct HwCapFlags: u32 {
        const STRICT_FLUSH     = 1 << 0;
        const ZONE_APPEND      = 1 << 1;
        const BYTE_ADDRESSABLE = 1 << 2;
        const TLS_SUPPORTED    = 1 << 3;
        const ACCEL_CONTEXT    = 1 << 4;
    }
}

/// Capability/geometry snapshot for a device, queried once at HAL init.
#[derive(Debug, Clone, Copy)]
pub struct HalCaps {
    pub device_type: DeviceType,
    pub sector_size: u32,
    pub capacity_sectors: u64,
    pub flags: HwCapFlags,
    /// Zone size in blocks (ZNS only; ignored otherwise).
    pub zone_size_blocks: u64,
    /// Number of zones (ZNS only).
    pub zone_count: u64,
}

impl HalCaps {
    #[must_use]
    pub fn supports_strict_flush(&self) -> bool {
        self.flags.contains(HwCapFlags::STRICT_FLUSH)
    }
}
