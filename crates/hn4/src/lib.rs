//! HN4 storage engine facade: the public entry point a caller links
//! against. Re-exports [`hn4_core::Volume`] and the HAL bring-up types a
//! caller needs to mount a device, without pulling in the module-level
//! internals of `hn4-core`.

pub use hn4_core::diag::StatsSnapshot;
pub use hn4_core::error::{FatalError, HnError, HnResult, Info, TransientError, ValidationError};
pub use hn4_core::format::FormatParams;
pub use hn4_core::types::{
    Anchor, DataClass, FormatProfile, Permissions, StateFlags, Superblock,
};
pub use hn4_core::{AnchorRef, Volume};

pub use hn4_hal::caps::{DeviceType, HalCaps, HwCapFlags};
pub use hn4_hal::device::MemoryDevice;
pub use hn4_hal::HalHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn format_and_mount_via_facade() {
        let capacity_sectors = (128 * 1024 * 1024) / 4096;
        let caps = HalCaps {
            device_type: DeviceType::Ssd,
            sector_size: 4096,
            capacity_sectors,
            flags: HwCapFlags::STRICT_FLUSH,
            zone_size_blocks: 0,
            zone_count: 0,
        };
        let hal = HalHandle::init(caps);
        let device = Arc::new(MemoryDevice::new(4096, capacity_sectors));
        let stats = hn4_core::diag::EngineStats::new();
        let params = FormatParams {
            profile: FormatProfile::Generic,
            volume_label: [0u8; 32],
            root_perms_or: 0,
            wormhole: false,
            override_capacity_sectors: None,
            clone_uuid: None,
            specific_uuid: None,
        };
        Volume::format(&hal, &device, params, &stats).unwrap();

        let caps2 = HalCaps {
            device_type: DeviceType::Ssd,
            sector_size: 4096,
            capacity_sectors,
            flags: HwCapFlags::STRICT_FLUSH,
            zone_size_blocks: 0,
            zone_count: 0,
        };
        let hal2 = HalHandle::init(caps2);
        let volume = Volume::mount(hal2, device, false).unwrap();
        assert!(!volume.is_read_only());
    }
}
