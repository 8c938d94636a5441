//! Profile↔geometry consistency rules (`spec.md` §4.4 step 3) and the
//! per-profile defaults used elsewhere (allocator Rail-mode selection,
//! theta suppression).

use crate::error::{HnError, ValidationError};
use crate::types::FormatProfile;
use hn4_hal::DeviceType;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;
const EIB: u64 = 1u64 << 60;

/// Reject hardware/profile combinations that cannot be honored, per
/// `spec.md` §4.4 step 3.
pub fn validate_profile_geometry(
    profile: FormatProfile,
    device_type: DeviceType,
    sector_size: u32,
    capacity_bytes: u64,
) -> Result<(), HnError> {
    match profile {
        FormatProfile::Pico if sector_size > 512 => {
            return Err(ValidationError::ProfileMismatch.into())
        }
        FormatProfile::Archive if device_type == DeviceType::Nvm => {
            return Err(ValidationError::ProfileMismatch.into())
        }
        FormatProfile::Pico if device_type == DeviceType::Zns => {
            return Err(ValidationError::ProfileMismatch.into())
        }
        FormatProfile::Generic if capacity_bytes < 128 * MIB => {
            return Err(ValidationError::ProfileMismatch.into())
        }
        FormatProfile::Archive
            if capacity_bytes < 10 * GIB || capacity_bytes > 18u64.saturating_mul(EIB) =>
        {
            return Err(ValidationError::ProfileMismatch.into())
        }
        FormatProfile::Pico if capacity_bytes > 2 * GIB => {
            return Err(ValidationError::ProfileMismatch.into())
        }
        _ => {}
    }
    Ok(())
}

/// Profiles that force Rail mode (`V = 1`) at genesis regardless of the
/// `CONTIGUOUS` allocation flag.
#[must_use]
pub fn forces_rail_mode(profile: FormatProfile, device_type: DeviceType) -> bool {
    matches!(profile, FormatProfile::System | FormatProfile::Archive)
        || device_type == DeviceType::Zns
}

/// HDD, ZNS, and SYSTEM profile all suppress the `theta` gravity-assist
/// term for predictable latency.
#[must_use]
pub fn suppresses_theta(profile: FormatProfile, device_type: DeviceType) -> bool {
    matches!(device_type, DeviceType::Hdd | DeviceType::Zns) || profile == FormatProfile::System
}
