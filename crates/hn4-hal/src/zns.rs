//! Zoned-namespace simulation: fixed-size zones, each with an atomic
//! write pointer advanced only via CAS (never fetch-add, which would
//! silently wrap past zone capacity under a race).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{HalError, HalResult};

#[derive(Debug)]
pub struct ZoneTable {
    zone_size_blocks: u64,
    pointers: Vec<AtomicU64>,
}

impl ZoneTable {
    #[must_use]
    pub fn new(zone_size_blocks: u64, zone_count: u64) -> Self {
        let pointers = (0..zone_count.max(1)).map(|_| AtomicU64::new(0)).collect();
        Self {
            zone_size_blocks: zone_size_blocks.max(1),
            pointers,
        }
    }

    fn zone_of(&self, lba: u64) -> u64 {
        lba / self.zone_size_blocks
    }

    /// Compute `(zone_idx, zone_start_lba)` from an LBA.
    #[must_use]
    pub fn zone_coords(&self, lba: u64) -> (u64, u64) {
        let idx = self.zone_of(lba);
        (idx, idx * self.zone_size_blocks)
    }

    /// CAS-advance the zone's write pointer by `len` blocks; returns the
    /// LBA the append landed at, or `ZoneFull` if it would exceed zone
    /// capacity.
    pub fn append(&self, lba: u64, len: u64) -> HalResult<u64> {
        let (zone_idx, zone_start) = self.zone_coords(lba);
        let ptr = self
            .pointers
            .get(zone_idx as usize)
            .ok_or(HalError::InvalidArgument)?;
        loop {
            let old = ptr.load(Ordering::Acquire);
            let new = old
                .checked_add(len)
                .ok_or(HalError::ZoneFull)?;
            if new > self.zone_size_blocks {
                return Err(HalError::ZoneFull);
            }
            if ptr
                .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(zone_start + old);
            }
        }
    }

    /// Reset a zone's write pointer to 0, returning `(zone_start_lba,
    /// zone_size_blocks)` so the caller can clear the backing data too.
    pub fn reset(&self, lba: u64) -> HalResult<(u64, u64)> {
        let (zone_idx, zone_start) = self.zone_coords(lba);
        let ptr = self
            .pointers
            .get(zone_idx as usize)
            .ok_or(HalError::InvalidArgument)?;
        ptr.store(0, Ordering::Release);
        Ok((zone_start, self.zone_size_blocks))
    }

    #[must_use]
    pub fn write_pointer(&self, zone_idx: u64) -> Option<u64> {
        self.pointers
            .get(zone_idx as usize)
            .map(|p| p.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_advances_and_rejects_overflow() {
        let zones = ZoneTable::new(100, 4);
        let first = zones.append(0, 40).unwrap();
        assert_eq!(first, 0);
        let second = zones.append(0, 40).unwrap();
        assert_eq!(second, 40);
        assert!(matches!(zones.append(0, 30), Err(HalError::ZoneFull)));
    }

    #[test]
    fn reset_clears_pointer() {
        let zones = ZoneTable::new(100, 2);
        zones.append(0, 50).unwrap();
        zones.reset(0).unwrap();
        assert_eq!(zones.write_pointer(0), Some(0));
    }

    #[test]
    fn zones_are_independent() {
        let zones = ZoneTable::new(100, 2);
        zones.append(0, 90).unwrap();
        // Zone 1 starts fresh regardless of zone 0's pointer.
        let landed = zones.append(100, 10).unwrap();
        assert_eq!(landed, 100);
    }
}
