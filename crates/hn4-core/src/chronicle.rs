//! The Chronicle: an append-only, prev-sector-CRC-chained log that is
//! simultaneously the write-intent journal (closes the parity write
//! hole) and the audit trail (`spec.md` §4.2).
//!
//! Grounded on the HAL's `sync_io` write-then-flush contract: every
//! append is a synchronous write immediately followed by a flush before
//! the caller is told the entry is durable.

use hn4_hal::device::MemoryDevice;
use hn4_hal::sync_io::{self, DEFAULT_TIMEOUT};
use hn4_hal::{device::IoOp, device::IoRequest, HalHandle};

use crate::diag::EngineStats;
use crate::error::{FatalError, HnError, ValidationError};
use crate::types::{ChronicleEntry, ChronicleOp, CHRONICLE_MAGIC};

/// Drives the Chronicle region: a fixed-length ring of sectors starting
/// at `region_start`, one [`ChronicleEntry`] per sector.
#[derive(Debug)]
pub struct Chronicle {
    region_start: u64,
    region_len_sectors: u64,
    sector_size: u32,
    head: u64,
    last_crc: u32,
    read_only: bool,
}

/// How close to the tail (in sectors) a recovery scan must get before it
/// triggers a scrub pass over the remaining unscanned region, to surface
/// wormhole-adjacent corruption before it is overwritten.
pub const WORMHOLE_SCRUB_WINDOW: u64 = 8;

impl Chronicle {
    #[must_use]
    pub fn new(region_start: u64, region_len_sectors: u64, sector_size: u32) -> Self {
        Self {
            region_start,
            region_len_sectors,
            sector_size,
            head: 0,
            last_crc: 0,
            read_only: false,
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn sector_at(&self, offset: u64) -> u64 {
        self.region_start + (offset % self.region_len_sectors.max(1))
    }

    /// Append one entry. Read-only volumes may never append: recovering
    /// a wedged mount into read-only mode must not further perturb the
    /// journal that a future writable mount would replay.
    pub fn append(
        &mut self,
        hal: &HalHandle,
        device: &MemoryDevice,
        mut entry: ChronicleEntry,
        stats: &EngineStats,
    ) -> Result<(), HnError> {
        if self.read_only {
            return Err(ValidationError::AccessDenied.into());
        }
        entry.magic = CHRONICLE_MAGIC;
        entry.prev_sector_crc = self.last_crc;
        let buf = entry.to_bytes(self.sector_size as usize);
        let crc = crate::crc::crc32(&buf);

        let lba = self.sector_at(self.head);
        let req = IoRequest::new(IoOp::Write, lba, buf, 1);
        let res = sync_io::sync_submit(hal, device, req, DEFAULT_TIMEOUT)
            .map_err(HnError::from)?;
        if !res.ok {
            return Err(FatalError::AuditFailure.into());
        }
        let flush = IoRequest::new(IoOp::Flush, 0, Vec::new(), 0);
        let res = sync_io::sync_submit(hal, device, flush, DEFAULT_TIMEOUT)
            .map_err(HnError::from)?;
        if !res.ok {
            return Err(FatalError::AuditFailure.into());
        }

        self.head = (self.head + 1) % self.region_len_sectors.max(1);
        self.last_crc = crc;
        stats.record_chronicle_append();
        Ok(())
    }

    /// Tail-to-head recovery scan: read each sector from the oldest to
    /// the newest, verifying the prev-sector-CRC chain. Returns the
    /// highest verified head offset and the list of entries recovered
    /// in order. A chain break at offset `i` truncates recovery there —
    /// everything from `i` onward is presumed torn by a crash mid-write.
    pub fn recover(
        &mut self,
        hal: &HalHandle,
        device: &MemoryDevice,
    ) -> Result<Vec<ChronicleEntry>, HnError> {
        let mut entries = Vec::new();
        let mut expected_prev_crc = 0u32;
        let mut verified_offset = 0u64;

        for offset in 0..self.region_len_sectors {
            let lba = self.sector_at(offset);
            let req = IoRequest::new(IoOp::Read, lba, Vec::new(), 1);
            let res = sync_io::sync_submit(hal, device, req, DEFAULT_TIMEOUT)
                .map_err(HnError::from)?;
            if !res.ok {
                break;
            }
            let Some(entry) = ChronicleEntry::from_bytes(&res.buf) else {
                break;
            };
            if entry.magic != CHRONICLE_MAGIC {
                break;
            }
            if offset > 0 && entry.prev_sector_crc != expected_prev_crc {
                break;
            }
            let crc = crate::crc::crc32(&entry.to_bytes(self.sector_size as usize));
            expected_prev_crc = crc;
            verified_offset = offset + 1;
            entries.push(entry);
        }

        self.head = verified_offset % self.region_len_sectors.max(1);
        self.last_crc = expected_prev_crc;
        Ok(entries)
    }

    #[must_use]
    pub fn op_label(op: ChronicleOp) -> &'static str {
        match op {
            ChronicleOp::Snapshot => "snapshot",
            ChronicleOp::Fork => "fork",
            ChronicleOp::Wormhole => "wormhole",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hn4_hal::caps::{DeviceType, HalCaps, HwCapFlags};

    fn test_hal() -> HalHandle {
        HalHandle::init(HalCaps {
            device_type: DeviceType::Ssd,
            sector_size: 512,
            capacity_sectors: 4096,
            flags: HwCapFlags::STRICT_FLUSH,
            zone_size_blocks: 0,
            zone_count: 0,
        })
    }

    #[test]
    fn append_advances_head_and_tracks_crc() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 4096);
        let stats = EngineStats::new();
        let mut chron = Chronicle::new(100, 16, 512);
        let entry = ChronicleEntry {
            magic: CHRONICLE_MAGIC,
            op_code: ChronicleOp::Snapshot,
            old_lba: 0,
            new_lba: 1,
            payload_tag: 0,
            timestamp_ns: 0,
            prev_sector_crc: 0,
        };
        chron.append(&hal, &device, entry, &stats).unwrap();
        assert_eq!(chron.head, 1);
        assert_eq!(stats.snapshot().chronicle_appends, 1);
    }

    #[test]
    fn read_only_chronicle_rejects_append() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 4096);
        let stats = EngineStats::new();
        let mut chron = Chronicle::new(100, 16, 512);
        chron.set_read_only(true);
        let entry = ChronicleEntry {
            magic: CHRONICLE_MAGIC,
            op_code: ChronicleOp::Snapshot,
            old_lba: 0,
            new_lba: 1,
            payload_tag: 0,
            timestamp_ns: 0,
            prev_sector_crc: 0,
        };
        let err = chron.append(&hal, &device, entry, &stats).unwrap_err();
        assert!(matches!(
            err,
            HnError::Validation(ValidationError::AccessDenied)
        ));
    }

    #[test]
    fn ring_wraps_after_region_len() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 4096);
        let stats = EngineStats::new();
        let mut chron = Chronicle::new(100, 2, 512);
        for _ in 0..3 {
            let entry = ChronicleEntry {
                magic: CHRONICLE_MAGIC,
                op_code: ChronicleOp::Snapshot,
                old_lba: 0,
                new_lba: 1,
                payload_tag: 0,
                timestamp_ns: 0,
                prev_sector_crc: 0,
            };
            chron.append(&hal, &device, entry, &stats).unwrap();
        }
        assert_eq!(chron.head, 1); // wrapped: 3 appends mod region_len(2)
    }
}
