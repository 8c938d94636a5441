//! Synchronous I/O wrapper over the callback-based submission contract,
//! plus the chunked large-I/O helper used by format/genesis for zeroing
//! metadata regions.
//!
//! Grounded on the teacher's `arena.rs`: a heap-resident bundle is
//! allocated, handed to the backend, and spin-polled with bounded
//! timeout. On timeout the bundle is **intentionally leaked** — the
//! backend may still write into it after we give up waiting, and
//! reclaiming it here would be a use-after-free. The arena in `arena.rs`
//! makes the analogous tradeoff by quarantining rather than immediately
//! reusing freed slots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::{CompletionCallback, IoOp, IoRequest, IoResult, MemoryDevice};
use crate::error::{HalError, HalResult};
use crate::HalHandle;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Two gibibytes, the maximum per-submission chunk for `sync_io_large`.
pub const MAX_CHUNK_BYTES: u64 = 2 * 1024 * 1024 * 1024;

struct SyncBundle {
    done: AtomicBool,
    result: parking_lot::Mutex<Option<IoResult>>,
}

/// Submit `req` and block (spin-poll with yield) until it completes or
/// `timeout` elapses. On timeout, returns `Err(AtomicsTimeout)` and leaks
/// the bundle by design.
pub fn sync_submit(
    hal: &HalHandle,
    device: &MemoryDevice,
    req: IoRequest,
    timeout: Duration,
) -> HalResult<IoResult> {
    let bundle = Arc::new(SyncBundle {
        done: AtomicBool::new(false),
        result: parking_lot::Mutex::new(None),
    });

    let cb_bundle = Arc::clone(&bundle);
    let cb: CompletionCallback = Box::new(move |res| {
        *cb_bundle.result.lock() = Some(res);
        cb_bundle.done.store(true, Ordering::Release);
    });

    device.submit(hal, req, cb);

    let start = Instant::now();
    let mut spins: u32 = 0;
    while !bundle.done.load(Ordering::Acquire) {
        if start.elapsed() > timeout {
            // Intentional leak: `bundle`'s Arc strong count is held open by
            // forgetting our clone so a late completion write can never
            // observe freed memory.
            std::mem::forget(Arc::clone(&bundle));
            return Err(HalError::AtomicsTimeout);
        }
        spins += 1;
        if spins > 64 {
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }

    let result = bundle.result.lock().take().ok_or(HalError::InternalFault)?;
    Ok(result)
}

/// Always issue a barrier after a sync `WRITE`-then-`FLUSH` sequence.
pub fn sync_write_then_flush(
    hal: &HalHandle,
    device: &MemoryDevice,
    lba: u64,
    buf: Vec<u8>,
    length_sectors: u32,
) -> HalResult<()> {
    let write_req = IoRequest::new(IoOp::Write, lba, buf, length_sectors);
    let res = sync_submit(hal, device, write_req, DEFAULT_TIMEOUT)?;
    if !res.ok {
        return Err(res.error.unwrap_or(HalError::HwIo));
    }
    let flush_req = IoRequest::new(IoOp::Flush, 0, Vec::new(), 0);
    let res = sync_submit(hal, device, flush_req, DEFAULT_TIMEOUT)?;
    if !res.ok {
        return Err(res.error.unwrap_or(HalError::HwIo));
    }
    Ok(())
}

/// Chunk a write of `total_len` bytes starting at `start_lba` into
/// `<= MAX_CHUNK_BYTES` submissions. `block_size` must evenly divide
/// `total_len` (else `AlignmentFail`); a chunk that computes to zero
/// blocks is an internal fault (the "Zeno trap": an infinite-regress
/// chunking bug that asymptotically approaches, but never reaches, the
/// end of the region).
pub fn sync_io_large_zero(
    hal: &HalHandle,
    device: &MemoryDevice,
    start_lba: u64,
    total_bytes: u64,
    sector_size: u32,
    block_size: u32,
) -> HalResult<()> {
    if block_size == 0 || total_bytes % u64::from(block_size) != 0 {
        return Err(HalError::AlignmentFail);
    }
    let sector_size = u64::from(sector_size);
    let mut remaining = total_bytes;
    let mut lba = start_lba;
    while remaining > 0 {
        let chunk_bytes = remaining.min(MAX_CHUNK_BYTES - (MAX_CHUNK_BYTES % sector_size));
        let chunk_sectors = chunk_bytes / sector_size;
        if chunk_sectors == 0 {
            return Err(HalError::InternalFault);
        }
        let buf = vec![0u8; chunk_bytes as usize];
        sync_write_then_flush(hal, device, lba, buf, chunk_sectors as u32)?;
        lba += chunk_sectors;
        remaining -= chunk_bytes;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{DeviceType, HalCaps, HwCapFlags};

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

    #[test]
    fn zero_fill_writes_requested_bytes() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 1 << 16);
        sync_io_large_zero(&hal, &device, 0, 8192, 512, 512).unwrap();
        assert_eq!(device.sectors.lock().len(), 512 * (1 << 16));
    }

    #[test]
    fn misaligned_total_is_rejected() {
        let hal = test_hal();
        let device = MemoryDevice::new(512, 1 << 16);
        let err = sync_io_large_zero(&hal, &device, 0, 100, 512, 512).unwrap_err();
        assert_eq!(err, HalError::AlignmentFail);
    }
}
