//! Sector-oriented I/O request/result types and the async-style submission
//! contract. A request carries op, LBA, buffer, length in sectors, user
//! context and a `result_lba` that `ZONE_APPEND` populates with the
//! actual landed LBA.

use crate::error::{HalError, HalResult};
use crate::HalHandle;

/// The six operations the HAL understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
    Flush,
    Discard,
    ZoneAppend,
    ZoneReset,
}

/// One in-flight I/O request.
pub struct IoRequest {
    pub op: IoOp,
    pub lba: u64,
    pub buf: Vec<u8>,
    pub length_sectors: u32,
    pub user_context: u64,
    /// Populated by `ZONE_APPEND` with the LBA the data actually landed at.
    pub result_lba: u64,
}

impl IoRequest {
    #[must_use]
    pub fn new(op: IoOp, lba: u64, buf: Vec<u8>, length_sectors: u32) -> Self {
        Self {
            op,
            lba,
            buf,
            length_sectors,
            user_context: 0,
            result_lba: 0,
        }
    }
}

/// Outcome of a completed I/O request. `buf` carries the bytes read back
/// for a `READ`; it is empty for every other op.
#[derive(Debug, Clone)]
pub struct IoResult {
    pub ok: bool,
    pub error: Option<HalError>,
    pub result_lba: u64,
    pub buf: Vec<u8>,
}

pub type CompletionCallback = Box<dyn FnOnce(IoResult) + Send>;

/// The process-wide backing store this simulated HAL writes to: an
/// in-memory sector array. Real deployments back this with an actual
/// block device; the engine only depends on the `IoOp` contract below.
#[derive(Debug)]
pub struct MemoryDevice {
    pub sector_size: u32,
    pub sectors: parking_lot::Mutex<Vec<u8>>,
}

impl MemoryDevice {
    #[must_use]
    pub fn new(sector_size: u32, capacity_sectors: u64) -> Self {
        Self {
            sector_size,
            sectors: parking_lot::Mutex::new(vec![
                0u8;
                (sector_size as u64 * capacity_sectors) as usize
            ]),
        }
    }

    fn byte_range(&self, lba: u64, length_sectors: u32) -> (usize, usize) {
        let start = lba as usize * self.sector_size as usize;
        let len = length_sectors as usize * self.sector_size as usize;
        (start, start + len)
    }

    /// Submit a request synchronously against this in-memory device,
    /// invoking the completion callback before returning (the simulated
    /// HAL has no real async completion path, so `submit` behaves like an
    /// immediate dispatch; `sync_io` layers the spin-poll contract on
    /// top regardless).
    pub fn submit(&self, hal: &HalHandle, mut req: IoRequest, cb: CompletionCallback) {
        let result = self.dispatch(hal, &mut req);
        let (ok, error) = match result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e)),
        };
        let result_lba = req.result_lba;
        let buf = if ok && req.op == IoOp::Read {
            req.buf
        } else {
            Vec::new()
        };
        cb(IoResult {
            ok,
            error,
            result_lba,
            buf,
        });
    }

    fn dispatch(&self, hal: &HalHandle, req: &mut IoRequest) -> HalResult<()> {
        match req.op {
            IoOp::Read => {
                let (start, end) = self.byte_range(req.lba, req.length_sectors);
                let sectors = self.sectors.lock();
                if end > sectors.len() {
                    return Err(HalError::HwIo);
                }
                req.buf.clear();
                req.buf.extend_from_slice(&sectors[start..end]);
                Ok(())
            }
            IoOp::Write => {
                let (start, end) = self.byte_range(req.lba, req.length_sectors);
                let mut sectors = self.sectors.lock();
                if end > sectors.len() || req.buf.len() < end - start {
                    return Err(HalError::HwIo);
                }
                sectors[start..end].copy_from_slice(&req.buf[..end - start]);
                Ok(())
            }
            IoOp::Flush => Ok(()),
            IoOp::Discard => {
                let (start, end) = self.byte_range(req.lba, req.length_sectors);
                let mut sectors = self.sectors.lock();
                if end > sectors.len() {
                    return Err(HalError::HwIo);
                }
                sectors[start..end].fill(0);
                Ok(())
            }
            IoOp::ZoneAppend => {
                let landed = hal.zones().append(req.lba, req.length_sectors as u64)?;
                let (start, end) = self.byte_range(landed, req.length_sectors);
                let mut sectors = self.sectors.lock();
                if end > sectors.len() || req.buf.len() < end - start {
                    return Err(HalError::HwIo);
                }
                sectors[start..end].copy_from_slice(&req.buf[..end - start]);
                req.result_lba = landed;
                Ok(())
            }
            IoOp::ZoneReset => {
                let (zone_start, zone_len) = hal.zones().reset(req.lba)?;
                let (start, end) = self.byte_range(zone_start, zone_len as u32);
                let mut sectors = self.sectors.lock();
                if end > sectors.len() {
                    return Err(HalError::HwIo);
                }
                sectors[start..end].fill(0);
                Ok(())
            }
        }
    }
}
