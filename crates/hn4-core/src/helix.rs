//! Helix: the RAID-6-replacement parity router (`spec.md` §4.7). Column-
//! rotated left-symmetric P+Q layout over GF(2^8)/0x11D, row-locked by a
//! 64-bit avalanche mix hash so sequential rows never alias onto one
//! lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::chronicle::Chronicle;
use crate::diag::EngineStats;
use crate::error::{FatalError, HnError, TransientError, ValidationError};
use crate::gf256::field;
use crate::tunables::{DEFAULT_STRIPE_UNIT_SECTORS, HELIX_SHARD_COUNT, HN4_MAX_ARRAY_DEVICES};
use crate::types::{ChronicleEntry, ChronicleOp};
use hn4_hal::device::{IoOp, IoRequest, MemoryDevice};
use hn4_hal::sync_io::{self, DEFAULT_TIMEOUT};
use hn4_hal::HalHandle;

/// How an array of member devices is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMode {
    Single,
    Mirror,
    Shard,
    Parity,
}

/// Row-lock shard array: one spinlock-equivalent mutex per shard,
/// selected by a 64-bit avalanche mix of the row id so rows `0, 64,
/// 128, ...` don't all collide on shard 0 under naive `row % N`.
pub struct RowLockShards {
    shards: Vec<Mutex<()>>,
}

fn mix_hash(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x
}

impl RowLockShards {
    #[must_use]
    pub fn new() -> Self {
        Self::with_count(HELIX_SHARD_COUNT)
    }

    #[must_use]
    pub fn with_count(count: u32) -> Self {
        Self {
            shards: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    #[must_use]
    pub fn shard_index(&self, row: u64) -> usize {
        (mix_hash(row) % self.shards.len() as u64) as usize
    }

    /// Acquire the lock guarding `row`, returning a guard that must be
    /// held for the duration of the row's RMW sequence.
    pub fn lock_row(&self, row: u64) -> parking_lot::MutexGuard<'_, ()> {
        self.shards[self.shard_index(row)].lock()
    }
}

impl Default for RowLockShards {
    fn default() -> Self {
        Self::new()
    }
}

/// Left-symmetric P/Q column placement for row `r` over `count` member
/// devices.
#[must_use]
pub fn parity_columns(r: u64, count: usize) -> (usize, usize) {
    let count = count as u64;
    let p_col = (count - 1 - (r % count)) % count;
    let q_col = (count + count - 2 - (r % count)) % count;
    (p_col as usize, q_col as usize)
}

/// Logical (pre-rotation) column order for the data columns of row `r`:
/// the `count - 2` physical positions that are neither `p_col` nor
/// `q_col`, in ascending physical order, labelled 0..count-3 in that
/// order. Index `i` in the returned vector is "logical column `i`".
#[must_use]
pub fn data_columns(r: u64, count: usize) -> Vec<usize> {
    let (p_col, q_col) = parity_columns(r, count);
    (0..count).filter(|c| *c != p_col && *c != q_col).collect()
}

/// One member device's state within the array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Online,
    Offline,
}

/// A single data/parity stripe's per-row state, byte-for-byte across
/// `count` columns, one "column" being one device's slice of this row.
pub struct StripeRow {
    pub columns: Vec<Vec<u8>>,
    pub status: Vec<MemberStatus>,
}

/// Census outcome for a row's reconstruction.
pub enum ReconstructCase {
    /// 0 or 1 data failures, P alive: XOR reconstruction.
    CaseA { missing: Option<usize> },
    /// 1 data failure, P dead, Q alive: single GF solve.
    CaseB { missing: usize },
    /// 2 data failures, P and Q alive: 2x2 GF linear system.
    CaseC { missing: [usize; 2] },
}

fn census(row: &StripeRow, p_col: usize, q_col: usize) -> Result<ReconstructCase, HnError> {
    let failed: Vec<usize> = row
        .status
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == MemberStatus::Offline)
        .map(|(i, _)| i)
        .collect();
    if failed.len() > 2 {
        return Err(FatalError::ParityBroken.into());
    }
    let data_cols: Vec<usize> = (0..row.columns.len())
        .filter(|c| *c != p_col && *c != q_col)
        .collect();
    let failed_data: Vec<usize> = failed.iter().copied().filter(|c| data_cols.contains(c)).collect();
    let p_dead = row.status[p_col] == MemberStatus::Offline;
    let q_dead = row.status[q_col] == MemberStatus::Offline;

    match (failed_data.len(), p_dead, q_dead) {
        (0, _, _) => Ok(ReconstructCase::CaseA { missing: None }),
        (1, false, _) => Ok(ReconstructCase::CaseA {
            missing: Some(failed_data[0]),
        }),
        (1, true, false) => Ok(ReconstructCase::CaseB {
            missing: failed_data[0],
        }),
        (2, false, false) => Ok(ReconstructCase::CaseC {
            missing: [failed_data[0], failed_data[1]],
        }),
        _ => Err(FatalError::ParityBroken.into()),
    }
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

fn gf_scale(buf: &[u8], coeff: u8) -> Vec<u8> {
    let f = field();
    buf.iter().map(|b| f.mul(*b, coeff)).collect()
}

/// Reconstruct the missing data column(s) for one row, given the
/// logical column index of each physical data column (its exponent in
/// the Q equation). `logical_of` maps a physical column index (within
/// `data_cols`) to its logical exponent `i` for `g^i`.
pub fn reconstruct(
    row: &StripeRow,
    p_col: usize,
    q_col: usize,
    logical_of: impl Fn(usize) -> u32,
    stats: &EngineStats,
) -> Result<Vec<(usize, Vec<u8>)>, HnError> {
    let case = census(row, p_col, q_col)?;
    let len = row.columns.first().map(Vec::len).unwrap_or(0);
    let f = field();

    let result = match case {
        ReconstructCase::CaseA { missing: None } => Vec::new(),
        ReconstructCase::CaseA { missing: Some(m) } => {
            let mut acc = row.columns[p_col].clone();
            for c in 0..row.columns.len() {
                if c == m || c == p_col || c == q_col {
                    continue;
                }
                if row.status[c] == MemberStatus::Offline {
                    continue;
                }
                xor_into(&mut acc, &row.columns[c]);
            }
            vec![(m, acc)]
        }
        ReconstructCase::CaseB { missing: m } => {
            let mut acc = row.columns[q_col].clone();
            for c in 0..row.columns.len() {
                if c == m || c == p_col || c == q_col {
                    continue;
                }
                if row.status[c] == MemberStatus::Offline {
                    continue;
                }
                let scaled = gf_scale(&row.columns[c], f.pow_generator(logical_of(c)));
                xor_into(&mut acc, &scaled);
            }
            let inv_coeff = f.pow_generator_neg(logical_of(m));
            let recovered = gf_scale(&acc, inv_coeff);
            vec![(m, recovered)]
        }
        ReconstructCase::CaseC { missing: [m1, m2] } => {
            let mut p_acc = row.columns[p_col].clone();
            let mut q_acc = row.columns[q_col].clone();
            for c in 0..row.columns.len() {
                if c == m1 || c == m2 || c == p_col || c == q_col {
                    continue;
                }
                if row.status[c] == MemberStatus::Offline {
                    continue;
                }
                xor_into(&mut p_acc, &row.columns[c]);
                let scaled = gf_scale(&row.columns[c], f.pow_generator(logical_of(c)));
                xor_into(&mut q_acc, &scaled);
            }
            // Solve the 2x2 GF(2^8) system:
            //   p_acc = D1 ^ D2
            //   q_acc = D1*g^i1 ^ D2*g^i2
            let g1 = f.pow_generator(logical_of(m1));
            let g2 = f.pow_generator(logical_of(m2));
            let mut d1 = vec![0u8; len];
            let mut d2 = vec![0u8; len];
            for idx in 0..len {
                // D2 = (q_acc ^ D1*g1); substitute D1 = p_acc ^ D2:
                // q_acc = (p_acc ^ D2)*g1 ^ D2*g2
                //       = p_acc*g1 ^ D2*(g1 ^ g2)
                // D2 = (q_acc ^ p_acc*g1) / (g1 ^ g2)
                let denom = g1 ^ g2;
                let rhs = q_acc[idx] ^ f.mul(p_acc[idx], g1);
                let d2_byte = if denom == 0 { 0 } else { f.div(rhs, denom) };
                let d1_byte = p_acc[idx] ^ d2_byte;
                d1[idx] = d1_byte;
                d2[idx] = d2_byte;
            }
            vec![(m1, d1), (m2, d2)]
        }
    };
    if !result.is_empty() {
        stats.record_reconstruction();
    }
    Ok(result)
}

/// Append a `WORMHOLE` chronicle entry for the stripe about to be
/// written, and flush it — the write-hole-closing step that must
/// happen-before the data/P/Q write.
pub fn append_write_intent(
    chronicle: &mut Chronicle,
    hal: &HalHandle,
    device: &MemoryDevice,
    target_lba: u64,
    stats: &EngineStats,
) -> Result<(), HnError> {
    let entry = ChronicleEntry {
        magic: 0,
        op_code: ChronicleOp::Wormhole,
        old_lba: target_lba,
        new_lba: target_lba,
        payload_tag: 0,
        timestamp_ns: hn4_hal::clock::monotonic_ns(),
        prev_sector_crc: 0,
    };
    chronicle
        .append(hal, device, entry, stats)
        .map_err(|_| FatalError::AuditFailure.into())
}

/// Compute `(P_new, Q_new)` deltas for one write. `old`/`new` are the
/// data column's old and new bytes; `logical_index` is that column's
/// exponent in the Q equation. Only `P` is updated if `p_online`; `Q`
/// is always updated regardless of P's status (`spec.md` step 4).
#[must_use]
pub fn apply_delta(
    p_old: &[u8],
    q_old: &[u8],
    old: &[u8],
    new: &[u8],
    logical_index: u32,
    p_online: bool,
) -> (Option<Vec<u8>>, Vec<u8>) {
    let mut delta = old.to_vec();
    xor_into(&mut delta, new);

    let p_new = if p_online {
        let mut p = p_old.to_vec();
        xor_into(&mut p, &delta);
        Some(p)
    } else {
        None
    };

    let coeff = field().pow_generator(logical_index);
    let scaled_delta = gf_scale(&delta, coeff);
    let mut q_new = q_old.to_vec();
    xor_into(&mut q_new, &scaled_delta);

    (p_new, q_new)
}

/// Validate a stripe write is possible at all: two or more data
/// failures with a degraded P or Q pushes past the tolerable loss.
pub fn can_degrade_write(statuses: &[MemberStatus], p_col: usize, q_col: usize) -> bool {
    let offline = statuses.iter().filter(|s| **s == MemberStatus::Offline).count();
    if offline >= 3 {
        return false;
    }
    let data_offline = statuses
        .iter()
        .enumerate()
        .filter(|(i, s)| **s == MemberStatus::Offline && *i != p_col && *i != q_col)
        .count();
    let p_dead = statuses[p_col] == MemberStatus::Offline;
    let q_dead = statuses[q_col] == MemberStatus::Offline;
    !(data_offline == 2 && (p_dead || q_dead))
}

/// An I/O spanning more than `stripe_unit_sectors` must be split so each
/// piece acquires its own row lock; `spec.md`'s boundary-crossing rule.
#[must_use]
pub fn split_at_stripe_boundary(start_lba: u64, length_sectors: u64, stripe_unit_sectors: u64) -> Vec<(u64, u64)> {
    if stripe_unit_sectors == 0 {
        return vec![(start_lba, length_sectors)];
    }
    let mut pieces = Vec::new();
    let mut lba = start_lba;
    let mut remaining = length_sectors;
    while remaining > 0 {
        let boundary = (lba / stripe_unit_sectors + 1) * stripe_unit_sectors;
        let chunk = (boundary - lba).min(remaining);
        pieces.push((lba, chunk));
        lba += chunk;
        remaining -= chunk;
    }
    pieces
}

/// `EVENT_HORIZON`-equivalent is not used for ZNS crossing rejection —
/// cross-zone writes are a hard `ZONE_FULL`.
#[must_use]
pub fn crosses_zone(start_lba: u64, length_sectors: u64, zone_size_blocks: u64) -> Result<(), HnError> {
    if zone_size_blocks == 0 {
        return Ok(());
    }
    let start_zone = start_lba / zone_size_blocks;
    let end_zone = (start_lba + length_sectors.saturating_sub(1)) / zone_size_blocks;
    if start_zone != end_zone {
        return Err(TransientError::ZoneFull.into());
    }
    Ok(())
}

/// A live array of member devices driven by one [`ArrayMode`]. Owns the
/// row-lock shards so every RMW sequence (plain or parity) serializes
/// against concurrent writers on the same row.
pub struct DeviceArray {
    mode: ArrayMode,
    devices: Vec<Arc<MemoryDevice>>,
    statuses: Vec<MemberStatus>,
    stripe_unit_sectors: u32,
    row_locks: RowLockShards,
}

const MIN_MEMBER_CAPACITY_BYTES: u64 = 100 * 1024 * 1024;

impl DeviceArray {
    #[must_use]
    pub fn new(mode: ArrayMode) -> Self {
        Self {
            mode,
            devices: Vec::new(),
            statuses: Vec::new(),
            stripe_unit_sectors: DEFAULT_STRIPE_UNIT_SECTORS,
            row_locks: RowLockShards::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> ArrayMode {
        self.mode
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.devices.len()
    }

    fn device_capacity_bytes(device: &MemoryDevice) -> u64 {
        device.sectors.lock().len() as u64
    }

    /// Add a member device, enforcing `spec.md` §4.7's SHARD/Parity
    /// admission rules: no duplicates, uniform sector size, a capacity
    /// floor so a tiny device can't sink the whole array's geometry, a
    /// hard member-count ceiling, and no pool-capacity overflow.
    pub fn add_device(&mut self, device: Arc<MemoryDevice>) -> Result<(), HnError> {
        if self.devices.iter().any(|d| Arc::ptr_eq(d, &device)) {
            return Err(ValidationError::Eexist.into());
        }
        if let Some(first) = self.devices.first() {
            if first.sector_size != device.sector_size {
                return Err(ValidationError::AlignmentFail.into());
            }
        }
        let capacity_bytes = Self::device_capacity_bytes(&device);
        if capacity_bytes < MIN_MEMBER_CAPACITY_BYTES {
            return Err(ValidationError::Geometry.into());
        }
        if self.devices.len() >= HN4_MAX_ARRAY_DEVICES {
            return Err(ValidationError::Enospc.into());
        }
        let pool_total: u128 = self
            .devices
            .iter()
            .map(|d| u128::from(Self::device_capacity_bytes(d)))
            .sum::<u128>()
            + u128::from(capacity_bytes);
        if pool_total > u128::from(u64::MAX) {
            return Err(ValidationError::Enospc.into());
        }
        self.devices.push(device);
        self.statuses.push(MemberStatus::Online);
        Ok(())
    }

    pub fn mark_offline(&mut self, member: usize) {
        if let Some(s) = self.statuses.get_mut(member) {
            *s = MemberStatus::Offline;
        }
    }

    fn shard_member(&self, lba: u64) -> usize {
        (mix_hash(lba) % self.devices.len().max(1) as u64) as usize
    }

    /// Single/Mirror/Shard read at sector granularity. Parity-mode
    /// arrays reject this entry point; use [`Self::read_parity_column`].
    pub fn read(&self, hal: &HalHandle, lba: u64, length_sectors: u32) -> Result<Vec<u8>, HnError> {
        if self.devices.is_empty() {
            return Err(ValidationError::Geometry.into());
        }
        match self.mode {
            ArrayMode::Single => self.read_from(hal, 0, lba, length_sectors),
            ArrayMode::Mirror => {
                for (i, status) in self.statuses.iter().enumerate() {
                    if *status == MemberStatus::Offline {
                        continue;
                    }
                    if let Ok(buf) = self.read_from(hal, i, lba, length_sectors) {
                        return Ok(buf);
                    }
                }
                Err(FatalError::ParityBroken.into())
            }
            ArrayMode::Shard => {
                let member = self.shard_member(lba);
                if self.statuses[member] == MemberStatus::Offline {
                    return Err(TransientError::ZoneFull.into());
                }
                self.read_from(hal, member, lba, length_sectors)
            }
            ArrayMode::Parity => Err(ValidationError::InvalidArgument.into()),
        }
    }

    fn read_from(&self, hal: &HalHandle, member: usize, lba: u64, length_sectors: u32) -> Result<Vec<u8>, HnError> {
        let req = IoRequest::new(IoOp::Read, lba, Vec::new(), length_sectors);
        let res = sync_io::sync_submit(hal, &self.devices[member], req, DEFAULT_TIMEOUT)
            .map_err(HnError::from)?;
        if !res.ok {
            return Err(FatalError::ParityBroken.into());
        }
        Ok(res.buf)
    }

    /// Single/Mirror/Shard write at sector granularity. Mirror mode needs
    /// `stats` because a bare `DeviceArray` has no link to a `Superblock`
    /// to set `DEGRADED` on directly: a short mirror write instead bumps
    /// [`EngineStats::record_degrade_transition`], the same side channel
    /// the rest of the engine uses to surface non-fatal health events to
    /// whichever caller does hold the mounted volume.
    pub fn write(
        &self,
        hal: &HalHandle,
        lba: u64,
        buf: Vec<u8>,
        length_sectors: u32,
        stats: &EngineStats,
    ) -> Result<(), HnError> {
        if self.devices.is_empty() {
            return Err(ValidationError::Geometry.into());
        }
        match self.mode {
            ArrayMode::Single => {
                sync_io::sync_write_then_flush(hal, &self.devices[0], lba, buf, length_sectors)
                    .map_err(HnError::from)
            }
            ArrayMode::Mirror => {
                let online_count = self.statuses.iter().filter(|s| **s == MemberStatus::Online).count();
                let mut success_count = 0;
                for (i, status) in self.statuses.iter().enumerate() {
                    if *status == MemberStatus::Offline {
                        continue;
                    }
                    if sync_io::sync_write_then_flush(hal, &self.devices[i], lba, buf.clone(), length_sectors)
                        .is_ok()
                    {
                        success_count += 1;
                    }
                }
                if success_count == online_count {
                    Ok(())
                } else {
                    stats.record_degrade_transition();
                    Err(TransientError::HwIo.into())
                }
            }
            ArrayMode::Shard => {
                let member = self.shard_member(lba);
                if self.statuses[member] == MemberStatus::Offline {
                    return Err(TransientError::ZoneFull.into());
                }
                sync_io::sync_write_then_flush(hal, &self.devices[member], lba, buf, length_sectors)
                    .map_err(HnError::from)
            }
            ArrayMode::Parity => Err(ValidationError::InvalidArgument.into()),
        }
    }

    fn read_row(&self, hal: &HalHandle, row: u64) -> StripeRow {
        let mut columns = Vec::with_capacity(self.devices.len());
        let mut status = Vec::with_capacity(self.devices.len());
        for (i, dev) in self.devices.iter().enumerate() {
            if self.statuses[i] == MemberStatus::Offline {
                columns.push(vec![0u8; dev.sector_size as usize]);
                status.push(MemberStatus::Offline);
                continue;
            }
            let req = IoRequest::new(IoOp::Read, row, Vec::new(), 1);
            match sync_io::sync_submit(hal, dev, req, DEFAULT_TIMEOUT) {
                Ok(res) if res.ok => {
                    columns.push(res.buf);
                    status.push(MemberStatus::Online);
                }
                _ => {
                    columns.push(vec![0u8; dev.sector_size as usize]);
                    status.push(MemberStatus::Offline);
                }
            }
        }
        StripeRow { columns, status }
    }

    /// Read one logical data column of parity row `row`, reconstructing
    /// through [`reconstruct`] if that column's member is offline.
    pub fn read_parity_column(
        &self,
        hal: &HalHandle,
        row: u64,
        logical_col: usize,
        stats: &EngineStats,
    ) -> Result<Vec<u8>, HnError> {
        if self.mode != ArrayMode::Parity {
            return Err(ValidationError::InvalidArgument.into());
        }
        let count = self.devices.len();
        let (p_col, q_col) = parity_columns(row, count);
        let data_cols = data_columns(row, count);
        let phys_col = *data_cols
            .get(logical_col)
            .ok_or(ValidationError::InvalidArgument)?;

        let _guard = self.row_locks.lock_row(row);
        let stripe = self.read_row(hal, row);
        if stripe.status[phys_col] == MemberStatus::Online {
            return Ok(stripe.columns[phys_col].clone());
        }
        let logical_of = |c: usize| data_cols.iter().position(|x| *x == c).unwrap() as u32;
        let recovered = reconstruct(&stripe, p_col, q_col, logical_of, stats)?;
        recovered
            .into_iter()
            .find(|(c, _)| *c == phys_col)
            .map(|(_, b)| b)
            .ok_or_else(|| FatalError::ParityBroken.into())
    }

    /// Read-modify-write one logical data column of parity row `row`:
    /// appends the write-intent entry, updates P (if online) and Q
    /// (always), then writes whichever of data/P/Q are currently online.
    pub fn write_parity_column(
        &self,
        hal: &HalHandle,
        chronicle: &mut Chronicle,
        chronicle_device: &MemoryDevice,
        row: u64,
        logical_col: usize,
        new_data: Vec<u8>,
        stats: &EngineStats,
    ) -> Result<(), HnError> {
        if self.mode != ArrayMode::Parity {
            return Err(ValidationError::InvalidArgument.into());
        }
        let count = self.devices.len();
        let (p_col, q_col) = parity_columns(row, count);
        let data_cols = data_columns(row, count);
        let phys_col = *data_cols
            .get(logical_col)
            .ok_or(ValidationError::InvalidArgument)?;

        let _guard = self.row_locks.lock_row(row);
        if !can_degrade_write(&self.statuses, p_col, q_col) {
            return Err(FatalError::ParityBroken.into());
        }

        let stripe = self.read_row(hal, row);
        let old = if stripe.status[phys_col] == MemberStatus::Online {
            stripe.columns[phys_col].clone()
        } else {
            let logical_of = |c: usize| data_cols.iter().position(|x| *x == c).unwrap() as u32;
            let recovered = reconstruct(&stripe, p_col, q_col, logical_of, stats)?;
            recovered
                .into_iter()
                .find(|(c, _)| *c == phys_col)
                .map(|(_, b)| b)
                .ok_or_else(|| HnError::from(FatalError::ParityBroken))?
        };
        let p_online = stripe.status[p_col] == MemberStatus::Online;
        let (p_new, q_new) = apply_delta(
            &stripe.columns[p_col],
            &stripe.columns[q_col],
            &old,
            &new_data,
            logical_col as u32,
            p_online,
        );

        append_write_intent(chronicle, hal, chronicle_device, row, stats)?;

        if self.statuses[phys_col] == MemberStatus::Online {
            sync_io::sync_write_then_flush(hal, &self.devices[phys_col], row, new_data, 1)
                .map_err(HnError::from)?;
        }
        if let Some(p) = p_new {
            if self.statuses[p_col] == MemberStatus::Online {
                sync_io::sync_write_then_flush(hal, &self.devices[p_col], row, p, 1)
                    .map_err(HnError::from)?;
            }
        }
        if self.statuses[q_col] == MemberStatus::Online {
            sync_io::sync_write_then_flush(hal, &self.devices[q_col], row, q_new, 1)
                .map_err(HnError::from)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn stripe_unit_sectors(&self) -> u32 {
        self.stripe_unit_sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_columns_rotate_left_symmetric() {
        let (p0, q0) = parity_columns(0, 4);
        assert_eq!((p0, q0), (3, 2));
        let (p1, q1) = parity_columns(1, 4);
        assert_eq!((p1, q1), (2, 1));
    }

    #[test]
    fn data_columns_excludes_parity() {
        let cols = data_columns(0, 4);
        assert_eq!(cols, vec![0, 1]);
    }

    #[test]
    fn row_lock_shards_distribute_sequential_rows() {
        let shards = RowLockShards::with_count(64);
        let mut seen = std::collections::HashSet::new();
        for row in 0..64u64 {
            seen.insert(shards.shard_index(row * 64));
        }
        // A naive `row % 64` would put every multiple of 64 on shard 0;
        // the mix hash should spread them out.
        assert!(seen.len() > 1);
    }

    fn make_row(count: usize, len: usize, fill: impl Fn(usize) -> u8) -> StripeRow {
        StripeRow {
            columns: (0..count).map(|c| vec![fill(c); len]).collect(),
            status: vec![MemberStatus::Online; count],
        }
    }

    #[test]
    fn case_a_reconstructs_single_missing_data_column_via_xor() {
        let count = 4;
        let (p_col, q_col) = parity_columns(0, count);
        let mut row = make_row(count, 8, |c| (c as u8) + 1);
        // Recompute P honestly: P = XOR of all data columns.
        let data_cols = data_columns(0, count);
        let mut p_bytes = vec![0u8; 8];
        for &c in &data_cols {
            xor_into(&mut p_bytes, &row.columns[c].clone());
        }
        row.columns[p_col] = p_bytes;
        let missing = data_cols[0];
        row.status[missing] = MemberStatus::Offline;

        let stats = EngineStats::new();
        let logical_of = |c: usize| data_cols.iter().position(|x| *x == c).unwrap() as u32;
        let recovered = reconstruct(&row, p_col, q_col, logical_of, &stats).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].0, missing);
        assert_eq!(recovered[0].1, vec![(missing as u8) + 1; 8]);
    }

    #[test]
    fn split_at_stripe_boundary_splits_crossing_writes() {
        let pieces = split_at_stripe_boundary(120, 20, 128);
        assert_eq!(pieces, vec![(120, 8), (128, 12)]);
    }

    #[test]
    fn crosses_zone_rejects_spanning_write() {
        let err = crosses_zone(60, 10, 64).unwrap_err();
        assert!(matches!(
            err,
            HnError::Transient(TransientError::ZoneFull)
        ));
        assert!(crosses_zone(0, 10, 64).is_ok());
    }

    #[test]
    fn can_degrade_write_rejects_two_data_plus_parity_loss() {
        let mut statuses = vec![MemberStatus::Online; 4];
        let (p_col, q_col) = parity_columns(0, 4);
        let data_cols = data_columns(0, 4);
        statuses[data_cols[0]] = MemberStatus::Offline;
        statuses[data_cols[1]] = MemberStatus::Offline;
        statuses[p_col] = MemberStatus::Offline;
        assert!(!can_degrade_write(&statuses, p_col, q_col));

        let mut statuses2 = vec![MemberStatus::Online; 4];
        statuses2[data_cols[0]] = MemberStatus::Offline;
        assert!(can_degrade_write(&statuses2, p_col, q_col));
    }

    fn test_hal() -> HalHandle {
        use hn4_hal::caps::{DeviceType, HalCaps, HwCapFlags};
        HalHandle::init(HalCaps {
            device_type: DeviceType::Ssd,
            sector_size: 512,
            capacity_sectors: 1 << 18,
            flags: HwCapFlags::STRICT_FLUSH,
            zone_size_blocks: 0,
            zone_count: 0,
        })
    }

    fn member(sector_size: u32) -> Arc<MemoryDevice> {
        Arc::new(MemoryDevice::new(sector_size, 1 << 18))
    }

    #[test]
    fn add_device_rejects_duplicates_mismatched_sectors_and_overflow() {
        let mut array = DeviceArray::new(ArrayMode::Shard);
        let dev = member(512);
        array.add_device(Arc::clone(&dev)).unwrap();
        let err = array.add_device(Arc::clone(&dev)).unwrap_err();
        assert!(matches!(err, HnError::Validation(ValidationError::Eexist)));

        let mismatched = member(4096);
        let err = array.add_device(mismatched).unwrap_err();
        assert!(matches!(
            err,
            HnError::Validation(ValidationError::AlignmentFail)
        ));

        let tiny = Arc::new(MemoryDevice::new(512, 32));
        let err = array.add_device(tiny).unwrap_err();
        assert!(matches!(err, HnError::Validation(ValidationError::Geometry)));
    }

    #[test]
    fn add_device_enforces_max_member_count() {
        let mut array = DeviceArray::new(ArrayMode::Shard);
        for _ in 0..HN4_MAX_ARRAY_DEVICES {
            array.add_device(member(512)).unwrap();
        }
        let err = array.add_device(member(512)).unwrap_err();
        assert!(matches!(err, HnError::Validation(ValidationError::Enospc)));
    }

    #[test]
    fn single_mode_round_trips_a_write() {
        let hal = test_hal();
        let mut array = DeviceArray::new(ArrayMode::Single);
        array.add_device(member(512)).unwrap();
        let stats = EngineStats::new();
        array.write(&hal, 10, vec![7u8; 512], 1, &stats).unwrap();
        let read = array.read(&hal, 10, 1).unwrap();
        assert_eq!(read, vec![7u8; 512]);
    }

    #[test]
    fn mirror_mode_write_skips_offline_members_without_degrading() {
        let hal = test_hal();
        let mut array = DeviceArray::new(ArrayMode::Mirror);
        array.add_device(member(512)).unwrap();
        array.add_device(member(512)).unwrap();
        array.mark_offline(1);
        // An offline member is excluded from online_count, so a write
        // that only reaches the online member still counts as complete.
        let stats = EngineStats::new();
        array.write(&hal, 10, vec![9u8; 512], 1, &stats).unwrap();
        assert_eq!(stats.snapshot().degrade_transitions, 0);
    }

    #[test]
    fn parity_write_then_degraded_read_reconstructs() {
        let hal = test_hal();
        let mut array = DeviceArray::new(ArrayMode::Parity);
        for _ in 0..4 {
            array.add_device(member(512)).unwrap();
        }
        let stats = EngineStats::new();
        let mut chronicle = Chronicle::new(1 << 17, 32, 512);
        let chronicle_device = member(512);

        // Seed all four columns at row 0 so P/Q start consistent: write
        // each logical data column through the RMW path once.
        array
            .write_parity_column(&hal, &mut chronicle, &chronicle_device, 0, 0, vec![0xAA; 512], &stats)
            .unwrap();
        array
            .write_parity_column(&hal, &mut chronicle, &chronicle_device, 0, 1, vec![0xBB; 512], &stats)
            .unwrap();

        let (p_col, _q_col) = parity_columns(0, 4);
        let data_cols = data_columns(0, 4);
        let dead = data_cols[0];
        array.mark_offline(dead);

        // p_col must stay online for this read to hit Case A.
        assert_ne!(dead, p_col);
        let recovered = array.read_parity_column(&hal, 0, 0, &stats).unwrap();
        assert_eq!(recovered, vec![0xAA; 512]);
    }

    #[test]
    fn degraded_write_to_offline_column_reconstructs_old_value_for_delta() {
        let hal = test_hal();
        let mut array = DeviceArray::new(ArrayMode::Parity);
        for _ in 0..4 {
            array.add_device(member(512)).unwrap();
        }
        let stats = EngineStats::new();
        let mut chronicle = Chronicle::new(1 << 17, 32, 512);
        let chronicle_device = member(512);

        array
            .write_parity_column(&hal, &mut chronicle, &chronicle_device, 0, 0, vec![0x11; 512], &stats)
            .unwrap();
        array
            .write_parity_column(&hal, &mut chronicle, &chronicle_device, 0, 1, vec![0x22; 512], &stats)
            .unwrap();

        // Take the logical_col 0 member offline, then write through it
        // again. If the pre-image were taken zero-filled (the bug) rather
        // than reconstructed, the P/Q delta would be computed against 0
        // instead of 0x11 and every later reconstruction of this column
        // or its neighbours would return garbage.
        let data_cols = data_columns(0, 4);
        array.mark_offline(data_cols[0]);
        array
            .write_parity_column(&hal, &mut chronicle, &chronicle_device, 0, 0, vec![0x33; 512], &stats)
            .unwrap();

        let recovered = array.read_parity_column(&hal, 0, 0, &stats).unwrap();
        assert_eq!(recovered, vec![0x33; 512]);

        let other = array.read_parity_column(&hal, 0, 1, &stats).unwrap();
        assert_eq!(other, vec![0x22; 512]);
    }
}
