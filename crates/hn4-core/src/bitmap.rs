//! Armored free-space bitmap (Hamming-ECC-protected 64-bit words) and the
//! read-only 2-bit-per-block quality mask.

use bytemuck::{Pod, Zeroable};

use crate::error::{HnError, Info, ValidationError};

/// One armored bitmap word: 64 data bits plus an 8-bit Hamming code
/// covering them, letting the in-memory mirror self-correct a single
/// flipped bit.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct ArmoredWord {
    pub data: u64,
    pub ecc: u8,
    _pad: [u8; 7],
}

/// Compute the 8-bit Hamming-style ECC for a 64-bit word. Uses 7 parity
/// bits (covers 64 data bits, `2^7 - 1 = 127 >= 64 + 7`) packed into the
/// low 7 bits of the ECC byte; the 8th bit is an overall parity bit for
/// double-bit-error detection.
fn compute_ecc(data: u64) -> u8 {
    let mut parity = [false; 7];
    for bit in 0usize..64 {
        if (data >> bit) & 1 == 0 {
            continue;
        }
        // Hamming position is 1-indexed and skips pure powers of two.
        let pos = bit + 1 + (bit + 1).ilog2() as usize + 1;
        for (p, flag) in parity.iter_mut().enumerate() {
            if (pos >> p) & 1 == 1 {
                *flag = !*flag;
            }
        }
    }
    let mut ecc = 0u8;
    for (p, flag) in parity.iter().enumerate() {
        if *flag {
            ecc |= 1 << p;
        }
    }
    let overall = (data.count_ones() + ecc.count_ones()) % 2;
    ecc | ((overall as u8) << 7)
}

/// Outcome of validating/correcting an armored word.
enum EccOutcome {
    Ok,
    Healed(u64),
    Uncorrectable,
}

fn check_and_correct(data: u64, ecc: u8) -> EccOutcome {
    let expected = compute_ecc(data);
    if expected == ecc {
        return EccOutcome::Ok;
    }
    // A single-bit flip in `data` changes exactly one of the low 7 parity
    // bits in a way that, summed, points at the flipped data position.
    // We detect this by brute-force-flipping each data bit and checking
    // whether the resulting ECC now matches the stored one.
    for bit in 0..64 {
        let candidate = data ^ (1 << bit);
        if compute_ecc(candidate) == ecc {
            return EccOutcome::Healed(candidate);
        }
    }
    // No single-bit flip of `data` reproduces the stored ECC: either a
    // double-bit error or a flip inside the ECC byte itself, neither of
    // which this code can distinguish or repair.
    EccOutcome::Uncorrectable
}

impl ArmoredWord {
    #[must_use]
    pub fn new(data: u64) -> Self {
        Self {
            data,
            ecc: compute_ecc(data),
            _pad: [0; 7],
        }
    }

    /// Validate this word's ECC, returning `Info::Healed` (and mutating
    /// `self.data` in place) if a single-bit flip was corrected.
    fn validate_and_heal(&mut self) -> Info {
        match check_and_correct(self.data, self.ecc) {
            EccOutcome::Ok => Info::None,
            EccOutcome::Healed(corrected) => {
                self.data = corrected;
                self.ecc = compute_ecc(corrected);
                Info::Healed
            }
            EccOutcome::Uncorrectable => Info::None,
        }
    }
}

/// On-disk size of one [`ArmoredWord`]: 8 data bytes, 1 ECC byte, 7
/// padding bytes.
pub const ARMORED_WORD_SIZE: usize = std::mem::size_of::<ArmoredWord>();

/// The armored bitmap: one [`ArmoredWord`] per 64 data blocks.
#[derive(Debug, Clone)]
pub struct ArmoredBitmap {
    words: Vec<ArmoredWord>,
}

impl ArmoredBitmap {
    #[must_use]
    pub fn new(total_blocks: u64) -> Self {
        let word_count = total_blocks.div_ceil(64) as usize;
        Self {
            words: vec![ArmoredWord::new(0); word_count],
        }
    }

    /// Reinterpret a raw on-disk byte region as the bitmap's backing
    /// words, truncating to the word count `total_blocks` implies.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], total_blocks: u64) -> Self {
        let word_count = total_blocks.div_ceil(64) as usize;
        let needed = word_count * ARMORED_WORD_SIZE;
        let words: &[ArmoredWord] = bytemuck::cast_slice(&bytes[..needed.min(bytes.len())]);
        let mut words = words.to_vec();
        words.resize(word_count, ArmoredWord::new(0));
        Self { words }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.words).to_vec()
    }

    fn coords(i: u64) -> (usize, u32) {
        ((i / 64) as usize, (i % 64) as u32)
    }

    pub fn test(&mut self, i: u64) -> Result<(bool, Info), HnError> {
        let (w, s) = Self::coords(i);
        let word = self
            .words
            .get_mut(w)
            .ok_or(HnError::from(ValidationError::InvalidArgument))?;
        let info = word.validate_and_heal();
        Ok(((word.data >> s) & 1 == 1, info))
    }

    pub fn set(&mut self, i: u64) -> Result<Info, HnError> {
        let (w, s) = Self::coords(i);
        let word = self
            .words
            .get_mut(w)
            .ok_or(HnError::from(ValidationError::InvalidArgument))?;
        let info = word.validate_and_heal();
        word.data |= 1 << s;
        word.ecc = compute_ecc(word.data);
        Ok(info)
    }

    pub fn clear(&mut self, i: u64) -> Result<Info, HnError> {
        let (w, s) = Self::coords(i);
        let word = self
            .words
            .get_mut(w)
            .ok_or(HnError::from(ValidationError::InvalidArgument))?;
        let info = word.validate_and_heal();
        word.data &= !(1u64 << s);
        word.ecc = compute_ecc(word.data);
        Ok(info)
    }

    /// Unconditional clear, bypassing usage counters.
    pub fn force_clear(&mut self, i: u64) -> Result<(), HnError> {
        let (w, s) = Self::coords(i);
        let word = self
            .words
            .get_mut(w)
            .ok_or(HnError::from(ValidationError::InvalidArgument))?;
        word.data &= !(1u64 << s);
        word.ecc = compute_ecc(word.data);
        Ok(())
    }

    #[must_use]
    pub fn used_blocks(&self) -> u64 {
        self.words.iter().map(|w| w.data.count_ones() as u64).sum()
    }

    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.words.len() as u64 * 64
    }
}

/// Quality state of a block: `Silver` is good, the two reserved states
/// are wear-gradient markers, `Toxic` must never be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Silver,
    Reserved1,
    Reserved2,
    Toxic,
}

impl Quality {
    #[must_use]
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b11 => Quality::Silver,
            0b10 => Quality::Reserved1,
            0b01 => Quality::Reserved2,
            _ => Quality::Toxic,
        }
    }

    #[must_use]
    pub fn is_toxic(self) -> bool {
        matches!(self, Quality::Toxic)
    }
}

/// 2 bits per block; initialized to all-silver (`0xAA` bytes) at format.
#[derive(Debug, Clone)]
pub struct QualityMask {
    bytes: Vec<u8>,
}

pub const QMASK_FILL_BYTE: u8 = 0xAA;

impl QualityMask {
    #[must_use]
    pub fn new(total_blocks: u64) -> Self {
        let byte_count = total_blocks.div_ceil(4) as usize;
        Self {
            bytes: vec![QMASK_FILL_BYTE; byte_count],
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn quality(&self, i: u64) -> Quality {
        let byte = self.bytes[(i / 4) as usize];
        let shift = (i % 4) * 2;
        Quality::from_bits(byte >> shift)
    }

    pub fn set_quality(&mut self, i: u64, q: Quality) {
        let byte = &mut self.bytes[(i / 4) as usize];
        let shift = (i % 4) * 2;
        let bits: u8 = match q {
            Quality::Silver => 0b11,
            Quality::Reserved1 => 0b10,
            Quality::Reserved2 => 0b01,
            Quality::Toxic => 0b00,
        };
        *byte = (*byte & !(0b11 << shift)) | (bits << shift);
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_test_is_true() {
        let mut bm = ArmoredBitmap::new(128);
        bm.set(5).unwrap();
        let (bit, _) = bm.test(5).unwrap();
        assert!(bit);
    }

    #[test]
    fn clear_then_test_is_false() {
        let mut bm = ArmoredBitmap::new(128);
        bm.set(5).unwrap();
        bm.clear(5).unwrap();
        let (bit, _) = bm.test(5).unwrap();
        assert!(!bit);
    }

    #[test]
    fn single_bit_flip_is_healed() {
        let mut bm = ArmoredBitmap::new(64);
        bm.set(3).unwrap();
        bm.set(40).unwrap();
        // Flip an unrelated data bit to simulate media bit-rot.
        bm.words[0].data ^= 1 << 10;
        let (_, info) = bm.test(10).unwrap();
        assert_eq!(info, Info::Healed);
        let (bit3, _) = bm.test(3).unwrap();
        let (bit40, _) = bm.test(40).unwrap();
        assert!(bit3);
        assert!(bit40);
    }

    #[test]
    fn quality_mask_defaults_to_silver() {
        let qm = QualityMask::new(256);
        assert_eq!(qm.as_bytes()[0], QMASK_FILL_BYTE);
        for i in 0..256 {
            assert_eq!(qm.quality(i), Quality::Silver);
        }
    }

    #[test]
    fn toxic_block_is_flagged() {
        let mut qm = QualityMask::new(16);
        qm.set_quality(5, Quality::Toxic);
        assert!(qm.quality(5).is_toxic());
        assert!(!qm.quality(4).is_toxic());
    }
}
