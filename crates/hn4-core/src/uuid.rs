//! UUIDv7 generation for volume identity.
//!
//! 48-bit millisecond timestamp in the high 48 bits of `hi`, a 4-bit
//! version nibble (`0x7`) at `hi & 0xF000`, remaining bits filled from the
//! HAL PRNG; `lo` is fully random. Both halves are persisted — the spec
//! calls out "persisting only `lo`" as a common bug to avoid.

use hn4_hal::prng::Prng;

#[must_use]
pub fn generate_uuid_v7(now_unix_ms: u64, prng: &Prng) -> u128 {
    let ts48 = now_unix_ms & 0xFFFF_FFFF_FFFF;

    let rand_a: u64 = prng.next_u64() & 0x0FFF; // 12 random bits
    let hi: u64 = (ts48 << 16) | (0x7 << 12) | rand_a;

    let rand_b = prng.next_u64();
    // Variant bits (10) in the top two bits of the variant field, per
    // RFC 4122's layout convention; the remaining 62 bits are PRNG fill.
    let lo: u64 = (0b10 << 62) | (rand_b & 0x3FFF_FFFF_FFFF_FFFF);

    (u128::from(hi) << 64) | u128::from(lo)
}

#[must_use]
pub fn version_nibble(uuid: u128) -> u8 {
    ((uuid >> 76) & 0xF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_nibble_is_seven() {
        let prng = Prng::new(1);
        let id = generate_uuid_v7(1_700_000_000_000, &prng);
        assert_eq!(version_nibble(id), 0x7);
    }

    #[test]
    fn both_halves_are_persisted_and_vary() {
        let prng = Prng::new(2);
        let a = generate_uuid_v7(1_700_000_000_000, &prng);
        let b = generate_uuid_v7(1_700_000_000_000, &prng);
        // lo halves must differ run-to-run (persisting only lo would have
        // made this assertion on hi instead always pass trivially).
        assert_ne!(a as u64, b as u64);
        assert_ne!(a, b);
    }
}
