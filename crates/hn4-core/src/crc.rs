//! CRC32 (ISO-HDLC, the classic zlib/ext4-style polynomial) used for
//! superblock, anchor, chronicle and block-header checksums.

use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[must_use]
pub fn crc32(buf: &[u8]) -> u32 {
    CRC32.checksum(buf)
}
