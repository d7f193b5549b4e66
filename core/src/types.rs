use proc_bitfield::bitfield;

pub type Long = u32;

bitfield! {
    /// 24-bit big-endian address/length as used by the Adaptec-style structures
    /// (mailboxes, legacy CCBs, scatter/gather entries)
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Addr24(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub hi: u8 @ 16..24,
        pub mid: u8 @ 8..16,
        pub lo: u8 @ 0..8,
    }
}

impl Addr24 {
    /// Decodes a 3-byte big-endian field
    pub fn from_be(bytes: &[u8]) -> Self {
        Self(0).with_hi(bytes[0]).with_mid(bytes[1]).with_lo(bytes[2])
    }

    /// Encodes into a 3-byte big-endian field, dropping bits 24..32
    pub fn to_be(self) -> [u8; 3] {
        [self.hi(), self.mid(), self.lo()]
    }
}

/// Reads a little-endian 32-bit value at `offset`
pub fn le32(bytes: &[u8], offset: usize) -> Long {
    Long::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr24_big_endian() {
        let a = Addr24::from_be(&[0x01, 0x23, 0x45]);
        assert_eq!(a.0, 0x012345);
        assert_eq!(Addr24(0xFF_AB_CD_EF).to_be(), [0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn le32_offset() {
        assert_eq!(le32(&[0, 0x78, 0x56, 0x34, 0x12], 1), 0x12345678);
    }
}
