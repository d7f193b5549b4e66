//! Command Control Blocks and scatter/gather lists
//!
//! Both layouts share the first four bytes and the host/target status bytes
//! at 0x0E/0x0F:
//!
//! | Offset | Legacy (24-bit)            | Extended (32-bit)       |
//! |--------|----------------------------|-------------------------|
//! | 0      | opcode                     | opcode                  |
//! | 1      | id 7-5, control 4-3, lun 2-0 | control 4-3           |
//! | 2      | CDB length                 | CDB length              |
//! | 3      | sense length               | sense length            |
//! | 4      | data length (3, BE)        | data length (4, LE)     |
//! | 7 / 8  | data pointer (3, BE)       | data pointer (4, LE)    |
//! | 16     |                            | target id               |
//! | 17     |                            | lun                     |
//! | 18     | CDB (12)                   | CDB (12)                |
//! | 36     |                            | sense pointer (4, LE)   |
//!
//! The legacy sense buffer follows the CDB inside the CCB.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::bus::Address;
use crate::hostadapter::mailbox::MailboxFormat;
use crate::scsi::CDB_LEN;
use crate::types::{le32, Addr24};

/// Bytes fetched from guest memory per CCB
pub const CCB_LEN: usize = 40;

pub const CCB_OFFSET_RESIDUE: Address = 0x04;
pub const CCB_OFFSET_HOST_STATUS: Address = 0x0E;
pub const CCB_OFFSET_CDB: usize = 18;

/// Host adapter status codes
pub const CCB_COMPLETE: u8 = 0x00;
pub const CCB_SELECTION_TIMEOUT: u8 = 0x11;
pub const CCB_INVALID_OP_CODE: u8 = 0x16;
pub const CCB_INVALID_DIRECTION: u8 = 0x18;
pub const CCB_ABORT_NOT_FOUND: u8 = 0x26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::IntoStaticStr)]
pub enum CcbOpcode {
    Initiator = 0x00,
    Target = 0x01,
    ScatterGather = 0x02,
    InitiatorResidual = 0x03,
    ScatterGatherResidual = 0x04,
    BusDeviceReset = 0x81,
}

impl CcbOpcode {
    pub const fn reports_residual(self) -> bool {
        matches!(self, Self::InitiatorResidual | Self::ScatterGatherResidual)
    }
}

/// Data direction requested by the initiator
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, strum::IntoStaticStr)]
pub enum Direction {
    /// Follow whatever phase the target enters
    Auto = 0,
    /// Target -> Initiator
    In = 1,
    /// Initiator -> Target
    Out = 2,
    NoData = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ccb {
    /// Raw opcode; validated by the mailbox processor
    pub opcode: u8,
    pub direction: Direction,
    pub target: u8,
    pub lun: u8,
    pub cdb_len: u8,
    /// Raw sense length field (see [`Ccb::sense_len`])
    pub sense_len_raw: u8,
    pub data_len: u32,
    pub data_ptr: Address,
    pub cdb: [u8; CDB_LEN],
    /// Only present in the extended layout
    pub sense_ptr: Option<Address>,
}

impl Ccb {
    /// A CCB with no data phase and the default sense allocation
    pub fn new(opcode: CcbOpcode, target: u8, lun: u8, cdb: &[u8]) -> Self {
        let mut c = [0; CDB_LEN];
        let len = cdb.len().min(CDB_LEN);
        c[..len].copy_from_slice(&cdb[..len]);
        Self {
            opcode: opcode as u8,
            direction: Direction::Auto,
            target,
            lun,
            cdb_len: len as u8,
            sense_len_raw: 0,
            data_len: 0,
            data_ptr: 0,
            cdb: c,
            sense_ptr: None,
        }
    }

    /// Encodes a CCB in guest memory layout
    pub fn serialize(&self, format: MailboxFormat) -> [u8; CCB_LEN] {
        let mut b = [0; CCB_LEN];
        b[0] = self.opcode;
        b[2] = self.cdb_len;
        b[3] = self.sense_len_raw;
        b[CCB_OFFSET_CDB..(CCB_OFFSET_CDB + CDB_LEN)].copy_from_slice(&self.cdb);
        let control = (self.direction as u8) << 3;

        match format {
            MailboxFormat::Legacy24 => {
                b[1] = (self.target << 5) | control | (self.lun & 7);
                b[4..7].copy_from_slice(&Addr24(self.data_len).to_be());
                b[7..10].copy_from_slice(&Addr24(self.data_ptr).to_be());
            }
            MailboxFormat::Extended32 => {
                b[1] = control;
                b[4..8].copy_from_slice(&self.data_len.to_le_bytes());
                b[8..12].copy_from_slice(&self.data_ptr.to_le_bytes());
                b[16] = self.target;
                b[17] = self.lun;
                b[36..40].copy_from_slice(&self.sense_ptr.unwrap_or(0).to_le_bytes());
            }
        }
        b
    }

    /// Decodes a CCB. `ext_lun` selects the 5-bit LUN field of the BusLogic
    /// extended CCB format.
    pub fn parse(format: MailboxFormat, bytes: &[u8], ext_lun: bool) -> Self {
        let mut cdb = [0; CDB_LEN];
        cdb.copy_from_slice(&bytes[CCB_OFFSET_CDB..(CCB_OFFSET_CDB + CDB_LEN)]);
        // Both layouts encode the control bits in the same place
        let direction = Direction::from_u8((bytes[1] >> 3) & 3).unwrap_or(Direction::Auto);

        match format {
            MailboxFormat::Legacy24 => Self {
                opcode: bytes[0],
                direction,
                target: bytes[1] >> 5,
                lun: bytes[1] & 7,
                cdb_len: bytes[2],
                sense_len_raw: bytes[3],
                data_len: Addr24::from_be(&bytes[4..7]).0,
                data_ptr: Addr24::from_be(&bytes[7..10]).0,
                cdb,
                sense_ptr: None,
            },
            MailboxFormat::Extended32 => Self {
                opcode: bytes[0],
                direction,
                target: bytes[16],
                lun: bytes[17] & if ext_lun { 0x1F } else { 0x07 },
                cdb_len: bytes[2],
                sense_len_raw: bytes[3],
                data_len: le32(bytes, 4),
                data_ptr: le32(bytes, 8),
                cdb,
                sense_ptr: Some(le32(bytes, 36)),
            },
        }
    }

    pub fn opcode(&self) -> Option<CcbOpcode> {
        CcbOpcode::from_u8(self.opcode)
    }

    /// Sense bytes requested: 0 means the classic 14 bytes, 1 means none
    pub fn sense_len(&self) -> usize {
        match self.sense_len_raw {
            0 => 14,
            1 => 0,
            n => n as usize,
        }
    }

    /// Where sense data goes for a CCB located at `ccb_addr`
    pub fn sense_addr(&self, ccb_addr: Address) -> Address {
        self.sense_ptr.unwrap_or_else(|| {
            ccb_addr
                .wrapping_add(CCB_OFFSET_CDB as Address)
                .wrapping_add(self.cdb_len as Address)
        })
    }

    /// CDB as handed to the device layer, trailing bytes beyond the
    /// declared length zeroed
    pub fn cdb(&self) -> [u8; CDB_LEN] {
        let mut cdb = [0; CDB_LEN];
        let len = (self.cdb_len as usize).min(CDB_LEN);
        cdb[..len].copy_from_slice(&self.cdb[..len]);
        cdb
    }
}

/// One scatter/gather segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    pub len: u32,
    pub ptr: Address,
}

impl SgEntry {
    /// 24-bit entries are {length BE3, pointer BE3}, 32-bit entries are
    /// {length LE4, pointer LE4}
    pub const fn size(format: MailboxFormat) -> usize {
        match format {
            MailboxFormat::Legacy24 => 6,
            MailboxFormat::Extended32 => 8,
        }
    }

    pub fn parse(format: MailboxFormat, bytes: &[u8]) -> Self {
        match format {
            MailboxFormat::Legacy24 => Self {
                len: Addr24::from_be(&bytes[0..3]).0,
                ptr: Addr24::from_be(&bytes[3..6]).0,
            },
            MailboxFormat::Extended32 => Self {
                len: le32(bytes, 0),
                ptr: le32(bytes, 4),
            },
        }
    }

    pub fn serialize(&self, format: MailboxFormat) -> Vec<u8> {
        match format {
            MailboxFormat::Legacy24 => {
                [Addr24(self.len).to_be(), Addr24(self.ptr).to_be()].concat()
            }
            MailboxFormat::Extended32 => [self.len.to_le_bytes(), self.ptr.to_le_bytes()].concat(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_bytes() -> Vec<u8> {
        let mut b = vec![0; CCB_LEN];
        b[0] = 0x03;
        // id 2, data in, lun 1
        b[1] = (2 << 5) | (1 << 3) | 1;
        b[2] = 6;
        b[3] = 0;
        b[4..7].copy_from_slice(&[0x00, 0x02, 0x00]);
        b[7..10].copy_from_slice(&[0x01, 0x20, 0x00]);
        b[18..24].copy_from_slice(&[0x08, 0, 0, 0, 1, 0]);
        b
    }

    #[test]
    fn legacy_layout() {
        let ccb = Ccb::parse(MailboxFormat::Legacy24, &legacy_bytes(), false);
        assert_eq!(ccb.opcode(), Some(CcbOpcode::InitiatorResidual));
        assert_eq!(ccb.direction, Direction::In);
        assert_eq!(ccb.target, 2);
        assert_eq!(ccb.lun, 1);
        assert_eq!(ccb.data_len, 0x200);
        assert_eq!(ccb.data_ptr, 0x012000);
        assert_eq!(ccb.sense_len(), 14);
        assert_eq!(ccb.sense_addr(0x5000), 0x5000 + 18 + 6);
        assert_eq!(&ccb.cdb()[..6], &[0x08, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn extended_layout() {
        let mut b = vec![0; CCB_LEN];
        b[0] = 0x02;
        b[1] = 2 << 3;
        b[2] = 10;
        b[3] = 1;
        b[4..8].copy_from_slice(&16u32.to_le_bytes());
        b[8..12].copy_from_slice(&0x0020_0000u32.to_le_bytes());
        b[16] = 12;
        b[17] = 0x1B;
        b[36..40].copy_from_slice(&0x0030_0000u32.to_le_bytes());

        let ccb = Ccb::parse(MailboxFormat::Extended32, &b, false);
        assert_eq!(ccb.opcode(), Some(CcbOpcode::ScatterGather));
        assert_eq!(ccb.direction, Direction::Out);
        assert_eq!(ccb.target, 12);
        assert_eq!(ccb.lun, 0x03);
        assert_eq!(ccb.data_len, 16);
        assert_eq!(ccb.data_ptr, 0x0020_0000);
        assert_eq!(ccb.sense_len(), 0);
        assert_eq!(ccb.sense_addr(0x1000), 0x0030_0000);

        let ccb = Ccb::parse(MailboxFormat::Extended32, &b, true);
        assert_eq!(ccb.lun, 0x1B);
    }

    #[test]
    fn build_legacy() {
        let mut ccb = Ccb::new(CcbOpcode::InitiatorResidual, 2, 1, &[0x08, 0, 0, 0, 1, 0]);
        ccb.direction = Direction::In;
        ccb.data_len = 0x200;
        ccb.data_ptr = 0x012000;
        assert_eq!(ccb.serialize(MailboxFormat::Legacy24).to_vec(), legacy_bytes());
    }

    #[test]
    fn unknown_opcode() {
        let mut b = legacy_bytes();
        b[0] = 0x05;
        assert_eq!(Ccb::parse(MailboxFormat::Legacy24, &b, false).opcode(), None);
    }

    #[test]
    fn sg_entries() {
        let e = SgEntry::parse(MailboxFormat::Legacy24, &[0x00, 0x01, 0x00, 0x04, 0x00, 0x00]);
        assert_eq!(e, SgEntry { len: 0x100, ptr: 0x040000 });
        assert_eq!(
            e.serialize(MailboxFormat::Extended32),
            vec![0x00, 0x01, 0, 0, 0x00, 0x00, 0x04, 0x00]
        );
    }
}
