//! Mailbox ring entries as they sit in guest memory
//!
//! 24-bit entries (4 bytes):
//!   [0]     action / completion code
//!   [1..4]  CCB pointer, big endian
//!
//! 32-bit entries (8 bytes):
//!   [0..4]  CCB pointer, little endian
//!   [4]     host status (incoming only)
//!   [5]     target status (incoming only)
//!   [7]     action / completion code

use num_derive::FromPrimitive;

use crate::bus::Address;
use crate::types::{le32, Addr24};

/// Outgoing mailbox action codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MboAction {
    Free = 0,
    Start = 1,
    Abort = 2,
}

pub const MBI_FREE: u8 = 0x00;
pub const MBI_SUCCESS: u8 = 0x01;
pub const MBI_NOT_FOUND: u8 = 0x03;
pub const MBI_ERROR: u8 = 0x04;

/// Entry layout negotiated by the mailbox initialization command
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum MailboxFormat {
    /// Adaptec-compatible, 24-bit big-endian pointers
    Legacy24,
    /// BusLogic extended, 32-bit little-endian pointers
    Extended32,
}

impl MailboxFormat {
    pub const fn entry_size(self) -> usize {
        match self {
            Self::Legacy24 => 4,
            Self::Extended32 => 8,
        }
    }

    /// Offset of the action/completion code within an entry
    pub const fn code_offset(self) -> usize {
        match self {
            Self::Legacy24 => 0,
            Self::Extended32 => 7,
        }
    }

    /// Address of entry `idx` of a ring at `base`
    pub const fn entry_addr(self, base: Address, idx: u32) -> Address {
        base.wrapping_add(idx * self.entry_size() as u32)
    }

    /// Incoming ring directly follows `count` outgoing entries
    pub const fn in_ring(self, out_base: Address, count: u32) -> Address {
        self.entry_addr(out_base, count)
    }
}

/// Outgoing mailbox entry (guest -> adapter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxOut {
    pub ccb: Address,
    /// Raw action code; unknown values are kept so they can be logged
    pub action: u8,
}

impl MailboxOut {
    pub fn parse(format: MailboxFormat, bytes: &[u8]) -> Self {
        match format {
            MailboxFormat::Legacy24 => Self {
                action: bytes[0],
                ccb: Addr24::from_be(&bytes[1..4]).0,
            },
            MailboxFormat::Extended32 => Self {
                ccb: le32(bytes, 0),
                action: bytes[7],
            },
        }
    }

    pub fn serialize(&self, format: MailboxFormat) -> Vec<u8> {
        let mut out = vec![0; format.entry_size()];
        match format {
            MailboxFormat::Legacy24 => {
                out[0] = self.action;
                out[1..4].copy_from_slice(&Addr24(self.ccb).to_be());
            }
            MailboxFormat::Extended32 => {
                out[0..4].copy_from_slice(&self.ccb.to_le_bytes());
                out[7] = self.action;
            }
        }
        out
    }
}

/// Incoming mailbox entry (adapter -> guest)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxIn {
    pub ccb: Address,
    pub host_status: u8,
    pub target_status: u8,
    pub completion: u8,
}

impl MailboxIn {
    /// The 24-bit layout has no room for the statuses; they only reach the
    /// guest through the CCB.
    pub fn serialize(&self, format: MailboxFormat) -> Vec<u8> {
        let mut out = vec![0; format.entry_size()];
        match format {
            MailboxFormat::Legacy24 => {
                out[0] = self.completion;
                out[1..4].copy_from_slice(&Addr24(self.ccb).to_be());
            }
            MailboxFormat::Extended32 => {
                out[0..4].copy_from_slice(&self.ccb.to_le_bytes());
                out[4] = self.host_status;
                out[5] = self.target_status;
                out[7] = self.completion;
            }
        }
        out
    }

    pub fn parse(format: MailboxFormat, bytes: &[u8]) -> Self {
        match format {
            MailboxFormat::Legacy24 => Self {
                completion: bytes[0],
                ccb: Addr24::from_be(&bytes[1..4]).0,
                host_status: 0,
                target_status: 0,
            },
            MailboxFormat::Extended32 => Self {
                ccb: le32(bytes, 0),
                host_status: bytes[4],
                target_status: bytes[5],
                completion: bytes[7],
            },
        }
    }
}
