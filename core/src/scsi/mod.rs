//! SCSI target layer: the devices hanging off a host adapter's SCSI bus
//!
//! The host adapter talks to this layer through [`ScsiBus`], a two-phase
//! command protocol. Phase 0 submits the CDB and tells the adapter which bus
//! phase follows and how large the data buffer is; phase 1 moves the data
//! (or completes immediately for status-only commands).

pub mod disk;
pub mod disk_image;
pub mod target;
pub mod targets;

use anyhow::Result;

use crate::tickable::Ticks;

pub const STATUS_GOOD: u8 = 0;
pub const STATUS_CHECK_CONDITION: u8 = 2;

pub const CC_KEY_ILLEGAL_REQUEST: u8 = 0x05;

pub const ASC_INVALID_COMMAND: u16 = 0x2000;
pub const ASC_LBA_OUT_OF_RANGE: u16 = 0x2100;
pub const ASC_INVALID_FIELD_IN_CDB: u16 = 0x2400;
pub const ASC_LUN_NOT_SUPPORTED: u16 = 0x2500;

/// Maximum CDB length handed to targets
pub const CDB_LEN: usize = 12;

/// Length of the fixed-format sense data returned by targets
pub const SENSE_LEN: usize = 14;

/// REQUEST SENSE operation code
pub const CMD_REQUEST_SENSE: u8 = 0x03;

/// Length of a CDB, derived from the group code in its operation code
pub const fn scsi_cmd_len(cmdnum: u8) -> Option<usize> {
    match cmdnum >> 5 {
        0 => Some(6),
        1 | 2 => Some(10),
        5 => Some(12),
        _ => None,
    }
}

/// Result of a command
pub enum ScsiCmdResult {
    /// Immediately turn to the Status phase
    Status(u8),
    /// Returns data to the initiator
    DataIn(Vec<u8>),
    /// Expects data written to target
    DataOut(usize),
}

/// Bus phase following the command phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum ScsiPhase {
    Status,
    /// Target -> Initiator
    DataIn,
    /// Initiator -> Target
    DataOut,
}

/// Builds fixed-format sense data from a sense key and ASC/ASCQ pair
pub fn fixed_sense(key: u8, asc: u16) -> [u8; SENSE_LEN] {
    let mut sense = [0; SENSE_LEN];
    // Current error, fixed format
    sense[0] = 0x70;
    sense[2] = key & 0x0F;
    // Additional sense length
    sense[7] = (SENSE_LEN - 8) as u8;
    sense[12..14].copy_from_slice(&asc.to_be_bytes());
    sense
}

/// Device layer as consumed by a host adapter, addressed per target/LUN
pub trait ScsiBus {
    fn device_present(&self, target: u8, lun: u8) -> bool;
    fn device_reset(&mut self, target: u8, lun: u8);

    /// Submits a CDB. Returns the phase the target enters next and the
    /// length of the data buffer it expects to fill or consume.
    fn command_phase0(&mut self, target: u8, lun: u8, cdb: &[u8; CDB_LEN])
    -> Result<(ScsiPhase, usize)>;

    /// Moves data for the command started in phase 0. `buffer` is exactly as
    /// long as phase 0 announced: filled by the target for DataIn, consumed
    /// for DataOut.
    fn command_phase1(&mut self, target: u8, lun: u8, buffer: &mut [u8]) -> Result<()>;

    /// Abandons a command after phase 0 without moving any data
    fn command_abort(&mut self, target: u8, lun: u8);

    fn device_status(&self, target: u8, lun: u8) -> u8;
    fn device_sense(&self, target: u8, lun: u8) -> [u8; SENSE_LEN];

    /// Media access time for a transfer of `bytes`, if the device models one
    fn access_latency(&self, _target: u8, _lun: u8, _bytes: usize) -> Option<Ticks> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_len() {
        assert_eq!(scsi_cmd_len(0x08), Some(6));
        assert_eq!(scsi_cmd_len(0x28), Some(10));
        assert_eq!(scsi_cmd_len(0x5A), Some(10));
        assert_eq!(scsi_cmd_len(0xA8), Some(12));
        assert_eq!(scsi_cmd_len(0xC0), None);
    }

    #[test]
    fn sense_layout() {
        let s = fixed_sense(CC_KEY_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE);
        assert_eq!(s[0], 0x70);
        assert_eq!(s[2], 0x05);
        assert_eq!(s[7], 6);
        assert_eq!(s[12], 0x21);
        assert_eq!(s[13], 0x00);
    }
}
