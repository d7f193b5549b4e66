//! SCSI target generic/shared code

use anyhow::Result;
use std::path::Path;

use crate::scsi::{
    fixed_sense, ScsiCmdResult, ASC_INVALID_COMMAND, ASC_INVALID_FIELD_IN_CDB,
    ASC_LBA_OUT_OF_RANGE, CC_KEY_ILLEGAL_REQUEST, SENSE_LEN, STATUS_CHECK_CONDITION, STATUS_GOOD,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq, strum::Display)]
/// Enumeration of supported emulated SCSI target types (devices)
pub enum ScsiTargetType {
    Disk,
}

/// An abstraction of a generic SCSI target
pub trait ScsiTarget: Send {
    fn target_type(&self) -> ScsiTargetType;
    fn unit_ready(&mut self) -> Result<ScsiCmdResult>;
    fn inquiry(&mut self, cmd: &[u8]) -> Result<ScsiCmdResult>;
    fn mode_sense(&mut self, page: u8) -> Option<Vec<u8>>;

    /// Request sense result (code, asc)
    fn req_sense(&self) -> (u8, u16);

    /// Latches a check condition for the next REQUEST SENSE
    fn set_cc(&mut self, code: u8, asc: u16);

    // For block devices
    fn blocksize(&self) -> Option<usize>;
    fn blocks(&self) -> Option<usize>;
    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8>;
    fn write(&mut self, block_offset: usize, data: &[u8]);

    /// Device-specific commands
    fn specific_cmd(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult>;

    /// Backing image file, if any
    fn image_fn(&self) -> Option<&Path> {
        None
    }

    /// Bus device reset / power-on state
    fn reset(&mut self) {
        self.set_cc(0, 0);
    }

    /// Returns the drives total capacity in bytes
    fn capacity(&self) -> Option<usize> {
        Some(self.blocksize()? * self.blocks()?)
    }

    /// Fixed-format sense data for the current check condition
    fn sense(&self) -> [u8; SENSE_LEN] {
        let (key, asc) = self.req_sense();
        fixed_sense(key, asc)
    }

    /// Fails the current command with ILLEGAL REQUEST
    fn illegal_request(&mut self, asc: u16) -> Result<ScsiCmdResult> {
        self.set_cc(CC_KEY_ILLEGAL_REQUEST, asc);
        Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION))
    }

    /// Validates a block range, latching LBA OUT OF RANGE if it does not fit
    fn check_range(&mut self, blocknum: usize, blockcnt: usize) -> Option<usize> {
        let blocks = self.blocks()?;
        if blocknum + blockcnt > blocks {
            log::warn!(
                "Access beyond end of medium: block {} + {} > {}",
                blocknum,
                blockcnt,
                blocks
            );
            self.set_cc(CC_KEY_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE);
            return None;
        }
        Some(blocks)
    }

    fn cmd_read(&mut self, blocknum: usize, blockcnt: usize) -> Result<ScsiCmdResult> {
        if self.blocks().is_none() {
            log::warn!("READ command to non-block device");
            return self.illegal_request(ASC_INVALID_COMMAND);
        }
        if self.check_range(blocknum, blockcnt).is_none() {
            return Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
        }
        self.set_cc(0, 0);
        Ok(ScsiCmdResult::DataIn(self.read(blocknum, blockcnt)))
    }

    fn cmd_write(
        &mut self,
        blocknum: usize,
        blockcnt: usize,
        outdata: Option<&[u8]>,
    ) -> Result<ScsiCmdResult> {
        let Some(blocksize) = self.blocksize() else {
            log::warn!("WRITE command to non-block device");
            return self.illegal_request(ASC_INVALID_COMMAND);
        };
        if self.check_range(blocknum, blockcnt).is_none() {
            return Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
        }
        match outdata {
            Some(data) => {
                self.write(blocknum, data);
                self.set_cc(0, 0);
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            None => Ok(ScsiCmdResult::DataOut(blockcnt * blocksize)),
        }
    }

    fn cmd(&mut self, cmd: &[u8], outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        match cmd[0] {
            0x00 => {
                // TEST UNIT READY
                self.unit_ready()
            }
            0x03 => {
                // REQUEST SENSE
                let mut result = self.sense().to_vec();
                result.truncate(cmd[4] as usize);
                self.set_cc(0, 0);
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x04 => {
                // FORMAT UNIT(6)
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x08 => {
                // READ(6)
                let blocknum = (u32::from_be_bytes(cmd[0..4].try_into()?) & 0x1F_FFFF) as usize;
                let blockcnt = if cmd[4] == 0 { 256 } else { cmd[4] as usize };
                self.cmd_read(blocknum, blockcnt)
            }
            0x0A => {
                // WRITE(6)
                let blocknum = (u32::from_be_bytes(cmd[0..4].try_into()?) & 0x1F_FFFF) as usize;
                let blockcnt = if cmd[4] == 0 { 256 } else { cmd[4] as usize };
                self.cmd_write(blocknum, blockcnt, outdata)
            }
            0x12 => {
                // INQUIRY
                match self.inquiry(cmd)? {
                    ScsiCmdResult::DataIn(mut result) => {
                        result.truncate(cmd[4] as usize);
                        Ok(ScsiCmdResult::DataIn(result))
                    }
                    r => Ok(r),
                }
            }
            0x15 => {
                // MODE SELECT(6)
                match outdata {
                    Some(_) => Ok(ScsiCmdResult::Status(STATUS_GOOD)),
                    None => Ok(ScsiCmdResult::DataOut(cmd[4] as usize)),
                }
            }
            0x1A => {
                // MODE SENSE(6)
                let page = cmd[2] & 0x3F;
                let mut result = vec![0; 4];
                if page == 0x3F {
                    for p in 0..0x3F {
                        if let Some(data) = self.mode_sense(p) {
                            result.extend(data);
                        }
                    }
                } else if let Some(data) = self.mode_sense(page) {
                    result.extend(data);
                } else {
                    log::warn!("Unsupported mode sense page {:02X}", page);
                    return self.illegal_request(ASC_INVALID_FIELD_IN_CDB);
                }
                // Mode data length excludes itself
                result[0] = (result.len() - 1) as u8;
                result.truncate(cmd[4] as usize);
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x1B => {
                // START STOP UNIT
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            0x25 => {
                // READ CAPACITY(10)
                let mut result = vec![0; 8];
                let (Some(blocksize), Some(blocks)) = (self.blocksize(), self.blocks()) else {
                    log::warn!("READ CAPACITY(10) command to non-block device");
                    return self.illegal_request(ASC_INVALID_COMMAND);
                };

                result[0..4].copy_from_slice(&((blocks as u32).saturating_sub(1)).to_be_bytes());
                result[4..8].copy_from_slice(&(blocksize as u32).to_be_bytes());
                Ok(ScsiCmdResult::DataIn(result))
            }
            0x28 => {
                // READ(10)
                let blocknum = (u32::from_be_bytes(cmd[2..6].try_into()?)) as usize;
                let blockcnt = (u16::from_be_bytes(cmd[7..9].try_into()?)) as usize;
                self.cmd_read(blocknum, blockcnt)
            }
            0x2A => {
                // WRITE(10)
                let blocknum = (u32::from_be_bytes(cmd[2..6].try_into()?)) as usize;
                let blockcnt = (u16::from_be_bytes(cmd[7..9].try_into()?)) as usize;
                self.cmd_write(blocknum, blockcnt, outdata)
            }
            0x2F => {
                // VERIFY(10)
                let blocknum = (u32::from_be_bytes(cmd[2..6].try_into()?)) as usize;
                let blockcnt = (u16::from_be_bytes(cmd[7..9].try_into()?)) as usize;
                if self.check_range(blocknum, blockcnt).is_none() {
                    return Ok(ScsiCmdResult::Status(STATUS_CHECK_CONDITION));
                }
                Ok(ScsiCmdResult::Status(STATUS_GOOD))
            }
            _ => self.specific_cmd(cmd, outdata),
        }
    }
}
