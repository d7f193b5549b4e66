//! BIOS INT 13h passthrough (host adapter command 0x03)
//!
//! The adapter BIOS hands disk requests to the firmware as a 10-byte
//! parameter block:
//!   [0]     INT 13h function
//!   [1]     target id (7-5), lun (2-0)
//!   [2..6]  cylinder (LE16), head, sector; or a big-endian LBA
//!   [6]     sector count
//!   [7..10] 24-bit DMA address, big endian
//!
//! The reply is a single INT 13h status byte.

use anyhow::Result;

use super::*;
use crate::scsi::{ScsiPhase, CDB_LEN, STATUS_GOOD};
use crate::types::Addr24;

pub const BIOS_OK: u8 = 0x00;
pub const BIOS_INVALID: u8 = 0x01;
pub const BIOS_SECTOR_NOT_FOUND: u8 = 0x04;
pub const BIOS_TIMEOUT: u8 = 0x80;
pub const BIOS_NOT_READY: u8 = 0xAA;

pub const BIOS_RESET: u8 = 0x00;
pub const BIOS_STATUS: u8 = 0x01;
pub const BIOS_READ: u8 = 0x02;
pub const BIOS_WRITE: u8 = 0x03;
pub const BIOS_VERIFY: u8 = 0x04;
pub const BIOS_PARAMS: u8 = 0x08;
pub const BIOS_SEEK: u8 = 0x0C;
pub const BIOS_TEST_READY: u8 = 0x10;
pub const BIOS_RECALIBRATE: u8 = 0x11;
pub const BIOS_DASD_TYPE: u8 = 0x15;

const BIOS_SECTOR_SIZE: usize = 512;

/// Decoded parameter block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosRequest {
    pub command: u8,
    pub target: u8,
    pub lun: u8,
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
    pub lba: u32,
    pub count: u8,
    pub dma_addr: Address,
}

impl BiosRequest {
    pub fn parse(params: &[u8]) -> Self {
        Self {
            command: params[0],
            target: params[1] >> 5,
            lun: params[1] & 7,
            cylinder: u16::from_le_bytes([params[2], params[3]]),
            head: params[4],
            sector: params[5],
            lba: u32::from_be_bytes([params[2], params[3], params[4], params[5]]),
            count: params[6],
            dma_addr: Addr24::from_be(&params[7..10]).0,
        }
    }

    /// Logical block addressed, using the BIOS translation if in CHS mode
    pub fn block(&self, lba_mode: bool, extended: bool) -> u32 {
        if lba_mode {
            return self.lba;
        }
        let (heads, spt) = bios_geometry(extended);
        (self.cylinder as u32 * heads + self.head as u32) * spt
            + (self.sector as u32).saturating_sub(1)
    }
}

/// BIOS disk translation (heads, sectors per track)
pub const fn bios_geometry(extended: bool) -> (u32, u32) {
    if extended { (255, 63) } else { (64, 32) }
}

impl<H: HostBus, S: ScsiBus> HostAdapter<H, S> {
    /// Executes a BIOS request synchronously and returns the INT 13h status
    pub(super) fn bios_command(&mut self, params: &[u8]) -> Result<u8> {
        let req = BiosRequest::parse(params);
        let (target, lun) = (req.target, req.lun);
        log::debug!(
            "{}: BIOS command {:02X} for {}:{}",
            self.vendor.name(),
            req.command,
            target,
            lun
        );

        if target > 7 || !self.scsi.device_present(target, lun) {
            return Ok(BIOS_TIMEOUT);
        }

        let lba_mode = self.st.config.bios_lba;
        let extended = self.st.config.extended_translation;
        let block = req.block(lba_mode, extended);
        let count = req.count as u16;
        let [b0, b1, b2, b3] = block.to_be_bytes();
        let [c0, c1] = count.to_be_bytes();
        let rw10 = |op: u8| [op, 0, b0, b1, b2, b3, 0, c0, c1, 0];

        match req.command {
            BIOS_RESET => {
                self.scsi.device_reset(target, lun);
                Ok(BIOS_OK)
            }
            BIOS_STATUS | BIOS_RECALIBRATE => Ok(BIOS_OK),
            BIOS_READ => {
                let (status, data) = self.bios_scsi(target, lun, &rw10(0x28), vec![])?;
                if status != STATUS_GOOD {
                    return Ok(BIOS_SECTOR_NOT_FOUND);
                }
                self.dma_write(req.dma_addr, &data);
                Ok(BIOS_OK)
            }
            BIOS_WRITE => {
                let mut data = vec![0; count as usize * BIOS_SECTOR_SIZE];
                self.dma_read(req.dma_addr, &mut data);
                let (status, _) = self.bios_scsi(target, lun, &rw10(0x2A), data)?;
                Ok(if status == STATUS_GOOD { BIOS_OK } else { BIOS_SECTOR_NOT_FOUND })
            }
            BIOS_VERIFY => {
                let (status, _) = self.bios_scsi(target, lun, &rw10(0x2F), vec![])?;
                Ok(if status == STATUS_GOOD { BIOS_OK } else { BIOS_SECTOR_NOT_FOUND })
            }
            BIOS_PARAMS => {
                let Some(blocks) = self.bios_capacity(target, lun)? else {
                    return Ok(BIOS_NOT_READY);
                };
                let (heads, spt) = bios_geometry(extended);
                let cylinders = (blocks / (heads * spt)).min(0xFFFF) as u16;
                let [cyl_hi, cyl_lo] = cylinders.to_be_bytes();
                self.dma_write(req.dma_addr, &[cyl_hi, cyl_lo, heads as u8, spt as u8, 0, 0]);
                Ok(BIOS_OK)
            }
            BIOS_SEEK => match self.bios_capacity(target, lun)? {
                Some(blocks) if block < blocks => Ok(BIOS_OK),
                Some(_) => Ok(BIOS_SECTOR_NOT_FOUND),
                None => Ok(BIOS_NOT_READY),
            },
            BIOS_TEST_READY => {
                let (status, _) = self.bios_scsi(target, lun, &[0x00, 0, 0, 0, 0, 0], vec![])?;
                Ok(if status == STATUS_GOOD { BIOS_OK } else { BIOS_NOT_READY })
            }
            BIOS_DASD_TYPE => {
                let Some(blocks) = self.bios_capacity(target, lun)? else {
                    return Ok(BIOS_NOT_READY);
                };
                // Fixed disk, followed by the sector count
                let mut reply = vec![0x03];
                reply.extend_from_slice(&blocks.to_be_bytes());
                self.dma_write(req.dma_addr, &reply);
                Ok(BIOS_OK)
            }
            _ => {
                log::warn!(
                    "{}: unsupported BIOS command {:02X}",
                    self.vendor.name(),
                    req.command
                );
                Ok(BIOS_INVALID)
            }
        }
    }

    /// Runs one SCSI command for the BIOS. Returns the SCSI status and any
    /// data the target sent.
    fn bios_scsi(
        &mut self,
        target: u8,
        lun: u8,
        cdb: &[u8],
        mut outdata: Vec<u8>,
    ) -> Result<(u8, Vec<u8>)> {
        let mut c = [0; CDB_LEN];
        c[..cdb.len()].copy_from_slice(cdb);
        let (phase, len) = self.scsi.command_phase0(target, lun, &c)?;
        let data = match phase {
            ScsiPhase::Status => vec![],
            ScsiPhase::DataIn => {
                let mut buf = vec![0; len];
                self.scsi.command_phase1(target, lun, &mut buf)?;
                buf
            }
            ScsiPhase::DataOut => {
                outdata.resize(len, 0);
                self.scsi.command_phase1(target, lun, &mut outdata)?;
                vec![]
            }
        };
        Ok((self.scsi.device_status(target, lun), data))
    }

    /// Number of blocks of a target, if it answers READ CAPACITY
    fn bios_capacity(&mut self, target: u8, lun: u8) -> Result<Option<u32>> {
        let cdb = [0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let (status, data) = self.bios_scsi(target, lun, &cdb, vec![])?;
        if status != STATUS_GOOD || data.len() < 4 {
            return Ok(None);
        }
        Ok(Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]) + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_block() {
        let p = [BIOS_READ, (3 << 5) | 1, 0x02, 0x00, 0x01, 0x05, 4, 0x01, 0x80, 0x00];
        let r = BiosRequest::parse(&p);
        assert_eq!(r.target, 3);
        assert_eq!(r.lun, 1);
        assert_eq!(r.cylinder, 2);
        assert_eq!(r.head, 1);
        assert_eq!(r.sector, 5);
        assert_eq!(r.count, 4);
        assert_eq!(r.dma_addr, 0x018000);
        assert_eq!(r.lba, 0x0200_0105);
    }

    #[test]
    fn chs_translation() {
        let p = [BIOS_READ, 0, 0x02, 0x00, 0x01, 0x05, 1, 0, 0, 0];
        let r = BiosRequest::parse(&p);
        // (2 * 64 + 1) * 32 + 4
        assert_eq!(r.block(false, false), 4132);
        // (2 * 255 + 1) * 63 + 4
        assert_eq!(r.block(false, true), 32197);
        assert_eq!(r.block(true, false), 0x0200_0105);
    }
}
