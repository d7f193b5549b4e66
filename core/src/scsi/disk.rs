//! SCSI hard disk drive (block device)

use anyhow::Result;
use std::path::Path;

use crate::scsi::disk_image::{DiskImage, FileDiskImage, MemoryDiskImage};
use crate::scsi::target::{ScsiTarget, ScsiTargetType};
use crate::scsi::{ScsiCmdResult, ASC_INVALID_COMMAND, STATUS_GOOD};

pub const DISK_BLOCKSIZE: usize = 512;

pub struct ScsiTargetDisk {
    /// Disk contents
    disk: Box<dyn DiskImage>,

    /// Check condition code
    cc_code: u8,

    /// Check condition ASC
    cc_asc: u16,
}

impl ScsiTargetDisk {
    /// Try to load a disk image, given the filename of the image.
    pub fn load_disk(filename: &Path) -> Result<Self> {
        Ok(Self::from_image(Box::new(FileDiskImage::open_block_sized(
            filename,
            DISK_BLOCKSIZE,
        )?)))
    }

    /// Disk backed by an in-memory copy of `contents`, padded to whole blocks
    pub fn from_bytes(mut contents: Vec<u8>) -> Self {
        let padded = contents.len().next_multiple_of(DISK_BLOCKSIZE);
        contents.resize(padded, 0);
        Self::from_image(Box::new(MemoryDiskImage::new(contents)))
    }

    pub fn from_image(disk: Box<dyn DiskImage>) -> Self {
        Self {
            disk,
            cc_code: 0,
            cc_asc: 0,
        }
    }
}

impl ScsiTarget for ScsiTargetDisk {
    fn target_type(&self) -> ScsiTargetType {
        ScsiTargetType::Disk
    }

    fn image_fn(&self) -> Option<&Path> {
        self.disk.image_path()
    }

    fn req_sense(&self) -> (u8, u16) {
        (self.cc_code, self.cc_asc)
    }

    fn set_cc(&mut self, code: u8, asc: u16) {
        self.cc_code = code;
        self.cc_asc = asc;
    }

    fn unit_ready(&mut self) -> Result<ScsiCmdResult> {
        Ok(ScsiCmdResult::Status(STATUS_GOOD))
    }

    fn inquiry(&mut self, _cmd: &[u8]) -> Result<ScsiCmdResult> {
        let mut result = vec![0; 36];

        // 0 Peripheral qualifier (5-7), peripheral device type (4-0)
        result[0] = 0; // Magnetic disk
        // Device Type Modifier
        result[1] = 0;

        // SCSI version compliance
        result[2] = 0x02; // ANSI-2
        result[3] = 0x02; // ANSI-2

        // 4 Additional length (N-4), min. 32
        result[4] = result.len() as u8 - 4;

        // 8..16 Vendor identification
        result[8..16].copy_from_slice(b"VARCEM  ");

        // 16..32 Product identification
        result[16..32].copy_from_slice(b"VIRTUAL HDD     ");

        // 32..36 Revision
        result[32..36].copy_from_slice(b"1.0 ");

        Ok(ScsiCmdResult::DataIn(result))
    }

    fn mode_sense(&mut self, page: u8) -> Option<Vec<u8>> {
        match page {
            0x01 => {
                // Read/write error recovery page
                Some(vec![
                    0x01,        // Page code
                    0x0A,        // Page length
                    0b1100_0000, // DCR, DTE, PER, EER, RC, TB, ARRE, AWRE
                    8,           // Read retry count
                    0,           // Correction span
                    0,           // Head offset count
                    0,           // Data strobe offset count
                    0,           // Reserved
                    0,           // Write retry count
                    0,           // Reserved
                    0,           // Recovery time limit (MSB)
                    0,           // Recovery time limit (LSB)
                ])
            }
            0x03 => {
                // Format device page
                let mut result = vec![0; 0x18];
                result[0] = 0x03;
                result[1] = 0x16;
                // Sectors per track
                result[10..12].copy_from_slice(&32u16.to_be_bytes());
                // Bytes per physical sector
                result[12..14].copy_from_slice(&(DISK_BLOCKSIZE as u16).to_be_bytes());
                Some(result)
            }
            0x04 => {
                // Rigid disk geometry page, 64 heads
                let cylinders = self.blocks().unwrap_or(0) / (64 * 32);
                let mut result = vec![0; 0x18];
                result[0] = 0x04;
                result[1] = 0x16;
                result[2..5].copy_from_slice(&(cylinders as u32).to_be_bytes()[1..4]);
                result[5] = 64;
                Some(result)
            }
            _ => None,
        }
    }

    fn blocksize(&self) -> Option<usize> {
        Some(DISK_BLOCKSIZE)
    }

    fn blocks(&self) -> Option<usize> {
        Some(self.disk.byte_len() / DISK_BLOCKSIZE)
    }

    fn read(&self, block_offset: usize, block_count: usize) -> Vec<u8> {
        self.disk
            .read_bytes(block_offset * DISK_BLOCKSIZE, block_count * DISK_BLOCKSIZE)
    }

    fn write(&mut self, block_offset: usize, data: &[u8]) {
        self.disk.write_bytes(block_offset * DISK_BLOCKSIZE, data);
    }

    fn specific_cmd(&mut self, cmd: &[u8], _outdata: Option<&[u8]>) -> Result<ScsiCmdResult> {
        log::warn!("Unknown command {:02X}", cmd[0]);
        self.illegal_request(ASC_INVALID_COMMAND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scsi::{STATUS_CHECK_CONDITION, CC_KEY_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE};

    fn disk() -> ScsiTargetDisk {
        let mut contents = vec![0; 4 * DISK_BLOCKSIZE];
        contents[DISK_BLOCKSIZE..2 * DISK_BLOCKSIZE].fill(0x5A);
        ScsiTargetDisk::from_bytes(contents)
    }

    #[test]
    fn read10() {
        let mut d = disk();
        let Ok(ScsiCmdResult::DataIn(data)) =
            d.cmd(&[0x28, 0, 0, 0, 0, 1, 0, 0, 1, 0], None)
        else {
            panic!("expected data in");
        };
        assert_eq!(data.len(), DISK_BLOCKSIZE);
        assert!(data.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn read_beyond_end() {
        let mut d = disk();
        let Ok(ScsiCmdResult::Status(s)) = d.cmd(&[0x28, 0, 0, 0, 0, 3, 0, 0, 2, 0], None) else {
            panic!("expected status");
        };
        assert_eq!(s, STATUS_CHECK_CONDITION);
        assert_eq!(d.req_sense(), (CC_KEY_ILLEGAL_REQUEST, ASC_LBA_OUT_OF_RANGE));

        // REQUEST SENSE reports and clears
        let Ok(ScsiCmdResult::DataIn(sense)) = d.cmd(&[0x03, 0, 0, 0, 14, 0], None) else {
            panic!("expected sense");
        };
        assert_eq!(sense[2], CC_KEY_ILLEGAL_REQUEST);
        assert_eq!(d.req_sense(), (0, 0));
    }

    #[test]
    fn write6_two_phase() {
        let mut d = disk();
        let cdb = [0x0A, 0, 0, 3, 1, 0];
        let Ok(ScsiCmdResult::DataOut(len)) = d.cmd(&cdb, None) else {
            panic!("expected data out");
        };
        assert_eq!(len, DISK_BLOCKSIZE);
        let data = vec![0xC3; len];
        assert!(matches!(
            d.cmd(&cdb, Some(&data)),
            Ok(ScsiCmdResult::Status(STATUS_GOOD))
        ));
        assert!(d.read(3, 1).iter().all(|&b| b == 0xC3));
    }

    #[test]
    fn inquiry_allocation_length() {
        let mut d = disk();
        let Ok(ScsiCmdResult::DataIn(data)) = d.cmd(&[0x12, 0, 0, 0, 5, 0], None) else {
            panic!("expected data in");
        };
        assert_eq!(data.len(), 5);
        assert_eq!(data[4], 32);
    }

    #[test]
    fn read_capacity() {
        let mut d = disk();
        let Ok(ScsiCmdResult::DataIn(data)) = d.cmd(&[0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0], None)
        else {
            panic!("expected data in");
        };
        assert_eq!(&data[0..4], &3u32.to_be_bytes());
        assert_eq!(&data[4..8], &512u32.to_be_bytes());
    }
}
