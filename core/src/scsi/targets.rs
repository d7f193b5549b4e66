//! Device layer of one host adapter: targets addressed by ID and LUN

use std::path::Path;

use anyhow::{bail, Result};

use crate::fault::AdapterFault;
use crate::scsi::disk::ScsiTargetDisk;
use crate::scsi::target::{ScsiTarget, ScsiTargetType};
use crate::scsi::{
    fixed_sense, scsi_cmd_len, ScsiBus, ScsiCmdResult, ScsiPhase, ASC_LUN_NOT_SUPPORTED,
    CC_KEY_ILLEGAL_REQUEST, CDB_LEN, SENSE_LEN, STATUS_CHECK_CONDITION, STATUS_GOOD,
};

const TARGETS_TRACE: bool = false;

/// Command state between phase 0 and phase 1
#[derive(Default)]
enum Pending {
    #[default]
    None,
    DataIn(Vec<u8>),
    DataOut { cdb: Vec<u8>, len: usize },
}

struct Slot {
    target: Box<dyn ScsiTarget>,
    status: u8,
    pending: Pending,
}

pub struct ScsiTargets {
    slots: Vec<Option<Slot>>,
}

impl ScsiTargets {
    pub const MAX_TARGETS: usize = 16;
    pub const MAX_LUNS: usize = 8;

    pub fn new() -> Self {
        Self {
            slots: (0..(Self::MAX_TARGETS * Self::MAX_LUNS))
                .map(|_| None)
                .collect(),
        }
    }

    fn index(id: u8, lun: u8) -> Option<usize> {
        let (id, lun) = (id as usize, lun as usize);
        (id < Self::MAX_TARGETS && lun < Self::MAX_LUNS).then_some(id * Self::MAX_LUNS + lun)
    }

    fn slot(&self, id: u8, lun: u8) -> Option<&Slot> {
        Self::index(id, lun).and_then(|i| self.slots[i].as_ref())
    }

    fn slot_mut(&mut self, id: u8, lun: u8) -> Option<&mut Slot> {
        Self::index(id, lun).and_then(|i| self.slots[i].as_mut())
    }

    /// Attaches a target at the given ID/LUN, replacing whatever was there
    pub fn attach(&mut self, id: u8, lun: u8, target: Box<dyn ScsiTarget>) -> Result<()> {
        let Some(idx) = Self::index(id, lun) else {
            bail!("SCSI ID/LUN out of range: {}:{}", id, lun);
        };
        self.slots[idx] = Some(Slot {
            target,
            status: STATUS_GOOD,
            pending: Pending::None,
        });
        Ok(())
    }

    /// Loads a disk image (filename) and attaches a hard drive at the given ID/LUN
    pub fn attach_hdd_at(&mut self, filename: &Path, id: u8, lun: u8) -> Result<()> {
        if !filename.exists() {
            bail!("File {} does not exist", filename.to_string_lossy());
        }
        self.attach(id, lun, Box::new(ScsiTargetDisk::load_disk(filename)?))
    }

    /// Attaches a hard drive backed by an in-memory image
    pub fn attach_hdd_from_bytes(&mut self, contents: Vec<u8>, id: u8, lun: u8) -> Result<()> {
        self.attach(id, lun, Box::new(ScsiTargetDisk::from_bytes(contents)))
    }

    /// Returns the capacity of a target or None if detached or no media
    pub fn get_disk_capacity(&self, id: u8, lun: u8) -> Option<usize> {
        self.slot(id, lun).and_then(|s| s.target.capacity())
    }

    /// Returns the image filename of a target or None if detached or not file-backed
    pub fn get_disk_imagefn(&self, id: u8, lun: u8) -> Option<&Path> {
        self.slot(id, lun).and_then(|s| s.target.image_fn())
    }

    pub fn get_target_type(&self, id: u8, lun: u8) -> Option<ScsiTargetType> {
        self.slot(id, lun).map(|s| s.target.target_type())
    }

    /// Runs a command against the target and records the resulting state
    fn run(slot: &mut Slot, cdb: &[u8], outdata: Option<&[u8]>) -> Result<(ScsiPhase, usize)> {
        match slot.target.cmd(cdb, outdata)? {
            ScsiCmdResult::Status(s) => {
                slot.status = s;
                Ok((ScsiPhase::Status, 0))
            }
            ScsiCmdResult::DataIn(data) if data.is_empty() => {
                slot.status = STATUS_GOOD;
                Ok((ScsiPhase::Status, 0))
            }
            ScsiCmdResult::DataIn(data) => {
                slot.status = STATUS_GOOD;
                let len = data.len();
                slot.pending = Pending::DataIn(data);
                Ok((ScsiPhase::DataIn, len))
            }
            ScsiCmdResult::DataOut(0) => {
                // Zero-length data out is legal
                Self::run(slot, cdb, Some(&[]))
            }
            ScsiCmdResult::DataOut(len) => {
                slot.status = STATUS_GOOD;
                slot.pending = Pending::DataOut {
                    cdb: cdb.to_vec(),
                    len,
                };
                Ok((ScsiPhase::DataOut, len))
            }
        }
    }
}

impl Default for ScsiTargets {
    fn default() -> Self {
        Self::new()
    }
}

impl ScsiBus for ScsiTargets {
    fn device_present(&self, target: u8, lun: u8) -> bool {
        self.slot(target, lun).is_some()
    }

    fn device_reset(&mut self, target: u8, lun: u8) {
        if let Some(slot) = self.slot_mut(target, lun) {
            slot.target.reset();
            slot.status = STATUS_GOOD;
            slot.pending = Pending::None;
        }
    }

    fn command_phase0(
        &mut self,
        target: u8,
        lun: u8,
        cdb: &[u8; CDB_LEN],
    ) -> Result<(ScsiPhase, usize)> {
        let Some(slot) = self.slot_mut(target, lun) else {
            bail!(AdapterFault::TargetVanished { target, lun });
        };
        if !matches!(slot.pending, Pending::None) {
            bail!(AdapterFault::CommandInProgress { target, lun });
        }

        let cdb = &cdb[..scsi_cmd_len(cdb[0]).unwrap_or(CDB_LEN)];
        if TARGETS_TRACE {
            log::debug!("SCSI {}:{} command: {:02X?}", target, lun, cdb);
        }
        Self::run(slot, cdb, None)
    }

    fn command_phase1(&mut self, target: u8, lun: u8, buffer: &mut [u8]) -> Result<()> {
        let Some(slot) = self.slot_mut(target, lun) else {
            bail!(AdapterFault::TargetVanished { target, lun });
        };

        match std::mem::take(&mut slot.pending) {
            Pending::None => Ok(()),
            Pending::DataIn(data) => {
                if buffer.len() > data.len() {
                    bail!(AdapterFault::BufferOverrun {
                        requested: buffer.len(),
                        available: data.len(),
                    });
                }
                buffer.copy_from_slice(&data[..buffer.len()]);
                Ok(())
            }
            Pending::DataOut { cdb, len } => {
                if buffer.len() < len {
                    bail!(AdapterFault::BufferUnderrun {
                        requested: buffer.len(),
                        expected: len,
                    });
                }
                if let (ScsiPhase::Status, _) = Self::run(slot, &cdb, Some(&buffer[..len]))? {
                    Ok(())
                } else {
                    bail!("Target {}:{} requested a second data phase", target, lun);
                }
            }
        }
    }

    fn command_abort(&mut self, target: u8, lun: u8) {
        if let Some(slot) = self.slot_mut(target, lun) {
            slot.pending = Pending::None;
        }
    }

    fn device_status(&self, target: u8, lun: u8) -> u8 {
        self.slot(target, lun)
            .map_or(STATUS_CHECK_CONDITION, |s| s.status)
    }

    fn device_sense(&self, target: u8, lun: u8) -> [u8; SENSE_LEN] {
        match self.slot(target, lun) {
            Some(s) => s.target.sense(),
            None => fixed_sense(CC_KEY_ILLEGAL_REQUEST, ASC_LUN_NOT_SUPPORTED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cdb(bytes: &[u8]) -> [u8; CDB_LEN] {
        let mut c = [0; CDB_LEN];
        c[..bytes.len()].copy_from_slice(bytes);
        c
    }

    fn bus() -> ScsiTargets {
        let mut t = ScsiTargets::new();
        t.attach_hdd_from_bytes((0..2048).map(|i| (i / 512) as u8).collect(), 2, 0)
            .unwrap();
        t
    }

    #[test]
    fn presence() {
        let t = bus();
        assert!(t.device_present(2, 0));
        assert!(!t.device_present(2, 1));
        assert!(!t.device_present(3, 0));
        assert!(!t.device_present(16, 0));
        assert_eq!(t.get_disk_capacity(2, 0), Some(2048));
        assert_eq!(t.get_target_type(2, 0), Some(ScsiTargetType::Disk));
    }

    #[test]
    fn data_in_two_phase() {
        let mut t = bus();
        let (phase, len) = t
            .command_phase0(2, 0, &cdb(&[0x28, 0, 0, 0, 0, 2, 0, 0, 1, 0]))
            .unwrap();
        assert_eq!(phase, ScsiPhase::DataIn);
        assert_eq!(len, 512);
        let mut buf = vec![0; len];
        t.command_phase1(2, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 2));
        assert_eq!(t.device_status(2, 0), STATUS_GOOD);
    }

    #[test]
    fn data_out_two_phase() {
        let mut t = bus();
        let write = cdb(&[0x2A, 0, 0, 0, 0, 1, 0, 0, 1, 0]);
        let (phase, len) = t.command_phase0(2, 0, &write).unwrap();
        assert_eq!(phase, ScsiPhase::DataOut);
        let mut buf = vec![0xEE; len];
        t.command_phase1(2, 0, &mut buf).unwrap();

        let (_, len) = t
            .command_phase0(2, 0, &cdb(&[0x28, 0, 0, 0, 0, 1, 0, 0, 1, 0]))
            .unwrap();
        let mut buf = vec![0; len];
        t.command_phase1(2, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn check_condition_sense() {
        let mut t = bus();
        let (phase, _) = t
            .command_phase0(2, 0, &cdb(&[0x28, 0, 0, 0, 0, 9, 0, 0, 1, 0]))
            .unwrap();
        assert_eq!(phase, ScsiPhase::Status);
        assert_eq!(t.device_status(2, 0), STATUS_CHECK_CONDITION);
        assert_eq!(t.device_sense(2, 0)[2], CC_KEY_ILLEGAL_REQUEST);

        t.device_reset(2, 0);
        assert_eq!(t.device_status(2, 0), STATUS_GOOD);
        assert_eq!(t.device_sense(2, 0)[2], 0);
    }

    #[test]
    fn command_in_progress_fault() {
        let mut t = bus();
        let read = cdb(&[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0]);
        t.command_phase0(2, 0, &read).unwrap();
        let err = t.command_phase0(2, 0, &read).unwrap_err();
        assert_eq!(
            err.downcast_ref::<AdapterFault>(),
            Some(&AdapterFault::CommandInProgress { target: 2, lun: 0 })
        );

        t.command_abort(2, 0);
        assert!(t.command_phase0(2, 0, &read).is_ok());
    }

    #[test]
    fn vanished_target_fault() {
        let mut t = bus();
        let err = t
            .command_phase0(5, 0, &cdb(&[0x00, 0, 0, 0, 0, 0]))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterFault>(),
            Some(AdapterFault::TargetVanished { target: 5, lun: 0 })
        ));
    }

    #[test]
    fn overrun_fault() {
        let mut t = bus();
        let (_, len) = t
            .command_phase0(2, 0, &cdb(&[0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0]))
            .unwrap();
        let mut buf = vec![0; len + 1];
        let err = t.command_phase1(2, 0, &mut buf).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterFault>(),
            Some(AdapterFault::BufferOverrun { .. })
        ));
    }
}
