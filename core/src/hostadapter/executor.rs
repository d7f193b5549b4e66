//! SCSI command executor: runs one CCB against the device layer

use anyhow::{bail, Result};

use super::ccb::{
    Ccb, CcbOpcode, Direction, SgEntry, CCB_COMPLETE, CCB_INVALID_DIRECTION, CCB_OFFSET_RESIDUE,
};
use super::mailbox::{MailboxFormat, MBI_ERROR, MBI_SUCCESS};
use super::*;
use crate::fault::AdapterFault;
use crate::scsi::{ScsiPhase, CMD_REQUEST_SENSE, SENSE_LEN, STATUS_GOOD};
use crate::types::Addr24;

/// Media time per byte for devices that do not model their own
const MEDIA_TICKS_PER_BYTE: Ticks = 100;

/// Scatter/gather lists longer than this are truncated
const MAX_SG_ENTRIES: usize = 8192;

/// Outcome of a CCB as reported to the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Completion {
    pub host_status: u8,
    pub target_status: u8,
    pub completion: u8,
}

impl Completion {
    const fn invalid_direction() -> Self {
        Self {
            host_status: CCB_INVALID_DIRECTION,
            target_status: STATUS_GOOD,
            completion: MBI_ERROR,
        }
    }
}

impl<H: HostBus, S: ScsiBus> HostAdapter<H, S> {
    /// Executes a validated CCB located at `ccb_addr`
    pub(super) fn execute(
        &mut self,
        format: MailboxFormat,
        ccb_addr: Address,
        ccb: &Ccb,
        opcode: CcbOpcode,
    ) -> Result<Completion> {
        let (target, lun) = (ccb.target, ccb.lun);
        if !self.scsi.device_present(target, lun) {
            bail!(AdapterFault::TargetVanished { target, lun });
        }

        let segments = self.segments(format, ccb, opcode);
        let expected: usize = segments.iter().map(|s| s.len as usize).sum();

        let cdb = ccb.cdb();
        let (phase, buf_len) = self.scsi.command_phase0(target, lun, &cdb)?;
        let mut transferred = 0;

        match phase {
            ScsiPhase::Status => (),
            _ if cdb[0] == CMD_REQUEST_SENSE && ccb.direction == Direction::NoData => {
                // Sense goes straight to the sense buffer
                let mut buf = vec![0; buf_len];
                self.scsi.command_phase1(target, lun, &mut buf)?;
                let len = ccb.sense_len().min(buf_len);
                if len > 0 {
                    self.dma_write(ccb.sense_addr(ccb_addr), &buf[..len]);
                }
            }
            ScsiPhase::DataIn if matches!(ccb.direction, Direction::Out | Direction::NoData) => {
                log::warn!(
                    "{}: {}:{} wants data in, CCB direction {:?}",
                    self.vendor.name(),
                    target,
                    lun,
                    ccb.direction
                );
                self.scsi.command_abort(target, lun);
                return Ok(Completion::invalid_direction());
            }
            ScsiPhase::DataOut if matches!(ccb.direction, Direction::In | Direction::NoData) => {
                log::warn!(
                    "{}: {}:{} wants data out, CCB direction {:?}",
                    self.vendor.name(),
                    target,
                    lun,
                    ccb.direction
                );
                self.scsi.command_abort(target, lun);
                return Ok(Completion::invalid_direction());
            }
            ScsiPhase::DataOut => {
                self.add_media_period(target, lun, buf_len);
                let mut buf = vec![0; buf_len];
                transferred = self.buf_dma_transfer(&segments, &mut buf, false);
                self.scsi.command_phase1(target, lun, &mut buf)?;
            }
            ScsiPhase::DataIn => {
                self.add_media_period(target, lun, buf_len);
                let mut buf = vec![0; buf_len];
                self.scsi.command_phase1(target, lun, &mut buf)?;
                transferred = self.buf_dma_transfer(&segments, &mut buf, true);
            }
        }

        let status = self.scsi.device_status(target, lun);
        if status != STATUS_GOOD {
            self.write_sense(ccb_addr, ccb);
        }
        if opcode.reports_residual() {
            self.write_residue(format, ccb_addr, ccb, expected, transferred);
        }

        Ok(if status == STATUS_GOOD {
            Completion {
                host_status: CCB_COMPLETE,
                target_status: STATUS_GOOD,
                completion: MBI_SUCCESS,
            }
        } else {
            Completion {
                host_status: CCB_COMPLETE,
                target_status: status,
                completion: MBI_ERROR,
            }
        })
    }

    /// Host memory regions described by the CCB
    fn segments(&mut self, format: MailboxFormat, ccb: &Ccb, opcode: CcbOpcode) -> Vec<SgEntry> {
        if ccb.data_len == 0 || ccb.direction == Direction::NoData {
            return vec![];
        }

        match opcode {
            CcbOpcode::ScatterGather | CcbOpcode::ScatterGatherResidual => {
                let size = SgEntry::size(format);
                let count = ccb.data_len as usize / size;
                let leftover = ccb.data_len as usize % size;
                if leftover != 0 {
                    log::warn!(
                        "{}: scatter/gather list length {} leaves {} trailing bytes",
                        self.vendor.name(),
                        ccb.data_len,
                        leftover
                    );
                }
                let mut entries = vec![];
                for offset in (0..count * size).step_by(size) {
                    if entries.len() == MAX_SG_ENTRIES {
                        log::warn!(
                            "{}: scatter/gather list truncated at {} entries",
                            self.vendor.name(),
                            MAX_SG_ENTRIES
                        );
                        break;
                    }
                    let mut buf = [0; 8];
                    self.dma_read(
                        ccb.data_ptr.wrapping_add(offset as Address),
                        &mut buf[..size],
                    );
                    entries.push(SgEntry::parse(format, &buf));
                }
                entries
            }
            CcbOpcode::Initiator | CcbOpcode::InitiatorResidual => vec![SgEntry {
                len: ccb.data_len,
                ptr: ccb.data_ptr,
            }],
            _ => vec![],
        }
    }

    /// Moves data between host memory and the device buffer, segment by
    /// segment, stopping at whichever runs out first. Returns the byte count.
    fn buf_dma_transfer(&mut self, segments: &[SgEntry], buf: &mut [u8], to_host: bool) -> usize {
        let mut done = 0;
        for seg in segments {
            let len = (seg.len as usize).min(buf.len() - done);
            if len == 0 {
                continue;
            }
            let chunk = &mut buf[done..(done + len)];
            if to_host {
                self.dma_write(seg.ptr, chunk);
            } else {
                self.dma_read(seg.ptr, chunk);
            }
            done += len;
            if done == buf.len() {
                break;
            }
        }
        done
    }

    fn add_media_period(&mut self, target: u8, lun: u8, bytes: usize) {
        self.st.media_period += self
            .scsi
            .access_latency(target, lun, bytes)
            .unwrap_or(bytes as Ticks * MEDIA_TICKS_PER_BYTE);
    }

    fn write_sense(&mut self, ccb_addr: Address, ccb: &Ccb) {
        let len = ccb.sense_len();
        if len == 0 {
            return;
        }
        let sense = self.scsi.device_sense(ccb.target, ccb.lun);
        let mut buf = vec![0; len];
        let n = len.min(SENSE_LEN);
        buf[..n].copy_from_slice(&sense[..n]);
        self.dma_write(ccb.sense_addr(ccb_addr), &buf);
    }

    fn write_residue(
        &mut self,
        format: MailboxFormat,
        ccb_addr: Address,
        ccb: &Ccb,
        expected: usize,
        transferred: usize,
    ) {
        let residue = if expected > 0 && ccb.direction != Direction::NoData {
            expected.saturating_sub(transferred) as u32
        } else {
            0
        };
        if X54X_TRACE {
            log::debug!("{}: residue {}", self.vendor.name(), residue);
        }

        let addr = ccb_addr.wrapping_add(CCB_OFFSET_RESIDUE);
        match format {
            MailboxFormat::Legacy24 => self.dma_write(addr, &Addr24(residue).to_be()),
            MailboxFormat::Extended32 => self.dma_write(addr, &residue.to_le_bytes()),
        }
    }
}
