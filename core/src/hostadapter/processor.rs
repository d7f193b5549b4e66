//! Mailbox processor: services outgoing mailboxes and posts completions

use anyhow::Result;
use num_traits::FromPrimitive;

use super::ccb::{
    Ccb, CcbOpcode, CCB_ABORT_NOT_FOUND, CCB_COMPLETE, CCB_INVALID_OP_CODE, CCB_LEN,
    CCB_OFFSET_HOST_STATUS, CCB_SELECTION_TIMEOUT,
};
use super::mailbox::{
    MailboxFormat, MailboxIn, MailboxOut, MboAction, MBI_ERROR, MBI_NOT_FOUND,
    MBI_SUCCESS,
};
use super::regs::{INTR_ANY, INTR_MBIF, INTR_MBOA};
use super::*;
use crate::scsi::STATUS_GOOD;

/// Which ring a mailbox came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RingKind {
    Normal,
    /// AHA BIOS ring: always 24-bit, completion goes into the CCB only
    Bios,
}

/// Offset of the BIOS completion block (completion, host, target) in a CCB
const CCB_OFFSET_BIOS_COMPLETION: Address = 0x0D;

impl<H: HostBus, S: ScsiBus> HostAdapter<H, S> {
    /// One pass of the timing glue; returns the delay until the next pass
    pub(super) fn callback(&mut self) -> Result<Ticks> {
        self.st.temp_period = 0;
        self.st.media_period = 0;

        let to_raise = self.process_mail().inspect_err(|e| {
            log::error!("{}: mailbox processing failed: {:#}", self.vendor.name(), e);
        })?;
        if to_raise != 0 {
            self.raise_irq(to_raise);
        }

        Ok(self.vendor.bus_type().transfer_time(self.st.temp_period)
            + self.st.media_period
            + CALLBACK_BASE)
    }

    /// Services at most one mailbox per ring. Returns the interrupt flags to
    /// raise once processing is complete.
    fn process_mail(&mut self) -> Result<u8> {
        let mut to_raise = 0;

        if !self.st.status.init() && self.st.ring.init && self.st.mailbox_req > 0 {
            to_raise |= self.do_mail(RingKind::Normal)?;
        }
        if self.st.bios_ring.init && self.st.bios_mailbox_req > 0 {
            to_raise |= self.do_mail(RingKind::Bios)?;
        }
        Ok(to_raise)
    }

    fn ring(&self, kind: RingKind) -> &MailboxRing {
        match kind {
            RingKind::Normal => &self.st.ring,
            RingKind::Bios => &self.st.bios_ring,
        }
    }

    fn ring_mut(&mut self, kind: RingKind) -> &mut MailboxRing {
        match kind {
            RingKind::Normal => &mut self.st.ring,
            RingKind::Bios => &mut self.st.bios_ring,
        }
    }

    fn ring_format(&self, kind: RingKind) -> MailboxFormat {
        match kind {
            RingKind::Normal => self.st.format,
            RingKind::Bios => MailboxFormat::Legacy24,
        }
    }

    fn read_mbo(&mut self, kind: RingKind, idx: u32) -> MailboxOut {
        let format = self.ring_format(kind);
        let addr = format.entry_addr(self.ring(kind).out_addr, idx);
        let mut buf = [0; 8];
        self.dma_read(addr, &mut buf[..format.entry_size()]);
        MailboxOut::parse(format, &buf)
    }

    fn do_mail(&mut self, kind: RingKind) -> Result<u8> {
        let ring = self.ring(kind).clone();
        let aggressive = kind == RingKind::Bios || self.vendor.aggressive_mode();

        let found = if aggressive {
            let mut found = None;
            for i in 0..ring.count {
                let idx = (ring.out_cur + i) % ring.count;
                let mbo = self.read_mbo(kind, idx);
                if mbo.action != MboAction::Free as u8 {
                    found = Some((idx, mbo));
                    break;
                }
            }
            if found.is_none() {
                // Doorbell with nothing posted
                self.clear_requests(kind);
            }
            found
        } else {
            let mbo = self.read_mbo(kind, ring.out_cur);
            (mbo.action != MboAction::Free as u8).then_some((ring.out_cur, mbo))
        };

        let Some((idx, mbo)) = found else {
            return Ok(0);
        };
        self.ring_mut(kind).out_cur = (idx + 1) % ring.count;
        self.free_mbo(kind, idx);

        if X54X_TRACE {
            log::debug!(
                "{}: mailbox {} ({:?}) action {:02X} CCB {:08X}",
                self.vendor.name(),
                idx,
                kind,
                mbo.action,
                mbo.ccb
            );
        }

        match MboAction::from_u8(mbo.action) {
            Some(MboAction::Start) => self.req_setup(kind, mbo.ccb),
            Some(MboAction::Abort) if kind == RingKind::Normal => {
                self.req_abort(mbo.ccb);
                Ok(self.mbi_raise_flags(kind))
            }
            _ => {
                log::warn!(
                    "{}: ignoring mailbox action {:02X}",
                    self.vendor.name(),
                    mbo.action
                );
                Ok(0)
            }
        }
    }

    fn clear_requests(&mut self, kind: RingKind) {
        match kind {
            RingKind::Normal => self.st.mailbox_req = 0,
            RingKind::Bios => self.st.bios_mailbox_req = 0,
        }
    }

    /// Hands an outgoing mailbox back to the guest
    fn free_mbo(&mut self, kind: RingKind, idx: u32) {
        let format = self.ring_format(kind);
        let addr = format
            .entry_addr(self.ring(kind).out_addr, idx)
            .wrapping_add(format.code_offset() as Address);
        self.dma_write(addr, &[MboAction::Free as u8]);
        match kind {
            RingKind::Normal => self.st.mailbox_req = self.st.mailbox_req.saturating_sub(1),
            RingKind::Bios => {
                self.st.bios_mailbox_req = self.st.bios_mailbox_req.saturating_sub(1)
            }
        }
    }

    /// Validates a started CCB and executes it
    fn req_setup(&mut self, kind: RingKind, ccb_addr: Address) -> Result<u8> {
        let format = self.ring_format(kind);
        let mut bytes = [0; CCB_LEN];
        self.dma_read(ccb_addr, &mut bytes);
        let ccb = Ccb::parse(format, &bytes, self.vendor.extended_lun());

        if X54X_TRACE {
            log::debug!(
                "{}: CCB {:08X}: opcode {:02X} {}:{} {:?} CDB {:02X?}",
                self.vendor.name(),
                ccb_addr,
                ccb.opcode,
                ccb.target,
                ccb.lun,
                ccb.direction,
                &ccb.cdb[..(ccb.cdb_len as usize).min(ccb.cdb.len())]
            );
        }

        let max_id = self.vendor.max_target_id();
        if ccb.target > max_id || ccb.lun > 7 {
            log::debug!(
                "{}: selection of {}:{} out of range",
                self.vendor.name(),
                ccb.target,
                ccb.lun
            );
            self.mbi(kind, ccb_addr, CCB_SELECTION_TIMEOUT, STATUS_GOOD, MBI_ERROR);
            return Ok(self.mbi_raise_flags(kind));
        }
        if !self.scsi.device_present(ccb.target, ccb.lun) {
            log::debug!(
                "{}: no device at {}:{}",
                self.vendor.name(),
                ccb.target,
                ccb.lun
            );
            self.mbi(kind, ccb_addr, CCB_SELECTION_TIMEOUT, STATUS_GOOD, MBI_ERROR);
            return Ok(self.mbi_raise_flags(kind));
        }

        match ccb.opcode() {
            None => {
                log::warn!(
                    "{}: invalid CCB opcode {:02X}",
                    self.vendor.name(),
                    ccb.opcode
                );
                self.mbi(kind, ccb_addr, CCB_INVALID_OP_CODE, STATUS_GOOD, MBI_ERROR);
            }
            Some(CcbOpcode::BusDeviceReset) => {
                self.scsi.device_reset(ccb.target, ccb.lun);
                self.mbi(kind, ccb_addr, CCB_COMPLETE, STATUS_GOOD, MBI_SUCCESS);
            }
            Some(opcode) => {
                let c = self.execute(format, ccb_addr, &ccb, opcode)?;
                self.mbi(kind, ccb_addr, c.host_status, c.target_status, c.completion);
            }
        }
        Ok(self.mbi_raise_flags(kind))
    }

    /// Abort requests are answered "not found"
    fn req_abort(&mut self, ccb_addr: Address) {
        log::debug!("{}: abort CCB {:08X}", self.vendor.name(), ccb_addr);
        self.mbi(
            RingKind::Normal,
            ccb_addr,
            CCB_ABORT_NOT_FOUND,
            STATUS_GOOD,
            MBI_NOT_FOUND,
        );
    }

    /// Interrupt flags to raise after posting a completion
    fn mbi_raise_flags(&self, kind: RingKind) -> u8 {
        match kind {
            RingKind::Normal if self.st.mbo_irq => INTR_MBIF | INTR_MBOA | INTR_ANY,
            RingKind::Normal => INTR_MBIF | INTR_ANY,
            RingKind::Bios if self.st.mbo_irq => INTR_MBOA | INTR_ANY,
            RingKind::Bios => 0,
        }
    }

    /// Posts a completion
    fn mbi(
        &mut self,
        kind: RingKind,
        ccb_addr: Address,
        host_status: u8,
        target_status: u8,
        completion: u8,
    ) {
        if X54X_TRACE {
            log::debug!(
                "{}: completion {:02X} for CCB {:08X}: host {:02X} target {:02X}",
                self.vendor.name(),
                completion,
                ccb_addr,
                host_status,
                target_status
            );
        }

        if kind == RingKind::Bios {
            self.dma_write(
                ccb_addr.wrapping_add(CCB_OFFSET_BIOS_COMPLETION),
                &[completion, host_status, target_status],
            );
            return;
        }

        if completion != MBI_NOT_FOUND {
            self.dma_write(
                ccb_addr.wrapping_add(CCB_OFFSET_HOST_STATUS),
                &[host_status, target_status],
            );
        }

        let format = self.st.format;
        let ring = &mut self.st.ring;
        let addr = format.entry_addr(ring.in_addr, ring.in_cur);
        ring.in_cur = (ring.in_cur + 1) % ring.count;
        let entry = MailboxIn {
            ccb: ccb_addr,
            host_status,
            target_status,
            completion,
        };
        self.dma_write(addr, &entry.serialize(format));
    }
}
