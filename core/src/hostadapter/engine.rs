//! Register file protocol: command intake, replies, interrupts and reset

use anyhow::Result;

use super::regs::{
    RegControl, RegInterrupt, RegStatus, INTR_ANY, INTR_HACC, INTR_MBIF, INTR_MBOA, INTR_RSTS,
    PORT_CMD_DATA, PORT_CTRL_STAT, PORT_INTR,
};
use super::vendor::VendorOutcome;
use super::*;
use crate::hostadapter::mailbox::MailboxFormat;
use crate::scsi::ScsiBus;
use crate::types::Addr24;

/// Geometry register read sequence of boards without a writable one
const GEOMETRY_SIGNATURE: [u8; 4] = [b'A', b'D', b'A', b'P'];

impl<H: HostBus, S: ScsiBus> HostAdapter<H, S> {
    /// Reads a register by offset from the I/O base
    pub fn io_read(&mut self, offset: u16) -> u8 {
        let val = match offset & 3 {
            PORT_CTRL_STAT => self.st.status.0,
            PORT_CMD_DATA => {
                let val = self
                    .st
                    .data_buf
                    .get(self.st.data_reply)
                    .copied()
                    .unwrap_or(0);
                if self.st.data_reply_left > 0 {
                    self.st.data_reply += 1;
                    self.st.data_reply_left -= 1;
                    if self.st.data_reply_left == 0 {
                        self.cmd_done(false);
                    }
                }
                val
            }
            PORT_INTR => {
                if self.vendor.regs_writable() {
                    self.st.interrupt.0
                } else {
                    self.st.interrupt.0 & !0x70
                }
            }
            _ => {
                if self.vendor.regs_writable() {
                    self.st.geometry
                } else {
                    let val = GEOMETRY_SIGNATURE[(self.st.geometry & 3) as usize] ^ 1;
                    self.st.geometry = (self.st.geometry + 1) & 3;
                    val
                }
            }
        };
        if X54X_TRACE {
            log::debug!("{}: read {} = {:02X}", self.vendor.name(), offset, val);
        }
        val
    }

    /// Writes a register by offset from the I/O base
    pub fn io_write(&mut self, offset: u16, val: u8) -> Result<()> {
        if X54X_TRACE {
            log::debug!("{}: write {} = {:02X}", self.vendor.name(), offset, val);
        }
        match offset & 3 {
            PORT_CTRL_STAT => self.write_control(RegControl(val)),
            PORT_CMD_DATA => self.write_command(val)?,
            PORT_INTR => {
                if self.vendor.regs_writable() {
                    self.st.interrupt = RegInterrupt(val);
                }
            }
            _ => {
                if self.vendor.regs_writable() {
                    self.st.geometry = val;
                }
            }
        }
        Ok(())
    }

    fn write_control(&mut self, ctrl: RegControl) {
        if ctrl.hrst() {
            log::debug!("{}: hard reset", self.vendor.name());
            self.reset_ctrl(true);
        } else if ctrl.srst() {
            log::debug!("{}: soft reset", self.vendor.name());
            self.reset_ctrl(false);
        }

        if ctrl.irst() {
            self.clear_irq();
        }

        if ctrl.scrst() {
            log::debug!("{}: SCSI bus reset", self.vendor.name());
            self.reset_targets();
            self.raise_irq(INTR_RSTS);
        }
    }

    fn write_command(&mut self, val: u8) -> Result<()> {
        if self.st.command == CMD_IDLE {
            if val == CMD_START_SCSI {
                // Doorbell: does not occupy the command slot
                self.st.mailbox_req += 1;
                return Ok(());
            }
            if self.vendor.fast_command(&mut self.st, val) {
                return Ok(());
            }

            self.st.command = val;
            self.st.cmd_param.clear();
            self.st.cmd_param_left = self.param_len(val);
            self.st.status.set_invcmd(false);
            self.st.status.set_idle(false);
            if X54X_TRACE {
                log::debug!(
                    "{}: command {:02X}, {} parameters",
                    self.vendor.name(),
                    val,
                    self.st.cmd_param_left
                );
            }
        } else if self.st.cmd_param_left > 0 {
            self.st.cmd_param.push(val);
            self.st.cmd_param_left -= 1;
            if self.st.command == CMD_OPTIONS && self.st.cmd_param.len() == 1 {
                // Count byte followed by that many option bytes
                self.st.cmd_param_left = val as usize;
            }
            self.vendor.command_phase1(&mut self.st);
        } else {
            log::warn!(
                "{}: byte {:02X} written while command {:02X} awaits completion",
                self.vendor.name(),
                val,
                self.st.command
            );
            return Ok(());
        }

        if self.st.cmd_param_left == 0 {
            self.dispatch()?;
        }
        Ok(())
    }

    fn param_len(&self, cmd: u8) -> usize {
        match cmd {
            CMD_MBINIT => 4,
            CMD_BIOSCMD => 10,
            CMD_EMBOI | CMD_BUSON_TIME | CMD_BUSOFF_TIME | CMD_DMASPEED | CMD_RETSETUP
            | CMD_ECHO | CMD_OPTIONS => 1,
            CMD_SELTIMEOUT => 4,
            CMD_WRITE_CH2 | CMD_READ_CH2 => 3,
            CMD_NOP | CMD_INQUIRY | CMD_RETDEVS | CMD_RETCONF => 0,
            _ => self.vendor.param_len(cmd),
        }
    }

    /// Runs the current command once all parameters have arrived
    fn dispatch(&mut self) -> Result<()> {
        let mut suppress = false;
        self.st.data_reply_left = 0;
        let params = self.st.cmd_param.clone();

        match self.st.command {
            CMD_NOP => (),
            CMD_MBINIT => {
                let count = params[0] as u32;
                if self.vendor.mailbox_locked() {
                    log::warn!("{}: mailbox init while locked", self.vendor.name());
                    self.st.invalid_command();
                } else if count == 0 {
                    log::warn!("{}: mailbox init with zero entries", self.vendor.name());
                    self.st.invalid_command();
                } else {
                    let addr = Addr24::from_be(&params[1..4]).0;
                    self.st.init_mailboxes(MailboxFormat::Legacy24, count, addr);
                }
            }
            CMD_BIOSCMD => {
                let status = self.bios_command(&params)?;
                self.st.reply(&[status]);
            }
            CMD_INQUIRY => {
                let mut reply = [0; 4];
                for (r, c) in reply.iter_mut().zip(self.vendor.fw_rev().bytes()) {
                    *r = c;
                }
                self.st.reply(&reply);
            }
            CMD_EMBOI => {
                if params[0] <= 1 {
                    self.st.mbo_irq = params[0] == 1;
                    suppress = true;
                } else {
                    self.st.invalid_command();
                }
            }
            CMD_SELTIMEOUT => {
                self.st.sel_timeout = params[0] & 1 != 0;
            }
            CMD_BUSON_TIME => self.st.bus_on_time = params[0],
            CMD_BUSOFF_TIME => self.st.bus_off_time = params[0],
            CMD_DMASPEED => self.st.transfer_speed = params[0],
            CMD_RETDEVS => {
                let host_id = self.host_id();
                let mut reply = [0; 8];
                for (id, r) in reply.iter_mut().enumerate() {
                    let id = id as u8;
                    if id == host_id {
                        continue;
                    }
                    for lun in 0..8 {
                        if self.scsi.device_present(id, lun) {
                            *r |= 1 << lun;
                        }
                    }
                }
                self.st.reply(&reply);
            }
            CMD_RETCONF => {
                let dma = self.dma().map_or(0, |d| 1 << d);
                let irq = match self.irq() {
                    irq @ 9..=15 => 1 << (irq - 9),
                    _ => 0,
                };
                let host_id = self.host_id();
                self.st.reply(&[dma, irq, host_id]);
            }
            CMD_RETSETUP => {
                let data = self.setup_data();
                let mut reply = vec![0; params[0] as usize];
                let len = reply.len().min(SETUP_DATA_LEN);
                reply[..len].copy_from_slice(&data[..len]);
                self.st.reply(&reply);
            }
            CMD_WRITE_CH2 => {
                let addr = Addr24::from_be(&params[0..3]).0;
                let mut buf = [0; CH2_BUF_LEN];
                self.dma_read(addr, &mut buf);
                self.st.ch2_buf = buf;
            }
            CMD_READ_CH2 => {
                let addr = Addr24::from_be(&params[0..3]).0;
                let buf = self.st.ch2_buf;
                self.dma_write(addr, &buf);
            }
            CMD_ECHO => self.st.reply(&[params[0]]),
            CMD_OPTIONS => (),
            _ => match self.vendor.command(&mut self.st, &self.scsi) {
                VendorOutcome::Done => (),
                VendorOutcome::SuppressIrq => suppress = true,
                VendorOutcome::Invalid => {
                    log::warn!(
                        "{}: invalid command {:02X}",
                        self.vendor.name(),
                        self.st.command
                    );
                    self.st.invalid_command();
                }
            },
        }

        if self.st.data_reply_left > 0 {
            self.st.status.set_df(true);
        } else {
            self.cmd_done(suppress);
        }
        Ok(())
    }

    /// Returns to idle and signals command completion
    fn cmd_done(&mut self, suppress: bool) {
        self.st.data_reply = 0;
        self.st.status.set_idle(true);
        self.st.status.set_df(false);
        if !suppress {
            self.raise_irq(INTR_HACC);
        }
        self.st.command = CMD_IDLE;
        self.st.cmd_param.clear();
        self.st.cmd_param_left = 0;
    }

    /// Standard setup data; the vendor fills in bytes 17 onwards
    fn setup_data(&self) -> [u8; SETUP_DATA_LEN] {
        let mut data = [0; SETUP_DATA_LEN];
        data[1] = self.st.transfer_speed;
        data[2] = self.st.bus_on_time;
        data[3] = self.st.bus_off_time;
        data[4] = self.st.ring.count as u8;
        data[5..8].copy_from_slice(&Addr24(self.st.ring.out_addr).to_be());
        self.vendor
            .setup_data(&self.st, &mut data[SETUP_VENDOR_OFFSET..]);
        data
    }

    /// Latches interrupt flags and asserts the line.
    ///
    /// Mailbox interrupts arriving while a command-complete interrupt is
    /// latched are held until the guest acknowledges it.
    pub(super) fn raise_irq(&mut self, bits: u8) {
        if bits & (INTR_MBIF | INTR_MBOA) != 0 && self.st.interrupt.hacc() {
            self.st.pending_interrupt |= bits | INTR_ANY;
            return;
        }
        self.st.interrupt.0 |= bits;
        self.st.interrupt.set_any(true);

        if self.st.irq_enabled {
            let line = self.irq_line();
            self.host.raise_irq(line, self.vendor.interrupt_type());
        }
    }

    /// Interrupt reset: drops the line and delivers any held-back flags
    fn clear_irq(&mut self) {
        self.st.interrupt = RegInterrupt(0);
        let line = self.irq_line();
        self.host.clear_irq(line);

        let pending = std::mem::take(&mut self.st.pending_interrupt);
        if pending != 0 {
            self.st.interrupt = RegInterrupt(pending);
            if self.st.irq_enabled && (self.st.mbo_irq || pending & INTR_MBOA == 0) {
                self.host.raise_irq(line, self.vendor.interrupt_type());
            }
        }
    }

    /// Discards all protocol and mailbox state
    pub(super) fn reset(&mut self) {
        // Held-back flags are discarded, not redelivered
        self.st.pending_interrupt = 0;
        self.clear_irq();
        let st = &mut self.st;
        st.geometry = if self.vendor.regs_writable() { 0x80 } else { 0 };
        st.command = CMD_IDLE;
        st.cmd_param.clear();
        st.cmd_param_left = 0;
        st.data_buf.clear();
        st.data_reply = 0;
        st.data_reply_left = 0;
        st.format = MailboxFormat::Legacy24;
        st.ring = MailboxRing::default();
        st.bios_ring = MailboxRing::default();
        st.mailbox_req = 0;
        st.bios_mailbox_req = 0;
        st.irq_enabled = true;
        st.mbo_irq = false;
        self.vendor.reset(&mut self.st);
    }

    /// Reset from the control register; the adapter stays busy in self-test
    /// for [`RESET_DURATION`].
    fn reset_ctrl(&mut self, hard: bool) {
        self.reset();
        if hard {
            self.reset_targets();
        }
        self.st.status = RegStatus(0).with_stst(true);
        self.st.reset_timer = RESET_DURATION;
    }

    /// End of the self-test period
    pub(super) fn reset_poll(&mut self) {
        self.st.status = RegStatus::ready();
    }

    fn reset_targets(&mut self) {
        for id in 0..=self.vendor.max_target_id() {
            for lun in 0..8 {
                if self.scsi.device_present(id, lun) {
                    self.scsi.device_reset(id, lun);
                }
            }
        }
    }

    /// Guest memory read, accounted against the current pass
    pub(super) fn dma_read(&mut self, addr: Address, buf: &mut [u8]) {
        self.st.temp_period += buf.len() as u64;
        self.host.dma_read(addr, buf);
    }

    /// Guest memory write, accounted against the current pass
    pub(super) fn dma_write(&mut self, addr: Address, data: &[u8]) {
        self.st.temp_period += data.len() as u64;
        self.host.dma_write(addr, data);
    }
}
