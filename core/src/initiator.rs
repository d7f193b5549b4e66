//! Guest-side driver for an x54x host adapter
//!
//! Talks to the adapter the way an ASPI driver does: byte-wide commands
//! through the register file, CCBs and mailbox rings in guest memory.

use anyhow::{bail, Result};

use crate::bus::{Address, HostBus};
use crate::hostadapter::buslogic::CMD_MBINIT_EXT;
use crate::hostadapter::ccb::{Ccb, SgEntry};
use crate::hostadapter::mailbox::{MailboxFormat, MailboxIn, MailboxOut, MboAction, MBI_FREE};
use crate::hostadapter::regs::{RegControl, RegInterrupt, RegStatus};
use crate::hostadapter::regs::{PORT_CMD_DATA, PORT_CTRL_STAT, PORT_INTR};
use crate::hostadapter::{HostAdapter, CMD_MBINIT, CMD_START_SCSI, RESET_DURATION};
use crate::scsi::ScsiBus;
use crate::tickable::{Tickable, Ticks, TICKS_PER_SECOND};
use crate::types::Addr24;

/// Completion wait limit in virtual time
pub const COMPLETION_TIMEOUT: Ticks = TICKS_PER_SECOND;

fn status<H: HostBus, S: ScsiBus>(adapter: &mut HostAdapter<H, S>) -> RegStatus {
    RegStatus(adapter.io_read(PORT_CTRL_STAT))
}

/// Acknowledges any pending interrupt
pub fn ack<H: HostBus, S: ScsiBus>(adapter: &mut HostAdapter<H, S>) -> Result<()> {
    if RegInterrupt(adapter.io_read(PORT_INTR)).any() {
        adapter.io_write(PORT_CTRL_STAT, RegControl(0).with_irst(true).0)?;
    }
    Ok(())
}

/// Hard reset, waiting out the self-test
pub fn hard_reset<H: HostBus, S: ScsiBus>(adapter: &mut HostAdapter<H, S>) -> Result<()> {
    adapter.io_write(PORT_CTRL_STAT, RegControl(0).with_hrst(true).0)?;
    adapter.tick(RESET_DURATION)?;
    let st = status(adapter);
    if st.stst() || !st.idle() {
        bail!("Adapter did not finish self-test (status {:02X})", st.0);
    }
    Ok(())
}

/// Issues a host adapter command and collects its reply
pub fn command<H: HostBus, S: ScsiBus>(
    adapter: &mut HostAdapter<H, S>,
    opcode: u8,
    params: &[u8],
) -> Result<Vec<u8>> {
    if !status(adapter).idle() {
        bail!("Adapter busy, cannot issue command {:02X}", opcode);
    }

    for &b in std::iter::once(&opcode).chain(params) {
        adapter.io_write(PORT_CMD_DATA, b)?;
        if status(adapter).invcmd() {
            ack(adapter)?;
            bail!("Command {:02X} rejected", opcode);
        }
    }

    let mut reply = vec![];
    while status(adapter).df() {
        reply.push(adapter.io_read(PORT_CMD_DATA));
    }
    ack(adapter)?;
    Ok(reply)
}

/// Mailbox rings in guest memory, as seen from the driver
pub struct Initiator {
    format: MailboxFormat,
    out_addr: Address,
    in_addr: Address,
    count: u32,
    out_cur: u32,
    in_cur: u32,
}

impl Initiator {
    /// Sets up `count` mailbox pairs at `out_addr`
    pub fn init<H: HostBus, S: ScsiBus>(
        adapter: &mut HostAdapter<H, S>,
        format: MailboxFormat,
        count: u8,
        out_addr: Address,
    ) -> Result<Self> {
        let ring_len = 2 * count as usize * format.entry_size();
        adapter.host_mut().dma_write(out_addr, &vec![0; ring_len]);

        match format {
            MailboxFormat::Legacy24 => {
                let [a0, a1, a2] = Addr24(out_addr).to_be();
                command(adapter, CMD_MBINIT, &[count, a0, a1, a2])?;
            }
            MailboxFormat::Extended32 => {
                let [a0, a1, a2, a3] = out_addr.to_le_bytes();
                command(adapter, CMD_MBINIT_EXT, &[count, a0, a1, a2, a3])?;
            }
        }

        Ok(Self {
            format,
            out_addr,
            in_addr: format.in_ring(out_addr, count as u32),
            count: count as u32,
            out_cur: 0,
            in_cur: 0,
        })
    }

    pub fn format(&self) -> MailboxFormat {
        self.format
    }

    /// Address of outgoing entry `idx`
    pub fn out_entry(&self, idx: u32) -> Address {
        self.format.entry_addr(self.out_addr, idx)
    }

    /// Address of incoming entry `idx`
    pub fn in_entry(&self, idx: u32) -> Address {
        self.format.entry_addr(self.in_addr, idx)
    }

    /// Writes a CCB into guest memory
    pub fn write_ccb<H: HostBus, S: ScsiBus>(
        &self,
        adapter: &mut HostAdapter<H, S>,
        addr: Address,
        ccb: &Ccb,
    ) {
        adapter
            .host_mut()
            .dma_write(addr, &ccb.serialize(self.format));
    }

    /// Writes a scatter/gather list into guest memory
    pub fn write_sg_list<H: HostBus, S: ScsiBus>(
        &self,
        adapter: &mut HostAdapter<H, S>,
        addr: Address,
        entries: &[SgEntry],
    ) {
        let list: Vec<u8> = entries
            .iter()
            .flat_map(|e| e.serialize(self.format))
            .collect();
        adapter.host_mut().dma_write(addr, &list);
    }

    /// Places a mailbox in the next outgoing slot and rings the doorbell
    pub fn post<H: HostBus, S: ScsiBus>(
        &mut self,
        adapter: &mut HostAdapter<H, S>,
        ccb: Address,
        action: MboAction,
    ) -> Result<()> {
        let mbo = MailboxOut {
            ccb,
            action: action as u8,
        };
        let addr = self.out_entry(self.out_cur);
        adapter.host_mut().dma_write(addr, &mbo.serialize(self.format));
        self.out_cur = (self.out_cur + 1) % self.count;
        adapter.io_write(PORT_CMD_DATA, CMD_START_SCSI)
    }

    /// Runs the adapter until the next incoming mailbox is filled, frees it
    /// and acknowledges the interrupt
    pub fn wait<H: HostBus, S: ScsiBus>(
        &mut self,
        adapter: &mut HostAdapter<H, S>,
    ) -> Result<MailboxIn> {
        let addr = self.in_entry(self.in_cur);
        let size = self.format.entry_size();
        let code_addr = addr + self.format.code_offset() as Address;
        let mut elapsed = 0;
        let mut next = 0;

        loop {
            let mut code = [0];
            adapter.host_mut().dma_read(code_addr, &mut code);
            if code[0] != MBI_FREE {
                break;
            }
            if elapsed > COMPLETION_TIMEOUT {
                bail!("No completion in incoming mailbox {}", self.in_cur);
            }
            next = adapter.tick(next)?;
            elapsed += next;
        }

        let mut buf = vec![0; size];
        adapter.host_mut().dma_read(addr, &mut buf);
        adapter.host_mut().dma_write(code_addr, &[MBI_FREE]);
        self.in_cur = (self.in_cur + 1) % self.count;
        ack(adapter)?;
        Ok(MailboxIn::parse(self.format, &buf))
    }

    /// Posts a start request for the CCB at `addr` and waits for it
    pub fn execute<H: HostBus, S: ScsiBus>(
        &mut self,
        adapter: &mut HostAdapter<H, S>,
        addr: Address,
        ccb: &Ccb,
    ) -> Result<MailboxIn> {
        self.write_ccb(adapter, addr, ccb);
        self.post(adapter, addr, MboAction::Start)?;
        self.wait(adapter)
    }
}
