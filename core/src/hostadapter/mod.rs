//! x54x-family SCSI host adapters (Adaptec AHA-154x and BusLogic)
//!
//! The guest drives the adapter through four byte-wide I/O ports: a
//! control/status register, a command/data byte stream, an interrupt flags
//! register and a geometry/diagnostic register. SCSI requests travel as
//! Command Control Blocks (CCBs) in guest memory, handed over through a ring
//! of outgoing mailboxes and answered through a ring of incoming mailboxes.
//! Mailboxes are serviced from [`Tickable::tick`], paced by the emulated bus
//! transfer rate.

pub mod aha154x;
pub mod bios;
pub mod buslogic;
pub mod ccb;
mod engine;
mod executor;
pub mod mailbox;
mod processor;
pub mod regs;
pub mod vendor;

#[cfg(test)]
mod tests;

use anyhow::Result;

use crate::bus::{Address, BusMember, HostBus, IrqLine, Port};
use crate::config::{AdapterConfig, AdapterModel, BusType};
use crate::hostadapter::aha154x::Aha154x;
use crate::hostadapter::buslogic::BusLogic;
use crate::hostadapter::mailbox::MailboxFormat;
use crate::hostadapter::regs::{RegInterrupt, RegStatus};
use crate::hostadapter::vendor::AdapterFamily;
use crate::scsi::ScsiBus;
use crate::tickable::{Tickable, Ticks, TICKS_PER_MSEC, TICKS_PER_USEC};

const X54X_TRACE: bool = false;

pub const CMD_NOP: u8 = 0x00;
pub const CMD_MBINIT: u8 = 0x01;
pub const CMD_START_SCSI: u8 = 0x02;
pub const CMD_BIOSCMD: u8 = 0x03;
pub const CMD_INQUIRY: u8 = 0x04;
pub const CMD_EMBOI: u8 = 0x05;
pub const CMD_SELTIMEOUT: u8 = 0x06;
pub const CMD_BUSON_TIME: u8 = 0x07;
pub const CMD_BUSOFF_TIME: u8 = 0x08;
pub const CMD_DMASPEED: u8 = 0x09;
pub const CMD_RETDEVS: u8 = 0x0A;
pub const CMD_RETCONF: u8 = 0x0B;
pub const CMD_RETSETUP: u8 = 0x0D;
pub const CMD_WRITE_CH2: u8 = 0x1A;
pub const CMD_READ_CH2: u8 = 0x1B;
pub const CMD_ECHO: u8 = 0x1F;
pub const CMD_OPTIONS: u8 = 0x21;

/// No command in progress
pub const CMD_IDLE: u8 = 0xFF;

/// Self-test busy period following a reset
pub const RESET_DURATION: Ticks = 50 * TICKS_PER_MSEC;

/// Fixed overhead of one mailbox processor pass
pub const CALLBACK_BASE: Ticks = 10 * TICKS_PER_USEC;

/// Full length of the setup data reply
pub const SETUP_DATA_LEN: usize = 45;

/// Offset of the vendor area in the setup data reply
pub const SETUP_VENDOR_OFFSET: usize = 17;

const CH2_BUF_LEN: usize = 64;

/// One mailbox ring pair as configured by the guest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxRing {
    pub init: bool,
    pub count: u32,
    pub out_addr: Address,
    pub in_addr: Address,
    pub out_cur: u32,
    pub in_cur: u32,
}

/// Engine state shared with the vendor hooks
pub struct AdapterState {
    config: AdapterConfig,

    /// Current I/O base; relocatable through PCI or POS
    base: Port,
    ports_enabled: bool,

    status: RegStatus,
    interrupt: RegInterrupt,
    /// Mailbox interrupts held back while a command-complete is latched
    pending_interrupt: u8,
    geometry: u8,
    irq_enabled: bool,
    /// Raise MBOA along with incoming mailbox interrupts
    mbo_irq: bool,

    /// Current command, [`CMD_IDLE`] when none
    command: u8,
    cmd_param: Vec<u8>,
    cmd_param_left: usize,

    data_buf: Vec<u8>,
    data_reply: usize,
    data_reply_left: usize,

    format: MailboxFormat,
    ring: MailboxRing,
    mailbox_req: u32,

    /// AHA BIOS mailbox ring (outgoing only)
    bios_ring: MailboxRing,
    bios_mailbox_req: u32,

    bus_on_time: u8,
    bus_off_time: u8,
    transfer_speed: u8,
    sel_timeout: bool,
    ch2_buf: [u8; CH2_BUF_LEN],

    /// Bytes moved over the host bus during the current pass
    temp_period: u64,
    /// Media access time accumulated during the current pass
    media_period: Ticks,
    cmd_timer: Ticks,
    reset_timer: Ticks,
}

impl AdapterState {
    fn new(config: AdapterConfig) -> Self {
        Self {
            base: config.base,
            config,
            ports_enabled: true,
            status: RegStatus::ready(),
            interrupt: RegInterrupt(0),
            pending_interrupt: 0,
            geometry: 0,
            irq_enabled: true,
            mbo_irq: false,
            command: CMD_IDLE,
            cmd_param: Vec::with_capacity(64),
            cmd_param_left: 0,
            data_buf: vec![],
            data_reply: 0,
            data_reply_left: 0,
            format: MailboxFormat::Legacy24,
            ring: MailboxRing::default(),
            mailbox_req: 0,
            bios_ring: MailboxRing::default(),
            bios_mailbox_req: 0,
            bus_on_time: 7,
            bus_off_time: 4,
            transfer_speed: 0,
            sel_timeout: true,
            ch2_buf: [0; CH2_BUF_LEN],
            temp_period: 0,
            media_period: 0,
            cmd_timer: CALLBACK_BASE,
            reset_timer: 0,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn base(&self) -> Port {
        self.base
    }

    /// Moves the register file (PCI BAR or POS programming)
    pub fn relocate(&mut self, base: Port, enabled: bool) {
        if X54X_TRACE {
            log::debug!("Relocated to {:04X} (enabled: {})", base, enabled);
        }
        self.base = base;
        self.ports_enabled = enabled;
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    /// Parameter bytes received for the current command
    pub fn params(&self) -> &[u8] {
        &self.cmd_param
    }

    pub fn set_params_left(&mut self, left: usize) {
        self.cmd_param_left = left;
    }

    /// Stages a reply for the guest to read from the data port
    pub fn reply(&mut self, data: &[u8]) {
        self.data_buf = data.to_vec();
        self.data_reply = 0;
        self.data_reply_left = data.len();
    }

    /// Flags the current command as invalid
    pub fn invalid_command(&mut self) {
        self.status.set_invcmd(true);
        self.data_reply_left = 0;
    }

    pub fn status(&self) -> RegStatus {
        self.status
    }

    pub fn interrupt(&self) -> RegInterrupt {
        self.interrupt
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled
    }

    pub fn set_irq_enabled(&mut self, enabled: bool) {
        self.irq_enabled = enabled;
    }

    pub fn format(&self) -> MailboxFormat {
        self.format
    }

    pub fn ring(&self) -> &MailboxRing {
        &self.ring
    }

    pub fn bios_ring(&self) -> &MailboxRing {
        &self.bios_ring
    }

    pub fn mailbox_req(&self) -> u32 {
        self.mailbox_req
    }

    pub fn bios_mailbox_req(&self) -> u32 {
        self.bios_mailbox_req
    }

    /// Configures the ordinary mailbox rings and leaves the INIT state
    pub fn init_mailboxes(&mut self, format: MailboxFormat, count: u32, out_addr: Address) {
        log::debug!(
            "Mailbox init: {} x {}, out {:08X}",
            count,
            <&str>::from(format),
            out_addr
        );
        self.format = format;
        self.ring = MailboxRing {
            init: true,
            count,
            out_addr,
            in_addr: format.in_ring(out_addr, count),
            out_cur: 0,
            in_cur: 0,
        };
        self.status.set_init(false);
    }

    /// Configures the AHA BIOS mailbox ring
    pub fn init_bios_mailboxes(&mut self, count: u32, out_addr: Address) {
        log::debug!("BIOS mailbox init: {}, out {:06X}", count, out_addr);
        self.bios_ring = MailboxRing {
            init: true,
            count,
            out_addr,
            in_addr: MailboxFormat::Legacy24.in_ring(out_addr, count),
            out_cur: 0,
            in_cur: 0,
        };
    }

    /// BIOS mailbox doorbell
    pub fn ring_bios_doorbell(&mut self) {
        self.bios_mailbox_req += 1;
    }
}

/// An x54x host adapter with its collaborators: the system bus `H` it is
/// plugged into and the SCSI bus `S` of targets hanging off it.
pub struct HostAdapter<H: HostBus, S: ScsiBus> {
    st: AdapterState,
    vendor: Box<dyn AdapterFamily>,
    host: H,
    scsi: S,
}

impl<H: HostBus, S: ScsiBus> HostAdapter<H, S> {
    pub fn new(config: AdapterConfig, host: H, scsi: S) -> Result<Self> {
        config.validate()?;
        let vendor: Box<dyn AdapterFamily> = if config.model.is_buslogic() {
            Box::new(BusLogic::new(&config))
        } else {
            Box::new(Aha154x::new(&config))
        };
        let mut adapter = Self {
            st: AdapterState::new(config),
            vendor,
            host,
            scsi,
        };
        adapter.reset();
        adapter.st.status = RegStatus::ready();
        log::info!(
            "{} firmware {} at {:04X}, IRQ {}, host ID {}",
            adapter.vendor.name(),
            adapter.vendor.fw_rev(),
            adapter.st.base,
            adapter.irq(),
            adapter.host_id()
        );
        Ok(adapter)
    }

    pub fn name(&self) -> &'static str {
        self.vendor.name()
    }

    pub fn fw_rev(&self) -> &'static str {
        self.vendor.fw_rev()
    }

    pub fn model(&self) -> AdapterModel {
        self.st.config.model
    }

    pub fn base(&self) -> Port {
        self.st.base
    }

    pub fn state(&self) -> &AdapterState {
        &self.st
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn scsi(&self) -> &S {
        &self.scsi
    }

    pub fn max_target_id(&self) -> u8 {
        self.vendor.max_target_id()
    }

    pub fn host_id(&self) -> u8 {
        self.vendor.host_id().unwrap_or(self.st.config.host_id)
    }

    pub fn irq(&self) -> u8 {
        self.vendor.irq().unwrap_or(self.st.config.irq)
    }

    /// ISA/MCA DMA channel; PCI boards master the bus themselves
    pub fn dma(&self) -> Option<u8> {
        match self.vendor.bus_type() {
            BusType::Pci => None,
            _ => Some(self.vendor.dma().unwrap_or(self.st.config.dma)),
        }
    }

    pub fn irq_line(&self) -> IrqLine {
        match self.vendor.bus_type() {
            BusType::Pci => IrqLine::Pci(self.st.config.pci_slot),
            _ => IrqLine::Isa(self.irq()),
        }
    }

    pub fn pci_config_read(&self, addr: u8) -> Option<u8> {
        self.vendor.pci_config_read(&self.st, addr)
    }

    pub fn pci_config_write(&mut self, addr: u8, val: u8) -> Option<()> {
        self.vendor.pci_config_write(&mut self.st, addr, val)
    }

    pub fn pos_read(&self, reg: u8) -> Option<u8> {
        self.vendor.pos_read(reg)
    }

    pub fn pos_write(&mut self, reg: u8, val: u8) -> Option<()> {
        self.vendor.pos_write(&mut self.st, reg, val)
    }

    /// Translates a port number to a register offset if this adapter decodes it
    fn decode(&self, port: Port) -> Option<u16> {
        if !self.st.ports_enabled || port < self.st.base || port > self.st.base + 3 {
            return None;
        }
        Some(port - self.st.base)
    }
}

impl<H: HostBus, S: ScsiBus> BusMember<Port> for HostAdapter<H, S> {
    fn read(&mut self, addr: Port) -> Option<u8> {
        let offset = self.decode(addr)?;
        Some(self.io_read(offset))
    }

    fn write(&mut self, addr: Port, val: u8) -> Option<()> {
        let offset = self.decode(addr)?;
        if let Err(e) = self.io_write(offset, val) {
            log::error!("{}: port {:04X} write: {:#}", self.vendor.name(), addr, e);
        }
        Some(())
    }
}

impl<H: HostBus, S: ScsiBus> Tickable for HostAdapter<H, S> {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        if self.st.reset_timer > 0 {
            if ticks >= self.st.reset_timer {
                self.st.reset_timer = 0;
                self.reset_poll();
            } else {
                self.st.reset_timer -= ticks;
            }
        }

        let mut left = ticks;
        while left >= self.st.cmd_timer {
            left -= self.st.cmd_timer;
            self.st.cmd_timer = self.callback()?;
        }
        self.st.cmd_timer -= left;

        if self.st.reset_timer > 0 {
            Ok(self.st.cmd_timer.min(self.st.reset_timer))
        } else {
            Ok(self.st.cmd_timer)
        }
    }
}
