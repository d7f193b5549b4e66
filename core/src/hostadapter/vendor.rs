//! Extension points for the adapter families built on the shared engine

use crate::bus::IrqTrigger;
use crate::config::BusType;
use crate::hostadapter::AdapterState;
use crate::scsi::ScsiBus;

/// Result of a vendor command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorOutcome {
    /// Command handled; completes with a command-complete interrupt unless a
    /// reply was staged
    Done,
    /// Command handled; completes without raising an interrupt
    SuppressIrq,
    /// Not a command of this model
    Invalid,
}

/// Model-specific behavior layered on top of the x54x engine.
///
/// Every hook has a default meaning "feature not present on this model".
pub trait AdapterFamily: Send {
    fn name(&self) -> &'static str;

    /// Firmware revision string; INQUIRY reports the first four characters
    fn fw_rev(&self) -> &'static str;

    fn bus_type(&self) -> BusType;

    fn max_target_id(&self) -> u8 {
        7
    }

    /// Parameter count of a command the engine does not know
    fn param_len(&self, _cmd: u8) -> usize {
        0
    }

    /// Runs the current command once all its parameters have arrived
    fn command(&mut self, _st: &mut AdapterState, _scsi: &dyn ScsiBus) -> VendorOutcome {
        VendorOutcome::Invalid
    }

    /// Inspects a byte written while idle, before it becomes a command.
    /// Returns true if it was consumed.
    fn fast_command(&mut self, _st: &mut AdapterState, _val: u8) -> bool {
        false
    }

    /// Called after each parameter byte; may adjust the remaining count
    fn command_phase1(&mut self, _st: &mut AdapterState) {}

    /// Vendor state cleared on adapter reset
    fn reset(&mut self, _st: &mut AdapterState) {}

    /// Identity held in NVRAM, EEPROM or POS registers
    fn host_id(&self) -> Option<u8> {
        None
    }

    fn irq(&self) -> Option<u8> {
        None
    }

    fn dma(&self) -> Option<u8> {
        None
    }

    fn interrupt_type(&self) -> IrqTrigger {
        IrqTrigger::Edge
    }

    /// Scan the whole outgoing ring for work instead of only the cursor entry
    fn aggressive_mode(&self) -> bool {
        true
    }

    /// CCBs carry a 5-bit LUN
    fn extended_lun(&self) -> bool {
        false
    }

    /// Mailbox initialization is refused until unlocked
    fn mailbox_locked(&self) -> bool {
        false
    }

    /// Fills the vendor area of the setup data reply
    fn setup_data(&self, _st: &AdapterState, _data: &mut [u8]) {}

    /// Interrupt and geometry registers are plain read/write registers
    fn regs_writable(&self) -> bool {
        false
    }

    fn pci_config_read(&self, _st: &AdapterState, _addr: u8) -> Option<u8> {
        None
    }

    fn pci_config_write(&mut self, _st: &mut AdapterState, _addr: u8, _val: u8) -> Option<()> {
        None
    }

    /// MCA Programmable Option Select registers
    fn pos_read(&self, _reg: u8) -> Option<u8> {
        None
    }

    fn pos_write(&mut self, _st: &mut AdapterState, _reg: u8, _val: u8) -> Option<()> {
        None
    }
}
