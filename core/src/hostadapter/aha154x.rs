//! Adaptec AHA-154x family (ISA) and AHA-1640 (MCA)

use crate::config::{AdapterConfig, AdapterModel, BusType};
use crate::hostadapter::vendor::{AdapterFamily, VendorOutcome};
use crate::hostadapter::AdapterState;
use crate::scsi::ScsiBus;
use crate::types::Addr24;

pub const CMD_WRITE_EEPROM: u8 = 0x22;
pub const CMD_READ_EEPROM: u8 = 0x23;
pub const CMD_SHADOW_RAM: u8 = 0x24;
pub const CMD_EXTBIOS: u8 = 0x28;
pub const CMD_MBENABLE: u8 = 0x29;
pub const CMD_BIOS_MBINIT: u8 = 0x82;
pub const CMD_BIOS_START: u8 = 0x83;

pub const EEPROM_SIZE: usize = 256;

/// Data bytes carried by one EEPROM write command
const EEPROM_WRITE_MAX: usize = 33;

/// MCA adapter ID of the AHA-1640
pub const AHA1640_POS_ID: u16 = 0x0F1F;

pub struct Aha154x {
    model: AdapterModel,

    /// Configuration EEPROM (CF/CP only)
    eeprom: Option<Box<[u8; EEPROM_SIZE]>>,

    shadow_ram: u8,

    /// Mailbox interface lock; non-zero refuses mailbox initialization
    lock: u8,
    extended_translation: bool,

    /// MCA POS registers
    pos: [u8; 8],
}

impl Aha154x {
    pub fn new(config: &AdapterConfig) -> Self {
        let eeprom = config.model.has_eeprom().then(|| {
            let mut e = Box::new([0; EEPROM_SIZE]);
            e[0] = config.host_id & 7;
            e[1] = (config.irq.saturating_sub(9) & 7) | ((config.dma & 7) << 4);
            e
        });

        let mut pos = [0; 8];
        if config.model.bus() == BusType::Mca {
            let [lo, hi] = AHA1640_POS_ID.to_le_bytes();
            pos[0] = lo;
            pos[1] = hi;
            // Card enable
            pos[2] = 0x01;
            pos[3] = ((config.base >> 8) & 7) as u8;
            if config.base & 0x04 != 0 {
                pos[3] |= 0x40;
            }
            pos[4] = (config.irq.saturating_sub(8) & 7) | ((config.host_id & 7) << 5);
            pos[5] = config.dma & 0x0F;
        }

        Self {
            model: config.model,
            eeprom,
            shadow_ram: 0,
            lock: 0,
            extended_translation: config.extended_translation,
            pos,
        }
    }

    fn is_mca(&self) -> bool {
        self.model.bus() == BusType::Mca
    }

    /// I/O base selected by POS register 3
    fn pos_base(&self) -> u16 {
        let pos3 = self.pos[3];
        (((pos3 & 7) as u16) << 8) | if pos3 & 0xC0 != 0 { 0x34 } else { 0x30 }
    }

    /// Vendor specific commands on the 1542C and later
    fn has_extended_bios(&self) -> bool {
        self.model != AdapterModel::Aha1540B
    }
}

impl AdapterFamily for Aha154x {
    fn name(&self) -> &'static str {
        match self.model {
            AdapterModel::Aha1540B => "AHA-1540B",
            AdapterModel::Aha1542C => "AHA-1542C",
            AdapterModel::Aha1542CF => "AHA-1542CF",
            AdapterModel::Aha1542CP => "AHA-1542CP",
            _ => "AHA-1640",
        }
    }

    fn fw_rev(&self) -> &'static str {
        match self.model {
            AdapterModel::Aha1540B => "A005",
            AdapterModel::Aha1542C => "D001",
            AdapterModel::Aha1542CF => "E001",
            AdapterModel::Aha1542CP => "F001",
            _ => "BB01",
        }
    }

    fn bus_type(&self) -> BusType {
        self.model.bus()
    }

    fn param_len(&self, cmd: u8) -> usize {
        match cmd {
            CMD_WRITE_EEPROM => 2 + EEPROM_WRITE_MAX,
            CMD_READ_EEPROM => 3,
            CMD_SHADOW_RAM => 1,
            CMD_MBENABLE => 2,
            CMD_BIOS_MBINIT => 4,
            _ => 0,
        }
    }

    fn command(&mut self, st: &mut AdapterState, _scsi: &dyn ScsiBus) -> VendorOutcome {
        let params = st.params().to_vec();
        match st.command() {
            CMD_WRITE_EEPROM => {
                let Some(eeprom) = self.eeprom.as_mut() else {
                    return VendorOutcome::Invalid;
                };
                let count = (params[0] as usize).min(EEPROM_WRITE_MAX);
                let offset = params[1] as usize;
                let count = count.min(EEPROM_SIZE - offset);
                eeprom[offset..(offset + count)].copy_from_slice(&params[2..(2 + count)]);
                log::debug!("{}: EEPROM write {} @ {:02X}", self.name(), count, offset);
            }
            CMD_READ_EEPROM => {
                let Some(eeprom) = self.eeprom.as_ref() else {
                    return VendorOutcome::Invalid;
                };
                let count = params[0] as usize;
                let offset = params[1] as usize;
                let end = (offset + count).min(EEPROM_SIZE);
                let mut reply = eeprom[offset..end].to_vec();
                reply.resize(count, 0);
                st.reply(&reply);
            }
            CMD_SHADOW_RAM => {
                self.shadow_ram = params[0];
                log::debug!("{}: shadow RAM control {:02X}", self.name(), self.shadow_ram);
            }
            CMD_EXTBIOS if self.has_extended_bios() => {
                let flags = if self.extended_translation { 0x08 } else { 0x00 };
                st.reply(&[flags, self.lock]);
            }
            CMD_MBENABLE if self.has_extended_bios() => {
                if params[1] == self.lock {
                    self.lock = params[0] & 1;
                    log::debug!("{}: mailbox lock now {}", self.name(), self.lock);
                }
            }
            CMD_BIOS_MBINIT => {
                if params[0] == 0 {
                    return VendorOutcome::Invalid;
                }
                st.init_bios_mailboxes(params[0] as u32, Addr24::from_be(&params[1..4]).0);
            }
            _ => return VendorOutcome::Invalid,
        }
        VendorOutcome::Done
    }

    fn fast_command(&mut self, st: &mut AdapterState, val: u8) -> bool {
        if val == CMD_BIOS_START {
            st.ring_bios_doorbell();
            return true;
        }
        false
    }

    fn reset(&mut self, _st: &mut AdapterState) {
        // Firmware with >1GB translation comes up with the mailbox interface
        // locked
        self.lock = (self.has_extended_bios() && self.extended_translation) as u8;
    }

    fn host_id(&self) -> Option<u8> {
        if self.is_mca() {
            return Some((self.pos[4] >> 5) & 7);
        }
        self.eeprom.as_ref().map(|e| e[0] & 7)
    }

    fn irq(&self) -> Option<u8> {
        if self.is_mca() {
            return Some((self.pos[4] & 7) + 8);
        }
        self.eeprom.as_ref().map(|e| (e[1] & 7) + 9)
    }

    fn dma(&self) -> Option<u8> {
        if self.is_mca() {
            return Some(self.pos[5] & 0x0F);
        }
        self.eeprom.as_ref().map(|e| (e[1] >> 4) & 7)
    }

    fn mailbox_locked(&self) -> bool {
        self.lock != 0
    }

    fn setup_data(&self, st: &AdapterState, data: &mut [u8]) {
        // Customer signature
        data[0..7].copy_from_slice(b"ADAPTEC");
        // Auto-retry, board switches
        data[20] = 0;
        data[21] = 0;
        data[22] = 0xA3;
        data[23] = 0xC2;
        data[24..27].copy_from_slice(&Addr24(st.bios_ring().out_addr).to_be());
    }

    fn pos_read(&self, reg: u8) -> Option<u8> {
        if !self.is_mca() {
            return None;
        }
        self.pos.get(reg as usize).copied()
    }

    fn pos_write(&mut self, st: &mut AdapterState, reg: u8, val: u8) -> Option<()> {
        if !self.is_mca() || !(2..=5).contains(&reg) {
            return None;
        }
        self.pos[reg as usize] = val;
        st.relocate(self.pos_base(), self.pos[2] & 1 != 0);
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eeprom_identity() {
        let mut config = AdapterConfig::new(AdapterModel::Aha1542CF);
        config.irq = 12;
        config.dma = 5;
        config.host_id = 6;
        let aha = Aha154x::new(&config);
        assert_eq!(aha.irq(), Some(12));
        assert_eq!(aha.dma(), Some(5));
        assert_eq!(aha.host_id(), Some(6));

        let aha = Aha154x::new(&AdapterConfig::new(AdapterModel::Aha1540B));
        assert_eq!(aha.irq(), None);
    }

    #[test]
    fn pos_identity() {
        let mut config = AdapterConfig::new(AdapterModel::Aha1640);
        config.base = 0x334;
        config.irq = 14;
        config.dma = 7;
        config.host_id = 5;
        let aha = Aha154x::new(&config);
        assert_eq!(aha.pos_read(0), Some(0x1F));
        assert_eq!(aha.pos_read(1), Some(0x0F));
        assert_eq!(aha.pos_base(), 0x334);
        assert_eq!(aha.irq(), Some(14));
        assert_eq!(aha.dma(), Some(7));
        assert_eq!(aha.host_id(), Some(5));
    }
}
