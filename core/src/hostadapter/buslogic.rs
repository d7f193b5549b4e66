//! BusLogic BT-54x (ISA), BT-640A (MCA) and BT-958D (PCI)

use crate::bus::IrqTrigger;
use crate::config::{AdapterConfig, AdapterModel, BusType};
use crate::hostadapter::mailbox::MailboxFormat;
use crate::hostadapter::vendor::{AdapterFamily, VendorOutcome};
use crate::hostadapter::AdapterState;
use crate::scsi::ScsiBus;
use crate::types::le32;

pub const CMD_RETDEVS_WIDE: u8 = 0x23;
pub const CMD_TARGET_BITMAP: u8 = 0x24;
pub const CMD_IRQ_ENABLE: u8 = 0x25;
pub const CMD_MBINIT_EXT: u8 = 0x81;
pub const CMD_FW_LETTER: u8 = 0x84;
pub const CMD_FW_LETTER2: u8 = 0x85;
pub const CMD_PCI_INFO: u8 = 0x86;
pub const CMD_MODEL_NUMBER: u8 = 0x8B;
pub const CMD_SYNC_PERIOD: u8 = 0x8C;
pub const CMD_EXT_SETUP: u8 = 0x8D;
pub const CMD_ROUND_ROBIN: u8 = 0x8F;
pub const CMD_STORE_LOCAL_RAM: u8 = 0x90;
pub const CMD_FETCH_LOCAL_RAM: u8 = 0x91;
pub const CMD_ISA_PORT: u8 = 0x95;
pub const CMD_CCB_FORMAT: u8 = 0x96;

pub const LOCAL_RAM_SIZE: usize = 256;

/// AutoSCSI block within local RAM
pub const AUTOSCSI_OFFSET: usize = 64;
const AUTOSCSI_TYPE: usize = AUTOSCSI_OFFSET + 3;
const AUTOSCSI_FLAGS: usize = AUTOSCSI_OFFSET + 10;
const AUTOSCSI_DMA: usize = AUTOSCSI_OFFSET + 11;
const AUTOSCSI_IRQ: usize = AUTOSCSI_OFFSET + 12;
const AUTOSCSI_SCSI_ID: usize = AUTOSCSI_OFFSET + 14;
const AUTOSCSI_SCSI_CONFIG: usize = AUTOSCSI_OFFSET + 15;
const AUTOSCSI_LEVEL_IRQ: u8 = 1 << 2;

/// Length of the extended setup information reply
pub const EXT_SETUP_LEN: usize = 14;

/// Scatter/gather entries accepted per CCB
const SG_LIMIT: u16 = 8192;

pub const PCI_VENDOR_ID: u16 = 0x104B;
pub const PCI_DEVICE_ID: u16 = 0x1040;
const PCI_COMMAND: usize = 0x04;
const PCI_BAR0: usize = 0x10;
const PCI_INT_LINE: usize = 0x3C;
/// BAR0 decodes 32 ports
const PCI_BAR0_MASK: u8 = 0xE0;

/// MCA adapter ID of the BT-640A
pub const BT640A_POS_ID: u16 = 0x0708;

/// Port and IRQ choices selectable through POS
const POS_BASES: [u16; 6] = [0x330, 0x334, 0x230, 0x234, 0x130, 0x134];
const POS_IRQS: [u8; 6] = [9, 10, 11, 12, 14, 15];

/// ISA-compatible port select code for "disabled"
const ISA_PORT_DISABLED: u8 = 0x07;

pub struct BusLogic {
    model: AdapterModel,
    local_ram: Box<[u8; LOCAL_RAM_SIZE]>,
    aggressive: bool,
    ext_lun: bool,
    isa_port: u8,
    /// PCI configuration space (BT-958D)
    pci_conf: Option<Box<[u8; 256]>>,
    /// MCA POS registers (BT-640A)
    pos: [u8; 8],
}

impl BusLogic {
    pub fn new(config: &AdapterConfig) -> Self {
        let model = config.model;
        let mut ram = Box::new([0; LOCAL_RAM_SIZE]);
        ram[AUTOSCSI_OFFSET] = b'F';
        ram[AUTOSCSI_OFFSET + 1] = b'A';
        ram[AUTOSCSI_OFFSET + 2] = 64;
        ram[AUTOSCSI_TYPE..(AUTOSCSI_TYPE + 6)].copy_from_slice(Self::model_type(model));
        if model.bus() == BusType::Pci {
            ram[AUTOSCSI_FLAGS] |= AUTOSCSI_LEVEL_IRQ;
        }
        ram[AUTOSCSI_DMA] = config.dma;
        ram[AUTOSCSI_IRQ] = config.irq;
        ram[AUTOSCSI_SCSI_ID] = config.host_id;
        // Parity checking, low/high termination
        ram[AUTOSCSI_SCSI_CONFIG] = 0x3D;

        let pci_conf = (model.bus() == BusType::Pci).then(|| {
            let mut c = Box::new([0; 256]);
            c[0..2].copy_from_slice(&PCI_VENDOR_ID.to_le_bytes());
            c[2..4].copy_from_slice(&PCI_DEVICE_ID.to_le_bytes());
            // I/O space enabled
            c[PCI_COMMAND] = 0x01;
            c[0x06] = 0x00;
            c[0x07] = 0x02;
            c[0x08] = 0x01;
            // Mass storage, SCSI
            c[0x0A] = 0x00;
            c[0x0B] = 0x01;
            let [lo, hi] = config.base.to_le_bytes();
            c[PCI_BAR0] = (lo & PCI_BAR0_MASK) | 0x01;
            c[PCI_BAR0 + 1] = hi;
            c[PCI_INT_LINE] = config.irq;
            // INTA#
            c[PCI_INT_LINE + 1] = 0x01;
            c
        });

        let mut pos = [0; 8];
        if model.bus() == BusType::Mca {
            let [lo, hi] = BT640A_POS_ID.to_le_bytes();
            pos[0] = lo;
            pos[1] = hi;
            pos[2] = 0x01;
            pos[3] = POS_BASES
                .iter()
                .position(|&b| b == config.base)
                .unwrap_or(0) as u8;
            pos[4] = POS_IRQS.iter().position(|&i| i == config.irq).unwrap_or(2) as u8;
            pos[5] = config.dma & 0x0F;
        }

        Self {
            model,
            local_ram: ram,
            aggressive: true,
            ext_lun: false,
            isa_port: ISA_PORT_DISABLED,
            pci_conf,
            pos,
        }
    }

    fn model_type(model: AdapterModel) -> &'static [u8; 6] {
        match model {
            AdapterModel::Bt542B => b"542B  ",
            AdapterModel::Bt545S => b"545S  ",
            AdapterModel::Bt640A => b"640A  ",
            _ => b"958D  ",
        }
    }

    fn is_wide(&self) -> bool {
        self.max_target_id() > 7
    }

    /// Host bus letter reported in the setup data
    fn bus_letter(&self) -> u8 {
        match self.model.bus() {
            BusType::Isa => b'A',
            BusType::Mca => b'M',
            BusType::Pci => b'E',
        }
    }

    fn ext_setup(&self, st: &AdapterState) -> [u8; EXT_SETUP_LEN] {
        let mut d = [0; EXT_SETUP_LEN];
        d[0] = self.bus_letter();
        // BIOS disabled
        d[1] = 0;
        d[2..4].copy_from_slice(&SG_LIMIT.to_le_bytes());
        d[4] = st.ring().count as u8;
        d[5..9].copy_from_slice(&st.ring().out_addr.to_le_bytes());
        if self.interrupt_type() == IrqTrigger::Level {
            d[9] |= 1 << 6;
        }
        let fw = self.fw_rev().as_bytes();
        d[10..13].copy_from_slice(&fw[(fw.len() - 3)..]);
        if self.is_wide() {
            // Wide, ultra, smart termination
            d[13] = 0x01 | 0x08 | 0x10;
        }
        d
    }

    fn pci_base(c: &[u8; 256]) -> u16 {
        u16::from_le_bytes([c[PCI_BAR0] & PCI_BAR0_MASK, c[PCI_BAR0 + 1]])
    }
}

/// Reply sized by the guest, zero padded or truncated
fn sized_reply(st: &mut AdapterState, data: &[u8], len: usize) {
    let mut reply = vec![0; len];
    let n = len.min(data.len());
    reply[..n].copy_from_slice(&data[..n]);
    st.reply(&reply);
}

impl AdapterFamily for BusLogic {
    fn name(&self) -> &'static str {
        match self.model {
            AdapterModel::Bt542B => "BT-542B",
            AdapterModel::Bt545S => "BT-545S",
            AdapterModel::Bt640A => "BT-640A",
            _ => "BT-958D",
        }
    }

    fn fw_rev(&self) -> &'static str {
        match self.model {
            AdapterModel::Bt542B => "AA335D",
            AdapterModel::Bt545S => "AA421E",
            AdapterModel::Bt640A => "BA150M",
            _ => "AA507B",
        }
    }

    fn bus_type(&self) -> BusType {
        self.model.bus()
    }

    fn max_target_id(&self) -> u8 {
        self.model.max_target_id()
    }

    fn param_len(&self, cmd: u8) -> usize {
        match cmd {
            CMD_IRQ_ENABLE | CMD_MODEL_NUMBER | CMD_SYNC_PERIOD | CMD_EXT_SETUP
            | CMD_ROUND_ROBIN | CMD_ISA_PORT | CMD_CCB_FORMAT => 1,
            CMD_STORE_LOCAL_RAM | CMD_FETCH_LOCAL_RAM => 2,
            CMD_MBINIT_EXT => 5,
            _ => 0,
        }
    }

    fn command(&mut self, st: &mut AdapterState, scsi: &dyn ScsiBus) -> VendorOutcome {
        let params = st.params().to_vec();
        let host_id = self.host_id().unwrap_or(7);

        match st.command() {
            CMD_RETDEVS_WIDE if self.is_wide() => {
                let mut reply = [0; 8];
                for (i, r) in reply.iter_mut().enumerate() {
                    let id = 8 + i as u8;
                    if id == host_id {
                        continue;
                    }
                    for lun in 0..8 {
                        if scsi.device_present(id, lun) {
                            *r |= 1 << lun;
                        }
                    }
                }
                st.reply(&reply);
            }
            CMD_TARGET_BITMAP => {
                let mut bitmap = 0u16;
                for id in 0..=self.max_target_id() {
                    if id != host_id && (0..8).any(|lun| scsi.device_present(id, lun)) {
                        bitmap |= 1 << id;
                    }
                }
                st.reply(&bitmap.to_le_bytes());
            }
            CMD_IRQ_ENABLE => {
                st.set_irq_enabled(params[0] & 1 != 0);
                return VendorOutcome::SuppressIrq;
            }
            CMD_MBINIT_EXT => {
                if params[0] == 0 {
                    log::warn!("{}: mailbox init with zero entries", self.name());
                    return VendorOutcome::Invalid;
                }
                st.init_mailboxes(
                    MailboxFormat::Extended32,
                    params[0] as u32,
                    le32(&params, 1),
                );
            }
            CMD_FW_LETTER => st.reply(&[self.fw_rev().as_bytes()[4]]),
            CMD_FW_LETTER2 => st.reply(&[self.fw_rev().as_bytes()[5]]),
            CMD_PCI_INFO if self.pci_conf.is_some() => {
                let irq = self.local_ram[AUTOSCSI_IRQ];
                // Low/high byte terminated, information valid
                st.reply(&[self.isa_port, irq, 0x83, 0]);
            }
            CMD_MODEL_NUMBER => {
                let mut model = [b' '; 5];
                model[..4].copy_from_slice(&Self::model_type(self.model)[..4]);
                sized_reply(st, &model, params[0] as usize);
            }
            CMD_SYNC_PERIOD => {
                // 250ns for every target
                st.reply(&vec![0x19; params[0] as usize]);
            }
            CMD_EXT_SETUP => {
                let data = self.ext_setup(st);
                sized_reply(st, &data, params[0] as usize);
            }
            CMD_ROUND_ROBIN => {
                self.aggressive = params[0] == 0;
                log::debug!("{}: aggressive round robin: {}", self.name(), self.aggressive);
            }
            CMD_STORE_LOCAL_RAM => {
                let offset = params[0] as usize;
                let data = &params[2..];
                let n = data.len().min(LOCAL_RAM_SIZE - offset);
                self.local_ram[offset..(offset + n)].copy_from_slice(&data[..n]);
            }
            CMD_FETCH_LOCAL_RAM => {
                let offset = params[0] as usize;
                let end = (offset + params[1] as usize).min(LOCAL_RAM_SIZE);
                let data = self.local_ram[offset..end].to_vec();
                sized_reply(st, &data, params[1] as usize);
            }
            CMD_ISA_PORT if self.pci_conf.is_some() => {
                self.isa_port = params[0];
            }
            CMD_CCB_FORMAT => {
                self.ext_lun = params[0] == 1;
            }
            _ => return VendorOutcome::Invalid,
        }
        VendorOutcome::Done
    }

    fn command_phase1(&mut self, st: &mut AdapterState) {
        if st.command() == CMD_STORE_LOCAL_RAM && st.params().len() == 2 {
            // Data bytes follow the offset and count
            let count = st.params()[1] as usize;
            st.set_params_left(count);
        }
    }

    fn reset(&mut self, _st: &mut AdapterState) {
        self.ext_lun = false;
        self.aggressive = true;
    }

    fn host_id(&self) -> Option<u8> {
        Some(self.local_ram[AUTOSCSI_SCSI_ID] & 0x0F)
    }

    fn irq(&self) -> Option<u8> {
        Some(self.local_ram[AUTOSCSI_IRQ])
    }

    fn dma(&self) -> Option<u8> {
        Some(self.local_ram[AUTOSCSI_DMA])
    }

    fn interrupt_type(&self) -> IrqTrigger {
        if self.model.bus() == BusType::Pci
            || self.local_ram[AUTOSCSI_FLAGS] & AUTOSCSI_LEVEL_IRQ != 0
        {
            IrqTrigger::Level
        } else {
            IrqTrigger::Edge
        }
    }

    fn aggressive_mode(&self) -> bool {
        self.aggressive
    }

    fn extended_lun(&self) -> bool {
        self.ext_lun
    }

    fn setup_data(&self, _st: &AdapterState, data: &mut [u8]) {
        data[0] = b'B';
        data[1] = b'D';
        data[2] = self.bus_letter();
    }

    fn regs_writable(&self) -> bool {
        true
    }

    fn pci_config_read(&self, _st: &AdapterState, addr: u8) -> Option<u8> {
        self.pci_conf.as_ref().map(|c| c[addr as usize])
    }

    fn pci_config_write(&mut self, st: &mut AdapterState, addr: u8, val: u8) -> Option<()> {
        let c = self.pci_conf.as_mut()?;
        let addr = addr as usize;
        match addr {
            PCI_COMMAND => c[addr] = val & 0x07,
            PCI_BAR0 => c[addr] = (val & PCI_BAR0_MASK) | 0x01,
            0x11..=0x13 => c[addr] = val,
            PCI_INT_LINE => {
                c[addr] = val;
                self.local_ram[AUTOSCSI_IRQ] = val;
            }
            _ => return Some(()),
        }
        if matches!(addr, PCI_COMMAND | PCI_BAR0 | 0x11) {
            st.relocate(Self::pci_base(c), c[PCI_COMMAND] & 1 != 0);
        }
        Some(())
    }

    fn pos_read(&self, reg: u8) -> Option<u8> {
        if self.model.bus() != BusType::Mca {
            return None;
        }
        self.pos.get(reg as usize).copied()
    }

    fn pos_write(&mut self, st: &mut AdapterState, reg: u8, val: u8) -> Option<()> {
        if self.model.bus() != BusType::Mca || !(2..=5).contains(&reg) {
            return None;
        }
        self.pos[reg as usize] = val;
        let base = POS_BASES[(self.pos[3] & 7) as usize % POS_BASES.len()];
        self.local_ram[AUTOSCSI_IRQ] = POS_IRQS[(self.pos[4] & 7) as usize % POS_IRQS.len()];
        self.local_ram[AUTOSCSI_DMA] = self.pos[5] & 0x0F;
        st.relocate(base, self.pos[2] & 1 != 0);
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autoscsi_identity() {
        let mut config = AdapterConfig::new(AdapterModel::Bt545S);
        config.irq = 10;
        config.dma = 5;
        config.host_id = 3;
        let bt = BusLogic::new(&config);
        assert_eq!(&bt.local_ram[64..67], b"FA\x40");
        assert_eq!(&bt.local_ram[67..73], b"545S  ");
        assert_eq!(bt.irq(), Some(10));
        assert_eq!(bt.dma(), Some(5));
        assert_eq!(bt.host_id(), Some(3));
        assert_eq!(bt.interrupt_type(), IrqTrigger::Edge);
    }

    #[test]
    fn pci_level_triggered() {
        let bt = BusLogic::new(&AdapterConfig::new(AdapterModel::Bt958D));
        assert_eq!(bt.interrupt_type(), IrqTrigger::Level);
        assert!(bt.is_wide());
    }

    #[test]
    fn ext_setup_layout() {
        let config = AdapterConfig::new(AdapterModel::Bt958D);
        let bt = BusLogic::new(&config);
        let st = AdapterState::new(config);
        let d = bt.ext_setup(&st);
        assert_eq!(d[0], b'E');
        assert_eq!(u16::from_le_bytes([d[2], d[3]]), 8192);
        assert_eq!(d[9] & 0x40, 0x40);
        assert_eq!(&d[10..13], b"07B");
        assert_eq!(d[13] & 1, 1);
    }
}
