//! Adapter configuration (jumpers, DIP switches and slot assignment)

use std::fmt::Display;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::bus::Port;
use crate::tickable::{Ticks, TICKS_PER_SECOND};

/// Expansion bus an adapter model plugs into
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum::IntoStaticStr)]
pub enum BusType {
    Isa,
    Mca,
    Pci,
}

impl BusType {
    /// Sustained bus transfer rate in bytes per second
    pub const fn transfer_rate(self) -> u64 {
        match self {
            Self::Isa => 5_000_000,
            Self::Mca => 10_000_000,
            Self::Pci => 20_000_000,
        }
    }

    /// Time to move `bytes` across the bus
    pub const fn transfer_time(self, bytes: u64) -> Ticks {
        bytes * TICKS_PER_SECOND / self.transfer_rate()
    }
}

/// Differentiation of host adapter models and their features
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::EnumIter,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AdapterModel {
    /// Adaptec AHA-1540B
    Aha1540B,
    /// Adaptec AHA-1542C
    Aha1542C,
    /// Adaptec AHA-1542CF
    Aha1542CF,
    /// Adaptec AHA-1542CP
    Aha1542CP,
    /// Adaptec AHA-1640 (MCA)
    Aha1640,
    /// BusLogic BT-542B
    Bt542B,
    /// BusLogic BT-545S
    Bt545S,
    /// BusLogic BT-640A (MCA)
    Bt640A,
    /// BusLogic BT-958D (PCI, wide)
    Bt958D,
}

#[allow(clippy::match_like_matches_macro)]
impl AdapterModel {
    pub const fn is_buslogic(self) -> bool {
        match self {
            Self::Bt542B | Self::Bt545S | Self::Bt640A | Self::Bt958D => true,
            _ => false,
        }
    }

    pub const fn bus(self) -> BusType {
        match self {
            Self::Aha1640 | Self::Bt640A => BusType::Mca,
            Self::Bt958D => BusType::Pci,
            _ => BusType::Isa,
        }
    }

    /// Adapters with a configuration EEPROM
    pub const fn has_eeprom(self) -> bool {
        match self {
            Self::Aha1542CF | Self::Aha1542CP => true,
            _ => false,
        }
    }

    pub const fn max_target_id(self) -> u8 {
        match self {
            Self::Bt958D => 15,
            _ => 7,
        }
    }

    /// IRQ lines selectable by jumpers or POS
    pub const fn valid_irqs(self) -> &'static [u8] {
        match self.bus() {
            BusType::Isa => &[9, 10, 11, 12, 14, 15],
            BusType::Mca => &[10, 11, 12, 14, 15],
            BusType::Pci => &[3, 4, 5, 7, 9, 10, 11, 12, 14, 15],
        }
    }

    /// DMA channels selectable by jumpers or POS; PCI boards master the bus
    pub const fn valid_dmas(self) -> &'static [u8] {
        match self.bus() {
            BusType::Isa => &[0, 5, 6, 7],
            BusType::Mca => &[0, 1, 3, 5, 6, 7],
            BusType::Pci => &[0],
        }
    }
}

impl Display for AdapterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Aha1540B => "Adaptec AHA-1540B",
                Self::Aha1542C => "Adaptec AHA-1542C",
                Self::Aha1542CF => "Adaptec AHA-1542CF",
                Self::Aha1542CP => "Adaptec AHA-1542CP",
                Self::Aha1640 => "Adaptec AHA-1640",
                Self::Bt542B => "BusLogic BT-542B",
                Self::Bt545S => "BusLogic BT-545S",
                Self::Bt640A => "BusLogic BT-640A",
                Self::Bt958D => "BusLogic BT-958D",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub model: AdapterModel,
    /// First of the four I/O ports
    pub base: Port,
    pub irq: u8,
    pub dma: u8,
    /// SCSI ID of the adapter itself
    pub host_id: u8,
    /// PCI slot (device number), PCI models only
    pub pci_slot: u8,
    /// BIOS INT 13h requests address sectors by LBA instead of CHS
    pub bios_lba: bool,
    /// BIOS geometry translation for disks over 1 GB (255 heads, 63 sectors)
    pub extended_translation: bool,
}

impl AdapterConfig {
    /// Factory settings for a model
    pub fn new(model: AdapterModel) -> Self {
        let (base, irq, dma) = match model.bus() {
            BusType::Isa => (0x334, 11, 6),
            BusType::Mca => (0x330, 11, 6),
            BusType::Pci => (0xE000, 11, 0),
        };
        Self {
            model,
            base,
            irq,
            dma,
            host_id: 7,
            pci_slot: 0,
            bios_lba: false,
            extended_translation: false,
        }
    }

    /// Parses a JSON configuration and validates it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Cannot parse adapter config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(filename: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(filename)
            .with_context(|| format!("Cannot read {}", filename.display()))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base & 3 != 0 {
            bail!("I/O base {:04X} is not aligned to 4 ports", self.base);
        }
        if !self.model.valid_irqs().contains(&self.irq) {
            bail!("IRQ {} not selectable on {}", self.irq, self.model);
        }
        if !self.model.valid_dmas().contains(&self.dma) {
            bail!("DMA channel {} not selectable on {}", self.dma, self.model);
        }
        if self.host_id > self.model.max_target_id() {
            bail!(
                "Host SCSI ID {} out of range for {} (max {})",
                self.host_id,
                self.model,
                self.model.max_target_id()
            );
        }
        if self.pci_slot > 31 {
            bail!("PCI slot {} out of range", self.pci_slot);
        }
        Ok(())
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::new(AdapterModel::Aha1542CF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn defaults_validate() {
        for model in AdapterModel::iter() {
            AdapterConfig::new(model).validate().unwrap();
        }
    }

    #[test]
    fn model_names() {
        assert_eq!(AdapterModel::from_str("bt958d").unwrap(), AdapterModel::Bt958D);
        assert_eq!(AdapterModel::from_str("AHA1542CF").unwrap(), AdapterModel::Aha1542CF);
        assert!(AdapterModel::from_str("aha2940").is_err());
        let name: &'static str = AdapterModel::Bt545S.into();
        assert_eq!(name, "bt545s");
    }

    #[test]
    fn rejects_bad_settings() {
        let mut c = AdapterConfig::new(AdapterModel::Aha1540B);
        c.irq = 5;
        assert!(c.validate().is_err());

        let mut c = AdapterConfig::new(AdapterModel::Bt542B);
        c.host_id = 8;
        assert!(c.validate().is_err());

        // Wide adapter accepts IDs up to 15
        let mut c = AdapterConfig::new(AdapterModel::Bt958D);
        c.host_id = 15;
        assert!(c.validate().is_ok());

        let mut c = AdapterConfig::new(AdapterModel::Aha1542C);
        c.base = 0x332;
        assert!(c.validate().is_err());
    }

    #[test]
    fn json() {
        let c = AdapterConfig::from_json(r#"{"model":"Bt545S","base":560,"irq":10}"#).unwrap();
        assert_eq!(c.model, AdapterModel::Bt545S);
        assert_eq!(c.base, 0x230);
        assert_eq!(c.irq, 10);
        assert_eq!(c.dma, 6);

        assert!(AdapterConfig::from_json(r#"{"model":"Bt545S","dma":2}"#).is_err());
        assert!(AdapterConfig::from_json("{").is_err());
    }

    #[test]
    fn bus_timing() {
        assert_eq!(BusType::Isa.transfer_time(5_000_000), TICKS_PER_SECOND);
        assert!(BusType::Pci.transfer_time(512) < BusType::Isa.transfer_time(512));
    }
}
