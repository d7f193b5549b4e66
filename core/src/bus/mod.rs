pub mod testbus;

/// Guest physical address as seen by bus-master/ISA DMA
pub type Address = u32;

/// Host I/O port number
pub type Port = u16;

/// Byte-wide register file decoded on a bus
pub trait BusMember<T> {
    fn read(&mut self, addr: T) -> Option<u8>;
    fn write(&mut self, addr: T, val: u8) -> Option<()>;
}

/// Interrupt line an adapter is wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqLine {
    /// ISA/EISA/MCA IRQ number
    Isa(u8),
    /// PCI slot (INTA#)
    Pci(u8),
}

/// How the interrupt controller should treat the line
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum IrqTrigger {
    Edge,
    Level,
}

/// The system bus a host adapter is plugged into: guest memory via DMA and
/// the interrupt controller.
///
/// Both are synchronous collaborators owned by the surrounding machine.
pub trait HostBus {
    /// Copies `buf.len()` bytes of guest memory at `addr` into `buf`
    fn dma_read(&mut self, addr: Address, buf: &mut [u8]);

    /// Copies `data` into guest memory at `addr`
    fn dma_write(&mut self, addr: Address, data: &[u8]);

    fn raise_irq(&mut self, line: IrqLine, trigger: IrqTrigger);
    fn clear_irq(&mut self, line: IrqLine);
}
