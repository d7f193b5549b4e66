use std::cell::RefCell;
use std::collections::HashMap;

use super::{Address, HostBus, IrqLine, IrqTrigger};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
}

#[derive(Clone, Debug)]
pub struct TraceEntry {
    pub addr: Address,
    pub access: Access,
    pub len: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IrqEvent {
    Raise(IrqLine, IrqTrigger),
    Clear(IrqLine),
}

/// Sparse guest memory and interrupt controller stand-in.
///
/// Unwritten memory reads as zero.
pub struct Testbus {
    pub mem: HashMap<Address, u8>,
    trace: RefCell<Vec<TraceEntry>>,
    trace_enabled: bool,
    irq_log: Vec<IrqEvent>,
    asserted: HashMap<IrqLine, bool>,
}

impl Testbus {
    pub fn new() -> Self {
        Self {
            mem: HashMap::new(),
            trace: RefCell::new(vec![]),
            trace_enabled: false,
            irq_log: vec![],
            asserted: HashMap::new(),
        }
    }

    pub fn reset_trace(&mut self) {
        self.trace.borrow_mut().clear();
        self.trace_enabled = true;
    }

    pub fn get_trace(&self) -> Vec<TraceEntry> {
        self.trace.borrow().clone()
    }

    pub fn irq_log(&self) -> &[IrqEvent] {
        &self.irq_log
    }

    pub fn irq_asserted(&self, line: IrqLine) -> bool {
        self.asserted.get(&line).copied().unwrap_or(false)
    }

    pub fn peek(&self, addr: Address, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| *self.mem.get(&(addr.wrapping_add(i as Address))).unwrap_or(&0))
            .collect()
    }

    pub fn poke(&mut self, addr: Address, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.mem.insert(addr.wrapping_add(i as Address), b);
        }
    }

    fn record(&self, addr: Address, access: Access, len: usize) {
        if self.trace_enabled {
            self.trace
                .borrow_mut()
                .push(TraceEntry { addr, access, len });
        }
    }
}

impl Default for Testbus {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBus for Testbus {
    fn dma_read(&mut self, addr: Address, buf: &mut [u8]) {
        self.record(addr, Access::Read, buf.len());
        for (i, b) in buf.iter_mut().enumerate() {
            *b = *self.mem.get(&(addr.wrapping_add(i as Address))).unwrap_or(&0);
        }
    }

    fn dma_write(&mut self, addr: Address, data: &[u8]) {
        self.record(addr, Access::Write, data.len());
        self.poke(addr, data);
    }

    fn raise_irq(&mut self, line: IrqLine, trigger: IrqTrigger) {
        self.irq_log.push(IrqEvent::Raise(line, trigger));
        self.asserted.insert(line, true);
    }

    fn clear_irq(&mut self, line: IrqLine) {
        self.irq_log.push(IrqEvent::Clear(line));
        self.asserted.insert(line, false);
    }
}
