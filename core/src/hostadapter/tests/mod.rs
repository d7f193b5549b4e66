//! Adapter scenarios driven through the register file and guest memory

mod aha154x;
mod bios;

use crate::bus::testbus::Testbus;
use crate::bus::Address;
use crate::config::{AdapterConfig, AdapterModel};
use crate::hostadapter::ccb::{Ccb, CcbOpcode, Direction};
use crate::hostadapter::HostAdapter;
use crate::scsi::targets::ScsiTargets;

type TestAdapter = HostAdapter<Testbus, ScsiTargets>;

const BLOCK: usize = 512;

/// Disk contents where every block is distinguishable
fn disk_pattern(blocks: usize) -> Vec<u8> {
    (0..(blocks * BLOCK))
        .map(|i| ((i / BLOCK) as u8).wrapping_mul(31) ^ (i % 251) as u8)
        .collect()
}

fn block_of(pattern: &[u8], block: usize) -> &[u8] {
    &pattern[(block * BLOCK)..((block + 1) * BLOCK)]
}

fn adapter_with(config: AdapterConfig, disks: &[(u8, u8, usize)]) -> TestAdapter {
    let mut targets = ScsiTargets::new();
    for &(id, lun, blocks) in disks {
        targets
            .attach_hdd_from_bytes(disk_pattern(blocks), id, lun)
            .unwrap();
    }
    HostAdapter::new(config, Testbus::new(), targets).unwrap()
}

/// Factory configured adapter with disks at (id, lun, blocks)
fn adapter(model: AdapterModel, disks: &[(u8, u8, usize)]) -> TestAdapter {
    adapter_with(AdapterConfig::new(model), disks)
}

/// READ(10) of `count` blocks into `addr`
fn read10(target: u8, lun: u8, lba: u32, count: u16, addr: Address) -> Ccb {
    let [l0, l1, l2, l3] = lba.to_be_bytes();
    let [c0, c1] = count.to_be_bytes();
    let mut ccb = Ccb::new(
        CcbOpcode::Initiator,
        target,
        lun,
        &[0x28, 0, l0, l1, l2, l3, 0, c0, c1, 0],
    );
    ccb.direction = Direction::In;
    ccb.data_len = count as u32 * BLOCK as u32;
    ccb.data_ptr = addr;
    ccb
}

/// WRITE(10) of `count` blocks from `addr`
fn write10(target: u8, lun: u8, lba: u32, count: u16, addr: Address) -> Ccb {
    let [l0, l1, l2, l3] = lba.to_be_bytes();
    let [c0, c1] = count.to_be_bytes();
    let mut ccb = Ccb::new(
        CcbOpcode::Initiator,
        target,
        lun,
        &[0x2A, 0, l0, l1, l2, l3, 0, c0, c1, 0],
    );
    ccb.direction = Direction::Out;
    ccb.data_len = count as u32 * BLOCK as u32;
    ccb.data_ptr = addr;
    ccb
}
