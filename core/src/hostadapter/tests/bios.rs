use super::*;
use crate::hostadapter::bios::*;
use crate::hostadapter::CMD_BIOSCMD;
use crate::initiator;

/// INT 13h request block, CHS form
fn chs(cmd: u8, target: u8, cyl: u16, head: u8, sector: u8, count: u8, addr: Address) -> Vec<u8> {
    let [c0, c1] = cyl.to_le_bytes();
    let [_, a0, a1, a2] = addr.to_be_bytes();
    vec![cmd, target << 5, c0, c1, head, sector, count, a0, a1, a2]
}

/// INT 13h request block, LBA form
fn lba(cmd: u8, target: u8, block: u32, count: u8, addr: Address) -> Vec<u8> {
    let [b0, b1, b2, b3] = block.to_be_bytes();
    let [_, a0, a1, a2] = addr.to_be_bytes();
    vec![cmd, target << 5, b0, b1, b2, b3, count, a0, a1, a2]
}

fn bios(a: &mut TestAdapter, params: &[u8]) -> u8 {
    let reply = initiator::command(a, CMD_BIOSCMD, params).unwrap();
    assert_eq!(reply.len(), 1);
    reply[0]
}

#[test]
fn read_chs() {
    let disk = disk_pattern(4096);
    let mut a = adapter(AdapterModel::Aha1542CF, &[(0, 0, 4096)]);

    // Cylinder 1, head 2, sector 3 at 64 heads x 32 sectors
    assert_eq!(bios(&mut a, &chs(BIOS_READ, 0, 1, 2, 3, 2, 0x9000)), BIOS_OK);
    let block = (64 + 2) * 32 + 2;
    assert_eq!(a.host().peek(0x9000, BLOCK), block_of(&disk, block));
    assert_eq!(a.host().peek(0x9000 + BLOCK as Address, BLOCK), block_of(&disk, block + 1));
}

#[test]
fn write_read_lba() {
    let mut config = AdapterConfig::new(AdapterModel::Aha1542C);
    config.bios_lba = true;
    let mut a = adapter_with(config, &[(1, 0, 64)]);

    a.host_mut().poke(0x8000, &[0xC3; BLOCK]);
    assert_eq!(bios(&mut a, &lba(BIOS_WRITE, 1, 40, 1, 0x8000)), BIOS_OK);
    assert_eq!(bios(&mut a, &lba(BIOS_READ, 1, 40, 1, 0xA000)), BIOS_OK);
    assert_eq!(a.host().peek(0xA000, BLOCK), vec![0xC3; BLOCK]);
}

#[test]
fn read_beyond_end() {
    let mut config = AdapterConfig::new(AdapterModel::Aha1542CF);
    config.bios_lba = true;
    let mut a = adapter_with(config, &[(0, 0, 16)]);
    assert_eq!(
        bios(&mut a, &lba(BIOS_READ, 0, 100, 1, 0x8000)),
        BIOS_SECTOR_NOT_FOUND
    );
    assert_eq!(
        bios(&mut a, &lba(BIOS_VERIFY, 0, 100, 1, 0)),
        BIOS_SECTOR_NOT_FOUND
    );
    assert_eq!(bios(&mut a, &lba(BIOS_VERIFY, 0, 10, 2, 0)), BIOS_OK);
    assert_eq!(bios(&mut a, &lba(BIOS_SEEK, 0, 100, 0, 0)), BIOS_SECTOR_NOT_FOUND);
    assert_eq!(bios(&mut a, &lba(BIOS_SEEK, 0, 15, 0, 0)), BIOS_OK);
}

#[test]
fn absent_target() {
    let mut a = adapter(AdapterModel::Aha1542CF, &[(0, 0, 16)]);
    assert_eq!(bios(&mut a, &chs(BIOS_READ, 3, 0, 0, 1, 1, 0x8000)), BIOS_TIMEOUT);
    assert_eq!(bios(&mut a, &chs(BIOS_TEST_READY, 3, 0, 0, 0, 0, 0)), BIOS_TIMEOUT);
}

#[test]
fn drive_parameters() {
    let mut a = adapter(AdapterModel::Aha1542CF, &[(0, 0, 4096)]);
    assert_eq!(bios(&mut a, &chs(BIOS_PARAMS, 0, 0, 0, 0, 0, 0x7000)), BIOS_OK);
    assert_eq!(a.host().peek(0x7000, 6), vec![0, 2, 64, 32, 0, 0]);

    let mut config = AdapterConfig::new(AdapterModel::Aha1542CF);
    config.extended_translation = true;
    let mut a = adapter_with(config, &[(0, 0, 255 * 63 * 3)]);
    assert_eq!(bios(&mut a, &chs(BIOS_PARAMS, 0, 0, 0, 0, 0, 0x7000)), BIOS_OK);
    assert_eq!(a.host().peek(0x7000, 4), vec![0, 3, 255, 63]);
}

#[test]
fn dasd_type() {
    let mut a = adapter(AdapterModel::Aha1542CF, &[(0, 0, 300)]);
    assert_eq!(bios(&mut a, &chs(BIOS_DASD_TYPE, 0, 0, 0, 0, 0, 0x7000)), BIOS_OK);
    assert_eq!(a.host().peek(0x7000, 5), vec![0x03, 0, 0, 0x01, 0x2C]);
}

#[test]
fn housekeeping_commands() {
    let mut a = adapter(AdapterModel::Aha1542CF, &[(0, 0, 16)]);
    for cmd in [BIOS_RESET, BIOS_STATUS, BIOS_RECALIBRATE, BIOS_TEST_READY] {
        assert_eq!(bios(&mut a, &chs(cmd, 0, 0, 0, 0, 0, 0)), BIOS_OK);
    }
    assert_eq!(bios(&mut a, &chs(0x05, 0, 0, 0, 0, 0, 0)), BIOS_INVALID);
}
