use super::*;
use crate::bus::BusMember;
use crate::hostadapter::aha154x::*;
use crate::hostadapter::mailbox::{MailboxFormat, MailboxOut, MboAction, MBI_FREE, MBI_SUCCESS};
use crate::hostadapter::regs::PORT_CMD_DATA;
use crate::hostadapter::{CMD_MBINIT, CMD_RETCONF, CMD_RETSETUP, SETUP_VENDOR_OFFSET};
use crate::initiator::{self, Initiator};
use crate::tickable::{Tickable, TICKS_PER_MSEC};

#[test]
fn eeprom_round_trip() {
    let mut a = adapter(AdapterModel::Aha1542CP, &[]);
    let mut params = vec![3, 0x40, 0xAB, 0xCD, 0xEF];
    params.resize(35, 0);
    initiator::command(&mut a, CMD_WRITE_EEPROM, &params).unwrap();
    assert_eq!(
        initiator::command(&mut a, CMD_READ_EEPROM, &[4, 0x40, 0]).unwrap(),
        vec![0xAB, 0xCD, 0xEF, 0]
    );
}

#[test]
fn eeprom_identity_reported() {
    let mut a = adapter(AdapterModel::Aha1542CF, &[]);
    // Host ID 5, IRQ 10, DMA 5
    let mut params = vec![2, 0, 5, 0x51];
    params.resize(35, 0);
    initiator::command(&mut a, CMD_WRITE_EEPROM, &params).unwrap();
    assert_eq!(a.host_id(), 5);
    assert_eq!(a.irq(), 10);
    assert_eq!(
        initiator::command(&mut a, CMD_RETCONF, &[]).unwrap(),
        vec![1 << 5, 1 << 1, 5]
    );
}

#[test]
fn eeprom_absent_on_1540b() {
    let mut a = adapter(AdapterModel::Aha1540B, &[]);
    assert!(initiator::command(&mut a, CMD_READ_EEPROM, &[1, 0, 0]).is_err());
    assert!(initiator::command(&mut a, CMD_EXTBIOS, &[]).is_err());
    assert!(initiator::command(&mut a, CMD_SHADOW_RAM, &[1]).is_ok());
}

#[test]
fn mailbox_lock() {
    let mut config = AdapterConfig::new(AdapterModel::Aha1542CF);
    config.extended_translation = true;
    let mut a = adapter_with(config, &[]);

    assert_eq!(
        initiator::command(&mut a, CMD_EXTBIOS, &[]).unwrap(),
        vec![0x08, 1]
    );
    assert!(initiator::command(&mut a, CMD_MBINIT, &[1, 0, 0x10, 0]).is_err());

    // Wrong lock code is ignored
    initiator::command(&mut a, CMD_MBENABLE, &[0, 0]).unwrap();
    assert!(initiator::command(&mut a, CMD_MBINIT, &[1, 0, 0x10, 0]).is_err());

    initiator::command(&mut a, CMD_MBENABLE, &[0, 1]).unwrap();
    assert_eq!(
        initiator::command(&mut a, CMD_EXTBIOS, &[]).unwrap(),
        vec![0x08, 0]
    );
    initiator::command(&mut a, CMD_MBINIT, &[1, 0, 0x10, 0]).unwrap();
    assert!(a.state().ring().init);
}

#[test]
fn unlocked_without_translation() {
    let mut a = adapter(AdapterModel::Aha1542C, &[]);
    assert_eq!(
        initiator::command(&mut a, CMD_EXTBIOS, &[]).unwrap(),
        vec![0, 0]
    );
    initiator::command(&mut a, CMD_MBINIT, &[1, 0, 0x10, 0]).unwrap();
}

#[test]
fn bios_mailbox() {
    let disk = disk_pattern(4);
    let mut a = adapter(AdapterModel::Aha1542CF, &[(0, 0, 4)]);
    initiator::command(&mut a, CMD_BIOS_MBINIT, &[1, 0x00, 0x40, 0x00]).unwrap();
    assert_eq!(a.state().bios_ring().out_addr, 0x4000);

    let ccb = read10(0, 0, 2, 1, 0x6000);
    a.host_mut()
        .poke(0x5000, &ccb.serialize(MailboxFormat::Legacy24));
    let mbo = MailboxOut {
        ccb: 0x5000,
        action: MboAction::Start as u8,
    };
    a.host_mut()
        .poke(0x4000, &mbo.serialize(MailboxFormat::Legacy24));
    let irqs = a.host().irq_log().len();

    a.io_write(PORT_CMD_DATA, CMD_BIOS_START).unwrap();
    assert_eq!(a.state().bios_mailbox_req(), 1);
    a.tick(TICKS_PER_MSEC).unwrap();

    // Completion lands in the CCB, no incoming mailbox, no interrupt
    assert_eq!(a.host().peek(0x500D, 3), vec![MBI_SUCCESS, 0, 0]);
    assert_eq!(a.host().peek(0x6000, BLOCK), block_of(&disk, 2));
    assert_eq!(a.host().peek(0x4000, 1), vec![MBI_FREE]);
    assert_eq!(a.host().peek(0x4004, 4), vec![0; 4]);
    assert_eq!(a.host().irq_log().len(), irqs);
}

#[test]
fn bios_and_normal_rings() {
    let mut a = adapter(AdapterModel::Aha1542CF, &[(0, 0, 4)]);
    let mut init = Initiator::init(&mut a, MailboxFormat::Legacy24, 1, 0x1000).unwrap();
    initiator::command(&mut a, CMD_BIOS_MBINIT, &[1, 0x00, 0x40, 0x00]).unwrap();

    a.host_mut().poke(
        0x5000,
        &read10(0, 0, 0, 1, 0x6000).serialize(MailboxFormat::Legacy24),
    );
    a.host_mut().poke(0x4000, &[MboAction::Start as u8, 0x00, 0x50, 0x00]);
    a.io_write(PORT_CMD_DATA, CMD_BIOS_START).unwrap();

    let mbi = init
        .execute(&mut a, 0x2000, &read10(0, 0, 1, 1, 0x3000))
        .unwrap();
    assert_eq!(mbi.completion, MBI_SUCCESS);
    assert_eq!(a.host().peek(0x500D, 1), vec![MBI_SUCCESS]);
}

#[test]
fn setup_data_signature() {
    let mut a = adapter(AdapterModel::Aha1542CF, &[]);
    initiator::command(&mut a, CMD_BIOS_MBINIT, &[2, 0x01, 0x23, 0x40]).unwrap();
    let reply = initiator::command(&mut a, CMD_RETSETUP, &[45]).unwrap();
    let v = &reply[SETUP_VENDOR_OFFSET..];
    assert_eq!(&v[0..7], b"ADAPTEC");
    assert_eq!(&v[24..27], &[0x01, 0x23, 0x40]);
}

#[test]
fn mca_pos() {
    let mut a = adapter(AdapterModel::Aha1640, &[]);
    assert_eq!(a.name(), "AHA-1640");
    assert_eq!(a.pos_read(0), Some(0x1F));
    assert_eq!(a.pos_read(1), Some(0x0F));
    assert_eq!(a.base(), 0x330);

    a.pos_write(3, 0x42).unwrap();
    assert_eq!(a.base(), 0x234);
    assert_eq!(a.read(0x234), Some(0x30));
    assert_eq!(a.read(0x330), None);

    // IRQ 12, host ID 6
    a.pos_write(4, (6 << 5) | 4).unwrap();
    assert_eq!(a.irq(), 12);
    assert_eq!(a.host_id(), 6);

    // Card disable
    a.pos_write(2, 0).unwrap();
    assert_eq!(a.read(0x234), None);

    let a = adapter(AdapterModel::Aha1542CF, &[]);
    assert_eq!(a.pos_read(0), None);
}
