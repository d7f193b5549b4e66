//! x54x register file

use proc_bitfield::bitfield;

/// Port offsets from the I/O base
pub const PORT_CTRL_STAT: u16 = 0;
pub const PORT_CMD_DATA: u16 = 1;
pub const PORT_INTR: u16 = 2;
pub const PORT_GEOMETRY: u16 = 3;

bitfield! {
    /// Status register (port 0, read)
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegStatus(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Invalid host adapter command
        pub invcmd: bool @ 0,
        /// Data in register full
        pub df: bool @ 2,
        /// Command/data out register full
        pub cdf: bool @ 3,
        /// Host adapter idle
        pub idle: bool @ 4,
        /// Mailbox initialization required
        pub init: bool @ 5,
        /// Internal diagnostic failure
        pub diagf: bool @ 6,
        /// Self-test in progress
        pub stst: bool @ 7,
    }
}

impl RegStatus {
    /// Ready for mailbox initialization after reset
    pub const fn ready() -> Self {
        Self(0x30)
    }
}

bitfield! {
    /// Interrupt flags register (port 2, read)
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegInterrupt(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Incoming mailbox loaded
        pub mbif: bool @ 0,
        /// Outgoing mailbox available
        pub mboa: bool @ 1,
        /// Host adapter command complete
        pub hacc: bool @ 2,
        /// SCSI reset detected
        pub rsts: bool @ 3,
        /// Any interrupt
        pub any: bool @ 7,
    }
}

pub const INTR_MBIF: u8 = 0x01;
pub const INTR_MBOA: u8 = 0x02;
pub const INTR_HACC: u8 = 0x04;
pub const INTR_RSTS: u8 = 0x08;
pub const INTR_ANY: u8 = 0x80;

bitfield! {
    /// Control register (port 0, write)
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegControl(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// SCSI bus reset
        pub scrst: bool @ 4,
        /// Interrupt reset
        pub irst: bool @ 5,
        /// Soft reset
        pub srst: bool @ 6,
        /// Hard reset
        pub hrst: bool @ 7,
    }
}
