
pub const SYNC: u8 = 0x55;
pub const ACK: u8 = 0x40;
pub const BREAK: u8 = 0x00;

/// REPEAT takes `count - 1` in a single byte on the device side
pub const MAX_REPEAT_SIZE: usize = 0xFF;

pub const SIB_LENGTH: usize = 16;

pub const KEY_NVM: &[u8] = b"NVMProg ";
pub const KEY_CHIPERASE: &[u8] = b"NVMErase";

pub const RESET_REQ_VALUE: u8 = 0x59;

/// Fuse index of the lock bits
pub const LOCKBIT_FUSE: u8 = 0x0A;

/// Instruction opcodes and operand bits
pub mod opcodes {
    pub const LDS: u8 = 0x00;
    pub const STS: u8 = 0x40;
    pub const LD: u8 = 0x20;
    pub const ST: u8 = 0x60;
    pub const LDCS: u8 = 0x80;
    pub const STCS: u8 = 0xC0;
    pub const REPEAT: u8 = 0xA0;
    pub const KEY: u8 = 0xE0;

    pub const PTR: u8 = 0x00;
    pub const PTR_INC: u8 = 0x04;
    pub const PTR_ADDRESS: u8 = 0x08;

    pub const ADDRESS_8: u8 = 0x00;
    pub const ADDRESS_16: u8 = 0x04;

    pub const DATA_8: u8 = 0x00;
    pub const DATA_16: u8 = 0x01;

    pub const KEY_SIB: u8 = 0x04;
    pub const KEY_KEY: u8 = 0x00;

    pub const REPEAT_BYTE: u8 = 0x00;
    pub const REPEAT_WORD: u8 = 0x01;
}

/// Control/Status space, including the ASI block
pub mod cs {
    pub const STATUSA: u8 = 0x00;
    pub const STATUSB: u8 = 0x01;
    pub const CTRLA: u8 = 0x02;
    pub const CTRLB: u8 = 0x03;
    pub const ASI_KEY_STATUS: u8 = 0x07;
    pub const ASI_RESET_REQ: u8 = 0x08;
    pub const ASI_CTRLA: u8 = 0x09;
    pub const ASI_SYS_CTRLA: u8 = 0x0A;
    pub const ASI_SYS_STATUS: u8 = 0x0B;
    pub const ASI_CRC_STATUS: u8 = 0x0C;

    pub const CTRLA_IBDLY_BIT: u8 = 7;
    pub const CTRLB_CCDETDIS_BIT: u8 = 3;
    pub const CTRLB_UPDIDIS_BIT: u8 = 2;
}

/// NVM controller register offsets
pub mod nvmctrl {
    pub const CTRLA: u16 = 0x00;
    pub const CTRLB: u16 = 0x01;
    pub const STATUS: u16 = 0x02;
    pub const INTCTRL: u16 = 0x03;
    pub const INTFLAGS: u16 = 0x04;
    pub const DATAL: u16 = 0x06;
    pub const DATAH: u16 = 0x07;
    pub const ADDRL: u16 = 0x08;
    pub const ADDRH: u16 = 0x09;
}
