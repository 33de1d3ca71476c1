//! The UPDI instruction set: frame encoding and register views

use std::fmt;

use bitfield::bitfield;
use scroll::{LE, Pwrite};

use crate::Result;
use crate::constants::{SYNC, opcodes};

/// Operand/data width of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    pub const fn bytes(self) -> usize {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
        }
    }

    const fn data_bits(self) -> u8 {
        match self {
            Width::Byte => opcodes::DATA_8,
            Width::Word => opcodes::DATA_16,
        }
    }
}

/// Key size class. The names follow the key bit length, the
/// payload is `8 << class` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySize {
    Key64 = 0,
    Key128 = 1,
}

impl KeySize {
    pub const fn len(self) -> usize {
        8 << (self as usize)
    }
}

/// One UPDI frame, always preceded by SYNC on the wire.
///
/// Only the opcode part of each instruction is modelled here: data that
/// follows an ACK (store values, key bytes, additional burst units) goes
/// out as separate raw sends from the link layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Load from Control/Status space
    Ldcs { address: u8 },
    /// Store to Control/Status space. Not acknowledged.
    Stcs { address: u8, value: u8 },
    /// Direct load from a 16-bit address
    Lds { address: u16, width: Width },
    /// Address phase of a direct store to a 16-bit address
    Sts { address: u16, width: Width },
    /// Set the pointer register
    StPtr { address: u16 },
    /// Store through the pointer with post-increment, first unit folded in
    StPtrInc { width: Width, value: u16 },
    /// Load through the pointer with post-increment
    LdPtrInc { width: Width },
    /// Prime the repeat counter for the next burst of `count` units
    Repeat { count: u16 },
    /// Announce a key; the key bytes follow
    Key { size: KeySize },
    /// Read the System Information Block
    ReadSib { size: KeySize },
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match *self {
            Command::Ldcs { address } => opcodes::LDCS | (address & 0x0F),
            Command::Stcs { address, .. } => opcodes::STCS | (address & 0x0F),
            Command::Lds { width, .. } => opcodes::LDS | opcodes::ADDRESS_16 | width.data_bits(),
            Command::Sts { width, .. } => opcodes::STS | opcodes::ADDRESS_16 | width.data_bits(),
            Command::StPtr { .. } => opcodes::ST | opcodes::PTR_ADDRESS | opcodes::DATA_16,
            Command::StPtrInc { width, .. } => opcodes::ST | opcodes::PTR_INC | width.data_bits(),
            Command::LdPtrInc { width } => opcodes::LD | opcodes::PTR_INC | width.data_bits(),
            Command::Repeat { .. } => opcodes::REPEAT | opcodes::REPEAT_WORD,
            Command::Key { size } => opcodes::KEY | opcodes::KEY_KEY | size as u8,
            Command::ReadSib { size } => opcodes::KEY | opcodes::KEY_SIB | size as u8,
        }
    }

    pub fn into_raw(self) -> Result<Vec<u8>> {
        let opcode = self.opcode();
        match self {
            Command::Ldcs { .. }
            | Command::LdPtrInc { .. }
            | Command::Key { .. }
            | Command::ReadSib { .. } => Ok(vec![SYNC, opcode]),
            Command::Stcs { value, .. } => Ok(vec![SYNC, opcode, value]),
            Command::Lds { address, .. }
            | Command::Sts { address, .. }
            | Command::StPtr { address } => {
                let mut buf = [SYNC, opcode, 0, 0];
                buf.pwrite_with(address, 2, LE)?;
                Ok(buf.to_vec())
            }
            Command::StPtrInc { width, value } => match width {
                Width::Byte => Ok(vec![SYNC, opcode, value as u8]),
                Width::Word => {
                    let mut buf = [SYNC, opcode, 0, 0];
                    buf.pwrite_with(value, 2, LE)?;
                    Ok(buf.to_vec())
                }
            },
            Command::Repeat { count } => {
                // the device runs the next instruction count times
                let mut buf = [SYNC, opcode, 0, 0];
                buf.pwrite_with(count.wrapping_sub(1), 2, LE)?;
                Ok(buf.to_vec())
            }
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Ldcs { address } => write!(f, "LDCS from 0x{:02X}", address),
            Command::Stcs { address, .. } => write!(f, "STCS to 0x{:02X}", address),
            Command::Lds { address, .. } => write!(f, "LD from 0x{:04X}", address),
            Command::Sts { address, .. } => write!(f, "ST to 0x{:04X}", address),
            Command::StPtr { .. } => write!(f, "ST to ptr"),
            Command::StPtrInc { width, .. } => write!(f, "ST{} to *ptr++", width.bytes() * 8),
            Command::LdPtrInc { width } => write!(f, "LD{} from ptr++", width.bytes() * 8),
            Command::Repeat { count } => write!(f, "Repeat {}", count),
            Command::Key { .. } => write!(f, "Writing key"),
            Command::ReadSib { .. } => write!(f, "Reading SIB"),
        }
    }
}

/// NVM controller commands, written to NVMCTRL.CTRLA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NvmCommand {
    Nop = 0x00,
    WritePage = 0x01,
    ErasePage = 0x02,
    EraseWritePage = 0x03,
    PageBufferClear = 0x04,
    ChipErase = 0x05,
    EraseEeprom = 0x06,
    WriteFuse = 0x07,
}

bitfield! {
    /// ASI_KEY_STATUS
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct KeyStatus(u8);
    impl Debug;
    pub chip_erase, _: 3;
    pub nvm_prog, _: 4;
    pub urow_write, _: 5;
}

bitfield! {
    /// ASI_SYS_STATUS
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct SysStatus(u8);
    impl Debug;
    pub lock_status, _: 0;
    pub urow_prog, _: 2;
    pub nvm_prog, _: 3;
    pub in_sleep, _: 4;
    pub rst_sys, _: 5;
}

bitfield! {
    /// NVMCTRL.STATUS
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct NvmStatus(u8);
    impl Debug;
    pub flash_busy, _: 0;
    pub eeprom_busy, _: 1;
    pub write_error, _: 2;
}

impl NvmStatus {
    pub fn is_busy(&self) -> bool {
        self.flash_busy() || self.eeprom_busy()
    }
}
