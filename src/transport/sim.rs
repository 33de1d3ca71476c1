//! Simulated UPDI target for tests.
//!
//! Behaves like a target wired to a single-pin adapter: every written byte
//! is echoed back, then the target's own answer (if any) is queued. The
//! instruction decoder, the ASI key/reset/lock state and a small NVM
//! controller with a page buffer are emulated closely enough to run the
//! whole programming stack against it.
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;

use super::{LineConfig, Transport};
use crate::constants::{ACK, KEY_CHIPERASE, KEY_NVM, RESET_REQ_VALUE, SYNC, cs, nvmctrl, opcodes};
use crate::{Error, Result};

pub const NVMCTRL: u16 = 0x1000;
pub const SIGROW: u16 = 0x1100;
pub const FUSES: u16 = 0x1280;
pub const FLASH_START: u16 = 0x8000;
pub const FLASH_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Opcode,
    Stcs(u8),
    Lds { width: usize, addr: Vec<u8> },
    StsAddr { width: usize, addr: Vec<u8> },
    StsData { width: usize, address: u16, data: Vec<u8> },
    StPtr(Vec<u8>),
    StPtrInc { width: usize, remaining: u32, data: Vec<u8> },
    Repeat { need: usize, data: Vec<u8> },
    Key { need: usize, data: Vec<u8> },
}

pub struct SimTarget {
    pub line: Option<LineConfig>,
    pub opens: Vec<LineConfig>,
    /// Opening at this baud fails as if the port were busy
    pub fail_open_baud: Option<u32>,
    /// Target never answers (echo still comes back)
    pub silent: bool,
    /// Target stays mute until this many double breaks were seen
    pub mute_breaks: usize,
    pub double_breaks: usize,
    /// Reply with 0x00 instead of ACK to these acknowledgeable phases, counted from 0
    pub corrupt_acks: BTreeSet<usize>,
    pub acks: usize,
    /// Key bytes are not accepted
    pub reject_keys: bool,
    /// Device starts locked: NVMPROG key alone cannot unlock it
    pub locked: bool,
    pub write_error: bool,
    /// STATUS reads that report FLASH_BUSY after each NVM command
    pub busy_after_command: u32,
    pub sib: [u8; 16],

    pub sent: Vec<u8>,
    pub nvm_commands: Vec<u8>,
    pub status_reads: usize,
    pub word_units: usize,
    pub byte_units: usize,
    pub repeats: Vec<u16>,
    pub resets: usize,
    pub memory: Vec<u8>,

    rx: VecDeque<u8>,
    state: State,
    cs: [u8; 16],
    ptr: u16,
    repeat: u16,
    key_nvm: bool,
    key_erase: bool,
    reset_asserted: bool,
    prog_mode: bool,
    disabled: bool,
    busy: u32,
    page_buffer: BTreeMap<u16, u8>,
}

impl SimTarget {
    pub fn new() -> Self {
        let mut memory = vec![0u8; 0x10000];
        for b in &mut memory[FLASH_START as usize..FLASH_START as usize + FLASH_SIZE] {
            *b = 0xFF;
        }
        memory[SIGROW as usize..SIGROW as usize + 3].copy_from_slice(&[0x1E, 0x93, 0x22]);
        for (i, b) in memory[FUSES as usize..FUSES as usize + 9].iter_mut().enumerate() {
            *b = i as u8;
        }
        let mut cs_regs = [0u8; 16];
        cs_regs[cs::STATUSA as usize] = 0x30;
        let mut sib = [0u8; 16];
        sib.copy_from_slice(b"tinyAVR P:0D:0-3");
        SimTarget {
            line: None,
            opens: vec![],
            fail_open_baud: None,
            silent: false,
            mute_breaks: 0,
            double_breaks: 0,
            corrupt_acks: BTreeSet::new(),
            acks: 0,
            reject_keys: false,
            locked: false,
            write_error: false,
            busy_after_command: 0,
            sib,
            sent: vec![],
            nvm_commands: vec![],
            status_reads: 0,
            word_units: 0,
            byte_units: 0,
            repeats: vec![],
            resets: 0,
            memory,
            rx: VecDeque::new(),
            state: State::Idle,
            cs: cs_regs,
            ptr: 0,
            repeat: 0,
            key_nvm: false,
            key_erase: false,
            reset_asserted: false,
            prog_mode: false,
            disabled: false,
            busy: 0,
            page_buffer: BTreeMap::new(),
        }
    }

    /// Same target, already in programming mode
    pub fn in_prog_mode() -> Self {
        let mut sim = Self::new();
        sim.prog_mode = true;
        sim
    }

    pub fn is_prog_mode(&self) -> bool {
        self.prog_mode
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn flash(&self) -> &[u8] {
        &self.memory[FLASH_START as usize..FLASH_START as usize + FLASH_SIZE]
    }

    fn responsive(&self) -> bool {
        !self.silent && !self.disabled && self.mute_breaks == 0
    }

    fn ack(&mut self) -> bool {
        let n = self.acks;
        self.acks += 1;
        if self.corrupt_acks.contains(&n) {
            self.rx.push_back(0x00);
            self.state = State::Idle;
            false
        } else {
            self.rx.push_back(ACK);
            true
        }
    }

    fn feed(&mut self, b: u8) {
        let state = std::mem::replace(&mut self.state, State::Idle);
        self.state = match state {
            State::Idle => {
                if b == SYNC {
                    State::Opcode
                } else {
                    State::Idle
                }
            }
            State::Opcode => self.decode(b),
            State::Stcs(address) => {
                self.cs_write(address, b);
                State::Idle
            }
            State::Lds { width, mut addr } => {
                addr.push(b);
                if addr.len() < 2 {
                    State::Lds { width, addr }
                } else {
                    let address = u16::from_le_bytes([addr[0], addr[1]]);
                    for i in 0..width {
                        let v = self.mem_read(address.wrapping_add(i as u16));
                        self.rx.push_back(v);
                    }
                    State::Idle
                }
            }
            State::StsAddr { width, mut addr } => {
                addr.push(b);
                if addr.len() < 2 {
                    State::StsAddr { width, addr }
                } else if self.ack() {
                    State::StsData {
                        width,
                        address: u16::from_le_bytes([addr[0], addr[1]]),
                        data: vec![],
                    }
                } else {
                    State::Idle
                }
            }
            State::StsData {
                width,
                address,
                mut data,
            } => {
                data.push(b);
                if data.len() < width {
                    State::StsData {
                        width,
                        address,
                        data,
                    }
                } else {
                    for (i, v) in data.into_iter().enumerate() {
                        self.mem_write(address.wrapping_add(i as u16), v);
                    }
                    self.ack();
                    State::Idle
                }
            }
            State::StPtr(mut data) => {
                data.push(b);
                if data.len() < 2 {
                    State::StPtr(data)
                } else {
                    self.ptr = u16::from_le_bytes([data[0], data[1]]);
                    self.ack();
                    State::Idle
                }
            }
            State::StPtrInc {
                width,
                remaining,
                mut data,
            } => {
                data.push(b);
                if data.len() < width {
                    State::StPtrInc {
                        width,
                        remaining,
                        data,
                    }
                } else {
                    for v in data {
                        let ptr = self.ptr;
                        self.mem_write(ptr, v);
                        self.ptr = self.ptr.wrapping_add(1);
                    }
                    if width == 2 {
                        self.word_units += 1;
                    } else {
                        self.byte_units += 1;
                    }
                    if !self.ack() || remaining <= 1 {
                        State::Idle
                    } else {
                        State::StPtrInc {
                            width,
                            remaining: remaining - 1,
                            data: vec![],
                        }
                    }
                }
            }
            State::Repeat { need, mut data } => {
                data.push(b);
                if data.len() < need {
                    State::Repeat { need, data }
                } else {
                    self.repeat = if need == 2 {
                        u16::from_le_bytes([data[0], data[1]])
                    } else {
                        u16::from(data[0])
                    };
                    self.repeats.push(self.repeat.wrapping_add(1));
                    State::Idle
                }
            }
            State::Key { need, mut data } => {
                data.push(b);
                if data.len() < need {
                    State::Key { need, data }
                } else {
                    data.reverse();
                    if !self.reject_keys {
                        if data == KEY_NVM {
                            self.key_nvm = true;
                        } else if data == KEY_CHIPERASE {
                            self.key_erase = true;
                        }
                    }
                    State::Idle
                }
            }
        };
    }

    fn decode(&mut self, b: u8) -> State {
        let width = if b & opcodes::DATA_16 != 0 { 2 } else { 1 };
        match b & 0xE0 {
            opcodes::LDCS => {
                let v = self.cs_read(b & 0x0F);
                self.rx.push_back(v);
                State::Idle
            }
            opcodes::STCS => State::Stcs(b & 0x0F),
            opcodes::LDS => State::Lds {
                width,
                addr: vec![],
            },
            opcodes::STS => State::StsAddr {
                width,
                addr: vec![],
            },
            opcodes::LD => {
                let units = u32::from(self.repeat) + 1;
                self.repeat = 0;
                for _ in 0..units * width as u32 {
                    let ptr = self.ptr;
                    let v = self.mem_read(ptr);
                    self.rx.push_back(v);
                    self.ptr = self.ptr.wrapping_add(1);
                }
                State::Idle
            }
            opcodes::ST => {
                if b & 0x0C == opcodes::PTR_ADDRESS {
                    State::StPtr(vec![])
                } else {
                    let remaining = u32::from(self.repeat) + 1;
                    self.repeat = 0;
                    State::StPtrInc {
                        width,
                        remaining,
                        data: vec![],
                    }
                }
            }
            opcodes::REPEAT => State::Repeat {
                need: usize::from(b & 0x03) + 1,
                data: vec![],
            },
            _ => {
                let len = 8 << (b & 0x03);
                if b & opcodes::KEY_SIB != 0 {
                    let sib = self.sib;
                    self.rx.extend(sib.iter().take(len));
                    State::Idle
                } else {
                    State::Key {
                        need: len,
                        data: vec![],
                    }
                }
            }
        }
    }

    fn cs_read(&mut self, address: u8) -> u8 {
        match address {
            cs::ASI_KEY_STATUS => {
                (u8::from(self.key_erase) << 3) | (u8::from(self.key_nvm) << 4)
            }
            cs::ASI_SYS_STATUS => (u8::from(self.prog_mode) << 3) | u8::from(self.locked),
            _ => self.cs[address as usize],
        }
    }

    fn cs_write(&mut self, address: u8, value: u8) {
        self.cs[address as usize] = value;
        match address {
            cs::ASI_RESET_REQ if value == RESET_REQ_VALUE => self.reset_asserted = true,
            cs::ASI_RESET_REQ if value == 0 && self.reset_asserted => {
                self.reset_asserted = false;
                self.resets += 1;
                if self.key_erase {
                    let start = FLASH_START as usize;
                    self.memory[start..start + FLASH_SIZE].fill(0xFF);
                    self.locked = false;
                    self.key_erase = false;
                }
                if self.key_nvm && !self.locked {
                    self.prog_mode = true;
                    self.key_nvm = false;
                }
            }
            cs::CTRLB if value & (1 << cs::CTRLB_UPDIDIS_BIT) != 0 => {
                self.disabled = true;
                self.prog_mode = false;
                self.key_nvm = false;
                self.key_erase = false;
            }
            _ => (),
        }
    }

    fn in_flash(address: u16) -> bool {
        (address as usize) >= FLASH_START as usize
            && (address as usize) < FLASH_START as usize + FLASH_SIZE
    }

    fn mem_read(&mut self, address: u16) -> u8 {
        if address == NVMCTRL + nvmctrl::STATUS {
            self.status_reads += 1;
            if self.write_error {
                0x04
            } else if self.busy > 0 {
                self.busy -= 1;
                0x01
            } else {
                0x00
            }
        } else {
            self.memory[address as usize]
        }
    }

    fn mem_write(&mut self, address: u16, value: u8) {
        if address == NVMCTRL + nvmctrl::CTRLA {
            self.nvm_command(value);
        } else if Self::in_flash(address) {
            if self.prog_mode {
                self.page_buffer.insert(address, value);
            }
        } else {
            self.memory[address as usize] = value;
        }
    }

    fn nvm_command(&mut self, cmd: u8) {
        self.nvm_commands.push(cmd);
        self.busy = self.busy_after_command;
        if !self.prog_mode {
            return;
        }
        match cmd {
            0x01 | 0x03 => {
                for (address, value) in std::mem::take(&mut self.page_buffer) {
                    if cmd == 0x03 {
                        self.memory[address as usize] = value;
                    } else {
                        self.memory[address as usize] &= value;
                    }
                }
            }
            0x04 => self.page_buffer.clear(),
            0x05 => {
                let start = FLASH_START as usize;
                self.memory[start..start + FLASH_SIZE].fill(0xFF);
            }
            0x07 => {
                let base = NVMCTRL as usize;
                let target = u16::from_le_bytes([
                    self.memory[base + nvmctrl::ADDRL as usize],
                    self.memory[base + nvmctrl::ADDRH as usize],
                ]);
                self.memory[target as usize] = self.memory[base + nvmctrl::DATAL as usize];
            }
            _ => (),
        }
    }
}

impl Transport for SimTarget {
    fn open(&mut self, line: LineConfig) -> Result<()> {
        self.line = None;
        self.rx.clear();
        if self.fail_open_baud == Some(line.baud) {
            return Err(Error::Io(io::Error::other("port busy")));
        }
        self.opens.push(line);
        self.line = Some(line);
        Ok(())
    }

    fn close(&mut self) {
        self.line = None;
        self.rx.clear();
    }

    fn is_open(&self) -> bool {
        self.line.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let line = self.line.ok_or(Error::PortClosed)?;
        self.sent.extend_from_slice(data);
        self.rx.extend(data.iter().copied());
        if line.baud == LineConfig::double_break().baud {
            self.double_breaks += 1;
            self.mute_breaks = self.mute_breaks.saturating_sub(1);
            self.disabled = false;
            self.state = State::Idle;
            return Ok(data.len());
        }
        for &b in data {
            if self.responsive() {
                self.feed(b);
            }
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.line.is_none() {
            return Err(Error::PortClosed);
        }
        let n = buf.len().min(self.rx.len());
        for b in buf.iter_mut().take(n) {
            *b = self.rx.pop_front().unwrap_or_default();
        }
        Ok(n)
    }
}
