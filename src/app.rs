//! UPDI application layer: device-level operations built on the link.
use std::{thread::sleep, time::Duration};

use crate::constants::{KEY_CHIPERASE, KEY_NVM, MAX_REPEAT_SIZE, RESET_REQ_VALUE, cs, nvmctrl};
use crate::device::Device;
use crate::link::Link;
use crate::protocol::{KeySize, KeyStatus, NvmCommand, NvmStatus, SysStatus};
use crate::timing::Timing;
use crate::transport::Transport;
use crate::{Error, Result};

/// Longest byte transfer one REPEAT burst can carry
pub const MAX_BURST: usize = MAX_REPEAT_SIZE + 1;
/// Longest word-mode write burst, in bytes
pub const MAX_WORD_BURST: usize = MAX_BURST << 1;
/// Longest word-mode read burst, in words
pub const MAX_READ_WORDS: usize = (MAX_REPEAT_SIZE >> 1) + 1;

pub struct App<T: Transport> {
    link: Link<T>,
    device: Device,
    timing: Timing,
}

impl<T: Transport> App<T> {
    pub fn new(link: Link<T>, device: Device, timing: Timing) -> Self {
        App {
            link,
            device,
            timing,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn link(&mut self) -> &mut Link<T> {
        &mut self.link
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn into_transport(self) -> T {
        self.link.into_transport()
    }

    fn nvmctrl(&self, register: u16) -> u16 {
        self.device.nvmctrl_address + register
    }

    /// Apply or release an UPDI reset condition
    pub fn reset(&mut self, apply: bool) -> Result<()> {
        if apply {
            log::info!("Apply reset");
            self.link.stcs(cs::ASI_RESET_REQ, RESET_REQ_VALUE)
        } else {
            log::info!("Release reset");
            self.link.stcs(cs::ASI_RESET_REQ, 0x00)
        }
    }

    fn toggle_reset(&mut self) -> Result<()> {
        self.reset(true)?;
        self.reset(false)
    }

    fn sys_status(&mut self) -> Result<SysStatus> {
        Ok(SysStatus(self.link.ldcs(cs::ASI_SYS_STATUS)?))
    }

    fn key_status(&mut self) -> Result<KeyStatus> {
        let status = KeyStatus(self.link.ldcs(cs::ASI_KEY_STATUS)?);
        log::info!("Key status = 0x{:02X}", status.0);
        Ok(status)
    }

    /// Checks whether the NVMPROG flag is up
    pub fn in_prog_mode(&mut self) -> Result<bool> {
        Ok(self.sys_status()?.nvm_prog())
    }

    /// Wait for LOCKSTATUS to clear. All devices boot up locked until
    /// proven otherwise.
    pub fn wait_unlocked(&mut self, timeout: Duration) -> Result<()> {
        for _ in 0..self.timing.polls(timeout) {
            sleep(self.timing.poll_interval);
            if !self.sys_status()?.lock_status() {
                return Ok(());
            }
        }
        log::warn!("Timeout by waiting for device to unlock");
        Err(Error::Timeout("device to unlock"))
    }

    pub fn enter_progmode(&mut self) -> Result<()> {
        if self.in_prog_mode()? {
            log::warn!("Already in NVM programming mode");
            return Ok(());
        }

        log::info!("Entering NVM programming mode");
        self.link.send_key(KEY_NVM, KeySize::Key64)?;

        if !self.key_status()?.nvm_prog() {
            log::warn!("Key not accepted");
            return Err(Error::KeyRejected("NVMProg"));
        }

        self.toggle_reset()?;

        if let Err(e) = self.wait_unlocked(self.timing.unlock_timeout) {
            log::error!("Failed to enter NVM programming mode: device is locked");
            return Err(e);
        }

        if !self.in_prog_mode()? {
            log::error!("Failed to enter NVM programming mode");
            return Err(Error::NotInProgMode);
        }

        log::info!("Now in NVM programming mode");
        Ok(())
    }

    /// Chip erase through the erase key. Works on locked devices, where the
    /// NVM controller refuses to erase.
    pub fn unlock(&mut self) -> Result<()> {
        self.link.send_key(KEY_CHIPERASE, KeySize::Key64)?;

        if !self.key_status()?.chip_erase() {
            log::warn!("Key not accepted");
            return Err(Error::KeyRejected("NVMErase"));
        }

        self.toggle_reset()?;

        if let Err(e) = self.wait_unlocked(self.timing.unlock_timeout) {
            log::error!("Failed to chip erase using key!");
            return Err(e);
        }
        Ok(())
    }

    /// Disable UPDI, which releases any keys enabled
    pub fn leave_progmode(&mut self) -> Result<()> {
        log::info!("Leaving NVM programming mode");
        self.toggle_reset()?;
        self.link.stcs(
            cs::CTRLB,
            (1 << cs::CTRLB_UPDIDIS_BIT) | (1 << cs::CTRLB_CCDETDIS_BIT),
        )
    }

    /// Wait for the NVM controller to be ready
    pub fn wait_flash_ready(&mut self) -> Result<()> {
        log::debug!("Wait flash ready");
        let status_address = self.nvmctrl(nvmctrl::STATUS);
        for _ in 0..self.timing.polls(self.timing.flash_ready_timeout) {
            sleep(self.timing.poll_interval);
            let status = NvmStatus(self.link.ld(status_address)?);
            if status.write_error() {
                log::error!("NVM error");
                return Err(Error::NvmWrite);
            }
            if !status.is_busy() {
                return Ok(());
            }
        }
        log::warn!("Waiting for flash ready timed out");
        Err(Error::Timeout("flash ready"))
    }

    pub fn execute_nvm_command(&mut self, command: NvmCommand) -> Result<()> {
        log::debug!("NVMCMD {:?} executing", command);
        let address = self.nvmctrl(nvmctrl::CTRLA);
        self.link.st(address, command as u8)
    }

    /// Chip erase through the NVM controller. Not possible on locked
    /// devices, use [`App::unlock`] there.
    pub fn chip_erase(&mut self) -> Result<()> {
        log::info!("Chip erase using NVM CTRL");
        if let Err(e) = self.wait_flash_ready() {
            log::warn!("Timeout waiting for flash ready before erase");
            return Err(e);
        }
        self.execute_nvm_command(NvmCommand::ChipErase)?;
        if let Err(e) = self.wait_flash_ready() {
            log::warn!("Timeout by waiting for flash ready after erase");
            return Err(e);
        }
        Ok(())
    }

    /// Write a number of words to memory; `data` is a byte buffer
    pub fn write_data_words(&mut self, address: u16, data: &[u8]) -> Result<()> {
        if data.len() == 2 {
            let value = u16::from_le_bytes([data[0], data[1]]);
            return self.link.st16(address, value);
        }
        if data.is_empty() || data.len() > MAX_WORD_BURST || data.len() % 2 != 0 {
            log::warn!("Invalid length");
            return Err(Error::InvalidLength {
                len: data.len(),
                max: MAX_WORD_BURST,
            });
        }
        self.link.st_ptr(address)?;
        self.link.repeat((data.len() >> 1) as u16)?;
        self.link.st_ptr_inc16(data)
    }

    /// Write a number of bytes to memory
    pub fn write_data(&mut self, address: u16, data: &[u8]) -> Result<()> {
        match data.len() {
            1 => return self.link.st(address, data[0]),
            2 => {
                self.link.st(address, data[0])?;
                return self.link.st(address.wrapping_add(1), data[1]);
            }
            _ => (),
        }
        if data.is_empty() || data.len() > MAX_BURST {
            log::warn!("Invalid length");
            return Err(Error::InvalidLength {
                len: data.len(),
                max: MAX_BURST,
            });
        }
        self.link.st_ptr(address)?;
        self.link.repeat(data.len() as u16)?;
        self.link.st_ptr_inc(data)
    }

    /// Write one page to NVM with PAGE_WRITE, which requires the page to be
    /// erased already. Flash takes word access.
    pub fn write_nvm(&mut self, address: u16, data: &[u8], use_word_access: bool) -> Result<()> {
        if let Err(e) = self.wait_flash_ready() {
            log::warn!("Timeout by waiting for flash ready before page buffer clear");
            return Err(e);
        }

        log::debug!("Clear page buffer");
        self.execute_nvm_command(NvmCommand::PageBufferClear)?;

        if let Err(e) = self.wait_flash_ready() {
            log::warn!("Timeout by waiting for flash ready after page buffer clear");
            return Err(e);
        }

        if use_word_access {
            self.write_data_words(address, data)?;
        } else {
            self.write_data(address, data)?;
        }

        log::debug!("Committing page");
        self.execute_nvm_command(NvmCommand::WritePage)?;

        if let Err(e) = self.wait_flash_ready() {
            log::warn!("Timeout by waiting for flash ready after page write");
            return Err(e);
        }
        Ok(())
    }

    /// Read `buf.len()` bytes of data
    pub fn read_data(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        log::debug!("Reading {} bytes from 0x{:04X}", buf.len(), address);
        if buf.is_empty() || buf.len() > MAX_BURST {
            log::error!("Cant read that many bytes in one go");
            return Err(Error::InvalidLength {
                len: buf.len(),
                max: MAX_BURST,
            });
        }
        self.link.st_ptr(address)?;
        if buf.len() > 1 {
            self.link.repeat(buf.len() as u16)?;
        }
        self.link.ld_ptr_inc(buf)
    }

    /// Read `buf.len() / 2` words of data
    pub fn read_data_words(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        let words = buf.len() >> 1;
        log::debug!("Reading {} words from 0x{:04X}", words, address);
        if words == 0 || words > MAX_READ_WORDS || buf.len() % 2 != 0 {
            log::error!("Cant read that many words in one go");
            return Err(Error::InvalidLength {
                len: buf.len(),
                max: MAX_READ_WORDS << 1,
            });
        }
        self.link.st_ptr(address)?;
        if words > 1 {
            self.link.repeat(words as u16)?;
        }
        self.link.ld_ptr_inc16(buf)
    }
}
