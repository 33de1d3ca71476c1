//! Chip flashing logic.
use std::fmt;

use crate::app::{App, MAX_BURST};
use crate::constants::{LOCKBIT_FUSE, SIB_LENGTH, nvmctrl};
use crate::device::Device;
use crate::format::{HexStream, read_ihex_stream, write_ihex_stream};
use crate::link::Link;
use crate::progress::{NoProgress, Progress};
use crate::protocol::NvmCommand;
use crate::timing::Timing;
use crate::transport::{SerialTransport, Transport};
use crate::{Error, Result};

/// Consecutive page failures tolerated before a transfer aborts
const MAX_ERRORS: u32 = 3;

/// Device signature, from the signature row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 3]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// Decoded System Information Block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub family: String,
    pub nvm_version: String,
    pub ocd_version: String,
    pub osc_frequency: String,
    pub raw: [u8; SIB_LENGTH],
}

impl SystemInfo {
    pub fn parse(raw: [u8; SIB_LENGTH]) -> Self {
        let field = |range: std::ops::Range<usize>| {
            String::from_utf8_lossy(&raw[range])
                .trim_matches(|c: char| c.is_whitespace() || c == '\0')
                .to_string()
        };
        SystemInfo {
            family: field(0..7),
            nvm_version: field(8..11),
            ocd_version: field(11..14),
            osc_frequency: field(15..16),
            raw,
        }
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Family: {}, NVM: {}, OCD: {}, OSC: {}",
            self.family, self.nvm_version, self.ocd_version, self.osc_frequency
        )
    }
}

pub struct Flashing<T: Transport> {
    app: App<T>,
    progress: Box<dyn Progress>,
    /// Set while the device is held in NVM programming mode
    prog_mode: bool,
}

impl Flashing<SerialTransport> {
    pub fn new_from_serial(port: &str, baud: u32, device: Device, timing: Timing) -> Result<Self> {
        Self::connect(SerialTransport::new(port), baud, device, timing)
    }
}

impl<T: Transport> Flashing<T> {
    /// Bring the UPDI link up over `transport`
    pub fn connect(transport: T, baud: u32, device: Device, timing: Timing) -> Result<Self> {
        log::debug!("Connecting to {} at {} baud", device.name, baud);
        let link = Link::init(transport, baud, &timing)?;
        Ok(Flashing {
            app: App::new(link, device, timing),
            progress: Box::new(NoProgress),
            prog_mode: false,
        })
    }

    pub fn with_progress<P: Progress + 'static>(mut self, progress: P) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn set_progress(&mut self, progress: Box<dyn Progress>) {
        self.progress = progress;
    }

    pub fn device(&self) -> &Device {
        self.app.device()
    }

    pub fn is_in_prog_mode(&self) -> bool {
        self.prog_mode
    }

    pub fn transport(&self) -> &T {
        self.app.transport()
    }

    /// Close the session, handing the (closed) transport back
    pub fn into_transport(self) -> T {
        self.app.into_transport()
    }

    fn ensure_prog_mode(&self) -> Result<()> {
        if !self.prog_mode {
            log::error!("Enter progmode first!");
            return Err(Error::NotInProgMode);
        }
        Ok(())
    }

    /// Absolute address of `offset` bytes past `address`
    fn offset_address(address: u16, offset: usize) -> Result<u16> {
        let absolute = u32::from(address) + offset as u32;
        u16::try_from(absolute).map_err(|_| Error::AddressOutOfRange(absolute))
    }

    fn check_range(address: u16, len: usize) -> Result<()> {
        if usize::from(address) + len > 0x1_0000 {
            return Err(Error::AddressOutOfRange(
                u32::from(address).saturating_add(len as u32),
            ));
        }
        Ok(())
    }

    pub fn enter_progmode(&mut self) -> Result<()> {
        let result = self.app.enter_progmode();
        self.prog_mode = result.is_ok();
        result
    }

    pub fn leave_progmode(&mut self) -> Result<()> {
        let result = self.app.leave_progmode();
        self.prog_mode = false;
        result
    }

    /// Unlock and erase a locked device
    pub fn unlock_device(&mut self) -> Result<()> {
        if self.prog_mode {
            log::warn!("Device already unlocked");
            return Ok(());
        }
        self.app.unlock()?;
        self.prog_mode = true;
        Ok(())
    }

    pub fn chip_erase(&mut self) -> Result<()> {
        self.ensure_prog_mode()?;
        self.app.chip_erase()?;
        log::info!("Chip erased");
        Ok(())
    }

    fn read_page(&mut self, address: u16, data: &mut [u8]) -> Result<()> {
        // word access, odd tails are read one byte long and trimmed
        let mut page = vec![0xFF; data.len() + data.len() % 2];
        for (i, burst) in page.chunks_mut(MAX_BURST).enumerate() {
            let burst_address = address.wrapping_add((i * MAX_BURST) as u16);
            self.app.read_data_words(burst_address, burst)?;
        }
        data.copy_from_slice(&page[..data.len()]);
        Ok(())
    }

    fn write_page(&mut self, address: u16, data: &[u8]) -> Result<()> {
        if data.len() % 2 == 0 {
            return self.app.write_nvm(address, data, true);
        }
        let mut page = data.to_vec();
        page.push(0xFF);
        self.app.write_nvm(address, &page, true)
    }

    /// Read `buf.len()` bytes of flash starting at `address`, page by page
    pub fn read_flash(&mut self, address: u16, buf: &mut [u8]) -> Result<()> {
        self.ensure_prog_mode()?;
        Self::check_range(address, buf.len())?;
        let page_size = usize::from(self.device().page_size);
        let pages = self.device().pages(buf.len());

        log::info!("Reading {} bytes from 0x{:04X}", buf.len(), address);
        self.progress.start(pages);
        let mut errors = 0;
        let mut done = 0;
        while done < pages {
            let offset = done * page_size;
            let end = buf.len().min(offset + page_size);
            let page_address = Self::offset_address(address, offset)?;
            log::debug!("Reading page at 0x{:04X}", page_address);
            match self.read_page(page_address, &mut buf[offset..end]) {
                Ok(()) => {
                    errors = 0;
                    done += 1;
                    self.progress.step(done, pages);
                }
                Err(e) => {
                    errors += 1;
                    log::warn!("Reading page at 0x{:04X} failed: {}", page_address, e);
                    if errors > MAX_ERRORS {
                        self.progress.finish(done, pages);
                        return Err(e);
                    }
                }
            }
        }
        self.progress.finish(done, pages);
        Ok(())
    }

    /// Write `data` to flash starting at `address`, page by page. The pages
    /// must be erased.
    pub fn write_flash(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.ensure_prog_mode()?;
        Self::check_range(address, data.len())?;
        let page_size = usize::from(self.device().page_size);
        let pages = self.device().pages(data.len());

        log::info!("Writing {} bytes to 0x{:04X}", data.len(), address);
        self.progress.start(pages);
        let mut errors = 0;
        let mut done = 0;
        while done < pages {
            let offset = done * page_size;
            let end = data.len().min(offset + page_size);
            let page_address = Self::offset_address(address, offset)?;
            log::debug!("Writing page at 0x{:04X}", page_address);
            match self.write_page(page_address, &data[offset..end]) {
                Ok(()) => {
                    errors = 0;
                    done += 1;
                    self.progress.step(done, pages);
                }
                Err(e) => {
                    errors += 1;
                    log::warn!("Writing page at 0x{:04X} failed: {}", page_address, e);
                    if errors > MAX_ERRORS {
                        self.progress.finish(done, pages);
                        return Err(e);
                    }
                }
            }
        }
        self.progress.finish(done, pages);
        Ok(())
    }

    pub fn read_fuse(&mut self, fuse: u8) -> Result<u8> {
        self.ensure_prog_mode()?;
        let address = self.device().fuses_address + u16::from(fuse);
        let value = self.app.link().ld(address)?;
        log::debug!("Fuse {} = 0x{:02X}", fuse, value);
        Ok(value)
    }

    /// Fuses are written through the NVM controller: address, data, then
    /// the WRITE_FUSE command.
    pub fn write_fuse(&mut self, fuse: u8, value: u8) -> Result<()> {
        self.ensure_prog_mode()?;
        if let Err(e) = self.app.wait_flash_ready() {
            log::error!("Flash not ready for fuse setting");
            return Err(e);
        }

        let device = self.device();
        let fuse_address = device.fuses_address + u16::from(fuse);
        let nvm = device.nvmctrl_address;
        let [lo, hi] = fuse_address.to_le_bytes();

        self.app.write_data(nvm + nvmctrl::ADDRL, &[lo])?;
        self.app.write_data(nvm + nvmctrl::ADDRH, &[hi])?;
        self.app.write_data(nvm + nvmctrl::DATAL, &[value])?;
        self.app.execute_nvm_command(NvmCommand::WriteFuse)?;
        log::info!("Fuse {} set to 0x{:02X}", fuse, value);
        Ok(())
    }

    /// Clear the lock bits. Only a chip erase (`unlock_device`) undoes it.
    pub fn lock(&mut self) -> Result<()> {
        log::info!("Locking device");
        self.write_fuse(LOCKBIT_FUSE, 0x00)
    }

    pub fn read_signature(&mut self) -> Result<Signature> {
        self.ensure_prog_mode()?;
        let mut signature = [0u8; 3];
        let address = self.device().sigrow_address;
        self.app.read_data(address, &mut signature)?;
        Ok(Signature(signature))
    }

    /// Read the SIB. Works outside programming mode.
    pub fn system_info(&mut self) -> Result<SystemInfo> {
        let raw = self.app.link().read_sib()?;
        let info = SystemInfo::parse(raw);
        log::debug!("SIB: {}", info);
        Ok(info)
    }

    /// Decode an Intel HEX stream into a `len`-byte image of the memory at
    /// `address` and write the touched pages. Returns the written range
    /// relative to `address`, `None` when the stream carried no data.
    pub fn load_ihex_stream<S: HexStream + ?Sized>(
        &mut self,
        stream: &mut S,
        address: u16,
        len: usize,
    ) -> Result<Option<(usize, usize)>> {
        self.ensure_prog_mode()?;
        let mut image = vec![0xFF; len];
        let touched = match read_ihex_stream(stream, &mut image) {
            Ok(touched) => touched,
            Err(e) => {
                log::error!("Problem reading Hex file");
                return Err(e.into());
            }
        };
        let Some((min, max)) = touched else {
            log::warn!("No data in Hex file, nothing written");
            return Ok(None);
        };

        let page_size = usize::from(self.device().page_size.max(1));
        let start = min / page_size * page_size;
        let end = max.div_ceil(page_size).saturating_mul(page_size).min(len);
        let start_address = Self::offset_address(address, start)?;
        self.write_flash(start_address, &image[start..end])?;
        Ok(Some((start, end)))
    }

    /// Read `len` bytes at `address` and encode them as Intel HEX
    pub fn save_ihex_stream<S: HexStream + ?Sized>(
        &mut self,
        stream: &mut S,
        address: u16,
        len: usize,
    ) -> Result<()> {
        let mut image = vec![0xFF; len];
        if let Err(e) = self.read_flash(address, &mut image) {
            log::error!("Reading from device failed");
            return Err(e);
        }
        write_ihex_stream(stream, &image)?;
        Ok(())
    }
}
