//! UPDI link layer: instruction exchange over the physical layer.
use scroll::{LE, Pread};

use crate::constants::{ACK, BREAK, SIB_LENGTH, cs};
use crate::phy::Phy;
use crate::protocol::{Command, KeySize, Width};
use crate::timing::Timing;
use crate::transport::Transport;
use crate::{Error, Result};

/// Link bring-up attempts before giving up
const INIT_ATTEMPTS: u32 = 3;

pub struct Link<T: Transport> {
    phy: Phy<T>,
}

impl<T: Transport> Link<T> {
    /// Open the port, send a BREAK and bring the link up, falling back to a
    /// double break when the device does not answer.
    pub fn init(transport: T, baud: u32, timing: &Timing) -> Result<Self> {
        let mut phy = Phy::open(transport, baud)?;
        if let Err(e) = phy.send(&[BREAK]) {
            phy.close();
            return Err(e);
        }
        let mut link = Link { phy };

        for attempt in 1..=INIT_ATTEMPTS {
            let checked = link.start().and_then(|_| link.check());
            match checked {
                Ok(true) => return Ok(link),
                Ok(false) => (),
                Err(e) => log::warn!("UPDI check failed: {}", e),
            }
            log::warn!(
                "UPDI not OK - reinitialisation required ({}/{})",
                attempt,
                INIT_ATTEMPTS
            );
            if let Err(e) = link
                .phy
                .double_break(timing.break_settle)
                .and_then(|_| link.phy.reopen())
            {
                log::error!("UPDI initialization failed");
                link.phy.close();
                return Err(e);
            }
        }

        log::error!("UPDI initialization failed");
        link.phy.close();
        Err(Error::LinkInit(INIT_ATTEMPTS))
    }

    /// Wrap an already opened physical layer without the bring-up
    pub fn from_phy(phy: Phy<T>) -> Self {
        Link { phy }
    }

    pub fn close(&mut self) {
        self.phy.close();
    }

    pub fn transport(&self) -> &T {
        self.phy.transport()
    }

    pub fn into_transport(self) -> T {
        self.phy.into_transport()
    }

    fn send_command(&mut self, cmd: Command) -> Result<()> {
        log::debug!("{}", cmd);
        let raw = cmd.into_raw()?;
        log::trace!("=> {}", hex::encode(&raw));
        self.phy.send(&raw)
    }

    fn receive_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.phy.receive(&mut buf)?;
        Ok(buf[0])
    }

    fn expect_ack(&mut self, stage: &'static str) -> Result<()> {
        let response = self.receive_byte()?;
        if response != ACK {
            log::warn!("{}: no ACK (got 0x{:02X})", stage, response);
            return Err(Error::NoAck { stage, response });
        }
        Ok(())
    }

    /// Load from Control/Status space
    pub fn ldcs(&mut self, address: u8) -> Result<u8> {
        self.send_command(Command::Ldcs { address })?;
        self.receive_byte()
    }

    /// Store to Control/Status space. CS stores are not acknowledged.
    pub fn stcs(&mut self, address: u8, value: u8) -> Result<()> {
        self.send_command(Command::Stcs { address, value })
    }

    /// Check UPDI by loading CS STATUSA
    pub fn check(&mut self) -> Result<bool> {
        match self.ldcs(cs::STATUSA) {
            Ok(0) => Ok(false),
            Ok(_) => {
                log::info!("UPDI init OK");
                Ok(true)
            }
            Err(Error::NoResponse { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Set the inter-byte delay bit and disable collision detection
    pub fn start(&mut self) -> Result<()> {
        self.stcs(cs::CTRLB, 1 << cs::CTRLB_CCDETDIS_BIT)?;
        self.stcs(cs::CTRLA, 1 << cs::CTRLA_IBDLY_BIT)
    }

    pub fn ld(&mut self, address: u16) -> Result<u8> {
        self.send_command(Command::Lds {
            address,
            width: Width::Byte,
        })?;
        self.receive_byte()
    }

    pub fn ld16(&mut self, address: u16) -> Result<u16> {
        self.send_command(Command::Lds {
            address,
            width: Width::Word,
        })?;
        let mut buf = [0u8; 2];
        self.phy.receive(&mut buf)?;
        Ok(buf.pread_with::<u16>(0, LE)?)
    }

    /// Direct store of one byte; both the address and the value phase must
    /// be acknowledged.
    pub fn st(&mut self, address: u16, value: u8) -> Result<()> {
        self.send_command(Command::Sts {
            address,
            width: Width::Byte,
        })?;
        self.expect_ack("ST address")?;
        self.phy.send(&[value])?;
        self.expect_ack("ST value")
    }

    pub fn st16(&mut self, address: u16, value: u16) -> Result<()> {
        self.send_command(Command::Sts {
            address,
            width: Width::Word,
        })?;
        self.expect_ack("ST16 address")?;
        self.phy.send(&value.to_le_bytes())?;
        self.expect_ack("ST16 value")
    }

    /// Set the pointer location
    pub fn st_ptr(&mut self, address: u16) -> Result<()> {
        self.send_command(Command::StPtr { address })?;
        self.expect_ack("ST ptr")
    }

    /// Store bytes through the pointer with post-increment. Every byte is
    /// acknowledged; the burst stops at the first missing ACK and the
    /// device pointer stays wherever it got to.
    pub fn st_ptr_inc(&mut self, data: &[u8]) -> Result<()> {
        let (&first, rest) = data.split_first().ok_or(Error::InvalidBurst(0))?;
        self.send_command(Command::StPtrInc {
            width: Width::Byte,
            value: u16::from(first),
        })?;
        self.expect_ack("ST8 *ptr++")?;
        for &b in rest {
            self.phy.send(&[b])?;
            self.expect_ack("ST8 *ptr++")?;
        }
        Ok(())
    }

    /// Word variant of [`Link::st_ptr_inc`]. `data` is a byte buffer sent
    /// in word steps, so its length must be even.
    pub fn st_ptr_inc16(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(Error::InvalidBurst(data.len()));
        }
        let first = data.pread_with::<u16>(0, LE)?;
        self.send_command(Command::StPtrInc {
            width: Width::Word,
            value: first,
        })?;
        self.expect_ack("ST16 *ptr++")?;
        for word in data[2..].chunks(2) {
            self.phy.send(word)?;
            self.expect_ack("ST16 *ptr++")?;
        }
        Ok(())
    }

    /// Load `buf.len()` bytes through the pointer with post-increment.
    /// More than one byte needs a primed REPEAT.
    pub fn ld_ptr_inc(&mut self, buf: &mut [u8]) -> Result<()> {
        self.send_command(Command::LdPtrInc { width: Width::Byte })?;
        self.phy.receive(buf)
    }

    /// Word variant of [`Link::ld_ptr_inc`]; `buf` holds `words * 2` bytes.
    pub fn ld_ptr_inc16(&mut self, buf: &mut [u8]) -> Result<()> {
        self.send_command(Command::LdPtrInc { width: Width::Word })?;
        self.phy.receive(buf)
    }

    /// Prime the repeat counter; must be followed by exactly one burst of
    /// `count` units.
    pub fn repeat(&mut self, count: u16) -> Result<()> {
        self.send_command(Command::Repeat { count })
    }

    /// Read the System Information Block
    pub fn read_sib(&mut self) -> Result<[u8; SIB_LENGTH]> {
        self.send_command(Command::ReadSib {
            size: KeySize::Key128,
        })?;
        let mut sib = [0u8; SIB_LENGTH];
        self.phy.receive(&mut sib)?;
        Ok(sib)
    }

    /// Write a key. Keys go on the wire byte-reversed.
    pub fn send_key(&mut self, key: &[u8], size: KeySize) -> Result<()> {
        if key.len() != size.len() {
            log::error!("Invalid KEY length!");
            return Err(Error::InvalidKeyLength {
                expected: size.len(),
                actual: key.len(),
            });
        }
        self.send_command(Command::Key { size })?;
        let reversed: Vec<u8> = key.iter().rev().copied().collect();
        self.phy.send(&reversed)
    }
}
