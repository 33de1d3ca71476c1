//! UPDI physical layer: echo cancellation and break handling.
use std::{thread::sleep, time::Duration};

use crate::constants::BREAK;
use crate::transport::{LineConfig, Transport};
use crate::{Error, Result};

pub struct Phy<T: Transport> {
    transport: T,
    line: LineConfig,
}

impl<T: Transport> Phy<T> {
    /// Open `transport` with UPDI framing at `baud`
    pub fn open(mut transport: T, baud: u32) -> Result<Self> {
        let line = LineConfig::updi(baud);
        transport.open(line)?;
        Ok(Phy { transport, line })
    }

    /// Reopen at the working baud, after a double break
    pub fn reopen(&mut self) -> Result<()> {
        self.transport.open(self.line)
    }

    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn line(&self) -> LineConfig {
        self.line
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(mut self) -> T {
        self.transport.close();
        self.transport
    }

    /// Write `data` and drain the echo. The echo is not checked against
    /// what was sent.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        log::trace!("send {}", hex::encode(data));
        self.transport.write(data)?;
        let mut echo = vec![0u8; data.len()];
        let n = self.transport.read_full(&mut echo)?;
        if n != data.len() {
            log::trace!("short echo: {} of {} byte(s)", n, data.len());
        }
        Ok(())
    }

    /// Read exactly `buf.len()` bytes
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.transport.read_full(buf)?;
        if n != buf.len() {
            return Err(Error::NoResponse {
                expected: buf.len(),
                received: n,
            });
        }
        log::trace!("recv {}", hex::encode(&*buf));
        Ok(())
    }

    /// Double break: two BREAK characters at 300 baud push the UPDI state
    /// machine into a known state. Leaves the transport closed; the caller
    /// reopens at the working baud.
    pub fn double_break(&mut self, settle: Duration) -> Result<()> {
        log::info!("Sending double break");
        self.transport.close();

        if let Err(e) = self.transport.open(LineConfig::double_break()) {
            log::error!("Cannot reopen port for double break: {}", e);
            self.transport.close();
            return Err(e);
        }

        // two break characters, one stop bit in between
        let mut buf = [BREAK, BREAK];
        let result = self.transport.write(&buf).and_then(|_| {
            sleep(settle);
            self.transport.read_full(&mut buf)
        });
        self.transport.close();
        if result? != 2 {
            log::warn!("No answer received");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::SimTarget;

    #[test]
    fn send_drains_echo() {
        let mut phy = Phy::open(SimTarget::new(), 115200).unwrap();
        // LDCS STATUSA
        phy.send(&[0x55, 0x80]).unwrap();
        let mut resp = [0u8; 1];
        phy.receive(&mut resp).unwrap();
        assert_eq!(resp, [0x30]);
    }

    #[test]
    fn receive_reports_short_read() {
        let mut sim = SimTarget::new();
        sim.silent = true;
        let mut phy = Phy::open(sim, 115200).unwrap();
        phy.send(&[0x55, 0x80]).unwrap();
        let mut resp = [0u8; 1];
        assert!(matches!(
            phy.receive(&mut resp),
            Err(Error::NoResponse {
                expected: 1,
                received: 0
            })
        ));
    }

    #[test]
    fn opens_with_updi_framing() {
        let phy = Phy::open(SimTarget::new(), 57600).unwrap();
        assert_eq!(
            phy.transport().line,
            Some(LineConfig {
                baud: 57600,
                parity: true,
                two_stop_bits: true
            })
        );
    }

    #[test]
    fn double_break_closes_port() {
        let mut phy = Phy::open(SimTarget::new(), 115200).unwrap();
        phy.double_break(Duration::ZERO).unwrap();
        let sim = phy.transport();
        assert!(!sim.is_open());
        assert_eq!(sim.double_breaks, 1);
        assert_eq!(sim.opens[1], LineConfig::double_break());
        assert_eq!(&sim.sent[..], &[0x00, 0x00]);

        phy.reopen().unwrap();
        assert_eq!(phy.transport().line, Some(LineConfig::updi(115200)));
    }

    #[test]
    fn double_break_reopen_failure_leaves_port_closed() {
        let mut sim = SimTarget::new();
        sim.fail_open_baud = Some(300);
        let mut phy = Phy::open(sim, 115200).unwrap();
        assert!(phy.double_break(Duration::ZERO).is_err());
        assert!(!phy.transport().is_open());
        assert_eq!(phy.transport().double_breaks, 0);
    }
}
