//! Abstract UPDI link interface.
use crate::constants::SYNC;
use crate::error::{Error, Result};

pub use self::serial::{Baudrate, SerialTransport};

mod serial;

/// Abstraction of the half-duplex single-wire link.
///
/// Every byte written loops back on the wire, so `send` drains the echo
/// before returning. Implementations only move raw bytes.
pub trait Transport {
    fn write_raw(&mut self, raw: &[u8]) -> Result<()>;
    /// Read until `buf` is full or the link timeout elapses.
    /// Returns the number of bytes actually read.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Double-break recovery pulse, leaving the main link open afterwards.
    fn line_break(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, data: &[u8], sync: bool) -> Result<()> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        if sync {
            frame.push(SYNC);
        }
        frame.extend_from_slice(data);
        self.write_raw(&frame)?;

        let mut echo = vec![0u8; frame.len()];
        let n = self.read_raw(&mut echo)?;
        if n != frame.len() {
            log::warn!("short echo: {} of {} bytes", n, frame.len());
        }
        log::debug!("TxD: {}", hex::encode(&echo[..n]));
        Ok(())
    }

    fn recv(&mut self, size: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let n = self.read_raw(&mut buf)?;
        if n != size {
            log::error!("Link read timeout");
            return Err(Error::LinkTimeout {
                expected: size,
                received: n,
            });
        }
        log::debug!("RxD: {}", hex::encode(&buf));
        Ok(buf)
    }
}
