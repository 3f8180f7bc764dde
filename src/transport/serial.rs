//! Serial Transportation.
use std::{
    fmt::Display,
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use clap::{ValueEnum, builder::PossibleValue};
use serialport::{DataBits, Parity, SerialPort, StopBits};

use super::Transport;
use crate::constants::{BREAK, BREAK_BAUDRATE, LINK_TIMEOUT_MS};
use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Baudrate {
    Baud57600,
    #[default]
    Baud115200,
    Baud230400,
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        match value {
            Baudrate::Baud57600 => 57600,
            Baudrate::Baud115200 => 115200,
            Baudrate::Baud230400 => 230400,
        }
    }
}

impl Display for Baudrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

impl ValueEnum for Baudrate {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Baudrate::Baud57600,
            Baudrate::Baud115200,
            Baudrate::Baud230400,
        ]
    }

    fn to_possible_value(&self) -> Option<PossibleValue> {
        match self {
            Baudrate::Baud57600 => Some(PossibleValue::new("Baud57600").aliases(["57600"])),
            Baudrate::Baud115200 => Some(PossibleValue::new("Baud115200").aliases(["115200"])),
            Baudrate::Baud230400 => Some(PossibleValue::new("Baud230400").aliases(["230400"])),
        }
    }
}

/// UPDI over a UART adapter with TxD and RxD tied together (8E2).
pub struct SerialTransport {
    port_name: String,
    baudrate: u32,
    serial_port: Option<Box<dyn SerialPort>>,
}

fn open_port(port: &str, baudrate: u32) -> Result<Box<dyn SerialPort>> {
    Ok(serialport::new(port, baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::Even)
        .stop_bits(StopBits::Two)
        .timeout(Duration::from_millis(LINK_TIMEOUT_MS))
        .open()?)
}

/// Fill `buf` until done or the port times out. Short reads are not errors.
fn read_available(port: &mut dyn SerialPort, buf: &mut [u8]) -> Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match port.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(m) => n += m,
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(n)
}

impl SerialTransport {
    pub fn scan_ports() -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    pub fn open(port: &str, baudrate: impl Into<u32>) -> Result<Self> {
        let baudrate = baudrate.into();
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let serial_port = open_port(port, baudrate)?;
        Ok(SerialTransport {
            port_name: port.to_string(),
            baudrate,
            serial_port: Some(serial_port),
        })
    }

    pub fn open_nth(nth: usize, baudrate: impl Into<u32>) -> Result<Self> {
        let ports = serialport::available_ports()?;

        match ports.get(nth) {
            Some(port) => Self::open(&port.port_name, baudrate),
            None => Err(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "No serial ports found!",
            )
            .into()),
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.serial_port.as_mut().ok_or(Error::LinkClosed)
    }
}

impl Transport for SerialTransport {
    fn write_raw(&mut self, raw: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(raw)?;
        port.flush()?;
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_available(&mut **self.port()?, buf)
    }

    fn line_break(&mut self) -> Result<()> {
        // The port cannot be opened twice, release the main handle first
        self.serial_port = None;

        let mut comm = open_port(&self.port_name, BREAK_BAUDRATE)?;
        log::debug!("Send double break");
        comm.write_all(&[BREAK, BREAK])?;
        comm.flush()?;
        let mut echo = [0u8; 2];
        read_available(&mut *comm, &mut echo)?;
        drop(comm);

        self.serial_port = Some(open_port(&self.port_name, self.baudrate)?);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.serial_port.take().is_some() {
            log::debug!("Closed {}", self.port_name);
        }
        Ok(())
    }
}
