//! UPDI session: link handshake and instruction execution.
use crate::constants::{ACK, CTRLB_UPDIDIS, INIT_SEQ};
use crate::device::AsiRegisters;
use crate::error::{Error, Result};
use crate::protocol::{Command, DataSize, KeySize, PointerMode};
use crate::transport::Transport;

pub struct Updi<T: Transport> {
    transport: T,
    registers: AsiRegisters,
}

impl<T: Transport> Updi<T> {
    /// Initialize the link and check the target answers.
    ///
    /// A silent target gets one double-break and one more try.
    pub fn open(transport: T, registers: AsiRegisters) -> Result<Self> {
        let mut updi = Updi {
            transport,
            registers,
        };
        updi.transport.send(&INIT_SEQ, false)?;

        let statusa = updi.registers.statusa;
        match updi.ldcs(statusa) {
            Ok(_) => {}
            Err(Error::LinkTimeout { .. }) => {
                log::warn!("No response from target, sending double break");
                updi.transport.line_break()?;
                updi.ldcs(statusa)?;
            }
            Err(e) => return Err(e),
        }
        Ok(updi)
    }

    pub fn set_registers(&mut self, registers: AsiRegisters) {
        self.registers = registers;
    }

    /// Switch UPDI off on the target and release the link.
    pub fn close(mut self) -> Result<T> {
        let ctrlb = self.registers.ctrlb;
        self.stcs(ctrlb, CTRLB_UPDIDIS)?;
        self.transport.close()?;
        Ok(self.transport)
    }

    fn send(&mut self, cmd: Command) -> Result<()> {
        let raw = cmd.into_raw()?;
        self.transport.send(&raw, true)
    }

    /// Send an instruction and collect its fixed-size response.
    fn transfer(&mut self, cmd: Command) -> Result<Vec<u8>> {
        let len = cmd.response_len();
        self.send(cmd)?;
        self.transport.recv(len)
    }

    fn ack(&mut self) -> Result<()> {
        let resp = self.transport.recv(1)?;
        if resp[0] != ACK {
            log::warn!("unexpected ACK byte 0x{:02x}", resp[0]);
        }
        Ok(())
    }

    pub fn ldcs(&mut self, register: u8) -> Result<u8> {
        Ok(self.transfer(Command::Ldcs { register })?[0])
    }

    pub fn stcs(&mut self, register: u8, value: u8) -> Result<()> {
        self.send(Command::Stcs { register, value })
    }

    pub fn lds(&mut self, address: u16, data_size: DataSize) -> Result<Vec<u8>> {
        self.transfer(Command::Lds { address, data_size })
    }

    /// Address phase synced, data phase unsynced, each ACKed.
    pub fn sts(&mut self, address: u16, value: u16) -> Result<()> {
        let cmd = Command::sts(address, value);
        let data = match DataSize::of(value) {
            DataSize::Byte => vec![value as u8],
            DataSize::Word => value.to_le_bytes().to_vec(),
        };
        self.send(cmd)?;
        self.ack()?;
        self.transport.send(&data, false)?;
        self.ack()
    }

    pub fn ld(&mut self, mode: PointerMode, data_size: DataSize) -> Result<Vec<u8>> {
        self.transfer(Command::Ld { mode, data_size })
    }

    pub fn st(&mut self, mode: PointerMode, value: u16) -> Result<()> {
        self.send(Command::St { mode, value })?;
        self.ack()
    }

    pub fn set_ptr(&mut self, address: u16) -> Result<()> {
        self.st(PointerMode::SetPtr, address)
    }

    /// Declare a bulk transfer of `n` elements (1..=256).
    pub fn repeat(&mut self, n: usize) -> Result<()> {
        self.send(Command::repeat_for(n)?)
    }

    /// The tail of a repeated ST: one unsynced byte at a time, each ACKed.
    pub fn repeat_write(&mut self, data: &[u8]) -> Result<()> {
        for &d in data {
            self.transport.send(&[d], false)?;
            self.ack()?;
        }
        Ok(())
    }

    /// The tail of a repeated LD arrives as one unsynced block.
    pub fn repeat_read(&mut self, size: usize) -> Result<Vec<u8>> {
        if size == 0 {
            return Ok(vec![]);
        }
        self.transport.recv(size)
    }

    /// Read `n` bytes from the pointer onwards, advancing it.
    pub fn read_bulk(&mut self, n: usize) -> Result<Vec<u8>> {
        self.repeat(n)?;
        let mut data = self.ld(PointerMode::AtPtrInc, DataSize::Byte)?;
        data.extend(self.repeat_read(n - 1)?);
        Ok(data)
    }

    /// Write `data` from the pointer onwards, advancing it.
    pub fn write_bulk(&mut self, data: &[u8]) -> Result<()> {
        self.repeat(data.len())?;
        self.st(PointerMode::AtPtrInc, data[0] as u16)?;
        self.repeat_write(&data[1..])
    }

    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        self.send(Command::KeySet { key: key.to_vec() })
    }

    pub fn get_key(&mut self, size: KeySize) -> Result<Vec<u8>> {
        self.transfer(Command::KeyGet { size })
    }

    /// Pulse the ASI reset request.
    pub fn req_reset(&mut self) -> Result<()> {
        let AsiRegisters {
            asi_reset_req,
            rstreq_key,
            ..
        } = self.registers;
        self.stcs(asi_reset_req, rstreq_key)?;
        self.stcs(asi_reset_req, 0x00)
    }

    pub fn sys_status(&mut self) -> Result<u8> {
        let reg = self.registers.asi_sys_status;
        self.ldcs(reg)
    }
}
