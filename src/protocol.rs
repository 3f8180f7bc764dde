//! The UPDI instruction set

use scroll::{LE, Pwrite};

use crate::constants::opcodes;
use crate::error::{Error, Result};

/// Operand width of the address field of LDS/STS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressSize {
    Byte = 0b00,
    Word = 0b01,
}

impl AddressSize {
    pub fn of(address: u16) -> Self {
        if address > 0xFF {
            AddressSize::Word
        } else {
            AddressSize::Byte
        }
    }
}

/// Operand width of a data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataSize {
    Byte = 0b00,
    Word = 0b01,
}

impl DataSize {
    pub fn of(value: u16) -> Self {
        if value > 0xFF {
            DataSize::Word
        } else {
            DataSize::Byte
        }
    }

    pub const fn len(self) -> usize {
        self as usize + 1
    }
}

/// Pointer access mode of LD/ST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PointerMode {
    /// `*(ptr)`
    AtPtr = 0b00,
    /// `*(ptr++)`
    AtPtrInc = 0b01,
    /// `ptr`
    SetPtr = 0b10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeySize {
    /// 64-bit key, used by the NVM activation keys
    Key64 = 0b00,
    /// 128-bit key, used to read the System Information Block
    Key128 = 0b01,
}

impl KeySize {
    pub const fn len(self) -> usize {
        match self {
            KeySize::Key64 => 8,
            KeySize::Key128 => 16,
        }
    }
}

/// UPDI instruction, without the leading SYNC.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    /// Load from data space with direct addressing.
    Lds { address: u16, data_size: DataSize },
    /// Store to data space with direct addressing.
    ///
    /// Only the address phase. The data phase follows unsynced after the ACK.
    Sts { address: u16, data_size: DataSize },
    /// Load via the pointer register.
    Ld { mode: PointerMode, data_size: DataSize },
    /// Store via the pointer register, data included.
    St { mode: PointerMode, value: u16 },
    /// Load from the UPDI control/status space.
    Ldcs { register: u8 },
    /// Store to the UPDI control/status space. No ACK is returned.
    Stcs { register: u8, value: u8 },
    /// The next instruction is executed `count + 1` times.
    Repeat { count: u8 },
    /// Send an activation key. Transmitted LSB first.
    KeySet { key: Vec<u8> },
    /// Receive the System Information Block.
    KeyGet { size: KeySize },
}

impl Command {
    pub fn lds(address: u16) -> Self {
        Command::Lds {
            address,
            data_size: DataSize::Byte,
        }
    }

    pub fn sts(address: u16, value: u16) -> Self {
        Command::Sts {
            address,
            data_size: DataSize::of(value),
        }
    }

    /// Repeat the following transfer for `n` elements in total, 1 to 256.
    pub fn repeat_for(n: usize) -> Result<Self> {
        match n.checked_sub(1).map(u8::try_from) {
            Some(Ok(count)) => Ok(Command::Repeat { count }),
            _ => Err(Error::RepeatCount(n)),
        }
    }

    pub fn into_raw(self) -> Result<Vec<u8>> {
        match self {
            Command::Lds { address, data_size } => direct(opcodes::LDS, address, data_size),
            Command::Sts { address, data_size } => direct(opcodes::STS, address, data_size),
            Command::Ld { mode, data_size } => {
                Ok(vec![opcodes::LD | ((mode as u8) << 2) | data_size as u8])
            }
            Command::St { mode, value } => {
                let data_size = DataSize::of(value);
                let mut buf = vec![0u8; 1 + data_size.len()];
                buf[0] = opcodes::ST | ((mode as u8) << 2) | data_size as u8;
                match data_size {
                    DataSize::Byte => buf[1] = value as u8,
                    DataSize::Word => {
                        buf.pwrite_with(value, 1, LE)?;
                    }
                }
                Ok(buf)
            }
            Command::Ldcs { register } => Ok(vec![opcodes::LDCS | (register & 0x0F)]),
            Command::Stcs { register, value } => {
                Ok(vec![opcodes::STCS | (register & 0x0F), value])
            }
            Command::Repeat { count } => Ok(vec![opcodes::REPEAT | DataSize::Byte as u8, count]),
            Command::KeySet { key } => {
                let size = match key.len() {
                    8 => KeySize::Key64,
                    16 => KeySize::Key128,
                    len => return Err(Error::KeyLength(len)),
                };
                let mut buf = Vec::with_capacity(1 + key.len());
                buf.push(opcodes::KEY_SET | size as u8);
                buf.extend(key.iter().rev());
                Ok(buf)
            }
            Command::KeyGet { size } => Ok(vec![opcodes::KEY_GET | size as u8]),
        }
    }

    /// Bytes the target sends back for this instruction, ACKs included.
    pub fn response_len(&self) -> usize {
        match self {
            Command::Lds { data_size, .. } | Command::Ld { data_size, .. } => data_size.len(),
            Command::Sts { .. } | Command::St { .. } => 1,
            Command::Ldcs { .. } => 1,
            Command::Stcs { .. } | Command::Repeat { .. } | Command::KeySet { .. } => 0,
            Command::KeyGet { size } => size.len(),
        }
    }
}

fn direct(family: u8, address: u16, data_size: DataSize) -> Result<Vec<u8>> {
    let addr_size = AddressSize::of(address);
    let mut buf = vec![0u8; 1 + addr_size as usize + 1];
    buf[0] = family | ((addr_size as u8) << 2) | data_size as u8;
    match addr_size {
        AddressSize::Byte => buf[1] = address as u8,
        AddressSize::Word => {
            buf.pwrite_with(address, 1, LE)?;
        }
    }
    Ok(buf)
}
