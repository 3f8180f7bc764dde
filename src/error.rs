//! Error kinds raised by the programmer.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("UPDI link timeout: expected {expected} byte(s), got {received}")]
    LinkTimeout { expected: usize, received: usize },
    #[error("serial link is closed")]
    LinkClosed,
    #[error("repeat count {0} outside 1..=256")]
    RepeatCount(usize),
    #[error("key of {0} bytes, expected 8 or 16")]
    KeyLength(usize),

    #[error("Intel HEX format error at record {record}: {reason}")]
    HexFormat { record: usize, reason: String },
    #[error("Intel HEX checksum mismatch at record {record}")]
    HexChecksum { record: usize },
    #[error("Intel HEX data size mismatch at record {record}")]
    HexSizeMismatch { record: usize },
    #[error("unsupported Intel HEX record type 0x{record_type:02x} at record {record}")]
    UnsupportedRecordType { record: usize, record_type: u8 },

    #[error("{op}: range 0x{addr:04x}+{size} exceeds segment of {segment_size} bytes")]
    Range {
        op: &'static str,
        addr: usize,
        size: usize,
        segment_size: usize,
    },

    #[error("unlock NVM failed")]
    Unlock,
    #[error("chip erase failed")]
    ChipErase,
    #[error("unknown device signature {signature}")]
    UnknownDevice { signature: String },
    #[error("unknown device name {0:?}")]
    UnknownDeviceName(String),
    #[error("device identity mismatch: expected {expected} but found {detected}")]
    DeviceIdentityMismatch { expected: String, detected: String },
    #[error("no fuse at offset 0x{0:02x}")]
    InvalidFuseAddress(u8),
    #[error("verify failed at 0x{addr:04x}: expected 0x{expected:02x}, found 0x{found:02x}")]
    Verify { addr: usize, expected: u8, found: u8 },

    #[error("device database: {0}")]
    Descriptor(String),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encoding(#[from] scroll::Error),
}
