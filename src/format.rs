//! Firmware file formats
use std::collections::BTreeMap;
use std::path::Path;
use std::str;

use crate::constants::segments;
use crate::error::{Error, Result};

pub const SEGMENT_SIZE: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    IntelHex,
    Binary,
}

/// Sparse firmware image, one 64K window per extended segment.
///
/// `None` marks a byte the image does not program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    segments: BTreeMap<u16, Vec<Option<u8>>>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw binaries are flash images starting at offset 0.
    pub fn from_binary(raw: &[u8]) -> Result<Self> {
        if raw.len() > SEGMENT_SIZE {
            return Err(Error::Range {
                op: "load binary",
                addr: 0,
                size: raw.len(),
                segment_size: SEGMENT_SIZE,
            });
        }
        let mut image = Self::new();
        let memory = image.segment_mut(segments::FLASH);
        for (slot, &b) in memory.iter_mut().zip(raw) {
            *slot = Some(b);
        }
        Ok(image)
    }

    fn segment_mut(&mut self, segment: u16) -> &mut Vec<Option<u8>> {
        self.segments
            .entry(segment)
            .or_insert_with(|| vec![None; SEGMENT_SIZE])
    }

    pub fn has_segment(&self, segment: u16) -> bool {
        self.segments.contains_key(&segment)
    }

    pub fn segment(&self, segment: u16) -> Option<&[Option<u8>]> {
        self.segments.get(&segment).map(|m| m.as_slice())
    }

    pub fn segment_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.segments.keys().copied()
    }

    /// Number of programmed bytes in a segment.
    pub fn programmed(&self, segment: u16) -> usize {
        self.segment(segment)
            .map(|m| m.iter().filter(|b| b.is_some()).count())
            .unwrap_or(0)
    }

    /// Load Intel HEX text. Type 04 records select the segment for the
    /// data records that follow.
    pub fn read_ihex(&mut self, data: &str) -> Result<()> {
        use ihex::Record;

        let lines = data
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut pointer = segments::FLASH;
        for (i, record) in ihex::Reader::new(&lines).enumerate() {
            let record_no = i + 1;
            let record = record.map_err(|e| reader_error(record_no, e))?;
            match record {
                Record::Data { offset, value } => {
                    let start = offset as usize;
                    if start + value.len() > SEGMENT_SIZE {
                        return Err(Error::HexFormat {
                            record: record_no,
                            reason: format!(
                                "{} bytes at 0x{:04x} cross the segment end",
                                value.len(),
                                offset
                            ),
                        });
                    }
                    let memory = self.segment_mut(pointer);
                    for (p, d) in value.into_iter().enumerate() {
                        memory[start + p] = Some(d);
                    }
                }
                Record::EndOfFile => break,
                Record::ExtendedLinearAddress(address) => {
                    pointer = address;
                }
                Record::ExtendedSegmentAddress(_) => {
                    return Err(unsupported(record_no, 0x02));
                }
                Record::StartSegmentAddress { .. } => {
                    return Err(unsupported(record_no, 0x03));
                }
                Record::StartLinearAddress(_) => {
                    return Err(unsupported(record_no, 0x05));
                }
            }
        }
        Ok(())
    }
}

fn unsupported(record: usize, record_type: u8) -> Error {
    Error::UnsupportedRecordType {
        record,
        record_type,
    }
}

fn reader_error(record: usize, e: ihex::ReaderError) -> Error {
    use ihex::ReaderError::*;
    match e {
        ChecksumMismatch(..) => Error::HexChecksum { record },
        PayloadLengthMismatch => Error::HexSizeMismatch { record },
        UnsupportedRecordType(record_type) => Error::UnsupportedRecordType {
            record,
            record_type,
        },
        e => Error::HexFormat {
            record,
            reason: e.to_string(),
        },
    }
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<MemoryImage> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::IntelHex => {
            let text = str::from_utf8(&raw).map_err(|e| Error::HexFormat {
                record: 0,
                reason: e.to_string(),
            })?;
            let mut image = MemoryImage::new();
            image.read_ihex(text)?;
            Ok(image)
        }
        FirmwareFormat::Binary => MemoryImage::from_binary(&raw),
    }
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihe", "hex", "eep"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }

    if raw.first() == Some(&b':')
        && raw.iter().all(|&c| {
            (c as char).is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r'
        })
    {
        FirmwareFormat::IntelHex
    } else {
        FirmwareFormat::Binary
    }
}
