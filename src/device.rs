//! MCU device descriptors, loaded from the family tables under `devices/`
use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// UPDI control/status space layout. Shared by every UPDI family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsiRegisters {
    #[serde(deserialize_with = "parse_number")]
    pub statusa: u8,
    #[serde(deserialize_with = "parse_number")]
    pub ctrlb: u8,
    #[serde(deserialize_with = "parse_number")]
    pub asi_reset_req: u8,
    #[serde(deserialize_with = "parse_number")]
    pub asi_sys_status: u8,
    #[serde(deserialize_with = "parse_number")]
    pub sys_status_lockstatus_mask: u8,
    #[serde(deserialize_with = "parse_number")]
    pub sys_status_nvmprog_mask: u8,
    /// Written to ASI_RESET_REQ to assert reset
    #[serde(deserialize_with = "parse_number")]
    pub rstreq_key: u8,
}

/// NVM controller registers (data space) and commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NvmCtrl {
    #[serde(deserialize_with = "parse_number")]
    pub ctrla: u16,
    #[serde(deserialize_with = "parse_number")]
    pub data: u16,
    #[serde(deserialize_with = "parse_number")]
    pub addrl: u16,
    #[serde(deserialize_with = "parse_number")]
    pub addrh: u16,
    #[serde(deserialize_with = "parse_number")]
    pub cmd_write_page: u8,
    #[serde(deserialize_with = "parse_number")]
    pub cmd_write_fuse: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fuse {
    pub name: String,
    #[serde(deserialize_with = "parse_number")]
    pub offset: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Variant {
    name: String,
    /// Hex encoded signature row bytes
    signature: String,
    #[serde(deserialize_with = "parse_number")]
    flash_size: u32,
    #[serde(default, deserialize_with = "parse_number")]
    eeprom_size: u32,
}

/// MCU Family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    pub description: String,
    registers: AsiRegisters,
    nvmctrl: NvmCtrl,
    #[serde(deserialize_with = "parse_number")]
    sigrow_base: u16,
    #[serde(deserialize_with = "parse_number")]
    fuses_base: u16,
    #[serde(deserialize_with = "parse_number")]
    flash_start: u16,
    #[serde(deserialize_with = "parse_number")]
    flash_page_size: u16,
    #[serde(deserialize_with = "parse_number")]
    eeprom_start: u16,
    #[serde(deserialize_with = "parse_number")]
    eeprom_page_size: u16,
    fuses: Vec<Fuse>,
    variants: Vec<Variant>,
}

/// A paged NVM region in data space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Segment {
    pub name: &'static str,
    pub base: u16,
    pub page_size: usize,
    pub page_count: usize,
}

impl Segment {
    pub const fn size(&self) -> usize {
        self.page_size * self.page_count
    }
}

/// Everything the programmer needs to know about one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    /// `None` until the signature row has been read
    pub signature: Option<[u8; 3]>,
    pub registers: AsiRegisters,
    pub nvmctrl: NvmCtrl,
    pub sigrow_base: u16,
    pub fuses_base: u16,
    pub flash: Segment,
    pub eeprom: Segment,
    pub fuses: Vec<Fuse>,
}

impl ::std::fmt::Display for Device {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        match self.signature {
            Some(sig) => write!(f, "{}({})", self.name, hex::encode_upper(sig)),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Device {
    pub fn fuse(&self, offset: u8) -> Option<&Fuse> {
        self.fuses.iter().find(|f| f.offset == offset)
    }

    /// Bytes covering every fuse, from FUSES_base.
    pub fn fuse_span(&self) -> usize {
        self.fuses
            .iter()
            .map(|f| f.offset as usize + 1)
            .max()
            .unwrap_or(0)
    }
}

impl Family {
    fn segments(&self, flash_size: u32, eeprom_size: u32) -> (Segment, Segment) {
        let flash = Segment {
            name: "flash",
            base: self.flash_start,
            page_size: self.flash_page_size as usize,
            page_count: flash_size as usize / self.flash_page_size as usize,
        };
        let eeprom = Segment {
            name: "eeprom",
            base: self.eeprom_start,
            page_size: self.eeprom_page_size as usize,
            page_count: eeprom_size as usize / self.eeprom_page_size as usize,
        };
        (flash, eeprom)
    }

    /// Family-level descriptor, enough to talk to a chip not yet identified.
    fn generic(&self) -> Device {
        let (flash, eeprom) = self.segments(0, 0);
        Device {
            name: "AVR base".to_string(),
            signature: None,
            registers: self.registers,
            nvmctrl: self.nvmctrl,
            sigrow_base: self.sigrow_base,
            fuses_base: self.fuses_base,
            flash,
            eeprom,
            fuses: vec![],
        }
    }

    fn device(&self, variant: &Variant) -> Result<Device> {
        let (flash, eeprom) = self.segments(variant.flash_size, variant.eeprom_size);
        Ok(Device {
            name: variant.name.clone(),
            signature: Some(decode_signature(&variant.signature)?),
            flash,
            eeprom,
            fuses: self.fuses.clone(),
            ..self.generic()
        })
    }
}

fn decode_signature(s: &str) -> Result<[u8; 3]> {
    let raw = hex::decode(s).map_err(|e| Error::Descriptor(format!("signature {:?}: {}", s, e)))?;
    raw.try_into()
        .map_err(|_| Error::Descriptor(format!("signature {:?} is not 3 bytes", s)))
}

pub struct ChipDB {
    families: Vec<Family>,
}

impl ChipDB {
    pub fn load() -> Result<Self> {
        Ok(ChipDB {
            families: vec![serde_yaml::from_str(include_str!(
                "../devices/tinyAVR-0.yaml"
            ))?],
        })
    }

    pub fn generic(&self) -> Result<Device> {
        self.families
            .first()
            .map(Family::generic)
            .ok_or_else(|| Error::Descriptor("no device family loaded".to_string()))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Device> {
        for family in &self.families {
            if let Some(variant) = family
                .variants
                .iter()
                .find(|v| v.name.eq_ignore_ascii_case(name))
            {
                log::debug!("Find chip family: {}", family.name);
                return family.device(variant);
            }
        }
        Err(Error::UnknownDeviceName(name.to_string()))
    }

    pub fn find_by_signature(&self, signature: &[u8]) -> Result<Device> {
        let wanted = hex::encode_upper(signature);
        for family in &self.families {
            if let Some(variant) = family
                .variants
                .iter()
                .find(|v| v.signature.eq_ignore_ascii_case(&wanted))
            {
                log::debug!("Find chip family: {}", family.name);
                return family.device(variant);
            }
        }
        Err(Error::UnknownDevice { signature: wanted })
    }

    /// Names of every known chip.
    pub fn names(&self) -> Vec<String> {
        self.families
            .iter()
            .flat_map(|f| f.variants.iter().map(|v| v.name.clone()))
            .collect()
    }
}

/// Accepts `0x` hex, plain decimal, or a decimal with `K`/`KB`/`KiB` suffix.
fn parse_address_and_offset(s: &str) -> Option<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(k) = s
        .strip_suffix("KiB")
        .or_else(|| s.strip_suffix("KB"))
        .or_else(|| s.strip_suffix("K"))
    {
        k.parse::<u32>().ok().map(|k| k * 1024)
    } else {
        s.parse().ok()
    }
}

fn parse_number<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: TryFrom<u32>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    let value = parse_address_and_offset(&s)
        .ok_or_else(|| D::Error::custom(format!("error while parsing {:?}", s)))?;
    T::try_from(value).map_err(|_| D::Error::custom(format!("{:?} out of range", s)))
}
