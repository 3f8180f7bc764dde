//! Chip flashing logic.
//!
//! `Flashing` drives the NVM programming state machine of the target:
//! the ASI lock status is lifted with the NVMPROG key (optionally after a
//! chip erase with the CHIPERASE key), then flash and EEPROM are accessed
//! page by page through the pointer register and fuses through the NVM
//! controller's address/data registers.
use std::{thread::sleep, time::Duration};

use crate::constants::{KEY_POLL_ATTEMPTS, KEY_POLL_INTERVAL_MS, keys};
use crate::device::{ChipDB, Device, Segment};
use crate::error::{Error, Result};
use crate::protocol::KeySize;
use crate::transport::Transport;
use crate::updi::Updi;

pub struct Flashing<T: Transport> {
    updi: Updi<T>,
    device: Device,
    chip_erased: bool,
}

impl<T: Transport> Flashing<T> {
    /// Connect and identify the target.
    ///
    /// With `device_name`, the connected chip must be that device.
    /// Otherwise the descriptor is picked from the signature row.
    pub fn new(transport: T, device_name: Option<&str>) -> Result<Self> {
        let db = ChipDB::load()?;
        let device = match device_name {
            Some(name) => db.find_by_name(name)?,
            None => db.generic()?,
        };
        let updi = Updi::open(transport, device.registers)?;
        let mut f = Flashing {
            updi,
            device,
            chip_erased: false,
        };

        let detected = f.identify_device(&db)?;
        log::debug!("Connected device: {}", detected);
        match device_name {
            Some(name) if !name.eq_ignore_ascii_case(&detected.name) => {
                f.reset()?;
                return Err(Error::DeviceIdentityMismatch {
                    expected: name.to_string(),
                    detected: detected.name,
                });
            }
            _ => {}
        }
        f.updi.set_registers(detected.registers);
        f.device = detected;
        Ok(f)
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dump_info(&mut self) -> Result<()> {
        let sib = self.updi.get_key(KeySize::Key128)?;
        log::info!(
            "Chip: {} (Flash: {} bytes, EEPROM: {} bytes)",
            self.device,
            self.device.flash.size(),
            self.device.eeprom.size()
        );
        log::info!(
            "Flash: {} pages x {} bytes @ 0x{:04x}",
            self.device.flash.page_count,
            self.device.flash.page_size,
            self.device.flash.base
        );
        log::info!(
            "EEPROM: {} pages x {} bytes @ 0x{:04x}",
            self.device.eeprom.page_count,
            self.device.eeprom.page_size,
            self.device.eeprom.base
        );
        log::info!("SIB: {}", String::from_utf8_lossy(&sib).trim_end());
        Ok(())
    }

    fn sys_status_has(&mut self, mask: u8) -> Result<bool> {
        Ok(self.updi.sys_status()? & mask != 0)
    }

    /// Poll SYS_STATUS until `done` holds, within the fixed retry budget.
    fn poll_sys_status(&mut self, done: impl Fn(u8) -> bool) -> Result<bool> {
        for attempt in 0..KEY_POLL_ATTEMPTS {
            if attempt > 0 {
                sleep(Duration::from_millis(KEY_POLL_INTERVAL_MS));
            }
            if done(self.updi.sys_status()?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn unlock_nvm(&mut self) -> Result<()> {
        let nvmprog = self.device.registers.sys_status_nvmprog_mask;
        if self.sys_status_has(nvmprog)? {
            log::debug!("Not Locked");
            return Ok(());
        }

        self.updi.set_key(&keys::NVMPROG)?;
        self.updi.req_reset()?;
        if !self.poll_sys_status(|status| status & nvmprog != 0)? {
            return Err(Error::Unlock);
        }
        log::info!("Unlocked NVM");
        Ok(())
    }

    /// Erase flash and EEPROM. Only once per session unless `force`.
    pub fn chip_erase(&mut self, force: bool) -> Result<()> {
        if !force && self.chip_erased {
            return Ok(());
        }

        let lockstatus = self.device.registers.sys_status_lockstatus_mask;
        self.updi.set_key(&keys::CHIP_ERASE)?;
        self.updi.req_reset()?;
        if !self.poll_sys_status(|status| status & lockstatus == 0)? {
            return Err(Error::ChipErase);
        }
        log::info!("Chip erased");
        self.chip_erased = true;
        Ok(())
    }

    /// Read the signature row and look it up.
    pub fn identify_device(&mut self, db: &ChipDB) -> Result<Device> {
        self.unlock_nvm()?;

        self.updi.set_ptr(self.device.sigrow_base)?;
        let sig = self.updi.read_bulk(3)?;
        log::info!("Device ID: {}", hex::encode_upper(&sig));
        let device = db.find_by_signature(&sig)?;
        log::info!("Device name: {}", device.name);
        Ok(device)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.updi.req_reset()?;
        log::info!("Device reset");
        Ok(())
    }

    /// Reset the target, switch UPDI off and release the link.
    pub fn close(mut self) -> Result<T> {
        self.updi.req_reset()?;
        self.updi.close()
    }

    /// Read `size` bytes (default: to the end) from `addr` of a segment.
    pub fn read_segment(
        &mut self,
        segment: Segment,
        addr: usize,
        size: Option<usize>,
    ) -> Result<Vec<u8>> {
        let nvm_size = segment.size();
        let size = size.unwrap_or(nvm_size.saturating_sub(addr));
        if size == 0 || addr.checked_add(size).is_none_or(|end| end > nvm_size) {
            return Err(Error::Range {
                op: segment.name,
                addr,
                size,
                segment_size: nvm_size,
            });
        }

        self.unlock_nvm()?;

        let ph_addr = segment.base + addr as u16;
        log::info!("Read from {:04X} ({:04X})", addr, ph_addr);
        self.updi.set_ptr(ph_addr)?;

        let pages = size / segment.page_size;
        let remain_size = size % segment.page_size;
        log::info!(
            "Read size: {:04X} bytes ({:2X} pages + {:2X} bytes)",
            size,
            pages,
            remain_size
        );

        let mut memory = Vec::with_capacity(size);
        for _ in 0..pages {
            memory.extend(self.updi.read_bulk(segment.page_size)?);
        }
        if remain_size > 0 {
            memory.extend(self.updi.read_bulk(remain_size)?);
        }
        Ok(memory)
    }

    /// Program every page of `segment` that `image` touches.
    ///
    /// Programmed bytes past the segment end are a `Range` error. Blank pages are skipped. `on_page(index, count)` is called before
    /// each page is written.
    pub fn write_segment(
        &mut self,
        segment: Segment,
        image: &[Option<u8>],
        mut on_page: impl FnMut(usize, usize),
    ) -> Result<()> {
        let last = image.iter().rposition(Option::is_some);
        if let Some(last) = last.filter(|&last| last >= segment.size()) {
            return Err(Error::Range {
                op: segment.name,
                addr: 0,
                size: last + 1,
                segment_size: segment.size(),
            });
        }

        self.chip_erase(false)?;
        self.unlock_nvm()?;

        let nvmctrl = self.device.nvmctrl;
        for page in 0..segment.page_count {
            let prog_addr = page * segment.page_size;
            let raw_data = image
                .get(prog_addr..)
                .map(|rest| &rest[..segment.page_size.min(rest.len())])
                .unwrap_or_default();
            if raw_data.iter().all(Option::is_none) {
                continue;
            }
            on_page(page, segment.page_count);

            let mut data = vec![0xFF; segment.page_size];
            for (d, raw) in data.iter_mut().zip(raw_data) {
                if let Some(b) = raw {
                    *d = *b;
                }
            }
            let ph_addr = segment.base + prog_addr as u16;
            log::info!("Write address: {:04X}, {:04X}", prog_addr, ph_addr);
            log::debug!("{}", hex::encode_upper(&data));

            self.updi.set_ptr(ph_addr)?;
            self.updi.write_bulk(&data)?;

            self.updi.sts(nvmctrl.addrl, ph_addr & 0xFF)?;
            self.updi.sts(nvmctrl.addrh, ph_addr >> 8)?;
            self.updi
                .sts(nvmctrl.ctrla, nvmctrl.cmd_write_page as u16)?;
        }

        self.reset()
    }

    /// Compare every programmed byte of `image` with the device.
    pub fn verify_segment(&mut self, segment: Segment, image: &[Option<u8>]) -> Result<()> {
        let Some(last) = image.iter().rposition(Option::is_some) else {
            return Ok(());
        };
        let read = self.read_segment(segment, 0, Some(last + 1))?;
        for (addr, (expected, found)) in image.iter().zip(&read).enumerate() {
            if let Some(expected) = *expected {
                if expected != *found {
                    return Err(Error::Verify {
                        addr,
                        expected,
                        found: *found,
                    });
                }
            }
        }
        log::info!("Verified {} bytes of {}", last + 1, segment.name);
        Ok(())
    }

    pub fn read_flash(&mut self, addr: usize, size: Option<usize>) -> Result<Vec<u8>> {
        self.read_segment(self.device.flash, addr, size)
    }

    pub fn write_flash(
        &mut self,
        image: &[Option<u8>],
        on_page: impl FnMut(usize, usize),
    ) -> Result<()> {
        self.write_segment(self.device.flash, image, on_page)
    }

    pub fn read_eeprom(&mut self, addr: usize, size: Option<usize>) -> Result<Vec<u8>> {
        self.read_segment(self.device.eeprom, addr, size)
    }

    pub fn write_eeprom(
        &mut self,
        image: &[Option<u8>],
        on_page: impl FnMut(usize, usize),
    ) -> Result<()> {
        self.write_segment(self.device.eeprom, image, on_page)
    }

    /// All bytes from FUSES_base up to the last known fuse.
    pub fn read_fuses(&mut self) -> Result<Vec<u8>> {
        self.unlock_nvm()?;

        self.updi.set_ptr(self.device.fuses_base)?;
        let span = self.device.fuse_span();
        self.updi.read_bulk(span)
    }

    fn program_fuse(&mut self, offset: u8, value: u8) -> Result<()> {
        let nvmctrl = self.device.nvmctrl;
        let ph_addr = self.device.fuses_base + offset as u16;
        // ADDRL and ADDRH one byte at a time, a word store would skip ADDRH
        self.updi.sts(nvmctrl.addrl, ph_addr & 0xFF)?;
        self.updi.sts(nvmctrl.addrh, ph_addr >> 8)?;
        self.updi.sts(nvmctrl.data, value as u16)?;
        self.updi
            .sts(nvmctrl.ctrla, nvmctrl.cmd_write_fuse as u16)
    }

    pub fn write_fuse(&mut self, offset: u8, value: u8) -> Result<()> {
        if self.device.fuse(offset).is_none() {
            log::error!("No fuse at {:02X}", offset);
            return Err(Error::InvalidFuseAddress(offset));
        }

        self.unlock_nvm()?;
        self.program_fuse(offset, value)?;
        self.reset()
    }

    /// Write every fuse programmed in `image` (indexed by fuse offset).
    pub fn write_fuses(&mut self, image: &[Option<u8>]) -> Result<()> {
        self.unlock_nvm()?;

        let fuses = self.device.fuses.clone();
        for fuse in fuses {
            let Some(value) = image.get(fuse.offset as usize).copied().flatten() else {
                continue;
            };
            log::info!(
                "{:<8}({:02X}): {:04b} {:04b} ({:02X})",
                fuse.name,
                fuse.offset,
                value >> 4,
                value & 0x0F,
                value
            );
            self.program_fuse(fuse.offset, value)?;
        }

        self.reset()
    }
}
