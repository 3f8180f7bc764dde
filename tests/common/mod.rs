//! A simulated tinyAVR target on the far end of the UPDI wire.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use updiprog::constants::{ACK, BREAK, SYNC, keys, opcodes};
use updiprog::{Result, Transport};

pub const FLASH_START: usize = 0x8000;
pub const EEPROM_START: usize = 0x1400;
pub const SIGROW_BASE: usize = 0x1100;
pub const FUSES_BASE: usize = 0x1280;

const ASI_RESET_REQ: u8 = 0x08;
const ASI_SYS_STATUS: u8 = 0x0B;
const RSTREQ_KEY: u8 = 0x59;
const LOCKSTATUS: u8 = 0x01;
const NVMPROG: u8 = 0x08;

const NVMCTRL_CTRLA: usize = 0x1000;
const NVMCTRL_DATA: usize = 0x1006;
const NVMCTRL_ADDRL: usize = 0x1008;
const NVMCTRL_ADDRH: usize = 0x1009;
const CMD_WP: u8 = 0x01;
const CMD_WFU: u8 = 0x07;

/// Unsynced bytes the target is waiting for.
#[derive(Debug, Clone, Copy)]
enum Continuation {
    StsData { address: usize, remaining: usize },
    StRepeat { remaining: usize },
}

pub struct TargetState {
    pub memory: Vec<u8>,
    pub sys_status: u8,
    pub flash_size: usize,
    pub eeprom_size: usize,
    /// Target ignores everything until a double break.
    pub asleep: bool,
    /// A double break does not wake the target either.
    pub unresponsive: bool,
    /// Ignore the NVMPROG key.
    pub refuse_unlock: bool,
    /// Ignore the CHIPERASE key.
    pub refuse_erase: bool,

    pub frames: usize,
    pub line_breaks: usize,
    pub keys_received: Vec<Vec<u8>>,
    pub resets: usize,
    pub sys_status_reads: usize,
    pub repeats: Vec<u8>,
    pub pages_committed: Vec<usize>,
    pub fuses_written: Vec<(usize, u8)>,

    rx: VecDeque<u8>,
    ptr: usize,
    repeat: usize,
    continuation: Option<Continuation>,
    pending_key: Option<Vec<u8>>,
    reset_asserted: bool,
    page_buffer: Vec<(usize, u8)>,
    nvm_addr: usize,
    nvm_data: u8,
}

impl TargetState {
    pub fn flash(&self) -> &[u8] {
        &self.memory[FLASH_START..FLASH_START + self.flash_size]
    }

    pub fn eeprom(&self) -> &[u8] {
        &self.memory[EEPROM_START..EEPROM_START + self.eeprom_size]
    }

    pub fn key_sets(&self) -> usize {
        self.keys_received.len()
    }

    fn in_nvm(&self, addr: usize) -> bool {
        (FLASH_START..FLASH_START + self.flash_size).contains(&addr)
            || (EEPROM_START..EEPROM_START + self.eeprom_size).contains(&addr)
    }

    fn control_status(&mut self, register: u8) -> u8 {
        match register {
            0x00 => 0x30,
            ASI_SYS_STATUS => {
                self.sys_status_reads += 1;
                self.sys_status
            }
            _ => 0x00,
        }
    }

    fn apply_reset(&mut self) {
        self.resets += 1;
        match self.pending_key.take() {
            Some(key) if key == keys::NVMPROG && !self.refuse_unlock => {
                self.sys_status |= NVMPROG;
            }
            Some(key) if key == keys::CHIP_ERASE && !self.refuse_erase => {
                let (flash, eeprom) = (self.flash_size, self.eeprom_size);
                self.memory[FLASH_START..FLASH_START + flash].fill(0xFF);
                self.memory[EEPROM_START..EEPROM_START + eeprom].fill(0xFF);
                self.sys_status &= !LOCKSTATUS;
            }
            _ => {}
        }
    }

    fn store(&mut self, address: usize, value: u8) {
        if self.in_nvm(address) {
            self.page_buffer.push((address, value));
            return;
        }
        match address {
            NVMCTRL_ADDRL => self.nvm_addr = (self.nvm_addr & 0xFF00) | value as usize,
            NVMCTRL_ADDRH => self.nvm_addr = (self.nvm_addr & 0x00FF) | (value as usize) << 8,
            NVMCTRL_DATA => self.nvm_data = value,
            NVMCTRL_CTRLA if value == CMD_WP => {
                self.pages_committed.push(self.nvm_addr);
                for (addr, value) in self.page_buffer.drain(..) {
                    self.memory[addr] &= value;
                }
            }
            NVMCTRL_CTRLA if value == CMD_WFU => {
                self.fuses_written.push((self.nvm_addr, self.nvm_data));
                self.memory[self.nvm_addr] = self.nvm_data;
            }
            _ => self.memory[address] = value,
        }
    }

    fn instruction(&mut self, op: u8, operands: &[u8]) {
        let word = |bytes: &[u8]| match bytes {
            [lo] => *lo as usize,
            [lo, hi, ..] => (*hi as usize) << 8 | *lo as usize,
            [] => 0,
        };
        match op & 0xE0 {
            opcodes::LDS => {
                let addr_len = ((op >> 2) & 0x03) as usize + 1;
                let address = word(&operands[..addr_len]);
                for i in 0..=(op & 0x03) as usize {
                    self.rx.push_back(self.memory[address + i]);
                }
            }
            opcodes::STS => {
                let addr_len = ((op >> 2) & 0x03) as usize + 1;
                let address = word(&operands[..addr_len]);
                self.rx.push_back(ACK);
                self.continuation = Some(Continuation::StsData {
                    address,
                    remaining: (op & 0x03) as usize + 1,
                });
            }
            opcodes::LD => {
                let inc = (op >> 2) & 0x03 == 0b01;
                for _ in 0..=self.repeat {
                    self.rx.push_back(self.memory[self.ptr]);
                    if inc {
                        self.ptr += 1;
                    }
                }
                self.repeat = 0;
            }
            opcodes::ST => match (op >> 2) & 0x03 {
                0b10 => {
                    self.ptr = word(operands);
                    self.rx.push_back(ACK);
                }
                mode => {
                    self.store(self.ptr, operands[0]);
                    if mode == 0b01 {
                        self.ptr += 1;
                    }
                    self.rx.push_back(ACK);
                    if self.repeat > 0 {
                        self.continuation = Some(Continuation::StRepeat {
                            remaining: self.repeat,
                        });
                    }
                    self.repeat = 0;
                }
            },
            opcodes::LDCS => {
                let value = self.control_status(op & 0x0F);
                self.rx.push_back(value);
            }
            opcodes::STCS => {
                let (register, value) = (op & 0x0F, operands[0]);
                if register == ASI_RESET_REQ {
                    if value == RSTREQ_KEY {
                        self.reset_asserted = true;
                    } else if self.reset_asserted {
                        self.reset_asserted = false;
                        self.apply_reset();
                    }
                }
            }
            opcodes::REPEAT => {
                self.repeats.push(operands[0]);
                self.repeat = operands[0] as usize;
            }
            _ if op & 0xE4 == opcodes::KEY_GET => {
                let len = if op & 0x03 == 0 { 8 } else { 16 };
                let sib = b"tinyAVR P:0D:0-3";
                self.rx.extend(sib.iter().take(len));
            }
            _ => {
                let key: Vec<u8> = operands.iter().rev().copied().collect();
                self.keys_received.push(key.clone());
                self.pending_key = Some(key);
            }
        }
    }

    fn continue_with(&mut self, data: &[u8]) {
        for &d in data {
            match self.continuation.take() {
                Some(Continuation::StsData { address, remaining }) => {
                    self.store(address, d);
                    if remaining > 1 {
                        self.continuation = Some(Continuation::StsData {
                            address: address + 1,
                            remaining: remaining - 1,
                        });
                    } else {
                        self.rx.push_back(ACK);
                    }
                }
                Some(Continuation::StRepeat { remaining }) => {
                    self.store(self.ptr, d);
                    self.ptr += 1;
                    self.rx.push_back(ACK);
                    if remaining > 1 {
                        self.continuation = Some(Continuation::StRepeat {
                            remaining: remaining - 1,
                        });
                    }
                }
                None => panic!("unexpected unsynced byte 0x{:02x}", d),
            }
        }
    }

    fn receive(&mut self, frame: &[u8]) {
        self.frames += 1;
        // Single wire: the adapter hears itself
        self.rx.extend(frame);
        if self.asleep {
            return;
        }
        if self.continuation.is_some() {
            self.continue_with(frame);
            return;
        }

        let frame = match frame {
            [BREAK, rest @ ..] => rest,
            _ => frame,
        };
        match frame {
            [SYNC, op, operands @ ..] => self.instruction(*op, operands),
            [] => {}
            other => panic!("unexpected frame {:02x?}", other),
        }
    }
}

/// Cloning shares the target, so tests keep a handle after
/// `Flashing` takes ownership of the link.
#[derive(Clone)]
pub struct SimulatedTarget(pub Rc<RefCell<TargetState>>);

impl SimulatedTarget {
    pub fn new(signature: [u8; 3], flash_size: usize, eeprom_size: usize) -> Self {
        let mut memory = vec![0u8; 0x10000];
        memory[SIGROW_BASE..SIGROW_BASE + 3].copy_from_slice(&signature);
        for (i, b) in memory[FLASH_START..FLASH_START + flash_size]
            .iter_mut()
            .enumerate()
        {
            *b = i as u8;
        }
        memory[EEPROM_START..EEPROM_START + eeprom_size].fill(0x5A);
        let fuses = [
            0x00, 0x00, 0x02, 0xFF, 0x00, 0xF6, 0x07, 0x00, 0x00, 0xFF, 0xC5,
        ];
        memory[FUSES_BASE..FUSES_BASE + fuses.len()].copy_from_slice(&fuses);

        SimulatedTarget(Rc::new(RefCell::new(TargetState {
            memory,
            sys_status: LOCKSTATUS,
            flash_size,
            eeprom_size,
            asleep: false,
            unresponsive: false,
            refuse_unlock: false,
            refuse_erase: false,
            frames: 0,
            line_breaks: 0,
            keys_received: vec![],
            resets: 0,
            sys_status_reads: 0,
            repeats: vec![],
            pages_committed: vec![],
            fuses_written: vec![],
            rx: VecDeque::new(),
            ptr: 0,
            repeat: 0,
            continuation: None,
            pending_key: None,
            reset_asserted: false,
            page_buffer: vec![],
            nvm_addr: 0,
            nvm_data: 0,
        })))
    }

    pub fn attiny202() -> Self {
        Self::new([0x1E, 0x91, 0x23], 2048, 64)
    }

    pub fn attiny402() -> Self {
        Self::new([0x1E, 0x92, 0x27], 4096, 128)
    }

    pub fn state(&self) -> std::cell::RefMut<'_, TargetState> {
        self.0.borrow_mut()
    }
}

impl Transport for SimulatedTarget {
    fn write_raw(&mut self, raw: &[u8]) -> Result<()> {
        self.0.borrow_mut().receive(raw);
        Ok(())
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.0.borrow_mut();
        let n = buf.len().min(state.rx.len());
        for b in buf.iter_mut().take(n) {
            *b = state.rx.pop_front().unwrap();
        }
        Ok(n)
    }

    fn line_break(&mut self) -> Result<()> {
        let mut state = self.0.borrow_mut();
        state.line_breaks += 1;
        state.rx.clear();
        if !state.unresponsive {
            state.asleep = false;
        }
        Ok(())
    }
}
