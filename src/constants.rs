/// Sent before every instruction so the target can measure the baud rate.
pub const SYNC: u8 = 0x55;
/// A zero byte at low speed holds the line low long enough to count as a break.
pub const BREAK: u8 = 0x00;
/// Returned by the target after each store phase.
pub const ACK: u8 = 0x40;

/// BREAK, SYNC, then STCS CTRLB <- CCDETDIS. Collision detection must be
/// off or the target drops every echoed byte.
pub const INIT_SEQ: [u8; 4] = [BREAK, SYNC, opcodes::STCS | 0x03, 0x08];

/// CTRLB value that switches the UPDI interface off.
pub const CTRLB_UPDIDIS: u8 = 0x04;

pub const LINK_TIMEOUT_MS: u64 = 200;
/// Baud rate of the double-break recovery pulse.
pub const BREAK_BAUDRATE: u32 = 300;

/// Status polls after an unlock or erase request.
pub const KEY_POLL_ATTEMPTS: usize = 4;
pub const KEY_POLL_INTERVAL_MS: u64 = 200;

pub mod opcodes {
    pub const LDS: u8 = 0b0000_0000;
    pub const STS: u8 = 0b0100_0000;
    pub const LD: u8 = 0b0010_0000;
    pub const ST: u8 = 0b0110_0000;
    pub const LDCS: u8 = 0b1000_0000;
    pub const STCS: u8 = 0b1100_0000;
    pub const REPEAT: u8 = 0b1010_0000;
    pub const KEY_SET: u8 = 0b1110_0000;
    pub const KEY_GET: u8 = 0b1110_0100;
}

pub mod keys {
    /// "NVMErase"
    pub const CHIP_ERASE: [u8; 8] = [0x4E, 0x56, 0x4D, 0x45, 0x72, 0x61, 0x73, 0x65];
    /// "NVMProg "
    pub const NVMPROG: [u8; 8] = [0x4E, 0x56, 0x4D, 0x50, 0x72, 0x6F, 0x67, 0x20];
    /// "NVMUs&te"
    pub const USERROW_WRITE: [u8; 8] = [0x4E, 0x56, 0x4D, 0x55, 0x73, 0x26, 0x74, 0x65];
}

/// Extended segment ids used by AVR toolchains in Intel HEX output.
pub mod segments {
    pub const FLASH: u16 = 0x00;
    pub const EEPROM: u16 = 0x81;
    pub const FUSES: u16 = 0x82;
}

#[cfg(test)]
mod tests {
    use super::keys;

    #[test]
    fn keys_spell_their_names() {
        assert_eq!(&keys::CHIP_ERASE, b"NVMErase");
        assert_eq!(&keys::NVMPROG, b"NVMProg ");
        assert_eq!(&keys::USERROW_WRITE, b"NVMUs&te");
    }
}
