//! ISO 7816-4 status words.

use std::fmt;

/// A two-byte response trailer (SW1 SW2).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub const NO_ERROR: StatusWord = StatusWord(0x9000);
    pub const BYTES_REMAINING_00: StatusWord = StatusWord(0x6100);
    pub const WARNING_STATE_UNCHANGED: StatusWord = StatusWord(0x6200);
    pub const WRONG_LENGTH: StatusWord = StatusWord(0x6700);
    pub const LOGICAL_CHANNEL_NOT_SUPPORTED: StatusWord = StatusWord(0x6881);
    pub const SECURE_MESSAGING_NOT_SUPPORTED: StatusWord = StatusWord(0x6882);
    pub const COMMAND_CHAINING_NOT_SUPPORTED: StatusWord = StatusWord(0x6884);
    pub const SECURITY_STATUS_NOT_SATISFIED: StatusWord = StatusWord(0x6982);
    pub const FILE_INVALID: StatusWord = StatusWord(0x6983);
    pub const DATA_INVALID: StatusWord = StatusWord(0x6984);
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord(0x6985);
    pub const COMMAND_NOT_ALLOWED: StatusWord = StatusWord(0x6986);
    pub const APPLET_SELECT_FAILED: StatusWord = StatusWord(0x6999);
    pub const WRONG_DATA: StatusWord = StatusWord(0x6A80);
    pub const FUNC_NOT_SUPPORTED: StatusWord = StatusWord(0x6A81);
    pub const FILE_NOT_FOUND: StatusWord = StatusWord(0x6A82);
    pub const RECORD_NOT_FOUND: StatusWord = StatusWord(0x6A83);
    pub const FILE_FULL: StatusWord = StatusWord(0x6A84);
    pub const INCORRECT_P1P2: StatusWord = StatusWord(0x6A86);
    pub const WRONG_P1P2: StatusWord = StatusWord(0x6B00);
    pub const CORRECT_LENGTH_00: StatusWord = StatusWord(0x6C00);
    pub const INS_NOT_SUPPORTED: StatusWord = StatusWord(0x6D00);
    pub const CLA_NOT_SUPPORTED: StatusWord = StatusWord(0x6E00);
    pub const UNKNOWN: StatusWord = StatusWord(0x6F00);

    /// Build from the two trailer bytes.
    pub fn new(sw1: u8, sw2: u8) -> Self {
        StatusWord(u16::from_be_bytes([sw1, sw2]))
    }

    /// `61xx`: more response bytes are waiting for GET RESPONSE.
    ///
    /// `xx` is 0 when 256 or more bytes remain.
    pub fn bytes_remaining(remaining: usize) -> Self {
        let sw2 = if remaining >= 256 { 0 } else { remaining as u8 };
        StatusWord::new(0x61, sw2)
    }

    #[inline]
    pub fn sw1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub fn sw2(self) -> u8 {
        self.0 as u8
    }

    /// Wire encoding.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// True for `9000` and the `61xx` family.
    pub fn is_success(self) -> bool {
        self == StatusWord::NO_ERROR || self.sw1() == 0x61
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SW({:04X})", self.0)
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        StatusWord(value)
    }
}
