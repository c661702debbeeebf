//! Command APDU decoding.
//!
//! # Layout
//!
//! ```text
//! Case  Bytes
//! ----  -----
//! 1     CLA INS P1 P2
//! 2S    CLA INS P1 P2 Le
//! 3S    CLA INS P1 P2 Lc DATA(Lc)
//! 4S    CLA INS P1 P2 Lc DATA(Lc) Le
//! 2E    CLA INS P1 P2 00 Le(2)
//! 3E    CLA INS P1 P2 00 Lc(2) DATA(Lc)
//! 4E    CLA INS P1 P2 00 Lc(2) DATA(Lc) Le(2)
//! ```
//!
//! Extended forms are only accepted when the card enables them.

use super::status::StatusWord;

pub const OFFSET_CLA: usize = 0;
pub const OFFSET_INS: usize = 1;
pub const OFFSET_P1: usize = 2;
pub const OFFSET_P2: usize = 3;
pub const OFFSET_LC: usize = 4;
pub const OFFSET_CDATA: usize = 5;
pub const OFFSET_EXT_CDATA: usize = 7;

/// Header bytes without the length field.
pub const HEADER_LEN: usize = 4;

/// Largest `Ne` a short command can ask for.
pub const SHORT_NE_MAX: usize = 256;

/// Largest `Ne` an extended command can ask for.
pub const EXTENDED_NE_MAX: usize = 65_536;

/// Reserved instruction bytes the engine interprets itself.
pub mod ins {
    pub const SELECT: u8 = 0xA4;
    pub const MANAGE_CHANNEL: u8 = 0x70;
    pub const GET_RESPONSE: u8 = 0xC0;
}

/// A decoded command APDU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandApdu {
    header: [u8; HEADER_LEN],
    data: Vec<u8>,
    /// Expected response length; `None` when the command carried no Le.
    le: Option<usize>,
    extended: bool,
}

impl CommandApdu {
    /// Decode a raw command.
    ///
    /// Every length mismatch maps to `6700`, which is what the dispatcher
    /// returns for a malformed command.
    pub fn parse(raw: &[u8], extended_allowed: bool) -> Result<Self, StatusWord> {
        if raw.len() < HEADER_LEN {
            return Err(StatusWord::WRONG_LENGTH);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&raw[..HEADER_LEN]);
        let body = &raw[HEADER_LEN..];

        let short = |data: &[u8], le: Option<usize>| CommandApdu {
            header,
            data: data.to_vec(),
            le,
            extended: false,
        };

        match body.len() {
            // Case 1
            0 => Ok(short(&[], None)),
            // Case 2S
            1 => Ok(short(&[], Some(decode_short_le(body[0])))),
            _ if body[0] != 0 => {
                // Case 3S / 4S
                let lc = body[0] as usize;
                match body.len() - 1 {
                    n if n == lc => Ok(short(&body[1..], None)),
                    n if n == lc + 1 => Ok(short(&body[1..=lc], Some(decode_short_le(body[lc + 1])))),
                    _ => Err(StatusWord::WRONG_LENGTH),
                }
            }
            _ => {
                if !extended_allowed || body.len() < 3 {
                    return Err(StatusWord::WRONG_LENGTH);
                }
                let first = u16::from_be_bytes([body[1], body[2]]) as usize;
                if body.len() == 3 {
                    // Case 2E
                    return Ok(CommandApdu {
                        header,
                        data: Vec::new(),
                        le: Some(decode_extended_le(first)),
                        extended: true,
                    });
                }
                let lc = first;
                if lc == 0 {
                    return Err(StatusWord::WRONG_LENGTH);
                }
                let rest = &body[3..];
                let le = match rest.len() {
                    n if n == lc => None,
                    n if n == lc + 2 => Some(decode_extended_le(
                        u16::from_be_bytes([rest[lc], rest[lc + 1]]) as usize,
                    )),
                    _ => return Err(StatusWord::WRONG_LENGTH),
                };
                Ok(CommandApdu {
                    header,
                    data: rest[..lc].to_vec(),
                    le,
                    extended: true,
                })
            }
        }
    }

    #[inline]
    pub fn cla(&self) -> u8 {
        self.header[OFFSET_CLA]
    }

    #[inline]
    pub fn ins(&self) -> u8 {
        self.header[OFFSET_INS]
    }

    #[inline]
    pub fn p1(&self) -> u8 {
        self.header[OFFSET_P1]
    }

    #[inline]
    pub fn p2(&self) -> u8 {
        self.header[OFFSET_P2]
    }

    /// The four header bytes.
    pub fn header(&self) -> &[u8; HEADER_LEN] {
        &self.header
    }

    /// Command data field (empty for cases 1 and 2).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Lc: the number of command data bytes.
    pub fn lc(&self) -> usize {
        self.data.len()
    }

    /// Raw Le, if the command carried one.
    pub fn le(&self) -> Option<usize> {
        self.le
    }

    /// Ne: how many response bytes the terminal accepts in one reply.
    pub fn ne(&self) -> usize {
        match self.le {
            Some(le) => le,
            None if self.extended => EXTENDED_NE_MAX,
            None => SHORT_NE_MAX,
        }
    }

    /// True when the command used the extended length encoding.
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Offset of the command data inside an APDU buffer.
    pub fn offset_cdata(&self) -> usize {
        if self.extended {
            OFFSET_EXT_CDATA
        } else {
            OFFSET_CDATA
        }
    }

    /// Logical channel addressed by the class byte.
    pub fn channel(&self) -> u8 {
        channel_from_cla(self.cla())
    }

    /// Encoded length bytes as they sit in the APDU buffer after the header.
    pub(crate) fn length_field(&self) -> Vec<u8> {
        if self.extended {
            let value = if self.data.is_empty() {
                self.le.map_or(0, |le| le as u16)
            } else {
                self.data.len() as u16
            };
            let [hi, lo] = value.to_be_bytes();
            vec![0, hi, lo]
        } else if !self.data.is_empty() {
            vec![self.data.len() as u8]
        } else {
            self.le.map(|le| vec![le as u8]).unwrap_or_default()
        }
    }
}

fn decode_short_le(byte: u8) -> usize {
    if byte == 0 {
        SHORT_NE_MAX
    } else {
        byte as usize
    }
}

fn decode_extended_le(value: usize) -> usize {
    if value == 0 {
        EXTENDED_NE_MAX
    } else {
        value
    }
}

/// Logical channel encoded in a class byte.
///
/// First-interindustry classes carry channels 0..=3 in b2..b1;
/// further-interindustry classes (b7 set) carry 4..=19 in b4..b1.
pub fn channel_from_cla(cla: u8) -> u8 {
    if cla & 0x40 != 0 {
        4 + (cla & 0x0F)
    } else {
        cla & 0x03
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_1() {
        let cmd = CommandApdu::parse(&[0x00, 0x01, 0x00, 0x00], false).unwrap();
        assert_eq!(cmd.ins(), 0x01);
        assert_eq!(cmd.lc(), 0);
        assert_eq!(cmd.le(), None);
        assert_eq!(cmd.ne(), 256);
    }

    #[test]
    fn test_case_2s_le_zero_means_256() {
        let cmd = CommandApdu::parse(&[0x00, 0xB0, 0x00, 0x00, 0x00], false).unwrap();
        assert_eq!(cmd.le(), Some(256));
        let cmd = CommandApdu::parse(&[0x00, 0xB0, 0x00, 0x00, 0x10], false).unwrap();
        assert_eq!(cmd.ne(), 16);
    }

    #[test]
    fn test_case_3s_and_4s() {
        let cmd = CommandApdu::parse(&[0x80, 0x02, 0x00, 0x00, 0x02, 0xAB, 0xCD], false).unwrap();
        assert_eq!(cmd.data(), &[0xAB, 0xCD]);
        assert_eq!(cmd.le(), None);

        let cmd =
            CommandApdu::parse(&[0x80, 0x02, 0x00, 0x00, 0x02, 0xAB, 0xCD, 0x05], false).unwrap();
        assert_eq!(cmd.data(), &[0xAB, 0xCD]);
        assert_eq!(cmd.le(), Some(5));
    }

    #[test]
    fn test_length_mismatch() {
        assert_eq!(
            CommandApdu::parse(&[0x00, 0x02, 0x00, 0x00, 0x03, 0x01], false),
            Err(StatusWord::WRONG_LENGTH)
        );
        assert_eq!(
            CommandApdu::parse(&[0x00, 0x02, 0x00], false),
            Err(StatusWord::WRONG_LENGTH)
        );
    }

    #[test]
    fn test_extended_requires_opt_in() {
        let raw = [0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02, 0x11, 0x22];
        assert_eq!(CommandApdu::parse(&raw, false), Err(StatusWord::WRONG_LENGTH));

        let cmd = CommandApdu::parse(&raw, true).unwrap();
        assert!(cmd.is_extended());
        assert_eq!(cmd.data(), &[0x11, 0x22]);
        assert_eq!(cmd.ne(), EXTENDED_NE_MAX);
        assert_eq!(cmd.offset_cdata(), OFFSET_EXT_CDATA);
        assert_eq!(cmd.length_field(), vec![0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_extended_case_4() {
        let raw = [0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x7F, 0x01, 0x00];
        let cmd = CommandApdu::parse(&raw, true).unwrap();
        assert_eq!(cmd.data(), &[0x7F]);
        assert_eq!(cmd.le(), Some(256));
    }

    #[test]
    fn test_channel_from_cla() {
        assert_eq!(channel_from_cla(0x00), 0);
        assert_eq!(channel_from_cla(0x03), 3);
        assert_eq!(channel_from_cla(0x81), 1);
        assert_eq!(channel_from_cla(0x40), 4);
        assert_eq!(channel_from_cla(0x4F), 19);
        assert_eq!(channel_from_cla(0xC2), 6);
    }
}
