//! Hello-world applet.

use crate::apdu::{Apdu, StatusWord};
use crate::error::CardError;
use crate::kernel::{Applet, InstallParams, Runtime};
use crate::memory::{ArrayRef, Lifetime};

use super::{receive_all, respond};

pub const INS_HELLO: u8 = 0x01;
pub const INS_ECHO: u8 = 0x02;
pub const INS_LAST_ECHO: u8 = 0x03;
pub const INS_GREETINGS: u8 = 0x04;
pub const INS_THROW: u8 = 0x05;
pub const INS_PATTERN: u8 = 0x06;

pub const GREETING: &[u8] = b"Hello world !";

/// Longest echo kept for `INS_LAST_ECHO`.
const ECHO_CAPACITY: usize = 255;

pub struct HelloWorld {
    /// `[len][data..]` of the last echo; cleared on deselect.
    last_echo: ArrayRef,
    /// Greeting counter, persistent.
    greetings: ArrayRef,
}

impl HelloWorld {
    pub fn install(rt: &mut Runtime<'_>, _params: &InstallParams) -> Result<Box<dyn Applet>, CardError> {
        let last_echo = rt.make_byte_array(Lifetime::ClearOnDeselect, ECHO_CAPACITY + 1)?;
        let greetings = rt.make_short_array(Lifetime::Persistent, 1)?;
        rt.register()?;
        Ok(Box::new(HelloWorld {
            last_echo,
            greetings,
        }))
    }

    fn hello(&mut self, rt: &mut Runtime<'_>, apdu: &mut Apdu) -> Result<(), CardError> {
        let count = rt.get_short(self.greetings, 0)?;
        rt.set_short(self.greetings, 0, count.wrapping_add(1))?;
        respond(apdu, GREETING)
    }

    fn echo(&mut self, rt: &mut Runtime<'_>, apdu: &mut Apdu) -> Result<(), CardError> {
        let data = receive_all(apdu)?;
        if data.len() > ECHO_CAPACITY {
            return CardError::status(StatusWord::WRONG_LENGTH);
        }
        rt.set_byte(self.last_echo, 0, data.len() as u8)?;
        rt.write_bytes(self.last_echo, 1, &data)?;
        respond(apdu, &data)
    }

    fn last_echo(&mut self, rt: &mut Runtime<'_>, apdu: &mut Apdu) -> Result<(), CardError> {
        let len = rt.get_byte(self.last_echo, 0)? as usize;
        let data = rt.read_bytes(self.last_echo, 1, len)?;
        respond(apdu, &data)
    }

    fn pattern(&mut self, apdu: &mut Apdu) -> Result<(), CardError> {
        let len = usize::from(apdu.p1()) * 256 + usize::from(apdu.p2());
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        respond(apdu, &data)
    }
}

impl Applet for HelloWorld {
    fn process(&mut self, rt: &mut Runtime<'_>, apdu: &mut Apdu) -> Result<(), CardError> {
        if apdu.is_selecting() {
            return Ok(());
        }
        match apdu.ins() {
            INS_HELLO => self.hello(rt, apdu),
            INS_ECHO => self.echo(rt, apdu),
            INS_LAST_ECHO => self.last_echo(rt, apdu),
            INS_GREETINGS => {
                let count = rt.get_short(self.greetings, 0)?;
                respond(apdu, &count.to_be_bytes())
            }
            INS_THROW => CardError::status(StatusWord::new(apdu.p1(), apdu.p2())),
            INS_PATTERN => self.pattern(apdu),
            _ => CardError::status(StatusWord::INS_NOT_SUPPORTED),
        }
    }
}
