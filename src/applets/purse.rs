//! Electronic purse applet.
//!
//! The balance, the transaction count and the last amount live in one
//! persistent short array and every command that changes them does so
//! inside a single transaction, so a tear can never leave the count
//! advanced without the balance (or the other way round).

use crate::apdu::{Apdu, StatusWord};
use crate::error::CardError;
use crate::kernel::{Applet, InstallParams, Runtime};
use crate::memory::{ArrayRef, Lifetime};

use super::{receive_all, respond};

pub const INS_CREDIT: u8 = 0x30;
pub const INS_DEBIT: u8 = 0x40;
pub const INS_BALANCE: u8 = 0x50;
pub const INS_COUNT: u8 = 0x60;

/// Debit larger than the balance.
pub const SW_INSUFFICIENT_FUNDS: StatusWord = StatusWord(0x6910);

/// Largest balance a purse holds.
pub const MAX_BALANCE: i16 = i16::MAX;

const BALANCE: usize = 0;
const COUNT: usize = 1;
const LAST_AMOUNT: usize = 2;

pub struct Purse {
    state: ArrayRef,
}

impl Purse {
    /// Optional install data: a 2-byte initial balance.
    pub fn install(rt: &mut Runtime<'_>, params: &InstallParams) -> Result<Box<dyn Applet>, CardError> {
        let state = rt.make_short_array(Lifetime::Persistent, 3)?;
        if let [hi, lo] = params.applet_data[..] {
            let opening = i16::from_be_bytes([hi, lo]);
            if opening < 0 {
                return CardError::status(StatusWord::WRONG_DATA);
            }
            rt.set_short(state, BALANCE, opening)?;
        }
        rt.register()?;
        Ok(Box::new(Purse { state }))
    }

    fn amount(apdu: &mut Apdu) -> Result<i16, CardError> {
        let data = receive_all(apdu)?;
        let [hi, lo] = data[..] else {
            return CardError::status(StatusWord::WRONG_LENGTH);
        };
        let amount = i16::from_be_bytes([hi, lo]);
        if amount < 0 {
            return CardError::status(StatusWord::WRONG_DATA);
        }
        Ok(amount)
    }

    /// Apply a signed change to the balance in one transaction.
    fn apply(&mut self, rt: &mut Runtime<'_>, amount: i16, delta: i16) -> Result<(), CardError> {
        let balance = rt.get_short(self.state, BALANCE)?;
        let updated = match balance.checked_add(delta) {
            Some(v) if v < 0 => return CardError::status(SW_INSUFFICIENT_FUNDS),
            Some(v) => v,
            None => return CardError::status(StatusWord::FILE_FULL),
        };
        let count = rt.get_short(self.state, COUNT)?;

        rt.begin_transaction()?;
        rt.set_short(self.state, BALANCE, updated)?;
        rt.set_short(self.state, COUNT, count.wrapping_add(1))?;
        rt.set_short(self.state, LAST_AMOUNT, amount)?;
        rt.commit_transaction()
    }

    fn read(&self, rt: &Runtime<'_>, apdu: &mut Apdu, index: usize) -> Result<(), CardError> {
        let value = rt.get_short(self.state, index)?;
        respond(apdu, &value.to_be_bytes())
    }
}

impl Applet for Purse {
    fn process(&mut self, rt: &mut Runtime<'_>, apdu: &mut Apdu) -> Result<(), CardError> {
        if apdu.is_selecting() {
            return Ok(());
        }
        match apdu.ins() {
            INS_CREDIT => {
                let amount = Self::amount(apdu)?;
                self.apply(rt, amount, amount)
            }
            INS_DEBIT => {
                let amount = Self::amount(apdu)?;
                self.apply(rt, amount, -amount)
            }
            INS_BALANCE => self.read(rt, apdu, BALANCE),
            INS_COUNT => self.read(rt, apdu, COUNT),
            _ => CardError::status(StatusWord::INS_NOT_SUPPORTED),
        }
    }

    fn multi_selectable(&self) -> bool {
        true
    }
}

