//! APDU exchange: one command/response round trip seen from applet code.
//!
//! The exchange owns the APDU buffer and a phase machine that pins down
//! which calls are legal:
//!
//! ```text
//! Initial ──set_incoming_and_receive──► PartialIncoming ──receive_bytes──► FullIncoming
//!    │                     └────────────────────────────────────────────────►┘  │
//!    │ (no command data)                                                         │
//!    └──────────────set_outgoing───────► Outgoing ◄──────set_outgoing────────────┘
//!                                          │
//!                                 set_outgoing_length
//!                                          ▼
//!                               OutgoingLengthKnown ──send_bytes──► PartialOutgoing ──► FullOutgoing
//! ```
//!
//! `FullOutgoing` is terminal: an exchange is single use. A call from the
//! wrong phase fails with [`ApduError::IllegalUse`] and changes nothing.

mod error;
pub mod header;
pub mod status;

#[cfg(test)]
mod tests;

pub use error::ApduError;
pub use header::{channel_from_cla, CommandApdu};
pub use status::StatusWord;

use header::{HEADER_LEN, OFFSET_LC};

/// Default buffer size: 5 header bytes, 255 data bytes, 1 Le byte.
pub const DEFAULT_BUFFER_SIZE: usize = 261;

/// Smallest buffer the runtime accepts (ISO minimum of 133 bytes).
pub const MIN_BUFFER_SIZE: usize = 133;

/// Largest response a short exchange may announce.
pub const MAX_SHORT_OUTGOING: usize = 256;

/// Largest response an extended exchange may announce.
pub const MAX_EXTENDED_OUTGOING: usize = 32_767;

/// Phase of an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApduState {
    /// Only the header is in the buffer.
    Initial,
    /// Some command data is buffered, more is pending.
    PartialIncoming,
    /// All command data has been received.
    FullIncoming,
    /// The applet switched to output; length not yet announced.
    Outgoing,
    /// Output length announced, nothing sent yet.
    OutgoingLengthKnown,
    /// Some output sent.
    PartialOutgoing,
    /// All announced output sent.
    FullOutgoing,
}

/// One command/response exchange.
#[derive(Debug)]
pub struct Apdu {
    command: CommandApdu,
    buffer: Vec<u8>,
    state: ApduState,
    /// Command data bytes already moved into the buffer.
    received: usize,
    /// Output length announced through `set_outgoing_length`.
    announced: usize,
    /// Output accumulated so far.
    response: Vec<u8>,
    max_outgoing: usize,
    no_chaining: bool,
    selecting: bool,
}

impl Apdu {
    /// Wrap a decoded command in a fresh exchange.
    ///
    /// The buffer holds the header and the length field; command data
    /// arrives through `set_incoming_and_receive`.
    pub(crate) fn new(command: CommandApdu, buffer_size: usize, selecting: bool) -> Self {
        let mut buffer = vec![0u8; buffer_size.max(MIN_BUFFER_SIZE)];
        buffer[..HEADER_LEN].copy_from_slice(command.header());
        let length_field = command.length_field();
        buffer[OFFSET_LC..OFFSET_LC + length_field.len()].copy_from_slice(&length_field);

        let max_outgoing = if command.is_extended() {
            MAX_EXTENDED_OUTGOING
        } else {
            MAX_SHORT_OUTGOING
        };

        Apdu {
            command,
            buffer,
            state: ApduState::Initial,
            received: 0,
            announced: 0,
            response: Vec::new(),
            max_outgoing,
            no_chaining: false,
            selecting,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// The APDU buffer.
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// The APDU buffer, writable for building output in place.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn state(&self) -> ApduState {
        self.state
    }

    /// The decoded command this exchange wraps.
    pub fn command(&self) -> &CommandApdu {
        &self.command
    }

    pub fn cla(&self) -> u8 {
        self.command.cla()
    }

    pub fn ins(&self) -> u8 {
        self.command.ins()
    }

    pub fn p1(&self) -> u8 {
        self.command.p1()
    }

    pub fn p2(&self) -> u8 {
        self.command.p2()
    }

    /// Offset of command data in the buffer (5, or 7 for extended commands).
    pub fn offset_cdata(&self) -> usize {
        self.command.offset_cdata()
    }

    /// Lc: the total number of command data bytes.
    pub fn incoming_length(&self) -> usize {
        self.command.lc()
    }

    /// Ne: how many response bytes the terminal accepts in one reply.
    pub fn expected_length(&self) -> usize {
        self.command.ne()
    }

    /// Logical channel the command arrived on.
    pub fn channel(&self) -> u8 {
        self.command.channel()
    }

    /// True while processing the SELECT that activated the applet.
    pub fn is_selecting(&self) -> bool {
        self.selecting
    }

    /// True when the terminal addressed us with an ISO inter-industry class.
    pub fn is_iso_class(&self) -> bool {
        self.cla() & 0x80 == 0
    }

    /// True if the applet asked for output without response chaining.
    pub fn is_no_chaining(&self) -> bool {
        self.no_chaining
    }

    // =========================================================================
    // INCOMING
    // =========================================================================

    /// Start receiving command data.
    ///
    /// Moves as much data as fits behind the header into the buffer and
    /// returns the number of bytes moved. Legal only from `Initial`: a second
    /// call fails and leaves the buffer untouched.
    pub fn set_incoming_and_receive(&mut self) -> Result<usize, ApduError> {
        self.require("set_incoming_and_receive", &[ApduState::Initial])?;
        let offset = self.offset_cdata();
        Ok(self.receive_into(offset))
    }

    /// Continue a partial receive, writing the next chunk at `offset`.
    pub fn receive_bytes(&mut self, offset: usize) -> Result<usize, ApduError> {
        self.require("receive_bytes", &[ApduState::PartialIncoming])?;
        if offset >= self.buffer.len() {
            return Err(ApduError::BufferBounds {
                offset,
                len: 1,
                capacity: self.buffer.len(),
            });
        }
        Ok(self.receive_into(offset))
    }

    fn receive_into(&mut self, offset: usize) -> usize {
        let lc = self.command.lc();
        let room = self.buffer.len() - offset;
        let chunk = (lc - self.received).min(room);
        self.buffer[offset..offset + chunk]
            .copy_from_slice(&self.command.data()[self.received..self.received + chunk]);
        self.received += chunk;
        self.state = if self.received == lc {
            ApduState::FullIncoming
        } else {
            ApduState::PartialIncoming
        };
        chunk
    }

    // =========================================================================
    // OUTGOING
    // =========================================================================

    /// Switch the exchange to output. Returns Ne.
    pub fn set_outgoing(&mut self) -> Result<usize, ApduError> {
        self.begin_outgoing("set_outgoing")?;
        Ok(self.expected_length())
    }

    /// Switch to output and forbid response chaining. Returns Ne.
    pub fn set_outgoing_no_chaining(&mut self) -> Result<usize, ApduError> {
        self.begin_outgoing("set_outgoing_no_chaining")?;
        self.no_chaining = true;
        Ok(self.expected_length())
    }

    fn begin_outgoing(&mut self, operation: &'static str) -> Result<(), ApduError> {
        let ready = match self.state {
            ApduState::FullIncoming => true,
            ApduState::Initial => self.command.lc() == 0,
            _ => false,
        };
        if !ready {
            return Err(self.illegal(operation));
        }
        self.state = ApduState::Outgoing;
        Ok(())
    }

    /// Announce how many bytes will be sent.
    pub fn set_outgoing_length(&mut self, len: usize) -> Result<(), ApduError> {
        self.require("set_outgoing_length", &[ApduState::Outgoing])?;
        let max = if self.no_chaining {
            self.max_outgoing.min(self.expected_length())
        } else {
            self.max_outgoing
        };
        if len > max {
            return Err(ApduError::BadLength { requested: len, max });
        }
        self.announced = len;
        self.state = if len == 0 {
            ApduState::FullOutgoing
        } else {
            ApduState::OutgoingLengthKnown
        };
        Ok(())
    }

    /// Send `len` bytes of the buffer starting at `offset`.
    pub fn send_bytes(&mut self, offset: usize, len: usize) -> Result<(), ApduError> {
        self.require(
            "send_bytes",
            &[ApduState::OutgoingLengthKnown, ApduState::PartialOutgoing],
        )?;
        let end = checked_end(offset, len, self.buffer.len())?;
        self.check_overrun(len)?;
        self.response.extend_from_slice(&self.buffer[offset..end]);
        self.advance_outgoing();
        Ok(())
    }

    /// Send `len` bytes of `source` starting at `offset`, bypassing the buffer.
    pub fn send_bytes_long(&mut self, source: &[u8], offset: usize, len: usize) -> Result<(), ApduError> {
        self.require(
            "send_bytes_long",
            &[ApduState::OutgoingLengthKnown, ApduState::PartialOutgoing],
        )?;
        let end = checked_end(offset, len, source.len())?;
        self.check_overrun(len)?;
        self.response.extend_from_slice(&source[offset..end]);
        self.advance_outgoing();
        Ok(())
    }

    /// `set_outgoing`, `set_outgoing_length(len)` and `send_bytes(offset, len)` in one call.
    pub fn set_outgoing_and_send(&mut self, offset: usize, len: usize) -> Result<(), ApduError> {
        checked_end(offset, len, self.buffer.len())?;
        self.set_outgoing()?;
        self.set_outgoing_length(len)?;
        if len > 0 {
            self.send_bytes(offset, len)?;
        }
        Ok(())
    }

    fn check_overrun(&self, len: usize) -> Result<(), ApduError> {
        let sent = self.response.len();
        if sent + len > self.announced {
            return Err(ApduError::Overrun {
                announced: self.announced,
                sent,
                attempted: len,
            });
        }
        Ok(())
    }

    fn advance_outgoing(&mut self) {
        self.state = if self.response.len() == self.announced {
            ApduState::FullOutgoing
        } else {
            ApduState::PartialOutgoing
        };
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn require(&self, operation: &'static str, allowed: &[ApduState]) -> Result<(), ApduError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.illegal(operation))
        }
    }

    fn illegal(&self, operation: &'static str) -> ApduError {
        ApduError::IllegalUse {
            operation,
            state: self.state,
        }
    }

    /// Consume the exchange and yield the bytes the applet sent.
    ///
    /// Fails with `Incomplete` if a length was announced and not all of it
    /// was sent.
    pub(crate) fn into_response(self) -> Result<Vec<u8>, ApduError> {
        match self.state {
            ApduState::OutgoingLengthKnown | ApduState::PartialOutgoing => Err(ApduError::Incomplete {
                announced: self.announced,
                sent: self.response.len(),
            }),
            _ => Ok(self.response),
        }
    }
}

fn checked_end(offset: usize, len: usize, capacity: usize) -> Result<usize, ApduError> {
    offset
        .checked_add(len)
        .filter(|end| *end <= capacity)
        .ok_or(ApduError::BufferBounds {
            offset,
            len,
            capacity,
        })
}
