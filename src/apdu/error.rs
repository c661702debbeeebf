use thiserror::Error;

use super::ApduState;

/// Misuse of an APDU exchange by applet code.
///
/// These are programming errors in the applet, kept apart from the ISO
/// status words a terminal sees for protocol problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApduError {
    /// The call is not legal in the exchange's current phase.
    #[error("{operation} is illegal in state {state:?}")]
    IllegalUse {
        operation: &'static str,
        state: ApduState,
    },

    /// An offset/length pair leaves the buffer or source array.
    #[error("range {offset}+{len} exceeds {capacity} bytes")]
    BufferBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// The requested outgoing length is larger than the card may send.
    #[error("outgoing length {requested} exceeds maximum {max}")]
    BadLength { requested: usize, max: usize },

    /// More bytes were sent than announced by `set_outgoing_length`.
    #[error("sending {attempted} more bytes would exceed announced length {announced} ({sent} already sent)")]
    Overrun {
        announced: usize,
        sent: usize,
        attempted: usize,
    },

    /// The exchange ended with fewer bytes sent than announced.
    #[error("exchange ended after {sent} of {announced} announced bytes")]
    Incomplete { announced: usize, sent: usize },
}
