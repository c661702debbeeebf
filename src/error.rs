//! The error type applet code propagates.
//!
//! Applets return `Result<(), CardError>` from every entry point and use `?`
//! on runtime calls. Nothing in this type ever reaches the terminal: the
//! dispatcher folds every variant into a status word through
//! [`CardError::status_word`].

use thiserror::Error;

use crate::aid::AidError;
use crate::apdu::{ApduError, StatusWord};
use crate::kernel::RegistryError;
use crate::memory::MemoryError;
use crate::transaction::TransactionError;

/// Anything that can end an exchange early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    /// An explicit "throw status word": the applet's business error channel.
    #[error("status {0}")]
    Status(StatusWord),

    #[error(transparent)]
    Apdu(#[from] ApduError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Aid(#[from] AidError),

    /// Applet code panicked.
    #[error("uncaught applet failure: {0}")]
    Uncaught(String),
}

impl CardError {
    /// Shorthand for `Err(CardError::Status(sw))` in applet code.
    pub fn status<T>(sw: StatusWord) -> Result<T, CardError> {
        Err(CardError::Status(sw))
    }

    /// The status word a terminal sees for this error.
    pub fn status_word(&self) -> StatusWord {
        match self {
            CardError::Status(sw) => *sw,
            CardError::Apdu(ApduError::BadLength { .. }) => StatusWord::WRONG_LENGTH,
            CardError::Memory(MemoryError::SecurityViolation { .. }) => {
                StatusWord::SECURITY_STATUS_NOT_SATISFIED
            }
            _ => StatusWord::UNKNOWN,
        }
    }

    /// True when the error is a simulated power loss.
    pub fn is_tear(&self) -> bool {
        matches!(
            self,
            CardError::Transaction(TransactionError::Torn)
                | CardError::Memory(MemoryError::Journal(TransactionError::Torn))
        )
    }
}

impl From<StatusWord> for CardError {
    fn from(sw: StatusWord) -> Self {
        CardError::Status(sw)
    }
}
