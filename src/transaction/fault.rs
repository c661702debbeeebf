//! Tear injection for testing atomicity.
//!
//! A real card can lose power between any two EEPROM writes. The injector
//! models that: once armed it lets a fixed number of persistent writes
//! through and then refuses the next one before it touches memory, exactly
//! as if the card had been pulled from the reader at that instant.

use super::error::TransactionError;

/// Counts down persistent writes and fires a single simulated tear.
#[derive(Clone, Debug, Default)]
pub struct TearInjector {
    /// Writes still allowed before the tear; `None` when disarmed.
    remaining: Option<usize>,
    /// Total tears fired over the injector's lifetime.
    fired: u64,
}

impl TearInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `after_writes` more persistent writes, then tear the next one.
    pub fn arm(&mut self, after_writes: usize) {
        self.remaining = Some(after_writes);
    }

    pub fn disarm(&mut self) {
        self.remaining = None;
    }

    pub fn is_armed(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn times_fired(&self) -> u64 {
        self.fired
    }

    /// Called before every persistent write.
    ///
    /// The injector disarms itself after firing.
    pub(crate) fn check(&mut self) -> Result<(), TransactionError> {
        match self.remaining {
            None => Ok(()),
            Some(0) => {
                self.remaining = None;
                self.fired += 1;
                Err(TransactionError::Torn)
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_after_countdown() {
        let mut tear = TearInjector::new();
        tear.arm(2);
        assert!(tear.check().is_ok());
        assert!(tear.check().is_ok());
        assert_eq!(tear.check(), Err(TransactionError::Torn));
        assert!(!tear.is_armed());
        assert!(tear.check().is_ok());
        assert_eq!(tear.times_fired(), 1);
    }

    #[test]
    fn test_disarmed_never_fires() {
        let mut tear = TearInjector::new();
        for _ in 0..100 {
            assert!(tear.check().is_ok());
        }
        tear.arm(0);
        tear.disarm();
        assert!(tear.check().is_ok());
        assert_eq!(tear.times_fired(), 0);
    }
}
