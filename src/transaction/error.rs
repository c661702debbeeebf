use thiserror::Error;

/// Failures of the transaction subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// `begin` while a transaction is already active. Transactions do not nest.
    #[error("transaction already in progress")]
    AlreadyActive,

    /// `commit` or `abort` with no active transaction.
    #[error("no transaction in progress")]
    NotActive,

    /// Journaling the write would overflow the commit buffer.
    #[error("commit buffer full: {needed} bytes needed, {available} available")]
    BufferFull { needed: usize, available: usize },

    /// Simulated power loss before a persistent write reached memory.
    #[error("power lost before persistent write (simulated tear)")]
    Torn,
}
