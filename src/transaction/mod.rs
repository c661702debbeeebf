//! Atomic transactions over persistent memory.
//!
//! A transaction is all-or-nothing: every persistent write between
//! [`TransactionManager::begin`] and [`TransactionManager::commit`] becomes
//! permanent together, or none of them does. Writes are applied in place;
//! the journal keeps pre-images so an abort can put the old contents back.
//!
//! Outside a transaction, persistent writes go straight to memory and are
//! not recoverable. Transient (clear-on-*) memory is never journaled.
//!
//! Transactions do not nest: the depth is always 0 or 1.

mod error;
pub mod fault;
pub mod journal;


pub use error::TransactionError;
pub use fault::TearInjector;
pub use journal::{Journal, JournalEntry};

use tracing::debug;

use crate::memory::{Cells, RegionId};

/// Whether a transaction is open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    None,
    Active,
}

/// Begins, commits and aborts transactions and owns the journal.
#[derive(Debug)]
pub struct TransactionManager {
    state: TransactionState,
    journal: Journal,
    tear: TearInjector,
    commits: u64,
    aborts: u64,
}

impl TransactionManager {
    /// Create a manager whose journal holds `commit_capacity` bytes.
    pub fn new(commit_capacity: usize) -> Self {
        TransactionManager {
            state: TransactionState::None,
            journal: Journal::with_capacity(commit_capacity),
            tear: TearInjector::new(),
            commits: 0,
            aborts: 0,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Nesting depth: 0 or 1.
    pub fn depth(&self) -> u8 {
        match self.state {
            TransactionState::None => 0,
            TransactionState::Active => 1,
        }
    }

    /// Open a transaction.
    ///
    /// Fails with `AlreadyActive` if one is open, leaving it and its
    /// journal untouched.
    pub fn begin(&mut self) -> Result<(), TransactionError> {
        if self.is_active() {
            return Err(TransactionError::AlreadyActive);
        }
        self.journal.clear();
        self.state = TransactionState::Active;
        debug!("transaction begin");
        Ok(())
    }

    /// Make every write since `begin` permanent.
    ///
    /// Writes were applied in place, so committing only discards the journal.
    /// Returns the number of pre-image entries discarded.
    pub fn commit(&mut self) -> Result<usize, TransactionError> {
        if !self.is_active() {
            return Err(TransactionError::NotActive);
        }
        let discarded = self.journal.len();
        self.journal.clear();
        self.state = TransactionState::None;
        self.commits += 1;
        debug!(entries = discarded, "transaction commit");
        Ok(discarded)
    }

    /// Close the transaction and hand back the journal for rollback.
    ///
    /// The caller replays it through
    /// [`MemoryManager::roll_back`](crate::memory::MemoryManager::roll_back),
    /// which restores the entries in reverse capture order.
    pub fn abort(&mut self) -> Result<Journal, TransactionError> {
        if !self.is_active() {
            return Err(TransactionError::NotActive);
        }
        self.state = TransactionState::None;
        self.aborts += 1;
        let journal = self.journal.take();
        debug!(entries = journal.len(), allocations = journal.allocations().len(), "transaction abort");
        Ok(journal)
    }

    /// Hook run by every persistent write primitive before it mutates.
    ///
    /// Gives the tear injector a chance to fire, then captures the pre-image
    /// of `start..start + len` if a transaction is active. Outside a
    /// transaction the write proceeds unrecorded.
    pub fn record_before_write(
        &mut self,
        region: RegionId,
        start: usize,
        len: usize,
        current: &Cells,
    ) -> Result<(), TransactionError> {
        self.tear.check()?;
        if self.is_active() {
            self.journal.record(region, start, len, current)?;
        }
        Ok(())
    }

    /// Note a region allocated inside the active transaction.
    pub fn record_allocation(&mut self, region: RegionId) {
        if self.is_active() {
            self.journal.record_allocation(region);
        }
    }

    /// Total commit buffer size in bytes.
    pub fn max_commit_capacity(&self) -> usize {
        self.journal.capacity()
    }

    /// Commit buffer bytes still free in the current transaction.
    pub fn unused_commit_capacity(&self) -> usize {
        self.journal.remaining()
    }

    /// The live journal (empty outside a transaction).
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn tear_injector(&self) -> &TearInjector {
        &self.tear
    }

    pub fn tear_injector_mut(&mut self) -> &mut TearInjector {
        &mut self.tear
    }

    /// Committed transactions so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Aborted transactions so far.
    pub fn aborts(&self) -> u64 {
        self.aborts
    }
}
