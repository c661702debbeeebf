//! Pre-image journal for persistent writes.
//!
//! The journal records the original contents of every persistent range
//! written while a transaction is active, captured before the first write
//! to that range. Entries for one region never overlap: a write that
//! touches already-journaled cells widens the existing entries to the
//! union of all ranges involved, so the journal may store more than was
//! written but never less.

use crate::memory::{Cells, RegionId};

use super::error::TransactionError;

/// One captured pre-image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    /// Region the pre-image belongs to.
    pub(crate) region: RegionId,
    /// First cell covered.
    pub(crate) start: usize,
    /// Original cell contents of `start..start + image.len()`.
    pub(crate) image: Cells,
}

impl JournalEntry {
    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last cell covered.
    pub fn end(&self) -> usize {
        self.start + self.image.len()
    }
}

/// The transaction journal.
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    /// Regions allocated since `begin`; released again on abort.
    allocations: Vec<RegionId>,
    /// Commit buffer bytes consumed by pre-images.
    used: usize,
    capacity: usize,
}

impl Journal {
    /// Create an empty journal holding at most `capacity` bytes of pre-images.
    pub fn with_capacity(capacity: usize) -> Self {
        Journal {
            entries: Vec::new(),
            allocations: Vec::new(),
            used: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    /// Number of pre-image entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.allocations.is_empty()
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn allocations(&self) -> &[RegionId] {
        &self.allocations
    }

    /// Capture the pre-image of `start..start + len` in `region`.
    ///
    /// `current` is the region's full cell array as it is right now. Cells
    /// already covered by an entry keep their recorded image; only cells
    /// never journaled before are copied from `current`. Entries that
    /// overlap or touch the new range are merged into one.
    ///
    /// Fails with `BufferFull` without touching the journal if the widened
    /// entry does not fit.
    pub fn record(
        &mut self,
        region: RegionId,
        start: usize,
        len: usize,
        current: &Cells,
    ) -> Result<(), TransactionError> {
        if len == 0 {
            return Ok(());
        }
        let end = start + len;

        let overlapping: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.region == region && e.start <= end && start <= e.end())
            .map(|(i, _)| i)
            .collect();

        if let [only] = overlapping.as_slice() {
            let entry = &self.entries[*only];
            if entry.start <= start && end <= entry.end() {
                return Ok(());
            }
        }

        let lo = overlapping
            .iter()
            .map(|&i| self.entries[i].start)
            .fold(start, usize::min);
        let hi = overlapping
            .iter()
            .map(|&i| self.entries[i].end())
            .fold(end, usize::max);

        let mut image = current.slice(lo, hi - lo);
        let replaced: usize = overlapping
            .iter()
            .map(|&i| self.entries[i].image.footprint())
            .sum();
        let needed = image.footprint() - replaced;
        if needed > self.remaining() {
            return Err(TransactionError::BufferFull {
                needed,
                available: self.remaining(),
            });
        }

        for &i in &overlapping {
            let entry = &self.entries[i];
            image.overlay(entry.start - lo, &entry.image);
        }
        for &i in overlapping.iter().rev() {
            self.entries.remove(i);
        }
        self.entries.push(JournalEntry {
            region,
            start: lo,
            image,
        });
        self.used += needed;
        Ok(())
    }

    /// Remember a region created inside the transaction.
    pub fn record_allocation(&mut self, region: RegionId) {
        self.allocations.push(region);
    }

    /// Drop everything recorded so far.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.allocations.clear();
        self.used = 0;
    }

    /// Move the recorded contents out, leaving an empty journal of the same capacity.
    pub(crate) fn take(&mut self) -> Journal {
        std::mem::replace(self, Journal::with_capacity(self.capacity))
    }

    /// Split into pre-images (in capture order) and allocations.
    pub(crate) fn into_parts(self) -> (Vec<JournalEntry>, Vec<RegionId>) {
        (self.entries, self.allocations)
    }
}
