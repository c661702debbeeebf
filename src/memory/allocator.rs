//! Quota-accounted array storage.
//!
//! `MemoryManager` is the only owner of array contents. Reads and writes go
//! through typed primitives that check the firewall, the element kind and
//! the bounds; persistent writes additionally call
//! [`TransactionManager::record_before_write`] before anything changes.
//! No raw slice of a region ever leaves this module.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::transaction::{Journal, TransactionManager};

use super::context::ContextId;
use super::errors::MemoryError;
use super::region::{ArrayRef, Cells, ElementKind, Lifetime, Region, RegionId};

// =============================================================================
// QUOTAS
// =============================================================================

/// Per-lifetime memory limits in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub persistent: usize,
    pub clear_on_reset: usize,
    pub clear_on_deselect: usize,
}

impl Default for Quotas {
    fn default() -> Self {
        Quotas {
            persistent: 65_536,
            clear_on_reset: 4_096,
            clear_on_deselect: 4_096,
        }
    }
}

impl Quotas {
    pub fn limit(&self, lifetime: Lifetime) -> usize {
        match lifetime {
            Lifetime::Persistent => self.persistent,
            Lifetime::ClearOnReset => self.clear_on_reset,
            Lifetime::ClearOnDeselect => self.clear_on_deselect,
        }
    }
}

// =============================================================================
// MEMORY MANAGER
// =============================================================================

/// Allocator and access point for every array on one card.
#[derive(Debug)]
pub struct MemoryManager {
    regions: HashMap<RegionId, Region>,
    /// Ids are never reused, so a stale handle can't alias a new array.
    next_id: RegionId,
    quotas: Quotas,
    used: [usize; 3],
}

impl MemoryManager {
    pub fn new(quotas: Quotas) -> Self {
        MemoryManager {
            regions: HashMap::new(),
            next_id: 1,
            quotas,
            used: [0; 3],
        }
    }

    pub fn quotas(&self) -> &Quotas {
        &self.quotas
    }

    // -------------------------------------------------------------------------
    // Allocation and accounting
    // -------------------------------------------------------------------------

    /// Allocate a zeroed array of `len` elements owned by `owner`.
    ///
    /// Inside a transaction the allocation is journaled and disappears again
    /// if the transaction aborts.
    pub fn allocate(
        &mut self,
        tx: &mut TransactionManager,
        owner: ContextId,
        lifetime: Lifetime,
        kind: ElementKind,
        len: usize,
    ) -> Result<ArrayRef, MemoryError> {
        let requested = len.saturating_mul(kind.element_size());
        let available = self.available(lifetime);
        if requested > available {
            return Err(MemoryError::OutOfMemory {
                lifetime,
                requested,
                available,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.regions.insert(id, Region::new(owner, lifetime, kind, len));
        self.used[lifetime.index()] += requested;
        tx.record_allocation(id);

        trace!(id, %owner, ?lifetime, ?kind, len, "allocated array");
        Ok(ArrayRef::new(id, owner))
    }

    /// Bytes left in the quota for `lifetime`.
    pub fn available(&self, lifetime: Lifetime) -> usize {
        self.quotas.limit(lifetime) - self.used[lifetime.index()]
    }

    /// Bytes in use for `lifetime`.
    pub fn used(&self, lifetime: Lifetime) -> usize {
        self.used[lifetime.index()]
    }

    /// Number of live arrays.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Free one array and return its quota.
    pub fn release(&mut self, id: RegionId) -> Result<(), MemoryError> {
        let region = self
            .regions
            .remove(&id)
            .ok_or(MemoryError::InvalidHandle(id))?;
        self.used[region.lifetime.index()] -= region.footprint();
        Ok(())
    }

    /// Free every array owned by `owner`. Returns how many were freed.
    pub fn release_owned_by(&mut self, owner: ContextId) -> usize {
        let ids: Vec<RegionId> = self
            .regions
            .iter()
            .filter(|(_, r)| r.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(region) = self.regions.remove(id) {
                self.used[region.lifetime.index()] -= region.footprint();
            }
        }
        ids.len()
    }

    pub fn owner_of(&self, id: RegionId) -> Result<ContextId, MemoryError> {
        self.lookup(id).map(|r| r.owner)
    }

    pub fn lifetime_of(&self, id: RegionId) -> Result<Lifetime, MemoryError> {
        self.lookup(id).map(|r| r.lifetime)
    }

    pub fn kind_of(&self, id: RegionId) -> Result<ElementKind, MemoryError> {
        self.lookup(id).map(|r| r.kind)
    }

    /// Number of elements in the array.
    pub fn len(&self, id: RegionId) -> Result<usize, MemoryError> {
        self.lookup(id).map(|r| r.len)
    }

    pub fn is_live(&self, id: RegionId) -> bool {
        self.regions.contains_key(&id)
    }

    /// Let `client` through the firewall for this array.
    pub fn grant(&mut self, id: RegionId, client: ContextId) -> Result<(), MemoryError> {
        let region = self
            .regions
            .get_mut(&id)
            .ok_or(MemoryError::InvalidHandle(id))?;
        region.grants.insert(client);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifetime events
    // -------------------------------------------------------------------------

    /// Zero every clear-on-deselect array owned by `owner`.
    pub fn reset_clear_on_deselect(&mut self, owner: ContextId) -> usize {
        let mut cleared = 0;
        for region in self.regions.values_mut() {
            if region.owner == owner && region.lifetime == Lifetime::ClearOnDeselect {
                region.cells.clear();
                cleared += 1;
            }
        }
        debug!(%owner, cleared, "cleared deselect-transient arrays");
        cleared
    }

    /// Zero every transient array on the card.
    ///
    /// A reset deselects everything, so clear-on-deselect arrays go too.
    pub fn reset_clear_on_reset(&mut self) -> usize {
        let mut cleared = 0;
        for region in self.regions.values_mut() {
            if region.lifetime.is_transient() {
                region.cells.clear();
                cleared += 1;
            }
        }
        debug!(cleared, "cleared reset-transient arrays");
        cleared
    }

    /// Undo an aborted transaction.
    ///
    /// Pre-images are restored newest first, then every array allocated
    /// inside the transaction is freed. Returns the number of entries
    /// replayed.
    pub fn roll_back(&mut self, journal: Journal) -> usize {
        let (entries, allocations) = journal.into_parts();
        for entry in entries.iter().rev() {
            if let Some(region) = self.regions.get_mut(&entry.region) {
                region.cells.overlay(entry.start, &entry.image);
            }
        }
        for id in allocations {
            if let Some(region) = self.regions.remove(&id) {
                self.used[region.lifetime.index()] -= region.footprint();
            }
        }
        entries.len()
    }

    // -------------------------------------------------------------------------
    // Typed reads
    // -------------------------------------------------------------------------

    pub fn get_byte(&self, caller: ContextId, array: ArrayRef, index: usize) -> Result<u8, MemoryError> {
        let region = self.checked(caller, array, ElementKind::Byte, index, 1)?;
        Ok(region.cells.bytes()[index])
    }

    /// Copy `len` bytes starting at `offset`.
    pub fn read_bytes(
        &self,
        caller: ContextId,
        array: ArrayRef,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, MemoryError> {
        let region = self.checked(caller, array, ElementKind::Byte, offset, len)?;
        Ok(region.cells.bytes()[offset..offset + len].to_vec())
    }

    /// Big-endian signed short at element `index`.
    pub fn get_short(&self, caller: ContextId, array: ArrayRef, index: usize) -> Result<i16, MemoryError> {
        let region = self.checked(caller, array, ElementKind::Short, index, 1)?;
        let cells = region.cells.bytes();
        Ok(i16::from_be_bytes([cells[index * 2], cells[index * 2 + 1]]))
    }

    pub fn get_boolean(&self, caller: ContextId, array: ArrayRef, index: usize) -> Result<bool, MemoryError> {
        let region = self.checked(caller, array, ElementKind::Boolean, index, 1)?;
        Ok(region.cells.bytes()[index] != 0)
    }

    pub fn get_ref(
        &self,
        caller: ContextId,
        array: ArrayRef,
        index: usize,
    ) -> Result<Option<ArrayRef>, MemoryError> {
        let region = self.checked(caller, array, ElementKind::Object, index, 1)?;
        Ok(region.cells.refs()[index])
    }

    // -------------------------------------------------------------------------
    // Journaled writes
    // -------------------------------------------------------------------------

    pub fn set_byte(
        &mut self,
        tx: &mut TransactionManager,
        caller: ContextId,
        array: ArrayRef,
        index: usize,
        value: u8,
    ) -> Result<(), MemoryError> {
        self.write_cells(tx, caller, array, ElementKind::Byte, index, 1, |cells, at| {
            cells.bytes_mut()[at] = value;
        })
    }

    /// Copy `data` into the array at `offset`.
    pub fn write_bytes(
        &mut self,
        tx: &mut TransactionManager,
        caller: ContextId,
        array: ArrayRef,
        offset: usize,
        data: &[u8],
    ) -> Result<(), MemoryError> {
        self.write_cells(tx, caller, array, ElementKind::Byte, offset, data.len(), |cells, at| {
            cells.bytes_mut()[at..at + data.len()].copy_from_slice(data);
        })
    }

    pub fn fill_bytes(
        &mut self,
        tx: &mut TransactionManager,
        caller: ContextId,
        array: ArrayRef,
        offset: usize,
        len: usize,
        value: u8,
    ) -> Result<(), MemoryError> {
        self.write_cells(tx, caller, array, ElementKind::Byte, offset, len, |cells, at| {
            cells.bytes_mut()[at..at + len].fill(value);
        })
    }

    pub fn set_short(
        &mut self,
        tx: &mut TransactionManager,
        caller: ContextId,
        array: ArrayRef,
        index: usize,
        value: i16,
    ) -> Result<(), MemoryError> {
        self.write_cells(tx, caller, array, ElementKind::Short, index, 1, |cells, at| {
            cells.bytes_mut()[at..at + 2].copy_from_slice(&value.to_be_bytes());
        })
    }

    pub fn set_boolean(
        &mut self,
        tx: &mut TransactionManager,
        caller: ContextId,
        array: ArrayRef,
        index: usize,
        value: bool,
    ) -> Result<(), MemoryError> {
        self.write_cells(tx, caller, array, ElementKind::Boolean, index, 1, |cells, at| {
            cells.bytes_mut()[at] = u8::from(value);
        })
    }

    pub fn set_ref(
        &mut self,
        tx: &mut TransactionManager,
        caller: ContextId,
        array: ArrayRef,
        index: usize,
        value: Option<ArrayRef>,
    ) -> Result<(), MemoryError> {
        self.write_cells(tx, caller, array, ElementKind::Object, index, 1, |cells, at| {
            cells.refs_mut()[at] = value;
        })
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lookup(&self, id: RegionId) -> Result<&Region, MemoryError> {
        self.regions.get(&id).ok_or(MemoryError::InvalidHandle(id))
    }

    /// Resolve `array` for `caller` and check kind and element range.
    fn checked(
        &self,
        caller: ContextId,
        array: ArrayRef,
        expected: ElementKind,
        index: usize,
        count: usize,
    ) -> Result<&Region, MemoryError> {
        let region = self.lookup(array.id())?;
        check_access(region, caller, expected, index, count)?;
        Ok(region)
    }

    /// The single persistent-write path.
    ///
    /// `index`/`count` are in elements; `apply` receives the cell store and
    /// the first cell to write.
    #[allow(clippy::too_many_arguments)]
    fn write_cells<F>(
        &mut self,
        tx: &mut TransactionManager,
        caller: ContextId,
        array: ArrayRef,
        expected: ElementKind,
        index: usize,
        count: usize,
        apply: F,
    ) -> Result<(), MemoryError>
    where
        F: FnOnce(&mut Cells, usize),
    {
        let region = self
            .regions
            .get_mut(&array.id())
            .ok_or(MemoryError::InvalidHandle(array.id()))?;
        check_access(region, caller, expected, index, count)?;
        if count == 0 {
            return Ok(());
        }

        let width = region.kind.cell_width();
        let start = index * width;
        if region.lifetime == Lifetime::Persistent {
            tx.record_before_write(array.id(), start, count * width, &region.cells)?;
        }
        apply(&mut region.cells, start);
        Ok(())
    }
}

fn check_access(
    region: &Region,
    caller: ContextId,
    expected: ElementKind,
    index: usize,
    count: usize,
) -> Result<(), MemoryError> {
    if !region.accessible_by(caller) {
        return Err(MemoryError::SecurityViolation {
            caller,
            owner: region.owner,
        });
    }
    if region.kind != expected {
        return Err(MemoryError::KindMismatch {
            kind: region.kind,
            expected,
        });
    }
    match index.checked_add(count) {
        Some(end) if end <= region.len => Ok(()),
        _ => Err(MemoryError::OutOfBounds {
            index,
            len: count,
            length: region.len,
        }),
    }
}
