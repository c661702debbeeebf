//! The three-tier card memory model.
//!
//! Arrays are tagged with a [`Lifetime`]:
//!
//! - `Persistent` arrays survive everything and are the only ones the
//!   transaction journal protects.
//! - `ClearOnReset` arrays are zeroed when the card resets.
//! - `ClearOnDeselect` arrays are zeroed when their owning applet is
//!   deselected, and on reset.
//!
//! Each array belongs to the context that allocated it. Access from any
//! other context fails with [`MemoryError::SecurityViolation`] unless the
//! owner exported it through the shareable table in [`ContextTable`].

mod allocator;
pub mod context;
mod errors;
pub mod region;

#[cfg(test)]
mod tests;

pub use allocator::{MemoryManager, Quotas};
pub use context::{ContextId, ContextTable};
pub use errors::MemoryError;
pub use region::{ArrayRef, Cells, ElementKind, Lifetime, RegionId, REF_SIZE};
