use thiserror::Error;

use crate::transaction::TransactionError;

use super::context::ContextId;
use super::region::{ElementKind, Lifetime, RegionId};

/// Failures of array allocation and access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The quota for this lifetime class cannot hold the allocation.
    #[error("out of {lifetime:?} memory: {requested} bytes requested, {available} available")]
    OutOfMemory {
        lifetime: Lifetime,
        requested: usize,
        available: usize,
    },

    /// The handle does not name a live array (never allocated, released,
    /// or rolled back with its transaction).
    #[error("invalid array handle {0}")]
    InvalidHandle(RegionId),

    /// Element range outside the array.
    #[error("index {index}+{len} out of bounds for array of length {length}")]
    OutOfBounds {
        index: usize,
        len: usize,
        length: usize,
    },

    /// Typed access to an array of a different element kind.
    #[error("array holds {kind:?} elements, access expected {expected:?}")]
    KindMismatch {
        kind: ElementKind,
        expected: ElementKind,
    },

    /// Firewall: the caller neither owns the array nor was granted it.
    #[error("{caller} may not access array owned by {owner}")]
    SecurityViolation { caller: ContextId, owner: ContextId },

    /// A persistent write was refused by the transaction layer.
    #[error(transparent)]
    Journal(#[from] TransactionError),
}
