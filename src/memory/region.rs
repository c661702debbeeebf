//! Memory regions: typed arrays tagged with a lifetime class.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::context::ContextId;

/// Region identifier, unique within one card.
pub type RegionId = u32;

/// Bytes charged per object reference.
pub const REF_SIZE: usize = 2;

/// When a region's contents are reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// Survives resets and deselection; participates in transactions.
    Persistent,
    /// Zeroed on card reset.
    ClearOnReset,
    /// Zeroed when the owning context is deselected (and on reset).
    ClearOnDeselect,
}

impl Lifetime {
    pub const ALL: [Lifetime; 3] = [
        Lifetime::Persistent,
        Lifetime::ClearOnReset,
        Lifetime::ClearOnDeselect,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Lifetime::Persistent => 0,
            Lifetime::ClearOnReset => 1,
            Lifetime::ClearOnDeselect => 2,
        }
    }

    pub fn is_transient(self) -> bool {
        self != Lifetime::Persistent
    }
}

/// Element type of an array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Byte,
    Short,
    Boolean,
    Object,
}

impl ElementKind {
    /// Cells per element in the backing store.
    pub(crate) fn cell_width(self) -> usize {
        match self {
            ElementKind::Short => 2,
            _ => 1,
        }
    }

    /// Bytes charged against the quota per element.
    pub fn element_size(self) -> usize {
        match self {
            ElementKind::Byte | ElementKind::Boolean => 1,
            ElementKind::Short => 2,
            ElementKind::Object => REF_SIZE,
        }
    }
}

/// A handle to an array, tagged with its owning context.
///
/// Handles are plain values: copying one does not grant access. Every
/// read and write checks the caller's context against the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArrayRef {
    id: RegionId,
    owner: ContextId,
}

impl ArrayRef {
    pub(crate) fn new(id: RegionId, owner: ContextId) -> Self {
        ArrayRef { id, owner }
    }

    pub fn id(self) -> RegionId {
        self.id
    }

    pub fn owner(self) -> ContextId {
        self.owner
    }
}

/// Backing store of a region.
///
/// Byte, short and boolean arrays are byte cells (shorts are two
/// big-endian cells); object arrays hold references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cells {
    Bytes(Vec<u8>),
    Refs(Vec<Option<ArrayRef>>),
}

impl Cells {
    fn zeroed(kind: ElementKind, len: usize) -> Self {
        match kind {
            ElementKind::Object => Cells::Refs(vec![None; len]),
            _ => Cells::Bytes(vec![0; len * kind.cell_width()]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Cells::Bytes(b) => b.len(),
            Cells::Refs(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of commit buffer needed to hold these cells.
    pub fn footprint(&self) -> usize {
        match self {
            Cells::Bytes(b) => b.len(),
            Cells::Refs(r) => r.len() * REF_SIZE,
        }
    }

    /// Copy of `start..start + len`.
    pub fn slice(&self, start: usize, len: usize) -> Cells {
        match self {
            Cells::Bytes(b) => Cells::Bytes(b[start..start + len].to_vec()),
            Cells::Refs(r) => Cells::Refs(r[start..start + len].to_vec()),
        }
    }

    /// Overwrite the cells at `at` with `other`.
    pub fn overlay(&mut self, at: usize, other: &Cells) {
        match (self, other) {
            (Cells::Bytes(dst), Cells::Bytes(src)) => {
                dst[at..at + src.len()].copy_from_slice(src);
            }
            (Cells::Refs(dst), Cells::Refs(src)) => {
                dst[at..at + src.len()].copy_from_slice(src);
            }
            (dst, src) => {
                debug_assert!(false, "overlay of {} cells onto {} cells", src.kind_name(), dst.kind_name());
            }
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Cells::Bytes(_) => "byte",
            Cells::Refs(_) => "reference",
        }
    }

    /// Zero every byte / null every reference.
    pub fn clear(&mut self) {
        match self {
            Cells::Bytes(b) => b.fill(0),
            Cells::Refs(r) => r.fill(None),
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Cells::Bytes(b) => b,
            Cells::Refs(_) => &[],
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Cells::Bytes(b) => b,
            Cells::Refs(_) => &mut [],
        }
    }

    pub(crate) fn refs(&self) -> &[Option<ArrayRef>] {
        match self {
            Cells::Refs(r) => r,
            Cells::Bytes(_) => &[],
        }
    }

    pub(crate) fn refs_mut(&mut self) -> &mut [Option<ArrayRef>] {
        match self {
            Cells::Refs(r) => r,
            Cells::Bytes(_) => &mut [],
        }
    }
}

/// A live array.
#[derive(Clone, Debug)]
pub(crate) struct Region {
    pub(crate) owner: ContextId,
    pub(crate) lifetime: Lifetime,
    pub(crate) kind: ElementKind,
    /// Number of elements.
    pub(crate) len: usize,
    pub(crate) cells: Cells,
    /// Contexts other than the owner allowed in through a shareable export.
    pub(crate) grants: HashSet<ContextId>,
}

impl Region {
    pub(crate) fn new(owner: ContextId, lifetime: Lifetime, kind: ElementKind, len: usize) -> Self {
        Region {
            owner,
            lifetime,
            kind,
            len,
            cells: Cells::zeroed(kind, len),
            grants: HashSet::new(),
        }
    }

    /// Quota bytes this region occupies.
    pub(crate) fn footprint(&self) -> usize {
        self.len * self.kind.element_size()
    }

    pub(crate) fn accessible_by(&self, caller: ContextId) -> bool {
        caller.is_system() || caller == self.owner || self.grants.contains(&caller)
    }
}
