use super::*;
use crate::transaction::{TransactionError, TransactionManager};

const APPLET: ContextId = ContextId(1);
const OTHER: ContextId = ContextId(2);

fn setup() -> (MemoryManager, TransactionManager) {
    (
        MemoryManager::new(Quotas {
            persistent: 256,
            clear_on_reset: 64,
            clear_on_deselect: 64,
        }),
        TransactionManager::new(128),
    )
}

// =============================================================================
// ACCOUNTING
// =============================================================================

#[test]
fn test_allocation_is_charged_to_its_lifetime() {
    let (mut mem, mut tx) = setup();
    mem.allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Short, 10)
        .unwrap();
    mem.allocate(&mut tx, APPLET, Lifetime::ClearOnDeselect, ElementKind::Object, 4)
        .unwrap();

    assert_eq!(mem.available(Lifetime::Persistent), 256 - 20);
    assert_eq!(mem.available(Lifetime::ClearOnDeselect), 64 - 4 * REF_SIZE);
    assert_eq!(mem.available(Lifetime::ClearOnReset), 64);
    assert_eq!(mem.quotas().limit(Lifetime::ClearOnReset), 64);
}

#[test]
fn test_quota_exhaustion() {
    let (mut mem, mut tx) = setup();
    mem.allocate(&mut tx, APPLET, Lifetime::ClearOnReset, ElementKind::Byte, 60)
        .unwrap();
    let err = mem
        .allocate(&mut tx, APPLET, Lifetime::ClearOnReset, ElementKind::Byte, 5)
        .unwrap_err();
    assert_eq!(
        err,
        MemoryError::OutOfMemory {
            lifetime: Lifetime::ClearOnReset,
            requested: 5,
            available: 4,
        }
    );
    assert_eq!(mem.region_count(), 1);
}

#[test]
fn test_release_returns_quota_and_invalidates_handle() {
    let (mut mem, mut tx) = setup();
    let a = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 16)
        .unwrap();
    mem.release(a.id()).unwrap();
    assert_eq!(mem.available(Lifetime::Persistent), 256);
    assert_eq!(
        mem.get_byte(APPLET, a, 0),
        Err(MemoryError::InvalidHandle(a.id()))
    );
    assert_eq!(mem.release(a.id()), Err(MemoryError::InvalidHandle(a.id())));
}

#[test]
fn test_release_owned_by() {
    let (mut mem, mut tx) = setup();
    for _ in 0..3 {
        mem.allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 4)
            .unwrap();
    }
    mem.allocate(&mut tx, OTHER, Lifetime::Persistent, ElementKind::Byte, 4)
        .unwrap();
    assert_eq!(mem.release_owned_by(APPLET), 3);
    assert_eq!(mem.region_count(), 1);
    assert_eq!(mem.used(Lifetime::Persistent), 4);
}

// =============================================================================
// TYPED ACCESS
// =============================================================================

#[test]
fn test_typed_round_trip() {
    let (mut mem, mut tx) = setup();
    let shorts = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Short, 3)
        .unwrap();
    mem.set_short(&mut tx, APPLET, shorts, 2, -2).unwrap();
    assert_eq!(mem.get_short(APPLET, shorts, 2).unwrap(), -2);
    assert_eq!(mem.get_short(APPLET, shorts, 0).unwrap(), 0);

    let flags = mem
        .allocate(&mut tx, APPLET, Lifetime::ClearOnReset, ElementKind::Boolean, 2)
        .unwrap();
    mem.set_boolean(&mut tx, APPLET, flags, 1, true).unwrap();
    assert!(mem.get_boolean(APPLET, flags, 1).unwrap());

    let refs = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Object, 2)
        .unwrap();
    mem.set_ref(&mut tx, APPLET, refs, 0, Some(flags)).unwrap();
    assert_eq!(mem.get_ref(APPLET, refs, 0).unwrap(), Some(flags));
    assert_eq!(mem.get_ref(APPLET, refs, 1).unwrap(), None);
}

#[test]
fn test_kind_and_bounds_are_checked() {
    let (mut mem, mut tx) = setup();
    let bytes = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 4)
        .unwrap();
    assert_eq!(mem.kind_of(bytes.id()), Ok(ElementKind::Byte));
    assert_eq!(
        mem.get_short(APPLET, bytes, 0),
        Err(MemoryError::KindMismatch {
            kind: ElementKind::Byte,
            expected: ElementKind::Short,
        })
    );
    assert_eq!(
        mem.write_bytes(&mut tx, APPLET, bytes, 2, &[1, 2, 3]),
        Err(MemoryError::OutOfBounds {
            index: 2,
            len: 3,
            length: 4,
        })
    );
    assert_eq!(mem.read_bytes(APPLET, bytes, 0, 4).unwrap(), vec![0; 4]);
}

#[test]
fn test_firewall() {
    let (mut mem, mut tx) = setup();
    let private = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 4)
        .unwrap();

    let err = mem.get_byte(OTHER, private, 0).unwrap_err();
    assert_eq!(
        err,
        MemoryError::SecurityViolation {
            caller: OTHER,
            owner: APPLET,
        }
    );
    assert!(mem.set_byte(&mut tx, OTHER, private, 0, 1).is_err());

    // The runtime itself sees everything.
    mem.set_byte(&mut tx, ContextId::SYSTEM, private, 0, 7).unwrap();

    mem.grant(private.id(), OTHER).unwrap();
    assert_eq!(mem.get_byte(OTHER, private, 0).unwrap(), 7);
    assert_eq!(mem.owner_of(private.id()).unwrap(), APPLET);
}

// =============================================================================
// LIFETIME EVENTS
// =============================================================================

#[test]
fn test_deselect_clears_only_its_owners_deselect_arrays() {
    let (mut mem, mut tx) = setup();
    let persistent = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 2)
        .unwrap();
    let cod = mem
        .allocate(&mut tx, APPLET, Lifetime::ClearOnDeselect, ElementKind::Byte, 2)
        .unwrap();
    let other_cod = mem
        .allocate(&mut tx, OTHER, Lifetime::ClearOnDeselect, ElementKind::Byte, 2)
        .unwrap();

    mem.write_bytes(&mut tx, APPLET, persistent, 0, &[1, 2]).unwrap();
    mem.write_bytes(&mut tx, APPLET, cod, 0, &[3, 4]).unwrap();
    mem.write_bytes(&mut tx, OTHER, other_cod, 0, &[5, 6]).unwrap();

    assert_eq!(mem.reset_clear_on_deselect(APPLET), 1);
    assert_eq!(mem.read_bytes(APPLET, persistent, 0, 2).unwrap(), vec![1, 2]);
    assert_eq!(mem.read_bytes(APPLET, cod, 0, 2).unwrap(), vec![0, 0]);
    assert_eq!(mem.read_bytes(OTHER, other_cod, 0, 2).unwrap(), vec![5, 6]);
}

#[test]
fn test_reset_clears_every_transient_array() {
    let (mut mem, mut tx) = setup();
    let persistent = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 1)
        .unwrap();
    let cor = mem
        .allocate(&mut tx, OTHER, Lifetime::ClearOnReset, ElementKind::Object, 1)
        .unwrap();
    mem.set_byte(&mut tx, APPLET, persistent, 0, 9).unwrap();
    mem.set_ref(&mut tx, OTHER, cor, 0, Some(persistent)).unwrap();

    mem.reset_clear_on_reset();
    assert_eq!(mem.get_byte(APPLET, persistent, 0).unwrap(), 9);
    assert_eq!(mem.get_ref(OTHER, cor, 0).unwrap(), None);
}

// =============================================================================
// TRANSACTION INTERPLAY
// =============================================================================

#[test]
fn test_only_persistent_writes_are_journaled() {
    let (mut mem, mut tx) = setup();
    let persistent = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 4)
        .unwrap();
    let transient = mem
        .allocate(&mut tx, APPLET, Lifetime::ClearOnReset, ElementKind::Byte, 4)
        .unwrap();

    tx.begin().unwrap();
    mem.write_bytes(&mut tx, APPLET, persistent, 0, &[1, 1, 1, 1]).unwrap();
    mem.write_bytes(&mut tx, APPLET, transient, 0, &[2, 2, 2, 2]).unwrap();
    assert_eq!(tx.journal().len(), 1);

    let replayed = mem.roll_back(tx.abort().unwrap());
    assert_eq!(replayed, 1);
    assert_eq!(mem.read_bytes(APPLET, persistent, 0, 4).unwrap(), vec![0; 4]);
    assert_eq!(mem.read_bytes(APPLET, transient, 0, 4).unwrap(), vec![2; 4]);
}

#[test]
fn test_abort_frees_arrays_allocated_inside() {
    let (mut mem, mut tx) = setup();
    tx.begin().unwrap();
    let scratch = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 32)
        .unwrap();
    mem.fill_bytes(&mut tx, APPLET, scratch, 0, 32, 0xFF).unwrap();
    mem.roll_back(tx.abort().unwrap());

    assert!(!mem.is_live(scratch.id()));
    assert_eq!(mem.available(Lifetime::Persistent), 256);
}

#[test]
fn test_tear_refuses_write_before_mutation() {
    let (mut mem, mut tx) = setup();
    let array = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 2)
        .unwrap();
    tx.tear_injector_mut().arm(1);
    mem.set_byte(&mut tx, APPLET, array, 0, 1).unwrap();
    let err = mem.set_byte(&mut tx, APPLET, array, 1, 1).unwrap_err();
    assert_eq!(err, MemoryError::Journal(TransactionError::Torn));
    assert_eq!(mem.read_bytes(APPLET, array, 0, 2).unwrap(), vec![1, 0]);
}

#[test]
fn test_commit_buffer_overflow_leaves_array_untouched() {
    let (mut mem, _) = setup();
    let mut tx = TransactionManager::new(4);
    let array = mem
        .allocate(&mut tx, APPLET, Lifetime::Persistent, ElementKind::Byte, 8)
        .unwrap();
    tx.begin().unwrap();
    let err = mem
        .write_bytes(&mut tx, APPLET, array, 0, &[9; 8])
        .unwrap_err();
    assert!(matches!(
        err,
        MemoryError::Journal(TransactionError::BufferFull { .. })
    ));
    assert_eq!(mem.read_bytes(APPLET, array, 0, 8).unwrap(), vec![0; 8]);
}
