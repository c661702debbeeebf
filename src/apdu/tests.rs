//! APDU exchange phase tests.

use super::*;

fn exchange(raw: &[u8]) -> Apdu {
    let command = CommandApdu::parse(raw, true).unwrap();
    Apdu::new(command, DEFAULT_BUFFER_SIZE, false)
}

fn with_data(len: usize) -> Apdu {
    let mut raw = vec![0x80, 0x02, 0x00, 0x00, len as u8];
    raw.extend((0..len).map(|i| i as u8));
    exchange(&raw)
}

#[test]
fn test_header_is_buffered_up_front() {
    let apdu = with_data(3);
    assert_eq!(&apdu.buffer()[..5], &[0x80, 0x02, 0x00, 0x00, 0x03]);
    assert_eq!(apdu.state(), ApduState::Initial);
    assert_eq!(apdu.incoming_length(), 3);
    // Data is not visible until received.
    assert_eq!(&apdu.buffer()[5..8], &[0, 0, 0]);
}

#[test]
fn test_receive_moves_data_and_completes() {
    let mut apdu = with_data(3);
    assert_eq!(apdu.set_incoming_and_receive().unwrap(), 3);
    assert_eq!(apdu.state(), ApduState::FullIncoming);
    assert_eq!(&apdu.buffer()[5..8], &[0, 1, 2]);
}

#[test]
fn test_receive_without_data_completes_immediately() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    assert_eq!(apdu.set_incoming_and_receive().unwrap(), 0);
    assert_eq!(apdu.state(), ApduState::FullIncoming);
}

/// A second `set_incoming_and_receive` fails from every phase it can be
/// reached in, and the buffer is byte-for-byte unchanged afterwards.
#[test]
fn test_repeated_receive_is_rejected_in_every_phase() {
    let phases: Vec<(ApduState, Box<dyn Fn(&mut Apdu)>)> = vec![
        (
            ApduState::FullIncoming,
            Box::new(|a: &mut Apdu| {
                a.set_incoming_and_receive().unwrap();
            }),
        ),
        (
            ApduState::Outgoing,
            Box::new(|a: &mut Apdu| {
                a.set_incoming_and_receive().unwrap();
                a.set_outgoing().unwrap();
            }),
        ),
        (
            ApduState::OutgoingLengthKnown,
            Box::new(|a: &mut Apdu| {
                a.set_incoming_and_receive().unwrap();
                a.set_outgoing().unwrap();
                a.set_outgoing_length(4).unwrap();
            }),
        ),
        (
            ApduState::PartialOutgoing,
            Box::new(|a: &mut Apdu| {
                a.set_incoming_and_receive().unwrap();
                a.set_outgoing().unwrap();
                a.set_outgoing_length(4).unwrap();
                a.send_bytes(5, 2).unwrap();
            }),
        ),
        (
            ApduState::FullOutgoing,
            Box::new(|a: &mut Apdu| {
                a.set_incoming_and_receive().unwrap();
                a.set_outgoing_and_send(5, 4).unwrap();
            }),
        ),
    ];

    for (expected, drive) in phases {
        let mut apdu = with_data(4);
        drive(&mut apdu);
        assert_eq!(apdu.state(), expected);
        let before = apdu.buffer().to_vec();

        let err = apdu.set_incoming_and_receive().unwrap_err();
        assert!(
            matches!(err, ApduError::IllegalUse { state, .. } if state == expected),
            "unexpected error {:?} in {:?}",
            err,
            expected
        );
        assert_eq!(apdu.state(), expected);
        assert_eq!(apdu.buffer(), &before[..]);
    }
}

#[test]
fn test_partial_receive_with_small_buffer() {
    let mut raw = vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00];
    raw.extend((0..256u16).map(|i| i as u8));
    let command = CommandApdu::parse(&raw, true).unwrap();
    let mut apdu = Apdu::new(command, MIN_BUFFER_SIZE, false);

    let first = apdu.set_incoming_and_receive().unwrap();
    assert_eq!(first, MIN_BUFFER_SIZE - 7);
    assert_eq!(apdu.state(), ApduState::PartialIncoming);

    let mut total = first;
    let mut collected = apdu.buffer()[7..7 + first].to_vec();
    while apdu.state() == ApduState::PartialIncoming {
        let n = apdu.receive_bytes(0).unwrap();
        collected.extend_from_slice(&apdu.buffer()[..n]);
        total += n;
    }
    assert_eq!(total, 256);
    assert_eq!(apdu.state(), ApduState::FullIncoming);
    let expected: Vec<u8> = (0..256u16).map(|i| i as u8).collect();
    assert_eq!(collected, expected);

    assert!(matches!(
        apdu.receive_bytes(0),
        Err(ApduError::IllegalUse { .. })
    ));
}

#[test]
fn test_outgoing_refused_while_data_pending() {
    let mut apdu = with_data(2);
    assert!(matches!(apdu.set_outgoing(), Err(ApduError::IllegalUse { .. })));
    assert_eq!(apdu.state(), ApduState::Initial);
}

#[test]
fn test_outgoing_from_initial_without_data() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00, 0x20]);
    assert_eq!(apdu.set_outgoing().unwrap(), 0x20);
    assert_eq!(apdu.state(), ApduState::Outgoing);
}

#[test]
fn test_send_requires_announced_length() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.set_outgoing().unwrap();
    assert!(matches!(apdu.send_bytes(0, 1), Err(ApduError::IllegalUse { .. })));
}

#[test]
fn test_chunked_send() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.buffer_mut()[..6].copy_from_slice(b"abcdef");
    apdu.set_outgoing().unwrap();
    apdu.set_outgoing_length(6).unwrap();
    apdu.send_bytes(0, 2).unwrap();
    assert_eq!(apdu.state(), ApduState::PartialOutgoing);
    apdu.send_bytes(2, 4).unwrap();
    assert_eq!(apdu.state(), ApduState::FullOutgoing);
    assert_eq!(apdu.into_response().unwrap(), b"abcdef".to_vec());
}

#[test]
fn test_overrun_is_rejected() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.set_outgoing().unwrap();
    apdu.set_outgoing_length(2).unwrap();
    assert!(matches!(apdu.send_bytes(0, 3), Err(ApduError::Overrun { .. })));
    assert_eq!(apdu.state(), ApduState::OutgoingLengthKnown);
}

#[test]
fn test_short_response_is_incomplete() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.set_outgoing().unwrap();
    apdu.set_outgoing_length(10).unwrap();
    apdu.send_bytes(0, 4).unwrap();
    assert_eq!(
        apdu.into_response(),
        Err(ApduError::Incomplete {
            announced: 10,
            sent: 4
        })
    );

    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.set_outgoing().unwrap();
    apdu.set_outgoing_length(3).unwrap();
    assert_eq!(
        apdu.into_response(),
        Err(ApduError::Incomplete {
            announced: 3,
            sent: 0
        })
    );

    // Nothing announced means nothing owed.
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.set_outgoing().unwrap();
    assert_eq!(apdu.into_response(), Ok(Vec::new()));
}

#[test]
fn test_bad_length() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.set_outgoing().unwrap();
    assert_eq!(
        apdu.set_outgoing_length(257),
        Err(ApduError::BadLength {
            requested: 257,
            max: MAX_SHORT_OUTGOING
        })
    );
}

#[test]
fn test_no_chaining_caps_at_ne() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00, 0x04]);
    apdu.set_outgoing_no_chaining().unwrap();
    assert!(apdu.is_no_chaining());
    assert!(matches!(apdu.set_outgoing_length(5), Err(ApduError::BadLength { .. })));
    apdu.set_outgoing_length(4).unwrap();
}

#[test]
fn test_send_bytes_long_from_external_source() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    let source = [9u8; 300];
    apdu.set_outgoing().unwrap();
    apdu.set_outgoing_length(256).unwrap();
    apdu.send_bytes_long(&source, 0, 200).unwrap();
    assert_eq!(apdu.state(), ApduState::PartialOutgoing);
    // Past the end of the source: refused, nothing sent.
    assert!(matches!(
        apdu.send_bytes_long(&source, 290, 20),
        Err(ApduError::BufferBounds { .. })
    ));
    assert_eq!(apdu.state(), ApduState::PartialOutgoing);
    apdu.send_bytes_long(&source, 200, 56).unwrap();
    assert_eq!(apdu.state(), ApduState::FullOutgoing);
    // Phase is checked before bounds once the response is complete.
    assert!(matches!(
        apdu.send_bytes_long(&source, 290, 20),
        Err(ApduError::IllegalUse { .. })
    ));
    assert_eq!(apdu.into_response().unwrap().len(), 256);
}

#[test]
fn test_exchange_is_single_use() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    apdu.set_outgoing_and_send(0, 1).unwrap();
    assert_eq!(apdu.state(), ApduState::FullOutgoing);
    assert!(apdu.set_outgoing().is_err());
    assert!(apdu.set_outgoing_length(1).is_err());
    assert!(apdu.send_bytes(0, 1).is_err());
    assert!(apdu.set_incoming_and_receive().is_err());
    assert!(apdu.receive_bytes(0).is_err());
}

#[test]
fn test_set_outgoing_and_send_checks_bounds_first() {
    let mut apdu = exchange(&[0x00, 0x01, 0x00, 0x00]);
    assert!(matches!(
        apdu.set_outgoing_and_send(DEFAULT_BUFFER_SIZE - 1, 2),
        Err(ApduError::BufferBounds { .. })
    ));
    assert_eq!(apdu.state(), ApduState::Initial);
}
