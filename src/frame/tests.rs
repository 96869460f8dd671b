//! Unit tests for the frame model.

use rstest::rstest;

use super::*;

#[rstest]
#[case(0x01, Some(FrameKind::Setup))]
#[case(0x03, Some(FrameKind::Keepalive))]
#[case(0x0a, Some(FrameKind::Payload))]
#[case(0x0e, Some(FrameKind::ResumeOk))]
#[case(0x3f, Some(FrameKind::Ext))]
#[case(0x1b, None)]
#[case(0x2a, None)]
fn frame_kind_wire_codes(#[case] code: u8, #[case] expected: Option<FrameKind>) {
    assert_eq!(FrameKind::from_wire(code), expected);
}

#[rstest]
#[case(FrameKind::Payload, true)]
#[case(FrameKind::RequestStream, true)]
#[case(FrameKind::RequestN, true)]
#[case(FrameKind::Cancel, true)]
#[case(FrameKind::Error, true)]
#[case(FrameKind::Keepalive, false)]
#[case(FrameKind::Setup, false)]
#[case(FrameKind::Resume, false)]
#[case(FrameKind::ResumeOk, false)]
#[case(FrameKind::MetadataPush, false)]
fn resumable_kinds_are_the_stream_frames(#[case] kind: FrameKind, #[case] resumable: bool) {
    assert_eq!(kind.is_resumable(), resumable);
}

#[test]
fn connection_frames_address_stream_zero() {
    let keepalive = Frame::Keepalive {
        respond: true,
        last_received_position: 42,
        data: Bytes::new(),
    };
    assert_eq!(keepalive.stream_id(), 0);
    assert_eq!(keepalive.kind(), FrameKind::Keepalive);

    let payload = Frame::Payload {
        stream_id: 7,
        next: true,
        complete: false,
        payload: Payload::from("x"),
    };
    assert_eq!(payload.stream_id(), 7);
}

#[test]
fn payload_complete_carries_no_data() {
    let Frame::Payload {
        next,
        complete,
        payload,
        ..
    } = Frame::payload_complete(3)
    else {
        panic!("expected a PAYLOAD frame");
    };
    assert!(!next);
    assert!(complete);
    assert!(payload.data.is_empty());
    assert!(payload.metadata.is_none());
}

#[test]
fn flags_contain_and_union() {
    let flags = FrameFlags::NEXT | FrameFlags::COMPLETE;
    assert!(flags.contains(FrameFlags::NEXT));
    assert!(flags.contains(FrameFlags::COMPLETE));
    assert!(!flags.contains(FrameFlags::METADATA));
    assert_eq!(FrameFlags::from_bits(flags.bits()), flags);
}

#[test]
fn error_message_decodes_utf8() {
    let frame = Frame::connection_error(ErrorCode::ConnectionError, "boom");
    assert_eq!(frame.error_message().as_deref(), Some("boom"));
    assert_eq!(frame.stream_id(), 0);
}
