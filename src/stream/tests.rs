//! Unit tests for the stream automatons.
//!
//! Frames written by the automatons are captured in an unbound `Outbound`'s
//! pending queue and decoded for inspection; no transport is involved.

use std::sync::{Arc, Mutex};

use crate::{
    connection::Outbound,
    error::Error,
    frame::{Frame, Payload},
    serializer::SerializerV1,
};

use super::*;
use super::{halves::Publisher, requester::StreamRequester, responder::StreamResponder};

#[derive(Clone, Default)]
struct Record(Arc<Mutex<Vec<String>>>);

impl Record {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("record lock").push(entry.into());
    }

    fn entries(&self) -> Vec<String> { self.0.lock().expect("record lock").clone() }
}

struct RecordingSubscriber {
    log: Record,
}

impl Subscriber for RecordingSubscriber {
    fn on_next(&mut self, payload: Payload) {
        self.log.push(format!("next:{}", payload.data_utf8()));
    }

    fn on_complete(&mut self) { self.log.push("complete"); }

    fn on_error(&mut self, error: Error) { self.log.push(format!("error:{error}")); }
}

fn recording() -> (Box<dyn Subscriber>, Record) {
    let log = Record::default();
    (
        Box::new(RecordingSubscriber { log: log.clone() }),
        log,
    )
}

/// An outbound path with a serializer and no transport: every write lands in
/// the pending queue for inspection.
fn capture_out() -> Outbound {
    let mut out = Outbound::new(false, 1024);
    out.set_serializer(Box::new(SerializerV1));
    out
}

fn payload_frames(out: &Outbound) -> Vec<(bool, bool, String)> {
    out.pending_frames()
        .into_iter()
        .filter_map(|frame| match frame {
            Frame::Payload {
                next,
                complete,
                payload,
                ..
            } => Some((next, complete, payload.data_utf8())),
            _ => None,
        })
        .collect()
}

#[test]
fn responder_stream_respects_credits() {
    let mut out = capture_out();
    let mut responder = StreamResponder::stream(3);

    for i in 1..=10 {
        assert_eq!(responder.local_next(&mut out, 2, Payload::from(format!("item {i}").as_str())), None);
    }
    assert_eq!(responder.local_complete(&mut out, 2), None);
    // Only the initially credited three payloads may go out.
    assert_eq!(out.pending_len(), 3);

    let signal = responder.handle_request_n(&mut out, 2, 7);
    assert_eq!(signal, Some(StreamSignal::Complete));

    let frames = payload_frames(&out);
    assert_eq!(frames.len(), 10);
    assert_eq!(frames[0], (true, false, "item 1".into()));
    // Completion rides the final payload.
    assert_eq!(frames[9], (true, true, "item 10".into()));
}

#[test]
fn responder_rejects_zero_request_n() {
    let mut out = capture_out();
    let mut responder = StreamResponder::stream(1);
    let signal = responder.handle_request_n(&mut out, 2, 0);
    assert_eq!(signal, Some(StreamSignal::Error));
    let Frame::Error { .. } = &out.pending_frames()[0] else {
        panic!("expected an ERROR frame");
    };
}

#[test]
fn requester_stream_delivers_within_allowance() {
    let mut out = capture_out();
    let (subscriber, log) = recording();
    let mut requester = StreamRequester::stream(subscriber, 2);

    assert_eq!(
        requester.handle_payload(&mut out, 1, Payload::from("a"), true, false),
        None
    );
    assert_eq!(
        requester.handle_payload(&mut out, 1, Payload::from("b"), true, true),
        Some(StreamSignal::Complete)
    );
    assert_eq!(log.entries(), vec!["next:a", "next:b", "complete"]);
}

#[test]
fn requester_stream_errors_on_allowance_overrun() {
    let mut out = capture_out();
    let (subscriber, log) = recording();
    let mut requester = StreamRequester::stream(subscriber, 1);

    requester.handle_payload(&mut out, 1, Payload::from("a"), true, false);
    let signal = requester.handle_payload(&mut out, 1, Payload::from("b"), true, false);
    assert_eq!(signal, Some(StreamSignal::Error));
    assert!(log.entries()[1].starts_with("error:"));
    let Frame::Error { .. } = &out.pending_frames()[0] else {
        panic!("expected an ERROR frame on the wire");
    };
}

#[test]
fn payload_without_next_or_complete_is_a_violation() {
    let mut out = capture_out();
    let (subscriber, _log) = recording();
    let mut requester = StreamRequester::stream(subscriber, 1);
    let signal = requester.handle_payload(&mut out, 1, Payload::empty(), false, false);
    assert_eq!(signal, Some(StreamSignal::Error));
}

#[test]
fn local_request_emits_request_n_and_grants_allowance() {
    let mut out = capture_out();
    let (subscriber, log) = recording();
    let mut requester = StreamRequester::stream(subscriber, 1);

    requester.handle_payload(&mut out, 1, Payload::from("a"), true, false);
    requester.local_request(&mut out, 1, 5);
    let Frame::RequestN { n, stream_id } = out.pending_frames()[0] else {
        panic!("expected a REQUEST_N frame");
    };
    assert_eq!((stream_id, n), (1, 5));

    requester.handle_payload(&mut out, 1, Payload::from("b"), true, false);
    assert_eq!(log.entries(), vec!["next:a", "next:b"]);
}

#[test]
fn channel_stays_half_closed_until_both_directions_finish() {
    let mut out = capture_out();
    let (subscriber, log) = recording();
    let mut requester = StreamRequester::channel(subscriber, 1);

    // Peer finishes its direction; our publisher is still open.
    assert_eq!(
        requester.handle_payload(&mut out, 1, Payload::empty(), false, true),
        None
    );
    assert_eq!(log.entries(), vec!["complete"]);

    // Peer credits our publisher, we complete: now the stream ends.
    requester.local_next(&mut out, 1, Payload::from("up"));
    assert_eq!(requester.handle_request_n(&mut out, 1, 1), None);
    assert_eq!(requester.local_complete(&mut out, 1), Some(StreamSignal::Complete));
}

#[test]
fn requester_cancel_writes_cancel_and_silences_subscriber() {
    let mut out = capture_out();
    let (subscriber, log) = recording();
    let mut requester = StreamRequester::stream(subscriber, 1);

    assert_eq!(requester.local_cancel(&mut out, 1), Some(StreamSignal::Cancel));
    let Frame::Cancel { stream_id } = out.pending_frames()[0] else {
        panic!("expected a CANCEL frame");
    };
    assert_eq!(stream_id, 1);

    // A late terminal does not reach the cancelled subscriber.
    requester.end(StreamSignal::ConnectionEnd);
    assert!(log.entries().is_empty());
}

#[test]
fn response_requester_accepts_single_payload_only() {
    let mut out = capture_out();
    let (subscriber, log) = recording();
    let mut requester = ResponseRequester::new(subscriber);

    assert_eq!(
        requester.handle_payload(&mut out, 1, Payload::from("pong"), true, true),
        Some(StreamSignal::Complete)
    );
    assert_eq!(log.entries(), vec!["next:pong", "complete"]);
}

#[test]
fn response_requester_rejects_second_payload() {
    let mut out = capture_out();
    let (subscriber, _log) = recording();
    let mut requester = ResponseRequester::new(subscriber);

    requester.handle_payload(&mut out, 1, Payload::from("one"), true, false);
    let signal = requester.handle_payload(&mut out, 1, Payload::from("two"), true, false);
    assert_eq!(signal, Some(StreamSignal::Error));
}

#[test]
fn response_responder_merges_next_and_complete() {
    let mut out = capture_out();
    let mut responder = ResponseResponder::new();
    let signal = responder.local_next(&mut out, 2, Payload::from("pong"));
    assert_eq!(signal, Some(StreamSignal::Complete));
    assert_eq!(payload_frames(&out), vec![(true, true, "pong".into())]);
}

#[test]
fn end_stream_delivers_exactly_one_terminal() {
    let (subscriber, log) = recording();
    let mut requester = StreamRequester::stream(subscriber, 1);

    requester.handle_error(Error::StreamApplication("boom".into()));
    requester.end(StreamSignal::ConnectionError);
    requester.end(StreamSignal::Complete);
    assert_eq!(log.entries().len(), 1);
    assert!(log.entries()[0].starts_with("error:"));
}

#[test]
fn publisher_credits_saturate() {
    let mut publisher = Publisher::new(MAX_CREDITS - 1);
    publisher.credit(100);
    assert_eq!(publisher.credits(), MAX_CREDITS);
    assert_eq!(publisher.pending_len(), 0);
}
