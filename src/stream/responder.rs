//! Responder-side automatons: the peer originated the request.

use crate::{
    connection::Outbound,
    error::Error,
    frame::{Payload, StreamId},
};

use super::{
    StreamSignal, Subscriber,
    halves::{Consumer, Publisher},
};

/// Responder for a stream or channel: publishes against requester credits;
/// for channels also consumes the requester's payloads.
pub(crate) struct StreamResponder {
    publisher: Publisher,
    consumer: Option<Consumer>,
    remote_done: bool,
    local_done: bool,
}

impl StreamResponder {
    /// REQUEST_STREAM responder, credited with the frame's `initial_n`.
    pub(crate) fn stream(initial_n: u32) -> Self {
        Self {
            publisher: Publisher::new(initial_n),
            consumer: None,
            remote_done: true,
            local_done: false,
        }
    }

    /// REQUEST_CHANNEL responder. `subscriber` consumes the requester's
    /// payloads; without one, no credits are ever granted and the requester
    /// must stay silent. `requester_complete` reflects the COMPLETE bit on
    /// the request frame.
    pub(crate) fn channel(
        initial_n: u32,
        subscriber: Option<Box<dyn Subscriber>>,
        requester_complete: bool,
    ) -> Self {
        Self {
            publisher: Publisher::new(initial_n),
            consumer: subscriber.map(|subscriber| Consumer::new(subscriber, 0)),
            remote_done: requester_complete,
            local_done: false,
        }
    }

    pub(crate) fn is_channel(&self) -> bool { self.consumer.is_some() || !self.remote_done }

    fn both_done(&self) -> Option<StreamSignal> {
        (self.remote_done && self.local_done).then_some(StreamSignal::Complete)
    }

    fn after_drain(&mut self) -> Option<StreamSignal> {
        if self.publisher.is_finished() {
            self.local_done = true;
        }
        self.both_done()
    }

    pub(crate) fn handle_request_n(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        n: u32,
    ) -> Option<StreamSignal> {
        if n == 0 {
            return Some(self.protocol_error(out, id, "REQUEST_N with zero credits"));
        }
        self.publisher.credit(n);
        self.publisher.drain(out, id);
        self.after_drain()
    }

    /// CANCEL from the requester: stop producing, no frame in reply.
    pub(crate) fn handle_cancel(&mut self, _id: StreamId) -> Option<StreamSignal> {
        self.publisher.abort();
        if let Some(consumer) = &mut self.consumer {
            consumer.cancel();
        }
        Some(StreamSignal::Cancel)
    }

    pub(crate) fn handle_payload(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Option<StreamSignal> {
        let Some(consumer) = &mut self.consumer else {
            return Some(self.protocol_error(out, id, "unexpected PAYLOAD for stream responder"));
        };
        if next {
            if !consumer.try_consume() {
                return Some(self.protocol_error(out, id, "payload exceeds requested credit"));
            }
            consumer.next(payload);
        } else if !complete {
            return Some(self.protocol_error(out, id, "payload frame without NEXT or COMPLETE"));
        }
        if complete {
            self.remote_done = true;
            if let Some(consumer) = &mut self.consumer {
                consumer.complete();
            }
        }
        self.both_done()
    }

    pub(crate) fn handle_error(&mut self, error: Error) -> Option<StreamSignal> {
        self.publisher.abort();
        if let Some(consumer) = &mut self.consumer {
            consumer.error(error);
        }
        Some(StreamSignal::Error)
    }

    /// Channel responder requesting more payloads from the requester.
    pub(crate) fn local_request(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        n: u32,
    ) -> Option<StreamSignal> {
        if let Some(consumer) = &mut self.consumer
            && !self.remote_done
        {
            consumer.grant(n);
            out.write_request_n(id, n);
        }
        None
    }

    pub(crate) fn local_next(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
    ) -> Option<StreamSignal> {
        self.publisher.queue_next(payload);
        self.publisher.drain(out, id);
        self.after_drain()
    }

    pub(crate) fn local_complete(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        self.publisher.queue_complete();
        self.publisher.drain(out, id);
        self.after_drain()
    }

    pub(crate) fn local_error(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        message: String,
    ) -> Option<StreamSignal> {
        out.write_close_stream(id, StreamSignal::ApplicationError, &message);
        self.publisher.abort();
        if let Some(consumer) = &mut self.consumer {
            consumer.error(Error::StreamApplication(message));
        }
        Some(StreamSignal::ApplicationError)
    }

    pub(crate) fn end(&mut self, signal: StreamSignal) {
        self.publisher.abort();
        if let Some(consumer) = &mut self.consumer {
            consumer.finish(signal);
        }
    }

    fn protocol_error(&mut self, out: &mut Outbound, id: StreamId, message: &str) -> StreamSignal {
        out.write_close_stream(id, StreamSignal::Error, message);
        self.publisher.abort();
        if let Some(consumer) = &mut self.consumer {
            consumer.error(Error::UnexpectedFrame(message.into()));
        }
        StreamSignal::Error
    }
}

/// Responder for request-response: exactly one payload or an error.
pub(crate) struct ResponseResponder {
    responded: bool,
}

impl ResponseResponder {
    pub(crate) fn new() -> Self { Self { responded: false } }

    /// The single response rides one PAYLOAD with NEXT and COMPLETE set.
    pub(crate) fn local_next(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
    ) -> Option<StreamSignal> {
        if self.responded {
            log::warn!("dropping extra response payload for stream {id}");
            return None;
        }
        self.responded = true;
        out.write_payload(id, payload, true);
        Some(StreamSignal::Complete)
    }

    /// Completion without a value: a bare PAYLOAD (COMPLETE).
    pub(crate) fn local_complete(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        if self.responded {
            return None;
        }
        self.responded = true;
        out.write_close_stream(id, StreamSignal::Complete, "");
        Some(StreamSignal::Complete)
    }

    pub(crate) fn local_error(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        message: String,
    ) -> Option<StreamSignal> {
        if self.responded {
            return None;
        }
        self.responded = true;
        out.write_close_stream(id, StreamSignal::ApplicationError, &message);
        Some(StreamSignal::ApplicationError)
    }

    pub(crate) fn handle_cancel(&mut self, _id: StreamId) -> Option<StreamSignal> {
        self.responded = true;
        Some(StreamSignal::Cancel)
    }
}
