//! Requester-side automatons: this side originated the request.

use log::warn;

use crate::{
    connection::Outbound,
    error::Error,
    frame::{Payload, StreamId},
};

use super::{
    StreamSignal, Subscriber,
    halves::{Consumer, Publisher},
};

/// Requester of a stream or channel: consumes peer payloads; for channels
/// also publishes local ones against peer credits.
pub(crate) struct StreamRequester {
    consumer: Consumer,
    publisher: Option<Publisher>,
    remote_done: bool,
    local_done: bool,
}

impl StreamRequester {
    /// REQUEST_STREAM requester. `initial_n` was carried on the request
    /// frame and seeds the allowance.
    pub(crate) fn stream(subscriber: Box<dyn Subscriber>, initial_n: u32) -> Self {
        Self {
            consumer: Consumer::new(subscriber, initial_n),
            publisher: None,
            remote_done: false,
            local_done: true,
        }
    }

    /// REQUEST_CHANNEL requester. The publishing half starts with no
    /// credits; the peer grants them with REQUEST_N.
    pub(crate) fn channel(subscriber: Box<dyn Subscriber>, initial_n: u32) -> Self {
        Self {
            consumer: Consumer::new(subscriber, initial_n),
            publisher: Some(Publisher::new(0)),
            remote_done: false,
            local_done: false,
        }
    }

    pub(crate) fn is_channel(&self) -> bool { self.publisher.is_some() }

    fn both_done(&self) -> Option<StreamSignal> {
        (self.remote_done && self.local_done).then_some(StreamSignal::Complete)
    }

    pub(crate) fn handle_payload(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Option<StreamSignal> {
        if next {
            if !self.consumer.try_consume() {
                return Some(self.protocol_error(out, id, "payload exceeds requested credit"));
            }
            self.consumer.next(payload);
        } else if !complete {
            return Some(self.protocol_error(out, id, "payload frame without NEXT or COMPLETE"));
        }
        if complete {
            self.remote_done = true;
            self.consumer.complete();
        }
        self.both_done()
    }

    pub(crate) fn handle_request_n(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        n: u32,
    ) -> Option<StreamSignal> {
        let Some(publisher) = &mut self.publisher else {
            warn!("ignoring REQUEST_N for stream requester on stream {id}");
            return None;
        };
        if n == 0 {
            return Some(self.protocol_error(out, id, "REQUEST_N with zero credits"));
        }
        publisher.credit(n);
        publisher.drain(out, id);
        if publisher.is_finished() {
            self.local_done = true;
        }
        self.both_done()
    }

    /// CANCEL from the responder ends our publishing half only.
    pub(crate) fn handle_cancel(&mut self, id: StreamId) -> Option<StreamSignal> {
        match &mut self.publisher {
            Some(publisher) => {
                publisher.abort();
                self.local_done = true;
                if self.remote_done {
                    Some(StreamSignal::Cancel)
                } else {
                    None
                }
            }
            None => {
                warn!("ignoring CANCEL for stream requester on stream {id}");
                None
            }
        }
    }

    pub(crate) fn handle_error(&mut self, error: Error) -> Option<StreamSignal> {
        if let Some(publisher) = &mut self.publisher {
            publisher.abort();
        }
        self.consumer.error(error);
        Some(StreamSignal::Error)
    }

    pub(crate) fn local_request(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        n: u32,
    ) -> Option<StreamSignal> {
        if !self.remote_done {
            self.consumer.grant(n);
            out.write_request_n(id, n);
        }
        None
    }

    pub(crate) fn local_cancel(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        out.write_close_stream(id, StreamSignal::Cancel, "");
        if let Some(publisher) = &mut self.publisher {
            publisher.abort();
        }
        self.consumer.cancel();
        Some(StreamSignal::Cancel)
    }

    pub(crate) fn local_next(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
    ) -> Option<StreamSignal> {
        if let Some(publisher) = &mut self.publisher {
            publisher.queue_next(payload);
            publisher.drain(out, id);
            if publisher.is_finished() {
                self.local_done = true;
            }
        }
        self.both_done()
    }

    pub(crate) fn local_complete(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        if let Some(publisher) = &mut self.publisher {
            publisher.queue_complete();
            publisher.drain(out, id);
            if publisher.is_finished() {
                self.local_done = true;
            }
        }
        self.both_done()
    }

    pub(crate) fn local_error(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        message: String,
    ) -> Option<StreamSignal> {
        out.write_close_stream(id, StreamSignal::ApplicationError, &message);
        if let Some(publisher) = &mut self.publisher {
            publisher.abort();
        }
        self.consumer.error(Error::StreamApplication(message));
        Some(StreamSignal::ApplicationError)
    }

    pub(crate) fn end(&mut self, signal: StreamSignal) {
        if let Some(publisher) = &mut self.publisher {
            publisher.abort();
        }
        self.consumer.finish(signal);
    }

    fn protocol_error(&mut self, out: &mut Outbound, id: StreamId, message: &str) -> StreamSignal {
        out.write_close_stream(id, StreamSignal::Error, message);
        if let Some(publisher) = &mut self.publisher {
            publisher.abort();
        }
        self.consumer.error(Error::UnexpectedFrame(message.into()));
        StreamSignal::Error
    }
}

/// Requester of a single response: at most one NEXT, then completion.
pub(crate) struct ResponseRequester {
    consumer: Consumer,
    received_next: bool,
}

impl ResponseRequester {
    pub(crate) fn new(subscriber: Box<dyn Subscriber>) -> Self {
        Self {
            consumer: Consumer::new(subscriber, 1),
            received_next: false,
        }
    }

    pub(crate) fn handle_payload(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Option<StreamSignal> {
        if next {
            if self.received_next {
                return Some(self.protocol_error(out, id, "second payload for request-response"));
            }
            self.received_next = true;
            self.consumer.next(payload);
        } else if !complete {
            return Some(self.protocol_error(out, id, "payload frame without NEXT or COMPLETE"));
        }
        if complete {
            self.consumer.complete();
            return Some(StreamSignal::Complete);
        }
        None
    }

    pub(crate) fn handle_error(&mut self, error: Error) -> Option<StreamSignal> {
        self.consumer.error(error);
        Some(StreamSignal::Error)
    }

    pub(crate) fn local_cancel(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        out.write_close_stream(id, StreamSignal::Cancel, "");
        self.consumer.cancel();
        Some(StreamSignal::Cancel)
    }

    pub(crate) fn end(&mut self, signal: StreamSignal) { self.consumer.finish(signal); }

    fn protocol_error(&mut self, out: &mut Outbound, id: StreamId, message: &str) -> StreamSignal {
        out.write_close_stream(id, StreamSignal::Error, message);
        self.consumer.error(Error::UnexpectedFrame(message.into()));
        StreamSignal::Error
    }
}
