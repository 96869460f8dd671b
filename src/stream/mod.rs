//! Per-stream state machines.
//!
//! Each live stream id owns one [`StreamAutomaton`]: a small automaton driven
//! from two sides: frames from the peer and signals from the local
//! producer/consumer. Four flavors cover the interaction models
//! (requester/responder × stream-like/response-like); channels are the
//! stream-like flavors with both halves active.
//!
//! Automatons never talk to the connection directly: frame writes go through
//! the connection's outbound path handed into each call, and a returned
//! [`StreamSignal`] tells the connection the stream reached its terminal and
//! must be unregistered.

mod bridge;
mod halves;
mod requester;
mod responder;

pub use bridge::{PayloadStream, StreamEvent, channel_subscriber};
pub(crate) use requester::{ResponseRequester, StreamRequester};
pub(crate) use responder::{ResponseResponder, StreamResponder};

use crate::{
    connection::{Outbound, Subscription},
    error::Error,
    frame::{Payload, StreamId},
};

#[cfg(test)]
mod tests;

/// Credits saturate at 2^31 − 1; anything past that is "effectively
/// unbounded" per the protocol.
pub const MAX_CREDITS: u32 = 0x7fff_ffff;

/// Local consumer of a stream's payloads.
///
/// Methods run on the connection actor and must not block. Exactly one
/// terminal (`on_complete`, `on_error`, or a cancellation the consumer itself
/// requested) is delivered per stream.
pub trait Subscriber: Send + 'static {
    /// Called once when the stream is wired up. The subscription requests
    /// more items and cancels; dropping it does nothing.
    fn on_subscribe(&mut self, subscription: Subscription) { let _ = subscription; }

    /// One payload, delivered at most as many times as credits were granted.
    fn on_next(&mut self, payload: Payload);

    /// The peer finished this direction normally.
    fn on_complete(&mut self);

    /// The stream failed; no further signals follow.
    fn on_error(&mut self, error: Error);
}

/// Terminal signal ending a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSignal {
    /// Both directions finished normally.
    Complete,
    /// Locally cancelled; the peer sees CANCEL.
    Cancel,
    /// The application on either side failed the stream.
    ApplicationError,
    /// Stream-level protocol error.
    Error,
    /// The connection ended cleanly underneath the stream.
    ConnectionEnd,
    /// The connection failed underneath the stream.
    ConnectionError,
    /// The transport vanished underneath the stream.
    SocketClosed,
}

impl StreamSignal {
    /// Connection-wide signals reach streams only through connection
    /// teardown and never produce stream frames.
    #[must_use]
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            Self::ConnectionEnd | Self::ConnectionError | Self::SocketClosed
        )
    }

    /// The error a subscriber receives when a stream ends with this signal
    /// before its own terminal arrived.
    pub(crate) fn to_error(self) -> Option<Error> {
        match self {
            Self::Complete | Self::Cancel => None,
            Self::ApplicationError => Some(Error::StreamApplication(
                "stream closed with application error".into(),
            )),
            Self::Error => Some(Error::UnexpectedFrame(
                "stream closed after protocol error".into(),
            )),
            Self::ConnectionEnd | Self::SocketClosed => Some(Error::TransportClosed),
            Self::ConnectionError => Some(Error::Connection("connection failed".into())),
        }
    }
}

/// One live stream's automaton, dispatched by flavor.
pub(crate) enum StreamAutomaton {
    StreamRequester(StreamRequester),
    ResponseRequester(ResponseRequester),
    StreamResponder(StreamResponder),
    ResponseResponder(ResponseResponder),
}

impl StreamAutomaton {
    /// Flavor name for logs.
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::StreamRequester(requester) if requester.is_channel() => "channel requester",
            Self::StreamRequester(_) => "stream requester",
            Self::ResponseRequester(_) => "response requester",
            Self::StreamResponder(responder) if responder.is_channel() => "channel responder",
            Self::StreamResponder(_) => "stream responder",
            Self::ResponseResponder(_) => "response responder",
        }
    }

    /// REQUEST_N from the peer.
    pub(crate) fn handle_request_n(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        n: u32,
    ) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.handle_request_n(out, id, n),
            Self::StreamResponder(responder) => responder.handle_request_n(out, id, n),
            Self::ResponseRequester(_) | Self::ResponseResponder(_) => {
                log::warn!("ignoring REQUEST_N for {} on stream {id}", self.describe());
                None
            }
        }
    }

    /// CANCEL from the peer.
    pub(crate) fn handle_cancel(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.handle_cancel(id),
            Self::StreamResponder(responder) => responder.handle_cancel(id),
            Self::ResponseResponder(responder) => responder.handle_cancel(id),
            Self::ResponseRequester(_) => {
                let _ = out;
                log::warn!("ignoring CANCEL for response requester on stream {id}");
                None
            }
        }
    }

    /// PAYLOAD from the peer.
    pub(crate) fn handle_payload(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => {
                requester.handle_payload(out, id, payload, next, complete)
            }
            Self::ResponseRequester(requester) => {
                requester.handle_payload(out, id, payload, next, complete)
            }
            Self::StreamResponder(responder) => {
                responder.handle_payload(out, id, payload, next, complete)
            }
            Self::ResponseResponder(_) => {
                out.write_close_stream(
                    id,
                    StreamSignal::Error,
                    "unexpected PAYLOAD for response responder",
                );
                Some(StreamSignal::Error)
            }
        }
    }

    /// ERROR from the peer; terminates the whole stream.
    pub(crate) fn handle_error(&mut self, error: Error) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.handle_error(error),
            Self::ResponseRequester(requester) => requester.handle_error(error),
            Self::StreamResponder(responder) => responder.handle_error(error),
            Self::ResponseResponder(_) => Some(StreamSignal::Error),
        }
    }

    /// Local `request(n)`; `n` is validated positive by the caller.
    pub(crate) fn local_request(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        n: u32,
    ) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.local_request(out, id, n),
            Self::StreamResponder(responder) => responder.local_request(out, id, n),
            Self::ResponseRequester(_) | Self::ResponseResponder(_) => None,
        }
    }

    /// Local cancel. Only the first call writes CANCEL.
    pub(crate) fn local_cancel(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.local_cancel(out, id),
            Self::ResponseRequester(requester) => requester.local_cancel(out, id),
            Self::StreamResponder(responder) => {
                // A responder cancelling tells the requester to stop its
                // half of the channel.
                out.write_close_stream(id, StreamSignal::Cancel, "");
                responder.handle_cancel(id)
            }
            Self::ResponseResponder(responder) => responder.handle_cancel(id),
        }
    }

    /// Local producer emits one payload.
    pub(crate) fn local_next(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        payload: Payload,
    ) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.local_next(out, id, payload),
            Self::StreamResponder(responder) => responder.local_next(out, id, payload),
            Self::ResponseResponder(responder) => responder.local_next(out, id, payload),
            Self::ResponseRequester(_) => None,
        }
    }

    /// Local producer completes.
    pub(crate) fn local_complete(&mut self, out: &mut Outbound, id: StreamId) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.local_complete(out, id),
            Self::StreamResponder(responder) => responder.local_complete(out, id),
            Self::ResponseResponder(responder) => responder.local_complete(out, id),
            Self::ResponseRequester(_) => None,
        }
    }

    /// Local producer fails the stream.
    pub(crate) fn local_error(
        &mut self,
        out: &mut Outbound,
        id: StreamId,
        message: String,
    ) -> Option<StreamSignal> {
        match self {
            Self::StreamRequester(requester) => requester.local_error(out, id, message),
            Self::StreamResponder(responder) => responder.local_error(out, id, message),
            Self::ResponseResponder(responder) => responder.local_error(out, id, message),
            Self::ResponseRequester(_) => None,
        }
    }

    /// Deliver the terminal, exactly once, without writing frames. Called by
    /// the connection's end-stream protocol after the entry is removed.
    pub(crate) fn end_stream(&mut self, signal: StreamSignal) {
        match self {
            Self::StreamRequester(requester) => requester.end(signal),
            Self::ResponseRequester(requester) => requester.end(signal),
            Self::StreamResponder(responder) => responder.end(signal),
            Self::ResponseResponder(_) => {}
        }
    }
}
