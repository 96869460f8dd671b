//! The application's responder seam.

use bytes::Bytes;

use crate::{frame::Payload, stream::Subscriber};

use super::handle::ProducerHandle;

/// Handles requests the peer initiates on this connection.
///
/// Methods run on the connection actor and must not block; long-running work
/// belongs in a task fed through the producer handle. The defaults reject
/// every interaction, so implementations override only what they serve.
pub trait Responder: Send + 'static {
    /// A fire-and-forget request. No reply channel exists.
    fn handle_fire_and_forget(&mut self, payload: Payload) { let _ = payload; }

    /// Connection-level metadata from METADATA_PUSH.
    fn handle_metadata_push(&mut self, metadata: Bytes) { let _ = metadata; }

    /// A request expecting exactly one payload (or an error) back.
    fn handle_request_response(&mut self, payload: Payload, producer: ProducerHandle) {
        let _ = payload;
        producer.error("request-response is not supported");
    }

    /// A stream request. `initial_n` payloads are already credited; more
    /// credits arrive transparently and queued payloads drain against them.
    fn handle_request_stream(&mut self, payload: Payload, initial_n: u32, producer: ProducerHandle) {
        let _ = (payload, initial_n);
        producer.error("request-stream is not supported");
    }

    /// A channel request. Return a subscriber to consume the requester's
    /// payloads, or `None` to leave the inbound direction unread (the peer
    /// is never granted credits then).
    fn handle_request_channel(
        &mut self,
        payload: Payload,
        initial_n: u32,
        producer: ProducerHandle,
    ) -> Option<Box<dyn Subscriber>> {
        let _ = (payload, initial_n);
        producer.error("request-channel is not supported");
        None
    }
}

/// Responder rejecting every interaction; the default for pure requesters.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopResponder;

impl Responder for NoopResponder {}
