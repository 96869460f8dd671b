//! Commands delivered to a connection actor's mailbox.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::{
    error::Result,
    frame::{Payload, StreamId},
    stream::Subscriber,
    transport::FrameTransport,
};

use super::handle::ProducerHandle;

/// A local request or lifecycle signal for the connection actor.
///
/// Commands are small control records on an unbounded channel, so the
/// synchronous producer/subscriber handles can emit them without blocking;
/// bulk data still back-pressures at the transport.
pub(crate) enum Command {
    FireAndForget {
        payload: Payload,
    },
    RequestResponse {
        payload: Payload,
        subscriber: Box<dyn Subscriber>,
    },
    RequestStream {
        payload: Payload,
        initial_n: u32,
        subscriber: Box<dyn Subscriber>,
    },
    RequestChannel {
        payload: Payload,
        initial_n: u32,
        subscriber: Box<dyn Subscriber>,
        reply: oneshot::Sender<ProducerHandle>,
    },
    MetadataPush {
        metadata: Bytes,
    },
    /// Subscriber granted more credits to the peer.
    StreamRequestN { stream_id: StreamId, n: u32 },
    /// Subscriber lost interest.
    StreamCancel { stream_id: StreamId },
    /// Local producer emitted one payload.
    StreamNext { stream_id: StreamId, payload: Payload },
    /// Local producer finished.
    StreamComplete { stream_id: StreamId },
    /// Local producer failed.
    StreamError { stream_id: StreamId, message: String },
    /// Release the transport, keeping session state for a later resume.
    Disconnect,
    /// Terminate the connection for good.
    Close,
    /// Client: rebind onto a fresh transport and run the resume handshake.
    /// The reply fires exactly once with the outcome.
    Resume {
        transport: FrameTransport,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Server: a RESUME for this session arrived on a fresh transport; the
    /// acceptor already consumed the frame and passes its positions along.
    ResumeServer {
        transport: FrameTransport,
        last_received_server_position: u64,
        first_available_client_position: u64,
    },
}
