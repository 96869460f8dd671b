#![doc(html_root_url = "https://docs.rs/resock/latest")]
//! Public API for the `resock` library.
//!
//! `resock` is the core of an RSocket-protocol engine: a per-connection
//! state machine multiplexing many concurrent reactive streams, with
//! credit-based backpressure, over a single ordered duplex transport, plus
//! the resumption subsystem that replays frames after a reconnect.
//!
//! Transports and application logic plug in at two seams: a
//! [`transport::FrameTransport`] delivers whole serialized frames in both
//! directions, and a [`connection::Responder`] handles peer-initiated
//! requests. The [`connection::ConnectionActor`] owns everything in between.
//!
//! ```no_run
//! use resock::{
//!     config::ConnectionConfig,
//!     connection::{ConnectionActor, NoopResponder},
//!     frame::Payload,
//!     stream::channel_subscriber,
//!     transport,
//! };
//!
//! # async fn demo() -> resock::error::Result<()> {
//! let (client_side, _server_side) = transport::in_memory_pair();
//! let (handle, actor) = ConnectionActor::client(
//!     client_side,
//!     ConnectionConfig::client(),
//!     Box::new(NoopResponder),
//! )?;
//! tokio::spawn(actor.run());
//!
//! let (subscriber, mut events) = channel_subscriber();
//! handle.request_stream(Payload::from("Bob"), 3, subscriber)?;
//! let _first = events.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod acceptor;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
mod keepalive;
pub mod metrics;
pub mod resume;
pub mod serializer;
pub mod stream;
mod streams;
pub mod transport;

pub use acceptor::{Accepted, ServerAcceptor, SetupParameters};
pub use config::{ConnectionConfig, Mode};
pub use connection::{
    ConnectionActor, ConnectionHandle, ConnectionState, NoopResponder, ProducerHandle, Responder,
    Subscription,
};
pub use error::{Error, ErrorCode, Result};
pub use frame::{Frame, FrameFlags, FrameKind, Payload, ProtocolVersion, StreamId};
pub use resume::{ResumeManager, ResumeToken, SessionStore};
pub use serializer::{Serializer, SerializerV1, autodetect};
pub use stream::{PayloadStream, StreamEvent, StreamSignal, Subscriber, channel_subscriber};
pub use transport::{FrameTransport, LengthPrefixedFraming, TransportEvent};
