//! The per-connection state machine and its actor.
//!
//! A connection multiplexes many streams over one transport. The synchronous
//! state machine (`core`) owns the stream map, resume tracking, and
//! lifecycle; the actor serializes every mutation onto one task via a
//! `tokio::select!` mailbox loop. Applications hold a cloneable
//! [`ConnectionHandle`] and per-stream [`Subscription`] / [`ProducerHandle`]
//! capabilities.

mod actor;
mod command;
mod control;
mod core;
mod dispatch;
mod handle;
mod outbound;
mod responder;

pub use actor::ConnectionActor;
pub use handle::{ConnectionHandle, ProducerHandle, Subscription};
pub use responder::{NoopResponder, Responder};

pub(crate) use outbound::Outbound;

/// Lifecycle state of a connection, observable through
/// [`ConnectionHandle::state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport bound; a resumable connection may bind a new one.
    Disconnected,
    /// A transport is bound and frames flow.
    Connected,
    /// Client only: a RESUME is in flight, stream traffic is held back.
    Resuming,
    /// Terminal. Every stream received its terminal signal.
    Closed,
}
