//! Application-facing handles onto a connection actor.
//!
//! All handles are channel senders: cloneable, cheap, and usable from any
//! task. They mint commands into the actor's mailbox; the actor owns every
//! piece of mutable state.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    error::{Error, Result},
    frame::{Payload, StreamId},
    stream::Subscriber,
    transport::FrameTransport,
};

use super::{ConnectionState, command::Command};

/// Requester and lifecycle surface of a connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self { commands, state }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::TransportClosed)
    }

    /// Send a request with no response tracking and no stream state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] when the connection actor is gone.
    pub fn fire_and_forget(&self, payload: Payload) -> Result<()> {
        self.send(Command::FireAndForget { payload })
    }

    /// Request a single response; the subscriber sees one `on_next` plus a
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] when the connection actor is gone.
    pub fn request_response(&self, payload: Payload, subscriber: Box<dyn Subscriber>) -> Result<()> {
        self.send(Command::RequestResponse {
            payload,
            subscriber,
        })
    }

    /// Open a stream with `initial_n` initial credits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for zero `initial_n` and
    /// [`Error::TransportClosed`] when the connection actor is gone.
    pub fn request_stream(
        &self,
        payload: Payload,
        initial_n: u32,
        subscriber: Box<dyn Subscriber>,
    ) -> Result<()> {
        if initial_n == 0 {
            return Err(Error::InvalidArgument(
                "request_stream needs a positive initial request".into(),
            ));
        }
        self.send(Command::RequestStream {
            payload,
            initial_n,
            subscriber,
        })
    }

    /// Open a channel. `payload` rides the request frame; further payloads
    /// go through the returned producer handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for zero `initial_n` and
    /// [`Error::TransportClosed`] when the connection actor is gone.
    pub async fn request_channel(
        &self,
        payload: Payload,
        initial_n: u32,
        subscriber: Box<dyn Subscriber>,
    ) -> Result<ProducerHandle> {
        if initial_n == 0 {
            return Err(Error::InvalidArgument(
                "request_channel needs a positive initial request".into(),
            ));
        }
        let (reply, producer) = oneshot::channel();
        self.send(Command::RequestChannel {
            payload,
            initial_n,
            subscriber,
            reply,
        })?;
        producer.await.map_err(|_| Error::TransportClosed)
    }

    /// Push connection-level metadata to the peer's responder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] when the connection actor is gone.
    pub fn metadata_push(&self, metadata: Bytes) -> Result<()> {
        self.send(Command::MetadataPush { metadata })
    }

    /// Release the transport, keeping streams and the resume cache so a
    /// later [`resume`](Self::resume) can continue the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] when the connection actor is gone.
    pub fn disconnect(&self) -> Result<()> { self.send(Command::Disconnect) }

    /// Terminate the connection. Idempotent; every live stream receives one
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] when the connection actor is gone.
    pub fn close(&self) -> Result<()> { self.send(Command::Close) }

    /// Client-side warm resume: rebind onto `transport` and run the RESUME
    /// handshake. Resolves once RESUME_OK or a rejection arrives.
    ///
    /// # Errors
    ///
    /// [`Error::ResumeRejected`] when the server refused, [`Error::Connection`]
    /// or [`Error::TransportClosed`] when the connection failed first.
    pub async fn resume(&self, transport: FrameTransport) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Resume { transport, reply })?;
        outcome.await.map_err(|_| Error::TransportClosed)?
    }

    /// Server-side resume hand-off from the acceptor.
    pub(crate) fn resume_server(
        &self,
        transport: FrameTransport,
        last_received_server_position: u64,
        first_available_client_position: u64,
    ) -> Result<()> {
        self.send(Command::ResumeServer {
            transport,
            last_received_server_position,
            first_available_client_position,
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { *self.state.borrow() }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.state() == ConnectionState::Closed }

    /// Resolve once the connection reaches its terminal state.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        loop {
            if *state.borrow() == ConnectionState::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Consumer-side control of one stream: credits and cancellation.
#[derive(Clone, Debug)]
pub struct Subscription {
    stream_id: StreamId,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub(crate) fn new(stream_id: StreamId, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            stream_id,
            commands,
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId { self.stream_id }

    /// Grant the peer `n` more payloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for `n == 0`; requesting nothing
    /// is a protocol error.
    pub fn request(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(Error::InvalidArgument("request(0) is not allowed".into()));
        }
        let _ = self.commands.send(Command::StreamRequestN {
            stream_id: self.stream_id,
            n,
        });
        Ok(())
    }

    /// Stop the stream. Idempotent; only the first cancel reaches the wire.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::StreamCancel {
            stream_id: self.stream_id,
        });
    }
}

/// Producer-side control of one stream.
///
/// Payloads queue inside the stream automaton and reach the wire only as the
/// peer grants credits, so producers may run ahead freely.
#[derive(Clone, Debug)]
pub struct ProducerHandle {
    stream_id: StreamId,
    commands: mpsc::UnboundedSender<Command>,
}

impl ProducerHandle {
    pub(crate) fn new(stream_id: StreamId, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            stream_id,
            commands,
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> StreamId { self.stream_id }

    /// Emit one payload.
    pub fn next(&self, payload: Payload) {
        let _ = self.commands.send(Command::StreamNext {
            stream_id: self.stream_id,
            payload,
        });
    }

    /// Finish this direction normally.
    pub fn complete(&self) {
        let _ = self.commands.send(Command::StreamComplete {
            stream_id: self.stream_id,
        });
    }

    /// Fail the stream with an application error.
    pub fn error(&self, message: impl Into<String>) {
        let _ = self.commands.send(Command::StreamError {
            stream_id: self.stream_id,
            message: message.into(),
        });
    }
}
