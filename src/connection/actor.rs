//! The connection actor.
//!
//! One tokio task owns the whole connection: the mailbox of local commands,
//! the transport's inbound events, and the keepalive timer all feed a
//! `tokio::select!` loop with `biased` ordering: shutdown first, then local
//! commands, then inbound frames, then the timer. Because every mutation
//! runs on this task, the state machine needs no interior locking.

use log::debug;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ConnectionConfig, Mode},
    error::{Error, Result},
    frame::ProtocolVersion,
    serializer::Serializer,
    stream::StreamSignal,
    transport::{FrameTransport, TransportEvent},
};

use super::{
    ConnectionState, command::Command, core::ConnectionCore, handle::ConnectionHandle,
    responder::Responder,
};

/// Actor driving one connection until it closes.
pub struct ConnectionActor {
    core: ConnectionCore,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    shutdown: CancellationToken,
}

impl ConnectionActor {
    /// Build a client connection over `transport`: SETUP is sent
    /// immediately, the returned actor must be spawned to make progress.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the configuration is not a
    /// client one and [`Error::ProtocolVersionMismatch`] when it forces a
    /// version this crate cannot speak.
    pub fn client(
        transport: FrameTransport,
        config: ConnectionConfig,
        responder: Box<dyn Responder>,
    ) -> Result<(ConnectionHandle, Self)> {
        if config.mode != Mode::Client {
            return Err(Error::InvalidArgument(
                "client connection requires a client configuration".into(),
            ));
        }
        Self::check_version(&config)?;
        let (mut actor, handle) = Self::build(config, responder);
        actor.inbound = actor.core.connect_client(transport);
        Ok((handle, actor))
    }

    /// Build a server connection once the acceptance layer consumed SETUP
    /// and picked `serializer`.
    pub(crate) fn server(
        transport: FrameTransport,
        config: ConnectionConfig,
        serializer: Box<dyn Serializer>,
        responder: Box<dyn Responder>,
    ) -> (ConnectionHandle, Self) {
        debug_assert_eq!(config.mode, Mode::Server);
        let (mut actor, handle) = Self::build(config, responder);
        actor.inbound = actor.core.connect_server(transport, serializer);
        (handle, actor)
    }

    fn check_version(config: &ConnectionConfig) -> Result<()> {
        match config.protocol_version {
            Some(version) if version != ProtocolVersion::CURRENT => {
                Err(Error::ProtocolVersionMismatch(format!(
                    "cannot speak protocol {version}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn build(
        config: ConnectionConfig,
        responder: Box<dyn Responder>,
    ) -> (Self, ConnectionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let core = ConnectionCore::new(config, responder, command_tx.clone(), state_tx);
        let actor = Self {
            core,
            commands: command_rx,
            inbound: None,
            shutdown: CancellationToken::new(),
        };
        (actor, ConnectionHandle::new(command_tx, state_rx))
    }

    /// Token cancelling the actor from outside; equivalent to `close`.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Drive the connection until it reaches its terminal state.
    pub async fn run(mut self) {
        loop {
            if self.core.is_closed() {
                break;
            }
            // Precomputed so the select! guards do not re-borrow self.
            let inbound_open = self.inbound.is_some();
            let deadline = self.core.next_keepalive_deadline();

            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    self.core.close(None, StreamSignal::SocketClosed);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Resume { transport, reply }) => {
                        if let Some(inbound) = self.core.resume_client(transport, reply) {
                            self.inbound = Some(inbound);
                        }
                    }
                    Some(Command::ResumeServer {
                        transport,
                        last_received_server_position,
                        first_available_client_position,
                    }) => {
                        if let Some(inbound) = self.core.resume_server(
                            transport,
                            last_received_server_position,
                            first_available_client_position,
                        ) {
                            self.inbound = Some(inbound);
                        }
                    }
                    Some(command) => self.core.handle_command(command),
                    None => self.core.close(None, StreamSignal::SocketClosed),
                },
                event = Self::poll_inbound(self.inbound.as_mut()), if inbound_open => {
                    match event {
                        Some(event) => self.core.handle_transport_event(event),
                        None => {
                            // The wire tasks vanished without a terminal
                            // signal; treat it as a clean transport end.
                            self.inbound = None;
                            self.core.on_transport_terminal(None);
                        }
                    }
                }
                () = Self::sleep_until_opt(deadline), if deadline.is_some() => {
                    self.core.on_keepalive_tick(Instant::now());
                }
                else => {}
            }
        }
        debug!("connection actor finished");
    }

    /// Await the next transport event, or park forever when no transport is
    /// bound (the guard keeps this branch disabled then).
    async fn poll_inbound(
        inbound: Option<&mut mpsc::Receiver<TransportEvent>>,
    ) -> Option<TransportEvent> {
        match inbound {
            Some(inbound) => inbound.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn sleep_until_opt(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
