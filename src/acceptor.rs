//! Server-side acceptance of fresh transports.
//!
//! A transport that just connected speaks first with SETUP (new session) or
//! RESUME (continuation of a resumable one). Neither belongs to an existing
//! connection, so the acceptor reads that one frame, then either builds a
//! new server connection or hands the transport to the connection owning the
//! resume token. Everything else is rejected before any connection state
//! exists.

use log::{info, warn};
use tokio::time::Duration;

use crate::{
    config::ConnectionConfig,
    connection::{ConnectionActor, ConnectionHandle, Responder},
    error::{Error, ErrorCode, Result},
    frame::{Frame, FrameKind, Payload, ProtocolVersion},
    resume::{ResumeToken, SessionStore},
    serializer::autodetect,
    transport::{FrameTransport, TransportEvent},
};

/// Parameters a client supplied in its SETUP frame.
#[derive(Debug)]
pub struct SetupParameters {
    pub version: ProtocolVersion,
    pub keepalive_interval: Duration,
    pub max_lifetime: Duration,
    pub resume_token: Option<ResumeToken>,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    pub payload: Payload,
}

/// Builds a responder for each accepted connection.
pub type ResponderFactory = Box<dyn Fn(&SetupParameters) -> Box<dyn Responder> + Send + Sync>;

/// Outcome of accepting one transport.
pub enum Accepted {
    /// A new connection. The actor must be spawned to make progress.
    Connection {
        handle: ConnectionHandle,
        actor: ConnectionActor,
        setup: SetupParameters,
    },
    /// A RESUME routed to the existing connection for its session; nothing
    /// new to spawn.
    Resumed { handle: ConnectionHandle },
}

/// Routes first frames of fresh server-side transports.
///
/// One acceptor serves a listener; its session store is the shared map from
/// resume token to the connection owning that session.
pub struct ServerAcceptor {
    sessions: SessionStore<ConnectionHandle>,
    responder_factory: ResponderFactory,
}

impl ServerAcceptor {
    #[must_use]
    pub fn new(responder_factory: ResponderFactory) -> Self {
        Self {
            sessions: SessionStore::new(),
            responder_factory,
        }
    }

    /// Count of resumable sessions currently registered.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.prune(|handle| !handle.is_closed());
        self.sessions.len()
    }

    /// Accept one transport: read its first frame and route it.
    ///
    /// # Errors
    ///
    /// [`Error::TransportClosed`] when the wire dies before speaking,
    /// [`Error::ProtocolVersionMismatch`] when no serializer matches the
    /// first frame, [`Error::InvalidFrame`] / [`Error::UnexpectedFrame`] for
    /// malformed or out-of-place openings, and [`Error::ResumeRejected`]
    /// when a RESUME names an unknown session. The transport is closed on
    /// every error path.
    pub async fn accept(&self, mut transport: FrameTransport) -> Result<Accepted> {
        let Some(mut inbound) = transport.take_inbound() else {
            transport.close();
            return Err(Error::TransportClosed);
        };
        let bytes = match inbound.recv().await {
            Some(TransportEvent::Frame(bytes)) => bytes,
            Some(TransportEvent::Closed(_)) | None => {
                transport.close();
                return Err(Error::TransportClosed);
            }
        };

        let Some(serializer) = autodetect(&bytes) else {
            warn!("rejecting connection: cannot detect protocol version");
            transport.close();
            return Err(Error::ProtocolVersionMismatch(
                "cannot detect protocol version from first frame".into(),
            ));
        };
        let kind = serializer.peek_kind(&bytes);
        let frame = match serializer.deserialize(bytes) {
            Ok(frame) => frame,
            Err(error) => {
                let code = match kind {
                    Some(FrameKind::Resume) => ErrorCode::RejectedResume,
                    _ => ErrorCode::InvalidSetup,
                };
                let reject = Frame::connection_error(code, error.to_string());
                let _ = transport.send(serializer.serialize(&reject, false));
                transport.close();
                return Err(error);
            }
        };

        match frame {
            Frame::Setup {
                version,
                keepalive_interval_ms,
                max_lifetime_ms,
                resume_token,
                metadata_mime_type,
                data_mime_type,
                payload,
            } => {
                let setup = SetupParameters {
                    version,
                    keepalive_interval: Duration::from_millis(u64::from(keepalive_interval_ms)),
                    max_lifetime: Duration::from_millis(u64::from(max_lifetime_ms)),
                    resume_token,
                    metadata_mime_type,
                    data_mime_type,
                    payload,
                };
                let mut config = ConnectionConfig::server()
                    .keepalive(setup.keepalive_interval, setup.max_lifetime);
                if let Some(token) = setup.resume_token.clone() {
                    config = config.resume_token(token);
                }
                let responder = (self.responder_factory)(&setup);
                transport.set_inbound(inbound);
                let (handle, actor) =
                    ConnectionActor::server(transport, config, serializer, responder);
                if let Some(token) = setup.resume_token.clone() {
                    self.sessions.insert(token, handle.clone());
                }
                info!("accepted connection at protocol {version}");
                Ok(Accepted::Connection {
                    handle,
                    actor,
                    setup,
                })
            }
            Frame::Resume {
                token,
                last_received_server_position,
                first_available_client_position,
                ..
            } => {
                self.sessions.prune(|handle| !handle.is_closed());
                match self.sessions.get(&token) {
                    Some(handle) => {
                        transport.set_inbound(inbound);
                        handle.resume_server(
                            transport,
                            last_received_server_position,
                            first_available_client_position,
                        )?;
                        info!("routed resume to existing session");
                        Ok(Accepted::Resumed { handle })
                    }
                    None => {
                        warn!("rejecting resume: unknown token");
                        let error = Frame::connection_error(
                            ErrorCode::RejectedResume,
                            "unknown resume token",
                        );
                        let _ = transport.send(serializer.serialize(&error, false));
                        transport.close();
                        Err(Error::ResumeRejected("unknown resume token".into()))
                    }
                }
            }
            other => {
                let message = format!("expected SETUP or RESUME, got {:?}", other.kind());
                let error =
                    Frame::connection_error(ErrorCode::InvalidSetup, message.clone());
                let _ = transport.send(serializer.serialize(&error, false));
                transport.close();
                Err(Error::UnexpectedFrame(message))
            }
        }
    }
}
