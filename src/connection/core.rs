//! The connection state machine.
//!
//! `ConnectionCore` owns everything mutable about one connection: the stream
//! map, the id allocator, the outbound path with its resume cache, the
//! keepalive schedule, and the lifecycle state. Every method is synchronous;
//! the actor in [`super::actor`] serializes all calls, so no locking happens
//! here.

use std::collections::BTreeMap;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::{
    config::{ConnectionConfig, Mode},
    error::{Error, ErrorCode, Result},
    frame::{Frame, Payload, ProtocolVersion, StreamId},
    keepalive::KeepaliveSchedule,
    serializer::{Serializer, SerializerV1},
    stream::{
        ResponseRequester, ResponseResponder, StreamAutomaton, StreamRequester, StreamResponder,
        StreamSignal, Subscriber,
    },
    streams::{PeerStreamId, StreamIds},
    transport::{FrameTransport, TransportEvent},
};

use super::{
    ConnectionState,
    command::Command,
    handle::{ProducerHandle, Subscription},
    outbound::Outbound,
    responder::Responder,
};

pub(crate) struct ConnectionCore {
    pub(super) config: ConnectionConfig,
    pub(super) out: Outbound,
    pub(super) streams: BTreeMap<StreamId, StreamAutomaton>,
    pub(super) ids: StreamIds,
    pub(super) responder: Box<dyn Responder>,
    pub(super) keepalive: KeepaliveSchedule,
    /// Pending client resume handshake; fires exactly once.
    pub(super) resume_reply: Option<oneshot::Sender<Result<()>>>,
    /// Sender half of the actor mailbox, cloned into subscriptions and
    /// producer handles.
    pub(super) commands: mpsc::UnboundedSender<Command>,
    state_tx: watch::Sender<ConnectionState>,
    closed: bool,
}

/// How a frame for a known stream was consumed.
enum StreamFrameOutcome {
    Handled(Option<StreamSignal>),
    UnexpectedKind,
}

impl ConnectionCore {
    pub(crate) fn new(
        config: ConnectionConfig,
        responder: Box<dyn Responder>,
        commands: mpsc::UnboundedSender<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let keepalive = KeepaliveSchedule::new(
            config.keepalive_interval,
            config.max_lifetime,
            config.mode == Mode::Client,
        );
        let mut out = Outbound::new(config.resumable, config.resume_cache_limit);
        if config.mode == Mode::Client {
            // Clients pick their serializer up front; servers autodetect
            // from the first inbound frame.
            out.set_serializer(Box::new(SerializerV1));
        }
        let ids = StreamIds::new(config.mode);
        crate::metrics::connection_opened();
        Self {
            config,
            out,
            streams: BTreeMap::new(),
            ids,
            responder,
            keepalive,
            resume_reply: None,
            commands,
            state_tx,
            closed: false,
        }
    }

    pub(crate) fn is_closed(&self) -> bool { self.closed }

    pub(super) fn set_state(&mut self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Bind the first transport on a client and send SETUP ahead of any
    /// buffered requests.
    pub(crate) fn connect_client(
        &mut self,
        transport: FrameTransport,
    ) -> Option<mpsc::Receiver<TransportEvent>> {
        let inbound = self.out.bind_transport(transport);
        self.set_state(ConnectionState::Connected);

        let keepalive_interval_ms = u32::try_from(self.config.keepalive_interval.as_millis())
            .unwrap_or(u32::MAX);
        let max_lifetime_ms =
            u32::try_from(self.config.max_lifetime.as_millis()).unwrap_or(u32::MAX);
        let setup = Frame::Setup {
            version: ProtocolVersion::CURRENT,
            keepalive_interval_ms,
            max_lifetime_ms,
            resume_token: if self.config.resumable {
                self.config.resume_token.clone()
            } else {
                None
            },
            metadata_mime_type: self.config.metadata_mime_type.clone(),
            data_mime_type: self.config.data_mime_type.clone(),
            payload: Payload::empty(),
        };
        self.out.output_or_enqueue(&setup);
        self.out.flush_pending();
        self.keepalive.start(Instant::now());
        info!("client connection established");
        inbound
    }

    /// Bind an accepted server transport once SETUP has been consumed. The
    /// keepalive watchdog runs here too: servers send no pings but still
    /// close a client that stays silent past `max_lifetime`.
    pub(crate) fn connect_server(
        &mut self,
        transport: FrameTransport,
        serializer: Box<dyn Serializer>,
    ) -> Option<mpsc::Receiver<TransportEvent>> {
        self.out.set_serializer(serializer);
        let inbound = self.out.bind_transport(transport);
        self.set_state(ConnectionState::Connected);
        self.out.flush_pending();
        self.keepalive.start(Instant::now());
        info!("server connection established");
        inbound
    }

    /// Client warm resume: bind the fresh transport, send RESUME, and hold
    /// all stream traffic until RESUME_OK.
    pub(crate) fn resume_client(
        &mut self,
        transport: FrameTransport,
        reply: oneshot::Sender<Result<()>>,
    ) -> Option<mpsc::Receiver<TransportEvent>> {
        if self.closed {
            let _ = reply.send(Err(Error::TransportClosed));
            transport.close();
            return None;
        }
        if self.config.mode != Mode::Client || !self.out.is_resumable() {
            let _ = reply.send(Err(Error::ResumeFailed(
                "connection is not a resumable client".into(),
            )));
            transport.close();
            return None;
        }
        if self.resume_reply.is_some() {
            let _ = reply.send(Err(Error::ResumeFailed("resume already in flight".into())));
            transport.close();
            return None;
        }
        if self.out.is_connected() {
            self.disconnect_internal(Some("resuming on a new connection"));
        }

        let Some(token) = self.config.resume_token.clone() else {
            let _ = reply.send(Err(Error::ResumeFailed("no resume token".into())));
            transport.close();
            return None;
        };
        let inbound = self.out.bind_transport(transport);
        let resume = Frame::Resume {
            version: ProtocolVersion::CURRENT,
            token,
            last_received_server_position: self.out.resume().implied_position(),
            first_available_client_position: self.out.resume().first_sent_position(),
        };
        // Still marked not-resuming, so this reaches the wire ahead of the
        // handshake gate.
        self.out.output_or_enqueue(&resume);
        self.out.set_resuming(true);
        self.set_state(ConnectionState::Resuming);
        self.resume_reply = Some(reply);
        info!("client resume handshake started");
        inbound
    }

    /// Server side of a resume hand-off: validate positions, acknowledge,
    /// classify streams, and replay.
    pub(crate) fn resume_server(
        &mut self,
        transport: FrameTransport,
        last_received_server_position: u64,
        first_available_client_position: u64,
    ) -> Option<mpsc::Receiver<TransportEvent>> {
        if self.closed || self.config.mode != Mode::Server {
            transport.close();
            return None;
        }
        if self.out.is_connected() {
            self.disconnect_internal(Some("resuming session on a new transport"));
        }
        let inbound = self.out.bind_transport(transport);
        self.set_state(ConnectionState::Connected);

        let client_position_known = first_available_client_position
            == crate::resume::UNSPECIFIED_POSITION
            || first_available_client_position <= self.out.resume().implied_position();
        if !client_position_known
            || !self
                .out
                .resume()
                .is_position_available(last_received_server_position)
        {
            self.close_with_error(Frame::connection_error(
                ErrorCode::RejectedResume,
                format!(
                    "cannot resume: client requested position {last_received_server_position}, \
                     available range starts at {}",
                    self.out.resume().first_sent_position()
                ),
            ));
            return inbound;
        }

        self.out.output_or_enqueue(&Frame::ResumeOk {
            last_received_client_position: self.out.resume().implied_position(),
        });
        // Replay before any new frame is written: fresh frames join the cache
        // and must not be replayed in the same pass.
        self.out.replay_from_position(last_received_server_position);

        let dirty: Vec<StreamId> = self
            .streams
            .keys()
            .copied()
            .filter(|id| {
                !self
                    .out
                    .resume()
                    .is_position_available_for_stream(last_received_server_position, *id)
            })
            .collect();
        for id in dirty {
            warn!("stream {id} lost frames to cache eviction, failing it");
            self.out.write_close_stream(
                id,
                StreamSignal::Error,
                "stream state lost during resume",
            );
            self.end_stream(id, StreamSignal::Error);
        }

        self.out.flush_pending();
        self.keepalive.start(Instant::now());
        info!("server resumed session from position {last_received_server_position}");
        inbound
    }

    /// Release the transport keeping all session state. No-op when already
    /// detached or closed.
    pub(crate) fn disconnect_internal(&mut self, reason: Option<&str>) {
        if self.closed || !self.out.is_connected() {
            return;
        }
        self.keepalive.stop();
        if let Some(reply) = self.resume_reply.take() {
            let _ = reply.send(Err(Error::Connection(
                reason.unwrap_or("connection closing").into(),
            )));
        }
        self.out.set_resuming(false);
        self.out.unbind_transport(None);
        self.set_state(ConnectionState::Disconnected);
        info!("connection disconnected: {}", reason.unwrap_or("local request"));
    }

    /// Terminate the connection. Idempotent: the first call wins, later ones
    /// return immediately.
    pub(crate) fn close(&mut self, error: Option<Error>, signal: StreamSignal) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.keepalive.stop();
        if let Some(reply) = self.resume_reply.take() {
            let _ = reply.send(Err(error
                .clone()
                .unwrap_or_else(|| Error::Connection("connection closing".into()))));
        }
        self.close_streams(signal);
        let transport_error = if signal == StreamSignal::ConnectionError {
            error.as_ref()
        } else {
            None
        };
        self.out.unbind_transport(transport_error);
        self.set_state(ConnectionState::Closed);
        crate::metrics::connection_closed();
        match error {
            Some(error) => info!("connection closed: {error}"),
            None => info!("connection closed"),
        }
    }

    fn close_streams(&mut self, signal: StreamSignal) {
        while let Some((id, mut automaton)) = self.streams.pop_first() {
            self.out.resume_mut().on_stream_closed(id);
            automaton.end_stream(signal);
        }
    }

    /// Send an ERROR frame (best effort) and close.
    pub(crate) fn close_with_error(&mut self, frame: Frame) {
        if self.closed {
            return;
        }
        let message = frame.error_message().unwrap_or_default();
        let code = match &frame {
            Frame::Error { code, .. } => *code,
            _ => ErrorCode::ConnectionError,
        };
        error!("closing connection with error: {message}");
        crate::metrics::protocol_error();
        if self.out.has_serializer() {
            self.out.output_or_enqueue(&frame);
        }
        self.close(
            Some(Error::from_error_frame(code, message)),
            StreamSignal::ConnectionError,
        );
    }

    /// The transport reported its terminal signal.
    pub(crate) fn on_transport_terminal(&mut self, reason: Option<String>) {
        if self.closed {
            return;
        }
        if self.out.is_resumable() {
            self.disconnect_internal(Some(reason.as_deref().unwrap_or("transport closed")));
            return;
        }
        match reason {
            Some(message) => self.close(
                Some(Error::Connection(message)),
                StreamSignal::ConnectionError,
            ),
            None => self.close(None, StreamSignal::ConnectionEnd),
        }
    }

    /// Remove a stream entry and deliver its terminal. Idempotent: unknown
    /// ids mean the end-stream handshake already ran.
    pub(crate) fn end_stream(&mut self, stream_id: StreamId, signal: StreamSignal) -> bool {
        let Some(mut automaton) = self.streams.remove(&stream_id) else {
            return false;
        };
        debug!("ending {} {stream_id} with {signal:?}", automaton.describe());
        self.out.resume_mut().on_stream_closed(stream_id);
        automaton.end_stream(signal);
        true
    }

    /// Keepalive timer fired.
    pub(crate) fn on_keepalive_tick(&mut self, now: Instant) {
        let tick = self.keepalive.on_tick(now);
        if tick.timed_out {
            warn!("keepalive timeout");
            if self.out.is_resumable() {
                self.disconnect_internal(Some("keepalive timeout"));
            } else {
                if self.out.has_serializer() {
                    self.out.output_or_enqueue(&Frame::connection_error(
                        ErrorCode::ConnectionError,
                        "keepalive timeout",
                    ));
                }
                self.close(Some(Error::KeepaliveTimeout), StreamSignal::ConnectionError);
            }
            return;
        }
        if tick.send {
            self.out.send_keepalive(true);
        }
    }

    pub(crate) fn next_keepalive_deadline(&self) -> Option<Instant> {
        self.keepalive.next_deadline()
    }

    /// Process one local command. Resume commands are handled in the actor
    /// because they swap the inbound receiver.
    pub(crate) fn handle_command(&mut self, command: Command) {
        match command {
            Command::FireAndForget { payload } => self.start_fire_and_forget(payload),
            Command::RequestResponse {
                payload,
                subscriber,
            } => self.start_request_response(payload, subscriber),
            Command::RequestStream {
                payload,
                initial_n,
                subscriber,
            } => self.start_request_stream(payload, initial_n, subscriber),
            Command::RequestChannel {
                payload,
                initial_n,
                subscriber,
                reply,
            } => self.start_request_channel(payload, initial_n, subscriber, reply),
            Command::MetadataPush { metadata } => {
                if !self.closed {
                    self.out.output_or_enqueue(&Frame::MetadataPush { metadata });
                }
            }
            Command::StreamRequestN { stream_id, n } => {
                self.on_stream_signal(stream_id, |automaton, out| {
                    automaton.local_request(out, stream_id, n)
                });
            }
            Command::StreamCancel { stream_id } => {
                self.on_stream_signal(stream_id, |automaton, out| {
                    automaton.local_cancel(out, stream_id)
                });
            }
            Command::StreamNext { stream_id, payload } => {
                self.on_stream_signal(stream_id, |automaton, out| {
                    automaton.local_next(out, stream_id, payload)
                });
            }
            Command::StreamComplete { stream_id } => {
                self.on_stream_signal(stream_id, |automaton, out| {
                    automaton.local_complete(out, stream_id)
                });
            }
            Command::StreamError { stream_id, message } => {
                self.on_stream_signal(stream_id, |automaton, out| {
                    automaton.local_error(out, stream_id, message)
                });
            }
            Command::Disconnect => self.disconnect_internal(None),
            Command::Close => self.close(None, StreamSignal::SocketClosed),
            Command::Resume { transport, reply } => {
                // Reached only through handle_command in tests; the actor
                // intercepts this variant to capture the new receiver.
                let _ = self.resume_client(transport, reply);
            }
            Command::ResumeServer {
                transport,
                last_received_server_position,
                first_available_client_position,
            } => {
                let _ = self.resume_server(
                    transport,
                    last_received_server_position,
                    first_available_client_position,
                );
            }
        }
    }

    fn on_stream_signal(
        &mut self,
        stream_id: StreamId,
        apply: impl FnOnce(&mut StreamAutomaton, &mut Outbound) -> Option<StreamSignal>,
    ) {
        let Some(automaton) = self.streams.get_mut(&stream_id) else {
            debug!("dropping local signal for finished stream {stream_id}");
            return;
        };
        if let Some(signal) = apply(automaton, &mut self.out) {
            self.end_stream(stream_id, signal);
        }
    }

    fn start_fire_and_forget(&mut self, payload: Payload) {
        if self.closed {
            return;
        }
        let stream_id = self.ids.next_stream_id();
        self.out
            .output_or_enqueue(&Frame::RequestFnf { stream_id, payload });
    }

    fn start_request_response(&mut self, payload: Payload, mut subscriber: Box<dyn Subscriber>) {
        if self.closed {
            subscriber.on_error(Error::TransportClosed);
            return;
        }
        let stream_id = self.ids.next_stream_id();
        subscriber.on_subscribe(Subscription::new(stream_id, self.commands.clone()));
        self.streams.insert(
            stream_id,
            StreamAutomaton::ResponseRequester(ResponseRequester::new(subscriber)),
        );
        self.out
            .output_or_enqueue(&Frame::RequestResponse { stream_id, payload });
    }

    fn start_request_stream(
        &mut self,
        payload: Payload,
        initial_n: u32,
        mut subscriber: Box<dyn Subscriber>,
    ) {
        if self.closed {
            subscriber.on_error(Error::TransportClosed);
            return;
        }
        if initial_n == 0 {
            subscriber.on_error(Error::InvalidArgument(
                "request_stream needs a positive initial request".into(),
            ));
            return;
        }
        let stream_id = self.ids.next_stream_id();
        subscriber.on_subscribe(Subscription::new(stream_id, self.commands.clone()));
        self.streams.insert(
            stream_id,
            StreamAutomaton::StreamRequester(StreamRequester::stream(subscriber, initial_n)),
        );
        self.out.output_or_enqueue(&Frame::RequestStream {
            stream_id,
            initial_request_n: initial_n,
            payload,
        });
    }

    fn start_request_channel(
        &mut self,
        payload: Payload,
        initial_n: u32,
        mut subscriber: Box<dyn Subscriber>,
        reply: oneshot::Sender<ProducerHandle>,
    ) {
        if self.closed {
            subscriber.on_error(Error::TransportClosed);
            return;
        }
        let stream_id = self.ids.next_stream_id();
        subscriber.on_subscribe(Subscription::new(stream_id, self.commands.clone()));
        self.streams.insert(
            stream_id,
            StreamAutomaton::StreamRequester(StreamRequester::channel(subscriber, initial_n)),
        );
        let _ = reply.send(ProducerHandle::new(stream_id, self.commands.clone()));
        self.out.output_or_enqueue(&Frame::RequestChannel {
            stream_id,
            complete: false,
            initial_request_n: initial_n,
            payload,
        });
    }

    pub(crate) fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(bytes) => self.process_frame(bytes),
            TransportEvent::Closed(reason) => self.on_transport_terminal(reason),
        }
    }

    fn take_stream_frame_outcome(
        &mut self,
        stream_id: StreamId,
        frame: Frame,
    ) -> Option<StreamFrameOutcome> {
        let automaton = self.streams.get_mut(&stream_id)?;
        let outcome = match frame {
            Frame::RequestN { n, .. } => {
                StreamFrameOutcome::Handled(automaton.handle_request_n(&mut self.out, stream_id, n))
            }
            Frame::Cancel { .. } => {
                StreamFrameOutcome::Handled(automaton.handle_cancel(&mut self.out, stream_id))
            }
            Frame::Payload {
                next,
                complete,
                payload,
                ..
            } => StreamFrameOutcome::Handled(automaton.handle_payload(
                &mut self.out,
                stream_id,
                payload,
                next,
                complete,
            )),
            Frame::Error { code, message, .. } => {
                let message = String::from_utf8_lossy(&message).into_owned();
                StreamFrameOutcome::Handled(
                    automaton.handle_error(Error::from_error_frame(code, message)),
                )
            }
            _ => StreamFrameOutcome::UnexpectedKind,
        };
        Some(outcome)
    }

    /// Dispatch a frame addressed to a known stream.
    pub(super) fn handle_stream_frame(&mut self, stream_id: StreamId, frame: Frame) {
        let kind = frame.kind();
        match self.take_stream_frame_outcome(stream_id, frame) {
            None => {}
            Some(StreamFrameOutcome::Handled(None)) => {}
            Some(StreamFrameOutcome::Handled(Some(signal))) => {
                self.end_stream(stream_id, signal);
            }
            Some(StreamFrameOutcome::UnexpectedKind) => {
                self.close_with_error(Frame::connection_error(
                    ErrorCode::ConnectionError,
                    format!("unexpected {kind:?} frame for stream {stream_id}"),
                ));
            }
        }
    }

    /// A frame for a stream id with no live automaton: create a responder
    /// for REQUEST_* frames, drop stale traffic, reject the rest.
    pub(super) fn handle_unknown_stream(&mut self, stream_id: StreamId, frame: Frame) {
        let kind = frame.kind();
        if self.ids.register_peer_stream_id(stream_id) == PeerStreamId::Stale {
            debug!("ignoring {kind:?} frame for stale stream {stream_id}");
            return;
        }
        match frame {
            Frame::RequestResponse { payload, .. } => {
                self.streams.insert(
                    stream_id,
                    StreamAutomaton::ResponseResponder(ResponseResponder::new()),
                );
                let producer = ProducerHandle::new(stream_id, self.commands.clone());
                self.responder.handle_request_response(payload, producer);
            }
            Frame::RequestStream {
                initial_request_n,
                payload,
                ..
            } => {
                if initial_request_n == 0 {
                    self.out.write_close_stream(
                        stream_id,
                        StreamSignal::Error,
                        "REQUEST_STREAM with zero initialRequestN",
                    );
                    return;
                }
                self.streams.insert(
                    stream_id,
                    StreamAutomaton::StreamResponder(StreamResponder::stream(initial_request_n)),
                );
                let producer = ProducerHandle::new(stream_id, self.commands.clone());
                self.responder
                    .handle_request_stream(payload, initial_request_n, producer);
            }
            Frame::RequestChannel {
                complete,
                initial_request_n,
                payload,
                ..
            } => {
                if initial_request_n == 0 {
                    self.out.write_close_stream(
                        stream_id,
                        StreamSignal::Error,
                        "REQUEST_CHANNEL with zero initialRequestN",
                    );
                    return;
                }
                let producer = ProducerHandle::new(stream_id, self.commands.clone());
                let subscriber = self
                    .responder
                    .handle_request_channel(payload, initial_request_n, producer)
                    .map(|mut subscriber| {
                        subscriber
                            .on_subscribe(Subscription::new(stream_id, self.commands.clone()));
                        subscriber
                    });
                self.streams.insert(
                    stream_id,
                    StreamAutomaton::StreamResponder(StreamResponder::channel(
                        initial_request_n,
                        subscriber,
                        complete,
                    )),
                );
            }
            Frame::RequestFnf { payload, .. } => {
                self.responder.handle_fire_and_forget(payload);
            }
            _ => {
                self.close_with_error(Frame::connection_error(
                    ErrorCode::ConnectionError,
                    format!("unexpected {kind:?} frame for stream {stream_id}"),
                ));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn stream_count(&self) -> usize { self.streams.len() }
}
