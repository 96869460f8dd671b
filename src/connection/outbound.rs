//! Outbound frame path for a connection.
//!
//! Every frame leaving the state machine funnels through [`Outbound`]: it is
//! serialized, sent when a transport is bound and no resume handshake is in
//! flight, and otherwise parked in the pending queue in call order. Frames
//! that actually reach the wire are recorded in the resume cache when the
//! connection is resumable.

use std::collections::VecDeque;

use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::{
    error::{Error, ErrorCode},
    frame::{Frame, FrameKind, Payload, StreamId},
    resume::ResumeManager,
    serializer::Serializer,
    stream::StreamSignal,
    transport::{FrameTransport, TransportEvent},
};

/// A serialized frame waiting for a transport.
#[derive(Debug)]
struct PendingFrame {
    bytes: Bytes,
    kind: FrameKind,
    stream_id: StreamId,
}

/// Serializer, transport binding, pending queue, and resume tracking.
///
/// Kept separate from the stream map so automatons can write frames while
/// the connection holds them mutably.
pub(crate) struct Outbound {
    serializer: Option<Box<dyn Serializer>>,
    transport: Option<FrameTransport>,
    pending: VecDeque<PendingFrame>,
    resume: ResumeManager,
    resumable: bool,
    /// Awaiting RESUME_OK: nothing may reach the wire until it arrives.
    resuming: bool,
}

impl Outbound {
    pub(crate) fn new(resumable: bool, cache_limit: usize) -> Self {
        Self {
            serializer: None,
            transport: None,
            pending: VecDeque::new(),
            resume: ResumeManager::new(cache_limit),
            resumable,
            resuming: false,
        }
    }

    pub(crate) fn set_serializer(&mut self, serializer: Box<dyn Serializer>) {
        // Swapping serializers mid-connection would corrupt resume positions.
        debug_assert!(self.serializer.is_none());
        self.serializer = Some(serializer);
    }

    pub(crate) fn serializer(&self) -> Option<&dyn Serializer> { self.serializer.as_deref() }

    pub(crate) fn has_serializer(&self) -> bool { self.serializer.is_some() }

    pub(crate) fn is_connected(&self) -> bool { self.transport.is_some() }

    pub(crate) fn is_resumable(&self) -> bool { self.resumable }

    pub(crate) fn is_resuming(&self) -> bool { self.resuming }

    pub(crate) fn set_resuming(&mut self, resuming: bool) { self.resuming = resuming; }

    pub(crate) fn resume(&self) -> &ResumeManager { &self.resume }

    pub(crate) fn resume_mut(&mut self) -> &mut ResumeManager { &mut self.resume }

    /// Bind a transport, returning its inbound event receiver for the actor.
    pub(crate) fn bind_transport(
        &mut self,
        mut transport: FrameTransport,
    ) -> Option<mpsc::Receiver<TransportEvent>> {
        debug_assert!(self.transport.is_none());
        let inbound = transport.take_inbound();
        self.transport = Some(transport);
        inbound
    }

    /// Release the bound transport, closing it. `error` selects the failure
    /// teardown path.
    pub(crate) fn unbind_transport(&mut self, error: Option<&Error>) {
        if let Some(transport) = self.transport.take() {
            match error {
                Some(error) => transport.close_with_error(error),
                None => transport.close(),
            }
        }
    }

    /// Serialize `frame` and send it, or park it until a transport is ready.
    pub(crate) fn output_or_enqueue(&mut self, frame: &Frame) {
        let Some(serializer) = &self.serializer else {
            warn!("dropping outbound {:?} frame: no serializer", frame.kind());
            return;
        };
        let bytes = serializer.serialize(frame, self.resumable);
        debug!("out: {frame:?}");
        self.dispatch(bytes, frame.kind(), frame.stream_id());
    }

    fn dispatch(&mut self, bytes: Bytes, kind: FrameKind, stream_id: StreamId) {
        if self.transport.is_some() && !self.resuming {
            self.send_now(bytes, kind, stream_id);
        } else {
            self.pending.push_back(PendingFrame {
                bytes,
                kind,
                stream_id,
            });
        }
    }

    fn send_now(&mut self, bytes: Bytes, kind: FrameKind, stream_id: StreamId) {
        let Some(transport) = &self.transport else {
            return;
        };
        match transport.send(bytes.clone()) {
            Ok(()) => {
                crate::metrics::frame_sent();
                if self.resumable {
                    self.resume.track_sent_frame(&bytes, kind, stream_id);
                }
            }
            Err(_) => {
                // Writer is gone; the Closed event will arrive shortly. Keep
                // the frame so a resume can still deliver it.
                self.pending.push_back(PendingFrame {
                    bytes,
                    kind,
                    stream_id,
                });
            }
        }
    }

    /// Flush the pending queue in call order onto the bound transport.
    pub(crate) fn flush_pending(&mut self) {
        while self.transport.is_some() && !self.resuming {
            let Some(frame) = self.pending.pop_front() else {
                break;
            };
            self.send_now(frame.bytes, frame.kind, frame.stream_id);
        }
    }

    /// Replay cached frames ending after `position` straight onto the wire.
    /// Replayed bytes are already position-tracked; they are not re-recorded.
    pub(crate) fn replay_from_position(&mut self, position: u64) {
        let frames = self.resume.frames_from_position(position);
        debug!("replaying {} cached frames from position {position}", frames.len());
        if let Some(transport) = &self.transport {
            for bytes in frames {
                if transport.send(bytes).is_err() {
                    break;
                }
            }
        }
    }

    pub(crate) fn write_request_n(&mut self, stream_id: StreamId, n: u32) {
        self.output_or_enqueue(&Frame::RequestN { stream_id, n });
    }

    /// PAYLOAD frame carrying a next item, optionally completing the stream.
    pub(crate) fn write_payload(&mut self, stream_id: StreamId, payload: Payload, complete: bool) {
        self.output_or_enqueue(&Frame::Payload {
            stream_id,
            next: true,
            complete,
            payload,
        });
    }

    pub(crate) fn send_keepalive(&mut self, respond: bool) {
        let frame = Frame::Keepalive {
            respond,
            last_received_position: self.resume.implied_position(),
            data: Bytes::new(),
        };
        self.output_or_enqueue(&frame);
    }

    /// Write the wire-side close for a locally terminated stream.
    ///
    /// Connection-wide signals never produce a stream frame; callers must
    /// not pass them here.
    pub(crate) fn write_close_stream(
        &mut self,
        stream_id: StreamId,
        signal: StreamSignal,
        message: &str,
    ) {
        match signal {
            StreamSignal::Complete => {
                self.output_or_enqueue(&Frame::payload_complete(stream_id));
            }
            StreamSignal::Cancel => {
                self.output_or_enqueue(&Frame::Cancel { stream_id });
            }
            StreamSignal::Error => {
                self.output_or_enqueue(&Frame::stream_error(
                    stream_id,
                    ErrorCode::Invalid,
                    message,
                ));
            }
            StreamSignal::ApplicationError => {
                self.output_or_enqueue(&Frame::stream_error(
                    stream_id,
                    ErrorCode::ApplicationError,
                    message,
                ));
            }
            StreamSignal::ConnectionEnd
            | StreamSignal::ConnectionError
            | StreamSignal::SocketClosed => {
                debug_assert!(false, "connection signals write no stream frame");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize { self.pending.len() }

    #[cfg(test)]
    pub(crate) fn pending_frames(&self) -> Vec<Frame> {
        let serializer = self.serializer.as_deref().expect("serializer set in tests");
        self.pending
            .iter()
            .map(|frame| {
                serializer
                    .deserialize(frame.bytes.clone())
                    .expect("pending frames decode")
            })
            .collect()
    }
}
