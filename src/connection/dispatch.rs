//! Inbound frame dispatch.
//!
//! One entry point, [`ConnectionCore::process_frame`], applies the dispatch
//! discipline: detect the serializer on the first server-side frame, peek
//! the kind and stream id without decoding, advance the resume tracker,
//! route stream 0 to the connection handler, guard the resume handshake,
//! and hand stream frames to their automatons.

use bytes::Bytes;
use log::debug;

use crate::{
    error::ErrorCode,
    frame::{Frame, FrameKind},
    serializer::autodetect,
};

use super::core::ConnectionCore;

impl ConnectionCore {
    /// Process one inbound serialized frame.
    pub(crate) fn process_frame(&mut self, bytes: Bytes) {
        if self.is_closed() {
            return;
        }
        crate::metrics::frame_received();

        if !self.ensure_serializer(&bytes) {
            self.close_with_error(Frame::connection_error(
                ErrorCode::ConnectionError,
                "cannot detect protocol version",
            ));
            return;
        }

        let (kind, stream_id) = match self.out.serializer() {
            Some(serializer) => (
                serializer.peek_kind(&bytes),
                serializer.peek_stream_id(&bytes),
            ),
            None => return,
        };
        let Some(stream_id) = stream_id else {
            self.close_with_error(Frame::connection_error(
                ErrorCode::ConnectionError,
                "cannot decode stream id",
            ));
            return;
        };
        let Some(kind) = kind else {
            // Kind codes from future revisions are skipped, except on the
            // connection stream where nothing unknown is tolerated.
            if stream_id == 0 {
                self.close_with_error(Frame::connection_error(
                    ErrorCode::ConnectionError,
                    "unexpected frame for stream 0",
                ));
            } else {
                debug!("ignoring frame of unknown kind for stream {stream_id}");
            }
            return;
        };

        self.out
            .resume_mut()
            .track_received_frame(bytes.len(), kind);

        if matches!(kind, FrameKind::Ext | FrameKind::Reserved) {
            if stream_id == 0 {
                self.close_with_error(Frame::connection_error(
                    ErrorCode::ConnectionError,
                    format!("unexpected {kind:?} frame for stream 0"),
                ));
            } else {
                debug!("ignoring {kind:?} frame for stream {stream_id}");
            }
            return;
        }

        let frame = match self.out.serializer() {
            Some(serializer) => serializer.deserialize(bytes),
            None => return,
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                self.close_with_error(Frame::connection_error(
                    ErrorCode::ConnectionError,
                    format!("invalid frame: {error}"),
                ));
                return;
            }
        };
        debug!("in: {frame:?}");

        if stream_id == 0 {
            self.handle_connection_frame(frame);
            return;
        }

        // While the resume handshake is in flight only connection frames may
        // move.
        if self.out.is_resuming() {
            self.close_with_error(Frame::connection_error(
                ErrorCode::ConnectionError,
                "received stream frame while resuming",
            ));
            return;
        }

        if self.streams.contains_key(&stream_id) {
            self.handle_stream_frame(stream_id, frame);
        } else {
            self.handle_unknown_stream(stream_id, frame);
        }
    }

    /// Make sure a serializer is set, autodetecting from the first frame on
    /// servers. Clients are always constructed with one.
    fn ensure_serializer(&mut self, first_frame: &[u8]) -> bool {
        if self.out.has_serializer() {
            return true;
        }
        match autodetect(first_frame) {
            Some(serializer) => {
                debug!(
                    "detected protocol version {}",
                    serializer.protocol_version()
                );
                self.out.set_serializer(serializer);
                true
            }
            None => false,
        }
    }
}
