//! The duplex transport seam.
//!
//! The engine does not open sockets. A transport implementation hands the
//! connection a [`FrameTransport`]: an outbound sender taking serialized
//! frames and an inbound receiver yielding [`TransportEvent`]s: whole frames
//! in arrival order, then exactly one `Closed`. The wire-side tasks apply
//! real socket backpressure; the outbound sender is the connection's send
//! queue.
//!
//! Byte-stream wires (TCP and friends) do not preserve frame boundaries, so
//! each frame travels behind a 24-bit big-endian length prefix; message
//! transports set `framed` and skip the prefix. [`LengthPrefixedFraming`]
//! implements the prefix discipline for wire adapters.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Largest frame representable behind the 24-bit length prefix.
pub const MAX_FRAME_LEN: usize = 0x00ff_ffff;

/// Capacity of the inbound event channel; a slow connection back-pressures
/// the wire reader through it.
pub const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Events a transport delivers to the connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// One serialized frame, boundaries preserved, no length prefix.
    Frame(Bytes),
    /// Terminal signal: the wire is gone, with an error description if the
    /// loss was not clean. Nothing follows it.
    Closed(Option<String>),
}

/// A bound duplex transport as seen by the connection.
#[derive(Debug)]
pub struct FrameTransport {
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    framed: bool,
    cancel: CancellationToken,
}

impl FrameTransport {
    /// Assemble a transport from its halves. `cancel` is cancelled when the
    /// connection releases the transport; wire tasks should stop on it.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::Receiver<TransportEvent>,
        framed: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outbound,
            inbound: Some(inbound),
            framed,
            cancel,
        }
    }

    /// Whether the wire preserves frame boundaries itself.
    #[must_use]
    pub fn is_framed(&self) -> bool { self.framed }

    /// Take the inbound event receiver. The connection actor takes it once
    /// when binding.
    pub(crate) fn take_inbound(&mut self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.inbound.take()
    }

    /// Hand the inbound receiver back after peeking leading frames; the
    /// acceptance layer reads SETUP/RESUME before a connection exists.
    pub(crate) fn set_inbound(&mut self, inbound: mpsc::Receiver<TransportEvent>) {
        self.inbound = Some(inbound);
    }

    /// Queue one serialized frame for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] when the wire writer is gone.
    pub fn send(&self, frame: Bytes) -> Result<()> {
        self.outbound
            .send(frame)
            .map_err(|_| Error::TransportClosed)
    }

    /// Release the transport, ending output and stopping wire tasks.
    pub fn close(self) {
        self.cancel.cancel();
    }

    /// Release the transport after a failure. The error is recorded for the
    /// wire adapter's benefit; the wire-level teardown is identical.
    pub fn close_with_error(self, error: &Error) {
        debug!("closing transport after error: {error}");
        self.cancel.cancel();
    }
}

/// Length-prefix framing for byte-stream wires.
///
/// Prepends each frame with its length as an unsigned 24-bit big-endian
/// integer and reassembles whole frames on the way in.
#[derive(Clone, Copy, Debug, Default)]
pub struct LengthPrefixedFraming;

impl LengthPrefixedFraming {
    const PREFIX_LEN: usize = 3;

    /// Append `frame` to `dst` behind its length prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] when the frame exceeds
    /// [`MAX_FRAME_LEN`].
    pub fn encode(&self, frame: &[u8], dst: &mut BytesMut) -> Result<()> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::InvalidFrame(format!(
                "frame of {} bytes exceeds the 24-bit length prefix",
                frame.len()
            )));
        }
        dst.reserve(Self::PREFIX_LEN + frame.len());
        dst.put_u8((frame.len() >> 16) as u8);
        dst.put_u8((frame.len() >> 8) as u8);
        dst.put_u8(frame.len() as u8);
        dst.extend_from_slice(frame);
        Ok(())
    }

    /// Split the next whole frame off `src`, or `None` until more bytes
    /// arrive.
    pub fn decode(&self, src: &mut BytesMut) -> Option<Bytes> {
        if src.len() < Self::PREFIX_LEN {
            return None;
        }
        let len = (usize::from(src[0]) << 16) | (usize::from(src[1]) << 8) | usize::from(src[2]);
        if src.len() < Self::PREFIX_LEN + len {
            return None;
        }
        src.advance(Self::PREFIX_LEN);
        Some(src.split_to(len).freeze())
    }
}

/// An in-process duplex pair: frames sent on one side arrive on the other.
///
/// Reference adapter for tests and examples; it preserves frame boundaries,
/// so both sides report `is_framed`. Dropping or closing one side delivers
/// `Closed(None)` to its peer. Must be called within a tokio runtime.
#[must_use]
pub fn in_memory_pair() -> (FrameTransport, FrameTransport) {
    let (out_a, from_a) = mpsc::unbounded_channel();
    let (out_b, from_b) = mpsc::unbounded_channel();
    let (into_a, events_a) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let (into_b, events_b) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
    let cancel_a = CancellationToken::new();
    let cancel_b = CancellationToken::new();

    tokio::spawn(forward(from_a, into_b, cancel_b.clone()));
    tokio::spawn(forward(from_b, into_a, cancel_a.clone()));

    (
        FrameTransport::new(out_a, events_a, true, cancel_a),
        FrameTransport::new(out_b, events_b, true, cancel_b),
    )
}

/// Pump one direction of an in-memory pair until the sender closes or the
/// receiving side's transport is released.
async fn forward(
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::Sender<TransportEvent>,
    receiver_gone: CancellationToken,
) {
    loop {
        tokio::select! {
            () = receiver_gone.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if events.send(TransportEvent::Frame(frame)).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = events.send(TransportEvent::Closed(None)).await;
                    break;
                }
            },
        }
    }
}
