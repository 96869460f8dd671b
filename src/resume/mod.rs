//! Resumption subsystem.
//!
//! A resumable connection counts the serialized bytes of every stream frame
//! it sends (`sent_position`) and receives (`implied_position`), and keeps a
//! bounded ring of sent frames keyed by the position at which each one ended.
//! After a reconnect the peers exchange positions and the ring is replayed
//! from the peer's last-received position, giving lossless continuation as
//! long as nothing needed was evicted.

mod store;

pub use store::SessionStore;

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bytes::Bytes;
use log::debug;
use rand::RngCore;

use crate::frame::{FrameKind, StreamId};

/// Byte position within the resumable-frame flow. The sentinel
/// [`UNSPECIFIED_POSITION`] means "no constraint".
pub type ResumePosition = u64;

/// Position value meaning the sender imposes no constraint.
pub const UNSPECIFIED_POSITION: ResumePosition = u64::MAX;

/// Default bound on cached outbound bytes.
pub const DEFAULT_CACHE_LIMIT: usize = 2 * 1024 * 1024;

/// Opaque token identifying a resumable session.
///
/// Supplied by the client in SETUP (RESUME_ENABLE) and echoed in RESUME; the
/// server keys its session store by it.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ResumeToken(Bytes);

impl ResumeToken {
    /// Wrap existing token bytes. Tokens longer than `u16::MAX` do not fit
    /// the wire format and are truncated by the codec, so keep them short.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self { Self(bytes.into()) }

    /// Generate a fresh 16-byte random token.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Self(Bytes::copy_from_slice(&bytes))
    }

    /// The raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] { &self.0 }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResumeToken(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// One sent frame retained for replay.
#[derive(Clone, Debug)]
struct CachedFrame {
    /// `sent_position` immediately after this frame's bytes.
    end_position: ResumePosition,
    stream_id: StreamId,
    kind: FrameKind,
    bytes: Bytes,
}

/// Tracks positions and caches sent frames for a single connection.
///
/// Owned by the connection state machine and touched only from its actor, so
/// no interior locking. State survives disconnects; it is discarded with the
/// connection itself.
#[derive(Debug)]
pub struct ResumeManager {
    cache: VecDeque<CachedFrame>,
    cached_bytes: usize,
    cache_limit: usize,
    first_sent_position: ResumePosition,
    sent_position: ResumePosition,
    implied_position: ResumePosition,
    /// Per stream, the largest end-position force-evicted by the capacity
    /// bound. Streams with an entry above the peer's position are dirty.
    evicted: HashMap<StreamId, ResumePosition>,
}

impl ResumeManager {
    #[must_use]
    pub fn new(cache_limit: usize) -> Self {
        Self {
            cache: VecDeque::new(),
            cached_bytes: 0,
            cache_limit,
            first_sent_position: 0,
            sent_position: 0,
            implied_position: 0,
            evicted: HashMap::new(),
        }
    }

    /// Count of resumable bytes received from the peer.
    #[must_use]
    pub fn implied_position(&self) -> ResumePosition { self.implied_position }

    /// Count of resumable bytes sent to the peer.
    #[must_use]
    pub fn sent_position(&self) -> ResumePosition { self.sent_position }

    /// Position at which the oldest cached frame starts.
    #[must_use]
    pub fn first_sent_position(&self) -> ResumePosition { self.first_sent_position }

    /// Record an outbound frame. Non-resumable kinds are ignored.
    pub fn track_sent_frame(&mut self, bytes: &Bytes, kind: FrameKind, stream_id: StreamId) {
        if !kind.is_resumable() {
            return;
        }
        self.sent_position += bytes.len() as u64;
        self.cached_bytes += bytes.len();
        self.cache.push_back(CachedFrame {
            end_position: self.sent_position,
            stream_id,
            kind,
            bytes: bytes.clone(),
        });
        while self.cached_bytes > self.cache_limit {
            let Some(frame) = self.cache.pop_front() else {
                break;
            };
            self.cached_bytes -= frame.bytes.len();
            self.first_sent_position = frame.end_position;
            let dirty_mark = self.evicted.entry(frame.stream_id).or_insert(0);
            *dirty_mark = (*dirty_mark).max(frame.end_position);
            debug!(
                "resume cache overflow, evicted frame ending at {} (stream {})",
                frame.end_position, frame.stream_id
            );
        }
    }

    /// Record an inbound frame. Non-resumable kinds are ignored.
    pub fn track_received_frame(&mut self, frame_len: usize, kind: FrameKind) {
        if kind.is_resumable() {
            self.implied_position += frame_len as u64;
        }
    }

    /// Drop cached frames the peer acknowledged receiving. Monotonic: the
    /// first position never moves backwards.
    pub fn reset_up_to(&mut self, position: ResumePosition) {
        if position == UNSPECIFIED_POSITION || position <= self.first_sent_position {
            return;
        }
        let position = position.min(self.sent_position);
        while let Some(front) = self.cache.front() {
            if front.end_position > position {
                break;
            }
            let frame_len = front.bytes.len();
            self.cache.pop_front();
            self.cached_bytes -= frame_len;
        }
        self.first_sent_position = position;
    }

    /// Whether replay can start at `position`: it lies inside the cached
    /// window and falls on a frame boundary.
    #[must_use]
    pub fn is_position_available(&self, position: ResumePosition) -> bool {
        if position == self.first_sent_position || position == self.sent_position {
            return true;
        }
        if position < self.first_sent_position || position > self.sent_position {
            return false;
        }
        self.cache
            .binary_search_by(|frame| frame.end_position.cmp(&position))
            .is_ok()
    }

    /// Whether every frame of `stream_id` after `position` is still cached.
    /// Drives clean/dirty stream classification on server resume.
    #[must_use]
    pub fn is_position_available_for_stream(
        &self,
        position: ResumePosition,
        stream_id: StreamId,
    ) -> bool {
        self.evicted
            .get(&stream_id)
            .is_none_or(|largest_evicted| *largest_evicted <= position)
    }

    /// Replay, in original order, every cached frame ending after `position`.
    /// Returns the replayed frames; the caller writes them to the transport.
    #[must_use]
    pub fn frames_from_position(&self, position: ResumePosition) -> Vec<Bytes> {
        let start = self
            .cache
            .partition_point(|frame| frame.end_position <= position);
        self.cache
            .iter()
            .skip(start)
            .map(|frame| frame.bytes.clone())
            .collect()
    }

    /// Drop per-stream bookkeeping. Cached bytes stay until `reset_up_to`
    /// passes them.
    pub fn on_stream_closed(&mut self, stream_id: StreamId) { self.evicted.remove(&stream_id); }

    #[cfg(test)]
    pub(crate) fn cached_frame_count(&self) -> usize { self.cache.len() }
}

impl Default for ResumeManager {
    fn default() -> Self { Self::new(DEFAULT_CACHE_LIMIT) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(len: usize) -> Bytes { Bytes::from(vec![0u8; len]) }

    #[test]
    fn sent_position_advances_for_stream_frames_only() {
        let mut manager = ResumeManager::default();
        manager.track_sent_frame(&frame_bytes(10), FrameKind::Payload, 1);
        manager.track_sent_frame(&frame_bytes(99), FrameKind::Keepalive, 0);
        manager.track_sent_frame(&frame_bytes(5), FrameKind::RequestN, 1);
        assert_eq!(manager.sent_position(), 15);
        assert_eq!(manager.cached_frame_count(), 2);
    }

    #[test]
    fn implied_position_advances_for_stream_frames_only() {
        let mut manager = ResumeManager::default();
        manager.track_received_frame(10, FrameKind::Payload);
        manager.track_received_frame(50, FrameKind::Setup);
        manager.track_received_frame(7, FrameKind::Cancel);
        assert_eq!(manager.implied_position(), 17);
    }

    #[test]
    fn positions_on_frame_boundaries_are_available() {
        let mut manager = ResumeManager::default();
        manager.track_sent_frame(&frame_bytes(10), FrameKind::Payload, 1);
        manager.track_sent_frame(&frame_bytes(6), FrameKind::Payload, 1);
        assert!(manager.is_position_available(0));
        assert!(manager.is_position_available(10));
        assert!(manager.is_position_available(16));
        assert!(!manager.is_position_available(3));
        assert!(!manager.is_position_available(17));
    }

    #[test]
    fn reset_up_to_is_monotonic() {
        let mut manager = ResumeManager::default();
        manager.track_sent_frame(&frame_bytes(10), FrameKind::Payload, 1);
        manager.track_sent_frame(&frame_bytes(10), FrameKind::Payload, 1);
        manager.reset_up_to(10);
        assert_eq!(manager.first_sent_position(), 10);
        manager.reset_up_to(4);
        assert_eq!(manager.first_sent_position(), 10);
        manager.reset_up_to(UNSPECIFIED_POSITION);
        assert_eq!(manager.first_sent_position(), 10);
        assert_eq!(manager.cached_frame_count(), 1);
    }

    #[test]
    fn replay_returns_frames_after_position_in_order() {
        let mut manager = ResumeManager::default();
        manager.track_sent_frame(&Bytes::from_static(b"aaaa"), FrameKind::Payload, 1);
        manager.track_sent_frame(&Bytes::from_static(b"bbbb"), FrameKind::Payload, 1);
        manager.track_sent_frame(&Bytes::from_static(b"cc"), FrameKind::Cancel, 3);
        let replayed = manager.frames_from_position(4);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].as_ref(), b"bbbb");
        assert_eq!(replayed[1].as_ref(), b"cc");
        assert!(manager.frames_from_position(10).is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_and_marks_stream_dirty() {
        let mut manager = ResumeManager::new(8);
        manager.track_sent_frame(&frame_bytes(4), FrameKind::Payload, 1);
        manager.track_sent_frame(&frame_bytes(4), FrameKind::Payload, 2);
        manager.track_sent_frame(&frame_bytes(4), FrameKind::Payload, 2);
        // Stream 1's only frame (ending at 4) was evicted.
        assert_eq!(manager.first_sent_position(), 4);
        assert!(!manager.is_position_available(0));
        assert!(!manager.is_position_available_for_stream(0, 1));
        assert!(manager.is_position_available_for_stream(4, 1));
        assert!(manager.is_position_available_for_stream(0, 2));
    }

    #[test]
    fn stream_close_drops_dirty_bookkeeping() {
        let mut manager = ResumeManager::new(2);
        manager.track_sent_frame(&frame_bytes(4), FrameKind::Payload, 1);
        assert!(!manager.is_position_available_for_stream(0, 1));
        manager.on_stream_closed(1);
        assert!(manager.is_position_available_for_stream(0, 1));
    }

    #[test]
    fn generated_tokens_are_distinct() {
        assert_ne!(ResumeToken::generate(), ResumeToken::generate());
        assert_eq!(ResumeToken::generate().as_bytes().len(), 16);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// The first cached position never decreases, whatever mix of
            /// tracking and acknowledgement arrives.
            #[test]
            fn reset_up_to_is_monotone(ops in prop::collection::vec((0u8..2, 1usize..64), 1..64)) {
                let mut manager = ResumeManager::new(512);
                let mut last_first = 0;
                for (op, size) in ops {
                    if op == 0 {
                        manager.track_sent_frame(&frame_bytes(size), FrameKind::Payload, 1);
                    } else {
                        manager.reset_up_to(size as u64 * 7);
                    }
                    prop_assert!(manager.first_sent_position() >= last_first);
                    prop_assert!(manager.first_sent_position() <= manager.sent_position());
                    last_first = manager.first_sent_position();
                }
            }

            /// Replaying from any cached boundary hands back exactly the
            /// bytes between that boundary and the send position.
            #[test]
            fn replay_is_complete(sizes in prop::collection::vec(1usize..32, 1..32), pick in 0usize..32) {
                let mut manager = ResumeManager::new(usize::MAX);
                let mut boundaries = vec![0u64];
                for (i, size) in sizes.iter().enumerate() {
                    manager.track_sent_frame(&frame_bytes(*size), FrameKind::Payload, (i % 3) as u32);
                    boundaries.push(manager.sent_position());
                }
                let position = boundaries[pick % boundaries.len()];
                prop_assert!(manager.is_position_available(position));
                let replayed: u64 = manager
                    .frames_from_position(position)
                    .iter()
                    .map(|bytes| bytes.len() as u64)
                    .sum();
                prop_assert_eq!(position + replayed, manager.sent_position());
            }
        }
    }
}
