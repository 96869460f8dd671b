//! Stream id allocation and peer-id registration.
//!
//! Clients issue odd ids starting at 1, servers even ids starting at 2, each
//! strictly increasing and never reused within a connection. Peer-initiated
//! ids must carry the peer's parity and strictly exceed the last accepted
//! peer id.

use crate::{config::Mode, frame::StreamId};

/// Registration verdict for a frame on an unknown stream id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PeerStreamId {
    /// A genuinely new peer stream; a responder may be created.
    New,
    /// Wrong parity or an id at or below one already seen. Frames for
    /// streams that just closed land here and are dropped silently.
    Stale,
}

/// Per-connection stream id state.
#[derive(Debug)]
pub(crate) struct StreamIds {
    next_local: StreamId,
    last_peer: StreamId,
    mode: Mode,
}

impl StreamIds {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            next_local: match mode {
                Mode::Client => 1,
                Mode::Server => 2,
            },
            last_peer: 0,
            mode,
        }
    }

    /// Allocate the next locally initiated stream id.
    pub(crate) fn next_stream_id(&mut self) -> StreamId {
        let id = self.next_local;
        self.next_local += 2;
        id
    }

    /// Validate and record a peer-initiated stream id.
    pub(crate) fn register_peer_stream_id(&mut self, id: StreamId) -> PeerStreamId {
        let peer_parity = match self.mode {
            // Peer of a client is a server: even ids.
            Mode::Client => 0,
            Mode::Server => 1,
        };
        if id % 2 != peer_parity {
            return PeerStreamId::Stale;
        }
        if id <= self.last_peer {
            return PeerStreamId::Stale;
        }
        self.last_peer = id;
        PeerStreamId::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_allocates_odd_ids_from_one() {
        let mut ids = StreamIds::new(Mode::Client);
        assert_eq!(ids.next_stream_id(), 1);
        assert_eq!(ids.next_stream_id(), 3);
        assert_eq!(ids.next_stream_id(), 5);
    }

    #[test]
    fn server_allocates_even_ids_from_two() {
        let mut ids = StreamIds::new(Mode::Server);
        assert_eq!(ids.next_stream_id(), 2);
        assert_eq!(ids.next_stream_id(), 4);
    }

    #[test]
    fn peer_ids_must_match_parity() {
        let mut server_side = StreamIds::new(Mode::Server);
        assert_eq!(server_side.register_peer_stream_id(1), PeerStreamId::New);
        assert_eq!(server_side.register_peer_stream_id(4), PeerStreamId::Stale);

        let mut client_side = StreamIds::new(Mode::Client);
        assert_eq!(client_side.register_peer_stream_id(2), PeerStreamId::New);
        assert_eq!(client_side.register_peer_stream_id(3), PeerStreamId::Stale);
    }

    #[test]
    fn peer_ids_must_strictly_increase() {
        let mut ids = StreamIds::new(Mode::Server);
        assert_eq!(ids.register_peer_stream_id(5), PeerStreamId::New);
        assert_eq!(ids.register_peer_stream_id(5), PeerStreamId::Stale);
        assert_eq!(ids.register_peer_stream_id(3), PeerStreamId::Stale);
        assert_eq!(ids.register_peer_stream_id(7), PeerStreamId::New);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Local ids keep role parity and strictly increase; accepted
            /// peer ids strictly increase too.
            #[test]
            fn allocation_and_registration_invariants(
                client_role in proptest::bool::ANY,
                locals in 1usize..64,
                peers in prop::collection::vec(1u32..1024, 0..64),
            ) {
                let mode = if client_role { Mode::Client } else { Mode::Server };
                let mut ids = StreamIds::new(mode);
                let parity = if client_role { 1 } else { 0 };

                let mut previous = 0;
                for _ in 0..locals {
                    let id = ids.next_stream_id();
                    prop_assert_eq!(id % 2, parity);
                    prop_assert!(id > previous);
                    previous = id;
                }

                let mut last_accepted = 0;
                for peer in peers {
                    if ids.register_peer_stream_id(peer) == PeerStreamId::New {
                        prop_assert_eq!(peer % 2, 1 - parity);
                        prop_assert!(peer > last_accepted);
                        last_accepted = peer;
                    }
                }
            }
        }
    }
}
