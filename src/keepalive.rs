//! Keepalive bookkeeping.
//!
//! Pure schedule state queried by the connection actor's timer branch: when
//! to emit the next KEEPALIVE (clients only; servers just echo) and when the
//! silence has lasted long enough to count as a dead peer. Starting and
//! stopping follows the connection state: running only while CONNECTED.

use tokio::time::{Duration, Instant};

/// What the actor must do on a timer tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct KeepaliveTick {
    /// Emit KEEPALIVE(RESPOND, implied position).
    pub(crate) send: bool,
    /// The peer stayed silent past `max_lifetime`; fail the connection.
    pub(crate) timed_out: bool,
}

/// Schedule for one connection's keepalive traffic.
#[derive(Debug)]
pub(crate) struct KeepaliveSchedule {
    interval: Duration,
    max_lifetime: Duration,
    /// Clients send pings; servers only watch for echoes.
    sends_pings: bool,
    running: bool,
    next_send: Instant,
    deadline: Instant,
}

impl KeepaliveSchedule {
    pub(crate) fn new(interval: Duration, max_lifetime: Duration, sends_pings: bool) -> Self {
        let now = Instant::now();
        Self {
            interval,
            max_lifetime,
            sends_pings,
            running: false,
            next_send: now,
            deadline: now,
        }
    }

    pub(crate) fn start(&mut self, now: Instant) {
        self.running = true;
        self.next_send = now + self.interval;
        self.deadline = now + self.max_lifetime;
    }

    pub(crate) fn stop(&mut self) { self.running = false; }

    /// A KEEPALIVE acknowledgement arrived; push the liveness deadline out.
    pub(crate) fn acknowledged(&mut self, now: Instant) {
        if self.running {
            self.deadline = now + self.max_lifetime;
        }
    }

    /// The next instant the actor must wake for, if any.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        if !self.running {
            return None;
        }
        if self.sends_pings {
            Some(self.next_send.min(self.deadline))
        } else {
            Some(self.deadline)
        }
    }

    /// Resolve a wake-up at `now` into actions, advancing the send clock.
    pub(crate) fn on_tick(&mut self, now: Instant) -> KeepaliveTick {
        if !self.running {
            return KeepaliveTick::default();
        }
        let timed_out = now >= self.deadline;
        let send = self.sends_pings && now >= self.next_send;
        if send {
            self.next_send = now + self.interval;
        }
        KeepaliveTick { send, timed_out }
    }
}
