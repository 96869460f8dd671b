//! Building blocks shared by the automaton flavors.
//!
//! A [`Consumer`] tracks the allowance we granted the peer and owns the local
//! subscriber; a [`Publisher`] queues locally produced payloads and drains
//! them only while peer-granted credits remain, which is what structurally
//! enforces the backpressure contract.

use std::collections::VecDeque;

use crate::{
    connection::Outbound,
    error::Error,
    frame::{Payload, StreamId},
};

use super::{MAX_CREDITS, StreamSignal, Subscriber};

/// Receiving half: allowance accounting plus subscriber delivery.
pub(crate) struct Consumer {
    allowance: u32,
    subscriber: Option<Box<dyn Subscriber>>,
}

impl Consumer {
    pub(crate) fn new(subscriber: Box<dyn Subscriber>, allowance: u32) -> Self {
        Self {
            allowance: allowance.min(MAX_CREDITS),
            subscriber: Some(subscriber),
        }
    }

    /// Record `n` more credits granted to the peer, saturating.
    pub(crate) fn grant(&mut self, n: u32) {
        self.allowance = self.allowance.saturating_add(n).min(MAX_CREDITS);
    }

    /// Spend one credit for an arriving payload. `false` means the peer
    /// overran its allowance.
    pub(crate) fn try_consume(&mut self) -> bool {
        if self.allowance == 0 {
            return false;
        }
        self.allowance -= 1;
        true
    }

    pub(crate) fn next(&mut self, payload: Payload) {
        if let Some(subscriber) = &mut self.subscriber {
            subscriber.on_next(payload);
        }
    }

    /// Deliver `on_complete` once; later terminals are ignored.
    pub(crate) fn complete(&mut self) {
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber.on_complete();
        }
    }

    /// Deliver `on_error` once; later terminals are ignored.
    pub(crate) fn error(&mut self, error: Error) {
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber.on_error(error);
        }
    }

    /// Drop the subscriber without a signal: the consumer cancelled and
    /// expects silence.
    pub(crate) fn cancel(&mut self) { self.subscriber = None; }

    /// Route a generic end-of-stream signal to the right terminal.
    pub(crate) fn finish(&mut self, signal: StreamSignal) {
        match signal.to_error() {
            None if signal == StreamSignal::Complete => self.complete(),
            None => self.cancel(),
            Some(error) => self.error(error),
        }
    }
}

/// Producing half: pending queue drained against peer-granted credits.
pub(crate) struct Publisher {
    credits: u32,
    pending: VecDeque<Payload>,
    complete_queued: bool,
    finished: bool,
}

impl Publisher {
    pub(crate) fn new(initial_credits: u32) -> Self {
        Self {
            credits: initial_credits.min(MAX_CREDITS),
            pending: VecDeque::new(),
            complete_queued: false,
            finished: false,
        }
    }

    /// Add peer-granted credits, saturating.
    pub(crate) fn credit(&mut self, n: u32) {
        self.credits = self.credits.saturating_add(n).min(MAX_CREDITS);
    }

    pub(crate) fn queue_next(&mut self, payload: Payload) {
        if !self.finished && !self.complete_queued {
            self.pending.push_back(payload);
        }
    }

    pub(crate) fn queue_complete(&mut self) {
        if !self.finished {
            self.complete_queued = true;
        }
    }

    /// Stop producing without a wire terminal (peer cancel, stream error).
    pub(crate) fn abort(&mut self) {
        self.finished = true;
        self.pending.clear();
    }

    /// The terminal PAYLOAD (COMPLETE) has been written or the half was
    /// aborted.
    pub(crate) fn is_finished(&self) -> bool { self.finished }

    /// Emit queued payloads while credits remain. A queued completion rides
    /// the final payload as NEXT|COMPLETE, or goes out alone when the queue
    /// empties first.
    pub(crate) fn drain(&mut self, out: &mut Outbound, stream_id: StreamId) {
        while !self.finished && self.credits > 0 {
            let Some(payload) = self.pending.pop_front() else {
                break;
            };
            self.credits -= 1;
            let complete = self.complete_queued && self.pending.is_empty();
            out.write_payload(stream_id, payload, complete);
            if complete {
                self.finished = true;
            }
        }
        if !self.finished && self.complete_queued && self.pending.is_empty() {
            out.write_close_stream(stream_id, StreamSignal::Complete, "");
            self.finished = true;
        }
    }

    #[cfg(test)]
    pub(crate) fn credits(&self) -> u32 { self.credits }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize { self.pending.len() }
}
