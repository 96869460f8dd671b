//! Bridging between subscriber callbacks and async consumers.
//!
//! The automatons call [`Subscriber`](super::Subscriber) methods
//! synchronously on the connection actor. [`channel_subscriber`] adapts that
//! capability set onto a channel so application tasks can consume a stream
//! with `async`/`await` or as a [`futures::Stream`].

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::{connection::Subscription, error::Error, frame::Payload};

use super::Subscriber;

/// Signals observed by a bridged subscriber, in delivery order.
#[derive(Debug)]
pub enum StreamEvent {
    /// The stream was wired up; use the subscription for credits and cancel.
    Subscribed(Subscription),
    Next(Payload),
    Complete,
    Error(Error),
}

/// A [`Subscriber`] that forwards every signal into an unbounded channel.
struct ChannelSubscriber {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl Subscriber for ChannelSubscriber {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let _ = self.events.send(StreamEvent::Subscribed(subscription));
    }

    fn on_next(&mut self, payload: Payload) {
        let _ = self.events.send(StreamEvent::Next(payload));
    }

    fn on_complete(&mut self) {
        let _ = self.events.send(StreamEvent::Complete);
    }

    fn on_error(&mut self, error: Error) {
        let _ = self.events.send(StreamEvent::Error(error));
    }
}

/// Receiver half of a bridged subscriber.
///
/// Yields events in delivery order; after `Complete` or `Error` nothing else
/// arrives. Also usable directly via [`PayloadStream::recv`].
#[derive(Debug)]
pub struct PayloadStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl PayloadStream {
    /// Await the next stream event, or `None` once the sending side is gone.
    pub async fn recv(&mut self) -> Option<StreamEvent> { self.events.recv().await }
}

impl Stream for PayloadStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// Build a channel-backed subscriber plus the stream of its events.
#[must_use]
pub fn channel_subscriber() -> (Box<dyn Subscriber>, PayloadStream) {
    let (events, receiver) = mpsc::unbounded_channel();
    (
        Box::new(ChannelSubscriber { events }),
        PayloadStream { events: receiver },
    )
}
