//! Bidirectional channel interaction: both halves exchange payloads under
//! their own credit flows.

use std::sync::{Arc, Mutex};

use resock::{
    Accepted, ConnectionActor, ConnectionConfig, NoopResponder, Payload, ProducerHandle,
    Responder, ServerAcceptor, StreamEvent, Subscriber, Subscription, channel_subscriber,
    transport,
};

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, entry: impl Into<String>) { self.0.lock().expect("lock").push(entry.into()); }

    fn entries(&self) -> Vec<String> { self.0.lock().expect("lock").clone() }
}

/// Server-side consumer of the requester's half: grants ten credits up
/// front and records everything.
struct RecordingSubscriber {
    log: Log,
}

impl Subscriber for RecordingSubscriber {
    fn on_subscribe(&mut self, subscription: Subscription) {
        subscription.request(10).expect("grant credits");
    }

    fn on_next(&mut self, payload: Payload) { self.log.push(payload.data_utf8()); }

    fn on_complete(&mut self) { self.log.push("complete"); }

    fn on_error(&mut self, error: resock::Error) { self.log.push(format!("error:{error}")); }
}

struct ChannelResponder {
    log: Log,
}

impl Responder for ChannelResponder {
    fn handle_request_channel(
        &mut self,
        payload: Payload,
        _initial_n: u32,
        producer: ProducerHandle,
    ) -> Option<Box<dyn Subscriber>> {
        self.log.push(format!("open:{}", payload.data_utf8()));
        producer.next(Payload::from("down 1"));
        producer.next(Payload::from("down 2"));
        producer.next(Payload::from("down 3"));
        producer.complete();
        Some(Box::new(RecordingSubscriber {
            log: self.log.clone(),
        }))
    }
}

#[tokio::test]
async fn channel_flows_in_both_directions() {
    let server_log = Log::default();
    let log = server_log.clone();
    let acceptor = ServerAcceptor::new(Box::new(move |_setup| {
        Box::new(ChannelResponder { log: log.clone() })
    }));

    let (client_transport, server_transport) = transport::in_memory_pair();
    let (client, actor) = ConnectionActor::client(
        client_transport,
        ConnectionConfig::client(),
        Box::new(NoopResponder),
    )
    .expect("client connects");
    tokio::spawn(actor.run());
    let Accepted::Connection { actor, .. } = acceptor
        .accept(server_transport)
        .await
        .expect("server accepts")
    else {
        panic!("expected a fresh connection");
    };
    tokio::spawn(actor.run());

    let (subscriber, mut events) = channel_subscriber();
    let producer = client
        .request_channel(Payload::from("chat"), 3, subscriber)
        .await
        .expect("channel opened");
    producer.next(Payload::from("up 1"));
    producer.next(Payload::from("up 2"));
    producer.complete();

    let Some(StreamEvent::Subscribed(_)) = events.recv().await else {
        panic!("expected the subscription first");
    };
    let mut received = Vec::new();
    loop {
        match events.recv().await {
            Some(StreamEvent::Next(payload)) => received.push(payload.data_utf8()),
            Some(StreamEvent::Complete) => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(received, vec!["down 1", "down 2", "down 3"]);

    // Give the server side a beat to drain the upstream half.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(
        server_log.entries(),
        vec!["open:chat", "up 1", "up 2", "complete"]
    );
}
