//! Credit-based flow control across a full client/server pair.

mod common;

use std::time::Duration;

use resock::{ConnectionConfig, Payload, StreamEvent, channel_subscriber};

async fn next_values(events: &mut resock::PayloadStream, count: usize) -> Vec<String> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        match events.recv().await {
            Some(StreamEvent::Next(payload)) => values.push(payload.data_utf8()),
            other => panic!("expected a payload, got {other:?}"),
        }
    }
    values
}

#[tokio::test]
async fn responder_waits_for_credits() {
    let pair = common::connect_hello(ConnectionConfig::client()).await;

    let (subscriber, mut events) = channel_subscriber();
    pair.client
        .request_stream(Payload::from("Bob"), 3, subscriber)
        .expect("stream opened");

    let Some(StreamEvent::Subscribed(subscription)) = events.recv().await else {
        panic!("expected the subscription first");
    };

    let first = next_values(&mut events, 3).await;
    assert_eq!(first, vec!["Hello Bob 1", "Hello Bob 2", "Hello Bob 3"]);

    // The responder has ten payloads ready but only three credits; nothing
    // more may arrive until we grant the rest.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), events.recv())
            .await
            .is_err()
    );

    subscription.request(7).expect("credits granted");
    let rest = next_values(&mut events, 7).await;
    assert_eq!(rest.last().map(String::as_str), Some("Hello Bob 10"));
    assert!(matches!(events.recv().await, Some(StreamEvent::Complete)));
}

#[tokio::test]
async fn zero_initial_request_is_rejected_locally() {
    let pair = common::connect_hello(ConnectionConfig::client()).await;
    let (subscriber, _events) = channel_subscriber();
    let result = pair
        .client
        .request_stream(Payload::from("Bob"), 0, subscriber);
    assert!(matches!(result, Err(resock::Error::InvalidArgument(_))));
}

#[tokio::test]
async fn cancel_stops_the_stream_with_a_single_terminal() {
    let pair = common::connect_hello(ConnectionConfig::client()).await;

    let (subscriber, mut events) = channel_subscriber();
    pair.client
        .request_stream(Payload::from("Ada"), 2, subscriber)
        .expect("stream opened");

    let Some(StreamEvent::Subscribed(subscription)) = events.recv().await else {
        panic!("expected the subscription first");
    };
    let _ = next_values(&mut events, 2).await;

    subscription.cancel();
    subscription.cancel();

    // No terminal beyond the cancellation itself: the channel just ends.
    assert!(events.recv().await.is_none());
}
