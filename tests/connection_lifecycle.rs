//! Connection-level protocol discipline, driven over a hand-operated wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use resock::{
    Accepted, ConnectionActor, ConnectionConfig, ConnectionHandle, ErrorCode, Frame, FrameKind,
    FrameTransport, NoopResponder, Payload, ProtocolVersion, Responder, Serializer, SerializerV1,
    ServerAcceptor, TransportEvent,
};

fn observable_transport() -> (
    FrameTransport,
    mpsc::UnboundedReceiver<Bytes>,
    mpsc::Sender<TransportEvent>,
) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(16);
    (
        FrameTransport::new(out_tx, event_rx, true, CancellationToken::new()),
        out_rx,
        event_tx,
    )
}

fn setup_bytes() -> Bytes {
    SerializerV1.serialize(
        &Frame::Setup {
            version: ProtocolVersion::CURRENT,
            keepalive_interval_ms: 60_000,
            max_lifetime_ms: 300_000,
            resume_token: None,
            metadata_mime_type: "application/octet-stream".into(),
            data_mime_type: "application/octet-stream".into(),
            payload: Payload::empty(),
        },
        false,
    )
}

async fn accept_raw(
    acceptor: &ServerAcceptor,
) -> (
    ConnectionHandle,
    mpsc::UnboundedReceiver<Bytes>,
    mpsc::Sender<TransportEvent>,
) {
    let (transport, wire, events) = observable_transport();
    events
        .send(TransportEvent::Frame(setup_bytes()))
        .await
        .expect("setup delivered");
    let Accepted::Connection { handle, actor, .. } =
        acceptor.accept(transport).await.expect("accepted")
    else {
        panic!("expected a fresh connection");
    };
    tokio::spawn(actor.run());
    (handle, wire, events)
}

#[tokio::test]
async fn payload_on_unknown_stream_is_a_connection_error() {
    let acceptor = ServerAcceptor::new(Box::new(|_setup| Box::new(NoopResponder)));
    let (handle, mut wire, events) = accept_raw(&acceptor).await;

    let rogue = SerializerV1.serialize(
        &Frame::Payload {
            stream_id: 99,
            next: true,
            complete: false,
            payload: Payload::from("ghost"),
        },
        false,
    );
    events
        .send(TransportEvent::Frame(rogue))
        .await
        .expect("frame delivered");

    handle.closed().await;
    let bytes = wire.recv().await.expect("error frame on the wire");
    let Frame::Error {
        stream_id,
        code,
        message,
    } = SerializerV1.deserialize(bytes).expect("decodes")
    else {
        panic!("expected an ERROR frame");
    };
    assert_eq!(stream_id, 0);
    assert_eq!(code, ErrorCode::ConnectionError);
    assert!(String::from_utf8_lossy(&message).contains("stream 99"));
}

#[tokio::test]
async fn unknown_frame_kinds_are_ignored_off_stream_zero() {
    let acceptor = ServerAcceptor::new(Box::new(|_setup| Box::new(NoopResponder)));
    let (handle, _wire, events) = accept_raw(&acceptor).await;

    // Kind code 0x1b does not exist in protocol 1.0.
    let mut unknown = vec![0, 0, 0, 5];
    unknown.extend_from_slice(&((0x1b_u16) << 10).to_be_bytes());
    events
        .send(TransportEvent::Frame(Bytes::from(unknown)))
        .await
        .expect("frame delivered");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_closed());
}

#[tokio::test]
async fn error_frame_on_stream_zero_closes_the_client() {
    let (transport, _wire, events) = observable_transport();
    let (client, actor) = ConnectionActor::client(
        transport,
        ConnectionConfig::client(),
        Box::new(NoopResponder),
    )
    .expect("client connects");
    tokio::spawn(actor.run());

    let error = SerializerV1.serialize(
        &Frame::connection_error(ErrorCode::ConnectionError, "go away"),
        false,
    );
    events
        .send(TransportEvent::Frame(error))
        .await
        .expect("frame delivered");
    client.closed().await;
}

#[tokio::test]
async fn transport_loss_closes_a_non_resumable_connection() {
    let (transport, _wire, events) = observable_transport();
    let (client, actor) = ConnectionActor::client(
        transport,
        ConnectionConfig::client(),
        Box::new(NoopResponder),
    )
    .expect("client connects");
    tokio::spawn(actor.run());

    events
        .send(TransportEvent::Closed(Some("cable cut".into())))
        .await
        .expect("terminal delivered");
    client.closed().await;
}

#[tokio::test]
async fn metadata_push_reaches_the_responder() {
    struct MetadataSink(Arc<Mutex<Vec<Bytes>>>);
    impl Responder for MetadataSink {
        fn handle_metadata_push(&mut self, metadata: Bytes) {
            self.0.lock().expect("lock").push(metadata);
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let acceptor = ServerAcceptor::new(Box::new(move |_setup| {
        Box::new(MetadataSink(Arc::clone(&sink)))
    }));
    let (handle, _wire, events) = accept_raw(&acceptor).await;

    let push = SerializerV1.serialize(
        &Frame::MetadataPush {
            metadata: Bytes::from_static(b"routing-info"),
        },
        false,
    );
    events
        .send(TransportEvent::Frame(push))
        .await
        .expect("frame delivered");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().expect("lock").first().map(|b| b.as_ref().to_vec()), Some(b"routing-info".to_vec()));
    assert!(!handle.is_closed());
}

#[tokio::test]
async fn acceptor_rejects_a_non_setup_opening() {
    let acceptor = ServerAcceptor::new(Box::new(|_setup| Box::new(NoopResponder)));
    let (transport, _wire, events) = observable_transport();
    let keepalive = SerializerV1.serialize(
        &Frame::Keepalive {
            respond: true,
            last_received_position: 0,
            data: Bytes::new(),
        },
        false,
    );
    events
        .send(TransportEvent::Frame(keepalive))
        .await
        .expect("frame delivered");
    let outcome = acceptor.accept(transport).await;
    assert!(matches!(
        outcome,
        Err(resock::Error::ProtocolVersionMismatch(_))
    ));
}
