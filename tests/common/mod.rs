//! Shared plumbing for the integration tests: an in-process client/server
//! pair wired over the in-memory transport, plus stock responders.
#![allow(dead_code)]

use std::sync::Arc;

use resock::{
    Accepted, ConnectionActor, ConnectionConfig, ConnectionHandle, NoopResponder, Payload,
    ProducerHandle, Responder, ServerAcceptor, transport,
};

/// Responder mirroring a small greeting service: request-response answers
/// "ping" with "pong", request-stream emits ten greetings.
pub struct HelloServiceResponder;

impl Responder for HelloServiceResponder {
    fn handle_request_response(&mut self, payload: Payload, producer: ProducerHandle) {
        if payload.data_utf8() == "ping" {
            producer.next(Payload::from("pong"));
        } else {
            producer.error(format!("unknown request {}", payload.data_utf8()));
        }
    }

    fn handle_request_stream(
        &mut self,
        payload: Payload,
        _initial_n: u32,
        producer: ProducerHandle,
    ) {
        let name = payload.data_utf8();
        for i in 1..=10 {
            producer.next(Payload::from(format!("Hello {name} {i}").as_str()));
        }
        producer.complete();
    }
}

/// A connected client/server pair, both actors spawned.
pub struct Pair {
    pub client: ConnectionHandle,
    pub server: ConnectionHandle,
    pub acceptor: Arc<ServerAcceptor>,
}

/// Connect a client with `config` to a fresh server running
/// [`HelloServiceResponder`].
pub async fn connect_hello(config: ConnectionConfig) -> Pair {
    let acceptor = Arc::new(ServerAcceptor::new(Box::new(|_setup| {
        Box::new(HelloServiceResponder)
    })));
    connect_with(config, acceptor).await
}

/// Connect a client to an existing acceptor over a fresh in-memory pair.
pub async fn connect_with(config: ConnectionConfig, acceptor: Arc<ServerAcceptor>) -> Pair {
    let (client_transport, server_transport) = transport::in_memory_pair();
    let (client, client_actor) =
        ConnectionActor::client(client_transport, config, Box::new(NoopResponder))
            .expect("client connects");
    tokio::spawn(client_actor.run());

    let accepted = acceptor
        .accept(server_transport)
        .await
        .expect("server accepts");
    let server = match accepted {
        Accepted::Connection { handle, actor, .. } => {
            tokio::spawn(actor.run());
            handle
        }
        Accepted::Resumed { handle } => handle,
    };
    Pair {
        client,
        server,
        acceptor,
    }
}
