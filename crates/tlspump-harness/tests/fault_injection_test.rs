//! Fault handling: end of stream, timeouts, protocol violations.
//!
//! Each test drives one endpoint against a raw peer transport so the fault
//! can be injected at an exact point of the handshake.

use std::sync::Arc;

use tlspump_core::{
    Endpoint, EndpointConfig, InlineExecutor, Phase, Role, Transport, TransportError,
};
use tlspump_harness::{
    Mailbox, MemoryTransport, ToyEngine,
    toy_engine::{HEADER_LEN, RecordKind, encode_record},
};

struct Harnessed {
    endpoint: Endpoint<ToyEngine, MemoryTransport>,
    mailbox: Mailbox,
    probe: Arc<tlspump_harness::EngineProbe>,
}

fn harnessed(role: Role, transport: MemoryTransport) -> Harnessed {
    let engine = ToyEngine::new(role);
    let probe = engine.probe();
    let mailbox = Mailbox::new();
    let endpoint = Endpoint::new(
        EndpointConfig::new(role).with_name("under-test").with_verbose(true),
        engine,
        transport,
        Arc::new(InlineExecutor),
        mailbox.consumer(),
        mailbox.producer(),
    );
    Harnessed { endpoint, mailbox, probe }
}

fn server(transport: MemoryTransport) -> Harnessed {
    harnessed(Role::Server, transport)
}

#[test]
fn end_of_stream_mid_handshake_closes_once() {
    let (transport, peer) = MemoryTransport::pair();
    let server = server(transport);
    server.endpoint.start();

    peer.inject(&encode_record(RecordKind::Hello, b"hello"));
    assert_eq!(server.endpoint.phase(), Phase::InitialHandshake);

    // Server answered and now waits for Finished
    let reply = peer.drain();
    assert_eq!(reply[0], RecordKind::HelloReply as u8);

    peer.close();

    assert!(server.endpoint.is_closed());
    assert!(server.endpoint.inbound_closed());
    assert!(server.endpoint.outbound_closed());
    assert_eq!(server.probe.close_inbound_calls(), 1);
    assert_eq!(server.probe.close_outbound_calls(), 1);
}

#[test]
fn end_of_stream_before_any_bytes() {
    let (transport, peer) = MemoryTransport::pair();
    let server = server(transport);
    server.endpoint.start();

    peer.close();

    assert!(server.endpoint.is_closed());
    assert_eq!(server.probe.close_inbound_calls(), 1);
}

#[test]
fn read_timeout_closes_endpoint() {
    let (transport, _peer) = MemoryTransport::pair();
    transport.fail_next_read(TransportError::TimedOut);
    let server = server(transport);

    server.endpoint.start();

    assert!(server.endpoint.is_closed());
    assert!(server.endpoint.inbound_closed());
    assert!(server.endpoint.outbound_closed());
    assert_eq!(server.probe.close_inbound_calls(), 1);
}

#[test]
fn unknown_record_is_fatal() {
    let (transport, peer) = MemoryTransport::pair();
    let server = server(transport);
    server.endpoint.start();

    peer.inject(&[0xFF, 0, 0]);

    assert!(server.endpoint.is_closed());
    assert_eq!(peer.unread(), 0);
    assert_eq!(server.probe.close_inbound_calls(), 1);
    assert_eq!(server.probe.close_outbound_calls(), 1);
}

#[test]
fn out_of_order_record_is_fatal() {
    let (transport, peer) = MemoryTransport::pair();
    let server = server(transport);
    server.endpoint.start();

    peer.inject(&encode_record(RecordKind::Data, b"before handshake"));

    assert!(server.endpoint.is_closed());
    assert!(server.mailbox.received().is_empty());
}

#[test]
fn record_split_across_reads_is_reassembled() {
    let (transport, peer) = MemoryTransport::pair();
    let server = server(transport);
    server.endpoint.start();

    let hello = encode_record(RecordKind::Hello, b"hello");
    peer.inject(&hello[..HEADER_LEN - 1]);
    assert!(peer.drain().is_empty());

    peer.inject(&hello[HEADER_LEN - 1..]);
    let reply = peer.drain();
    assert_eq!(reply[0], RecordKind::HelloReply as u8);
    assert!(!server.endpoint.is_closed());
}

#[test]
fn write_to_closed_peer_closes_endpoint() {
    let (transport, peer) = MemoryTransport::pair();
    peer.close();

    let client = harnessed(Role::Client, transport);
    client.endpoint.start();

    assert!(client.endpoint.is_closed());
    assert!(client.endpoint.outbound_closed());
    assert_eq!(client.probe.close_outbound_calls(), 1);
    assert_eq!(client.probe.close_inbound_calls(), 1);
}

#[test]
fn close_from_application_fails_pending_read() {
    let (transport, _peer) = MemoryTransport::pair();
    let server = server(transport);
    server.endpoint.start();
    assert!(!server.endpoint.inbound_closed());

    server.endpoint.close();

    assert!(server.endpoint.inbound_closed());
    assert!(server.endpoint.outbound_closed());
    assert_eq!(server.probe.close_inbound_calls(), 1);
}

#[test]
fn severed_connection_closes_endpoint() {
    let (transport, peer) = MemoryTransport::pair();
    let server = server(transport);
    server.endpoint.start();
    peer.inject(&encode_record(RecordKind::Hello, b"hello"));

    peer.sever();

    assert!(server.endpoint.is_closed());
    assert!(!peer.is_closed());
    assert_eq!(server.probe.close_inbound_calls(), 1);
}
