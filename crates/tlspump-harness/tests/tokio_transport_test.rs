//! Endpoints over real tokio streams.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tlspump_core::{Endpoint, EndpointConfig, Phase, Role, TokioExecutor, TokioTransport};
use tlspump_harness::{Mailbox, ToyEngine};
use tokio::io::DuplexStream;
use tracing_subscriber::EnvFilter;

type TokioEndpoint = Endpoint<ToyEngine, TokioTransport<DuplexStream>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn endpoint(config: EndpointConfig, stream: DuplexStream) -> (TokioEndpoint, Mailbox) {
    let mailbox = Mailbox::new();
    let role = config.role;
    let endpoint = Endpoint::new(
        config.with_verbose(true),
        ToyEngine::new(role),
        TokioTransport::current(stream),
        Arc::new(TokioExecutor::current()),
        mailbox.consumer(),
        mailbox.producer(),
    );
    (endpoint, mailbox)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_pong_over_duplex_stream() {
    init_tracing();
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (client, client_mail) = endpoint(EndpointConfig::new(Role::Client).with_name("client"), a);
    let (server, server_mail) = endpoint(EndpointConfig::new(Role::Server).with_name("server"), b);

    server.start();
    client.start();
    assert!(eventually(|| client.phase() == Phase::Established).await);
    assert!(eventually(|| server.phase() == Phase::Established).await);

    for round in 0..4u8 {
        let ping = vec![round; 100];
        client_mail.post(&ping);
        client.send();
        assert!(eventually(|| server_mail.received().len() == ping.len()).await);
        assert_eq!(server_mail.take_received(), ping);

        let pong = vec![round ^ 0xFF; 300];
        server_mail.post(&pong);
        server.send();
        assert!(eventually(|| client_mail.received().len() == pong.len()).await);
        assert_eq!(client_mail.take_received(), pong);
    }

    client.shutdown();
    assert!(eventually(|| client.is_closed() && server.is_closed()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_times_out() {
    init_tracing();
    let (a, _silent) = tokio::io::duplex(1024);
    let config = EndpointConfig::new(Role::Server)
        .with_name("server")
        .with_timeout(Duration::from_millis(50));
    let (server, _mail) = endpoint(config, a);

    server.start();

    assert!(eventually(|| server.is_closed()).await);
    assert!(eventually(|| server.inbound_closed() && server.outbound_closed()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_stream_ends_the_connection() {
    init_tracing();
    let (a, b) = tokio::io::duplex(1024);
    let (server, _mail) = endpoint(EndpointConfig::new(Role::Server).with_name("server"), a);

    server.start();
    drop(b);

    assert!(eventually(|| server.is_closed()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_interrupts_a_pending_read() {
    init_tracing();
    let (a, _b) = tokio::io::duplex(1024);
    let (server, _mail) = endpoint(EndpointConfig::new(Role::Server).with_name("server"), a);

    server.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!server.is_closed());

    let started = Instant::now();
    server.close();
    assert!(eventually(|| server.inbound_closed()).await);
    assert!(started.elapsed() < Duration::from_secs(2));
}
