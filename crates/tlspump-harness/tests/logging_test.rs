//! Endpoint log output follows the verbose switch.

use std::{
    io,
    sync::{Arc, Mutex},
};

use tlspump_core::{EndpointConfig, Role};
use tlspump_harness::Scenario;

/// Log sink shared with the subscriber.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run a handshake, one message and an abrupt close, returning the log.
fn logged_exchange(verbose: bool) -> String {
    let captured = Captured::default();
    let sink = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let connected = Scenario::new()
            .client_config(
                EndpointConfig::new(Role::Client).with_name("client").with_verbose(verbose),
            )
            .server_config(
                EndpointConfig::new(Role::Server).with_name("server").with_verbose(verbose),
            )
            .build();
        connected.start();
        connected.client.send(b"hello");
        connected.client.endpoint.close();
        assert!(connected.server.endpoint.is_closed());
    });

    let bytes = captured.0.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn quiet_endpoints_log_nothing() {
    assert_eq!(logged_exchange(false), "");
}

#[test]
fn verbose_endpoints_log_lifecycle() {
    let log = logged_exchange(true);
    assert!(log.contains("starting"));
    assert!(log.contains("phase transition"));
    assert!(log.contains("closing"));
    assert!(log.contains("endpoint closed"));
}
