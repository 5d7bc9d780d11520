//! Stack depth stays flat when every transport operation completes in line.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use tlspump_core::{Endpoint, EndpointConfig, InlineExecutor, Role, Silent};
use tlspump_harness::{Mailbox, MemoryTransport, ToyConfig, ToyEngine};

const PAYLOAD_LEN: usize = 64 * 1024;
const FRAGMENT: usize = 16;
const MAX_SPREAD: usize = 64 * 1024;

fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(std::ptr::addr_of!(marker)) as usize
}

#[test]
fn thousands_of_inline_completions_keep_a_flat_stack() {
    let (client_transport, server_transport) = MemoryTransport::pair();

    let outgoing = Mailbox::new();
    let client = Endpoint::new(
        EndpointConfig::new(Role::Client).with_name("client"),
        ToyEngine::with_config(
            Role::Client,
            ToyConfig { max_fragment: FRAGMENT, ..ToyConfig::default() },
        ),
        client_transport,
        Arc::new(InlineExecutor),
        Mailbox::new().consumer(),
        outgoing.producer(),
    );

    let lowest = Arc::new(AtomicUsize::new(usize::MAX));
    let highest = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(Mutex::new(Vec::with_capacity(PAYLOAD_LEN)));
    let consumer = {
        let lowest = Arc::clone(&lowest);
        let highest = Arc::clone(&highest);
        let received = Arc::clone(&received);
        move |plaintext: &[u8]| {
            let here = stack_address();
            lowest.fetch_min(here, Ordering::Relaxed);
            highest.fetch_max(here, Ordering::Relaxed);
            received.lock().unwrap().extend_from_slice(plaintext);
        }
    };
    let server = Endpoint::new(
        EndpointConfig::new(Role::Server).with_name("server"),
        ToyEngine::new(Role::Server),
        server_transport,
        Arc::new(InlineExecutor),
        consumer,
        Silent,
    );

    server.start();
    client.start();

    let payload: Vec<u8> = (0..PAYLOAD_LEN).map(|i| (i % 253) as u8).collect();
    outgoing.post(&payload);
    client.send();

    assert_eq!(*received.lock().unwrap(), payload);
    let spread = highest.load(Ordering::Relaxed) - lowest.load(Ordering::Relaxed);
    assert!(spread < MAX_SPREAD, "stack spread {spread} bytes over {} records", PAYLOAD_LEN / FRAGMENT);
}
