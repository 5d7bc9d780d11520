//! Sending side of the full-drain contract: every wrap is offered exactly the
//! bytes the producer appended on that pass.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tlspump_core::{
    Endpoint, EndpointConfig, InlineExecutor, PayloadProducer, Phase, Role, SendWindow, Silent,
};
use tlspump_harness::{EngineProbe, Mailbox, MemoryTransport, ProbeEvent, ToyEngine};

type ToyEndpoint = Endpoint<ToyEngine, MemoryTransport>;

/// Appends the next scripted amount on each call, nothing once the script is
/// empty, and logs what it appended.
#[derive(Clone, Default)]
struct Counting {
    script: Arc<Mutex<VecDeque<usize>>>,
    appended: Arc<Mutex<Vec<usize>>>,
}

impl Counting {
    fn queue(&self, amount: usize) {
        self.script.lock().unwrap().push_back(amount);
    }

    fn appended(&self) -> Vec<usize> {
        self.appended.lock().unwrap().clone()
    }
}

impl PayloadProducer for Counting {
    fn on_sending(&mut self, window: &mut SendWindow<'_>) -> bool {
        let amount = self.script.lock().unwrap().pop_front().unwrap_or(0);
        let taken = window.append(&vec![0x33; amount]);
        self.appended.lock().unwrap().push(taken);
        taken > 0
    }
}

struct Pair {
    client: ToyEndpoint,
    client_calls: Arc<EngineProbe>,
    server: ToyEndpoint,
    server_mail: Mailbox,
}

fn connect(producer: impl PayloadProducer) -> Pair {
    let (a, b) = MemoryTransport::pair();

    let engine = ToyEngine::new(Role::Client);
    let client_calls = engine.probe();
    let client = Endpoint::new(
        EndpointConfig::new(Role::Client).with_name("client"),
        engine,
        a,
        Arc::new(InlineExecutor),
        |_: &[u8]| {},
        producer,
    );

    let server_mail = Mailbox::new();
    let server = Endpoint::new(
        EndpointConfig::new(Role::Server).with_name("server"),
        ToyEngine::new(Role::Server),
        b,
        Arc::new(InlineExecutor),
        server_mail.consumer(),
        server_mail.producer(),
    );

    server.start();
    client.start();
    Pair { client, client_calls, server, server_mail }
}

#[test]
fn each_wrap_sees_exactly_what_was_appended() {
    let counting = Counting::default();
    let pair = connect(counting.clone());
    assert_eq!(pair.client.phase(), Phase::Established);

    for amount in [5, 0, 7, 1024, 0] {
        counting.queue(amount);
        pair.client.send();
    }

    let appended = counting.appended();
    assert!(appended.contains(&0));
    assert_eq!(pair.client_calls.wrap_inputs(), appended);
    assert_eq!(pair.server_mail.received().len(), 5 + 7 + 1024);
    assert_eq!(pair.server.phase(), Phase::Established);
}

#[test]
fn silent_producer_offers_empty_wraps() {
    let pair = connect(Silent);
    assert_eq!(pair.client.phase(), Phase::Established);

    pair.client.send();
    pair.client.resume();

    let inputs = pair.client_calls.wrap_inputs();
    assert!(!inputs.is_empty());
    assert!(inputs.iter().all(|&len| len == 0));

    let data_wraps = pair
        .client_calls
        .events()
        .iter()
        .filter(|event| matches!(event, ProbeEvent::Wrap(result) if result.bytes_consumed > 0))
        .count();
    assert_eq!(data_wraps, 0);
    assert!(pair.server_mail.received().is_empty());
}
