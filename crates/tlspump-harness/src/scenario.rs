//! Scenario builder for client/server endpoint pairs.
//!
//! Wires a client and a server [`ToyEngine`] endpoint over a
//! [`MemoryTransport`] pair with inline task execution, so a whole exchange
//! runs to quiescence inside the call that triggered it.

use std::sync::Arc;

use tlspump_core::{Endpoint, EndpointConfig, InlineExecutor, Role, TaskExecutor};

use crate::{
    mailbox::Mailbox,
    memory_transport::MemoryTransport,
    toy_engine::{EngineProbe, ToyConfig, ToyEngine},
};

/// Endpoint type used by scenarios.
pub type ToyEndpoint = Endpoint<ToyEngine, MemoryTransport>;

/// Scenario builder.
pub struct Scenario {
    client: EndpointConfig,
    server: EndpointConfig,
    client_engine: ToyConfig,
    server_engine: ToyConfig,
    chunking: Option<(u64, usize)>,
    executor: Arc<dyn TaskExecutor>,
}

impl Scenario {
    /// Client and server with default configuration.
    pub fn new() -> Self {
        Self {
            client: EndpointConfig::new(Role::Client).with_name("client"),
            server: EndpointConfig::new(Role::Server).with_name("server"),
            client_engine: ToyConfig::default(),
            server_engine: ToyConfig::default(),
            chunking: None,
            executor: Arc::new(InlineExecutor),
        }
    }

    /// Replace the client endpoint configuration. The role is forced to
    /// client.
    #[must_use]
    pub fn client_config(mut self, config: EndpointConfig) -> Self {
        self.client = EndpointConfig { role: Role::Client, ..config };
        self
    }

    /// Replace the server endpoint configuration. The role is forced to
    /// server.
    #[must_use]
    pub fn server_config(mut self, config: EndpointConfig) -> Self {
        self.server = EndpointConfig { role: Role::Server, ..config };
        self
    }

    /// Configure the client engine.
    #[must_use]
    pub fn client_engine(mut self, config: ToyConfig) -> Self {
        self.client_engine = config;
        self
    }

    /// Configure the server engine.
    #[must_use]
    pub fn server_engine(mut self, config: ToyConfig) -> Self {
        self.server_engine = config;
        self
    }

    /// Split every transport read into random chunks of at most `max_chunk`
    /// bytes.
    #[must_use]
    pub fn chunked(mut self, seed: u64, max_chunk: usize) -> Self {
        self.chunking = Some((seed, max_chunk));
        self
    }

    /// Run delegated tasks on `executor` instead of inline.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Build both endpoints without starting them.
    pub fn build(self) -> Connected {
        let (client_transport, server_transport) = match self.chunking {
            Some((seed, max_chunk)) => MemoryTransport::pair_chunked(seed, max_chunk),
            None => MemoryTransport::pair(),
        };

        let client = Side::new(
            self.client,
            ToyEngine::with_config(Role::Client, self.client_engine),
            client_transport,
            Arc::clone(&self.executor),
        );
        let server = Side::new(
            self.server,
            ToyEngine::with_config(Role::Server, self.server_engine),
            server_transport,
            self.executor,
        );
        Connected { client, server }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint with its observation handles.
pub struct Side {
    /// The endpoint under test
    pub endpoint: ToyEndpoint,
    /// Application side
    pub mailbox: Mailbox,
    /// Engine observations
    pub probe: Arc<EngineProbe>,
}

impl Side {
    fn new(
        config: EndpointConfig,
        engine: ToyEngine,
        transport: MemoryTransport,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let mailbox = Mailbox::new();
        let probe = engine.probe();
        let endpoint = Endpoint::new(
            config,
            engine,
            transport,
            executor,
            mailbox.consumer(),
            mailbox.producer(),
        );
        Self { endpoint, mailbox, probe }
    }

    /// Queue `bytes` and wake the outbound pump.
    pub fn send(&self, bytes: &[u8]) {
        self.mailbox.post(bytes);
        self.endpoint.send();
    }
}

/// Client and server wired together.
pub struct Connected {
    /// Handshake initiator
    pub client: Side,
    /// Handshake responder
    pub server: Side,
}

impl Connected {
    /// Start the server, then the client. With inline execution the handshake
    /// has completed when this returns.
    pub fn start(&self) {
        self.server.endpoint.start();
        self.client.endpoint.start();
    }
}
