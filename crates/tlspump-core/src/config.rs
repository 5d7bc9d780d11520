//! Endpoint configuration.

use std::time::Duration;

/// Which side of the handshake this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates the handshake; starts by wrapping
    Client,
    /// Answers the handshake; starts by unwrapping
    Server,
}

/// Initial capacities of one pump's buffer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizes {
    /// Ciphertext buffer exchanged with the transport
    pub network: usize,
    /// Plaintext buffer exchanged with the payload collaborator
    pub application: usize,
}

/// Endpoint configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Name used in log events
    pub name: String,
    /// Handshake role
    pub role: Role,
    /// Timeout applied to every transport operation
    pub timeout: Duration,
    /// Log mode transitions and close reasons
    pub verbose: bool,
    /// Initial inbound buffer sizes
    pub inbound: BufferSizes,
    /// Initial outbound buffer sizes
    pub outbound: BufferSizes,
}

impl EndpointConfig {
    /// Default inbound capacity: one maximum TLS record plus slack.
    pub const INBOUND_CAPACITY: usize = (1 << 14) + (1 << 10);

    /// Default outbound capacity.
    pub const OUTBOUND_CAPACITY: usize = 1 << 15;

    /// Default configuration for `role`.
    pub fn new(role: Role) -> Self {
        Self { role, ..Self::default() }
    }

    /// Set the log name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the transport timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable verbose logging.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set initial inbound buffer sizes.
    #[must_use]
    pub fn with_inbound(mut self, sizes: BufferSizes) -> Self {
        self.inbound = sizes;
        self
    }

    /// Set initial outbound buffer sizes.
    #[must_use]
    pub fn with_outbound(mut self, sizes: BufferSizes) -> Self {
        self.outbound = sizes;
        self
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: "NotNamed".to_string(),
            role: Role::Server,
            timeout: Duration::from_secs(10),
            verbose: false,
            inbound: BufferSizes {
                network: Self::INBOUND_CAPACITY,
                application: Self::INBOUND_CAPACITY,
            },
            outbound: BufferSizes {
                network: Self::OUTBOUND_CAPACITY,
                application: Self::OUTBOUND_CAPACITY,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.name, "NotNamed");
        assert_eq!(config.role, Role::Server);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(!config.verbose);
        assert_eq!(config.inbound.network, 17408);
        assert_eq!(config.outbound.network, 32768);
    }

    #[test]
    fn builder_overrides() {
        let config = EndpointConfig::new(Role::Client)
            .with_name("alice")
            .with_inbound(BufferSizes { network: 1024, application: 64 });
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.name, "alice");
        assert_eq!(config.inbound.application, 64);
        assert_eq!(config.outbound.application, EndpointConfig::OUTBOUND_CAPACITY);
    }
}
