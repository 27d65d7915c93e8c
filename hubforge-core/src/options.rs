//! Per-hub connection options.
//!
//! ```ignore
//! use hubforge::prelude::*;
//! use std::time::Duration;
//!
//! let options = HubOptions::new()
//!     .with_keep_alive_interval(Some(Duration::from_secs(10)))
//!     .with_detailed_errors(true);
//! ```

use std::time::Duration;

/// Timeouts, limits and error detail settings for hub connections.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// How long a client may take to send its handshake request.
    pub handshake_timeout: Duration,
    /// Send a Ping when nothing was written for this long. `None` disables it.
    pub keep_alive_interval: Option<Duration>,
    /// Close the connection when nothing was received for this long.
    /// `None` disables it.
    pub client_timeout_interval: Option<Duration>,
    /// Largest single inbound message accepted, in bytes. `None` is unlimited.
    pub maximum_receive_message_size: Option<usize>,
    /// Append the underlying error text to invocation errors sent to clients.
    pub enable_detailed_errors: bool,
    /// Restrict negotiation to these protocol names. `None` allows every
    /// registered protocol.
    pub supported_protocols: Option<Vec<String>>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Some(Duration::from_secs(15)),
            client_timeout_interval: Some(Duration::from_secs(30)),
            maximum_receive_message_size: Some(32 * 1024),
            enable_detailed_errors: false,
            supported_protocols: None,
        }
    }
}

impl HubOptions {
    /// Creates options with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the keep-alive interval.
    pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Sets the client timeout interval.
    pub fn with_client_timeout_interval(mut self, interval: Option<Duration>) -> Self {
        self.client_timeout_interval = interval;
        self
    }

    /// Sets the maximum inbound message size.
    pub fn with_maximum_receive_message_size(mut self, size: Option<usize>) -> Self {
        self.maximum_receive_message_size = size;
        self
    }

    /// Enables or disables detailed invocation errors.
    pub fn with_detailed_errors(mut self, enabled: bool) -> Self {
        self.enable_detailed_errors = enabled;
        self
    }

    /// Restricts the protocols clients may negotiate.
    pub fn with_supported_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_protocols = Some(protocols.into_iter().map(Into::into).collect());
        self
    }
}
