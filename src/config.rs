//! Configuration structures consumed by the sender lifecycle.
//!
//! [`SenderBuilder`](crate::builder::SenderBuilder) validates and constructs
//! these values before passing them to
//! [`DrifterSender`](crate::sender::DrifterSender) for runtime use.

use std::{fmt, time::Duration};

use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;

/// Default TLS port of a Drifter endpoint.
pub const DEFAULT_PORT: u16 = 443;
/// Default interval the worker waits for inbound bytes when it has no other work.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Default time `flush` and `close` wait for the queue to drain.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Default capacity of each bounded event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;
/// Default base delay for exponential backoff retries.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Default maximum delay for exponential backoff retries.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Default absolute deadline for reconnection attempts.
pub const DEFAULT_BACKOFF_DEADLINE: Duration = Duration::from_secs(120);

/// Remote Drifter endpoint a sender is bound to.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host to connect to; also sent in the `Host` header.
    pub hostname: String,
    /// TCP port number.
    pub port: u16,
    /// Request path, e.g. `/1/log`.
    pub path: String,
    /// Opaque capability token placed first in the query string.
    pub capability: String,
}

impl Endpoint {
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        path: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            path: path.into(),
            capability: capability.into(),
        }
    }

    /// `host:port` label used in logs and errors.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

// The capability is a credential; keep it out of debug output.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("capability", &"<redacted>")
            .finish()
    }
}

/// TLS connection options.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Domain presented during the handshake. Falls back to the endpoint hostname.
    pub domain: Option<String>,
    /// Accept invalid certificates and hostnames. Intended for tests only.
    pub accept_invalid_certs: bool,
}

/// Exponential backoff policy for reconnection attempts.
///
/// Senders run without one unless configured; a refused or failed connection
/// then waits for the next `send` to re-arm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub deadline: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
            deadline: DEFAULT_BACKOFF_DEADLINE,
        }
    }
}

/// Configuration object describing how to construct a
/// [`DrifterSender`](crate::sender::DrifterSender).
#[derive(Clone, Debug)]
pub struct SenderConfig {
    pub endpoint: Endpoint,
    pub tls: TlsOptions,
    /// Bound on TCP connect plus TLS handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Bound on each request write. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
    /// Retry policy for failed connection attempts. `None` disables retries.
    pub backoff: Option<BackoffPolicy>,
    pub poll_interval: Duration,
    pub flush_timeout: Duration,
    pub event_capacity: usize,
    pub warn_interval: Duration,
}

impl SenderConfig {
    /// Configuration for `endpoint` with every optional behaviour left at its default.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            tls: TlsOptions::default(),
            connect_timeout: None,
            write_timeout: None,
            backoff: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }

    /// Override the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }
}
