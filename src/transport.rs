//! Transport primitives for the sender.
//!
//! The worker only needs to open a connection, write requests, poll for reply
//! bytes and close its write side. [`Transport`] and [`Connection`] describe
//! exactly that so the worker can be driven by the native-tls implementation in
//! production and by in-memory or plain TCP transports in tests.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    time::Duration,
};

use native_tls::{HandshakeError, TlsConnector, TlsStream};

use crate::config::{Endpoint, TlsOptions};

/// Opens connections to an endpoint.
pub trait Transport: Send + Sync {
    /// Connect to `endpoint` and complete any handshake before returning.
    fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Connection>>;
}

/// An established, exclusively owned connection.
pub trait Connection: Read + Write + Send {
    /// Bound the next reads. The worker uses this to poll for reply bytes.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Signal that no more requests will be written.
    fn shutdown_write(&mut self) -> io::Result<()>;
}

/// TLS over TCP transport backed by `native-tls`.
pub struct TlsTransport {
    connector: TlsConnector,
    options: TlsOptions,
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl TlsTransport {
    /// Build a transport. Fails when the platform TLS connector cannot be created.
    pub fn new(
        options: TlsOptions,
        connect_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Result<Self, native_tls::Error> {
        let mut builder = TlsConnector::builder();
        if options.accept_invalid_certs {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        Ok(Self {
            connector: builder.build()?,
            options,
            connect_timeout,
            write_timeout,
        })
    }

    fn domain<'a>(&'a self, endpoint: &'a Endpoint) -> &'a str {
        self.options
            .domain
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&endpoint.hostname)
    }
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("options", &self.options)
            .field("connect_timeout", &self.connect_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl Transport for TlsTransport {
    fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Connection>> {
        let stream = connect_tcp(endpoint, self.connect_timeout)?;
        // The handshake shares the connect budget.
        stream.set_read_timeout(self.connect_timeout)?;
        stream.set_write_timeout(self.connect_timeout)?;
        let stream = self
            .connector
            .connect(self.domain(endpoint), stream)
            .map_err(handshake_error)?;
        let tcp = stream.get_ref();
        tcp.set_read_timeout(None)?;
        tcp.set_write_timeout(self.write_timeout)?;
        Ok(Box::new(TlsConnection {
            stream: Box::new(stream),
        }))
    }
}

fn handshake_error(err: HandshakeError<TcpStream>) -> io::Error {
    match err {
        HandshakeError::Failure(err) => io::Error::other(err),
        // Blocking sockets only interrupt the handshake when a timeout fires.
        HandshakeError::WouldBlock(_) => {
            io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out")
        }
    }
}

/// Open a TCP stream, trying every resolved address.
///
/// Without a timeout the OS decides how long to wait. The last error is
/// returned so callers can still tell a refusal from a timeout.
pub fn connect_tcp(endpoint: &Endpoint, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect((endpoint.hostname.as_str(), endpoint.port));
    };
    let mut last_err = None;
    for addr in (endpoint.hostname.as_str(), endpoint.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses resolved for {}", endpoint.authority()),
        )
    }))
}

/// Connection produced by [`TlsTransport`].
pub struct TlsConnection {
    stream: Box<TlsStream<TcpStream>>,
}

impl Read for TlsConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TlsConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Connection for TlsConnection {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.get_ref().set_read_timeout(Some(nonzero(timeout)))
    }

    /// Sends the TLS close_notify and half-closes the socket; reply bytes can
    /// still be read until the peer closes.
    fn shutdown_write(&mut self) -> io::Result<()> {
        self.stream.shutdown()?;
        self.stream.get_ref().shutdown(Shutdown::Write)
    }
}

/// Plain TCP connection, for transports that terminate TLS elsewhere.
impl Connection for TcpStream {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        TcpStream::set_read_timeout(self, Some(nonzero(timeout)))
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Write)
    }
}

// Socket timeouts reject zero durations.
fn nonzero(timeout: Duration) -> Duration {
    timeout.max(Duration::from_millis(1))
}
