//! Shared helpers for integration tests: a minimal HTTP/1.1 server that
//! records every request it receives, and a plain TCP transport so the sender
//! can talk to it without certificates.

#![allow(dead_code)]

use std::{
    io::{self, BufRead, BufReader, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use drifter_sender::{
    Connection, Endpoint, SenderConfig, Transport, transport::connect_tcp,
};

pub const CAPABILITY: &str = "02hAozGflu";
pub const PATH: &str = "/1/log";
pub const UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n";

/// One request as seen by [`MockServer`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// 1-based index of the connection that carried the request.
    pub connection: usize,
    /// Request line and headers, byte for byte.
    pub raw: Vec<u8>,
    pub target: String,
    pub host: Option<String>,
}

impl RecordedRequest {
    /// Query string after the capability.
    pub fn message(&self) -> Option<&str> {
        let (_, query) = self.target.split_once('?')?;
        query.split_once('&').map(|(_, message)| message)
    }
}

/// HTTP server answering every request with a fixed response and keeping the
/// connection open until the client closes it.
pub struct MockServer {
    addr: SocketAddr,
    requests: Receiver<RecordedRequest>,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    pub fn start(response: &'static [u8]) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let (tx, requests) = unbounded();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let id = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let tx = tx.clone();
                thread::spawn(move || {
                    let _ = serve(stream, id, response, &tx);
                });
            }
        });
        Self {
            addr,
            requests,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.port(), PATH, CAPABILITY)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait for the next recorded request.
    pub fn next_request(&self, timeout: Duration) -> Option<RecordedRequest> {
        self.requests.recv_timeout(timeout).ok()
    }

    /// Requests recorded so far.
    pub fn drain_requests(&self) -> Vec<RecordedRequest> {
        self.requests.try_iter().collect()
    }
}

fn serve(
    stream: TcpStream,
    connection: usize,
    response: &[u8],
    tx: &Sender<RecordedRequest>,
) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    loop {
        let mut raw = Vec::new();
        let mut request_line = String::new();
        if reader.read_line(&mut request_line)? == 0 {
            return Ok(());
        }
        raw.extend_from_slice(request_line.as_bytes());
        let mut host = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            raw.extend_from_slice(line.as_bytes());
            if line == "\r\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("host")
            {
                host = Some(value.trim().to_owned());
            }
        }
        let target = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_owned();
        let _ = tx.send(RecordedRequest {
            connection,
            raw,
            target,
            host,
        });
        writer.write_all(response)?;
    }
}

/// Transport speaking plain TCP, standing in for TLS against [`MockServer`].
#[derive(Debug, Default)]
pub struct PlainTcpTransport;

impl Transport for PlainTcpTransport {
    fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Connection>> {
        let stream = connect_tcp(endpoint, Some(Duration::from_secs(1)))?;
        Ok(Box::new(stream))
    }
}

/// Sender configuration tuned for fast tests.
pub fn test_config(endpoint: Endpoint) -> SenderConfig {
    let mut config = SenderConfig::new(endpoint);
    config.poll_interval = Duration::from_millis(5);
    config.flush_timeout = Duration::from_secs(5);
    config.connect_timeout = Some(Duration::from_secs(1));
    config
}

/// A port nothing is listening on.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
    listener.local_addr().expect("ephemeral address").port()
}
