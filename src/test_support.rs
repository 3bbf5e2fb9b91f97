//! In-memory transport for exercising the sender worker.
//!
//! [`ScriptedTransport`] records every connection attempt and every request
//! written, and can be told to refuse connections, fail writes, drop the
//! connection after a number of requests, linger after our close or hold
//! connection attempts until released.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::{
    config::Endpoint,
    transport::{Connection, Transport},
};

/// Behaviour of one scripted connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionScript {
    /// Writes succeed this many times, then fail with `BrokenPipe`.
    pub fail_write_after: Option<usize>,
    /// The peer closes after this many requests.
    pub drop_after: Option<usize>,
    /// After our close, the peer stays silent for this many reads before ending.
    pub linger_after_close: Option<usize>,
    /// End with `ConnectionReset` instead of EOF once our side has closed.
    pub reset_after_close: bool,
}

#[derive(Default)]
struct Script {
    connects: usize,
    connect_failures: VecDeque<io::ErrorKind>,
    connections: VecDeque<ConnectionScript>,
    response: Option<Vec<u8>>,
    requests: Vec<(usize, Vec<u8>)>,
    gate: Option<Receiver<()>>,
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next connection attempts with the given error kinds.
    pub fn fail_connects(&self, kinds: impl IntoIterator<Item = io::ErrorKind>) {
        self.script.lock().connect_failures.extend(kinds);
    }

    /// Script the next successful connections, in order.
    pub fn script_connections(&self, scripts: impl IntoIterator<Item = ConnectionScript>) {
        self.script.lock().connections.extend(scripts);
    }

    /// Reply with `bytes` to every request.
    pub fn respond_with(&self, bytes: &[u8]) {
        self.script.lock().response = Some(bytes.to_vec());
    }

    /// Block connection attempts until a token is sent on the returned channel.
    pub fn hold_connects(&self) -> Sender<()> {
        let (tx, rx) = unbounded();
        self.script.lock().gate = Some(rx);
        tx
    }

    pub fn connects(&self) -> usize {
        self.script.lock().connects
    }

    /// Raw requests in the order they were written.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.script
            .lock()
            .requests
            .iter()
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    /// Message part of each request, in write order.
    pub fn messages(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|bytes| message_of(&String::from_utf8_lossy(bytes)))
            .collect()
    }

    /// Number of distinct connections that carried at least one request.
    pub fn connections_used(&self) -> usize {
        let script = self.script.lock();
        let mut ids: Vec<usize> = script.requests.iter().map(|(id, _)| *id).collect();
        ids.dedup();
        ids.len()
    }
}

/// Extract `<message>` from `GET <path>?<capability>&<message> HTTP/1.1`.
pub fn message_of(request: &str) -> Option<String> {
    let line = request.lines().next()?;
    let target = line.strip_prefix("GET ")?.strip_suffix(" HTTP/1.1")?;
    let (_, query) = target.split_once('?')?;
    let (_, message) = query.split_once('&')?;
    Some(message.to_owned())
}

impl Transport for ScriptedTransport {
    fn connect(&self, _endpoint: &Endpoint) -> io::Result<Box<dyn Connection>> {
        let (id, gate) = {
            let mut script = self.script.lock();
            script.connects += 1;
            (script.connects, script.gate.clone())
        };
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        let mut script = self.script.lock();
        if let Some(kind) = script.connect_failures.pop_front() {
            return Err(io::Error::from(kind));
        }
        let behaviour = script.connections.pop_front().unwrap_or_default();
        Ok(Box::new(MemoryConnection {
            id,
            behaviour,
            shared: Arc::clone(&self.script),
            writes: 0,
            lingered: 0,
            write_closed: false,
            peer_closed: false,
            inbound: VecDeque::new(),
            read_timeout: Duration::from_millis(1),
        }))
    }
}

struct MemoryConnection {
    id: usize,
    behaviour: ConnectionScript,
    shared: Arc<Mutex<Script>>,
    writes: usize,
    lingered: usize,
    write_closed: bool,
    peer_closed: bool,
    inbound: VecDeque<u8>,
    read_timeout: Duration,
}

impl Write for MemoryConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let failing = self
            .behaviour
            .fail_write_after
            .is_some_and(|limit| self.writes >= limit);
        if self.write_closed || self.peer_closed || failing {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.writes += 1;
        let mut script = self.shared.lock();
        script.requests.push((self.id, buf.to_vec()));
        if let Some(response) = &script.response {
            self.inbound.extend(response.iter().copied());
        }
        if self.behaviour.drop_after == Some(self.writes) {
            self.peer_closed = true;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MemoryConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.inbound.is_empty() {
            let n = buf.len().min(self.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
                *slot = byte;
            }
            return Ok(n);
        }
        if self.peer_closed {
            return Ok(0);
        }
        if self.write_closed {
            let lingering = self
                .behaviour
                .linger_after_close
                .is_some_and(|reads| self.lingered < reads);
            if lingering {
                self.lingered += 1;
                return self.wait_for_data();
            }
            if self.behaviour.reset_after_close {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            return Ok(0);
        }
        self.wait_for_data()
    }
}

impl MemoryConnection {
    fn wait_for_data(&self) -> io::Result<usize> {
        thread::sleep(self.read_timeout.min(Duration::from_millis(2)));
        Err(io::Error::from(io::ErrorKind::WouldBlock))
    }
}

impl Connection for MemoryConnection {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.write_closed = true;
        Ok(())
    }
}

/// Returns the process-wide test logger, installing it on first use.
///
/// `logtest::Logger::start` may only be called once per process, so tests
/// that capture log records share this instance. Queued records from
/// earlier activity are discarded before it is handed out.
pub fn test_logger() -> parking_lot::MutexGuard<'static, logtest::Logger> {
    static LOGGER: std::sync::OnceLock<Mutex<logtest::Logger>> = std::sync::OnceLock::new();
    let mut logger = LOGGER
        .get_or_init(|| Mutex::new(logtest::Logger::start()))
        .lock();
    while logger.pop().is_some() {}
    logger
}
