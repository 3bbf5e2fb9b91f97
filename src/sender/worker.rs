//! Worker thread driving the connection lifecycle.
//!
//! All state lives on this one thread. Commands from the handle arrive over a
//! channel; connection attempts and drain passes are deferred [`Step`]s on the
//! worker's own queue, so a burst of sends is absorbed before the first
//! connection attempt runs and each drain pass yields back to the loop.
//! Between steps the worker polls the open connection for reply bytes.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use log::{debug, warn};

use crate::{
    config::{Endpoint, SenderConfig},
    error::SenderError,
    events::EventPublisher,
    request::frame_request,
    telemetry::secure_connect_sample,
    transport::{Connection, Transport},
};

use super::{
    backoff::BackoffState,
    state::{ConnectionState, SenderSnapshot},
};

const READ_BUFFER_SIZE: usize = 8 * 1024;
/// Read wait used between drain passes so reply bytes interleave with writes.
const YIELD_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Commands processed by the worker thread.
#[derive(Debug)]
pub enum SenderCommand {
    Send(String),
    /// Acknowledge once the queue is drained. The caller stops waiting at
    /// `deadline`.
    Flush {
        ack: Sender<()>,
        deadline: Instant,
    },
    Snapshot(Sender<SenderSnapshot>),
    Shutdown(Sender<()>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    Connect,
    Drain,
}

struct FlushWaiter {
    ack: Sender<()>,
    deadline: Instant,
}

enum Control {
    Continue,
    Stop,
}

pub fn spawn_worker(
    config: &SenderConfig,
    transport: Arc<dyn Transport>,
    events: EventPublisher,
) -> io::Result<(Sender<SenderCommand>, thread::JoinHandle<()>)> {
    let (tx, rx) = unbounded();
    let worker = Worker::new(config, transport, events);
    let handle = thread::Builder::new()
        .name("drifter-sender".into())
        .spawn(move || worker.run(rx))?;
    Ok((tx, handle))
}

struct Worker {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    events: EventPublisher,
    poll_interval: Duration,
    backoff: Option<BackoffState>,
    queue: VecDeque<String>,
    state: ConnectionState,
    connection: Option<Box<dyn Connection>>,
    /// Write side shut after the queue drained; waiting for the peer to end.
    closing: bool,
    read_wait: Option<Duration>,
    connect_started_at: Option<Instant>,
    steps: VecDeque<Step>,
    retry_at: Option<Instant>,
    flush_waiters: Vec<FlushWaiter>,
    read_buf: Vec<u8>,
}

impl Worker {
    fn new(config: &SenderConfig, transport: Arc<dyn Transport>, events: EventPublisher) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            transport,
            events,
            poll_interval: config.poll_interval,
            backoff: config.backoff.clone().map(BackoffState::new),
            queue: VecDeque::new(),
            state: ConnectionState::Idle,
            connection: None,
            closing: false,
            read_wait: None,
            connect_started_at: None,
            steps: VecDeque::new(),
            retry_at: None,
            flush_waiters: Vec::new(),
            read_buf: vec![0; READ_BUFFER_SIZE],
        }
    }

    fn run(mut self, rx: Receiver<SenderCommand>) {
        loop {
            if let Control::Stop = self.intake(&rx) {
                break;
            }
            self.fire_due_retry();
            if let Some(step) = self.steps.pop_front() {
                match step {
                    Step::Connect => self.connect(),
                    Step::Drain => self.drain(),
                }
            }
            self.poll_connection();
        }
    }

    /// Apply every pending command, blocking only when there is nothing else to do.
    fn intake(&mut self, rx: &Receiver<SenderCommand>) -> Control {
        if self.steps.is_empty() && self.connection.is_none() {
            let first = match self.retry_at {
                Some(at) => match rx.recv_deadline(at) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return self.stop(None),
                },
                None => match rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => return self.stop(None),
                },
            };
            if let Some(cmd) = first
                && let Control::Stop = self.handle_command(cmd)
            {
                return Control::Stop;
            }
        }
        loop {
            match rx.try_recv() {
                Ok(cmd) => {
                    if let Control::Stop = self.handle_command(cmd) {
                        return Control::Stop;
                    }
                }
                Err(TryRecvError::Empty) => return Control::Continue,
                Err(TryRecvError::Disconnected) => return self.stop(None),
            }
        }
    }

    fn handle_command(&mut self, cmd: SenderCommand) -> Control {
        match cmd {
            SenderCommand::Send(message) => self.enqueue(message),
            SenderCommand::Flush { ack, deadline } => {
                if self.snapshot().is_quiescent() {
                    let _ = ack.send(());
                } else {
                    self.add_flush_waiter(FlushWaiter { ack, deadline });
                }
            }
            SenderCommand::Snapshot(ack) => {
                let _ = ack.send(self.snapshot());
            }
            SenderCommand::Shutdown(ack) => return self.stop(Some(ack)),
        }
        Control::Continue
    }

    /// Queue a flush acknowledgement, forgetting callers that stopped waiting.
    fn add_flush_waiter(&mut self, waiter: FlushWaiter) {
        let now = Instant::now();
        self.flush_waiters.retain(|w| w.deadline > now);
        self.flush_waiters.push(waiter);
    }

    fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            state: self.state,
            queued: self.queue.len(),
        }
    }

    fn enqueue(&mut self, message: String) {
        self.queue.push_back(message);
        match self.state {
            ConnectionState::Idle => {
                self.state = ConnectionState::Connecting;
                self.steps.push_back(Step::Connect);
                debug!(
                    "DrifterSender scheduling connection to {}",
                    self.endpoint.authority()
                );
            }
            ConnectionState::Connected if !self.closing && !self.steps.contains(&Step::Drain) => {
                self.steps.push_back(Step::Drain);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }
    }

    fn fire_due_retry(&mut self) {
        if let Some(at) = self.retry_at
            && Instant::now() >= at
        {
            self.retry_at = None;
            self.steps.push_back(Step::Connect);
        }
    }

    fn connect(&mut self) {
        self.connect_started_at = Some(Instant::now());
        debug!("DrifterSender connecting to {}", self.endpoint.authority());
        match self.transport.connect(&self.endpoint) {
            Ok(connection) => {
                if let Some(started) = self.connect_started_at.take() {
                    self.events
                        .telemetry(secure_connect_sample(started.elapsed()));
                }
                self.connection = Some(connection);
                self.read_wait = None;
                self.closing = false;
                self.state = ConnectionState::Connected;
                // Sends that arrived during the handshake are taken in first.
                self.steps.push_front(Step::Drain);
            }
            Err(err) => {
                self.connect_started_at = None;
                self.events
                    .error(SenderError::connect(self.endpoint.authority(), err));
                self.schedule_retry();
            }
        }
    }

    /// Fall back to Idle after a failed attempt, or arm a delayed retry when a
    /// backoff policy is configured. Without a policy only the next send
    /// re-arms the connection.
    fn schedule_retry(&mut self) {
        self.state = ConnectionState::Idle;
        if self.queue.is_empty() {
            return;
        }
        let Some(backoff) = self.backoff.as_mut() else {
            return;
        };
        let now = Instant::now();
        match backoff.next_delay(now) {
            Some(delay) => {
                debug!("DrifterSender retrying connection in {delay:?}");
                self.state = ConnectionState::Connecting;
                self.retry_at = Some(now + delay);
            }
            None => {
                backoff.reset();
                warn!(
                    "DrifterSender giving up on {} after backoff deadline; {} messages remain queued",
                    self.endpoint.authority(),
                    self.queue.len()
                );
            }
        }
    }

    /// Write the front message as one request, then yield or close.
    fn drain(&mut self) {
        if self.state != ConnectionState::Connected || self.closing {
            return;
        }
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let Some(message) = self.queue.pop_front() else {
            return;
        };
        let request = frame_request(&self.endpoint, &message);
        if let Err(err) = connection
            .write_all(&request)
            .and_then(|()| connection.flush())
        {
            // Not written; keep it at the front for the next connection.
            self.queue.push_front(message);
            self.events.error(SenderError::Write(err));
            self.end_connection(true);
            return;
        }
        if let Some(backoff) = self.backoff.as_mut() {
            backoff.reset();
        }
        if self.queue.is_empty() {
            self.close_connection();
        } else {
            self.steps.push_back(Step::Drain);
        }
    }

    fn close_connection(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        self.closing = true;
        debug!("DrifterSender queue drained; closing connection");
        if let Err(err) = connection.shutdown_write() {
            self.events.error(SenderError::Close(err));
            self.end_connection(false);
        }
    }

    /// Handle the end of a connection, for whatever reason it ended.
    fn end_connection(&mut self, failed: bool) {
        self.connect_started_at = None;
        self.connection = None;
        self.closing = false;
        self.steps.retain(|step| *step != Step::Drain);

        if self.queue.is_empty() {
            self.state = ConnectionState::Idle;
            debug!("DrifterSender idle");
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.ack.send(());
            }
            return;
        }

        if failed && self.backoff.is_some() {
            self.schedule_retry();
            return;
        }
        debug!(
            "DrifterSender reconnecting with {} messages queued",
            self.queue.len()
        );
        self.state = ConnectionState::Connecting;
        self.steps.push_back(Step::Connect);
    }

    fn poll_connection(&mut self) {
        let wait = if self.steps.is_empty() {
            self.poll_interval
        } else {
            YIELD_READ_TIMEOUT
        };
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if self.read_wait != Some(wait) {
            if let Err(err) = connection.set_read_timeout(wait) {
                self.events.error(SenderError::Read(err));
                self.end_connection(true);
                return;
            }
            self.read_wait = Some(wait);
        }
        match connection.read(&mut self.read_buf) {
            Ok(0) => {
                debug!("DrifterSender connection ended by peer");
                self.end_connection(false);
            }
            Ok(n) => self.events.data(self.read_buf[..n].to_vec()),
            Err(err) if is_poll_timeout(&err) => {}
            Err(err) if self.closing => {
                // Our side is already closed; treat any failure as the end.
                debug!("DrifterSender connection ended after close: {err}");
                self.end_connection(false);
            }
            Err(err) => {
                self.events.error(SenderError::Read(err));
                self.end_connection(true);
            }
        }
    }

    fn stop(&mut self, ack: Option<Sender<()>>) -> Control {
        if let Some(mut connection) = self.connection.take() {
            let _ = connection.shutdown_write();
        }
        if !self.queue.is_empty() {
            warn!(
                "DrifterSender shutting down with {} undelivered messages",
                self.queue.len()
            );
        }
        // Pending flushes observe the disconnect and report failure.
        self.flush_waiters.clear();
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Control::Stop
    }
}

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
