//! Public sender type exported by the crate.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Sender, bounded};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    builder::{SenderBuilder, validate_config},
    config::{Endpoint, SenderConfig},
    error::BuildError,
    events::{SenderEvents, channels},
    rate_limited_warner::RateLimitedWarner,
    transport::{TlsTransport, Transport},
};

use super::{
    state::{ConnectionState, SenderSnapshot},
    worker::{SenderCommand, spawn_worker},
};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Queueing sender delivering messages to one Drifter endpoint.
///
/// `send` never blocks and never fails: messages are queued in order and
/// written by a background worker, one `GET` request each, over a TLS
/// connection that is opened on demand and closed once the queue drains.
/// Connection errors, reply bytes and handshake timings are published on the
/// channels returned by [`events`](Self::events).
pub struct DrifterSender {
    tx: Option<Sender<SenderCommand>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    events: SenderEvents,
    endpoint: Endpoint,
    warner: RateLimitedWarner,
    flush_timeout: Duration,
}

impl DrifterSender {
    /// Start configuring a sender.
    pub fn builder() -> SenderBuilder {
        SenderBuilder::new()
    }

    /// Construct a sender using the native TLS transport.
    pub fn with_config(config: SenderConfig) -> Result<Self, BuildError> {
        if config.tls.accept_invalid_certs {
            warn!(
                "DrifterSender accepting invalid TLS certificates for {}; use only for testing",
                config.endpoint.authority()
            );
        }
        let transport = TlsTransport::new(
            config.tls.clone(),
            config.connect_timeout,
            config.write_timeout,
        )?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Construct a sender over a caller supplied transport.
    pub fn with_transport(
        config: SenderConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BuildError> {
        validate_config(&config)?;
        let (publisher, events) = channels(config.event_capacity, config.warn_interval);
        let (tx, handle) = spawn_worker(&config, transport, publisher)?;
        Ok(Self {
            tx: Some(tx),
            handle: Mutex::new(Some(handle)),
            events,
            endpoint: config.endpoint,
            warner: RateLimitedWarner::new(config.warn_interval),
            flush_timeout: config.flush_timeout,
        })
    }

    /// Queue `message` for delivery.
    ///
    /// The message must already be percent-encoded; it is written verbatim
    /// after the capability in the request line. Empty messages are ignored.
    pub fn send(&self, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() {
            debug!("DrifterSender ignoring empty message");
            return;
        }
        let delivered = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(SenderCommand::Send(message)).is_ok());
        if !delivered {
            self.warner.record_drop();
            self.warner.warn_if_due(|count| {
                warn!("DrifterSender closed; dropped {count} messages");
            });
        }
    }

    /// Receivers for the data, error and telemetry channels.
    pub fn events(&self) -> SenderEvents {
        self.events.clone()
    }

    /// Endpoint every request is sent to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Wait until every queued message has been written and the connection is
    /// closed, using the configured flush timeout.
    pub fn flush(&self) -> bool {
        self.flush_timeout(self.flush_timeout)
    }

    /// Like [`flush`](Self::flush) with an explicit timeout.
    ///
    /// Returns `false` on timeout, after `close`, or when delivery has stalled
    /// on a failed connection attempt that nothing has re-armed.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        self.flush_until(Instant::now() + timeout)
    }

    fn flush_until(&self, deadline: Instant) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if tx
            .send(SenderCommand::Flush {
                ack: ack_tx,
                deadline,
            })
            .is_err()
        {
            return false;
        }
        ack_rx.recv_deadline(deadline).is_ok()
    }

    /// Current connection state and queue depth, or `None` once closed.
    pub fn snapshot(&self) -> Option<SenderSnapshot> {
        self.snapshot_until(Instant::now() + self.flush_timeout)
    }

    fn snapshot_until(&self, deadline: Instant) -> Option<SenderSnapshot> {
        let tx = self.tx.as_ref()?;
        let (ack_tx, ack_rx) = bounded(1);
        tx.send(SenderCommand::Snapshot(ack_tx)).ok()?;
        ack_rx.recv_deadline(deadline).ok()
    }

    /// Give in-flight delivery a chance to finish, then stop the worker.
    ///
    /// Messages still queued when the worker stops are discarded and logged.
    /// The whole call waits roughly the configured flush timeout; a worker
    /// that has not answered by then is detached.
    pub fn close(&mut self) {
        if self.tx.is_none() {
            return;
        }
        let mut deadline = Instant::now() + self.flush_timeout;
        if let Some(snapshot) = self.snapshot_until(deadline) {
            if snapshot.state != ConnectionState::Idle {
                self.flush_until(deadline);
            }
            // A responsive worker still gets to answer after a flush that used the budget.
            deadline = deadline.max(Instant::now() + SHUTDOWN_GRACE);
        }
        let acknowledged = self.request_shutdown(deadline);
        self.join_worker(acknowledged);
        self.warner.flush(|count| {
            warn!("DrifterSender dropped {count} messages after close");
        });
    }

    fn request_shutdown(&mut self, deadline: Instant) -> bool {
        let Some(tx) = self.tx.take() else {
            return false;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(SenderCommand::Shutdown(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_deadline(deadline).is_ok()
    }

    fn join_worker(&mut self, acknowledged: bool) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if !acknowledged && !handle.is_finished() {
            // Likely blocked in a connect without timeout; joining would hang.
            warn!("DrifterSender worker did not acknowledge shutdown; detaching");
            return;
        }
        if handle.join().is_err() {
            warn!("DrifterSender worker thread panicked");
        }
    }
}

impl Drop for DrifterSender {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DrifterSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrifterSender")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.tx.is_none())
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}
