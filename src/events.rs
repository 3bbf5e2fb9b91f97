//! Per-sender event channels.
//!
//! Every [`DrifterSender`](crate::sender::DrifterSender) owns three bounded
//! channels: raw reply bytes, connection errors and telemetry samples. The
//! worker publishes without blocking; when a subscriber falls behind, further
//! events of that kind are dropped and a rate-limited warning is logged.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::warn;

use crate::{error::SenderError, rate_limited_warner::RateLimitedWarner};

/// Subscriber side of a sender's event channels.
///
/// Cloning yields receivers sharing the same streams: each event is delivered
/// to exactly one of the clones.
#[derive(Clone, Debug)]
pub struct SenderEvents {
    /// Bytes received on the connection, unmodified.
    pub data: Receiver<Vec<u8>>,
    /// Connection-level errors.
    pub errors: Receiver<SenderError>,
    /// Formatted telemetry samples.
    pub telemetry: Receiver<String>,
}

/// Worker side of the event channels.
pub(crate) struct EventPublisher {
    data: Sender<Vec<u8>>,
    errors: Sender<SenderError>,
    telemetry: Sender<String>,
    warner: RateLimitedWarner,
}

/// Create a connected publisher/subscriber pair.
pub(crate) fn channels(capacity: usize, warn_interval: Duration) -> (EventPublisher, SenderEvents) {
    let (data_tx, data_rx) = bounded(capacity);
    let (errors_tx, errors_rx) = bounded(capacity);
    let (telemetry_tx, telemetry_rx) = bounded(capacity);
    (
        EventPublisher {
            data: data_tx,
            errors: errors_tx,
            telemetry: telemetry_tx,
            warner: RateLimitedWarner::new(warn_interval),
        },
        SenderEvents {
            data: data_rx,
            errors: errors_rx,
            telemetry: telemetry_rx,
        },
    )
}

impl EventPublisher {
    pub fn data(&self, bytes: Vec<u8>) {
        self.publish(&self.data, bytes, "data");
    }

    pub fn error(&self, err: SenderError) {
        warn!("DrifterSender {err}");
        self.publish(&self.errors, err, "error");
    }

    pub fn telemetry(&self, sample: String) {
        self.publish(&self.telemetry, sample, "telemetry");
    }

    fn publish<T>(&self, tx: &Sender<T>, event: T, kind: &str) {
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.warner.record_drop();
                self.warner.warn_if_due(|count| {
                    warn!("DrifterSender {kind} channel full; dropped {count} events");
                });
            }
            // Every subscriber is gone; nobody is listening.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
