//! Connection lifecycle and message delivery.
//!
//! [`DrifterSender`] is a thin handle over a worker thread that owns the
//! message queue, the single connection and the [`ConnectionState`] guard.
//! The worker opens a TLS connection when the first message arrives, writes
//! one request per queued message, closes the connection once the queue is
//! empty and reconnects if the connection ends with messages still queued.
//!
//! Failed connection attempts are reported on the error channel. Unless a
//! [`BackoffPolicy`](crate::config::BackoffPolicy) is configured they are not
//! retried until the next `send`.

pub(crate) mod backoff;
mod handle;
mod state;
mod worker;


pub use handle::DrifterSender;
pub use state::{ConnectionState, SenderSnapshot};
