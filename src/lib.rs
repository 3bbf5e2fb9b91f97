//! Queueing TLS sender for Drifter log and metric messages.
//!
//! A [`DrifterSender`] accepts pre-encoded messages, opens a single TLS
//! connection on demand and writes each message as one `GET` request:
//!
//! ```text
//! GET <path>?<capability>&<message> HTTP/1.1\r\nHost: <hostname>\r\n\r\n
//! ```
//!
//! The connection is closed once the queue is empty and reopened when more
//! messages arrive or when it ends with messages still queued. Reply bytes,
//! errors and handshake timings are published on [`SenderEvents`].
//!
//! ```no_run
//! use drifter_sender::{DrifterSender, encode_pairs};
//!
//! let sender = DrifterSender::builder()
//!     .with_capability("02hAozGflu".into())
//!     .with_hostname("localhost".into())
//!     .with_path("/1/log".into())
//!     .build()?;
//! sender.send(encode_pairs([("service", "mysql"), ("value", "17")]));
//! sender.flush();
//! # Ok::<(), drifter_sender::BuildError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod rate_limited_warner;
pub mod request;
pub mod sender;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use builder::{BackoffOverrides, SenderBuilder};
pub use config::{BackoffPolicy, Endpoint, SenderConfig, TlsOptions};
pub use error::{BuildError, SenderError};
pub use events::SenderEvents;
pub use message::encode_pairs;
pub use request::frame_request;
pub use sender::{ConnectionState, DrifterSender, SenderSnapshot};
pub use transport::{Connection, TlsTransport, Transport};
