//! Request framing written for each dequeued message.
//!
//! ```text
//! GET <path>?<capability>&<message> HTTP/1.1\r\n
//! Host: <hostname>\r\n
//! \r\n
//! ```
//!
//! The message is copied verbatim; percent-encoding is the caller's job (see
//! [`crate::message::encode_pairs`]).

use crate::config::Endpoint;

/// Build the request bytes for `message` against `endpoint`.
pub fn frame_request(endpoint: &Endpoint, message: &str) -> Vec<u8> {
    let capacity = endpoint.path.len()
        + endpoint.capability.len()
        + message.len()
        + endpoint.hostname.len()
        + 32;
    let mut buf = String::with_capacity(capacity);
    buf.push_str("GET ");
    buf.push_str(&endpoint.path);
    buf.push('?');
    buf.push_str(&endpoint.capability);
    buf.push('&');
    buf.push_str(message);
    buf.push_str(" HTTP/1.1\r\n");
    buf.push_str("Host: ");
    buf.push_str(&endpoint.hostname);
    buf.push_str("\r\n\r\n");
    buf.into_bytes()
}
