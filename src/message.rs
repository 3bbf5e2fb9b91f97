//! Helpers for building transport-ready messages.
//!
//! The sender writes messages verbatim into the request line, so callers must
//! hand it percent-encoded text. [`encode_pairs`] produces that text from
//! key/value pairs, e.g. `service=mysql&server=db15&unit=B&value=17`.

use std::fmt::Write;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything except RFC 3986 unreserved characters. Space is mapped to `+`
/// separately by [`encode_component`].
const COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a single key or value, using `+` for spaces.
pub fn encode_component(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for (i, chunk) in s.split(' ').enumerate() {
        if i > 0 {
            result.push('+');
        }
        // Writing into a String cannot fail.
        let _ = write!(result, "{}", utf8_percent_encode(chunk, COMPONENT_ENCODE_SET));
    }
    result
}

/// Encode `pairs` as `key=value` components joined with `&`.
pub fn encode_pairs<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&encode_component(key.as_ref()));
        out.push('=');
        out.push_str(&encode_component(value.as_ref()));
    }
    out
}
