//! Timing samples reported on the telemetry channel.

use std::time::Duration;

/// Component name reported in telemetry samples.
pub const TELEMETRY_MODULE: &str = env!("CARGO_PKG_NAME");
/// Component version reported in telemetry samples.
pub const TELEMETRY_MODULE_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Operation tag of the handshake latency sample.
pub const SECURE_CONNECT_OPERATION: &str = "secure_connect";

/// Format the sample emitted once per completed TLS handshake.
///
/// `module=<name>&module_version=<ver>&target_type=timer&operation=secure_connect&unit=ns&value=<ns>`
pub fn secure_connect_sample(elapsed: Duration) -> String {
    timer_sample(SECURE_CONNECT_OPERATION, elapsed)
}

fn timer_sample(operation: &str, elapsed: Duration) -> String {
    format!(
        "module={TELEMETRY_MODULE}&module_version={TELEMETRY_MODULE_VERSION}\
         &target_type=timer&operation={operation}&unit=ns&value={}",
        elapsed.as_nanos()
    )
}
