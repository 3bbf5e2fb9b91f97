//! Connection lifecycle states.

use std::fmt;

/// Whether a new connection attempt may be scheduled.
///
/// ```text
/// Idle --send--> Connecting --handshake--> Connected --drained & closed--> Idle
///                    ^                          |
///                    +---- dropped with queue --+
/// Connecting --error--> Idle   (re-armed by the next send)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a sender, reported by its worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenderSnapshot {
    pub state: ConnectionState,
    /// Messages accepted but not yet written.
    pub queued: usize,
}

impl SenderSnapshot {
    /// Idle with nothing left to deliver.
    pub fn is_quiescent(&self) -> bool {
        self.state == ConnectionState::Idle && self.queued == 0
    }
}
