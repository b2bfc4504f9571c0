use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the persistent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session started.
    Idle,
    /// Dialing the persistent channel and sending the token.
    Connecting,
    /// Handshake done; heartbeat and ingest loops running.
    Authenticated,
    /// A heartbeat or read failure was seen; the server is not yet known to be down.
    Degraded,
    /// The control channel answers; redialing the persistent channel.
    Reconnecting,
    /// Signed out, token rejected, or outage confirmed. All loops stopped.
    Terminated,
}

impl SessionState {
    /// Whether the supervisor may move from `self` to `next`.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Authenticated)
                | (Connecting, Idle)
                | (Authenticated, Degraded)
                | (Degraded, Authenticated)
                | (Degraded, Reconnecting)
                | (Reconnecting, Authenticated)
                | (Reconnecting, Degraded)
                | (Terminated, Idle)
                | (_, Terminated)
        )
    }

    /// Whether a session task is (or may still be) running.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Authenticated | Self::Degraded | Self::Reconnecting
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}
