// ABOUTME: Connection status and observer callbacks for the channel
// ABOUTME: Lets the UI layer track connected / reconnecting / disconnected

use std::time::Duration;

use crate::error::AirlockError;
use crate::stream::StreamPhase;

/// Connection status as the UI presents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl From<StreamPhase> for ConnectionStatus {
    fn from(phase: StreamPhase) -> Self {
        match phase {
            StreamPhase::Closed | StreamPhase::Bootstrapping => ConnectionStatus::Connecting,
            StreamPhase::Open => ConnectionStatus::Connected,
            StreamPhase::Erroring { .. } => ConnectionStatus::Reconnecting,
            StreamPhase::Fatal => ConnectionStatus::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Callbacks for the channel's event-stream lifecycle.
///
/// All methods have empty defaults; implement the ones you need.
pub trait ChannelObserver: Send + Sync {
    /// The event stream connected (first time or after a reconnect).
    fn on_open(&self) {}

    /// The stream failed; the consumer reconnects after `delay`.
    fn on_retry(&self, _attempt: u32, _delay: Duration) {}

    /// The stream is unusable until [`Airlock::reset`](crate::Airlock::reset).
    fn on_fatal(&self, _error: &AirlockError) {}

    /// Any status change, including the ones above.
    fn on_status(&self, _status: ConnectionStatus) {}
}
