use tokio::time::Instant;

use crate::model::StatusSnapshot;

pub mod polling;
pub mod websocket;

pub use polling::PollingChannel;
pub use websocket::PushChannel;

/// Monotonic lease handed to a channel when it starts. The coordinator
/// ignores events from generations that are no longer live, so a stopped
/// channel's in-flight work can never reanimate shared state.
pub type Generation = u64;

/// What a channel reports back to the coordinator. Channels never touch the
/// shared snapshot themselves.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A parsed, backfilled snapshot ready for change detection.
    Snapshot {
        generation: Generation,
        snapshot: StatusSnapshot,
    },
    /// The push socket is open; polling must yield.
    PushOpen { generation: Generation },
    /// The push socket closed; a reconnect may follow.
    PushClosed { generation: Generation },
    /// The push channel exhausted its reconnect window.
    PushGivenUp { generation: Generation },
    /// The polling channel hit its failure ceiling or session timeout.
    PollingTimedOut { generation: Generation },
}

impl ChannelEvent {
    pub fn generation(&self) -> Generation {
        match self {
            ChannelEvent::Snapshot { generation, .. }
            | ChannelEvent::PushOpen { generation }
            | ChannelEvent::PushClosed { generation }
            | ChannelEvent::PushGivenUp { generation }
            | ChannelEvent::PollingTimedOut { generation } => *generation,
        }
    }
}

/// Per-connection bookkeeping. Created when a channel starts, dropped when
/// it is torn down or replaced.
#[derive(Debug)]
pub struct ChannelSession {
    pub started_at: Instant,
    pub failures: u32,
    /// Opaque validation token echoed on the next conditional request
    /// (polling only).
    pub etag: Option<String>,
}

impl ChannelSession {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            failures: 0,
            etag: None,
        }
    }
}

impl Default for ChannelSession {
    fn default() -> Self {
        Self::new()
    }
}
