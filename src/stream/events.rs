//! Connection events surfaced to the UI side.

use std::net::SocketAddr;

/// Connection-level notifications emitted by the socket loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Capture side connected (or reconnected) to its peer.
    Connected(SocketAddr),
    /// Capture side lost its peer; the timeout policy is running.
    ConnectionLost,
    /// Capture side gave up reconnecting and went idle. Sent once.
    TimedOut,
    /// Receive side accepted a peer.
    PeerAccepted(SocketAddr),
    /// Receive side's peer closed or failed.
    PeerClosed(SocketAddr),
}

/// Link status as last reported by [`LinkEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    #[default]
    Idle,
    Streaming(SocketAddr),
    Disconnected,
    TimedOut,
}

impl LinkStatus {
    /// Fold one event into the status.
    pub fn apply(&mut self, event: LinkEvent) {
        *self = match event {
            LinkEvent::Connected(peer) | LinkEvent::PeerAccepted(peer) => LinkStatus::Streaming(peer),
            LinkEvent::ConnectionLost | LinkEvent::PeerClosed(_) => LinkStatus::Disconnected,
            LinkEvent::TimedOut => LinkStatus::TimedOut,
        };
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkStatus::Idle => write!(f, "idle"),
            LinkStatus::Streaming(peer) => write!(f, "streaming ({})", peer),
            LinkStatus::Disconnected => write!(f, "disconnected"),
            LinkStatus::TimedOut => write!(f, "timed out"),
        }
    }
}
